//! Fixtures for loop tests: in-memory templates, a recording device and a
//! virtual clock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use image::{Rgb, RgbImage};

use super::{BotContext, Clock, ManualClock};
use crate::android::{ActionDispatcher, CommandQueue, ControlCommand, Point, PointerId, TouchAction};
use crate::config::Settings;
use crate::game::SharedState;
use crate::vision::{CurrentFrame, Frame, Template, TemplateMatcher, TemplateSource, VisionError};

pub(crate) const TEMPLATE_WIDTH: u32 = 16;
pub(crate) const TEMPLATE_HEIGHT: u32 = 12;
const CANVAS_WIDTH: u32 = 244;
const CANVAS_HEIGHT: u32 = 50;

/// Deterministic textured image
pub(crate) fn noise(width: u32, height: u32, seed: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let v = (x.wrapping_mul(73) ^ y.wrapping_mul(151) ^ seed).wrapping_mul(2654435761);
        Rgb([(v >> 8) as u8, (v >> 16) as u8, (v >> 24) as u8])
    })
}

/// Templates held in memory, each with a fixed slot on the test canvas
#[derive(Default)]
pub(crate) struct StaticTemplates {
    entries: Mutex<HashMap<String, (usize, RgbImage)>>,
    pub loads: AtomicUsize,
}

impl StaticTemplates {
    fn register(&self, name: &str) -> (usize, RgbImage) {
        let mut entries = self.entries.lock().unwrap();
        let next = entries.len();
        entries
            .entry(name.to_string())
            .or_insert_with(|| {
                let seed = (next as u32 + 1).wrapping_mul(7919);
                (next, noise(TEMPLATE_WIDTH, TEMPLATE_HEIGHT, seed))
            })
            .clone()
    }
}

impl TemplateSource for StaticTemplates {
    fn load(&self, name: &str) -> Result<Arc<Template>, VisionError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let entries = self.entries.lock().unwrap();
        let (_, image) = entries.get(name).ok_or_else(|| VisionError::TemplateLoad {
            name: name.to_string(),
            reason: "not registered".to_string(),
        })?;
        Ok(Arc::new(Template {
            name: name.to_string(),
            image: Frame::from_rgb_image(image),
        }))
    }
}

/// Raises the stop flag while `trigger` is being loaded
struct PauseOnLoad {
    inner: Arc<StaticTemplates>,
    state: Arc<SharedState>,
    trigger: String,
}

impl TemplateSource for PauseOnLoad {
    fn load(&self, name: &str) -> Result<Arc<Template>, VisionError> {
        let template = self.inner.load(name);
        if name == self.trigger {
            self.state.set_stopped(true);
        }
        template
    }
}

/// A fully wired context over a recording device and virtual clock
pub(crate) struct Harness {
    pub ctx: BotContext,
    pub queue: Arc<CommandQueue>,
    pub clock: Arc<ManualClock>,
    pub templates: Arc<StaticTemplates>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> Self {
        let settings = Arc::new(settings);
        let state = Arc::new(SharedState::new());
        let queue = Arc::new(CommandQueue::new());
        let clock = Arc::new(ManualClock::new());
        let templates = Arc::new(StaticTemplates::default());

        let clock_dyn: Arc<dyn Clock> = clock.clone();
        let matcher = TemplateMatcher::new(templates.clone(), state.clone())
            .with_threshold(settings.match_threshold);
        let dispatcher = ActionDispatcher::new(queue.clone(), clock_dyn.clone())
            .with_tap_hold(settings.timings.tap_hold());

        let ctx = BotContext {
            settings,
            state,
            frames: Arc::new(CurrentFrame::new()),
            matcher: Arc::new(matcher),
            dispatcher: Arc::new(dispatcher),
            clock: clock_dyn,
        };

        Self {
            ctx,
            queue,
            clock,
            templates,
        }
    }

    /// Register every template name in use so each has a canvas slot
    pub fn register_all(&self) {
        let settings = self.ctx.settings.clone();
        let battle = &settings.battle;
        for name in [
            &battle.alive_template,
            &battle.dead_template,
            &battle.settings_template,
            &battle.surrender_template,
        ] {
            self.templates.register(name);
        }
        let scenario = &settings.scenario;
        for name in scenario
            .menu_templates
            .iter()
            .chain(&scenario.skill_templates)
            .chain(&scenario.enemy_templates)
        {
            self.templates.register(name);
        }
    }

    fn slot(index: usize) -> (u32, u32) {
        let x = 2 + (index as u32 % 12) * 20;
        let y = 2 + (index as u32 / 12) * 16;
        (x, y)
    }

    /// Where a tap on `name` lands
    pub fn center_of(&self, name: &str) -> Point {
        let (index, _) = self.templates.register(name);
        let (x, y) = Self::slot(index);
        Point::new(
            (x + TEMPLATE_WIDTH / 2) as i32,
            (y + TEMPLATE_HEIGHT / 2) as i32,
        )
    }

    /// Make the current frame show exactly the named templates
    pub fn show(&self, names: &[&str]) {
        self.register_all();
        let mut canvas = noise(CANVAS_WIDTH, CANVAS_HEIGHT, 0xabcd);
        for name in names {
            let (index, image) = self.templates.register(name);
            let (x, y) = Self::slot(index);
            image::imageops::replace(&mut canvas, &image, x as i64, y as i64);
        }
        self.ctx.frames.store(Frame::from_rgb_image(&canvas));
    }

    /// The harness context, but the operator pauses while `name` loads
    pub fn pausing_on(&self, name: &str) -> BotContext {
        let mut ctx = self.ctx.clone();
        let source = Arc::new(PauseOnLoad {
            inner: self.templates.clone(),
            state: ctx.state.clone(),
            trigger: name.to_string(),
        });
        ctx.matcher = Arc::new(
            TemplateMatcher::new(source, ctx.state.clone())
                .with_threshold(ctx.settings.match_threshold),
        );
        ctx
    }

    /// Points tapped (down events) under `pointer`, in order
    pub fn taps(&self, commands: &[ControlCommand], pointer: PointerId) -> Vec<Point> {
        commands
            .iter()
            .filter_map(|c| match c {
                ControlCommand::Touch {
                    point,
                    action: TouchAction::Down,
                    pointer: p,
                } if *p == pointer => Some(*point),
                _ => None,
            })
            .collect()
    }
}
