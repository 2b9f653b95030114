//! autobattle - template-matching battle automation for mirrored Android
//! screens
//!
//! A mirroring client pushes decoded frames into [`Bot::on_frame`]. Frames
//! pass through a single-slot buffer to a relay loop that keeps the latest
//! one in a shared slot. Independent polling loops match reference images
//! against that frame and send taps and swipes back through a
//! [`android::DeviceControl`] implementation.
//!
//! ## Loops
//!
//! - frame relay
//! - battle detection, battle timer and surrender
//! - menu navigation (outside battle)
//! - joystick movement, skill upgrades and enemy attack bursts (in battle)

pub mod android;
pub mod automation;
pub mod config;
pub mod game;
pub mod vision;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use once_cell::sync::OnceCell;

use crate::android::{
    ActionDispatcher, DeviceControl, DeviceError, DisplayScale, Keycode, PointerId, TouchAction,
};
use crate::automation::{
    BotContext, Clock, EnemyAttackLoop, FrameRelay, MenuNavigator, MovementLoop, PeriodicTask,
    Scheduler, SkillUpgradeLoop, SystemClock,
};
use crate::config::Settings;
use crate::game::{BattleSnapshot, BattleStateTracker, SharedState};
use crate::vision::{
    CurrentFrame, Frame, FrameBuffer, FrameSink, TemplateDir, TemplateMatcher, TemplateSource,
    VisionError,
};

/// The automation core for one mirroring session
pub struct Bot {
    settings: Arc<Settings>,
    state: Arc<SharedState>,
    buffer: Arc<FrameBuffer>,
    frames: Arc<CurrentFrame>,
    matcher: Arc<TemplateMatcher>,
    dispatcher: Arc<ActionDispatcher>,
    clock: Arc<dyn Clock>,
    sink: Option<Arc<dyn FrameSink>>,
    scale: DisplayScale,
    scheduler: Option<Scheduler>,
}

impl Bot {
    /// Create a bot reading templates from `settings.template_dir`
    pub fn new(settings: Settings, device: Arc<dyn DeviceControl>) -> Self {
        let templates = Arc::new(TemplateDir::new(settings.template_dir.clone()));
        Self::with_parts(settings, device, templates, Arc::new(SystemClock::new()))
    }

    /// Create a bot with an explicit template source and clock
    pub fn with_parts(
        settings: Settings,
        device: Arc<dyn DeviceControl>,
        templates: Arc<dyn TemplateSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let state = Arc::new(SharedState::new());
        let matcher =
            TemplateMatcher::new(templates, state.clone()).with_threshold(settings.match_threshold);
        let dispatcher = ActionDispatcher::new(device, clock.clone())
            .with_tap_hold(settings.timings.tap_hold());
        let scale = DisplayScale::new(settings.display.max_width, 0, 0);

        Self {
            settings: Arc::new(settings),
            state,
            buffer: Arc::new(FrameBuffer::new()),
            frames: Arc::new(CurrentFrame::new()),
            matcher: Arc::new(matcher),
            dispatcher: Arc::new(dispatcher),
            clock,
            sink: None,
            scale,
            scheduler: None,
        }
    }

    /// Forward every incoming frame to a rendering surface
    pub fn with_sink(mut self, sink: Arc<dyn FrameSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Handles shared by the loops
    pub fn context(&self) -> BotContext {
        BotContext {
            settings: self.settings.clone(),
            state: self.state.clone(),
            frames: self.frames.clone(),
            matcher: self.matcher.clone(),
            dispatcher: self.dispatcher.clone(),
            clock: self.clock.clone(),
        }
    }

    /// One instance of every loop, relay first
    pub fn tasks(&self) -> Vec<Box<dyn PeriodicTask>> {
        let ctx = self.context();
        vec![
            Box::new(FrameRelay::new(
                self.buffer.clone(),
                self.frames.clone(),
                self.settings.timings.relay_wait(),
            )),
            Box::new(BattleStateTracker::new(ctx.clone())),
            Box::new(MenuNavigator::new(ctx.clone())),
            Box::new(MovementLoop::new(ctx.clone())),
            Box::new(SkillUpgradeLoop::new(ctx.clone())),
            Box::new(EnemyAttackLoop::new(ctx)),
        ]
    }

    /// Start every loop on its own thread
    pub fn start(&mut self) -> std::io::Result<()> {
        if self.scheduler.is_some() {
            log::warn!("Automation already running");
            return Ok(());
        }
        // Loops from the ended session may still be finishing their last tick
        if !self.state.is_alive() {
            return Err(std::io::Error::other("automation session was shut down"));
        }

        let mut scheduler = Scheduler::new(self.state.clone(), self.clock.clone());
        for task in self.tasks() {
            scheduler.spawn(task)?;
        }
        log::info!("Started {} automation loops", scheduler.running());
        self.scheduler = Some(scheduler);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_some() && self.state.is_alive()
    }

    /// Frame callback from the mirroring client; never waits on the loops
    pub fn on_frame(&self, frame: Frame) {
        if let Some(sink) = &self.sink {
            sink.render(&frame);
        }
        self.buffer.publish(frame);
    }

    /// Record the device's native resolution reported at session start
    pub fn set_native_resolution(&mut self, width: u32, height: u32) {
        self.scale = DisplayScale::new(self.settings.display.max_width, width, height);
        log::info!("Device resolution {}x{}, display ratio {:.3}", width, height, self.scale.ratio());
    }

    pub fn display_scale(&self) -> DisplayScale {
        self.scale
    }

    /// Forward a pointer event from the operator window
    pub fn forward_pointer(&self, x: f32, y: f32, action: TouchAction) -> Result<(), DeviceError> {
        let point = self.scale.to_device(x, y);
        self.dispatcher.touch(point, action, PointerId::OPERATOR)
    }

    /// Forward a key press from the operator
    pub fn press_key(&self, code: Keycode) -> Result<(), DeviceError> {
        self.dispatcher.press_key(code)
    }

    pub fn home(&self) -> Result<(), DeviceError> {
        self.dispatcher.home()
    }

    pub fn back(&self) -> Result<(), DeviceError> {
        self.dispatcher.back()
    }

    /// Pause or resume every loop, returning whether now paused
    pub fn toggle_stop(&self) -> bool {
        let stopped = self.state.toggle_stopped();
        log::info!("Automation {}", if stopped { "paused" } else { "resumed" });
        stopped
    }

    pub fn set_stopped(&self, stopped: bool) {
        self.state.set_stopped(stopped);
    }

    pub fn is_stopped(&self) -> bool {
        self.state.is_stopped()
    }

    /// Save the current frame to the screenshot directory
    pub fn capture_screenshot(&self) -> Result<PathBuf, VisionError> {
        let (frame, dir) = self.screenshot_target()?;
        vision::save_screenshot(&frame, &dir)
    }

    /// The current frame and the directory it would be saved to
    ///
    /// Lets a caller holding the bot lock encode the image after releasing it.
    pub fn screenshot_target(&self) -> Result<(Arc<Frame>, PathBuf), VisionError> {
        let frame = self.frames.latest().ok_or(VisionError::NoFrame)?;
        Ok((frame, self.settings.screenshot_dir.clone()))
    }

    /// Current battle flags
    pub fn snapshot(&self) -> BattleSnapshot {
        self.state.snapshot(self.clock.now())
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn frame_buffer(&self) -> &Arc<FrameBuffer> {
        &self.buffer
    }

    /// End the session: loops exit at their next check and are not joined
    pub fn shutdown(&mut self) {
        self.state.set_alive(false);
        if self.scheduler.take().is_some() {
            log::info!("Automation shut down");
        }
    }
}

/// Global bot instance for JNI access
static BOT_INSTANCE: OnceCell<Mutex<Bot>> = OnceCell::new();

/// Install the global bot; returns false if one was already installed
pub fn init_bot(bot: Bot) -> bool {
    BOT_INSTANCE.set(Mutex::new(bot)).is_ok()
}

/// Get a reference to the global bot
pub fn get_bot() -> Option<&'static Mutex<Bot>> {
    BOT_INSTANCE.get()
}
