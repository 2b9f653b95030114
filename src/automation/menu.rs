//! Menu navigation
//!
//! Outside battle, works out which menu screen is showing by matching the
//! configured screens in order, and taps the first one found. The next poll
//! sees the screen that tap led to.

use std::time::Duration;

use super::{BotContext, PeriodicTask};
use crate::android::{Point, PointerId};

pub struct MenuNavigator {
    ctx: BotContext,
}

impl MenuNavigator {
    pub fn new(ctx: BotContext) -> Self {
        Self { ctx }
    }

    /// Scan once; returns the screen tapped, if any
    pub fn step(&mut self) -> Option<(String, Point)> {
        let state = &self.ctx.state;
        if state.is_stopped() || state.in_battle() {
            return None;
        }
        let frame = self.ctx.frames.latest()?;

        let templates = &self.ctx.settings.scenario.menu_templates;
        let (name, point) = self.ctx.matcher.find_first(&frame, templates)?;

        log::info!("Menu screen {} detected, tapping", name);
        if let Err(e) = self.ctx.dispatcher.tap(point, PointerId::MENU) {
            log::error!("Failed to tap {}: {}", name, e);
            return None;
        }
        Some((name.to_string(), point))
    }
}

impl PeriodicTask for MenuNavigator {
    fn name(&self) -> &'static str {
        "menu"
    }

    fn interval(&self) -> Duration {
        self.ctx.settings.timings.menu_poll()
    }

    fn tick(&mut self) {
        self.step();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::testing::Harness;

    #[test]
    fn test_no_frame_no_taps() {
        let harness = Harness::new();
        let mut menu = MenuNavigator::new(harness.ctx.clone());

        assert!(menu.step().is_none());
        assert!(harness.queue.is_empty());
        assert_eq!(
            harness
                .templates
                .loads
                .load(std::sync::atomic::Ordering::SeqCst),
            0
        );
    }

    #[test]
    fn test_taps_first_screen_in_order() {
        let harness = Harness::new();
        let mut menu = MenuNavigator::new(harness.ctx.clone());

        // "confirm" comes before "continue" in the traversal list
        harness.show(&["continue", "confirm"]);
        let (name, point) = menu.step().unwrap();
        assert_eq!(name, "confirm");
        assert_eq!(point, harness.center_of("confirm"));

        let taps = harness.taps(&harness.queue.drain(), PointerId::MENU);
        assert_eq!(taps, vec![harness.center_of("confirm")]);
    }

    #[test]
    fn test_rescans_each_poll() {
        let harness = Harness::new();
        let mut menu = MenuNavigator::new(harness.ctx.clone());

        harness.show(&["battle"]);
        assert_eq!(menu.step().unwrap().0, "battle");
        harness.show(&["solo"]);
        assert_eq!(menu.step().unwrap().0, "solo");
        harness.show(&[]);
        assert!(menu.step().is_none());
    }

    #[test]
    fn test_idle_during_battle() {
        let harness = Harness::new();
        let mut menu = MenuNavigator::new(harness.ctx.clone());

        harness.show(&["confirm"]);
        harness.ctx.state.enter_battle(Duration::ZERO);
        assert!(menu.step().is_none());
        assert!(harness.queue.is_empty());
    }

    #[test]
    fn test_idle_when_stopped() {
        let harness = Harness::new();
        let mut menu = MenuNavigator::new(harness.ctx.clone());

        harness.show(&["confirm"]);
        harness.ctx.state.set_stopped(true);
        assert!(menu.step().is_none());
        assert!(harness.queue.is_empty());
    }
}
