//! Joystick movement
//!
//! Keeps the hero walking during battle by repeating a fixed joystick drag,
//! until an enemy shows up.

use std::time::Duration;

use super::{BotContext, PeriodicTask};
use crate::android::PointerId;

pub struct MovementLoop {
    ctx: BotContext,
}

impl MovementLoop {
    pub fn new(ctx: BotContext) -> Self {
        Self { ctx }
    }

    /// Issue one drag if the hero should be moving; returns whether it did
    pub fn step(&mut self) -> bool {
        let state = &self.ctx.state;
        if state.is_stopped() || !state.in_battle() || state.meet_enemy() {
            return false;
        }

        let gesture = self.ctx.settings.scenario.movement_swipe;
        match self
            .ctx
            .dispatcher
            .swipe(gesture.start, gesture.end, PointerId::MOVEMENT)
        {
            Ok(()) => true,
            Err(e) => {
                log::error!("Movement swipe failed: {}", e);
                false
            }
        }
    }
}

impl PeriodicTask for MovementLoop {
    fn name(&self) -> &'static str {
        "movement"
    }

    fn interval(&self) -> Duration {
        self.ctx.settings.timings.movement_poll()
    }

    fn tick(&mut self) {
        self.step();
    }
}
