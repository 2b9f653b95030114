//! Skill upgrades
//!
//! During battle, taps every skill-upgrade prompt currently on screen.

use std::time::Duration;

use super::{BotContext, PeriodicTask};
use crate::android::PointerId;

pub struct SkillUpgradeLoop {
    ctx: BotContext,
}

impl SkillUpgradeLoop {
    pub fn new(ctx: BotContext) -> Self {
        Self { ctx }
    }

    /// Check every prompt once; returns how many were tapped
    pub fn step(&mut self) -> usize {
        let state = &self.ctx.state;
        if state.is_stopped() || !state.in_battle() {
            return 0;
        }
        let Some(frame) = self.ctx.frames.latest() else {
            return 0;
        };

        let mut tapped = 0;
        for name in &self.ctx.settings.scenario.skill_templates {
            let Some(point) = self.ctx.matcher.match_template(&frame, name).hit() else {
                continue;
            };
            match self.ctx.dispatcher.tap(point, PointerId::SKILL) {
                Ok(()) => {
                    log::info!("Upgraded skill via {}", name);
                    tapped += 1;
                }
                Err(e) => log::error!("Failed to tap {}: {}", name, e),
            }
        }
        tapped
    }
}

impl PeriodicTask for SkillUpgradeLoop {
    fn name(&self) -> &'static str {
        "skills"
    }

    fn interval(&self) -> Duration {
        self.ctx.settings.timings.skill_poll()
    }

    fn tick(&mut self) {
        self.step();
    }
}
