//! Enemy detection and attack
//!
//! During battle, watches for an enemy health bar. When one appears the
//! shared `meet_enemy` flag is raised (pausing movement) and a fixed burst
//! of equip/skill/attack taps is played once. The flag drops again when the
//! health bar disappears.

use std::time::Duration;

use super::{BotContext, PeriodicTask};
use crate::android::{DeviceError, PointerId};

/// What a single poll did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnemyOutcome {
    /// Nothing to do
    Idle,
    /// Enemy appeared and the burst completed
    Attacked,
    /// Enemy appeared but the burst was cut short by a device error
    AttackFailed,
    /// Enemy still on screen from an earlier poll
    Engaged,
    /// Enemy gone; flag cleared
    Cleared,
}

pub struct EnemyAttackLoop {
    ctx: BotContext,
}

impl EnemyAttackLoop {
    pub fn new(ctx: BotContext) -> Self {
        Self { ctx }
    }

    /// Run one detection poll
    pub fn step(&mut self) -> EnemyOutcome {
        let state = &self.ctx.state;
        if state.is_stopped() {
            return EnemyOutcome::Idle;
        }
        if !state.in_battle() {
            state.set_meet_enemy(false);
            return EnemyOutcome::Idle;
        }
        let Some(frame) = self.ctx.frames.latest() else {
            return EnemyOutcome::Idle;
        };

        let seen = self
            .ctx
            .settings
            .scenario
            .enemy_templates
            .iter()
            .any(|name| self.ctx.matcher.matches(&frame, name));
        if state.is_stopped() {
            return EnemyOutcome::Idle;
        }

        if !seen {
            if state.set_meet_enemy(false) {
                log::info!("Enemy out of sight");
                return EnemyOutcome::Cleared;
            }
            return EnemyOutcome::Idle;
        }

        if state.set_meet_enemy(true) {
            return EnemyOutcome::Engaged;
        }

        log::info!("Enemy spotted, attacking");
        match self.attack() {
            Ok(()) => EnemyOutcome::Attacked,
            Err(e) => {
                log::error!("Attack burst aborted, continuing: {}", e);
                EnemyOutcome::AttackFailed
            }
        }
    }

    /// Tap every attack point in order, `attack_iterations` times
    fn attack(&self) -> Result<(), DeviceError> {
        let scenario = &self.ctx.settings.scenario;
        let gap = self.ctx.settings.timings.attack_tap_gap();

        for _ in 0..scenario.attack_iterations {
            for &point in &scenario.attack_points {
                if self.ctx.state.is_stopped() {
                    log::info!("Attack burst interrupted by stop");
                    return Ok(());
                }
                self.ctx.dispatcher.tap(point, PointerId::ATTACK)?;
                self.ctx.clock.sleep(gap);
            }
        }
        Ok(())
    }
}

impl PeriodicTask for EnemyAttackLoop {
    fn name(&self) -> &'static str {
        "enemy"
    }

    fn interval(&self) -> Duration {
        self.ctx.settings.timings.enemy_poll()
    }

    fn tick(&mut self) {
        self.step();
    }
}
