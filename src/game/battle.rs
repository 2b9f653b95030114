//! Battle state tracking
//!
//! Decides whether a battle is in progress from the in-battle HUD
//! templates, times each battle, and surrenders once a battle runs past the
//! configured limit.

use std::time::Duration;

use crate::android::PointerId;
use crate::automation::{BotContext, PeriodicTask};

/// What a single poll did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BattleTransition {
    /// No frame yet, or automation paused
    Skipped,
    /// Still out of battle
    Idle,
    /// Battle started on this poll
    Entered,
    /// Battle still running
    Continuing,
    /// Battle ended on this poll
    Left,
    /// Time limit passed and the surrender sequence ran
    Surrendered,
}

/// Polls the current frame for the in-battle HUD
pub struct BattleStateTracker {
    ctx: BotContext,
}

impl BattleStateTracker {
    pub fn new(ctx: BotContext) -> Self {
        Self { ctx }
    }

    /// Run one detection poll
    pub fn poll(&mut self) -> BattleTransition {
        let state = &self.ctx.state;
        if state.is_stopped() {
            return BattleTransition::Skipped;
        }
        let Some(frame) = self.ctx.frames.latest() else {
            return BattleTransition::Skipped;
        };

        let battle = &self.ctx.settings.battle;
        let matcher = &self.ctx.matcher;
        let detected = matcher.matches(&frame, &battle.alive_template)
            || matcher.matches(&frame, &battle.dead_template);
        // Matches made after a pause report nothing; keep the current state
        if state.is_stopped() {
            return BattleTransition::Skipped;
        }
        let now = self.ctx.clock.now();

        match (state.in_battle(), detected) {
            (false, false) => {
                log::debug!("not in battle");
                BattleTransition::Idle
            }
            (false, true) => {
                state.enter_battle(now);
                log::info!("Battle {} started", state.episodes());
                BattleTransition::Entered
            }
            (true, false) => {
                let elapsed = state.battle_elapsed(now).unwrap_or_default();
                state.leave_battle();
                log::info!("Battle ended after {:.0?}", elapsed);
                BattleTransition::Left
            }
            (true, true) => {
                let elapsed = state.battle_elapsed(now).unwrap_or_default();
                if !state.surrendered() && elapsed > battle.time_limit() {
                    state.mark_surrendered();
                    self.surrender(elapsed);
                    BattleTransition::Surrendered
                } else {
                    BattleTransition::Continuing
                }
            }
        }
    }

    /// Open the settings panel, then press surrender
    ///
    /// Each step is attempted on the newest frame regardless of whether the
    /// previous one found its button.
    fn surrender(&self, elapsed: Duration) {
        log::info!("Battle running for {:.0?}, surrendering", elapsed);

        let battle = &self.ctx.settings.battle;
        let steps = [&battle.settings_template, &battle.surrender_template];
        for (i, name) in steps.into_iter().enumerate() {
            if i > 0 {
                self.ctx
                    .clock
                    .sleep(self.ctx.settings.timings.surrender_step_delay());
            }

            let Some(frame) = self.ctx.frames.latest() else {
                continue;
            };
            match self.ctx.matcher.match_template(&frame, name).hit() {
                Some(point) => {
                    if let Err(e) = self.ctx.dispatcher.tap(point, PointerId::BATTLE) {
                        log::error!("Failed to tap {}: {}", name, e);
                    }
                }
                None => log::warn!("{} button not visible, skipping", name),
            }
        }
    }
}

impl PeriodicTask for BattleStateTracker {
    fn name(&self) -> &'static str {
        "battle"
    }

    fn interval(&self) -> Duration {
        self.ctx.settings.timings.battle_poll()
    }

    fn tick(&mut self) {
        self.poll();
    }
}
