//! Automation loops
//!
//! Every responsibility (frame relay, battle tracking, menu navigation,
//! movement, skill upgrades, enemy attacks) is a `PeriodicTask` running on
//! its own thread. Tasks share a `BotContext` and coordinate only through
//! the flags in `SharedState`.

pub mod clock;
pub mod enemy;
pub mod menu;
pub mod movement;
pub mod relay;
pub mod skills;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::android::ActionDispatcher;
use crate::config::Settings;
use crate::game::SharedState;
use crate::vision::{CurrentFrame, TemplateMatcher};

pub use clock::{Clock, ManualClock, SystemClock};
pub use enemy::EnemyAttackLoop;
pub use menu::MenuNavigator;
pub use movement::MovementLoop;
pub use relay::FrameRelay;
pub use skills::SkillUpgradeLoop;

/// Handles shared by every loop
#[derive(Clone)]
pub struct BotContext {
    pub settings: Arc<Settings>,
    pub state: Arc<SharedState>,
    pub frames: Arc<CurrentFrame>,
    pub matcher: Arc<TemplateMatcher>,
    pub dispatcher: Arc<ActionDispatcher>,
    pub clock: Arc<dyn Clock>,
}

/// A loop body run repeatedly with a fixed pause
pub trait PeriodicTask: Send {
    /// Short name, used for the thread name and logs
    fn name(&self) -> &'static str;

    /// Pause after each tick
    fn interval(&self) -> Duration;

    /// One poll
    fn tick(&mut self);
}

/// Runs periodic tasks on dedicated threads
///
/// Threads run until the alive flag is cleared. They are not joined on
/// shutdown; a tick in progress finishes on its own.
pub struct Scheduler {
    state: Arc<SharedState>,
    clock: Arc<dyn Clock>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(state: Arc<SharedState>, clock: Arc<dyn Clock>) -> Self {
        Self {
            state,
            clock,
            handles: Vec::new(),
        }
    }

    /// Start `task` on its own thread
    pub fn spawn(&mut self, mut task: Box<dyn PeriodicTask>) -> std::io::Result<()> {
        let state = self.state.clone();
        let clock = self.clock.clone();
        let name = task.name();

        let handle = thread::Builder::new()
            .name(format!("autobattle-{}", name))
            .spawn(move || {
                log::info!("{} loop started", name);
                while state.is_alive() {
                    task.tick();
                    let interval = task.interval();
                    if !interval.is_zero() {
                        clock.sleep(interval);
                    }
                }
                log::info!("{} loop stopped", name);
            })?;

        self.handles.push(handle);
        Ok(())
    }

    /// Number of loops started
    pub fn running(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every loop to exit; only returns once the alive flag is
    /// cleared
    pub fn join(self) {
        for handle in self.handles {
            if handle.join().is_err() {
                log::error!("automation loop panicked");
            }
        }
    }
}
