//! Shared automation state
//!
//! Flags read and written by the independently scheduled loops. Plain
//! atomic loads and stores; a few hundred milliseconds of staleness between
//! loops is fine.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;

/// Flags shared by every loop
#[derive(Debug)]
pub struct SharedState {
    /// Operator pause
    stop: AtomicBool,
    /// Cleared when the mirroring session is torn down
    alive: AtomicBool,
    in_battle: AtomicBool,
    meet_enemy: AtomicBool,
    /// Surrender already sent in the current battle
    surrendered: AtomicBool,
    /// Clock reading at battle entry
    battle_started: Mutex<Option<Duration>>,
    /// Battles entered so far
    episodes: AtomicU64,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            stop: AtomicBool::new(false),
            alive: AtomicBool::new(true),
            in_battle: AtomicBool::new(false),
            meet_enemy: AtomicBool::new(false),
            surrendered: AtomicBool::new(false),
            battle_started: Mutex::new(None),
            episodes: AtomicU64::new(0),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    pub fn set_stopped(&self, stopped: bool) {
        self.stop.store(stopped, Ordering::Relaxed);
    }

    /// Flip the pause flag, returning the new value
    pub fn toggle_stopped(&self) -> bool {
        !self.stop.fetch_xor(true, Ordering::Relaxed)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    pub fn in_battle(&self) -> bool {
        self.in_battle.load(Ordering::Relaxed)
    }

    pub fn meet_enemy(&self) -> bool {
        self.meet_enemy.load(Ordering::Relaxed)
    }

    /// Set the enemy flag, returning its previous value
    pub fn set_meet_enemy(&self, meet: bool) -> bool {
        self.meet_enemy.swap(meet, Ordering::Relaxed)
    }

    /// Start a battle episode at `now`
    pub fn enter_battle(&self, now: Duration) {
        *self
            .battle_started
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(now);
        self.surrendered.store(false, Ordering::Relaxed);
        self.episodes.fetch_add(1, Ordering::Relaxed);
        self.in_battle.store(true, Ordering::Relaxed);
    }

    /// End the current battle episode
    pub fn leave_battle(&self) {
        self.in_battle.store(false, Ordering::Relaxed);
        self.meet_enemy.store(false, Ordering::Relaxed);
        *self
            .battle_started
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Time since battle entry; `None` outside battle
    pub fn battle_elapsed(&self, now: Duration) -> Option<Duration> {
        if !self.in_battle() {
            return None;
        }
        self.battle_started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|started| now.saturating_sub(started))
    }

    pub fn surrendered(&self) -> bool {
        self.surrendered.load(Ordering::Relaxed)
    }

    pub fn mark_surrendered(&self) {
        self.surrendered.store(true, Ordering::Relaxed);
    }

    pub fn episodes(&self) -> u64 {
        self.episodes.load(Ordering::Relaxed)
    }

    /// Point-in-time copy for reporting
    pub fn snapshot(&self, now: Duration) -> BattleSnapshot {
        BattleSnapshot {
            in_battle: self.in_battle(),
            meet_enemy: self.meet_enemy(),
            stopped: self.is_stopped(),
            surrendered: self.surrendered(),
            battle_secs: self.battle_elapsed(now).map(|d| d.as_secs_f32()),
            episodes: self.episodes(),
        }
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable view of `SharedState`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleSnapshot {
    pub in_battle: bool,
    pub meet_enemy: bool,
    pub stopped: bool,
    pub surrendered: bool,
    pub battle_secs: Option<f32>,
    pub episodes: u64,
}
