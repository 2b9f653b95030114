//! Game state module
//!
//! Shared flags read by every loop, and the tracker that decides whether a
//! battle is in progress.

pub mod battle;
pub mod state;

pub use battle::{BattleStateTracker, BattleTransition};
pub use state::{BattleSnapshot, SharedState};
