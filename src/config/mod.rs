//! Configuration module
//!
//! Handles storage paths, polling cadence, template names and the fixed
//! screen coordinates used by the automation loops.

pub mod settings;

pub use settings::{
    BattleSettings, ConfigError, DisplaySettings, ScenarioSettings, Settings, SwipeGesture,
    TimingSettings,
};
