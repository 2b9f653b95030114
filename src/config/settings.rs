//! Bot settings
//!
//! Defines every configurable option of the automation. Settings are read
//! from JSON with camelCase keys; any omitted key falls back to its default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::android::Point;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Main settings structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Directory holding `<name>.png` template images
    pub template_dir: PathBuf,
    /// Directory screenshots are written to on request
    pub screenshot_dir: PathBuf,
    /// Correlation score a match must exceed
    pub match_threshold: f32,
    /// Loop cadence and action delays
    pub timings: TimingSettings,
    /// Battle detection and surrender
    pub battle: BattleSettings,
    /// Menu, movement, skill and attack loops
    pub scenario: ScenarioSettings,
    /// Operator window
    pub display: DisplaySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            template_dir: PathBuf::from("templates"),
            screenshot_dir: PathBuf::from("screenshots"),
            match_threshold: 0.8,
            timings: TimingSettings::default(),
            battle: BattleSettings::default(),
            scenario: ScenarioSettings::default(),
            display: DisplaySettings::default(),
        }
    }
}

impl Settings {
    /// Parse settings from a JSON document
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let settings: Settings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Create settings with shorter poll intervals for responsive devices
    pub fn fast_polling() -> Self {
        Self {
            timings: TimingSettings {
                battle_poll_ms: 2000,
                menu_poll_ms: 500,
                skill_poll_ms: 500,
                enemy_poll_ms: 250,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Check values that would make the loops misbehave
    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.match_threshold;
        if threshold.is_nan() || threshold <= 0.0 || threshold > 1.0 {
            return Err(ConfigError::Invalid {
                field: "matchThreshold",
                reason: format!("{} is outside (0, 1]", self.match_threshold),
            });
        }

        let polls = [
            ("timings.battlePollMs", self.timings.battle_poll_ms),
            ("timings.menuPollMs", self.timings.menu_poll_ms),
            ("timings.skillPollMs", self.timings.skill_poll_ms),
            ("timings.enemyPollMs", self.timings.enemy_poll_ms),
        ];
        for (field, value) in polls {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "poll interval must be non-zero".to_string(),
                });
            }
        }

        if self.battle.alive_template.is_empty() || self.battle.dead_template.is_empty() {
            return Err(ConfigError::Invalid {
                field: "battle",
                reason: "in-battle template names must not be empty".to_string(),
            });
        }

        Ok(())
    }
}

/// Loop cadence and action delays, all in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimingSettings {
    /// How long a tap holds the pointer down
    pub tap_hold_ms: u64,
    /// Battle detection poll
    pub battle_poll_ms: u64,
    /// Menu navigation poll
    pub menu_poll_ms: u64,
    /// Joystick swipe repeat
    pub movement_poll_ms: u64,
    /// Skill upgrade poll
    pub skill_poll_ms: u64,
    /// Enemy detection poll
    pub enemy_poll_ms: u64,
    /// Longest wait of the relay loop for a new frame
    pub relay_wait_ms: u64,
    /// Pause between the settings tap and the surrender tap
    pub surrender_step_delay_ms: u64,
    /// Pause between taps of an attack burst
    pub attack_tap_gap_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            tap_hold_ms: 100,
            battle_poll_ms: 5000,
            menu_poll_ms: 1000,
            movement_poll_ms: 100,
            skill_poll_ms: 1000,
            enemy_poll_ms: 500,
            relay_wait_ms: 250,
            surrender_step_delay_ms: 1000,
            attack_tap_gap_ms: 50,
        }
    }
}

impl TimingSettings {
    pub fn tap_hold(&self) -> Duration {
        Duration::from_millis(self.tap_hold_ms)
    }

    pub fn battle_poll(&self) -> Duration {
        Duration::from_millis(self.battle_poll_ms)
    }

    pub fn menu_poll(&self) -> Duration {
        Duration::from_millis(self.menu_poll_ms)
    }

    pub fn movement_poll(&self) -> Duration {
        Duration::from_millis(self.movement_poll_ms)
    }

    pub fn skill_poll(&self) -> Duration {
        Duration::from_millis(self.skill_poll_ms)
    }

    pub fn enemy_poll(&self) -> Duration {
        Duration::from_millis(self.enemy_poll_ms)
    }

    pub fn relay_wait(&self) -> Duration {
        Duration::from_millis(self.relay_wait_ms)
    }

    pub fn surrender_step_delay(&self) -> Duration {
        Duration::from_millis(self.surrender_step_delay_ms)
    }

    pub fn attack_tap_gap(&self) -> Duration {
        Duration::from_millis(self.attack_tap_gap_ms)
    }
}

/// Battle detection and surrender settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BattleSettings {
    /// Seconds in battle before surrendering
    pub time_limit_secs: u64,
    /// Template visible while the hero is alive in battle
    pub alive_template: String,
    /// Template visible while the hero is dead in battle
    pub dead_template: String,
    /// Settings button opened before surrendering
    pub settings_template: String,
    /// Surrender button inside the settings panel
    pub surrender_template: String,
}

impl Default for BattleSettings {
    fn default() -> Self {
        Self {
            time_limit_secs: 120,
            alive_template: "tp".to_string(),
            dead_template: "tp-dead".to_string(),
            settings_template: "settings".to_string(),
            surrender_template: "surrender".to_string(),
        }
    }
}

impl BattleSettings {
    pub fn time_limit(&self) -> Duration {
        Duration::from_secs(self.time_limit_secs)
    }
}

/// A fixed drag gesture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwipeGesture {
    pub start: Point,
    pub end: Point,
}

/// Scenario loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScenarioSettings {
    /// Menu screens in traversal order
    pub menu_templates: Vec<String>,
    /// Skill upgrade prompts
    pub skill_templates: Vec<String>,
    /// Enemy health bars
    pub enemy_templates: Vec<String>,
    /// Joystick drag that keeps the hero moving
    pub movement_swipe: SwipeGesture,
    /// Equip, skill and attack buttons tapped when an enemy shows up
    pub attack_points: Vec<Point>,
    /// How many times the attack points are cycled per burst
    pub attack_iterations: u32,
}

impl Default for ScenarioSettings {
    fn default() -> Self {
        let menu_templates = [
            "battle",
            "solo",
            "ai_mode",
            "mojiajiguandao",
            "hero_list",
            "mage",
            "hero_zhugeliang",
            "confirm",
            "continue",
            "return_to_hall",
            "giveup",
            "confirm_2",
            "return_to_hall_fromtaozhuang",
        ];

        Self {
            menu_templates: menu_templates.iter().map(|s| s.to_string()).collect(),
            skill_templates: vec![
                "skill_upgrade_1".to_string(),
                "skill_upgrade_2".to_string(),
                "skill_upgrade_3".to_string(),
            ],
            enemy_templates: vec![
                "enemy_healthbar".to_string(),
                "enemy_healthbar_2".to_string(),
            ],
            movement_swipe: SwipeGesture {
                start: Point::new(400, 1300),
                end: Point::new(700, 600),
            },
            attack_points: vec![
                // Equipment
                Point::new(2050, 560),
                // Skills 1-3
                Point::new(1900, 1250),
                Point::new(2050, 1060),
                Point::new(2250, 930),
                // Basic attack
                Point::new(2150, 1250),
            ],
            attack_iterations: 3,
        }
    }
}

/// Operator window settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DisplaySettings {
    /// Longest side of the mirrored image on screen
    pub max_width: u32,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self { max_width: 800 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.match_threshold, 0.8);
        assert_eq!(settings.battle.time_limit(), Duration::from_secs(120));
        assert_eq!(settings.timings.tap_hold(), Duration::from_millis(100));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings =
            Settings::from_json(r#"{"templateDir": "/data/tpl", "screenshotDir": "/data/shots"}"#)
                .unwrap();
        assert_eq!(settings.template_dir, PathBuf::from("/data/tpl"));
        assert_eq!(settings.screenshot_dir, PathBuf::from("/data/shots"));
        assert_eq!(settings.timings.battle_poll_ms, 5000);
        assert_eq!(settings.scenario.menu_templates.len(), 13);
    }

    #[test]
    fn test_nested_overrides() {
        let json = r#"{
            "timings": {"movementPollMs": 50},
            "battle": {"timeLimitSecs": 90},
            "scenario": {"attackIterations": 5, "attackPoints": [{"x": 1, "y": 2}]}
        }"#;
        let settings = Settings::from_json(json).unwrap();
        assert_eq!(settings.timings.movement_poll_ms, 50);
        assert_eq!(settings.timings.tap_hold_ms, 100);
        assert_eq!(settings.battle.time_limit_secs, 90);
        assert_eq!(settings.scenario.attack_iterations, 5);
        assert_eq!(settings.scenario.attack_points, vec![Point::new(1, 2)]);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let err = Settings::from_json(r#"{"matchThreshold": 1.5}"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "matchThreshold",
                ..
            }
        ));
    }

    #[test]
    fn test_zero_poll_rejected() {
        let err = Settings::from_json(r#"{"timings": {"battlePollMs": 0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_malformed_json() {
        let err = Settings::from_json("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_fast_polling_preset() {
        let settings = Settings::fast_polling();
        assert!(settings.timings.battle_poll_ms < TimingSettings::default().battle_poll_ms);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file() {
        let err = Settings::load("/nonexistent/autobattle.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
