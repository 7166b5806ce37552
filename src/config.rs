use crate::error::ControlError;
use crate::state::MAX_DANGER_LEVEL;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const PRESET_NAMES: [&str; 4] = ["balanced", "bulldozer", "hooker", "cautious"];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub id: String,
    pub description: String,

    // Cadence
    pub tick_ms: u64,
    /// `None` runs until the external stop signal.
    pub match_duration_ms: Option<u64>,

    // Speeds (motor deg/s)
    pub max_speed: f64,
    pub base_speed: f64,
    pub search_speed: f64,
    pub escape_speed: f64,

    // Perception
    pub enemy_distance_threshold_cm: f64,
    pub danger_threshold: u8,

    // Attack
    pub stall_speed_threshold: f64,
    pub stall_loop_threshold: u32,
    pub gyro_rate_failure_threshold: f64,
    pub base_gyro_p_gain: f64,
    pub hook_differential: f64,
    pub hook_left_score: f64,
    pub hook_right_score: f64,
    pub push_success_ms: u64,

    // Escape
    pub escape_settle_ms: u64,
    pub escape_reverse_ms: u64,
    pub escape_turn_severe_deg: f64,
    pub escape_turn_mild_deg: f64,

    // Search
    pub turn_timeout_ms: u64,
    /// Passive scan stops this many degrees short of a full revolution.
    pub scan_tolerance_deg: f64,
    pub passive_scan_timeout_ms: u64,
    pub search_pulse_deg: f64,
    pub search_pause_ms: u64,
    pub protective_turn_deg: f64,

    // Opening
    pub init_settle_ms: u64,
    pub init_orient_turn_deg: f64,
    pub opening_dash_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            id: "balanced".to_string(),
            description: "Heading-hold pusher with confidence-driven hook fallback.".to_string(),
            tick_ms: 20,
            match_duration_ms: Some(180_000),
            max_speed: 1000.0,
            base_speed: 800.0,
            search_speed: 450.0,
            escape_speed: 800.0,
            enemy_distance_threshold_cm: 60.0,
            danger_threshold: 4,
            stall_speed_threshold: 60.0,
            stall_loop_threshold: 20,
            gyro_rate_failure_threshold: 200.0,
            base_gyro_p_gain: 1.5,
            hook_differential: 350.0,
            hook_left_score: 1.0,
            hook_right_score: 1.0,
            push_success_ms: 1_500,
            escape_settle_ms: 100,
            escape_reverse_ms: 500,
            escape_turn_severe_deg: 150.0,
            escape_turn_mild_deg: 100.0,
            turn_timeout_ms: 1_500,
            scan_tolerance_deg: 20.0,
            passive_scan_timeout_ms: 4_000,
            search_pulse_deg: 45.0,
            search_pause_ms: 80,
            protective_turn_deg: 120.0,
            init_settle_ms: 100,
            init_orient_turn_deg: 90.0,
            opening_dash_ms: 0,
        }
    }
}

impl ControllerConfig {
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "balanced" => Some(Self::default()),
            "bulldozer" => Some(Self {
                id: "bulldozer".to_string(),
                description: "Fast straight pusher that commits early and holds heading hard."
                    .to_string(),
                base_speed: 900.0,
                enemy_distance_threshold_cm: 70.0,
                base_gyro_p_gain: 2.0,
                push_success_ms: 1_200,
                search_pulse_deg: 60.0,
                opening_dash_ms: 600,
                ..Self::default()
            }),
            "hooker" => Some(Self {
                id: "hooker".to_string(),
                description: "Flank attacker preferring right hooks once a push stalls."
                    .to_string(),
                base_speed: 850.0,
                hook_differential: 450.0,
                hook_right_score: 1.2,
                stall_loop_threshold: 15,
                ..Self::default()
            }),
            "cautious" => Some(Self {
                id: "cautious".to_string(),
                description: "Ring-keeping profile with early, wide escapes.".to_string(),
                base_speed: 700.0,
                danger_threshold: 2,
                escape_reverse_ms: 700,
                escape_turn_severe_deg: 170.0,
                escape_turn_mild_deg: 120.0,
                protective_turn_deg: 150.0,
                ..Self::default()
            }),
            _ => None,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path)
            .with_context(|| format!("failed reading config {}", path.display()))?;
        let cfg: Self = serde_json::from_slice(&data)
            .with_context(|| format!("failed parsing config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ControlError> {
        let invalid = |msg: String| Err(ControlError::InvalidConfig(msg));

        if self.tick_ms == 0 {
            return invalid("tick_ms must be > 0".to_string());
        }
        if self.match_duration_ms == Some(0) {
            return invalid("match_duration_ms must be > 0 when set".to_string());
        }
        if !(self.max_speed > 0.0) {
            return invalid(format!("max_speed must be > 0, got {}", self.max_speed));
        }
        for (name, value) in [
            ("base_speed", self.base_speed),
            ("search_speed", self.search_speed),
            ("escape_speed", self.escape_speed),
        ] {
            if !(value > 0.0 && value <= self.max_speed) {
                return invalid(format!(
                    "{name} must be in (0, {}], got {value}",
                    self.max_speed
                ));
            }
        }
        if !(self.enemy_distance_threshold_cm > 0.0) {
            return invalid("enemy_distance_threshold_cm must be > 0".to_string());
        }
        if self.danger_threshold == 0 || self.danger_threshold > MAX_DANGER_LEVEL {
            return invalid(format!(
                "danger_threshold must be in 1..={MAX_DANGER_LEVEL}, got {}",
                self.danger_threshold
            ));
        }
        if self.stall_loop_threshold == 0 {
            return invalid("stall_loop_threshold must be >= 1".to_string());
        }
        if !(self.scan_tolerance_deg >= 0.0 && self.scan_tolerance_deg < 90.0) {
            return invalid(format!(
                "scan_tolerance_deg must be in [0, 90), got {}",
                self.scan_tolerance_deg
            ));
        }
        if self.escape_turn_severe_deg <= self.escape_turn_mild_deg {
            return invalid(format!(
                "escape_turn_severe_deg ({}) must exceed escape_turn_mild_deg ({})",
                self.escape_turn_severe_deg, self.escape_turn_mild_deg
            ));
        }
        if self.turn_timeout_ms == 0 {
            return invalid("turn_timeout_ms must be > 0".to_string());
        }
        if self.search_pulse_deg <= 0.0 {
            return invalid("search_pulse_deg must be > 0".to_string());
        }
        Ok(())
    }

    /// Whole ticks needed to cover `ms`, rounded up.
    pub fn ticks_for(&self, ms: u64) -> u64 {
        ms.div_ceil(self.tick_ms.max(1))
    }

    pub fn push_success_ticks(&self) -> u64 {
        self.ticks_for(self.push_success_ms).max(1)
    }

    pub fn scan_target_deg(&self) -> f64 {
        360.0 - self.scan_tolerance_deg
    }
}

pub fn preset_names() -> &'static [&'static str] {
    &PRESET_NAMES
}
