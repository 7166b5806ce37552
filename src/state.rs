use crate::config::ControllerConfig;
use crate::sensors::StallDetector;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MAX_DANGER_LEVEL: u8 = 6;
pub const CONFIDENCE_MIN: i32 = 0;
pub const CONFIDENCE_MAX: i32 = 20;
pub const CONFIDENCE_INITIAL: i32 = 10;
pub const CONFIDENCE_STEP: i32 = 5;
/// Above this the straight push is trusted.
pub const STRAIGHT_PUSH_CONFIDENCE: i32 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stance {
    Init,
    Searching,
    Engaged,
}

impl Stance {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Searching => "searching",
            Self::Engaged => "engaged",
        }
    }
}

impl fmt::Display for Stance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackStrategy {
    StraightPush,
    HookLeft,
    HookRight,
}

impl AttackStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StraightPush => "straight_push",
            Self::HookLeft => "hook_left",
            Self::HookRight => "hook_right",
        }
    }
}

impl fmt::Display for AttackStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Effectiveness scores of the three strategies, fixed at match start.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrategyBook {
    straight_push: f64,
    hook_left: f64,
    hook_right: f64,
}

impl StrategyBook {
    pub fn new(straight_push: f64, hook_left: f64, hook_right: f64) -> Self {
        Self {
            straight_push,
            hook_left,
            hook_right,
        }
    }

    pub fn from_config(cfg: &ControllerConfig) -> Self {
        Self::new(1.0, cfg.hook_left_score, cfg.hook_right_score)
    }

    pub fn score(&self, strategy: AttackStrategy) -> f64 {
        match strategy {
            AttackStrategy::StraightPush => self.straight_push,
            AttackStrategy::HookLeft => self.hook_left,
            AttackStrategy::HookRight => self.hook_right,
        }
    }
}

/// Persistent push-confidence score, always within
/// `CONFIDENCE_MIN..=CONFIDENCE_MAX`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Confidence(i32);

impl Confidence {
    pub fn new(value: i32) -> Self {
        Self(value.clamp(CONFIDENCE_MIN, CONFIDENCE_MAX))
    }

    pub fn value(self) -> i32 {
        self.0
    }

    pub fn adjust(&mut self, delta: i32) {
        self.0 = (self.0 + delta).clamp(CONFIDENCE_MIN, CONFIDENCE_MAX);
    }

    pub fn reward(&mut self) {
        self.adjust(CONFIDENCE_STEP);
    }

    pub fn penalize(&mut self) {
        self.adjust(-CONFIDENCE_STEP);
    }
}

impl Default for Confidence {
    fn default() -> Self {
        Self(CONFIDENCE_INITIAL)
    }
}

/// Process-wide controller state, owned by the control loop and passed by
/// reference into every component each tick.
#[derive(Clone, Debug)]
pub struct RobotState {
    pub stance: Stance,
    /// Stance whose body ran last; drives one-time entry setup.
    pub previous_stance: Option<Stance>,
    pub confidence: Confidence,
    pub current_attack: Option<AttackStrategy>,
    pub attack_heading: f64,
    pub stall: StallDetector,
    pub danger_level: u8,
    /// Best estimate of the heading toward the ring center.
    pub center_vector: Option<f64>,
    pub tick: u64,
}

impl RobotState {
    pub fn new() -> Self {
        Self {
            stance: Stance::Init,
            previous_stance: None,
            confidence: Confidence::default(),
            current_attack: None,
            attack_heading: 0.0,
            stall: StallDetector::default(),
            danger_level: 0,
            center_vector: None,
            tick: 0,
        }
    }
}

impl Default for RobotState {
    fn default() -> Self {
        Self::new()
    }
}
