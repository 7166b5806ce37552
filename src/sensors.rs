//! Sensor fusion: raw readings in, semantic signals out.
//!
//! Every reading is re-derived each tick. Implausible readings degrade to the
//! safe default (no enemy, no danger) instead of failing the tick.

use crate::config::ControllerConfig;
use crate::error::{ActuatorFault, SensorFault};
use crate::hardware::{FloorColor, Hardware, Motor};
use crate::state::Stance;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Anything past this is treated as a broken echo rather than a distance.
pub const MAX_PLAUSIBLE_DISTANCE_CM: f64 = 255.0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    /// `f64::INFINITY` when the reading was rejected.
    pub distance_cm: f64,
    pub floor: FloorColor,
    pub heading_deg: f64,
    pub rate_dps: f64,
    pub left_speed: f64,
    pub right_speed: f64,
}

impl SensorSnapshot {
    /// Mean absolute measured wheel speed.
    pub fn wheel_speed(&self) -> f64 {
        (self.left_speed.abs() + self.right_speed.abs()) / 2.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Signals {
    pub enemy_visible: bool,
    pub danger_level: u8,
    pub heading_deg: f64,
    pub rate_dps: f64,
    pub wheel_speed: f64,
}

impl Signals {
    pub fn derive(snapshot: &SensorSnapshot, cfg: &ControllerConfig) -> Self {
        Self {
            enemy_visible: is_enemy_ahead(snapshot.distance_cm, cfg.enemy_distance_threshold_cm),
            danger_level: derive_danger_level(snapshot.floor),
            heading_deg: snapshot.heading_deg,
            rate_dps: snapshot.rate_dps,
            wheel_speed: snapshot.wheel_speed(),
        }
    }

    pub fn in_danger_zone(&self, cfg: &ControllerConfig) -> bool {
        is_in_danger_zone(self.danger_level, cfg.danger_threshold)
    }
}

pub fn derive_danger_level(floor: FloorColor) -> u8 {
    match floor {
        FloorColor::Boundary => 6,
        FloorColor::DeepWarning => 5,
        FloorColor::Warning => 4,
        FloorColor::Caution => 2,
        FloorColor::InnerSafe => 1,
        FloorColor::Background => 0,
    }
}

pub fn is_enemy_ahead(distance_cm: f64, threshold_cm: f64) -> bool {
    distance_cm < threshold_cm
}

pub fn is_in_danger_zone(danger_level: u8, danger_threshold: u8) -> bool {
    danger_level >= danger_threshold
}

/// Reads every sensor once per tick and applies the fault policy.
#[derive(Clone, Debug, Default)]
pub struct SensorFusion {
    last_heading: f64,
    faults: u64,
}

impl SensorFusion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fault_count(&self) -> u64 {
        self.faults
    }

    pub fn sample<H: Hardware + ?Sized>(
        &mut self,
        hw: &mut H,
    ) -> Result<SensorSnapshot, ActuatorFault> {
        let distance_cm = self.read_distance(hw);

        let floor = match hw.floor_color() {
            Ok(color) => color,
            Err(fault) => {
                self.record(fault);
                FloorColor::Background
            }
        };

        let raw_heading = hw.heading_deg();
        let heading_deg = if raw_heading.is_finite() {
            self.last_heading = raw_heading;
            raw_heading
        } else {
            self.record(SensorFault::NonFiniteHeading);
            self.last_heading
        };

        let raw_rate = hw.rate_dps();
        let rate_dps = if raw_rate.is_finite() {
            raw_rate
        } else {
            self.record(SensorFault::NonFiniteRate);
            0.0
        };

        let left_speed = hw.speed(Motor::Left)?;
        let right_speed = hw.speed(Motor::Right)?;

        Ok(SensorSnapshot {
            distance_cm,
            floor,
            heading_deg,
            rate_dps,
            left_speed,
            right_speed,
        })
    }

    /// Single proximity read outside the per-tick sample. An implausible
    /// echo counts as a fault and reads as no target.
    pub fn read_distance<H: Hardware + ?Sized>(&mut self, hw: &mut H) -> f64 {
        match validate_distance(hw.distance_cm()) {
            Ok(distance) => distance,
            Err(fault) => {
                self.record(fault);
                f64::INFINITY
            }
        }
    }

    fn record(&mut self, fault: SensorFault) {
        self.faults += 1;
        warn!(%fault, "sensor fault, degrading to safe default");
    }
}

pub fn validate_distance(distance: f64) -> Result<f64, SensorFault> {
    if distance.is_finite() && (0.0..=MAX_PLAUSIBLE_DISTANCE_CM).contains(&distance) {
        Ok(distance)
    } else {
        Err(SensorFault::InvalidDistance(distance))
    }
}

/// Detects a push that has stopped making progress: engaged, yet the wheels
/// barely turn for `stall_loop_threshold` consecutive ticks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StallDetector {
    start_tick: Option<u64>,
}

impl StallDetector {
    pub fn is_stalled(
        &mut self,
        stance: Stance,
        wheel_speed: f64,
        speed_threshold: f64,
        current_tick: u64,
        stall_loop_threshold: u32,
    ) -> bool {
        if stance != Stance::Engaged || wheel_speed.abs() >= speed_threshold {
            self.start_tick = None;
            return false;
        }
        let start = *self.start_tick.get_or_insert(current_tick);
        current_tick.saturating_sub(start) + 1 >= u64::from(stall_loop_threshold)
    }

    pub fn reset(&mut self) {
        self.start_tick = None;
    }

    pub fn start_tick(&self) -> Option<u64> {
        self.start_tick
    }
}
