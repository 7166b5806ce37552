//! ENGAGED stance body: strategy choice, confidence bookkeeping, stall and
//! loss-of-control detection, speed tiers and heading-hold steering.

use crate::config::ControllerConfig;
use crate::error::ActuatorFault;
use crate::hardware::{apply_drive, DriveCommand, Hardware};
use crate::maneuver::normalize_angle;
use crate::sensors::Signals;
use crate::state::{AttackStrategy, Confidence, RobotState, StrategyBook, STRAIGHT_PUSH_CONFIDENCE};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub fn select_best_strategy(confidence: Confidence, book: &StrategyBook) -> AttackStrategy {
    if confidence.value() > STRAIGHT_PUSH_CONFIDENCE {
        return AttackStrategy::StraightPush;
    }
    // Ties go to the left hook.
    if book.score(AttackStrategy::HookRight) > book.score(AttackStrategy::HookLeft) {
        AttackStrategy::HookRight
    } else {
        AttackStrategy::HookLeft
    }
}

/// Slower near the boundary, harder in the middle of the ring.
pub fn dynamic_speed(base_speed: f64, danger_level: u8) -> f64 {
    if danger_level >= 5 {
        base_speed * 0.8
    } else if danger_level >= 3 {
        base_speed * 0.9
    } else {
        base_speed * 1.1
    }
}

/// Proportional-only heading hold. No integral term: a sustained side load
/// leaves a steady offset proportional to the load.
pub fn heading_hold(
    attack_heading: f64,
    current_heading: f64,
    speed: f64,
    base_gain: f64,
    confidence: Confidence,
) -> DriveCommand {
    let error = normalize_angle(attack_heading - current_heading);
    let gain = base_gain + f64::from(confidence.value()) / 10.0;
    let correction = error * gain;
    DriveCommand::new(speed - correction, speed + correction)
}

/// Curves around the slower side so the opponent is rotated off-axis.
pub fn hook_command(strategy: AttackStrategy, speed: f64, differential: f64) -> DriveCommand {
    let slow = speed - differential;
    match strategy {
        AttackStrategy::HookRight => DriveCommand::new(speed, slow),
        _ => DriveCommand::new(slow, speed),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetreatReason {
    Overpowered,
    LosingControl,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackOutcome {
    Pushing(DriveCommand),
    TargetLost,
    Retreat(RetreatReason),
}

#[derive(Clone, Debug)]
pub struct AttackController {
    book: StrategyBook,
    push_streak: u64,
}

impl AttackController {
    pub fn new(book: StrategyBook) -> Self {
        Self {
            book,
            push_streak: 0,
        }
    }

    pub fn book(&self) -> &StrategyBook {
        &self.book
    }

    /// One-time setup on entering ENGAGED.
    pub fn enter(&mut self, state: &mut RobotState, heading: f64) {
        let strategy = select_best_strategy(state.confidence, &self.book);
        state.current_attack = Some(strategy);
        state.attack_heading = heading;
        state.stall.reset();
        self.push_streak = 0;
        debug!(
            tick = state.tick,
            %strategy,
            confidence = state.confidence.value(),
            heading,
            "engaging"
        );
    }

    pub fn tick<H: Hardware + ?Sized>(
        &mut self,
        hw: &mut H,
        state: &mut RobotState,
        signals: &Signals,
        stalled: bool,
        cfg: &ControllerConfig,
    ) -> Result<AttackOutcome, ActuatorFault> {
        if !signals.enemy_visible {
            return Ok(AttackOutcome::TargetLost);
        }

        let strategy = state.current_attack.unwrap_or(AttackStrategy::StraightPush);
        let losing_control = signals.rate_dps.abs() > cfg.gyro_rate_failure_threshold;
        let retreat = if stalled {
            Some(RetreatReason::Overpowered)
        } else if strategy == AttackStrategy::StraightPush && losing_control {
            Some(RetreatReason::LosingControl)
        } else {
            None
        };
        if let Some(reason) = retreat {
            state.confidence.penalize();
            self.push_streak = 0;
            info!(
                tick = state.tick,
                ?reason,
                %strategy,
                confidence = state.confidence.value(),
                "push failed, backing off"
            );
            return Ok(AttackOutcome::Retreat(reason));
        }

        if strategy == AttackStrategy::StraightPush {
            self.track_push(state, cfg);
        }

        let speed = dynamic_speed(cfg.base_speed, signals.danger_level);
        let cmd = match strategy {
            AttackStrategy::StraightPush => heading_hold(
                state.attack_heading,
                signals.heading_deg,
                speed,
                cfg.base_gyro_p_gain,
                state.confidence,
            ),
            hook => hook_command(hook, speed, cfg.hook_differential),
        }
        .clamped(cfg.max_speed);

        apply_drive(hw, cmd)?;
        Ok(AttackOutcome::Pushing(cmd))
    }

    /// A straight push whose wheels keep turning for the success duration
    /// earns confidence.
    fn track_push(&mut self, state: &mut RobotState, cfg: &ControllerConfig) {
        if state.stall.start_tick().is_some() {
            self.push_streak = 0;
            return;
        }
        self.push_streak += 1;
        if self.push_streak >= cfg.push_success_ticks() {
            self.push_streak = 0;
            state.confidence.reward();
            info!(
                tick = state.tick,
                confidence = state.confidence.value(),
                "sustained push, confidence up"
            );
        }
    }
}
