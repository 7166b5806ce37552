//! Boundary escape reflex: stop, back off, turn away, resume searching.
//!
//! Blocks the loop for a bounded time (settle + reverse + one turn with a
//! deadline). Only ever runs from the top-priority danger rule, so no other
//! stance body competes for the motors meanwhile.

use crate::config::ControllerConfig;
use crate::error::ActuatorFault;
use crate::hardware::{apply_drive, set_stop_action_all, stop_all, DriveCommand, Hardware, StopAction};
use crate::maneuver::{turn_blocking, TurnDirection, TurnStatus};
use crate::stance;
use crate::state::{RobotState, Stance, MAX_DANGER_LEVEL};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Sitting on the boundary line gets the wider turn.
pub fn escape_turn_degrees(danger_level: u8, cfg: &ControllerConfig) -> f64 {
    if danger_level >= MAX_DANGER_LEVEL {
        cfg.escape_turn_severe_deg
    } else {
        cfg.escape_turn_mild_deg
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EscapeReport {
    pub danger_level: u8,
    pub turn_deg: f64,
    pub direction: TurnDirection,
    pub turn_status: TurnStatus,
}

pub fn execute<H: Hardware + ?Sized>(
    hw: &mut H,
    state: &mut RobotState,
    cfg: &ControllerConfig,
    fallback_direction: TurnDirection,
) -> Result<EscapeReport, ActuatorFault> {
    let danger_level = state.danger_level;

    set_stop_action_all(hw, StopAction::Hold)?;
    stop_all(hw)?;
    hw.sleep_ms(cfg.escape_settle_ms);

    apply_drive(hw, DriveCommand::straight(-cfg.escape_speed))?;
    hw.sleep_ms(cfg.escape_reverse_ms);
    stop_all(hw)?;

    let heading = hw.heading_deg();
    let direction = match state.center_vector {
        Some(center) if heading.is_finite() => TurnDirection::toward(heading, center),
        _ => fallback_direction,
    };
    let turn_deg = escape_turn_degrees(danger_level, cfg);
    let turn_status = turn_blocking(
        hw,
        turn_deg,
        direction,
        cfg.escape_speed,
        cfg.turn_timeout_ms,
        cfg.tick_ms,
    )?;

    stance::request(hw, state, Stance::Searching)?;
    info!(
        tick = state.tick,
        danger_level,
        turn_deg,
        ?direction,
        ?turn_status,
        "escaped boundary"
    );

    Ok(EscapeReport {
        danger_level,
        turn_deg,
        direction,
        turn_status,
    })
}
