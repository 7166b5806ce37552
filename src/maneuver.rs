//! Turn-to-heading as an explicit sub-state machine with a deadline, plus a
//! bounded blocking driver for the places that are allowed to block.

use crate::error::ActuatorFault;
use crate::hardware::{apply_drive, stop_all, DriveCommand, Hardware};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Wraps an angle difference into `(-180, 180]`.
pub fn normalize_angle(deg: f64) -> f64 {
    let wrapped = deg.rem_euclid(360.0);
    if wrapped > 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnDirection {
    /// Counter-clockwise, heading increases.
    Left,
    /// Clockwise, heading decreases.
    Right,
}

impl TurnDirection {
    pub fn sign(self) -> f64 {
        match self {
            Self::Left => 1.0,
            Self::Right => -1.0,
        }
    }

    pub fn flipped(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }

    /// Shortest rotation from `heading` toward `target`.
    pub fn toward(heading: f64, target: f64) -> Self {
        if normalize_angle(target - heading) >= 0.0 {
            Self::Left
        } else {
            Self::Right
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    InProgress,
    Reached,
    TimedOut,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HeadingTurn {
    target: f64,
    direction: TurnDirection,
    deadline_ms: u64,
}

impl HeadingTurn {
    /// Rotate `degrees` (magnitude) in `direction` starting from the
    /// cumulative heading `start`.
    pub fn by(
        start: f64,
        degrees: f64,
        direction: TurnDirection,
        now_ms: u64,
        timeout_ms: u64,
    ) -> Self {
        Self {
            target: start + direction.sign() * degrees.abs(),
            direction,
            deadline_ms: now_ms.saturating_add(timeout_ms),
        }
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn direction(&self) -> TurnDirection {
        self.direction
    }

    pub fn poll(&self, heading: f64, now_ms: u64) -> TurnStatus {
        let reached = match self.direction {
            TurnDirection::Left => heading >= self.target,
            TurnDirection::Right => heading <= self.target,
        };
        if reached {
            TurnStatus::Reached
        } else if now_ms >= self.deadline_ms {
            TurnStatus::TimedOut
        } else {
            TurnStatus::InProgress
        }
    }

    pub fn command(&self, speed: f64) -> DriveCommand {
        DriveCommand::spin(self.direction.sign() * speed.abs())
    }
}

/// Spins in place until the turn completes or its deadline passes, polling
/// the heading every `poll_ms`. Motors are stopped on return.
pub fn turn_blocking<H: Hardware + ?Sized>(
    hw: &mut H,
    degrees: f64,
    direction: TurnDirection,
    speed: f64,
    timeout_ms: u64,
    poll_ms: u64,
) -> Result<TurnStatus, ActuatorFault> {
    let start = hw.heading_deg();
    let turn = HeadingTurn::by(start, degrees, direction, hw.now_ms(), timeout_ms);
    apply_drive(hw, turn.command(speed))?;

    let status = loop {
        hw.sleep_ms(poll_ms.max(1));
        let status = turn.poll(hw.heading_deg(), hw.now_ms());
        if status != TurnStatus::InProgress {
            break status;
        }
    };
    stop_all(hw)?;

    match status {
        TurnStatus::TimedOut => warn!(
            target_deg = turn.target(),
            timeout_ms, "turn-to-heading timed out"
        ),
        _ => debug!(target_deg = turn.target(), ?direction, "turn-to-heading reached"),
    }
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::testing::ScriptedHardware;

    #[test]
    fn normalizes_into_half_open_range() {
        assert_eq!(normalize_angle(350.0 - 10.0), -20.0);
        assert_eq!(normalize_angle(10.0 - 350.0), 20.0);
        assert_eq!(normalize_angle(180.0), 180.0);
        assert_eq!(normalize_angle(-180.0), 180.0);
        assert_eq!(normalize_angle(720.0 + 5.0), 5.0);
    }

    #[test]
    fn direction_toward_takes_the_short_way() {
        assert_eq!(TurnDirection::toward(350.0, 10.0), TurnDirection::Left);
        assert_eq!(TurnDirection::toward(10.0, 350.0), TurnDirection::Right);
        assert_eq!(TurnDirection::Left.flipped(), TurnDirection::Right);
    }

    #[test]
    fn poll_reports_reach_and_timeout() {
        let turn = HeadingTurn::by(100.0, 90.0, TurnDirection::Right, 0, 500);
        assert_eq!(turn.target(), 10.0);
        assert_eq!(turn.poll(50.0, 100), TurnStatus::InProgress);
        assert_eq!(turn.poll(9.0, 100), TurnStatus::Reached);
        assert_eq!(turn.poll(50.0, 500), TurnStatus::TimedOut);
    }

    #[test]
    fn blocking_turn_converges_on_a_live_heading_stream() {
        let mut hw = ScriptedHardware::new();
        let status = turn_blocking(&mut hw, 90.0, TurnDirection::Left, 400.0, 1_000, 20).unwrap();
        assert_eq!(status, TurnStatus::Reached);
        assert!(hw.heading >= 90.0);
        assert!(!hw.is_running());
    }

    #[test]
    fn blocking_turn_is_bounded_when_the_heading_freezes() {
        let mut hw = ScriptedHardware::new();
        hw.spin_deg_per_ms = 0.0;
        let status = turn_blocking(&mut hw, 90.0, TurnDirection::Left, 400.0, 300, 20).unwrap();
        assert_eq!(status, TurnStatus::TimedOut);
        assert!(hw.now >= 300 && hw.now < 340);
        assert!(!hw.is_running());
    }
}
