//! Hardware boundary.
//!
//! The controller never talks to motors or sensors directly; everything goes
//! through [`Hardware`]. Headings are cumulative degrees, counter-clockwise
//! positive, so a robot spinning left sees its heading grow without wrapping.
//! Drive speeds are signed motor speeds in degrees per second.

use crate::error::{ActuatorFault, SensorFault};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Motor {
    Left,
    Right,
}

impl Motor {
    pub const BOTH: [Motor; 2] = [Motor::Left, Motor::Right];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

impl fmt::Display for Motor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopAction {
    Coast,
    Brake,
    Hold,
}

/// Closed set of floor colors painted on the ring, from the table outside the
/// ring (`Background`) to the white boundary line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FloorColor {
    Background,
    InnerSafe,
    Caution,
    Warning,
    DeepWarning,
    Boundary,
}

impl FloorColor {
    pub const ALL: [FloorColor; 6] = [
        FloorColor::Background,
        FloorColor::InnerSafe,
        FloorColor::Caution,
        FloorColor::Warning,
        FloorColor::DeepWarning,
        FloorColor::Boundary,
    ];

    /// Maps a conventional color-sensor code (0 none, 1 black, 2 blue,
    /// 4 yellow, 5 red, 6 white) onto the ring palette.
    pub fn from_code(code: u8) -> Result<Self, SensorFault> {
        match code {
            0 => Ok(Self::Background),
            1 => Ok(Self::InnerSafe),
            2 => Ok(Self::Caution),
            4 => Ok(Self::Warning),
            5 => Ok(Self::DeepWarning),
            6 => Ok(Self::Boundary),
            other => Err(SensorFault::UnrecognizedColor(other)),
        }
    }
}

/// The complete set of calls the controller makes into the robot.
pub trait Hardware {
    fn set_speed(&mut self, motor: Motor, speed: f64) -> Result<(), ActuatorFault>;
    fn start(&mut self, motor: Motor) -> Result<(), ActuatorFault>;
    fn stop(&mut self, motor: Motor) -> Result<(), ActuatorFault>;
    /// Measured (not commanded) motor speed.
    fn speed(&mut self, motor: Motor) -> Result<f64, ActuatorFault>;
    fn set_stop_action(&mut self, motor: Motor, action: StopAction) -> Result<(), ActuatorFault>;

    fn distance_cm(&mut self) -> f64;
    fn heading_deg(&mut self) -> f64;
    fn rate_dps(&mut self) -> f64;
    fn reset_heading(&mut self);
    fn floor_color(&mut self) -> Result<FloorColor, SensorFault>;

    /// Blocks until the external go-signal.
    fn wait_for_start(&mut self);
    fn sleep_ms(&mut self, ms: u64);
    fn now_ms(&self) -> u64;

    /// External stop signal (referee, remote kill switch).
    fn stop_requested(&self) -> bool {
        false
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DriveCommand {
    pub left: f64,
    pub right: f64,
}

impl DriveCommand {
    pub fn new(left: f64, right: f64) -> Self {
        Self { left, right }
    }

    pub fn straight(speed: f64) -> Self {
        Self::new(speed, speed)
    }

    /// In-place rotation; positive `speed` spins counter-clockwise (left).
    pub fn spin(speed: f64) -> Self {
        Self::new(-speed, speed)
    }

    pub fn clamped(self, max_speed: f64) -> Self {
        Self {
            left: self.left.clamp(-max_speed, max_speed),
            right: self.right.clamp(-max_speed, max_speed),
        }
    }
}

pub fn apply_drive<H: Hardware + ?Sized>(hw: &mut H, cmd: DriveCommand) -> Result<(), ActuatorFault> {
    hw.set_speed(Motor::Left, cmd.left)?;
    hw.set_speed(Motor::Right, cmd.right)?;
    hw.start(Motor::Left)?;
    hw.start(Motor::Right)?;
    Ok(())
}

pub fn stop_all<H: Hardware + ?Sized>(hw: &mut H) -> Result<(), ActuatorFault> {
    hw.stop(Motor::Left)?;
    hw.stop(Motor::Right)?;
    Ok(())
}

pub fn set_stop_action_all<H: Hardware + ?Sized>(
    hw: &mut H,
    action: StopAction,
) -> Result<(), ActuatorFault> {
    for motor in Motor::BOTH {
        hw.set_stop_action(motor, action)?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted hardware double for unit tests. Sensors return whatever the
    //! test put in the public fields; every actuator call is recorded.

    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    pub enum Call {
        SetSpeed(Motor, f64),
        Start(Motor),
        Stop(Motor),
        StopAction(Motor, StopAction),
        Sleep(u64),
    }

    #[derive(Debug)]
    pub struct ScriptedHardware {
        pub distance: f64,
        pub heading: f64,
        pub rate: f64,
        pub color: Result<FloorColor, SensorFault>,
        pub wheel_speed: f64,
        pub now: u64,
        /// Heading change per millisecond while both motors spin in opposite
        /// directions; zero simulates a frozen heading stream.
        pub spin_deg_per_ms: f64,
        pub fail_motor: Option<Motor>,
        pub calls: Vec<Call>,
        left_cmd: f64,
        right_cmd: f64,
        running: bool,
    }

    impl ScriptedHardware {
        pub fn new() -> Self {
            Self {
                distance: 255.0,
                heading: 0.0,
                rate: 0.0,
                color: Ok(FloorColor::InnerSafe),
                wheel_speed: 0.0,
                now: 0,
                spin_deg_per_ms: 0.5,
                fail_motor: None,
                calls: Vec::new(),
                left_cmd: 0.0,
                right_cmd: 0.0,
                running: false,
            }
        }

        pub fn last_command(&self) -> DriveCommand {
            DriveCommand::new(self.left_cmd, self.right_cmd)
        }

        pub fn is_running(&self) -> bool {
            self.running
        }

        pub fn slept_ms(&self) -> u64 {
            self.calls
                .iter()
                .map(|call| match call {
                    Call::Sleep(ms) => *ms,
                    _ => 0,
                })
                .sum()
        }

        fn check(&self, motor: Motor) -> Result<(), ActuatorFault> {
            if self.fail_motor == Some(motor) {
                return Err(ActuatorFault::new(motor, "scripted failure"));
            }
            Ok(())
        }
    }

    impl Hardware for ScriptedHardware {
        fn set_speed(&mut self, motor: Motor, speed: f64) -> Result<(), ActuatorFault> {
            self.check(motor)?;
            match motor {
                Motor::Left => self.left_cmd = speed,
                Motor::Right => self.right_cmd = speed,
            }
            self.calls.push(Call::SetSpeed(motor, speed));
            Ok(())
        }

        fn start(&mut self, motor: Motor) -> Result<(), ActuatorFault> {
            self.check(motor)?;
            self.running = true;
            self.calls.push(Call::Start(motor));
            Ok(())
        }

        fn stop(&mut self, motor: Motor) -> Result<(), ActuatorFault> {
            self.check(motor)?;
            self.running = false;
            self.calls.push(Call::Stop(motor));
            Ok(())
        }

        fn speed(&mut self, motor: Motor) -> Result<f64, ActuatorFault> {
            self.check(motor)?;
            Ok(self.wheel_speed)
        }

        fn set_stop_action(
            &mut self,
            motor: Motor,
            action: StopAction,
        ) -> Result<(), ActuatorFault> {
            self.check(motor)?;
            self.calls.push(Call::StopAction(motor, action));
            Ok(())
        }

        fn distance_cm(&mut self) -> f64 {
            self.distance
        }

        fn heading_deg(&mut self) -> f64 {
            self.heading
        }

        fn rate_dps(&mut self) -> f64 {
            self.rate
        }

        fn reset_heading(&mut self) {
            self.heading = 0.0;
        }

        fn floor_color(&mut self) -> Result<FloorColor, SensorFault> {
            self.color
        }

        fn wait_for_start(&mut self) {}

        fn sleep_ms(&mut self, ms: u64) {
            if self.running && self.left_cmd * self.right_cmd < 0.0 {
                let sign = if self.right_cmd > self.left_cmd { 1.0 } else { -1.0 };
                self.heading += sign * self.spin_deg_per_ms * ms as f64;
            }
            self.now += ms;
            self.calls.push(Call::Sleep(ms));
        }

        fn now_ms(&self) -> u64 {
            self.now
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_codes_map_onto_the_ring_palette() {
        assert_eq!(FloorColor::from_code(6), Ok(FloorColor::Boundary));
        assert_eq!(FloorColor::from_code(1), Ok(FloorColor::InnerSafe));
        assert_eq!(
            FloorColor::from_code(3),
            Err(SensorFault::UnrecognizedColor(3))
        );
        assert_eq!(
            FloorColor::from_code(7),
            Err(SensorFault::UnrecognizedColor(7))
        );
    }

    #[test]
    fn spin_turns_left_for_positive_speed() {
        let cmd = DriveCommand::spin(300.0);
        assert!(cmd.right > 0.0 && cmd.left < 0.0);
    }

    #[test]
    fn clamped_limits_both_sides() {
        let cmd = DriveCommand::new(1500.0, -1800.0).clamped(1000.0);
        assert_eq!(cmd, DriveCommand::new(1000.0, -1000.0));
    }
}
