use crate::hardware::Motor;

/// A drive command the actuator layer refused. Always fatal for the match.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("actuator fault on {motor} motor: {reason}")]
pub struct ActuatorFault {
    pub motor: Motor,
    pub reason: String,
}

impl ActuatorFault {
    pub fn new(motor: Motor, reason: impl Into<String>) -> Self {
        Self {
            motor,
            reason: reason.into(),
        }
    }
}

/// A reading outside the physically plausible range. Sensor fusion degrades
/// these to safe defaults; they never leave the fusion layer as errors.
#[derive(Clone, Copy, Debug, PartialEq, thiserror::Error)]
pub enum SensorFault {
    #[error("proximity reading out of range: {0}")]
    InvalidDistance(f64),
    #[error("heading reading is not finite")]
    NonFiniteHeading,
    #[error("angular rate reading is not finite")]
    NonFiniteRate,
    #[error("unrecognized floor color code: {0}")]
    UnrecognizedColor(u8),
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ControlError {
    #[error(transparent)]
    Actuator(#[from] ActuatorFault),
    #[error("invalid controller config: {0}")]
    InvalidConfig(String),
}
