//! Two-direction motor actuator abstraction.
//!
//! Models an H-bridge style driver with two direction inputs and a sleep /
//! standby line. The direction inputs are only ever written as a pair taken
//! from [`ActuatorCommand::direction_lines`], so both can never be asserted at
//! once.
//!
//! Calls return as soon as the lines are written. How long a direction is held
//! is up to the caller.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use thiserror::Error;

/// Bang-bang drive command for a single motor axis.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum ActuatorCommand {
    /// Drive clockwise (IN1 high)
    #[strum(to_string = "CLOCKWISE", serialize = "cw")]
    Clockwise,
    /// Drive counter-clockwise (IN2 high)
    #[strum(to_string = "COUNTERCLOCKWISE", serialize = "ccw")]
    Counterclockwise,
    /// Both direction lines low
    #[default]
    Stop,
}

impl ActuatorCommand {
    /// Line levels `(in1, in2)` for this command.
    pub fn direction_lines(self) -> (bool, bool) {
        match self {
            ActuatorCommand::Clockwise => (true, false),
            ActuatorCommand::Counterclockwise => (false, true),
            ActuatorCommand::Stop => (false, false),
        }
    }

    /// True for either drive direction.
    pub fn is_driving(self) -> bool {
        self != ActuatorCommand::Stop
    }
}

/// Errors raised by motor drivers.
#[derive(Error, Debug)]
pub enum MotorError {
    /// GPIO line request or write failed.
    #[error("GPIO error: {0}")]
    Gpio(#[from] std::io::Error),

    /// Driver was used after being released.
    #[error("Motor driver released")]
    Released,
}

/// Result type for motor operations.
pub type MotorResult<T> = Result<T, MotorError>;

/// A two-direction motor driver with an enable line.
///
/// All operations are idempotent: repeating the current state does nothing.
pub trait MotorActuator {
    /// Human-readable driver name for logs.
    fn name(&self) -> &str;

    /// Assert IN1, release IN2.
    fn rotate_clockwise(&mut self) -> MotorResult<()>;

    /// Assert IN2, release IN1.
    fn rotate_counterclockwise(&mut self) -> MotorResult<()>;

    /// Release both direction lines.
    fn stop(&mut self) -> MotorResult<()>;

    /// Take the driver out of sleep.
    fn enable(&mut self) -> MotorResult<()>;

    /// Put the driver to sleep.
    fn disable(&mut self) -> MotorResult<()>;

    /// Last command written to the direction lines.
    fn current_command(&self) -> ActuatorCommand;

    /// Apply a command by dispatching to the matching primitive.
    fn apply(&mut self, command: ActuatorCommand) -> MotorResult<()> {
        match command {
            ActuatorCommand::Clockwise => self.rotate_clockwise(),
            ActuatorCommand::Counterclockwise => self.rotate_counterclockwise(),
            ActuatorCommand::Stop => self.stop(),
        }
    }
}

impl<M: MotorActuator + ?Sized> MotorActuator for Box<M> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn rotate_clockwise(&mut self) -> MotorResult<()> {
        (**self).rotate_clockwise()
    }

    fn rotate_counterclockwise(&mut self) -> MotorResult<()> {
        (**self).rotate_counterclockwise()
    }

    fn stop(&mut self) -> MotorResult<()> {
        (**self).stop()
    }

    fn enable(&mut self) -> MotorResult<()> {
        (**self).enable()
    }

    fn disable(&mut self) -> MotorResult<()> {
        (**self).disable()
    }

    fn current_command(&self) -> ActuatorCommand {
        (**self).current_command()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_direction_lines_never_both_high() {
        for command in ActuatorCommand::iter() {
            let (in1, in2) = command.direction_lines();
            assert!(!(in1 && in2), "{command} asserts both lines");
        }
    }

    #[test]
    fn test_parse_short_and_long_names() {
        assert_eq!(
            ActuatorCommand::from_str("cw").unwrap(),
            ActuatorCommand::Clockwise
        );
        assert_eq!(
            ActuatorCommand::from_str("CCW").unwrap(),
            ActuatorCommand::Counterclockwise
        );
        assert_eq!(
            ActuatorCommand::from_str("stop").unwrap(),
            ActuatorCommand::Stop
        );
        assert!(ActuatorCommand::from_str("sideways").is_err());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&ActuatorCommand::Counterclockwise).unwrap();
        assert_eq!(json, "\"COUNTERCLOCKWISE\"");
        assert_eq!(ActuatorCommand::Clockwise.to_string(), "CLOCKWISE");
    }
}
