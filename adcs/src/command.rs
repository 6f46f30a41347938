//! Typed remote commands and their dispatch onto [`AdcsController`].
//!
//! Commands travel as JSON objects with a `command` tag and an optional
//! `value` payload:
//!
//! ```json
//! {"command": "set_target_yaw", "value": 45.0}
//! {"command": "set_gains", "value": {"kp": 2.0, "kd": 0.5}}
//! {"command": "zero_yaw"}
//! ```
//!
//! The bench REPL uses a short text form instead, parsed by
//! [`AdcsCommand::from_str`](std::str::FromStr). Whatever the form, a bad
//! command becomes an error [`CommandResponse`]; dispatch never panics and
//! never touches hardware except through the orchestrator.

use std::str::FromStr;

use hardware::imu::AngularRate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::AdcsError;
use crate::estimator::ControlFeed;
use crate::orchestrator::AdcsController;

/// Every command the ADCS accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "value", rename_all = "snake_case")]
pub enum AdcsCommand {
    /// Begin tracking the given yaw, degrees
    Start(f64),
    /// Stop tracking and de-energize the motor
    Stop,
    /// Change the target yaw, degrees
    SetTargetYaw(f64),
    /// Change proportional and derivative gains
    SetGains {
        /// Proportional gain
        kp: f64,
        /// Derivative gain
        kd: f64,
    },
    /// Change the deadband, degrees
    SetDeadband(f64),
    /// Change the minimum reversal hold, seconds
    SetMinPulseTime(f64),
    /// Measure gyro bias for the given number of seconds
    CalibrateGyro(f64),
    /// Install a manually measured gyro bias, °/s
    SetGyroBias(AngularRate),
    /// Take the current orientation as yaw 0
    ZeroYaw,
    /// Select the controller's yaw feed
    SetControlFeed(ControlFeed),
    /// Clear a latched fault
    ClearFault,
    /// Return the latest telemetry snapshot
    GetLatestData,
}

impl AdcsCommand {
    /// Wire name of this command.
    pub fn name(&self) -> &'static str {
        match self {
            AdcsCommand::Start(_) => "start",
            AdcsCommand::Stop => "stop",
            AdcsCommand::SetTargetYaw(_) => "set_target_yaw",
            AdcsCommand::SetGains { .. } => "set_gains",
            AdcsCommand::SetDeadband(_) => "set_deadband",
            AdcsCommand::SetMinPulseTime(_) => "set_min_pulse_time",
            AdcsCommand::CalibrateGyro(_) => "calibrate_gyro",
            AdcsCommand::SetGyroBias(_) => "set_gyro_bias",
            AdcsCommand::ZeroYaw => "zero_yaw",
            AdcsCommand::SetControlFeed(_) => "set_control_feed",
            AdcsCommand::ClearFault => "clear_fault",
            AdcsCommand::GetLatestData => "get_latest_data",
        }
    }

    /// True for commands that block for a noticeable time.
    pub fn is_blocking(&self) -> bool {
        matches!(self, AdcsCommand::CalibrateGyro(_))
    }

    /// True for commands that drive the motor directly (GPIO writes on real
    /// hardware) rather than only updating shared state.
    pub fn touches_motor(&self) -> bool {
        matches!(
            self,
            AdcsCommand::Start(_) | AdcsCommand::Stop | AdcsCommand::CalibrateGyro(_)
        )
    }
}

/// Why a text command could not be parsed.
#[derive(Error, Debug, PartialEq)]
pub enum CommandParseError {
    /// Blank line.
    #[error("Empty command")]
    Empty,

    /// Unrecognized command word.
    #[error("Unknown command: {0}")]
    Unknown(String),

    /// Wrong number of arguments.
    #[error("{command} expects {expected}")]
    Usage {
        /// Command word
        command: &'static str,
        /// Expected argument list
        expected: &'static str,
    },

    /// Argument was not a number.
    #[error("Invalid number: {0}")]
    InvalidNumber(String),

    /// Argument was not a known control feed.
    #[error("Unknown control feed: {0} (expected pure or filtered)")]
    InvalidFeed(String),
}

fn numbers<const N: usize>(
    args: &[&str],
    command: &'static str,
    expected: &'static str,
) -> Result<[f64; N], CommandParseError> {
    if args.len() != N {
        return Err(CommandParseError::Usage { command, expected });
    }
    let mut values = [0.0; N];
    for (value, arg) in values.iter_mut().zip(args) {
        *value = arg
            .parse()
            .map_err(|_| CommandParseError::InvalidNumber(arg.to_string()))?;
    }
    Ok(values)
}

impl FromStr for AdcsCommand {
    type Err = CommandParseError;

    /// Parse the REPL form: `start 30`, `set 45`, `gains 2 0.5`, `deadband 1`,
    /// `pulse 0.2`, `calibrate 8`, `bias 0.1 0 -0.2`, `feed pure`, `zero`,
    /// `clear`, `stop`, `status`. Full wire names are accepted too.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let word = words.next().ok_or(CommandParseError::Empty)?.to_lowercase();
        let args: Vec<&str> = words.collect();

        let command = match word.as_str() {
            "start" => {
                let [target] = numbers::<1>(&args, "start", "<target_deg>")?;
                AdcsCommand::Start(target)
            }
            "stop" => AdcsCommand::Stop,
            "set" | "target" | "set_target_yaw" => {
                let [target] = numbers::<1>(&args, "set", "<target_deg>")?;
                AdcsCommand::SetTargetYaw(target)
            }
            "gains" | "set_gains" => {
                let [kp, kd] = numbers::<2>(&args, "gains", "<kp> <kd>")?;
                AdcsCommand::SetGains { kp, kd }
            }
            "deadband" | "set_deadband" => {
                let [deadband] = numbers::<1>(&args, "deadband", "<degrees>")?;
                AdcsCommand::SetDeadband(deadband)
            }
            "pulse" | "set_min_pulse_time" => {
                let [seconds] = numbers::<1>(&args, "pulse", "<seconds>")?;
                AdcsCommand::SetMinPulseTime(seconds)
            }
            "calibrate" | "calibrate_gyro" => {
                let [seconds] = numbers::<1>(&args, "calibrate", "<seconds>")?;
                AdcsCommand::CalibrateGyro(seconds)
            }
            "bias" | "set_gyro_bias" => {
                let [x, y, z] = numbers::<3>(&args, "bias", "<x> <y> <z>")?;
                AdcsCommand::SetGyroBias(AngularRate::new(x, y, z))
            }
            "zero" | "zero_yaw" => AdcsCommand::ZeroYaw,
            "feed" | "set_control_feed" => {
                let [feed] = args[..] else {
                    return Err(CommandParseError::Usage {
                        command: "feed",
                        expected: "pure|filtered",
                    });
                };
                let feed = ControlFeed::from_str(feed)
                    .map_err(|_| CommandParseError::InvalidFeed(feed.to_string()))?;
                AdcsCommand::SetControlFeed(feed)
            }
            "clear" | "clear_fault" => AdcsCommand::ClearFault,
            "status" | "get_latest_data" => AdcsCommand::GetLatestData,
            other => return Err(CommandParseError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

/// Outcome of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// Command applied
    Ok,
    /// Command rejected; prior state unchanged
    Error,
}

/// Structured reply to every command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Outcome
    pub status: CommandStatus,
    /// Human-readable detail
    pub message: String,
    /// Optional payload (telemetry or calibration result)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl CommandResponse {
    /// Successful reply.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Ok,
            message: message.into(),
            data: None,
        }
    }

    /// Rejected reply.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Error,
            message: message.into(),
            data: None,
        }
    }

    /// Attach a serializable payload.
    pub fn with_data<T: Serialize>(mut self, data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => self.data = Some(value),
            Err(e) => warn!("Failed to serialize command response payload: {e}"),
        }
        self
    }

    /// Whether the command was applied.
    pub fn is_ok(&self) -> bool {
        self.status == CommandStatus::Ok
    }
}

impl AdcsController {
    /// Apply one command and describe the outcome.
    pub fn execute(&self, command: AdcsCommand) -> CommandResponse {
        let name = command.name();
        let result: Result<CommandResponse, AdcsError> = match command {
            AdcsCommand::Start(target) => self
                .start(target)
                .map(|()| CommandResponse::ok(format!("Control started, target {target}°"))),
            AdcsCommand::Stop => self
                .stop()
                .map(|()| CommandResponse::ok("Control stopped")),
            AdcsCommand::SetTargetYaw(target) => self
                .set_target_yaw(target)
                .map(|()| CommandResponse::ok(format!("Target yaw set to {target}°"))),
            AdcsCommand::SetGains { kp, kd } => self
                .set_gains(kp, kd)
                .map(|()| CommandResponse::ok(format!("Gains set to kp={kp}, kd={kd}"))),
            AdcsCommand::SetDeadband(deadband) => self
                .set_deadband(deadband)
                .map(|()| CommandResponse::ok(format!("Deadband set to {deadband}°"))),
            AdcsCommand::SetMinPulseTime(seconds) => self
                .set_min_pulse_time(seconds)
                .map(|()| CommandResponse::ok(format!("Minimum pulse time set to {seconds}s"))),
            AdcsCommand::CalibrateGyro(seconds) => {
                self.calibrate_gyro(seconds).map(|calibration| {
                    let message = if calibration.sample_count > 0 {
                        format!("Gyro calibrated from {} samples", calibration.sample_count)
                    } else {
                        "Gyro calibration failed, bias cleared".to_string()
                    };
                    CommandResponse::ok(message).with_data(&calibration)
                })
            }
            AdcsCommand::SetGyroBias(bias) => self
                .set_gyro_bias(bias)
                .map(|()| CommandResponse::ok("Gyro bias set")),
            AdcsCommand::ZeroYaw => {
                self.zero_yaw();
                Ok(CommandResponse::ok("Yaw zeroed"))
            }
            AdcsCommand::SetControlFeed(feed) => {
                self.set_control_feed(feed);
                Ok(CommandResponse::ok(format!("Control feed set to {feed}")))
            }
            AdcsCommand::ClearFault => {
                self.clear_fault();
                Ok(CommandResponse::ok("Fault cleared"))
            }
            AdcsCommand::GetLatestData => {
                let telemetry = self.latest_data();
                Ok(CommandResponse::ok(telemetry.status.clone()).with_data(&telemetry))
            }
        };

        match result {
            Ok(response) => {
                if name == "get_latest_data" {
                    debug!("Command {name} accepted");
                } else {
                    info!("Command {name} accepted: {}", response.message);
                }
                response
            }
            Err(e) => {
                warn!("Command {name} rejected: {e}");
                CommandResponse::error(e.to_string())
            }
        }
    }

    /// Parse and apply a JSON command.
    pub fn execute_json(&self, json: &str) -> CommandResponse {
        match serde_json::from_str::<AdcsCommand>(json) {
            Ok(command) => self.execute(command),
            Err(e) => {
                warn!("Rejected malformed command {json:?}: {e}");
                CommandResponse::error(format!("Invalid command: {e}"))
            }
        }
    }

    /// Parse and apply a REPL text command.
    pub fn execute_text(&self, line: &str) -> CommandResponse {
        match AdcsCommand::from_str(line) {
            Ok(command) => self.execute(command),
            Err(e) => {
                warn!("Rejected command {line:?}: {e}");
                CommandResponse::error(e.to_string())
            }
        }
    }
}
