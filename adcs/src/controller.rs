//! Bang-bang PD yaw controller.
//!
//! Each tick computes `output = kp * error + kd * d(error)/dt` on the wrapped
//! yaw error and maps it to one of three actuator commands:
//!
//! | condition                 | command            |
//! |---------------------------|--------------------|
//! | `|error| < deadband`      | `STOP`             |
//! | `output > 0`              | `CLOCKWISE`        |
//! | otherwise                 | `COUNTERCLOCKWISE` |
//!
//! A drive direction is held for at least `min_pulse_time` before it may be
//! reversed. Stopping is always immediate.
//!
//! # Safety Bound
//!
//! An error larger than the safety bound latches a [`Fault`] and forces `STOP`
//! until the fault is cleared. A commanded target change (`start`,
//! `set_target`) arms a one-shot slew exemption so that a legitimate large move
//! does not fault; the exemption ends the first time the error falls inside
//! the bound.

use std::fmt;
use std::time::Instant;

use hardware::motor::ActuatorCommand;
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::{debug, error, info};

use crate::config::ControllerConfig;
use crate::error::ConfigError;

/// Wrap an angle in degrees into `[-180, 180)`.
pub fn normalize_angle(deg: f64) -> f64 {
    (deg + 180.0).rem_euclid(360.0) - 180.0
}

/// Tunable controller parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControllerGains {
    /// Proportional gain
    pub kp: f64,
    /// Derivative gain
    pub kd: f64,
    /// Error band around the target that commands `STOP`, degrees
    pub deadband: f64,
    /// Minimum hold before a direction reversal, seconds
    pub min_pulse_time: f64,
}

impl ControllerGains {
    /// Check every field is finite and non-negative.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ConfigError::require_non_negative("kp", self.kp)?;
        ConfigError::require_non_negative("kd", self.kd)?;
        ConfigError::require_non_negative("deadband", self.deadband)?;
        ConfigError::require_non_negative("min_pulse_time", self.min_pulse_time)?;
        Ok(())
    }
}

impl Default for ControllerGains {
    fn default() -> Self {
        Self {
            kp: 2.0,
            kd: 0.5,
            deadband: 1.0,
            min_pulse_time: 0.2,
        }
    }
}

/// Controller mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ControllerState {
    /// Not driving; every tick yields `STOP`
    #[default]
    Idle,
    /// Closing the loop on the target
    Tracking,
}

/// Latched condition that suppresses actuation until cleared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fault {
    /// Yaw error exceeded the safety bound outside a commanded slew.
    Safety {
        /// Wrapped error at the time of the fault, degrees
        error_deg: f64,
        /// Bound that was exceeded, degrees
        bound_deg: f64,
    },
    /// Sensor or actuator failure.
    Hardware {
        /// Human-readable cause
        message: String,
    },
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::Safety {
                error_deg,
                bound_deg,
            } => write!(
                f,
                "safety bound exceeded (error {error_deg:.1}° > {bound_deg:.1}°)"
            ),
            Fault::Hardware { message } => write!(f, "hardware: {message}"),
        }
    }
}

/// Bang-bang PD controller with deadband, reversal hold and safety bound.
#[derive(Debug, Clone)]
pub struct BangBangPdController {
    gains: ControllerGains,
    safety_bound: f64,
    min_dt: f64,
    state: ControllerState,
    target: f64,
    slewing: bool,
    fault: Option<Fault>,
    command: ActuatorCommand,
    last_drive: Option<(ActuatorCommand, Instant)>,
    previous_error: Option<f64>,
    last_tick: Option<Instant>,
    last_error: f64,
    last_output: f64,
}

impl BangBangPdController {
    /// Create an idle controller.
    ///
    /// `safety_bound` is the largest tolerated |error| in degrees; `min_dt`
    /// floors the derivative time step in seconds.
    pub fn new(gains: ControllerGains, safety_bound: f64, min_dt: f64) -> Self {
        Self {
            gains,
            safety_bound,
            min_dt,
            state: ControllerState::Idle,
            target: 0.0,
            slewing: false,
            fault: None,
            command: ActuatorCommand::Stop,
            last_drive: None,
            previous_error: None,
            last_tick: None,
            last_error: 0.0,
            last_output: 0.0,
        }
    }

    /// Create an idle controller from configuration.
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self::new(config.gains(), config.safety_bound_deg, config.min_dt_s)
    }

    /// Begin tracking `target` degrees. Clears any latched fault.
    pub fn start(&mut self, target: f64) -> Result<(), ConfigError> {
        ConfigError::require_finite("target_yaw", target)?;
        info!("Controller tracking target {target:.2}°");
        self.state = ControllerState::Tracking;
        self.target = target;
        self.slewing = true;
        self.fault = None;
        self.reset_history();
        Ok(())
    }

    /// Return to idle and command `STOP`.
    pub fn stop(&mut self) {
        if self.state == ControllerState::Tracking {
            info!("Controller stopped");
        }
        self.state = ControllerState::Idle;
        self.command = ActuatorCommand::Stop;
        self.last_drive = None;
        self.reset_history();
    }

    /// Change the target without changing mode.
    pub fn set_target(&mut self, target: f64) -> Result<(), ConfigError> {
        ConfigError::require_finite("target_yaw", target)?;
        self.target = target;
        self.slewing = true;
        self.reset_history();
        Ok(())
    }

    /// Replace all gains. Rejected gains leave the current set untouched.
    pub fn set_gains(&mut self, gains: ControllerGains) -> Result<(), ConfigError> {
        gains.validate()?;
        self.gains = gains;
        Ok(())
    }

    /// Replace `kp` and `kd`.
    pub fn set_pd(&mut self, kp: f64, kd: f64) -> Result<(), ConfigError> {
        self.set_gains(ControllerGains { kp, kd, ..self.gains })
    }

    /// Replace the deadband, degrees.
    pub fn set_deadband(&mut self, deadband: f64) -> Result<(), ConfigError> {
        self.set_gains(ControllerGains {
            deadband,
            ..self.gains
        })
    }

    /// Replace the minimum reversal hold, seconds.
    pub fn set_min_pulse_time(&mut self, min_pulse_time: f64) -> Result<(), ConfigError> {
        self.set_gains(ControllerGains {
            min_pulse_time,
            ..self.gains
        })
    }

    /// Latch a fault and force `STOP`. The reversal hold keeps running so a
    /// quick clear cannot flip the wheel.
    pub fn latch_fault(&mut self, fault: Fault) {
        if self.fault.is_none() {
            error!("Controller fault latched: {fault}");
            self.fault = Some(fault);
        }
        self.command = ActuatorCommand::Stop;
    }

    /// Clear a latched fault. Tracking resumes on the next tick.
    pub fn clear_fault(&mut self) {
        if let Some(fault) = self.fault.take() {
            info!("Controller fault cleared ({fault})");
        }
        self.reset_history();
    }

    /// Forget the derivative history, e.g. after the angle reference jumps.
    pub fn reset_history(&mut self) {
        self.previous_error = None;
        self.last_tick = None;
    }

    /// Run one tick at the current wall-clock time.
    pub fn control(&mut self, current: f64, target: f64) -> ActuatorCommand {
        self.control_at(current, target, Instant::now())
    }

    /// Run one tick at `now`.
    pub fn control_at(&mut self, current: f64, target: f64, now: Instant) -> ActuatorCommand {
        if self.fault.is_some() || self.state == ControllerState::Idle {
            return self.set_command(ActuatorCommand::Stop, now);
        }
        if !current.is_finite() || !target.is_finite() {
            self.latch_fault(Fault::Hardware {
                message: format!("non-finite angle (current={current}, target={target})"),
            });
            return ActuatorCommand::Stop;
        }

        let error = normalize_angle(target - current);
        let exempt = self.slewing && target == self.target;
        self.target = target;
        self.last_error = error;

        if error.abs() <= self.safety_bound {
            self.slewing = false;
        } else if !exempt {
            self.latch_fault(Fault::Safety {
                error_deg: error,
                bound_deg: self.safety_bound,
            });
            return ActuatorCommand::Stop;
        }

        let dt = self
            .last_tick
            .map(|t| now.saturating_duration_since(t).as_secs_f64())
            .unwrap_or(0.0)
            .max(self.min_dt);
        let derivative = self
            .previous_error
            .map(|prev| (error - prev) / dt)
            .unwrap_or(0.0);
        let output = self.gains.kp * error + self.gains.kd * derivative;
        self.previous_error = Some(error);
        self.last_tick = Some(now);
        self.last_output = output;

        let desired = if error.abs() < self.gains.deadband {
            ActuatorCommand::Stop
        } else if output > 0.0 {
            ActuatorCommand::Clockwise
        } else {
            ActuatorCommand::Counterclockwise
        };

        self.set_command(desired, now)
    }

    /// Apply the reversal hold: a drive opposite to the last one is refused
    /// until `min_pulse_time` has passed since that drive began, even if a
    /// `STOP` came in between.
    fn set_command(&mut self, desired: ActuatorCommand, now: Instant) -> ActuatorCommand {
        if desired.is_driving() {
            if let Some((direction, since)) = self.last_drive {
                let held = now.saturating_duration_since(since).as_secs_f64();
                if direction != desired && held < self.gains.min_pulse_time {
                    return self.command;
                }
            }
        }

        if desired != self.command {
            debug!(
                "Controller command {} -> {} (error={:.2}°, output={:.2})",
                self.command, desired, self.last_error, self.last_output
            );
            self.command = desired;
            if desired.is_driving() {
                self.last_drive = Some((desired, now));
            }
        }
        self.command
    }

    /// Current mode.
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Target yaw in degrees.
    pub fn target(&self) -> f64 {
        self.target
    }

    /// Current gains.
    pub fn gains(&self) -> ControllerGains {
        self.gains
    }

    /// Latched fault, if any.
    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }

    /// Last issued command.
    pub fn command(&self) -> ActuatorCommand {
        self.command
    }

    /// Wrapped error from the last tick, degrees.
    pub fn last_error(&self) -> f64 {
        self.last_error
    }

    /// PD output from the last tick.
    pub fn last_output(&self) -> f64 {
        self.last_output
    }

    /// Largest tolerated |error|, degrees.
    pub fn safety_bound(&self) -> f64 {
        self.safety_bound
    }

    /// True while a commanded slew is exempt from the safety bound.
    pub fn is_slewing(&self) -> bool {
        self.slewing
    }
}
