//! Error taxonomy for the ADCS core.

use std::path::PathBuf;

use hardware::imu::ImuError;
use hardware::motor::MotorError;
use thiserror::Error;

/// Sensor or actuator failure.
#[derive(Error, Debug)]
pub enum HardwareError {
    /// The IMU could not be brought up.
    #[error("Sensor initialization failed: {0}")]
    SensorInit(#[source] ImuError),

    /// Reads kept failing past the tolerated run of transient errors.
    #[error("Sensor failed {failures} consecutive reads: {source}")]
    SensorUnresponsive {
        /// Length of the failure run
        failures: u32,
        /// Most recent read error
        source: ImuError,
    },

    /// Motor driver rejected a command.
    #[error("Actuator error: {0}")]
    Actuator(#[from] MotorError),
}

/// Rejected configuration or command argument.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// NaN or infinite value.
    #[error("{name} must be finite, got {value}")]
    NonFinite {
        /// Parameter name
        name: &'static str,
        /// Offending value
        value: f64,
    },

    /// Value outside the accepted interval.
    #[error("{name} must be within [{min}, {max}], got {value}")]
    OutOfRange {
        /// Parameter name
        name: &'static str,
        /// Offending value
        value: f64,
        /// Inclusive lower bound
        min: f64,
        /// Inclusive upper bound
        max: f64,
    },

    /// Value must be strictly positive.
    #[error("{name} must be greater than zero, got {value}")]
    NotPositive {
        /// Parameter name
        name: &'static str,
        /// Offending value
        value: f64,
    },

    /// Config file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Config file is not valid JSON for [`crate::config::AdcsConfig`].
    #[error("Failed to parse config {path}: {source}")]
    Parse {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: serde_json::Error,
    },
}

impl ConfigError {
    /// Reject NaN and infinities.
    pub fn require_finite(name: &'static str, value: f64) -> Result<f64, ConfigError> {
        if value.is_finite() {
            Ok(value)
        } else {
            Err(ConfigError::NonFinite { name, value })
        }
    }

    /// Require a finite value in `[min, max]`.
    pub fn require_range(
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    ) -> Result<f64, ConfigError> {
        Self::require_finite(name, value)?;
        if value < min || value > max {
            return Err(ConfigError::OutOfRange {
                name,
                value,
                min,
                max,
            });
        }
        Ok(value)
    }

    /// Require a finite value `>= 0`.
    pub fn require_non_negative(name: &'static str, value: f64) -> Result<f64, ConfigError> {
        Self::require_range(name, value, 0.0, f64::MAX)
    }

    /// Require a finite value `> 0`.
    pub fn require_positive(name: &'static str, value: f64) -> Result<f64, ConfigError> {
        Self::require_finite(name, value)?;
        if value <= 0.0 {
            return Err(ConfigError::NotPositive { name, value });
        }
        Ok(value)
    }
}

/// Top-level error for orchestrator operations.
#[derive(Error, Debug)]
pub enum AdcsError {
    /// Hardware failure.
    #[error(transparent)]
    Hardware(#[from] HardwareError),

    /// Invalid argument or configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A gyro calibration is already running.
    #[error("Gyro calibration already in progress")]
    CalibrationInProgress,

    /// The controller loops have been shut down.
    #[error("ADCS controller is shut down")]
    ShutDown,

    /// A loop thread could not be started.
    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        /// Thread name
        name: &'static str,
        /// Underlying error
        source: std::io::Error,
    },
}

/// Result type for orchestrator operations.
pub type AdcsResult<T> = Result<T, AdcsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_checks() {
        assert_eq!(ConfigError::require_finite("kp", 1.5).unwrap(), 1.5);
        assert!(matches!(
            ConfigError::require_finite("kp", f64::NAN),
            Err(ConfigError::NonFinite { name: "kp", .. })
        ));
        assert!(matches!(
            ConfigError::require_non_negative("deadband", -0.1),
            Err(ConfigError::OutOfRange { .. })
        ));
        assert!(ConfigError::require_non_negative("deadband", 0.0).is_ok());
        assert!(matches!(
            ConfigError::require_positive("duration", 0.0),
            Err(ConfigError::NotPositive { .. })
        ));
        assert!(ConfigError::require_range("alpha", 1.0, 0.0, 1.0).is_ok());
        assert!(ConfigError::require_range("alpha", f64::INFINITY, 0.0, 1.0).is_err());
    }

    #[test]
    fn test_messages() {
        let err = ConfigError::OutOfRange {
            name: "alpha",
            value: 1.5,
            min: 0.0,
            max: 1.0,
        };
        assert_eq!(err.to_string(), "alpha must be within [0, 1], got 1.5");

        let err: AdcsError = HardwareError::SensorInit(ImuError::NotInitialized).into();
        assert_eq!(
            err.to_string(),
            "Sensor initialization failed: IMU not initialized"
        );
    }
}
