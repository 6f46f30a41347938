//! Runtime configuration for the ADCS core.
//!
//! Loaded from JSON. Every section and field has a default, so a config file
//! only needs to name the values it changes:
//!
//! ```json
//! { "controller": { "kp": 3.0, "deadband_deg": 0.5 }, "control_feed": "pure" }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::controller::ControllerGains;
use crate::error::ConfigError;
use crate::estimator::{ControlFeed, GravityAxes};

/// Loop periods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Sensing loop period in milliseconds
    pub sensing_period_ms: u64,
    /// Control loop period in milliseconds
    pub control_period_ms: u64,
}

impl LoopConfig {
    /// Sensing loop period.
    pub fn sensing_period(&self) -> Duration {
        Duration::from_millis(self.sensing_period_ms)
    }

    /// Control loop period.
    pub fn control_period(&self) -> Duration {
        Duration::from_millis(self.control_period_ms)
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            sensing_period_ms: 50,
            control_period_ms: 100,
        }
    }
}

/// Controller gains and limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Proportional gain
    pub kp: f64,
    /// Derivative gain
    pub kd: f64,
    /// Stop band around the target, degrees
    pub deadband_deg: f64,
    /// Minimum hold before a direction reversal, seconds
    pub min_pulse_time_s: f64,
    /// Largest tolerated |error| outside a commanded slew, degrees
    pub safety_bound_deg: f64,
    /// Floor on the derivative time step, seconds
    pub min_dt_s: f64,
}

impl ControllerConfig {
    /// Gains portion of this config.
    pub fn gains(&self) -> ControllerGains {
        ControllerGains {
            kp: self.kp,
            kd: self.kd,
            deadband: self.deadband_deg,
            min_pulse_time: self.min_pulse_time_s,
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        let gains = ControllerGains::default();
        Self {
            kp: gains.kp,
            kd: gains.kd,
            deadband_deg: gains.deadband,
            min_pulse_time_s: gains.min_pulse_time,
            safety_bound_deg: 90.0,
            min_dt_s: 0.01,
        }
    }
}

/// Complementary filter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Gyro weight in `[0, 1]`
    pub alpha: f64,
    /// Accelerometer axes for the yaw reference
    pub gravity_axes: GravityAxes,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            alpha: 0.98,
            gravity_axes: GravityAxes::Yz,
        }
    }
}

/// Sensor fault handling and calibration timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Consecutive read failures before escalating to a hardware fault
    pub max_consecutive_failures: u32,
    /// Sensing ticks between reinitialization attempts while faulted
    pub reconnect_interval_ticks: u32,
    /// Delay between calibration samples in milliseconds
    pub calibration_sample_interval_ms: u64,
    /// Longest accepted gyro calibration in seconds
    pub max_calibration_s: f64,
}

impl SensorConfig {
    /// Delay between calibration samples.
    pub fn calibration_sample_interval(&self) -> Duration {
        Duration::from_millis(self.calibration_sample_interval_ms)
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            reconnect_interval_ticks: 20,
            calibration_sample_interval_ms: 4,
            max_calibration_s: 60.0,
        }
    }
}

/// Complete ADCS configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdcsConfig {
    /// Loop periods
    pub loops: LoopConfig,
    /// Controller gains and limits
    pub controller: ControllerConfig,
    /// Estimator settings
    pub estimator: EstimatorConfig,
    /// Sensor settings
    pub sensor: SensorConfig,
    /// Yaw feed used by the controller
    pub control_feed: ControlFeed,
}

impl AdcsConfig {
    /// Read and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: AdcsConfig =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Check all values are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ConfigError::require_positive("sensing_period_ms", self.loops.sensing_period_ms as f64)?;
        ConfigError::require_positive("control_period_ms", self.loops.control_period_ms as f64)?;

        self.controller.gains().validate()?;
        ConfigError::require_positive("safety_bound_deg", self.controller.safety_bound_deg)?;
        ConfigError::require_positive("min_dt_s", self.controller.min_dt_s)?;

        ConfigError::require_range("alpha", self.estimator.alpha, 0.0, 1.0)?;

        ConfigError::require_positive(
            "max_consecutive_failures",
            self.sensor.max_consecutive_failures as f64,
        )?;
        ConfigError::require_positive(
            "reconnect_interval_ticks",
            self.sensor.reconnect_interval_ticks as f64,
        )?;
        ConfigError::require_positive("max_calibration_s", self.sensor.max_calibration_s)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AdcsConfig::default();
        assert_eq!(config.loops.sensing_period(), Duration::from_millis(50));
        assert_eq!(config.loops.control_period(), Duration::from_millis(100));
        assert_eq!(config.controller.safety_bound_deg, 90.0);
        assert_eq!(config.estimator.alpha, 0.98);
        assert_eq!(config.sensor.max_consecutive_failures, 3);
        assert_eq!(config.control_feed, ControlFeed::Pure);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config: AdcsConfig = serde_json::from_str(
            r#"{"controller": {"kp": 3.5}, "estimator": {"gravity_axes": "xy"}}"#,
        )
        .unwrap();
        assert_eq!(config.controller.kp, 3.5);
        assert_eq!(config.controller.kd, 0.5);
        assert_eq!(config.estimator.gravity_axes, GravityAxes::Xy);
        assert_eq!(config.loops, LoopConfig::default());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AdcsConfig::default();
        config.controller.deadband_deg = -1.0;
        assert!(config.validate().is_err());

        let mut config = AdcsConfig::default();
        config.estimator.alpha = 1.2;
        assert!(config.validate().is_err());

        let mut config = AdcsConfig::default();
        config.loops.control_period_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AdcsConfig::default();
        config.controller.kp = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = AdcsConfig::default();
        config.sensor.max_calibration_s = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotPositive {
                name: "max_calibration_s",
                ..
            })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"control_feed": "filtered", "loops": {{"sensing_period_ms": 20}}}}"#)
            .unwrap();
        let config = AdcsConfig::load(file.path()).unwrap();
        assert_eq!(config.control_feed, ControlFeed::Filtered);
        assert_eq!(config.loops.sensing_period_ms, 20);
        assert_eq!(config.loops.control_period_ms, 100);
    }

    #[test]
    fn test_load_errors() {
        let missing = AdcsConfig::load(Path::new("/nonexistent/adcs.json"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            AdcsConfig::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"estimator": {{"alpha": -0.5}}}}"#).unwrap();
        assert!(matches!(
            AdcsConfig::load(file.path()),
            Err(ConfigError::OutOfRange { .. })
        ));
    }
}
