//! Snapshot of controller state for the command/telemetry layer.

use hardware::imu::AngularRate;
use hardware::motor::ActuatorCommand;
use serde::{Deserialize, Serialize};

use crate::controller::{ControllerGains, ControllerState, Fault};
use crate::estimator::ControlFeed;
use crate::sensor::CalibrationState;

/// Everything `get_latest_data` reports, taken under one lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// Complementary-filter yaw, degrees
    pub yaw_filtered: f64,
    /// Gyro-only yaw, degrees
    pub yaw_pure: f64,
    /// Commanded yaw, degrees
    pub target_yaw: f64,
    /// Wrapped error on the selected feed, degrees
    pub error: f64,
    /// Controller gains
    pub gains: ControllerGains,
    /// Last command sent to the motor
    pub motor_command: ActuatorCommand,
    /// Latched fault
    pub fault: Option<Fault>,
    /// Roll, degrees
    pub roll: f64,
    /// Pitch, degrees
    pub pitch: f64,
    /// Bias-corrected angular rate, °/s
    pub gyro_rate: AngularRate,
    /// IMU die temperature, °C
    pub temperature_c: Option<f64>,
    /// Feed driving the controller
    pub control_feed: ControlFeed,
    /// Controller mode
    pub controller_state: ControllerState,
    /// A gyro calibration is running
    pub calibrating: bool,
    /// Last sensor sample was a stale repeat
    pub sensor_stale: bool,
    /// Installed gyro calibration
    pub calibration: CalibrationState,
    /// Integrated estimator time, seconds
    pub timestamp: f64,
    /// One-line summary
    pub status: String,
}

/// One-line status for operators.
pub fn status_line(fault: Option<&Fault>, calibrating: bool) -> String {
    match (fault, calibrating) {
        (Some(fault), _) => format!("Fault: {fault}"),
        (None, true) => "Calibrating".to_string(),
        (None, false) => "Nominal".to_string(),
    }
}
