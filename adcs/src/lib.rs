//! Single-axis reaction-wheel attitude determination and control.
//!
//! The data path runs leaves first:
//!
//! ```text
//! InertialSensor -> OrientationEstimator -> shared state -> BangBangPdController -> MotorActuator
//!      (sensing loop, 20 Hz)                                 (control loop, 10 Hz)
//! ```
//!
//! [`AdcsController`] owns all of it and exposes a thread-safe command and
//! snapshot API; [`AdcsCommand`] is the closed set of remote commands mapped
//! onto that API. Hardware comes from the `hardware` crate, either real
//! drivers or the simulated backends in `hardware::sim`.

pub mod command;
pub mod config;
pub mod controller;
pub mod error;
pub mod estimator;
pub mod orchestrator;
pub mod sensor;
pub mod telemetry;

pub use command::{AdcsCommand, CommandParseError, CommandResponse, CommandStatus};
pub use config::AdcsConfig;
pub use controller::{normalize_angle, BangBangPdController, ControllerGains, ControllerState, Fault};
pub use error::{AdcsError, AdcsResult, ConfigError, HardwareError};
pub use estimator::{ControlFeed, GravityAxes, OrientationEstimate, OrientationEstimator};
pub use orchestrator::AdcsController;
pub use sensor::{CalibrationState, InertialSensor, SensorReading};
pub use telemetry::Telemetry;
