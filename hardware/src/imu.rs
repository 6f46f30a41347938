//! Inertial measurement unit abstraction.
//!
//! Drivers implement [`Imu`] and report physical units: angular rate in
//! degrees/second and specific force in g. Bias correction and fusion happen
//! downstream; an [`Imu`] only samples.

use embedded_hal::i2c::ErrorKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Three-axis angular rate in degrees/second.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AngularRate {
    /// Rate about X in °/s
    pub x: f64,
    /// Rate about Y in °/s
    pub y: f64,
    /// Rate about Z (yaw axis) in °/s
    pub z: f64,
}

impl AngularRate {
    /// Create a rate vector in °/s.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Per-axis difference `self - other`.
    pub fn sub(&self, other: &AngularRate) -> AngularRate {
        AngularRate::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    /// Get rates as an array [x, y, z].
    pub fn as_array(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    /// True when every axis is finite.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Three-axis specific force in g.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GravityVector {
    /// X component in g
    pub x: f64,
    /// Y component in g
    pub y: f64,
    /// Z component in g
    pub z: f64,
}

impl GravityVector {
    /// Create a gravity vector in g.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Sensor lying flat, Z up.
    pub fn level() -> Self {
        Self::new(0.0, 0.0, 1.0)
    }

    /// True when every axis is finite.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Default for GravityVector {
    fn default() -> Self {
        Self::level()
    }
}

/// One raw sample from an IMU, before bias correction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImuSample {
    /// Gyroscope output in °/s
    pub rate: AngularRate,
    /// Accelerometer output in g
    pub gravity: GravityVector,
    /// Die temperature in °C, when the part reports one
    pub temperature_c: Option<f64>,
}

/// Errors raised by IMU drivers.
#[derive(Error, Debug)]
pub enum ImuError {
    /// Bus transfer failed.
    #[error("IMU bus error ({kind:?}): {detail}")]
    Bus {
        /// Portable classification from the bus implementation
        kind: ErrorKind,
        /// Implementation-specific description
        detail: String,
    },

    /// The bus device node could not be opened.
    #[error("Failed to open {path}: {message}")]
    Open {
        /// Device path
        path: String,
        /// Underlying failure
        message: String,
    },

    /// Identity register did not match the expected part.
    #[error("Unexpected WHO_AM_I 0x{actual:02X} (expected 0x{expected:02X})")]
    WrongDevice {
        /// Expected identity value
        expected: u8,
        /// Value read back
        actual: u8,
    },

    /// A read was attempted before [`Imu::initialize`] succeeded.
    #[error("IMU not initialized")]
    NotInitialized,

    /// Simulated or injected failure.
    #[error("IMU read failed: {0}")]
    ReadFailed(String),
}

impl ImuError {
    /// Wrap any `embedded-hal` I2C error.
    pub fn bus<E: embedded_hal::i2c::Error>(error: E) -> Self {
        ImuError::Bus {
            kind: error.kind(),
            detail: format!("{error:?}"),
        }
    }
}

/// Result type for IMU operations.
pub type ImuResult<T> = Result<T, ImuError>;

/// A gyroscope/accelerometer that can be configured and sampled.
pub trait Imu {
    /// Human-readable part name for logs.
    fn name(&self) -> &str;

    /// Configure the device for sampling. Safe to call again to recover a
    /// device that stopped responding.
    fn initialize(&mut self) -> ImuResult<()>;

    /// Read one uncalibrated sample.
    fn read_raw(&mut self) -> ImuResult<ImuSample>;
}

impl<I: Imu + ?Sized> Imu for Box<I> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn initialize(&mut self) -> ImuResult<()> {
        (**self).initialize()
    }

    fn read_raw(&mut self) -> ImuResult<ImuSample> {
        (**self).read_raw()
    }
}
