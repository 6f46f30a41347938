//! Hardware drivers for the reaction-wheel ADCS.
//!
//! This crate provides the sensor and actuator layer: the MPU-6050 IMU driver
//! on `embedded-hal` I2C, an H-bridge motor driver on Linux GPIO, and
//! simulated stand-ins for both so the control stack runs off-target.
//!
//! # Features
//!
//! - `hbridge` - H-bridge motor driver on gpiochip lines (Linux only)
//! - `mpu6050-linux` - MPU-6050 on `/dev/i2c-N` via `linux-embedded-hal` (Linux only)
//! - `full-linux` - All drivers for Raspberry Pi deployments
//!
//! The MPU-6050 driver itself only needs an [`embedded_hal::i2c::I2c`] bus and
//! is always built, as are the [`sim`] backends.

pub mod imu;
pub mod motor;
pub mod mpu6050;
pub mod sim;

#[cfg(all(target_os = "linux", feature = "hbridge"))]
pub mod hbridge;

pub use imu::{AngularRate, GravityVector, Imu, ImuError, ImuResult, ImuSample};
pub use motor::{ActuatorCommand, MotorActuator, MotorError, MotorResult};
