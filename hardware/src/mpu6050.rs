//! InvenSense MPU-6050 six-axis IMU driver.
//!
//! Configures the part for ±250 °/s and ±2 g full scale with the digital low
//! pass filter disabled, then samples accelerometer, temperature and gyro in a
//! single 14-byte burst so all three come from the same conversion.
//!
//! # Register Layout
//!
//! Measurement registers start at `ACCEL_XOUT_H` (0x3B) and are big-endian
//! signed 16-bit words:
//!
//! ```text
//! 0x3B AX  0x3D AY  0x3F AZ  0x41 TEMP  0x43 GX  0x45 GY  0x47 GZ
//! ```
//!
//! The driver is generic over [`embedded_hal::i2c::I2c`]. On Linux the
//! `mpu6050-linux` feature adds `Mpu6050::open_linux` on top of
//! `linux-embedded-hal`'s `/dev/i2c-N` device.

use std::thread;
use std::time::Duration;

use embedded_hal::i2c::{I2c, SevenBitAddress};
use tracing::{debug, info};

use crate::imu::{AngularRate, GravityVector, Imu, ImuError, ImuResult, ImuSample};

/// Default 7-bit address (AD0 low).
pub const MPU6050_ADDRESS: SevenBitAddress = 0x68;

/// Gyro sensitivity at ±250 °/s, LSB per °/s.
pub const GYRO_LSB_PER_DPS: f64 = 131.0;

/// Accelerometer sensitivity at ±2 g, LSB per g.
pub const ACCEL_LSB_PER_G: f64 = 16384.0;

mod reg {
    pub const SMPLRT_DIV: u8 = 0x19;
    pub const CONFIG: u8 = 0x1A;
    pub const GYRO_CONFIG: u8 = 0x1B;
    pub const ACCEL_CONFIG: u8 = 0x1C;
    pub const ACCEL_XOUT_H: u8 = 0x3B;
    pub const PWR_MGMT_1: u8 = 0x6B;
    pub const WHO_AM_I: u8 = 0x75;
}

const WHO_AM_I_VALUE: u8 = 0x68;
const MEASUREMENT_BYTES: usize = 14;
const WAKE_SETTLE: Duration = Duration::from_millis(100);

/// Convert a raw temperature word to °C.
pub fn temperature_from_raw(raw: i16) -> f64 {
    raw as f64 / 340.0 + 36.53
}

/// Decode a 14-byte measurement burst into physical units.
pub fn decode_measurements(bytes: &[u8; MEASUREMENT_BYTES]) -> ImuSample {
    let word = |i: usize| i16::from_be_bytes([bytes[i], bytes[i + 1]]);

    ImuSample {
        gravity: GravityVector::new(
            word(0) as f64 / ACCEL_LSB_PER_G,
            word(2) as f64 / ACCEL_LSB_PER_G,
            word(4) as f64 / ACCEL_LSB_PER_G,
        ),
        temperature_c: Some(temperature_from_raw(word(6))),
        rate: AngularRate::new(
            word(8) as f64 / GYRO_LSB_PER_DPS,
            word(10) as f64 / GYRO_LSB_PER_DPS,
            word(12) as f64 / GYRO_LSB_PER_DPS,
        ),
    }
}

/// MPU-6050 on any `embedded-hal` I2C bus.
pub struct Mpu6050<B> {
    bus: B,
    address: SevenBitAddress,
    ready: bool,
    settle: Duration,
}

impl<B: I2c> Mpu6050<B> {
    /// Driver for the part at the default address. Call
    /// [`Imu::initialize`] before sampling.
    pub fn new(bus: B) -> Self {
        Self::with_address(bus, MPU6050_ADDRESS)
    }

    /// Driver for a part strapped to another address (AD0 high is 0x69).
    pub fn with_address(bus: B, address: SevenBitAddress) -> Self {
        Self {
            bus,
            address,
            ready: false,
            settle: WAKE_SETTLE,
        }
    }

    /// Override the post-wake settle delay.
    pub fn with_settle_time(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Whether the last initialization succeeded.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Consume the driver and return the bus.
    pub fn into_bus(self) -> B {
        self.bus
    }

    fn write_register(&mut self, register: u8, value: u8) -> ImuResult<()> {
        self.bus
            .write(self.address, &[register, value])
            .map_err(ImuError::bus)
    }

    fn read_registers(&mut self, register: u8, buf: &mut [u8]) -> ImuResult<()> {
        self.bus
            .write_read(self.address, &[register], buf)
            .map_err(ImuError::bus)
    }
}

#[cfg(all(target_os = "linux", feature = "mpu6050-linux"))]
impl Mpu6050<linux_embedded_hal::I2cdev> {
    /// Open the part at the default address on `/dev/i2c-{bus}`.
    pub fn open_linux(bus: u8) -> ImuResult<Self> {
        let path = format!("/dev/i2c-{bus}");
        let device = linux_embedded_hal::I2cdev::new(&path).map_err(|e| ImuError::Open {
            path: path.clone(),
            message: e.to_string(),
        })?;
        debug!("Opened {path} for MPU6050 at 0x{MPU6050_ADDRESS:02X}");
        Ok(Self::new(device))
    }
}

impl<B: I2c> Imu for Mpu6050<B> {
    fn name(&self) -> &str {
        "MPU6050"
    }

    fn initialize(&mut self) -> ImuResult<()> {
        self.ready = false;

        let mut who_am_i = [0u8; 1];
        self.read_registers(reg::WHO_AM_I, &mut who_am_i)?;
        if who_am_i[0] != WHO_AM_I_VALUE {
            return Err(ImuError::WrongDevice {
                expected: WHO_AM_I_VALUE,
                actual: who_am_i[0],
            });
        }

        self.write_register(reg::PWR_MGMT_1, 0)?;
        self.write_register(reg::SMPLRT_DIV, 0)?;
        self.write_register(reg::ACCEL_CONFIG, 0)?;
        self.write_register(reg::GYRO_CONFIG, 0)?;
        self.write_register(reg::CONFIG, 0)?;

        thread::sleep(self.settle);
        self.ready = true;
        info!("MPU6050 initialized (±250 °/s, ±2 g)");
        Ok(())
    }

    fn read_raw(&mut self) -> ImuResult<ImuSample> {
        if !self.ready {
            return Err(ImuError::NotInitialized);
        }
        let mut bytes = [0u8; MEASUREMENT_BYTES];
        self.read_registers(reg::ACCEL_XOUT_H, &mut bytes)?;
        let sample = decode_measurements(&bytes);
        debug!("MPU6050 sample: {:?}", sample);
        Ok(sample)
    }
}
