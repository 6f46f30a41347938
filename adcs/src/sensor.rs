//! Bias-corrected inertial sensing with stale-reading fallback.
//!
//! [`InertialSensor`] wraps any [`Imu`] and adds the two things the loops need
//! from it: gyro bias removal, and tolerance of the odd failed transfer. A
//! failed read hands back the last good sample marked stale; only a run of
//! `max_consecutive_failures` failures is reported as a [`HardwareError`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use hardware::imu::{AngularRate, GravityVector, Imu, ImuError, ImuResult, ImuSample};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::HardwareError;

/// Gyro bias estimate.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CalibrationState {
    /// Per-axis bias subtracted from every raw rate, °/s
    pub gyro_bias: AngularRate,
    /// Samples averaged to produce the bias; 0 for manual or failed calibration
    pub sample_count: usize,
}

/// One calibrated sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Bias-corrected angular rate, °/s
    pub rate: AngularRate,
    /// Specific force, g
    pub gravity: GravityVector,
    /// Die temperature, °C
    pub temperature_c: Option<f64>,
    /// True when this repeats an earlier sample after a failed read
    pub stale: bool,
}

/// Calibrated sensor front end over an [`Imu`].
pub struct InertialSensor<I: Imu> {
    imu: I,
    calibration: CalibrationState,
    last_good: Option<ImuSample>,
    consecutive_failures: u32,
    max_consecutive_failures: u32,
    initialized: bool,
}

impl<I: Imu> InertialSensor<I> {
    /// Wrap `imu`. Call [`InertialSensor::initialize`] before reading.
    pub fn new(imu: I, max_consecutive_failures: u32) -> Self {
        Self {
            imu,
            calibration: CalibrationState::default(),
            last_good: None,
            consecutive_failures: 0,
            max_consecutive_failures: max_consecutive_failures.max(1),
            initialized: false,
        }
    }

    /// Bring up the device.
    pub fn initialize(&mut self) -> Result<(), HardwareError> {
        match self.imu.initialize() {
            Ok(()) => {
                info!("{} initialized", self.imu.name());
                self.initialized = true;
                self.consecutive_failures = 0;
                Ok(())
            }
            Err(e) => {
                error!("{} initialization failed: {e}", self.imu.name());
                self.initialized = false;
                Err(HardwareError::SensorInit(e))
            }
        }
    }

    /// Retry [`InertialSensor::initialize`] after a fault.
    pub fn reinitialize(&mut self) -> Result<(), HardwareError> {
        info!(
            "Attempting to reconnect {} after {} failed reads",
            self.imu.name(),
            self.consecutive_failures
        );
        self.initialize()
    }

    /// Whether the sensor is up and below the failure threshold.
    pub fn is_healthy(&self) -> bool {
        self.initialized && self.consecutive_failures < self.max_consecutive_failures
    }

    /// Current run of failed reads.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Device name.
    pub fn name(&self) -> &str {
        self.imu.name()
    }

    /// Uncorrected sample straight from the device.
    pub fn read_raw(&mut self) -> ImuResult<ImuSample> {
        self.imu.read_raw()
    }

    /// Bias-corrected sample.
    ///
    /// Transient failures return the last good sample with `stale` set. If
    /// nothing has been read yet, the stale fallback is a zero-rate level
    /// sample so nothing is integrated.
    pub fn read_calibrated(&mut self) -> Result<SensorReading, HardwareError> {
        let result = self.imu.read_raw().and_then(|sample| {
            if sample.rate.is_finite() && sample.gravity.is_finite() {
                Ok(sample)
            } else {
                Err(ImuError::ReadFailed(format!("non-finite sample {sample:?}")))
            }
        });

        match result {
            Ok(sample) => {
                if self.consecutive_failures > 0 {
                    debug!(
                        "{} recovered after {} failed reads",
                        self.imu.name(),
                        self.consecutive_failures
                    );
                }
                self.consecutive_failures = 0;
                self.last_good = Some(sample);
                Ok(self.correct(&sample, false))
            }
            Err(e) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if self.consecutive_failures >= self.max_consecutive_failures {
                    error!(
                        "{} failed {} consecutive reads: {e}",
                        self.imu.name(),
                        self.consecutive_failures
                    );
                    return Err(HardwareError::SensorUnresponsive {
                        failures: self.consecutive_failures,
                        source: e,
                    });
                }
                warn!(
                    "{} read failed ({}/{}), using last good sample: {e}",
                    self.imu.name(),
                    self.consecutive_failures,
                    self.max_consecutive_failures
                );
                let sample = self.last_good.unwrap_or(ImuSample {
                    rate: self.calibration.gyro_bias,
                    gravity: GravityVector::level(),
                    temperature_c: None,
                });
                Ok(self.correct(&sample, true))
            }
        }
    }

    fn correct(&self, sample: &ImuSample, stale: bool) -> SensorReading {
        SensorReading {
            rate: sample.rate.sub(&self.calibration.gyro_bias),
            gravity: sample.gravity,
            temperature_c: sample.temperature_c,
            stale,
        }
    }

    /// Average `sample_count` raw gyro readings taken `interval` apart with the
    /// sensor held still, and install the result as the new bias.
    ///
    /// Any failed read abandons the run and installs a zero bias.
    pub fn calibrate_bias(&mut self, sample_count: usize, interval: Duration) -> CalibrationState {
        match self.calibrate_bias_until(sample_count, interval, &AtomicBool::new(false)) {
            Some(calibration) => calibration,
            None => self.calibration,
        }
    }

    /// [`calibrate_bias`](Self::calibrate_bias) that gives up as soon as
    /// `cancel` is set. A cancelled run returns `None` and keeps the previous
    /// bias.
    pub fn calibrate_bias_until(
        &mut self,
        sample_count: usize,
        interval: Duration,
        cancel: &AtomicBool,
    ) -> Option<CalibrationState> {
        if sample_count == 0 {
            warn!("Gyro calibration requested with zero samples, clearing bias");
            self.calibration = CalibrationState::default();
            return Some(self.calibration);
        }

        info!(
            "Calibrating gyro bias: {} samples over {:.1}s, keep the sensor still",
            sample_count,
            sample_count as f64 * interval.as_secs_f64()
        );

        let progress_step = (sample_count / 5).max(1);
        let mut sum = [0.0f64; 3];
        for i in 0..sample_count {
            if cancel.load(Ordering::Acquire) {
                warn!("Gyro calibration cancelled after {i}/{sample_count} samples, bias unchanged");
                return None;
            }
            match self.imu.read_raw() {
                Ok(sample) if sample.rate.is_finite() => {
                    sum[0] += sample.rate.x;
                    sum[1] += sample.rate.y;
                    sum[2] += sample.rate.z;
                }
                Ok(sample) => {
                    warn!("Gyro calibration aborted on non-finite sample {sample:?}, bias cleared");
                    self.calibration = CalibrationState::default();
                    return Some(self.calibration);
                }
                Err(e) => {
                    warn!("Gyro calibration aborted at sample {i}: {e}, bias cleared");
                    self.calibration = CalibrationState::default();
                    return Some(self.calibration);
                }
            }
            if (i + 1) % progress_step == 0 {
                info!(
                    "Gyro calibration {}% ({}/{})",
                    (i + 1) * 100 / sample_count,
                    i + 1,
                    sample_count
                );
            }
            if i + 1 < sample_count && !interval.is_zero() {
                thread::sleep(interval);
            }
        }

        let n = sample_count as f64;
        self.calibration = CalibrationState {
            gyro_bias: AngularRate::new(sum[0] / n, sum[1] / n, sum[2] / n),
            sample_count,
        };
        self.consecutive_failures = 0;
        info!(
            "Gyro bias: x={:.4} y={:.4} z={:.4} °/s ({} samples)",
            self.calibration.gyro_bias.x,
            self.calibration.gyro_bias.y,
            self.calibration.gyro_bias.z,
            sample_count
        );
        Some(self.calibration)
    }

    /// Current calibration.
    pub fn calibration(&self) -> CalibrationState {
        self.calibration
    }

    /// Install a calibration, all three axes at once.
    pub fn set_calibration(&mut self, calibration: CalibrationState) {
        info!(
            "Gyro bias set to x={:.4} y={:.4} z={:.4} °/s",
            calibration.gyro_bias.x, calibration.gyro_bias.y, calibration.gyro_bias.z
        );
        self.calibration = calibration;
    }
}
