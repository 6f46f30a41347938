//! Hardware and configuration selection from command-line flags.
//!
//! `--simulate` builds a [`SimPlant`] with a simulated IMU and motor sharing
//! it. Without it the real MPU-6050 and H-bridge are opened, which needs a
//! Linux target built with the `full-linux` feature.

use std::path::PathBuf;

use adcs::orchestrator::{DynImu, DynMotor};
use adcs::{AdcsConfig, ControlFeed};
use anyhow::{Context, Result};
use clap::Args;
use hardware::imu::AngularRate;
use hardware::sim::{SimPlant, SimulatedImu, SimulatedMotor, DEFAULT_SLEW_RATE_DPS};
use tracing::info;

/// Flags selecting and configuring the IMU and motor.
#[derive(Args, Debug, Clone)]
pub struct HardwareArgs {
    /// Run against the simulated plant instead of real hardware
    #[arg(long)]
    pub simulate: bool,

    /// Simulated wheel slew rate in degrees per second
    #[arg(long, default_value_t = DEFAULT_SLEW_RATE_DPS)]
    pub slew_rate: f64,

    /// Simulated gyro z-axis bias in degrees per second
    #[arg(long, default_value_t = 0.0)]
    pub sim_bias: f64,

    /// Simulated gyro noise standard deviation in degrees per second
    #[arg(long, default_value_t = 0.0)]
    pub sim_noise: f64,

    /// I2C bus number of the MPU-6050 (/dev/i2c-N)
    #[arg(long, default_value_t = 1)]
    pub i2c_bus: u8,

    /// GPIO chip carrying the H-bridge lines
    #[arg(long, default_value = "gpiochip0")]
    pub gpio_chip: String,

    /// GPIO line for the clockwise input (IN1)
    #[arg(long, default_value_t = 13)]
    pub pin_cw: u32,

    /// GPIO line for the counter-clockwise input (IN2)
    #[arg(long, default_value_t = 19)]
    pub pin_ccw: u32,

    /// GPIO line for the driver sleep input
    #[arg(long, default_value_t = 26)]
    pub pin_sleep: u32,
}

/// Opened IMU and motor, plus the plant when simulating.
pub struct Hardware {
    pub imu: DynImu,
    pub motor: DynMotor,
    pub plant: Option<SimPlant>,
}

impl HardwareArgs {
    /// Open the hardware these flags describe.
    pub fn open(&self) -> Result<Hardware> {
        if self.simulate {
            Ok(self.open_simulated())
        } else {
            self.open_real()
        }
    }

    fn open_simulated(&self) -> Hardware {
        info!(
            "Using simulated hardware: slew {:.1}°/s, bias {:.3}°/s, noise {:.3}°/s",
            self.slew_rate, self.sim_bias, self.sim_noise
        );
        let plant = SimPlant::new(self.slew_rate);
        let mut imu = SimulatedImu::new(plant.clone())
            .with_bias(AngularRate::new(0.0, 0.0, self.sim_bias));
        if self.sim_noise > 0.0 {
            imu = imu.with_noise(self.sim_noise, 0);
        }
        Hardware {
            imu: Box::new(imu),
            motor: Box::new(SimulatedMotor::with_plant(plant.clone())),
            plant: Some(plant),
        }
    }

    #[cfg(all(target_os = "linux", feature = "full-linux"))]
    fn open_real(&self) -> Result<Hardware> {
        use hardware::hbridge::{GpioHBridge, HBridgePins};
        use hardware::mpu6050::Mpu6050;

        let imu = Mpu6050::open_linux(self.i2c_bus)
            .with_context(|| format!("Failed to open I2C bus {}", self.i2c_bus))?;
        let pins = HBridgePins {
            in1: self.pin_cw,
            in2: self.pin_ccw,
            sleep: self.pin_sleep,
        };
        let motor = GpioHBridge::open(&self.gpio_chip, pins)
            .with_context(|| format!("Failed to open H-bridge on {}", self.gpio_chip))?;
        info!(
            "Using MPU-6050 on /dev/i2c-{} and H-bridge on {} ({:?})",
            self.i2c_bus, self.gpio_chip, pins
        );
        Ok(Hardware {
            imu: Box::new(imu),
            motor: Box::new(motor),
            plant: None,
        })
    }

    #[cfg(not(all(target_os = "linux", feature = "full-linux")))]
    fn open_real(&self) -> Result<Hardware> {
        anyhow::bail!(
            "Real hardware needs a Linux build with the full-linux feature; pass --simulate"
        )
    }
}

/// Config file path and the individual values that override it.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// JSON configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Proportional gain
    #[arg(long)]
    pub kp: Option<f64>,

    /// Derivative gain
    #[arg(long)]
    pub kd: Option<f64>,

    /// Deadband in degrees
    #[arg(long)]
    pub deadband: Option<f64>,

    /// Minimum pulse time in seconds
    #[arg(long)]
    pub min_pulse_time: Option<f64>,

    /// Yaw feed driving the controller (pure or filtered)
    #[arg(long)]
    pub control_feed: Option<ControlFeed>,
}

impl ConfigArgs {
    /// Load the file (or defaults), apply overrides, and validate.
    pub fn load(&self) -> Result<AdcsConfig> {
        let mut config = match &self.config {
            Some(path) => AdcsConfig::load(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => AdcsConfig::default(),
        };

        if let Some(kp) = self.kp {
            config.controller.kp = kp;
        }
        if let Some(kd) = self.kd {
            config.controller.kd = kd;
        }
        if let Some(deadband) = self.deadband {
            config.controller.deadband_deg = deadband;
        }
        if let Some(seconds) = self.min_pulse_time {
            config.controller.min_pulse_time_s = seconds;
        }
        if let Some(feed) = self.control_feed {
            config.control_feed = feed;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}
