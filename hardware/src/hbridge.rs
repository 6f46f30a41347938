//! H-bridge motor driver on Linux GPIO character devices.
//!
//! Drives a DRV8833/MP6550-class bridge through three output lines requested
//! together from one gpiochip: IN1 (clockwise), IN2 (counter-clockwise) and
//! SLEEP (driver enable, active high). All three are written in a single
//! `set_values` call so the bridge never sees a transient with both direction
//! inputs high.

use gpiod::{Chip, Lines, Options, Output};
use tracing::{debug, info, warn};

use crate::motor::{ActuatorCommand, MotorActuator, MotorError, MotorResult};

/// Default gpiochip device on a Raspberry Pi.
pub const DEFAULT_GPIO_CHIP: &str = "gpiochip0";

/// Line offsets for the bridge inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HBridgePins {
    /// Clockwise direction input
    pub in1: u32,
    /// Counter-clockwise direction input
    pub in2: u32,
    /// Sleep / standby input, high = enabled
    pub sleep: u32,
}

impl Default for HBridgePins {
    fn default() -> Self {
        Self {
            in1: 13,
            in2: 19,
            sleep: 26,
        }
    }
}

/// H-bridge driven through `gpiod`.
pub struct GpioHBridge {
    lines: Option<Lines<Output>>,
    command: ActuatorCommand,
    enabled: bool,
}

impl GpioHBridge {
    /// Request the three output lines, all low (stopped, asleep).
    pub fn open(chip_name: &str, pins: HBridgePins) -> MotorResult<Self> {
        let chip = Chip::new(chip_name)?;
        let options = Options::output([pins.in1, pins.in2, pins.sleep])
            .values([false, false, false])
            .consumer("adcs-motor");
        let lines = chip.request_lines(options)?;
        info!(
            "H-bridge lines requested on {} (IN1={}, IN2={}, SLEEP={})",
            chip_name,
            pins.in1,
            pins.in2,
            pins.sleep
        );
        Ok(Self {
            lines: Some(lines),
            command: ActuatorCommand::Stop,
            enabled: false,
        })
    }

    fn write(&mut self, command: ActuatorCommand, enabled: bool) -> MotorResult<()> {
        let lines = self.lines.as_ref().ok_or(MotorError::Released)?;
        let (in1, in2) = command.direction_lines();
        lines.set_values([in1, in2, enabled])?;
        debug!("H-bridge {} (enabled={})", command, enabled);
        self.command = command;
        self.enabled = enabled;
        Ok(())
    }

    fn set_command(&mut self, command: ActuatorCommand) -> MotorResult<()> {
        if self.command == command {
            return Ok(());
        }
        self.write(command, self.enabled)
    }
}

impl MotorActuator for GpioHBridge {
    fn name(&self) -> &str {
        "gpio-hbridge"
    }

    fn rotate_clockwise(&mut self) -> MotorResult<()> {
        self.set_command(ActuatorCommand::Clockwise)
    }

    fn rotate_counterclockwise(&mut self) -> MotorResult<()> {
        self.set_command(ActuatorCommand::Counterclockwise)
    }

    fn stop(&mut self) -> MotorResult<()> {
        self.set_command(ActuatorCommand::Stop)
    }

    fn enable(&mut self) -> MotorResult<()> {
        if self.enabled {
            return Ok(());
        }
        self.write(self.command, true)
    }

    fn disable(&mut self) -> MotorResult<()> {
        if !self.enabled {
            return Ok(());
        }
        self.write(self.command, false)
    }

    fn current_command(&self) -> ActuatorCommand {
        self.command
    }
}

impl Drop for GpioHBridge {
    fn drop(&mut self) {
        if self.lines.is_some() {
            if let Err(e) = self.write(ActuatorCommand::Stop, false) {
                warn!("Failed to de-energize H-bridge on drop: {e}");
            }
        }
        self.lines = None;
    }
}
