//! Bench tool for the reaction-wheel ADCS.
//!
//! Subcommands:
//! - `repl`: Interactive command line against an in-process controller
//! - `calibrate`: Measure gyro bias with the platform held still
//! - `motor`: Pulse the H-bridge to check wiring
//! - `monitor`: Print yaw, rate and temperature at 10 Hz

use std::thread;
use std::time::{Duration, Instant};

use adcs::orchestrator::DynMotor;
use adcs::{AdcsController, CommandResponse, InertialSensor};
use adcs_server::{ConfigArgs, HardwareArgs};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use hardware::motor::{ActuatorCommand, MotorActuator};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::{info, warn};

/// Monitor print period
const MONITOR_PERIOD: Duration = Duration::from_millis(100);

/// Reaction-wheel ADCS bench tool
#[derive(Parser, Debug)]
#[command(name = "adcs_tool")]
#[command(about = "Bench tool for the reaction-wheel ADCS")]
#[command(version)]
struct Args {
    #[command(flatten)]
    hardware: HardwareArgs,

    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive command REPL (set, start, stop, gains, calibrate, status, ...)
    Repl,

    /// Measure gyro bias and print it
    Calibrate {
        /// Averaging window in seconds
        #[arg(short, long, default_value = "8")]
        duration: f64,
    },

    /// Pulse the motor for wiring checks
    Motor {
        /// Direction to pulse
        #[arg(short, long, value_enum)]
        direction: Direction,

        /// Pulse length in milliseconds
        #[arg(short, long, default_value = "200")]
        pulse_ms: u64,

        /// Number of pulses
        #[arg(short, long, default_value = "1")]
        count: u32,
    },

    /// Print estimator output at 10 Hz
    Monitor {
        /// How long to monitor in seconds
        #[arg(short, long, default_value = "10")]
        seconds: f64,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Direction {
    /// Clockwise (IN1)
    Cw,
    /// Counter-clockwise (IN2)
    Ccw,
}

impl From<Direction> for ActuatorCommand {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Cw => ActuatorCommand::Clockwise,
            Direction::Ccw => ActuatorCommand::Counterclockwise,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    match args.command {
        Command::Repl => cmd_repl(&args.hardware, &args.config),
        Command::Calibrate { duration } => cmd_calibrate(&args.hardware, &args.config, duration),
        Command::Motor {
            direction,
            pulse_ms,
            count,
        } => cmd_motor(&args.hardware, direction, pulse_ms, count),
        Command::Monitor { seconds } => cmd_monitor(&args.hardware, &args.config, seconds),
    }
}

fn spawn_controller(hardware: &HardwareArgs, config: &ConfigArgs) -> Result<AdcsController> {
    let config = config.load()?;
    let hardware = hardware.open()?;
    AdcsController::spawn(hardware.imu, hardware.motor, config).context("Failed to start ADCS")
}

fn print_response(response: &CommandResponse) {
    let status = if response.is_ok() { "OK" } else { "Error" };
    println!("{status}: {}", response.message);
    if let Some(data) = &response.data {
        match serde_json::to_string_pretty(data) {
            Ok(text) => println!("{text}"),
            Err(e) => println!("(unprintable payload: {e})"),
        }
    }
}

fn cmd_repl(hardware: &HardwareArgs, config: &ConfigArgs) -> Result<()> {
    let adcs = spawn_controller(hardware, config)?;

    println!("ADCS REPL - 'help' for commands, 'quit' to exit");
    let mut editor = DefaultEditor::new().context("Failed to start line editor")?;
    loop {
        let line = match editor.readline("adcs> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                warn!("Line editor failed: {e}");
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Err(e) = editor.add_history_entry(line) {
            warn!("Failed to record history: {e}");
        }

        match line {
            "quit" | "exit" => break,
            "help" => print_help(),
            _ => print_response(&adcs.execute_text(line)),
        }
    }

    adcs.shutdown();
    println!("Motor stopped and disabled");
    Ok(())
}

fn print_help() {
    println!("  start <deg>          begin tracking a target yaw");
    println!("  stop                 stop tracking, motor off");
    println!("  set <deg>            change the target yaw");
    println!("  gains <kp> <kd>      set controller gains");
    println!("  deadband <deg>       set the deadband");
    println!("  pulse <s>            set the minimum reversal hold");
    println!("  calibrate <s>        measure gyro bias (hold still)");
    println!("  bias <x> <y> <z>     set gyro bias manually");
    println!("  zero                 take the current yaw as 0");
    println!("  feed pure|filtered   select the controller yaw feed");
    println!("  clear                clear a latched fault");
    println!("  status               print the latest telemetry");
    println!("  quit                 stop the motor and exit");
}

fn cmd_calibrate(hardware: &HardwareArgs, config: &ConfigArgs, duration: f64) -> Result<()> {
    if !(duration.is_finite() && duration > 0.0) {
        bail!("--duration must be positive, got {duration}");
    }
    let config = config.load()?;
    if duration > config.sensor.max_calibration_s {
        bail!(
            "--duration must be at most {} s, got {duration}",
            config.sensor.max_calibration_s
        );
    }
    let mut hardware = hardware.open()?;
    stop_and_disable(&mut hardware.motor)?;

    let mut sensor = InertialSensor::new(hardware.imu, config.sensor.max_consecutive_failures);
    sensor.initialize().context("IMU did not initialize")?;

    let interval = config.sensor.calibration_sample_interval();
    let sample_count =
        (duration / interval.as_secs_f64().max(0.001)).round().max(1.0) as usize;
    let calibration = sensor.calibrate_bias(sample_count, interval);
    if calibration.sample_count == 0 {
        bail!("Calibration failed, see log for the failing read");
    }

    println!(
        "Gyro bias from {} samples: x={:.4} y={:.4} z={:.4} °/s",
        calibration.sample_count,
        calibration.gyro_bias.x,
        calibration.gyro_bias.y,
        calibration.gyro_bias.z
    );
    println!(
        "Apply with: bias {} {} {}",
        calibration.gyro_bias.x, calibration.gyro_bias.y, calibration.gyro_bias.z
    );
    Ok(())
}

fn stop_and_disable(motor: &mut DynMotor) -> Result<()> {
    motor.stop().context("Failed to stop motor")?;
    motor.disable().context("Failed to disable motor")?;
    Ok(())
}

fn pulse(motor: &mut DynMotor, command: ActuatorCommand, pulse: Duration, count: u32) -> Result<()> {
    motor.enable()?;
    for i in 0..count {
        info!("Pulse {}/{}: {} for {:?}", i + 1, count, command, pulse);
        motor.apply(command)?;
        thread::sleep(pulse);
        motor.stop()?;
        if i + 1 < count {
            thread::sleep(pulse);
        }
    }
    Ok(())
}

fn cmd_motor(hardware: &HardwareArgs, direction: Direction, pulse_ms: u64, count: u32) -> Result<()> {
    let mut hardware = hardware.open()?;
    let command = ActuatorCommand::from(direction);
    println!(
        "Pulsing {} {} time(s) for {} ms on {}",
        command,
        count,
        pulse_ms,
        hardware.motor.name()
    );

    let result = pulse(&mut hardware.motor, command, Duration::from_millis(pulse_ms), count);
    let stopped = stop_and_disable(&mut hardware.motor);
    result.context("Motor pulse failed")?;
    stopped?;

    if let Some(plant) = &hardware.plant {
        println!("Simulated yaw after pulses: {:.2}°", plant.yaw_deg());
    }
    println!("Motor stopped and disabled");
    Ok(())
}

fn cmd_monitor(hardware: &HardwareArgs, config: &ConfigArgs, seconds: f64) -> Result<()> {
    if !(seconds.is_finite() && seconds >= 0.0) {
        bail!("--seconds must be non-negative, got {seconds}");
    }
    let adcs = spawn_controller(hardware, config)?;

    println!(
        "{:>8} {:>10} {:>10} {:>10} {:>8}  status",
        "t (s)", "yaw pure", "yaw filt", "rate °/s", "temp °C"
    );
    let start = Instant::now();
    let end = Duration::from_secs_f64(seconds);
    while start.elapsed() < end {
        let t = adcs.latest_data();
        let temperature = t
            .temperature_c
            .map(|c| format!("{c:.1}"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>8.2} {:>10.2} {:>10.2} {:>10.3} {:>8}  {}",
            start.elapsed().as_secs_f64(),
            t.yaw_pure,
            t.yaw_filtered,
            t.gyro_rate.z,
            temperature,
            t.status
        );
        thread::sleep(MONITOR_PERIOD);
    }

    adcs.shutdown();
    Ok(())
}
