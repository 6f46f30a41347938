//! Simulated IMU, motor and single-axis plant.
//!
//! Lets the control stack run unchanged without target hardware. The
//! [`SimulatedMotor`] is a logged no-op actuator that records every call into a
//! [`MotorLog`] and, when attached to a [`SimPlant`], spins the simulated body.
//! The [`SimulatedImu`] reads the body rate back out of the same plant with a
//! configurable constant bias and optional Gaussian noise.
//!
//! # Plant Model
//!
//! The reaction wheel is idealized as bang-bang on body rate: clockwise drive
//! gives `+slew_rate_dps`, counter-clockwise gives `-slew_rate_dps`, stop or a
//! sleeping driver gives zero. An external disturbance rate adds on top. True
//! yaw integrates lazily on every access.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use tracing::debug;

use crate::imu::{AngularRate, GravityVector, Imu, ImuError, ImuResult, ImuSample};
use crate::motor::{ActuatorCommand, MotorActuator, MotorResult};

/// Default body slew rate under full wheel drive, °/s.
pub const DEFAULT_SLEW_RATE_DPS: f64 = 30.0;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct PlantState {
    yaw_deg: f64,
    drive_rate_dps: f64,
    disturbance_dps: f64,
    slew_rate_dps: f64,
    last_update: Instant,
}

impl PlantState {
    fn rate_dps(&self) -> f64 {
        self.drive_rate_dps + self.disturbance_dps
    }

    fn advance(&mut self) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_update).as_secs_f64();
        self.yaw_deg += self.rate_dps() * dt;
        self.last_update = now;
    }
}

/// Shared single-axis body driven by a [`SimulatedMotor`].
#[derive(Debug, Clone)]
pub struct SimPlant {
    state: Arc<Mutex<PlantState>>,
}

impl SimPlant {
    /// Create a plant at rest at yaw 0 with the given drive slew rate.
    pub fn new(slew_rate_dps: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(PlantState {
                yaw_deg: 0.0,
                drive_rate_dps: 0.0,
                disturbance_dps: 0.0,
                slew_rate_dps,
                last_update: Instant::now(),
            })),
        }
    }

    /// A plant the wheel cannot turn; only a disturbance moves it.
    pub fn stationary() -> Self {
        Self::new(0.0)
    }

    /// Current true body rate about yaw, °/s.
    pub fn rate_dps(&self) -> f64 {
        let mut state = lock(&self.state);
        state.advance();
        state.rate_dps()
    }

    /// Current true yaw, °.
    pub fn yaw_deg(&self) -> f64 {
        let mut state = lock(&self.state);
        state.advance();
        state.yaw_deg
    }

    /// Apply a constant external rate on top of the wheel drive.
    pub fn set_disturbance_dps(&self, rate_dps: f64) {
        let mut state = lock(&self.state);
        state.advance();
        state.disturbance_dps = rate_dps;
    }

    fn drive(&self, command: ActuatorCommand, enabled: bool) {
        let mut state = lock(&self.state);
        state.advance();
        state.drive_rate_dps = match (command, enabled) {
            (_, false) => 0.0,
            (ActuatorCommand::Clockwise, true) => state.slew_rate_dps,
            (ActuatorCommand::Counterclockwise, true) => -state.slew_rate_dps,
            (ActuatorCommand::Stop, true) => 0.0,
        };
    }
}

impl Default for SimPlant {
    fn default() -> Self {
        Self::new(DEFAULT_SLEW_RATE_DPS)
    }
}

/// Handle for making a [`SimulatedImu`] fail on demand after it has been
/// moved into a controller.
#[derive(Debug, Clone, Default)]
pub struct FailureInjector {
    remaining: Arc<AtomicUsize>,
}

impl FailureInjector {
    /// Fail the next `count` reads.
    pub fn fail_next(&self, count: usize) {
        self.remaining.store(count, Ordering::SeqCst);
    }

    /// Reads still scheduled to fail.
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::SeqCst)
    }

    fn take(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Gyro/accelerometer model reading from a [`SimPlant`].
pub struct SimulatedImu {
    plant: SimPlant,
    bias: AngularRate,
    gravity: GravityVector,
    temperature_c: f64,
    noise: Option<(StdRng, Normal<f64>)>,
    failures: FailureInjector,
    initialized: bool,
}

impl SimulatedImu {
    /// Noise-free, bias-free IMU on `plant`.
    pub fn new(plant: SimPlant) -> Self {
        Self {
            plant,
            bias: AngularRate::default(),
            gravity: GravityVector::level(),
            temperature_c: 25.0,
            noise: None,
            failures: FailureInjector::default(),
            initialized: false,
        }
    }

    /// Add a constant gyro bias in °/s.
    pub fn with_bias(mut self, bias: AngularRate) -> Self {
        self.bias = bias;
        self
    }

    /// Report a fixed gravity vector.
    pub fn with_gravity(mut self, gravity: GravityVector) -> Self {
        self.gravity = gravity;
        self
    }

    /// Add white gyro noise with standard deviation `sigma_dps`, seeded for
    /// reproducible runs.
    ///
    /// A non-finite or negative sigma leaves the IMU noise-free.
    pub fn with_noise(mut self, sigma_dps: f64, seed: u64) -> Self {
        self.noise = Normal::new(0.0, sigma_dps)
            .ok()
            .map(|normal| (StdRng::seed_from_u64(seed), normal));
        self
    }

    /// Handle for injecting read failures.
    pub fn failure_injector(&self) -> FailureInjector {
        self.failures.clone()
    }

    fn noise_sample(&mut self) -> f64 {
        match &mut self.noise {
            Some((rng, normal)) => normal.sample(rng),
            None => 0.0,
        }
    }
}

impl Imu for SimulatedImu {
    fn name(&self) -> &str {
        "simulated-imu"
    }

    fn initialize(&mut self) -> ImuResult<()> {
        if self.failures.take() {
            return Err(ImuError::ReadFailed("injected init failure".to_string()));
        }
        self.initialized = true;
        debug!("Simulated IMU initialized");
        Ok(())
    }

    fn read_raw(&mut self) -> ImuResult<ImuSample> {
        if !self.initialized {
            return Err(ImuError::NotInitialized);
        }
        if self.failures.take() {
            return Err(ImuError::ReadFailed("injected read failure".to_string()));
        }
        let body_rate = self.plant.rate_dps();
        let rate = AngularRate::new(
            self.bias.x + self.noise_sample(),
            self.bias.y + self.noise_sample(),
            body_rate + self.bias.z + self.noise_sample(),
        );
        Ok(ImuSample {
            rate,
            gravity: self.gravity,
            temperature_c: Some(self.temperature_c),
        })
    }
}

/// One call made on a [`SimulatedMotor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorEvent {
    /// `rotate_clockwise()`
    Clockwise,
    /// `rotate_counterclockwise()`
    Counterclockwise,
    /// `stop()`
    Stop,
    /// `enable()`
    Enable,
    /// `disable()`
    Disable,
}

/// Shared record of every call made on a [`SimulatedMotor`].
#[derive(Debug, Clone, Default)]
pub struct MotorLog {
    events: Arc<Mutex<Vec<MotorEvent>>>,
}

impl MotorLog {
    fn push(&self, event: MotorEvent) {
        lock(&self.events).push(event);
    }

    /// Snapshot of all events so far, oldest first.
    pub fn events(&self) -> Vec<MotorEvent> {
        lock(&self.events).clone()
    }

    /// Most recent event.
    pub fn last(&self) -> Option<MotorEvent> {
        lock(&self.events).last().copied()
    }

    /// Number of times `event` was recorded.
    pub fn count(&self, event: MotorEvent) -> usize {
        lock(&self.events).iter().filter(|e| **e == event).count()
    }

    /// Drop all recorded events.
    pub fn clear(&self) {
        lock(&self.events).clear();
    }
}

/// Logged no-op motor driver.
pub struct SimulatedMotor {
    plant: Option<SimPlant>,
    command: ActuatorCommand,
    enabled: bool,
    log: MotorLog,
}

impl SimulatedMotor {
    /// Motor that only logs.
    pub fn new() -> Self {
        Self {
            plant: None,
            command: ActuatorCommand::Stop,
            enabled: false,
            log: MotorLog::default(),
        }
    }

    /// Motor that also drives `plant`.
    pub fn with_plant(plant: SimPlant) -> Self {
        Self {
            plant: Some(plant),
            ..Self::new()
        }
    }

    /// Handle to this motor's call log.
    pub fn log(&self) -> MotorLog {
        self.log.clone()
    }

    /// Whether the simulated driver is awake.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set(&mut self, command: ActuatorCommand, event: MotorEvent) -> MotorResult<()> {
        self.log.push(event);
        if self.command != command {
            debug!("Simulated motor: {} -> {}", self.command, command);
            self.command = command;
            if let Some(plant) = &self.plant {
                plant.drive(command, self.enabled);
            }
        }
        Ok(())
    }

    fn set_enabled(&mut self, enabled: bool, event: MotorEvent) -> MotorResult<()> {
        self.log.push(event);
        if self.enabled != enabled {
            debug!("Simulated motor driver enabled={}", enabled);
            self.enabled = enabled;
            if let Some(plant) = &self.plant {
                plant.drive(self.command, enabled);
            }
        }
        Ok(())
    }
}

impl Default for SimulatedMotor {
    fn default() -> Self {
        Self::new()
    }
}

impl MotorActuator for SimulatedMotor {
    fn name(&self) -> &str {
        "simulated-motor"
    }

    fn rotate_clockwise(&mut self) -> MotorResult<()> {
        self.set(ActuatorCommand::Clockwise, MotorEvent::Clockwise)
    }

    fn rotate_counterclockwise(&mut self) -> MotorResult<()> {
        self.set(ActuatorCommand::Counterclockwise, MotorEvent::Counterclockwise)
    }

    fn stop(&mut self) -> MotorResult<()> {
        self.set(ActuatorCommand::Stop, MotorEvent::Stop)
    }

    fn enable(&mut self) -> MotorResult<()> {
        self.set_enabled(true, MotorEvent::Enable)
    }

    fn disable(&mut self) -> MotorResult<()> {
        self.set_enabled(false, MotorEvent::Disable)
    }

    fn current_command(&self) -> ActuatorCommand {
        self.command
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_motor_drives_plant_only_when_enabled() {
        let plant = SimPlant::new(20.0);
        let mut motor = SimulatedMotor::with_plant(plant.clone());

        motor.rotate_clockwise().unwrap();
        assert_eq!(plant.rate_dps(), 0.0);

        motor.enable().unwrap();
        assert_eq!(plant.rate_dps(), 20.0);

        motor.rotate_counterclockwise().unwrap();
        assert_eq!(plant.rate_dps(), -20.0);

        motor.stop().unwrap();
        assert_eq!(plant.rate_dps(), 0.0);
    }

    #[test]
    fn test_motor_log_records_every_call() {
        let mut motor = SimulatedMotor::new();
        let log = motor.log();
        motor.stop().unwrap();
        motor.stop().unwrap();
        motor.enable().unwrap();
        motor.rotate_clockwise().unwrap();
        motor.disable().unwrap();

        assert_eq!(
            log.events(),
            vec![
                MotorEvent::Stop,
                MotorEvent::Stop,
                MotorEvent::Enable,
                MotorEvent::Clockwise,
                MotorEvent::Disable
            ]
        );
        assert_eq!(log.count(MotorEvent::Stop), 2);
        assert_eq!(motor.current_command(), ActuatorCommand::Clockwise);
    }

    #[test]
    fn test_imu_reports_plant_rate_plus_bias() {
        let plant = SimPlant::stationary();
        plant.set_disturbance_dps(5.0);
        let mut imu = SimulatedImu::new(plant).with_bias(AngularRate::new(0.1, 0.2, 0.3));
        imu.initialize().unwrap();

        let sample = imu.read_raw().unwrap();
        assert_abs_diff_eq!(sample.rate.x, 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(sample.rate.z, 5.3, epsilon = 1e-12);
        assert_eq!(sample.gravity, GravityVector::level());
    }

    #[test]
    fn test_injected_failures_are_consumed() {
        let mut imu = SimulatedImu::new(SimPlant::stationary());
        imu.initialize().unwrap();
        let injector = imu.failure_injector();
        injector.fail_next(2);

        assert!(imu.read_raw().is_err());
        assert!(imu.read_raw().is_err());
        assert!(imu.read_raw().is_ok());
        assert_eq!(injector.remaining(), 0);
    }

    #[test]
    fn test_noise_is_reproducible() {
        let read = |seed| {
            let mut imu = SimulatedImu::new(SimPlant::stationary()).with_noise(0.5, seed);
            imu.initialize().unwrap();
            imu.read_raw().unwrap().rate
        };
        assert_eq!(read(7), read(7));
        assert_ne!(read(7), read(8));
    }
}
