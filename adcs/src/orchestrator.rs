//! The ADCS orchestrator: sensing loop, control loop and command API.
//!
//! [`AdcsController`] owns the sensor, estimator, controller and motor and runs
//! two periodic threads:
//!
//! - **sensing** (`loops.sensing_period_ms`, 20 Hz by default): read the
//!   sensor, update the estimator.
//! - **control** (`loops.control_period_ms`, 10 Hz by default): run the
//!   controller on the latest estimate and drive the motor.
//!
//! Estimate, target, gains and fault live behind one mutex. Hardware I/O never
//! happens while that mutex is held: the sensing loop reads first and then
//! locks, the control loop decides under the lock and actuates after releasing
//! it. The sensor and motor each have their own lock; when both the motor and
//! state locks are needed, the motor lock is taken first.
//!
//! Gyro calibration holds the sensor lock for its whole run. The sensing loop
//! uses `try_lock` and simply skips ticks until calibration finishes; the
//! control loop commands `STOP` while the `calibrating` flag is set. Runs are
//! capped at `sensor.max_calibration_s` and shutdown cancels one in flight.
//!
//! # Shutdown
//!
//! [`AdcsController::shutdown`] drops the stop channel, joins both threads and
//! then unconditionally calls `stop()` and `disable()` on the motor. It is safe
//! to call repeatedly and also runs on drop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{select, tick, Receiver, Sender};
use hardware::imu::{AngularRate, Imu};
use hardware::motor::{ActuatorCommand, MotorActuator};
use tracing::{debug, error, info, warn};

use crate::config::AdcsConfig;
use crate::controller::{normalize_angle, BangBangPdController, ControllerGains, Fault};
use crate::error::{AdcsError, AdcsResult, ConfigError, HardwareError};
use crate::estimator::{ControlFeed, OrientationEstimator};
use crate::sensor::{CalibrationState, InertialSensor, SensorReading};
use crate::telemetry::{status_line, Telemetry};

/// Boxed IMU accepted by the orchestrator.
pub type DynImu = Box<dyn Imu + Send>;

/// Boxed motor accepted by the orchestrator.
pub type DynMotor = Box<dyn MotorActuator + Send>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the loops and the command API.
struct SharedState {
    estimator: OrientationEstimator,
    controller: BangBangPdController,
    feed: ControlFeed,
    reading: Option<SensorReading>,
    calibration: CalibrationState,
    calibrating: bool,
    motor_command: ActuatorCommand,
    override_epoch: u64,
}

struct Inner {
    config: AdcsConfig,
    state: Mutex<SharedState>,
    sensor: Mutex<InertialSensor<DynImu>>,
    motor: Mutex<DynMotor>,
    /// Set once by shutdown; cancels a running calibration.
    shutting_down: AtomicBool,
}

/// Per-thread bookkeeping for the sensing loop.
struct SensingClock {
    last_update: Instant,
    ticks_since_reconnect: u32,
}

impl Inner {
    fn sense_once(&self, clock: &mut SensingClock) {
        let result = {
            let mut sensor = match self.sensor.try_lock() {
                Ok(sensor) => sensor,
                Err(TryLockError::WouldBlock) => {
                    clock.last_update = Instant::now();
                    return;
                }
                Err(TryLockError::Poisoned(p)) => p.into_inner(),
            };

            if !sensor.is_healthy() {
                clock.ticks_since_reconnect += 1;
                if clock.ticks_since_reconnect < self.config.sensor.reconnect_interval_ticks {
                    clock.last_update = Instant::now();
                    return;
                }
                clock.ticks_since_reconnect = 0;
                if sensor.reinitialize().is_err() {
                    clock.last_update = Instant::now();
                    return;
                }
            }
            sensor.read_calibrated()
        };

        let now = Instant::now();
        let dt = now.duration_since(clock.last_update).as_secs_f64();
        clock.last_update = now;

        let mut state = lock(&self.state);
        match result {
            Ok(reading) => {
                state
                    .estimator
                    .update(&reading.rate, &reading.gravity, dt);
                state.reading = Some(reading);
            }
            Err(e) => {
                if let Some(reading) = state.reading.as_mut() {
                    reading.stale = true;
                }
                if state.controller.fault().is_none() {
                    error!("Sensor fault escalated: {e}");
                }
                state.controller.latch_fault(Fault::Hardware {
                    message: e.to_string(),
                });
            }
        }
    }

    fn control_once(&self) {
        let (command, epoch) = {
            let mut state = lock(&self.state);
            let command = if state.calibrating {
                ActuatorCommand::Stop
            } else {
                let current = state.estimator.estimate().yaw(state.feed);
                let target = state.controller.target();
                state.controller.control(current, target)
            };
            (command, state.override_epoch)
        };
        self.actuate(command, Some(epoch));
    }

    /// Send `command` to the motor.
    ///
    /// A command decided by the control loop carries the override epoch it
    /// was decided in and is dropped if `stop` or a calibration intervened. A
    /// driver error latches a fault and makes a best-effort attempt to stop.
    fn actuate(&self, command: ActuatorCommand, epoch: Option<u64>) {
        let mut motor = lock(&self.motor);
        if let Some(epoch) = epoch {
            if lock(&self.state).override_epoch != epoch {
                return;
            }
        }
        if motor.current_command() == command {
            return;
        }

        if let Err(e) = motor.apply(command) {
            let e = HardwareError::from(e);
            if let Err(stop_err) = motor.stop() {
                error!("Motor stop after actuator fault failed: {stop_err}");
            }
            lock(&self.state).controller.latch_fault(Fault::Hardware {
                message: e.to_string(),
            });
        }
        lock(&self.state).motor_command = motor.current_command();
    }

    fn stop_and_disable_motor(&self) -> Result<(), HardwareError> {
        let mut motor = lock(&self.motor);
        let stopped = motor.stop();
        let disabled = motor.disable();
        lock(&self.state).motor_command = motor.current_command();
        stopped?;
        disabled?;
        Ok(())
    }
}

fn sensing_loop(inner: Arc<Inner>, stop: Receiver<()>) {
    let period = inner.config.loops.sensing_period();
    let ticker = tick(period);
    let mut clock = SensingClock {
        last_update: Instant::now(),
        ticks_since_reconnect: 0,
    };
    info!("Sensing loop started ({period:?} period)");
    loop {
        select! {
            recv(stop) -> _ => break,
            recv(ticker) -> _ => inner.sense_once(&mut clock),
        }
    }
    info!("Sensing loop exited");
}

fn control_loop(inner: Arc<Inner>, stop: Receiver<()>) {
    let period = inner.config.loops.control_period();
    let ticker = tick(period);
    info!("Control loop started ({period:?} period)");
    loop {
        select! {
            recv(stop) -> _ => break,
            recv(ticker) -> _ => inner.control_once(),
        }
    }
    info!("Control loop exited");
}

/// Single-axis ADCS: owns the hardware and runs the sensing and control loops.
pub struct AdcsController {
    inner: Arc<Inner>,
    stop_tx: Mutex<Option<Sender<()>>>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl AdcsController {
    /// Take ownership of the hardware and start both loops.
    ///
    /// The motor is stopped and put to sleep first. A sensor that fails to
    /// initialize does not prevent startup: the controller comes up with a
    /// latched hardware fault and the sensing loop keeps retrying.
    pub fn spawn<I, M>(imu: I, motor: M, config: AdcsConfig) -> AdcsResult<Self>
    where
        I: Imu + Send + 'static,
        M: MotorActuator + Send + 'static,
    {
        config.validate()?;

        let mut motor: DynMotor = Box::new(motor);
        motor.stop().map_err(HardwareError::from)?;
        motor.disable().map_err(HardwareError::from)?;

        let mut sensor: InertialSensor<DynImu> =
            InertialSensor::new(Box::new(imu), config.sensor.max_consecutive_failures);
        let mut controller = BangBangPdController::from_config(&config.controller);
        if let Err(e) = sensor.initialize() {
            controller.latch_fault(Fault::Hardware {
                message: e.to_string(),
            });
        }

        let state = SharedState {
            estimator: OrientationEstimator::new(
                config.estimator.alpha,
                config.estimator.gravity_axes,
            ),
            controller,
            feed: config.control_feed,
            reading: None,
            calibration: sensor.calibration(),
            calibrating: false,
            motor_command: ActuatorCommand::Stop,
            override_epoch: 0,
        };

        info!(
            "Starting ADCS with {} and {} (feed: {})",
            sensor.name(),
            motor.name(),
            config.control_feed
        );

        let inner = Arc::new(Inner {
            config,
            state: Mutex::new(state),
            sensor: Mutex::new(sensor),
            motor: Mutex::new(motor),
            shutting_down: AtomicBool::new(false),
        });

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let adcs = Self {
            inner: inner.clone(),
            stop_tx: Mutex::new(Some(stop_tx)),
            loops: Mutex::new(Vec::new()),
        };

        let loops: [(&'static str, fn(Arc<Inner>, Receiver<()>)); 2] = [
            ("adcs-sensing", sensing_loop),
            ("adcs-control", control_loop),
        ];
        for (name, body) in loops {
            let inner = inner.clone();
            let stop = stop_rx.clone();
            let handle = thread::Builder::new()
                .name(name.to_string())
                .spawn(move || body(inner, stop))
                .map_err(|source| AdcsError::Spawn { name, source })?;
            lock(&adcs.loops).push(handle);
        }

        Ok(adcs)
    }

    /// Active configuration.
    pub fn config(&self) -> &AdcsConfig {
        &self.inner.config
    }

    /// True until [`AdcsController::shutdown`] is called.
    pub fn is_running(&self) -> bool {
        lock(&self.stop_tx).is_some()
    }

    /// Enable the motor and begin tracking `target_deg`. Clears any fault.
    pub fn start(&self, target_deg: f64) -> AdcsResult<()> {
        ConfigError::require_finite("target_yaw", target_deg)?;
        if !self.is_running() {
            return Err(AdcsError::ShutDown);
        }
        let enabled = lock(&self.inner.motor).enable();
        if let Err(e) = enabled {
            let e = HardwareError::from(e);
            lock(&self.inner.state)
                .controller
                .latch_fault(Fault::Hardware {
                    message: e.to_string(),
                });
            return Err(e.into());
        }
        lock(&self.inner.state).controller.start(target_deg)?;
        info!("Control started, target {target_deg:.2}°");
        Ok(())
    }

    /// Stop tracking, stop the motor and put it to sleep.
    pub fn stop(&self) -> AdcsResult<()> {
        {
            let mut state = lock(&self.inner.state);
            state.controller.stop();
            state.override_epoch += 1;
        }
        self.inner.stop_and_disable_motor()?;
        info!("Control stopped");
        Ok(())
    }

    /// Change the target yaw.
    pub fn set_target_yaw(&self, target_deg: f64) -> AdcsResult<()> {
        lock(&self.inner.state).controller.set_target(target_deg)?;
        info!("Target yaw set to {target_deg:.2}°");
        Ok(())
    }

    /// Change `kp` and `kd`.
    pub fn set_gains(&self, kp: f64, kd: f64) -> AdcsResult<()> {
        lock(&self.inner.state).controller.set_pd(kp, kd)?;
        info!("Gains set to kp={kp}, kd={kd}");
        Ok(())
    }

    /// Change the deadband, degrees.
    pub fn set_deadband(&self, deadband_deg: f64) -> AdcsResult<()> {
        lock(&self.inner.state).controller.set_deadband(deadband_deg)?;
        info!("Deadband set to {deadband_deg}°");
        Ok(())
    }

    /// Change the minimum reversal hold, seconds.
    pub fn set_min_pulse_time(&self, seconds: f64) -> AdcsResult<()> {
        lock(&self.inner.state)
            .controller
            .set_min_pulse_time(seconds)?;
        info!("Minimum pulse time set to {seconds}s");
        Ok(())
    }

    /// Current gains.
    pub fn gains(&self) -> ControllerGains {
        lock(&self.inner.state).controller.gains()
    }

    /// Measure gyro bias over `duration_s` seconds with the motor stopped.
    ///
    /// Blocks for the duration, which may not exceed
    /// `sensor.max_calibration_s`. A successful run clears any latched fault; a
    /// run interrupted by a read failure leaves a zero bias installed. A run
    /// cancelled by [`shutdown`](Self::shutdown) keeps the previous bias and
    /// returns [`AdcsError::ShutDown`].
    pub fn calibrate_gyro(&self, duration_s: f64) -> AdcsResult<CalibrationState> {
        ConfigError::require_positive("duration", duration_s)?;
        let max_duration = self.inner.config.sensor.max_calibration_s;
        ConfigError::require_range("duration", duration_s, 0.0, max_duration)?;
        if !self.is_running() {
            return Err(AdcsError::ShutDown);
        }
        let interval = self.inner.config.sensor.calibration_sample_interval();
        let step = interval.max(Duration::from_millis(1)).as_secs_f64();
        let sample_count = ((duration_s / step).round() as usize).max(1);

        {
            let mut state = lock(&self.inner.state);
            if state.calibrating {
                return Err(AdcsError::CalibrationInProgress);
            }
            state.calibrating = true;
            state.override_epoch += 1;
        }
        self.inner.actuate(ActuatorCommand::Stop, None);

        let calibration = lock(&self.inner.sensor).calibrate_bias_until(
            sample_count,
            interval,
            &self.inner.shutting_down,
        );

        let mut state = lock(&self.inner.state);
        state.calibrating = false;
        let Some(calibration) = calibration else {
            state.controller.reset_history();
            return Err(AdcsError::ShutDown);
        };
        state.calibration = calibration;
        if calibration.sample_count > 0 {
            state.controller.clear_fault();
        } else {
            warn!("Gyro calibration did not complete");
            state.controller.reset_history();
        }
        Ok(calibration)
    }

    /// Install a manually measured gyro bias.
    pub fn set_gyro_bias(&self, bias: AngularRate) -> AdcsResult<()> {
        for value in bias.as_array() {
            ConfigError::require_finite("gyro_bias", value)?;
        }
        if lock(&self.inner.state).calibrating {
            return Err(AdcsError::CalibrationInProgress);
        }
        let calibration = CalibrationState {
            gyro_bias: bias,
            sample_count: 0,
        };
        lock(&self.inner.sensor).set_calibration(calibration);
        lock(&self.inner.state).calibration = calibration;
        Ok(())
    }

    /// Take the current orientation as yaw 0. Clears any fault.
    pub fn zero_yaw(&self) {
        let mut state = lock(&self.inner.state);
        state.estimator.zero();
        state.controller.clear_fault();
        info!("Yaw zeroed");
    }

    /// Select the yaw feed used by the controller.
    pub fn set_control_feed(&self, feed: ControlFeed) {
        let mut state = lock(&self.inner.state);
        if state.feed != feed {
            state.feed = feed;
            state.controller.reset_history();
            info!("Control feed set to {feed}");
        }
    }

    /// Clear a latched fault.
    pub fn clear_fault(&self) {
        lock(&self.inner.state).controller.clear_fault();
    }

    /// Consistent snapshot of estimate, target, gains and fault.
    pub fn latest_data(&self) -> Telemetry {
        let state = lock(&self.inner.state);
        let estimate = state.estimator.estimate();
        let controller = &state.controller;
        let current = estimate.yaw(state.feed);
        let fault = controller.fault().cloned();

        Telemetry {
            yaw_filtered: estimate.yaw_filtered,
            yaw_pure: estimate.yaw_pure,
            target_yaw: controller.target(),
            error: normalize_angle(controller.target() - current),
            gains: controller.gains(),
            motor_command: state.motor_command,
            status: status_line(fault.as_ref(), state.calibrating),
            fault,
            roll: estimate.roll,
            pitch: estimate.pitch,
            gyro_rate: state.reading.map(|r| r.rate).unwrap_or_default(),
            temperature_c: state.reading.and_then(|r| r.temperature_c),
            control_feed: state.feed,
            controller_state: controller.state(),
            calibrating: state.calibrating,
            sensor_stale: state.reading.map_or(true, |r| r.stale),
            calibration: state.calibration,
            timestamp: estimate.timestamp,
        }
    }

    /// Stop both loops, then stop and disable the motor. Cancels a gyro
    /// calibration running on another thread.
    pub fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::Release);
        if let Some(stop_tx) = lock(&self.stop_tx).take() {
            info!("Shutting down ADCS loops");
            drop(stop_tx);
        }

        let handles: Vec<_> = lock(&self.loops).drain(..).collect();
        for handle in handles {
            let name = handle.thread().name().unwrap_or("adcs").to_string();
            if handle.join().is_err() {
                error!("{name} thread panicked");
            } else {
                debug!("{name} thread joined");
            }
        }

        {
            let mut state = lock(&self.inner.state);
            state.controller.stop();
            state.override_epoch += 1;
        }
        if let Err(e) = self.inner.stop_and_disable_motor() {
            error!("Failed to de-energize motor during shutdown: {e}");
        }
    }
}

impl Drop for AdcsController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
