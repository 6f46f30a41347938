//! End-to-end tests of the ADCS loops against simulated hardware.

use std::thread;
use std::time::{Duration, Instant};

use adcs::{
    AdcsCommand, AdcsConfig, AdcsController, AdcsError, ConfigError, ControlFeed,
    ControllerState, Fault, Telemetry,
};
use approx::assert_abs_diff_eq;
use hardware::imu::AngularRate;
use hardware::motor::ActuatorCommand;
use hardware::sim::{FailureInjector, MotorEvent, MotorLog, SimPlant, SimulatedImu, SimulatedMotor};

/// Fast loops so tests finish quickly.
fn test_config() -> AdcsConfig {
    let mut config = AdcsConfig::default();
    config.loops.sensing_period_ms = 5;
    config.loops.control_period_ms = 10;
    config.controller.kd = 0.0;
    config.controller.min_pulse_time_s = 0.05;
    config.sensor.reconnect_interval_ticks = 2;
    config.sensor.calibration_sample_interval_ms = 1;
    config
}

struct Rig {
    adcs: AdcsController,
    plant: SimPlant,
    log: MotorLog,
    failures: FailureInjector,
}

fn rig_with(slew_rate_dps: f64, bias: AngularRate, config: AdcsConfig) -> Rig {
    let plant = SimPlant::new(slew_rate_dps);
    let imu = SimulatedImu::new(plant.clone()).with_bias(bias);
    let failures = imu.failure_injector();
    let motor = SimulatedMotor::with_plant(plant.clone());
    let log = motor.log();
    let adcs = AdcsController::spawn(imu, motor, config).unwrap();
    Rig {
        adcs,
        plant,
        log,
        failures,
    }
}

fn rig(slew_rate_dps: f64) -> Rig {
    rig_with(slew_rate_dps, AngularRate::default(), test_config())
}

/// Poll telemetry until `done` holds or `timeout` passes.
fn wait_for(
    adcs: &AdcsController,
    timeout: Duration,
    done: impl Fn(&Telemetry) -> bool,
) -> Telemetry {
    let start = Instant::now();
    loop {
        let telemetry = adcs.latest_data();
        if done(&telemetry) || start.elapsed() > timeout {
            return telemetry;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

fn ends_with_stop_and_disable(events: &[MotorEvent]) -> bool {
    events.ends_with(&[MotorEvent::Stop, MotorEvent::Disable])
}

#[test]
fn test_shutdown_from_idle_stops_motor() {
    let rig = rig(20.0);
    thread::sleep(Duration::from_millis(30));
    rig.adcs.shutdown();

    assert!(!rig.adcs.is_running());
    assert!(ends_with_stop_and_disable(&rig.log.events()));
}

#[test]
fn test_shutdown_is_repeatable() {
    let rig = rig(20.0);
    rig.adcs.shutdown();
    let stops = rig.log.count(MotorEvent::Stop);

    rig.adcs.shutdown();
    assert_eq!(rig.log.count(MotorEvent::Stop), stops + 1);
    assert!(ends_with_stop_and_disable(&rig.log.events()));
}

#[test]
fn test_shutdown_while_driving_leaves_motor_stopped() {
    let rig = rig(20.0);
    rig.adcs.start(80.0).unwrap();
    let t = wait_for(&rig.adcs, Duration::from_secs(2), |t| {
        t.motor_command == ActuatorCommand::Clockwise
    });
    assert_eq!(t.motor_command, ActuatorCommand::Clockwise);

    rig.adcs.shutdown();
    assert!(ends_with_stop_and_disable(&rig.log.events()));
    assert_eq!(rig.plant.rate_dps(), 0.0);

    let t = rig.adcs.latest_data();
    assert_eq!(t.motor_command, ActuatorCommand::Stop);
    assert_eq!(t.controller_state, ControllerState::Idle);
}

#[test]
fn test_drop_shuts_down() {
    let rig = rig(20.0);
    let log = rig.log.clone();
    drop(rig);
    assert!(ends_with_stop_and_disable(&log.events()));
}

#[test]
fn test_start_after_shutdown_is_rejected() {
    let rig = rig(20.0);
    rig.adcs.shutdown();
    assert!(matches!(rig.adcs.start(10.0), Err(AdcsError::ShutDown)));
}

#[test]
fn test_closed_loop_reaches_target() {
    let rig = rig(20.0);
    rig.adcs.start(30.0).unwrap();
    assert!(rig.log.events().contains(&MotorEvent::Enable));

    let t = wait_for(&rig.adcs, Duration::from_secs(10), |t| {
        t.motor_command == ActuatorCommand::Stop && t.error.abs() < t.gains.deadband
    });
    assert!(t.error.abs() < t.gains.deadband, "did not settle: {t:?}");
    assert!(t.fault.is_none());
    assert!(rig.log.count(MotorEvent::Clockwise) >= 1);
    assert_abs_diff_eq!(rig.plant.yaw_deg(), 30.0, epsilon = 3.0);
    assert_abs_diff_eq!(t.yaw_pure, rig.plant.yaw_deg(), epsilon = 3.0);
}

#[test]
fn test_disturbance_past_safety_bound_faults_and_zero_clears() {
    let rig = rig(10.0);
    rig.adcs.start(0.0).unwrap();
    thread::sleep(Duration::from_millis(50));

    rig.plant.set_disturbance_dps(600.0);
    let t = wait_for(&rig.adcs, Duration::from_secs(5), |t| t.fault.is_some());
    assert!(matches!(t.fault, Some(Fault::Safety { .. })), "{t:?}");
    assert!(t.status.starts_with("Fault:"));

    let t = wait_for(&rig.adcs, Duration::from_secs(1), |t| {
        t.motor_command == ActuatorCommand::Stop
    });
    assert_eq!(t.motor_command, ActuatorCommand::Stop);

    rig.plant.set_disturbance_dps(0.0);
    rig.adcs.zero_yaw();
    let t = rig.adcs.latest_data();
    assert!(t.fault.is_none());
    assert_eq!(t.status, "Nominal");
    assert_abs_diff_eq!(t.yaw_pure, 0.0, epsilon = 5.0);
}

#[test]
fn test_sensor_failures_escalate_and_recover() {
    let rig = rig(20.0);
    rig.adcs.start(45.0).unwrap();
    wait_for(&rig.adcs, Duration::from_secs(2), |t| {
        t.motor_command == ActuatorCommand::Clockwise
    });

    rig.failures.fail_next(usize::MAX);
    let t = wait_for(&rig.adcs, Duration::from_secs(5), |t| t.fault.is_some());
    assert!(matches!(t.fault, Some(Fault::Hardware { .. })), "{t:?}");
    assert!(t.sensor_stale);

    let t = wait_for(&rig.adcs, Duration::from_secs(1), |t| {
        t.motor_command == ActuatorCommand::Stop
    });
    assert_eq!(t.motor_command, ActuatorCommand::Stop);

    // Device comes back; the fault stays latched until cleared.
    rig.failures.fail_next(0);
    let t = wait_for(&rig.adcs, Duration::from_secs(5), |t| !t.sensor_stale);
    assert!(!t.sensor_stale);
    assert!(t.fault.is_some());

    rig.adcs.clear_fault();
    assert!(rig.adcs.latest_data().fault.is_none());
}

#[test]
fn test_calibration_measures_bias() {
    let bias = AngularRate::new(0.3, -0.2, 0.5);
    let rig = rig_with(20.0, bias, test_config());

    let t = wait_for(&rig.adcs, Duration::from_secs(2), |t| !t.sensor_stale);
    assert_abs_diff_eq!(t.gyro_rate.z, 0.5, epsilon = 1e-9);

    let calibration = rig.adcs.calibrate_gyro(0.05).unwrap();
    assert_eq!(calibration.sample_count, 50);
    assert_abs_diff_eq!(calibration.gyro_bias.x, 0.3, epsilon = 1e-9);
    assert_abs_diff_eq!(calibration.gyro_bias.y, -0.2, epsilon = 1e-9);
    assert_abs_diff_eq!(calibration.gyro_bias.z, 0.5, epsilon = 1e-9);

    let t = wait_for(&rig.adcs, Duration::from_secs(2), |t| {
        t.gyro_rate.z.abs() < 1e-9
    });
    assert_abs_diff_eq!(t.gyro_rate.z, 0.0, epsilon = 1e-9);
    assert_eq!(t.calibration, calibration);
    assert!(!t.calibrating);
}

#[test]
fn test_calibration_longer_than_limit_is_rejected() {
    let rig = rig(20.0);
    let previous = rig.adcs.latest_data().calibration;

    let started = Instant::now();
    let result = rig.adcs.calibrate_gyro(1e12);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(matches!(
        result,
        Err(AdcsError::Config(ConfigError::OutOfRange {
            name: "duration",
            ..
        }))
    ));

    let t = rig.adcs.latest_data();
    assert!(!t.calibrating);
    assert_eq!(t.calibration, previous);

    let response = rig.adcs.execute(AdcsCommand::CalibrateGyro(61.0));
    assert!(!response.is_ok());
}

#[test]
fn test_shutdown_cancels_running_calibration() {
    let mut config = test_config();
    config.sensor.max_calibration_s = 30.0;
    let rig = rig_with(20.0, AngularRate::new(0.0, 0.0, 0.5), config);
    let started = Instant::now();

    let result = thread::scope(|s| {
        let run = s.spawn(|| rig.adcs.calibrate_gyro(20.0));
        wait_for(&rig.adcs, Duration::from_secs(2), |t| t.calibrating);
        rig.adcs.shutdown();
        run.join().unwrap()
    });

    assert!(matches!(result, Err(AdcsError::ShutDown)));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!rig.adcs.latest_data().calibrating);
    assert!(ends_with_stop_and_disable(&rig.log.events()));
    assert!(matches!(rig.adcs.calibrate_gyro(1.0), Err(AdcsError::ShutDown)));
}

#[test]
fn test_manual_bias_applies_atomically() {
    let rig = rig_with(20.0, AngularRate::new(1.0, 2.0, 3.0), test_config());
    rig.adcs
        .set_gyro_bias(AngularRate::new(1.0, 2.0, 3.0))
        .unwrap();
    let t = wait_for(&rig.adcs, Duration::from_secs(2), |t| {
        !t.sensor_stale && t.gyro_rate == AngularRate::default()
    });
    assert_eq!(t.gyro_rate, AngularRate::default());
    assert_eq!(t.calibration.sample_count, 0);

    assert!(rig
        .adcs
        .set_gyro_bias(AngularRate::new(f64::NAN, 0.0, 0.0))
        .is_err());
    assert_eq!(rig.adcs.latest_data().calibration.gyro_bias.z, 3.0);
}

#[test]
fn test_json_commands() {
    let rig = rig(20.0);

    let response = rig
        .adcs
        .execute_json(r#"{"command":"set_gains","value":{"kp":3.0,"kd":0.25}}"#);
    assert!(response.is_ok(), "{response:?}");
    assert_eq!(rig.adcs.gains().kp, 3.0);

    let response = rig
        .adcs
        .execute_json(r#"{"command":"set_deadband","value":-1}"#);
    assert!(!response.is_ok());
    assert_eq!(rig.adcs.gains().deadband, 1.0);

    let response = rig.adcs.execute_json(r#"{"command":"warp_drive"}"#);
    assert!(!response.is_ok());
    let response = rig.adcs.execute_json("{not json");
    assert!(!response.is_ok());

    let response = rig
        .adcs
        .execute(AdcsCommand::SetControlFeed(ControlFeed::Filtered));
    assert!(response.is_ok());

    let response = rig.adcs.execute(AdcsCommand::GetLatestData);
    let data = response.data.expect("telemetry payload");
    assert_eq!(data["control_feed"], "filtered");
    assert_eq!(data["gains"]["kd"], 0.25);
    assert!(data.get("yaw_pure").is_some());
}

#[test]
fn test_text_commands() {
    let rig = rig(20.0);
    assert!(rig.adcs.execute_text("set 12.5").is_ok());
    assert_eq!(rig.adcs.latest_data().target_yaw, 12.5);
    assert_eq!(
        rig.adcs.latest_data().controller_state,
        ControllerState::Idle
    );

    assert!(rig.adcs.execute_text("start 5").is_ok());
    assert_eq!(
        rig.adcs.latest_data().controller_state,
        ControllerState::Tracking
    );
    assert!(rig.adcs.execute_text("stop").is_ok());
    assert!(rig.log.events().ends_with(&[MotorEvent::Stop, MotorEvent::Disable]));

    assert!(!rig.adcs.execute_text("gains 1").is_ok());
    assert!(!rig.adcs.execute_text("calibrate -1").is_ok());
}

#[test]
fn test_invalid_config_is_rejected() {
    let mut config = test_config();
    config.estimator.alpha = 2.0;
    let plant = SimPlant::default();
    let result = AdcsController::spawn(
        SimulatedImu::new(plant.clone()),
        SimulatedMotor::with_plant(plant),
        config,
    );
    assert!(matches!(result, Err(AdcsError::Config(_))));
}

#[test]
fn test_sensor_init_failure_starts_faulted_and_reconnects() {
    let plant = SimPlant::default();
    let imu = SimulatedImu::new(plant.clone());
    imu.failure_injector().fail_next(1);
    let adcs =
        AdcsController::spawn(imu, SimulatedMotor::with_plant(plant), test_config()).unwrap();

    assert!(matches!(
        adcs.latest_data().fault,
        Some(Fault::Hardware { .. })
    ));
    let t = wait_for(&adcs, Duration::from_secs(2), |t| !t.sensor_stale);
    assert!(!t.sensor_stale);
}
