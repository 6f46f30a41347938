//! HTTP command and telemetry endpoints.
//!
//! | Route               | Method | Body                               |
//! |---------------------|--------|------------------------------------|
//! | `/command`          | POST   | `{"command": ..., "value": ...}`   |
//! | `/telemetry`        | GET    | latest snapshot                    |
//! | `/telemetry/events` | GET    | server-sent events, one per tick   |
//! | `/health`           | GET    | `ok`                               |
//!
//! Command failures of any kind, including unparseable bodies, come back as
//! HTTP 200 with `{"status": "error", ...}`.

use std::convert::Infallible;
use std::sync::Arc;

use adcs::{AdcsCommand, AdcsController, CommandResponse, Telemetry};
use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::publisher::TelemetryBroadcaster;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Controller every command is executed against
    pub adcs: Arc<AdcsController>,
    /// Fan-out feeding `/telemetry/events`; the publisher task pushes into it
    pub telemetry: Arc<TelemetryBroadcaster>,
}

impl AppState {
    /// State around `adcs` with a fresh broadcaster. Nothing is streamed
    /// until a publisher is spawned on [`AppState::telemetry`].
    pub fn new(adcs: Arc<AdcsController>) -> Self {
        Self {
            adcs,
            telemetry: Arc::new(TelemetryBroadcaster::default()),
        }
    }
}

/// Build the router for all endpoints.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/command", post(command_handler))
        .route("/telemetry", get(telemetry_handler))
        .route("/telemetry/events", get(telemetry_events_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Parse and run one command.
///
/// The body is taken as raw text so malformed JSON is reported in the
/// command response rather than as an extractor rejection. Commands that block
/// or drive the motor run on the blocking pool so GPIO and bus I/O stays off
/// the async workers.
pub async fn command_handler(State(state): State<AppState>, body: String) -> Json<CommandResponse> {
    let command = match serde_json::from_str::<AdcsCommand>(&body) {
        Ok(command) => command,
        Err(e) => {
            warn!("Rejected malformed command {body:?}: {e}");
            return Json(CommandResponse::error(format!("Invalid command: {e}")));
        }
    };

    if !(command.is_blocking() || command.touches_motor()) {
        return Json(state.adcs.execute(command));
    }

    let adcs = state.adcs.clone();
    let name = command.name();
    match tokio::task::spawn_blocking(move || adcs.execute(command)).await {
        Ok(response) => Json(response),
        Err(e) => {
            warn!("Command {name} worker failed: {e}");
            Json(CommandResponse::error(format!("Command {name} failed: {e}")))
        }
    }
}

/// Latest telemetry snapshot.
pub async fn telemetry_handler(State(state): State<AppState>) -> Json<Telemetry> {
    Json(state.adcs.latest_data())
}

/// Telemetry stream fed by the publisher task.
pub async fn telemetry_events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(
        "Telemetry stream client connected ({} total)",
        state.telemetry.subscriber_count() + 1
    );
    state.telemetry.subscribe().into_sse()
}

/// Liveness check; answers while the HTTP server is up.
pub async fn health_handler() -> &'static str {
    "ok"
}

/// Serve until the listener fails.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("ADCS server listening on http://{addr}");
    }
    axum::serve(listener, router(state)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use adcs::{AdcsConfig, CommandStatus, ControllerState};
    use approx::assert_abs_diff_eq;
    use hardware::imu::AngularRate;
    use hardware::motor::ActuatorCommand;
    use hardware::sim::{SimPlant, SimulatedImu, SimulatedMotor};

    fn state() -> AppState {
        let mut config = AdcsConfig::default();
        config.loops.sensing_period_ms = 5;
        config.loops.control_period_ms = 10;
        config.sensor.calibration_sample_interval_ms = 1;

        let plant = SimPlant::stationary();
        let imu = SimulatedImu::new(plant.clone()).with_bias(AngularRate::new(0.0, 0.0, 0.4));
        let adcs =
            AdcsController::spawn(imu, SimulatedMotor::with_plant(plant), config).unwrap();
        AppState::new(Arc::new(adcs))
    }

    async fn post(state: &AppState, body: &str) -> CommandResponse {
        let Json(response) = command_handler(State(state.clone()), body.to_string()).await;
        response
    }

    #[tokio::test]
    async fn test_health() {
        assert_eq!(health_handler().await, "ok");
    }

    #[tokio::test]
    async fn test_set_target_then_read_telemetry() {
        let state = state();
        let response = post(&state, r#"{"command":"set_target_yaw","value":45.0}"#).await;
        assert_eq!(response.status, CommandStatus::Ok);

        let Json(telemetry) = telemetry_handler(State(state.clone())).await;
        assert_eq!(telemetry.target_yaw, 45.0);
        assert_eq!(telemetry.controller_state, ControllerState::Idle);
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_commands_are_errors() {
        let state = state();
        for body in [
            "",
            "{",
            r#"{"command":"self_destruct"}"#,
            r#"{"command":"set_gains","value":{"kp":1.0}}"#,
        ] {
            let response = post(&state, body).await;
            assert_eq!(response.status, CommandStatus::Error, "{body}");
        }
    }

    #[tokio::test]
    async fn test_rejected_value_reports_error() {
        let state = state();
        let response = post(&state, r#"{"command":"set_min_pulse_time","value":-0.5}"#).await;
        assert_eq!(response.status, CommandStatus::Error);
        assert_eq!(state.adcs.gains().min_pulse_time, 0.2);
    }

    #[tokio::test]
    async fn test_calibration_runs_on_blocking_pool() {
        let state = state();
        let response = post(&state, r#"{"command":"calibrate_gyro","value":0.02}"#).await;
        assert!(response.is_ok(), "{response:?}");

        let data = response.data.unwrap();
        assert_eq!(data["sample_count"], 20);
        let bias_z = data["gyro_bias"]["z"].as_f64().unwrap();
        assert_abs_diff_eq!(bias_z, 0.4, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn test_start_then_stop_leaves_motor_stopped() {
        let state = state();
        let response = post(&state, r#"{"command":"start","value":30.0}"#).await;
        assert!(response.is_ok(), "{response:?}");
        assert_eq!(
            state.adcs.latest_data().controller_state,
            ControllerState::Tracking
        );

        let response = post(&state, r#"{"command":"stop"}"#).await;
        assert!(response.is_ok(), "{response:?}");
        let telemetry = state.adcs.latest_data();
        assert_eq!(telemetry.controller_state, ControllerState::Idle);
        assert_eq!(telemetry.motor_command, ActuatorCommand::Stop);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_motor_commands_work_on_single_threaded_runtime() {
        let state = state();
        for body in [r#"{"command":"start","value":10.0}"#, r#"{"command":"stop"}"#] {
            let response = post(&state, body).await;
            assert!(response.is_ok(), "{body}: {response:?}");
        }
    }

    #[tokio::test]
    async fn test_get_latest_data_command() {
        let state = state();
        let response = post(&state, r#"{"command":"get_latest_data"}"#).await;
        assert!(response.is_ok());
        assert_eq!(response.message, "Nominal");
        assert_eq!(response.data.unwrap()["control_feed"], "pure");
    }
}
