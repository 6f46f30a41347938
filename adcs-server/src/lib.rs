//! Command and telemetry layer for the reaction-wheel ADCS.
//!
//! - [`server`]: axum routes for commands, telemetry snapshots and the
//!   server-sent-events stream
//! - [`publisher`]: pull-based telemetry broadcaster behind the stream
//! - [`hardware_init`]: clap flags that pick real or simulated hardware and
//!   load the configuration

pub mod hardware_init;
pub mod publisher;
pub mod server;

pub use hardware_init::{ConfigArgs, Hardware, HardwareArgs};
pub use publisher::{spawn_publisher, TelemetryBroadcaster, TelemetrySubscriber};
pub use server::{router, serve, AppState};
