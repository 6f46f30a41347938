//! Telemetry fan-out for streaming clients.
//!
//! The control loops never push telemetry anywhere. A publisher task pulls a
//! snapshot from the [`AdcsController`] at a fixed rate and broadcasts it to
//! every connected client. Slow clients that fall behind skip snapshots and
//! pick up from the newest one.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use adcs::{AdcsController, Telemetry};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, info};

/// Default publish period (20 Hz).
pub const DEFAULT_PUBLISH_PERIOD: Duration = Duration::from_millis(50);

/// Fastest accepted publish rate.
pub const MAX_PUBLISH_RATE_HZ: f64 = 1000.0;

/// Shortest period the publisher will tick at.
const MIN_PUBLISH_PERIOD: Duration = Duration::from_millis(1);

/// SSE event name carried by every snapshot.
pub const TELEMETRY_EVENT: &str = "telemetry";

/// Broadcaster for telemetry snapshots to multiple HTTP clients.
pub struct TelemetryBroadcaster {
    tx: broadcast::Sender<Telemetry>,
}

impl TelemetryBroadcaster {
    /// Create a broadcaster buffering up to `capacity` snapshots per client.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish a snapshot to all subscribers.
    ///
    /// Returns the number of active subscribers, or 0 if none.
    pub fn publish(&self, telemetry: Telemetry) -> usize {
        self.tx.send(telemetry).unwrap_or(0)
    }

    /// Create a subscriber that receives snapshots from this broadcaster.
    pub fn subscribe(&self) -> TelemetrySubscriber {
        TelemetrySubscriber {
            rx: self.tx.subscribe(),
        }
    }

    /// Get the current number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for TelemetryBroadcaster {
    fn default() -> Self {
        Self::new(8)
    }
}

/// A subscriber to the telemetry stream.
pub struct TelemetrySubscriber {
    rx: broadcast::Receiver<Telemetry>,
}

impl TelemetrySubscriber {
    /// Wait for the next snapshot. `None` once the broadcaster is gone.
    pub async fn next(&mut self) -> Option<Telemetry> {
        loop {
            match self.rx.recv().await {
                Ok(telemetry) => return Some(telemetry),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Telemetry subscriber lagged, skipped {skipped} snapshots");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Convert this subscriber into a server-sent-events response, one JSON
    /// snapshot per event.
    pub fn into_sse(self) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
        let stream = BroadcastStream::new(self.rx).filter_map(|result| match result {
            Ok(telemetry) => Event::default()
                .event(TELEMETRY_EVENT)
                .json_data(&telemetry)
                .ok()
                .map(Ok::<_, Infallible>),
            // Lagged or closed: drop the gap and keep streaming
            Err(_) => None,
        });

        Sse::new(stream).keep_alive(KeepAlive::default())
    }
}

/// Publish period for a rate in Hz, or `None` unless `0 < rate_hz <=`
/// [`MAX_PUBLISH_RATE_HZ`].
pub fn publish_period(rate_hz: f64) -> Option<Duration> {
    if rate_hz.is_finite() && rate_hz > 0.0 && rate_hz <= MAX_PUBLISH_RATE_HZ {
        Some(Duration::from_secs_f64(1.0 / rate_hz))
    } else {
        None
    }
}

/// Pull a snapshot every `period` and publish it while anyone is listening.
///
/// Periods under 1 ms are raised to 1 ms. The task ends once the controller
/// has shut down.
pub fn spawn_publisher(
    adcs: Arc<AdcsController>,
    broadcaster: Arc<TelemetryBroadcaster>,
    period: Duration,
) -> JoinHandle<()> {
    let period = period.max(MIN_PUBLISH_PERIOD);
    tokio::spawn(async move {
        info!(
            "Telemetry publisher running at {:.1} Hz",
            1.0 / period.as_secs_f64()
        );
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        while adcs.is_running() {
            interval.tick().await;
            if broadcaster.subscriber_count() > 0 {
                broadcaster.publish(adcs.latest_data());
            }
        }
        info!("Telemetry publisher stopped");
    })
}
