//! Host event line protocol
//!
//! The service stands in for the cycling computer: each input line is one
//! JSON host event, applied to a [`LoopbackHost`] as if the platform had
//! pushed it.
//!
//! ```text
//! {"event":"ride","state":"recording"}
//! {"event":"threat","level":2}
//! {"event":"radar","state":{"state":"searching"}}
//! {"event":"data","data_type_id":"speed","state":{"state":"idle"}}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.
//!
//! Ride state and radar pushes travel on separate subscriptions, so the
//! engine may see them in either order. When an alert event receiver is
//! supplied, each ride line waits for the engine to report the new ride
//! state before the next line is applied.

use std::time::Duration;

use kxradar_common::alert::AlertEvent;
use kxradar_common::host::{LoopbackHost, RideState, StreamState, RADAR_DATA_TYPE};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

/// Longest wait for the engine to acknowledge a ride state change
const RIDE_ACK_TIMEOUT: Duration = Duration::from_secs(2);

/// One line of input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    /// Ride state change
    Ride { state: RideState },
    /// Radar stream state
    Radar { state: StreamState },
    /// Shorthand for a streaming radar reading at `level`
    Threat { level: u32 },
    /// Any other data stream
    Data {
        data_type_id: String,
        state: StreamState,
    },
}

impl HostEvent {
    /// Push this event into `host`
    pub fn apply(self, host: &LoopbackHost) {
        match self {
            HostEvent::Ride { state } => host.push_ride_state(state),
            HostEvent::Radar { state } => host.push_data(RADAR_DATA_TYPE, state),
            HostEvent::Threat { level } => {
                host.push_data(RADAR_DATA_TYPE, StreamState::radar_threat_level(level))
            }
            HostEvent::Data {
                data_type_id,
                state,
            } => host.push_data(&data_type_id, state),
        }
    }
}

/// Malformed input line
#[derive(Error, Debug)]
#[error("line {line}: {source}")]
pub struct InputError {
    pub line: usize,
    #[source]
    pub source: serde_json::Error,
}

/// Parse one input line; `Ok(None)` for blank and comment lines
pub fn parse_line(line_no: usize, line: &str) -> Result<Option<HostEvent>, InputError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|source| InputError {
            line: line_no,
            source,
        })
}

/// Counters for one input session
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FeedStats {
    pub applied: usize,
    pub rejected: usize,
}

/// Apply every event from `reader` to `host` until end of input
///
/// Bad lines are logged and skipped. With `ride_acks`, ride lines are held
/// until the matching `RideStateChanged` event arrives (or a timeout).
pub async fn feed_events<R>(
    reader: R,
    host: &LoopbackHost,
    mut ride_acks: Option<broadcast::Receiver<AlertEvent>>,
) -> std::io::Result<FeedStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut stats = FeedStats::default();
    let mut line_no = 0;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        match parse_line(line_no, &line) {
            Ok(Some(event)) => {
                debug!("Host event: {:?}", event);
                let ride = match &event {
                    HostEvent::Ride { state } => Some(*state),
                    _ => None,
                };
                event.apply(host);
                stats.applied += 1;

                match (ride, ride_acks.as_mut()) {
                    (Some(state), Some(acks)) => {
                        let acked =
                            tokio::time::timeout(RIDE_ACK_TIMEOUT, wait_for_ride_ack(acks, state))
                                .await;
                        match acked {
                            Ok(true) => {}
                            Ok(false) => {
                                warn!("Alert event bus closed, no longer waiting for ride acks");
                                ride_acks = None;
                            }
                            Err(_) => warn!("Ride state {} not acknowledged in time", state),
                        }
                    }
                    // Let subscribers drain before the next push
                    _ => tokio::task::yield_now().await,
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Ignoring host event {}", e);
                stats.rejected += 1;
            }
        }
    }

    Ok(stats)
}

/// Wait for the engine to report `expected`; `false` if the bus closed
async fn wait_for_ride_ack(acks: &mut broadcast::Receiver<AlertEvent>, expected: RideState) -> bool {
    loop {
        match acks.recv().await {
            Ok(AlertEvent::RideStateChanged { state, .. }) if state == expected => return true,
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => debug!("Ride ack receiver skipped {} events", skipped),
            Err(RecvError::Closed) => return false,
        }
    }
}
