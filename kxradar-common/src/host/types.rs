//! Host data types
//!
//! Shapes of the values the cycling-computer host pushes to consumers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Data type id of the radar stream
pub const RADAR_DATA_TYPE: &str = "radar";

/// Radar data point field carrying the current threat level (0 = clear)
pub const THREAT_LEVEL_FIELD: &str = "threat_level";

/// Ride recording state reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RideState {
    /// No ride in progress
    Idle,
    /// Ride in progress and recording
    Recording,
    /// Ride in progress, paused (manually or auto-pause)
    Paused,
}

impl std::fmt::Display for RideState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RideState::Idle => write!(f, "Idle"),
            RideState::Recording => write!(f, "Recording"),
            RideState::Paused => write!(f, "Paused"),
        }
    }
}

/// One sample of a host data stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub data_type_id: String,
    #[serde(default)]
    pub values: BTreeMap<String, f64>,
}

impl DataPoint {
    pub fn new(data_type_id: impl Into<String>) -> Self {
        Self {
            data_type_id: data_type_id.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, field: impl Into<String>, value: f64) -> Self {
        self.values.insert(field.into(), value);
        self
    }

    pub fn value(&self, field: &str) -> Option<f64> {
        self.values.get(field).copied()
    }
}

/// State of a host data stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StreamState {
    /// Sensor delivering data
    Streaming { data_point: DataPoint },
    /// Looking for the sensor
    Searching,
    /// Sensor known but not delivering
    Idle,
    /// No sensor of this type
    NotAvailable,
    /// Sensor error
    Error { message: String },
}

impl StreamState {
    pub fn radar_threat_level(level: u32) -> Self {
        StreamState::Streaming {
            data_point: DataPoint::new(RADAR_DATA_TYPE)
                .with_value(THREAT_LEVEL_FIELD, f64::from(level)),
        }
    }

    /// Name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            StreamState::Streaming { .. } => "streaming",
            StreamState::Searching => "searching",
            StreamState::Idle => "idle",
            StreamState::NotAvailable => "not_available",
            StreamState::Error { .. } => "error",
        }
    }
}

/// Handle returned by the host for a registered consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerId(Uuid);

impl ListenerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ride_state_serialization() {
        assert_eq!(serde_json::to_string(&RideState::Recording).unwrap(), r#""recording""#);
        let state: RideState = serde_json::from_str(r#""paused""#).unwrap();
        assert_eq!(state, RideState::Paused);
    }

    #[test]
    fn test_stream_state_serialization() {
        let state = StreamState::radar_threat_level(2);
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(
            json,
            r#"{"state":"streaming","data_point":{"data_type_id":"radar","values":{"threat_level":2.0}}}"#
        );
        let back: StreamState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);

        let err: StreamState =
            serde_json::from_str(r#"{"state":"error","message":"no sensor"}"#).unwrap();
        assert_eq!(err.kind(), "error");
    }

    #[test]
    fn test_listener_ids_unique() {
        assert_ne!(ListenerId::new(), ListenerId::new());
    }
}
