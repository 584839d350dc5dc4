//! Host collaborator seams
//!
//! The cycling-computer host is callback based: consumers register a
//! listener, receive pushes on a host thread, and must unregister explicitly.
//! Tone playback is a fire-and-forget dispatch.

mod loopback;
mod types;

pub use loopback::LoopbackHost;
pub use types::{
    DataPoint, ListenerId, RideState, StreamState, RADAR_DATA_TYPE, THREAT_LEVEL_FIELD,
};

use crate::error::StreamError;
use crate::tones::ToneSequence;

/// Listener invoked by the host on its own thread
pub type Callback<T> = Box<dyn Fn(T) + Send + Sync>;

/// Audio dispatch sink
pub trait ToneSink: Send + Sync {
    /// Request playback; no completion is reported
    fn play(&self, tones: ToneSequence);
}

/// Host event sources plus its beeper
pub trait RadarHost: ToneSink {
    /// Register a ride state listener
    fn add_ride_state_consumer(
        &self,
        callback: Callback<RideState>,
    ) -> Result<ListenerId, StreamError>;

    /// Register a listener for the data stream `data_type_id`
    fn add_data_consumer(
        &self,
        data_type_id: &str,
        callback: Callback<StreamState>,
    ) -> Result<ListenerId, StreamError>;

    /// Unregister a listener previously returned by this host
    fn remove_consumer(&self, id: ListenerId);
}
