//! In-process host
//!
//! Keeps a listener registry and a log of dispatched tone sequences. Events
//! are injected with [`LoopbackHost::push_ride_state`] and
//! [`LoopbackHost::push_data`], which invoke listeners synchronously on the
//! caller's thread, the same way the platform calls back on its own thread.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use super::types::{ListenerId, RideState, StreamState};
use super::{Callback, RadarHost, ToneSink};
use crate::error::StreamError;
use crate::tones::ToneSequence;

type Shared<T> = Arc<dyn Fn(T) + Send + Sync>;

enum Consumer {
    Ride(Shared<RideState>),
    Data {
        data_type_id: String,
        callback: Shared<StreamState>,
    },
}

/// Host implementation living in the same process as its consumers
pub struct LoopbackHost {
    consumers: Mutex<HashMap<ListenerId, Consumer>>,
    dispatched: Mutex<Vec<ToneSequence>>,
    registrations: AtomicUsize,
    removals: AtomicUsize,
    reject_registrations: AtomicBool,
    registration_limit: AtomicUsize,
}

impl Default for LoopbackHost {
    fn default() -> Self {
        Self {
            consumers: Mutex::default(),
            dispatched: Mutex::default(),
            registrations: AtomicUsize::new(0),
            removals: AtomicUsize::new(0),
            reject_registrations: AtomicBool::new(false),
            registration_limit: AtomicUsize::new(usize::MAX),
        }
    }
}

impl LoopbackHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent registrations fail
    pub fn set_reject_registrations(&self, reject: bool) {
        self.reject_registrations.store(reject, Ordering::SeqCst);
    }

    /// Accept only `limit` successful registrations in total; later ones fail
    pub fn set_registration_limit(&self, limit: usize) {
        self.registration_limit.store(limit, Ordering::SeqCst);
    }

    /// Deliver a ride state to every ride listener
    pub fn push_ride_state(&self, state: RideState) {
        let listeners: Vec<Shared<RideState>> = self
            .lock_consumers()
            .values()
            .filter_map(|c| match c {
                Consumer::Ride(cb) => Some(Arc::clone(cb)),
                Consumer::Data { .. } => None,
            })
            .collect();
        debug!("Pushing ride state {} to {} listeners", state, listeners.len());
        for listener in listeners {
            listener(state);
        }
    }

    /// Deliver a stream state to every listener of `data_type_id`
    pub fn push_data(&self, data_type_id: &str, state: StreamState) {
        let listeners: Vec<Shared<StreamState>> = self
            .lock_consumers()
            .values()
            .filter_map(|c| match c {
                Consumer::Data {
                    data_type_id: id,
                    callback,
                } if id == data_type_id => Some(Arc::clone(callback)),
                _ => None,
            })
            .collect();
        for listener in listeners {
            listener(state.clone());
        }
    }

    /// Currently registered listeners
    pub fn consumer_count(&self) -> usize {
        self.lock_consumers().len()
    }

    /// Successful registrations since creation
    pub fn registration_count(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    /// Successful removals since creation
    pub fn removal_count(&self) -> usize {
        self.removals.load(Ordering::SeqCst)
    }

    /// Tone sequences dispatched so far, oldest first
    pub fn dispatched(&self) -> Vec<ToneSequence> {
        self.dispatched
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn lock_consumers(&self) -> std::sync::MutexGuard<'_, HashMap<ListenerId, Consumer>> {
        self.consumers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register(&self, name: &str, consumer: Consumer) -> Result<ListenerId, StreamError> {
        let at_limit = self.registrations.load(Ordering::SeqCst)
            >= self.registration_limit.load(Ordering::SeqCst);
        if self.reject_registrations.load(Ordering::SeqCst) || at_limit {
            return Err(StreamError::Registration {
                source_name: name.to_string(),
                reason: "host rejected consumer".to_string(),
            });
        }
        let id = ListenerId::new();
        self.lock_consumers().insert(id, consumer);
        self.registrations.fetch_add(1, Ordering::SeqCst);
        debug!("Registered {} consumer {}", name, id);
        Ok(id)
    }
}

impl ToneSink for LoopbackHost {
    fn play(&self, tones: ToneSequence) {
        info!(
            "Beep pattern: {} segments, {} ms",
            tones.len(),
            tones.total_duration_ms()
        );
        self.dispatched
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(tones);
    }
}

impl RadarHost for LoopbackHost {
    fn add_ride_state_consumer(
        &self,
        callback: Callback<RideState>,
    ) -> Result<ListenerId, StreamError> {
        self.register("ride_state", Consumer::Ride(Arc::from(callback)))
    }

    fn add_data_consumer(
        &self,
        data_type_id: &str,
        callback: Callback<StreamState>,
    ) -> Result<ListenerId, StreamError> {
        self.register(
            data_type_id,
            Consumer::Data {
                data_type_id: data_type_id.to_string(),
                callback: Arc::from(callback),
            },
        )
    }

    fn remove_consumer(&self, id: ListenerId) {
        if self.lock_consumers().remove(&id).is_some() {
            self.removals.fetch_add(1, Ordering::SeqCst);
            debug!("Removed consumer {}", id);
        } else {
            warn!("Attempted to remove unknown consumer {}", id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tones::Tone;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_push_reaches_matching_consumers_only() {
        let host = LoopbackHost::new();
        let radar_hits = Arc::new(AtomicU32::new(0));
        let other_hits = Arc::new(AtomicU32::new(0));

        let hits = Arc::clone(&radar_hits);
        host.add_data_consumer("radar", Box::new(move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
        let hits = Arc::clone(&other_hits);
        host.add_data_consumer("speed", Box::new(move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

        host.push_data("radar", StreamState::Searching);
        assert_eq!(radar_hits.load(Ordering::SeqCst), 1);
        assert_eq!(other_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_remove_consumer_stops_delivery() {
        let host = LoopbackHost::new();
        let hits = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&hits);
        let id = host
            .add_ride_state_consumer(Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        host.push_ride_state(RideState::Recording);
        host.remove_consumer(id);
        host.push_ride_state(RideState::Idle);
        host.remove_consumer(id);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(host.registration_count(), 1);
        assert_eq!(host.removal_count(), 1);
        assert_eq!(host.consumer_count(), 0);
    }

    #[test]
    fn test_rejected_registration() {
        let host = LoopbackHost::new();
        host.set_reject_registrations(true);
        let result = host.add_ride_state_consumer(Box::new(|_| {}));
        assert!(matches!(result, Err(StreamError::Registration { .. })));
        assert_eq!(host.consumer_count(), 0);
    }

    #[test]
    fn test_registration_limit() {
        let host = LoopbackHost::new();
        host.set_registration_limit(1);
        assert!(host.add_ride_state_consumer(Box::new(|_| {})).is_ok());
        let result = host.add_data_consumer("radar", Box::new(|_| {}));
        assert!(matches!(result, Err(StreamError::Registration { .. })));
        assert_eq!(host.registration_count(), 1);
        assert_eq!(host.consumer_count(), 1);
    }

    #[test]
    fn test_dispatch_log() {
        let host = LoopbackHost::new();
        host.play(ToneSequence::new(vec![Tone::audible(100, 10)]));
        assert_eq!(host.dispatched().len(), 1);
    }
}
