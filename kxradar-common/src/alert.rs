//! Alert engine
//!
//! Runtime side of the radar settings: watches live settings, ride state and
//! radar readings and decides when to beep.
//!
//! - A new threat (level rising from 0) plays the compiled threat rules.
//! - The road clearing (level falling back to 0) plays the all-clear tone if
//!   it is enabled.
//! - Nothing plays while the master switch is off, or outside a recording
//!   ride when `inRideOnly` is set. Suppressed edges are still tracked so they
//!   are not replayed once alerts are allowed again.
//!
//! Decisions are published on an [`AlertBus`] for observers.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::StreamError;
use crate::host::{
    RadarHost, RideState, StreamState, ToneSink, RADAR_DATA_TYPE, THREAT_LEVEL_FIELD,
};
use crate::settings::{self, Configuration};
use crate::store::BlobStore;
use crate::stream::{data_stream, ride_state_stream, settings_stream};
use crate::tones::{compile_alert_tone, compile_threat_rules, ToneSequence};

/// What an alert announces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertKind {
    /// A threat appeared at `level`
    Threat { level: u32 },
    /// The previously tracked threat is gone
    AllClear,
}

/// Why an alert was not played
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressReason {
    /// Master switch off
    Disabled,
    /// `inRideOnly` set and no ride recording
    NotRiding,
}

/// Outcome of a radar update that crossed a threat edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertDecision {
    Play { kind: AlertKind, tones: ToneSequence },
    Suppressed { kind: AlertKind, reason: SuppressReason },
}

/// Threat edge tracker gated by settings and ride state
#[derive(Debug, Clone)]
pub struct AlertEngine {
    settings: Configuration,
    ride_state: RideState,
    threat_level: u32,
}

impl AlertEngine {
    pub fn new(settings: Configuration) -> Self {
        Self {
            settings,
            ride_state: RideState::Idle,
            threat_level: 0,
        }
    }

    pub fn settings(&self) -> &Configuration {
        &self.settings
    }

    pub fn ride_state(&self) -> RideState {
        self.ride_state
    }

    /// Last tracked threat level (0 = clear)
    pub fn threat_level(&self) -> u32 {
        self.threat_level
    }

    pub fn on_settings(&mut self, settings: Configuration) {
        self.settings = settings;
    }

    pub fn on_ride_state(&mut self, state: RideState) {
        self.ride_state = state;
    }

    /// Current gate, `None` when alerts may play
    pub fn suppression(&self) -> Option<SuppressReason> {
        if !self.settings.enabled {
            Some(SuppressReason::Disabled)
        } else if self.settings.in_ride_only && self.ride_state != RideState::Recording {
            Some(SuppressReason::NotRiding)
        } else {
            None
        }
    }

    /// Track a radar update; returns a decision when a threat edge is crossed
    pub fn on_radar(&mut self, state: &StreamState) -> Option<AlertDecision> {
        let Some(level) = threat_level(state) else {
            // Sensor lost or searching: forget the threat without an all-clear
            if self.threat_level > 0 {
                debug!("Radar {}, threat tracking reset", state.kind());
            }
            self.threat_level = 0;
            return None;
        };
        let previous = std::mem::replace(&mut self.threat_level, level);

        let kind = match (previous, level) {
            (0, level) if level > 0 => AlertKind::Threat { level },
            (prev, 0) if prev > 0 && self.settings.all_clear_enabled => AlertKind::AllClear,
            _ => return None,
        };

        if let Some(reason) = self.suppression() {
            return Some(AlertDecision::Suppressed { kind, reason });
        }

        let tones = match kind {
            AlertKind::Threat { .. } => compile_threat_rules(&self.settings.threat_rules),
            AlertKind::AllClear => compile_alert_tone(&self.settings.all_clear_tone),
        };
        Some(AlertDecision::Play { kind, tones })
    }
}

/// Threat level carried by a radar reading, `None` when the state is not a
/// radar reading at all
fn threat_level(state: &StreamState) -> Option<u32> {
    match state {
        StreamState::Streaming { data_point } if data_point.data_type_id == RADAR_DATA_TYPE => {
            Some(
                data_point
                    .value(THREAT_LEVEL_FIELD)
                    .filter(|v| v.is_finite() && *v > 0.0)
                    .map(|v| v.floor() as u32)
                    .unwrap_or(0),
            )
        }
        _ => None,
    }
}

/// Alert engine events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AlertEvent {
    /// Tones were dispatched to the host
    AlertPlayed {
        alert: AlertKind,
        segments: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// An edge was crossed while alerts were gated off
    AlertSuppressed {
        alert: AlertKind,
        reason: SuppressReason,
        timestamp: DateTime<Utc>,
    },

    /// Live settings changed
    SettingsApplied {
        enabled: bool,
        in_ride_only: bool,
        threat_rules: usize,
        timestamp: DateTime<Utc>,
    },

    /// Ride state changed
    RideStateChanged {
        state: RideState,
        timestamp: DateTime<Utc>,
    },
}

impl AlertEvent {
    pub fn event_type(&self) -> &str {
        match self {
            AlertEvent::AlertPlayed { .. } => "AlertPlayed",
            AlertEvent::AlertSuppressed { .. } => "AlertSuppressed",
            AlertEvent::SettingsApplied { .. } => "SettingsApplied",
            AlertEvent::RideStateChanged { .. } => "RideStateChanged",
        }
    }
}

/// Broadcast bus for [`AlertEvent`]s
///
/// Slow subscribers lose the oldest events.
#[derive(Clone)]
pub struct AlertBus {
    tx: broadcast::Sender<AlertEvent>,
    capacity: usize,
}

impl AlertBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; `Err` if nobody is subscribed
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: AlertEvent) -> Result<usize, broadcast::error::SendError<AlertEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring a missing audience
    pub fn emit_lossy(&self, event: AlertEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Drive an [`AlertEngine`] from live sources until `shutdown` resolves
///
/// All three subscriptions are held for the duration of the call and
/// released on return.
pub async fn run_alert_engine<H, F>(
    store: Arc<dyn BlobStore>,
    host: Arc<H>,
    bus: AlertBus,
    capacity: usize,
    shutdown: F,
) -> Result<(), StreamError>
where
    H: RadarHost + 'static,
    F: Future<Output = ()>,
{
    let mut settings_updates = settings_stream(store.as_ref());
    let mut rides = ride_state_stream(host.clone(), capacity)?;
    let mut radar = data_stream(host.clone(), RADAR_DATA_TYPE, capacity)?;
    let mut engine = AlertEngine::new(settings::load(store.as_ref()));
    info!("Alert engine started");

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            Some(config) = settings_updates.next() => {
                bus.emit_lossy(AlertEvent::SettingsApplied {
                    enabled: config.enabled,
                    in_ride_only: config.in_ride_only,
                    threat_rules: config.threat_rules.len(),
                    timestamp: Utc::now(),
                });
                engine.on_settings(config);
            }
            Some(state) = rides.next() => {
                debug!("Ride state: {}", state);
                engine.on_ride_state(state);
                bus.emit_lossy(AlertEvent::RideStateChanged {
                    state,
                    timestamp: Utc::now(),
                });
            }
            Some(state) = radar.next() => {
                match engine.on_radar(&state) {
                    Some(AlertDecision::Play { kind, tones }) => {
                        info!("Playing {:?} alert ({} segments)", kind, tones.len());
                        let event = AlertEvent::AlertPlayed {
                            alert: kind,
                            segments: tones.len(),
                            duration_ms: tones.total_duration_ms(),
                            timestamp: Utc::now(),
                        };
                        host.play(tones);
                        bus.emit_lossy(event);
                    }
                    Some(AlertDecision::Suppressed { kind, reason }) => {
                        debug!("Suppressed {:?} alert: {:?}", kind, reason);
                        bus.emit_lossy(AlertEvent::AlertSuppressed {
                            alert: kind,
                            reason,
                            timestamp: Utc::now(),
                        });
                    }
                    None => {}
                }
            }
            else => break,
        }
    }

    info!("Alert engine stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::DataPoint;
    use crate::settings::{AlertTone, ThreatBeep};
    use crate::tones::Tone;

    fn riding_engine(config: Configuration) -> AlertEngine {
        let mut engine = AlertEngine::new(config);
        engine.on_ride_state(RideState::Recording);
        engine
    }

    #[test]
    fn test_threat_edge_plays_rules() {
        let mut engine = riding_engine(Configuration::default());
        let decision = engine.on_radar(&StreamState::radar_threat_level(1));
        assert_eq!(
            decision,
            Some(AlertDecision::Play {
                kind: AlertKind::Threat { level: 1 },
                tones: ToneSequence::new(vec![Tone::audible(200, 100), Tone::silence(300)]),
            })
        );

        // Same threat persisting or escalating does not replay
        assert_eq!(engine.on_radar(&StreamState::radar_threat_level(1)), None);
        assert_eq!(engine.on_radar(&StreamState::radar_threat_level(3)), None);
        assert_eq!(engine.threat_level(), 3);
    }

    #[test]
    fn test_all_clear_only_when_enabled() {
        let mut engine = riding_engine(Configuration::default());
        engine.on_radar(&StreamState::radar_threat_level(2));
        assert_eq!(engine.on_radar(&StreamState::radar_threat_level(0)), None);

        let mut config = Configuration::default();
        config.all_clear_enabled = true;
        config.all_clear_tone = AlertTone::new(0, 0);
        engine.on_settings(config);
        engine.on_radar(&StreamState::radar_threat_level(2));
        assert_eq!(
            engine.on_radar(&StreamState::radar_threat_level(0)),
            Some(AlertDecision::Play {
                kind: AlertKind::AllClear,
                tones: ToneSequence::new(vec![Tone::audible(0, 0)]),
            })
        );
    }

    #[test]
    fn test_disabled_suppresses() {
        let mut config = Configuration::default();
        config.enabled = false;
        let mut engine = riding_engine(config);
        assert_eq!(
            engine.on_radar(&StreamState::radar_threat_level(1)),
            Some(AlertDecision::Suppressed {
                kind: AlertKind::Threat { level: 1 },
                reason: SuppressReason::Disabled,
            })
        );
    }

    #[test]
    fn test_in_ride_only_gate() {
        let mut config = Configuration::default();
        config.in_ride_only = true;
        let mut engine = AlertEngine::new(config);

        engine.on_ride_state(RideState::Paused);
        assert_eq!(engine.suppression(), Some(SuppressReason::NotRiding));
        assert!(matches!(
            engine.on_radar(&StreamState::radar_threat_level(1)),
            Some(AlertDecision::Suppressed { reason: SuppressReason::NotRiding, .. })
        ));

        // The suppressed threat is not replayed when the ride resumes
        engine.on_ride_state(RideState::Recording);
        assert_eq!(engine.on_radar(&StreamState::radar_threat_level(1)), None);
    }

    #[test]
    fn test_in_ride_only_off_plays_when_idle() {
        let mut engine = AlertEngine::new(Configuration::default());
        assert_eq!(engine.ride_state(), RideState::Idle);
        assert!(matches!(
            engine.on_radar(&StreamState::radar_threat_level(1)),
            Some(AlertDecision::Play { .. })
        ));
    }

    #[test]
    fn test_sensor_loss_resets_silently() {
        let mut config = Configuration::default();
        config.all_clear_enabled = true;
        let mut engine = riding_engine(config);
        engine.on_radar(&StreamState::radar_threat_level(2));

        // Losing the sensor is not an all-clear, but it resets tracking
        assert_eq!(engine.on_radar(&StreamState::Searching), None);
        assert_eq!(engine.threat_level(), 0);

        // So the next reading is a fresh threat
        assert!(matches!(
            engine.on_radar(&StreamState::radar_threat_level(2)),
            Some(AlertDecision::Play { kind: AlertKind::Threat { level: 2 }, .. })
        ));
    }

    #[test]
    fn test_threat_level_parsing() {
        let odd = StreamState::Streaming {
            data_point: DataPoint::new(RADAR_DATA_TYPE).with_value(THREAT_LEVEL_FIELD, -4.0),
        };
        assert_eq!(threat_level(&odd), Some(0));

        let fractional = StreamState::Streaming {
            data_point: DataPoint::new(RADAR_DATA_TYPE).with_value(THREAT_LEVEL_FIELD, 2.7),
        };
        assert_eq!(threat_level(&fractional), Some(2));

        let other_type = StreamState::Streaming {
            data_point: DataPoint::new("speed").with_value(THREAT_LEVEL_FIELD, 5.0),
        };
        assert_eq!(threat_level(&other_type), None);

        let missing = StreamState::Streaming {
            data_point: DataPoint::new(RADAR_DATA_TYPE),
        };
        assert_eq!(threat_level(&missing), Some(0));
        assert_eq!(threat_level(&StreamState::NotAvailable), None);
    }

    #[test]
    fn test_multi_rule_sequence() {
        let mut config = Configuration::default();
        config.threat_rules = vec![ThreatBeep::new(300, 50, 500), ThreatBeep::new(600, 50, 0)];
        let mut engine = riding_engine(config);
        match engine.on_radar(&StreamState::radar_threat_level(1)) {
            Some(AlertDecision::Play { tones, .. }) => assert_eq!(tones.len(), 4),
            other => panic!("Expected play decision, got {:?}", other),
        }
    }

    #[test]
    fn test_alert_bus() {
        let bus = AlertBus::new(4);
        assert_eq!(bus.capacity(), 4);
        assert!(bus
            .emit(AlertEvent::RideStateChanged {
                state: RideState::Idle,
                timestamp: Utc::now(),
            })
            .is_err());

        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        bus.emit_lossy(AlertEvent::RideStateChanged {
            state: RideState::Recording,
            timestamp: Utc::now(),
        });
        let event = rx.try_recv().expect("Should receive event");
        assert_eq!(event.event_type(), "RideStateChanged");
    }
}
