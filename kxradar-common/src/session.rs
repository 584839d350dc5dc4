//! Settings session
//!
//! [`SettingsSession`] owns the working copy a settings screen edits. It is
//! single-writer: the screen mutates it through [`SettingsSession::edit`] and
//! nothing else holds a reference. [`SettingsScreen`] adds the three
//! subscriptions a screen keeps open while visible.
//!
//! Reconciliation is last-writer-wins: an external settings change replaces
//! the working copy wholesale, unsaved edits included.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, error, info, warn};

use crate::error::{EditError, SessionError, StreamError};
use crate::host::{RadarHost, RideState, StreamState, ToneSink, RADAR_DATA_TYPE};
use crate::settings::{
    self, Configuration, SchemaVersion, ThreatBeep, CHAINED_RULE_DELAY_MS, MIN_RULE_DELAY_MS,
};
use crate::store::BlobStore;
use crate::stream::{data_stream, ride_state_stream, settings_stream, ChangeStream};
use crate::tones::{compile_alert_tone, compile_threat_rules, ToneSequence};

/// Single field mutation of the working copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditCommand {
    SetFrequency { index: usize, frequency: u32 },
    SetDuration { index: usize, duration: u32 },
    /// Delays below [`MIN_RULE_DELAY_MS`] are raised to it
    SetDelay { index: usize, delay: u32 },
    /// Append a rule; the previous last rule gets [`CHAINED_RULE_DELAY_MS`]
    AddRule,
    RemoveRule { index: usize },
    SetAllClearFrequency(u32),
    SetAllClearDuration(u32),
    SetAllClearEnabled(bool),
    SetInRideOnly(bool),
    SetEnabled(bool),
}

/// Editable working copy bound to the persisted settings
pub struct SettingsSession {
    working: Configuration,
    persisted: Configuration,
    store: Arc<dyn BlobStore>,
    sink: Arc<dyn ToneSink>,
    max_rules: usize,
}

impl SettingsSession {
    /// Read the current settings once and start editing them
    pub fn open(store: Arc<dyn BlobStore>, sink: Arc<dyn ToneSink>) -> Self {
        let loaded = settings::load(store.as_ref());
        Self {
            working: loaded.clone(),
            persisted: loaded,
            store,
            sink,
            max_rules: SchemaVersion::CURRENT.max_rules(),
        }
    }

    /// Lower the rule limit (defaults to the current schema's)
    ///
    /// Clamped to the current schema's limit: anything above it would save a
    /// blob that no longer decodes.
    pub fn with_max_rules(mut self, max_rules: usize) -> Self {
        let schema_limit = SchemaVersion::CURRENT.max_rules();
        if max_rules > schema_limit {
            warn!(
                "Rule limit {} exceeds {} schema limit, using {}",
                max_rules,
                SchemaVersion::CURRENT,
                schema_limit
            );
        }
        self.max_rules = max_rules.clamp(1, schema_limit);
        self
    }

    pub fn working(&self) -> &Configuration {
        &self.working
    }

    pub fn max_rules(&self) -> usize {
        self.max_rules
    }

    /// Whether another rule may be added
    pub fn can_add_rule(&self) -> bool {
        self.working.threat_rules.len() < self.max_rules
    }

    /// Whether rules may be removed
    pub fn can_remove_rule(&self) -> bool {
        self.working.threat_rules.len() > 1
    }

    /// Working copy differs from the last known persisted value
    pub fn is_dirty(&self) -> bool {
        self.working != self.persisted
    }

    /// Replace the working copy with a value that changed underneath
    pub fn apply_external_update(&mut self, config: Configuration) {
        if self.is_dirty() && config != self.working {
            debug!("External settings update discards unsaved edits");
        }
        self.working = config.clone();
        self.persisted = config;
    }

    /// Apply one in-memory mutation; rejected edits leave the copy untouched
    pub fn edit(&mut self, command: EditCommand) -> Result<(), EditError> {
        let len = self.working.threat_rules.len();

        match command {
            EditCommand::SetFrequency { index, frequency } => {
                rule_mut(&mut self.working.threat_rules, index)?.frequency = frequency;
            }
            EditCommand::SetDuration { index, duration } => {
                rule_mut(&mut self.working.threat_rules, index)?.duration = duration;
            }
            EditCommand::SetDelay { index, delay } => {
                rule_mut(&mut self.working.threat_rules, index)?.delay =
                    delay.max(MIN_RULE_DELAY_MS);
            }
            EditCommand::AddRule => {
                if len >= self.max_rules {
                    return Err(EditError::TooManyRules {
                        max: self.max_rules,
                    });
                }
                let rules = &mut self.working.threat_rules;
                if let Some(last) = rules.last_mut() {
                    last.delay = CHAINED_RULE_DELAY_MS;
                }
                rules.push(ThreatBeep::appended());
            }
            EditCommand::RemoveRule { index } => {
                if index >= len {
                    return Err(EditError::IndexOutOfRange { index, len });
                }
                if len <= 1 {
                    return Err(EditError::LastRule);
                }
                self.working.threat_rules.remove(index);
            }
            EditCommand::SetAllClearFrequency(frequency) => {
                self.working.all_clear_tone.frequency = frequency;
            }
            EditCommand::SetAllClearDuration(duration) => {
                self.working.all_clear_tone.duration = duration;
            }
            EditCommand::SetAllClearEnabled(enabled) => {
                self.working.all_clear_enabled = enabled;
            }
            EditCommand::SetInRideOnly(in_ride_only) => {
                self.working.in_ride_only = in_ride_only;
            }
            EditCommand::SetEnabled(enabled) => {
                self.working.enabled = enabled;
            }
        }
        Ok(())
    }

    /// Write the working copy under the current schema key
    ///
    /// Identical working copies always produce identical stored text.
    pub fn save(&mut self) -> Result<(), SessionError> {
        self.working.validate(self.max_rules)?;

        let key = SchemaVersion::CURRENT.storage_key();
        let text = settings::encode_current(&self.working);
        match self.store.write(key, &text) {
            Ok(()) => {
                info!("Settings saved ({} threat rules)", self.working.threat_rules.len());
                self.persisted = self.working.clone();
                Ok(())
            }
            Err(e) => {
                error!("Failed to save settings under '{}': {}", key, e);
                Err(e.into())
            }
        }
    }

    /// Toggle the master switch and persist immediately
    ///
    /// Unlike other edits this does not wait for [`save`](Self::save). On
    /// failure the toggle stays applied locally and the session stays dirty.
    pub fn toggle_enabled(&mut self, enabled: bool) -> Result<(), SessionError> {
        self.working.enabled = enabled;
        self.save()
    }

    /// Dispatch a compiled sequence without touching settings
    pub fn preview_play(&self, tones: ToneSequence) {
        self.sink.play(tones);
    }

    /// Play the working threat rules
    pub fn preview_threat_rules(&self) {
        self.preview_play(compile_threat_rules(&self.working.threat_rules));
    }

    /// Play the working all-clear tone
    pub fn preview_all_clear(&self) {
        self.preview_play(compile_alert_tone(&self.working.all_clear_tone));
    }
}

fn rule_mut(rules: &mut [ThreatBeep], index: usize) -> Result<&mut ThreatBeep, EditError> {
    let len = rules.len();
    rules
        .get_mut(index)
        .ok_or(EditError::IndexOutOfRange { index, len })
}

/// Update delivered to an open settings screen
#[derive(Debug, Clone, PartialEq)]
pub enum ScreenUpdate {
    /// Persisted settings changed; already applied to the session
    Settings(Configuration),
    Ride(RideState),
    Radar(StreamState),
}

/// A visible settings screen: session plus its three subscriptions
///
/// Opening acquires all subscriptions; dropping or [`close`](Self::close)
/// releases every host listener.
pub struct SettingsScreen {
    session: SettingsSession,
    settings: ChangeStream<Configuration>,
    ride: ChangeStream<RideState>,
    radar: ChangeStream<StreamState>,
    ride_state: Option<RideState>,
    radar_state: Option<StreamState>,
}

impl SettingsScreen {
    pub fn open<H: RadarHost + 'static>(
        store: Arc<dyn BlobStore>,
        host: Arc<H>,
        capacity: usize,
    ) -> Result<Self, StreamError> {
        let settings = settings_stream(store.as_ref());
        let ride = ride_state_stream(host.clone(), capacity)?;
        let radar = data_stream(host.clone(), RADAR_DATA_TYPE, capacity)?;
        let sink: Arc<dyn ToneSink> = host;
        let session = SettingsSession::open(store, sink);
        info!("Settings screen opened");

        Ok(Self {
            session,
            settings,
            ride,
            radar,
            ride_state: None,
            radar_state: None,
        })
    }

    pub fn session(&self) -> &SettingsSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SettingsSession {
        &mut self.session
    }

    /// Last ride state received
    pub fn ride_state(&self) -> Option<RideState> {
        self.ride_state
    }

    /// Last radar state received
    pub fn radar_state(&self) -> Option<&StreamState> {
        self.radar_state.as_ref()
    }

    /// Wait for the next update from any source
    ///
    /// Returns `None` only if every source has ended.
    pub async fn next_update(&mut self) -> Option<ScreenUpdate> {
        tokio::select! {
            Some(config) = self.settings.next() => {
                self.session.apply_external_update(config.clone());
                Some(ScreenUpdate::Settings(config))
            }
            Some(state) = self.ride.next() => {
                self.ride_state = Some(state);
                Some(ScreenUpdate::Ride(state))
            }
            Some(state) = self.radar.next() => {
                self.radar_state = Some(state.clone());
                Some(ScreenUpdate::Radar(state))
            }
            else => {
                warn!("All settings screen sources ended");
                None
            }
        }
    }

    /// Leave the screen, releasing all subscriptions
    pub fn close(self) {
        info!("Settings screen closed");
    }
}
