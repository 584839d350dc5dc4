//! Configuration model
//!
//! Typed representation of the alert rules and feature toggles, plus the
//! JSON codec that defines the persisted text format. Field names of the
//! serialized form are an external contract: renaming one is a schema break
//! and needs a new [`SchemaVersion`](super::SchemaVersion).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DecodeError;

/// Rule limit of the current schema
pub const DEFAULT_MAX_RULES: usize = 5;

/// Smallest gap (ms) accepted between two threat beeps when editing a delay
pub const MIN_RULE_DELAY_MS: u32 = 300;

/// Delay given to the previous last rule when a new rule is appended
pub const CHAINED_RULE_DELAY_MS: u32 = 500;

const ROOT_FIELDS: &[&str] = &[
    "threatRules",
    "allClearTone",
    "allClearEnabled",
    "inRideOnly",
    "enabled",
];
const RULE_FIELDS: &[&str] = &["frequency", "duration", "delay"];
const TONE_FIELDS: &[&str] = &["frequency", "duration"];

/// A single audible segment
///
/// `frequency == 0` is a legal tone (a silent click), not "no tone".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlertTone {
    /// Pitch in Hz
    pub frequency: u32,
    /// Length in milliseconds
    pub duration: u32,
}

impl AlertTone {
    pub const fn new(frequency: u32, duration: u32) -> Self {
        Self { frequency, duration }
    }
}

/// One step of the escalating threat alert: a tone followed by silence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreatBeep {
    /// Pitch in Hz
    pub frequency: u32,
    /// Tone length in milliseconds
    pub duration: u32,
    /// Silence after the tone, before the next rule fires (ms)
    pub delay: u32,
}

impl ThreatBeep {
    pub const fn new(frequency: u32, duration: u32, delay: u32) -> Self {
        Self {
            frequency,
            duration,
            delay,
        }
    }

    /// Rule appended by the editor when the user adds a beep
    pub const fn appended() -> Self {
        Self::new(200, 100, 0)
    }

    /// The audible part of this rule, without its trailing delay
    pub fn tone(&self) -> AlertTone {
        AlertTone::new(self.frequency, self.duration)
    }
}

/// Root persisted entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    /// Ordered escalating threat sequence (never empty)
    pub threat_rules: Vec<ThreatBeep>,

    /// Played once when a tracked threat is gone
    pub all_clear_tone: AlertTone,

    /// Whether the all-clear tone is played at all
    #[serde(default)]
    pub all_clear_enabled: bool,

    /// Suppress alerts outside an active ride
    #[serde(default)]
    pub in_ride_only: bool,

    /// Master switch
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            threat_rules: vec![ThreatBeep::new(200, 100, 300)],
            all_clear_tone: AlertTone::new(0, 0),
            all_clear_enabled: false,
            in_ride_only: false,
            enabled: true,
        }
    }
}

impl Configuration {
    /// Check the structural invariants that serde cannot express
    pub fn validate(&self, max_rules: usize) -> Result<(), DecodeError> {
        if self.threat_rules.is_empty() {
            return Err(DecodeError::Invalid(
                "threatRules must contain at least one rule".to_string(),
            ));
        }
        if self.threat_rules.len() > max_rules {
            return Err(DecodeError::Invalid(format!(
                "threatRules has {} rules, limit is {}",
                self.threat_rules.len(),
                max_rules
            )));
        }
        Ok(())
    }
}

/// Decoder behaviour switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Accept (and drop) fields the schema does not know
    pub ignore_unknown_fields: bool,
    /// Upper bound on `threatRules` length
    pub max_rules: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            ignore_unknown_fields: true,
            max_rules: DEFAULT_MAX_RULES,
        }
    }
}

impl DecodeOptions {
    /// Reject any field outside the schema
    pub fn strict() -> Self {
        Self {
            ignore_unknown_fields: false,
            ..Self::default()
        }
    }
}

/// Decode persisted text with the default (forward-compatible) options
pub fn parse(raw: &str) -> Result<Configuration, DecodeError> {
    parse_with(raw, &DecodeOptions::default())
}

/// Decode persisted text
pub fn parse_with(raw: &str, options: &DecodeOptions) -> Result<Configuration, DecodeError> {
    let value: Value = serde_json::from_str(raw)?;
    if !options.ignore_unknown_fields {
        reject_unknown_fields(&value)?;
    }
    let config: Configuration = serde_json::from_value(value)?;
    config.validate(options.max_rules)?;
    Ok(config)
}

/// Encode to the persisted text form (compact JSON, stable field order)
pub fn serialize(config: &Configuration) -> String {
    serde_json::to_string(config).expect("Configuration has no non-string map keys")
}

fn reject_unknown_fields(value: &Value) -> Result<(), DecodeError> {
    let Some(root) = value.as_object() else {
        // Type mismatch is reported by the typed decode
        return Ok(());
    };
    check_keys(root, ROOT_FIELDS, "")?;

    if let Some(rules) = root.get("threatRules").and_then(Value::as_array) {
        for (index, rule) in rules.iter().enumerate() {
            if let Some(rule) = rule.as_object() {
                check_keys(rule, RULE_FIELDS, &format!("threatRules[{index}]."))?;
            }
        }
    }
    if let Some(tone) = root.get("allClearTone").and_then(Value::as_object) {
        check_keys(tone, TONE_FIELDS, "allClearTone.")?;
    }
    Ok(())
}

fn check_keys(
    object: &serde_json::Map<String, Value>,
    known: &[&str],
    prefix: &str,
) -> Result<(), DecodeError> {
    match object.keys().find(|key| !known.contains(&key.as_str())) {
        Some(key) => Err(DecodeError::UnknownField(format!("{prefix}{key}"))),
        None => Ok(()),
    }
}
