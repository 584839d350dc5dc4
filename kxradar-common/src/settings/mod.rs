//! Radar alert settings
//!
//! - [`model`]: typed configuration and its JSON codec
//! - [`versioning`]: schema versions, storage keys, decode-or-default policy

pub mod model;
pub mod versioning;

pub use model::{
    parse, parse_with, serialize, AlertTone, Configuration, DecodeOptions, ThreatBeep,
    CHAINED_RULE_DELAY_MS, DEFAULT_MAX_RULES, MIN_RULE_DELAY_MS,
};
pub use versioning::{decode_or_default, encode_current, load, SchemaVersion};
