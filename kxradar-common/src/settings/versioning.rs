//! Schema versioning and decode-or-default migration policy
//!
//! Every backward-incompatible schema revision is stored under its own key.
//! Only the current key is ever decoded, so stale blobs written by an older
//! revision can never be half-interpreted by the current decoder; they are
//! simply not read, and the user starts from defaults.
//!
//! Decoding is best effort: any failure (malformed text, missing field, type
//! mismatch, rule count out of bounds) is logged and replaced by
//! [`Configuration::default`]. This is a silent degrade-to-safe-default policy,
//! not a validating migration. No copy-and-transform migration exists between
//! versions.

use tracing::{debug, info, warn};

use super::model::{self, Configuration, DecodeOptions, DEFAULT_MAX_RULES};
use crate::store::BlobStore;

/// Persisted schema revisions, oldest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SchemaVersion {
    /// `threatLevelPattern` / `beep_freq`, all-clear muted by frequency 0
    V1,
    /// `threatBeep` / `freq`, adds `allClearEnabled`
    V2,
    /// `threatRules` / `frequency`, five rules
    V3,
}

impl SchemaVersion {
    /// Version written by this build
    pub const CURRENT: SchemaVersion = SchemaVersion::V3;

    /// All known versions, oldest first
    pub const ALL: [SchemaVersion; 3] = [SchemaVersion::V1, SchemaVersion::V2, SchemaVersion::V3];

    /// Storage key holding this version's serialization
    pub fn storage_key(self) -> &'static str {
        match self {
            SchemaVersion::V1 => "settings",
            SchemaVersion::V2 => "settings_v2",
            SchemaVersion::V3 => "radar_settings_v3",
        }
    }

    /// Rule limit in effect for this version
    pub fn max_rules(self) -> usize {
        match self {
            SchemaVersion::V1 | SchemaVersion::V2 => 4,
            SchemaVersion::V3 => DEFAULT_MAX_RULES,
        }
    }

    /// Versions older than this one
    pub fn legacy(self) -> impl Iterator<Item = SchemaVersion> {
        Self::ALL.into_iter().filter(move |v| *v < self)
    }

    /// Decoder options matching this version's limits
    pub fn decode_options(self) -> DecodeOptions {
        DecodeOptions {
            max_rules: self.max_rules(),
            ..DecodeOptions::default()
        }
    }
}

impl std::fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaVersion::V1 => write!(f, "v1"),
            SchemaVersion::V2 => write!(f, "v2"),
            SchemaVersion::V3 => write!(f, "v3"),
        }
    }
}

/// Decode a stored blob of the current version, falling back to defaults
///
/// Never fails and never panics. `None` (nothing stored) yields defaults
/// without logging a warning.
pub fn decode_or_default(raw: Option<&str>) -> Configuration {
    let Some(raw) = raw else {
        debug!("No stored settings, using defaults");
        return Configuration::default();
    };

    match model::parse_with(raw, &SchemaVersion::CURRENT.decode_options()) {
        Ok(config) => config,
        Err(e) => {
            warn!(
                "Failed to read {} settings, falling back to defaults: {}",
                SchemaVersion::CURRENT,
                e
            );
            Configuration::default()
        }
    }
}

/// Serialize with the current version's encoder
pub fn encode_current(config: &Configuration) -> String {
    model::serialize(config)
}

/// Read the current-version settings from `store`
///
/// Store read errors degrade to defaults like decode errors do. Data left
/// under a legacy key is reported but not migrated.
pub fn load<S: BlobStore + ?Sized>(store: &S) -> Configuration {
    let key = SchemaVersion::CURRENT.storage_key();
    match store.read(key) {
        Ok(Some(raw)) => decode_or_default(Some(&raw)),
        Ok(None) => {
            report_legacy(store);
            Configuration::default()
        }
        Err(e) => {
            warn!("Failed to read settings key '{}': {}", key, e);
            Configuration::default()
        }
    }
}

fn report_legacy<S: BlobStore + ?Sized>(store: &S) {
    for version in SchemaVersion::CURRENT.legacy() {
        if let Ok(Some(_)) = store.read(version.storage_key()) {
            warn!(
                "Found {} settings under '{}'; they are not migrated to {}, using defaults",
                version,
                version.storage_key(),
                SchemaVersion::CURRENT
            );
        }
    }
    info!("Initialized {} settings with defaults", SchemaVersion::CURRENT);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::model::ThreatBeep;
    use crate::store::MemoryStore;

    #[test]
    fn test_storage_keys_are_distinct() {
        let keys: std::collections::HashSet<_> =
            SchemaVersion::ALL.iter().map(|v| v.storage_key()).collect();
        assert_eq!(keys.len(), SchemaVersion::ALL.len());
    }

    #[test]
    fn test_rule_limit_grows() {
        assert_eq!(SchemaVersion::V1.max_rules(), 4);
        assert_eq!(SchemaVersion::V3.max_rules(), 5);
        assert_eq!(SchemaVersion::CURRENT.max_rules(), DEFAULT_MAX_RULES);
    }

    #[test]
    fn test_legacy_versions() {
        let legacy: Vec<_> = SchemaVersion::V3.legacy().collect();
        assert_eq!(legacy, vec![SchemaVersion::V1, SchemaVersion::V2]);
        assert_eq!(SchemaVersion::V1.legacy().count(), 0);
    }

    #[test]
    fn test_decode_or_default_malformed_inputs() {
        let inputs = [
            "",
            "not json",
            "{",
            "null",
            "42",
            "[]",
            r#"{"threatRules": "many"}"#,
            r#"{"threatRules":[],"allClearTone":{"frequency":0,"duration":0}}"#,
            r#"{"threatRules":[{"frequency":1,"duration":1}],"allClearTone":{"frequency":0,"duration":0}}"#,
            // v1 blob under the wrong key
            r#"{"threatLevelPattern":[{"beep_freq":200,"beep_duration":100,"delay":300}],"threatPassedLevelPattern":{"freq":0,"duration":0}}"#,
        ];
        for input in inputs {
            assert_eq!(
                decode_or_default(Some(input)),
                Configuration::default(),
                "input: {input}"
            );
        }
    }

    #[test]
    fn test_decode_or_default_absent() {
        assert_eq!(decode_or_default(None), Configuration::default());
    }

    #[test]
    fn test_decode_or_default_valid() {
        let mut config = Configuration::default();
        config.threat_rules.push(ThreatBeep::new(600, 40, 0));
        config.in_ride_only = true;
        assert_eq!(decode_or_default(Some(&encode_current(&config))), config);
    }

    #[test]
    fn test_load_ignores_legacy_keys() {
        let store = MemoryStore::new();
        store
            .write(
                SchemaVersion::V1.storage_key(),
                r#"{"threatLevelPattern":[{"beep_freq":900,"beep_duration":10,"delay":0}],"threatPassedLevelPattern":{"freq":0,"duration":0},"enabled":false}"#,
            )
            .unwrap();
        assert_eq!(load(&store), Configuration::default());
    }

    #[test]
    fn test_load_current_key() {
        let store = MemoryStore::new();
        let mut config = Configuration::default();
        config.enabled = false;
        store
            .write(SchemaVersion::CURRENT.storage_key(), &encode_current(&config))
            .unwrap();
        assert_eq!(load(&store), config);
    }
}
