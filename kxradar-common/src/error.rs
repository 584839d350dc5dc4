//! Common error types for KX Radar
//!
//! Each concern owns a small error enum; [`Error`] aggregates them for
//! callers that only need to propagate.

use thiserror::Error;

/// Common result type for KX Radar operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failure to turn persisted text into a [`Configuration`](crate::settings::Configuration)
///
/// Always recovered by the versioning layer, which substitutes defaults.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Malformed JSON, missing required field or wrong field type
    #[error("Malformed settings: {0}")]
    Syntax(String),

    /// Field not known to the current schema (strict decoding only)
    #[error("Unknown settings field: {0}")]
    UnknownField(String),

    /// Well-formed but structurally invalid (rule count out of bounds)
    #[error("Invalid settings: {0}")]
    Invalid(String),
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError::Syntax(err.to_string())
    }
}

/// Persistence collaborator failure
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying file I/O failed
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Store refused the operation (closed, read-only, injected fault)
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Host listener registration failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Host rejected the consumer registration
    #[error("Listener registration failed for {source_name}: {reason}")]
    Registration {
        /// Stream being subscribed (e.g. "ride_state", "radar")
        source_name: String,
        /// Host supplied reason
        reason: String,
    },
}

/// Rejected working-copy mutation
///
/// The working copy is left untouched whenever one of these is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EditError {
    /// Rule index does not exist
    #[error("Rule index {index} out of range (rules: {len})")]
    IndexOutOfRange { index: usize, len: usize },

    /// Adding a rule would exceed the rule limit
    #[error("Rule limit reached ({max})")]
    TooManyRules { max: usize },

    /// The only remaining rule cannot be removed
    #[error("At least one threat rule is required")]
    LastRule,
}

/// Settings session failure
#[derive(Error, Debug)]
pub enum SessionError {
    /// Working copy failed validation before save
    #[error("Invalid working copy: {0}")]
    Invalid(#[from] DecodeError),

    /// Write to the persistence collaborator failed
    #[error("Failed to persist settings: {0}")]
    Persist(#[from] StoreError),
}

/// Common error type across KX Radar components
#[derive(Error, Debug)]
pub enum Error {
    /// Settings decode error
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Persistence error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Host stream error
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Settings edit rejected
    #[error(transparent)]
    Edit(#[from] EditError),

    /// Settings session error
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Bootstrap configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
