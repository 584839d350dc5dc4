//! # KXRadar Common Library
//!
//! Settings and alerting layer for a cycling radar extension:
//! - Configuration model and JSON codec (`settings`)
//! - Schema versioning with default fallback (`settings::versioning`)
//! - Tone compilation for threat and all-clear alerts (`tones`)
//! - Change streams over the settings store and host callbacks (`stream`)
//! - Editing session with preview and save (`session`)
//! - Runtime alert engine (`alert`)
//! - Bootstrap configuration loading (`config`)

pub mod alert;
pub mod config;
pub mod error;
pub mod host;
pub mod session;
pub mod settings;
pub mod store;
pub mod stream;
pub mod tones;

pub use error::{Error, Result};
pub use settings::{Configuration, SchemaVersion};
