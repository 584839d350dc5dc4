//! # KXRadar Extension Service (kxradar-ext)
//!
//! Runs the radar alert engine against a directory-backed settings store,
//! with host events (ride state, radar readings) supplied as JSON lines.

pub mod events;
pub mod service;

pub use service::{run_service, ServiceOptions, ServiceReport};
