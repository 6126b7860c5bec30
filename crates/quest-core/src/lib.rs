//! # quest-core
//!
//! Core logic for beacon quest, a location-based treasure hunt.
//!
//! This crate provides:
//! - A beacon directory fetched from the quest REST API
//! - Proximity detection from location fixes and Bluetooth advertisements
//! - Signal-strength classification with matching haptic patterns
//! - One-shot discovery confirmation from scanned QR codes
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`api`] - HTTP client for the REST API, holding the user's session
//! - [`config`] - Configuration loading, saving, and validation
//! - [`directory`] - Beacon directory with per-record location parsing
//! - [`discovery`] - Discovery confirmation gate
//! - [`engine`] - Proximity state machine and nearest-beacon evaluation
//! - [`session`] - Scan session wiring location and radio into the engine
//! - [`location`] - Location sources and subscriptions
//! - [`radio`] - Bluetooth scanning and advertisement matching
//! - [`signal`] - RSSI normalization and labels
//! - [`haptics`] - Vibration patterns
//! - [`geo`] - Coordinates and great-circle distance
//! - [`locator`] - `beacon://` QR payloads
//! - [`error`] - Unified error types for the crate
//! - [`types`] - REST payloads

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod api;
pub mod config;
pub mod directory;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod geo;
pub mod haptics;
pub mod location;
pub mod locator;
pub mod radio;
pub mod session;
pub mod signal;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export primary types for convenience
pub use api::{extract_error_message, ApiClient, AuthSession};
pub use config::{
    default_config_path, Accuracy, ApiConfig, ConfigError, ConfigResult, LocationConfig,
    ProximityConfig, QuestConfig, RadioConfig, SignalConfig,
};
pub use directory::{BeaconDirectory, BeaconRecord, BeaconSource};
pub use discovery::{DiscoveryBackend, DiscoveryGate, DiscoveryOutcome};
pub use engine::{
    evaluate, NearBeacon, ProximityEngine, ProximityEvent, ProximityReading, ProximityState,
    SessionPhase,
};
pub use error::{Capability, Error, QuestError, Result};
pub use geo::{distance, Coordinate};
pub use haptics::{HapticPattern, Haptics, LogHaptics, RecordingHaptics};
pub use location::{
    LocationFeed, LocationSource, LocationSubscription, ManualLocationSource,
    ReplayLocationSource, WatchOptions,
};
pub use locator::BeaconLocator;
#[cfg(feature = "bluetooth")]
pub use radio::BluezScanner;
#[cfg(any(test, feature = "mock-bluetooth", not(feature = "bluetooth")))]
pub use radio::{MockDevice, MockScanner};
pub use radio::{RadioError, RadioMatch, RadioPermissions, RadioScanner};
pub use session::ScanSession;
pub use signal::{SignalLabel, SignalModel, SignalReading};
