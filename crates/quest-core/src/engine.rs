//! Proximity state machine.
//!
//! The engine is a single-threaded reducer: location fixes and radio matches
//! arrive as [`ProximityEvent`]s from two independent producers, and each one
//! updates its own half of [`ProximityState`]. Location fixes decide which
//! beacon is nearest; radio matches only refresh the signal reading used for
//! feedback.
//!
//! ```text
//! Idle -> Initializing -> Active -> Terminated
//!              |
//!              +-> PermissionRequired (location refused)
//!              +-> Unavailable        (directory fetch failed)
//! ```
//!
//! Once terminated, every event is ignored.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{ProximityConfig, QuestConfig};
use crate::directory::{BeaconDirectory, BeaconRecord};
use crate::error::{Capability, QuestError};
use crate::geo::{distance, Coordinate};
use crate::radio::RadioMatch;
use crate::signal::{SignalModel, SignalReading};

/// Input to the reducer.
#[derive(Debug, Clone, PartialEq)]
pub enum ProximityEvent {
    /// A location fix.
    Location(Coordinate),
    /// A matching radio advertisement.
    Radio(RadioMatch),
}

/// Lifecycle of one proximity screen visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Nothing started yet.
    Idle,
    /// Permissions requested, directory loading.
    Initializing,
    /// Both streams running.
    Active,
    /// Location permission was refused; the feature cannot run.
    PermissionRequired,
    /// Setup failed for a non-permission reason, e.g. the directory fetch.
    Unavailable,
    /// Torn down; no further updates.
    Terminated,
}

/// Nearest beacon for one location fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProximityReading {
    /// Closest beacon, `None` when the directory is empty.
    pub nearest: Option<BeaconRecord>,
    /// Distance to `nearest` in metres.
    pub distance_metres: Option<f64>,
    /// Whether `distance_metres` is at or below the threshold.
    pub is_within_range: bool,
}

/// A "you are near a beacon" prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearBeacon {
    /// The beacon that came within range.
    pub beacon: BeaconRecord,
    /// Distance when the prompt fired.
    pub distance_metres: f64,
}

/// Everything the UI renders, republished after every update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProximityState {
    /// Current lifecycle phase.
    pub phase: SessionPhase,
    /// Last location fix.
    pub position: Option<Coordinate>,
    /// Nearest-beacon half, from location fixes.
    pub reading: Option<ProximityReading>,
    /// Signal half, from radio matches.
    pub signal: Option<SignalReading>,
    /// Whether radio feedback is running.
    pub radio_available: bool,
    /// Number of beacons being tracked.
    pub beacon_count: usize,
    /// User-visible problem, if any.
    pub error: Option<String>,
}

impl Default for ProximityState {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Idle,
            position: None,
            reading: None,
            signal: None,
            radio_available: false,
            beacon_count: 0,
            error: None,
        }
    }
}

/// Find the nearest beacon to `position`. Ties keep the earlier beacon.
#[must_use]
pub fn evaluate(
    beacons: &[BeaconRecord],
    position: Coordinate,
    within_range_metres: f64,
) -> ProximityReading {
    let mut best: Option<(&BeaconRecord, f64)> = None;
    for beacon in beacons {
        let d = distance(position, beacon.coordinate);
        if best.map_or(true, |(_, best_d)| d < best_d) {
            best = Some((beacon, d));
        }
    }

    match best {
        Some((beacon, d)) => ProximityReading {
            nearest: Some(beacon.clone()),
            distance_metres: Some(d),
            is_within_range: d <= within_range_metres,
        },
        None => ProximityReading {
            nearest: None,
            distance_metres: None,
            is_within_range: false,
        },
    }
}

/// The proximity reducer for one session.
#[derive(Debug)]
pub struct ProximityEngine {
    within_range_metres: f64,
    renotify_after: Option<Duration>,
    model: SignalModel,
    directory: BeaconDirectory,
    state: ProximityState,
    // Set while a prompt has fired for the current approach.
    notified_at: Option<Instant>,
}

impl ProximityEngine {
    /// Create an idle engine.
    #[must_use]
    pub fn new(config: &QuestConfig) -> Self {
        Self::with_parts(&config.proximity, SignalModel::new(&config.signal))
    }

    /// Create an idle engine from its individual settings.
    #[must_use]
    pub fn with_parts(proximity: &ProximityConfig, model: SignalModel) -> Self {
        Self {
            within_range_metres: proximity.within_range_metres,
            renotify_after: proximity.renotify_after(),
            model,
            directory: BeaconDirectory::default(),
            state: ProximityState::default(),
            notified_at: None,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &ProximityState {
        &self.state
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> SessionPhase {
        self.state.phase
    }

    /// `Idle -> Initializing`. Ignored in any other phase.
    pub fn begin(&mut self) {
        if self.state.phase == SessionPhase::Idle {
            self.state.phase = SessionPhase::Initializing;
        }
    }

    /// `Initializing -> Active` with the loaded directory.
    ///
    /// `radio_available` is false when radio permission was refused or the
    /// scan failed to start; proximity still works from location alone.
    pub fn activate(&mut self, directory: BeaconDirectory, radio_available: bool) {
        if self.state.phase != SessionPhase::Initializing {
            return;
        }
        self.state.beacon_count = directory.len();
        self.state.radio_available = radio_available;
        self.directory = directory;
        self.state.phase = SessionPhase::Active;
        info!(
            beacons = self.state.beacon_count,
            radio_available, "proximity tracking active"
        );
    }

    /// `Initializing -> PermissionRequired` (location) or a degraded radio
    /// flag (radio, media).
    pub fn permission_denied(&mut self, capability: Capability) {
        if self.state.phase != SessionPhase::Initializing {
            return;
        }
        match capability {
            Capability::Location => {
                self.state.phase = SessionPhase::PermissionRequired;
                self.state.error =
                    Some(QuestError::PermissionDenied(capability).user_message());
            }
            Capability::Radio | Capability::Media => {
                self.state.radio_available = false;
            }
        }
    }

    /// `Initializing -> Unavailable`, or `PermissionRequired` for a
    /// location permission error.
    pub fn fail(&mut self, err: &QuestError) {
        if self.state.phase != SessionPhase::Initializing {
            return;
        }
        if let QuestError::PermissionDenied(capability) = err {
            self.permission_denied(*capability);
            if self.state.phase == SessionPhase::PermissionRequired {
                return;
            }
        }
        self.state.phase = SessionPhase::Unavailable;
        self.state.error = Some(err.user_message());
    }

    /// Apply one event now. See [`apply_at`](Self::apply_at).
    pub fn apply(&mut self, event: ProximityEvent) -> Option<NearBeacon> {
        self.apply_at(event, Instant::now())
    }

    /// Apply one event observed at `now`.
    ///
    /// Returns a prompt when the nearest beacon comes within range and the
    /// prompt has not already fired for this approach. Outside `Active` the
    /// event is dropped and the state is left untouched.
    pub fn apply_at(&mut self, event: ProximityEvent, now: Instant) -> Option<NearBeacon> {
        if self.state.phase != SessionPhase::Active {
            return None;
        }
        match event {
            ProximityEvent::Radio(m) => {
                self.state.signal = Some(self.model.read(m.rssi));
                None
            }
            ProximityEvent::Location(position) => {
                let reading = evaluate(self.directory.beacons(), position, self.within_range_metres);
                let prompt = self.update_latch(&reading, now);
                self.state.position = Some(position);
                self.state.reading = Some(reading);
                prompt
            }
        }
    }

    fn update_latch(&mut self, reading: &ProximityReading, now: Instant) -> Option<NearBeacon> {
        if !reading.is_within_range {
            if self.notified_at.take().is_some() {
                debug!("left beacon range, prompt re-armed");
            }
            return None;
        }

        let due = match (self.notified_at, self.renotify_after) {
            (None, _) => true,
            (Some(at), Some(after)) => now.saturating_duration_since(at) >= after,
            (Some(_), None) => false,
        };
        if !due {
            return None;
        }

        self.notified_at = Some(now);
        let beacon = reading.nearest.clone()?;
        let distance_metres = reading.distance_metres.unwrap_or_default();
        info!(beacon_id = %beacon.id, distance_metres, "near beacon");
        Some(NearBeacon {
            beacon,
            distance_metres,
        })
    }

    /// Enter `Terminated`. Idempotent.
    pub fn terminate(&mut self) {
        if self.state.phase != SessionPhase::Terminated {
            self.state.phase = SessionPhase::Terminated;
            self.notified_at = None;
        }
    }
}
