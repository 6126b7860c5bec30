//! Discovery confirmation after a successful QR scan.
//!
//! The backend decides whether a discovery is new; this gate only stops one
//! scan result from being submitted twice while its result is on screen.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{QuestError, Result};
use crate::locator::BeaconLocator;
use crate::types::DiscoverResponse;

/// The backend call behind a confirmation.
#[async_trait]
pub trait DiscoveryBackend: Send + Sync {
    /// Record a discovery of `beacon_id` for the signed-in user.
    ///
    /// # Errors
    ///
    /// Returns an error for network, auth, or non-2xx failures.
    async fn discover(&self, beacon_id: &str) -> Result<DiscoverResponse>;
}

/// What a confirmation earned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryOutcome {
    /// Confirmed beacon.
    pub beacon_id: String,
    /// Points granted; 0 for a repeat discovery.
    pub points_awarded: i64,
    /// Whether the user had already discovered this beacon.
    pub already_discovered: bool,
    /// Backend message, if any.
    pub message: Option<String>,
}

impl DiscoveryOutcome {
    /// Interpret a backend response. Without an explicit flag, a response
    /// granting no points is a repeat.
    #[must_use]
    pub fn from_response(beacon_id: &str, response: DiscoverResponse) -> Self {
        let already_discovered = response
            .already_discovered
            .unwrap_or(response.points_awarded <= 0);
        Self {
            beacon_id: beacon_id.to_string(),
            points_awarded: if already_discovered {
                0
            } else {
                response.points_awarded.max(0)
            },
            already_discovered,
            message: response.message,
        }
    }
}

/// One-shot confirmation for a displayed scan result.
///
/// The first [`confirm`](Self::confirm) goes to the backend; later calls
/// fail with `AlreadyConfirmed` until [`reset`](Self::reset). A failed call
/// re-arms the gate so the user can tap again.
pub struct DiscoveryGate<'a> {
    backend: &'a dyn DiscoveryBackend,
    fired: AtomicBool,
}

impl<'a> DiscoveryGate<'a> {
    /// Armed gate over `backend`.
    #[must_use]
    pub fn new(backend: &'a dyn DiscoveryBackend) -> Self {
        Self {
            backend,
            fired: AtomicBool::new(false),
        }
    }

    /// Confirm a discovery of `beacon_id`.
    ///
    /// # Errors
    ///
    /// `AlreadyConfirmed` if this gate already fired; otherwise whatever the
    /// backend call returns.
    pub async fn confirm(&self, beacon_id: &str) -> Result<DiscoveryOutcome> {
        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(QuestError::AlreadyConfirmed(beacon_id.to_string()));
        }

        match self.backend.discover(beacon_id).await {
            Ok(response) => {
                let outcome = DiscoveryOutcome::from_response(beacon_id, response);
                info!(
                    beacon_id,
                    points = outcome.points_awarded,
                    repeat = outcome.already_discovered,
                    "discovery confirmed"
                );
                Ok(outcome)
            }
            Err(e) => {
                warn!(beacon_id, error = %e, "discovery confirmation failed");
                self.fired.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    /// Confirm from a raw QR payload.
    ///
    /// # Errors
    ///
    /// `InvalidLocator` if the payload is not a beacon code, else as
    /// [`confirm`](Self::confirm).
    pub async fn confirm_scan(&self, payload: &str) -> Result<DiscoveryOutcome> {
        let locator: BeaconLocator = payload.parse()?;
        self.confirm(locator.id()).await
    }

    /// Whether the gate has fired and not been reset.
    #[must_use]
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Re-arm, e.g. when the result screen is dismissed.
    pub fn reset(&self) {
        self.fired.store(false, Ordering::Release);
    }
}
