//! Bluetooth Low Energy scanning for beacon advertisements.
//!
//! This module provides functionality to:
//! - Acquire the radio permissions a scan needs, as one combined request
//! - Scan continuously and forward every advertisement whose device name
//!   contains one of the configured tokens (no deduplication)
//! - Vibrate on each forwarded match, stronger signal vibrating longer
//!
//! On Linux the scanner talks to BlueZ through `bluer`. A scripted
//! [`MockScanner`] stands in on hosts without Bluetooth.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;

use crate::config::RadioConfig;
use crate::engine::ProximityEvent;
use crate::haptics::{HapticPattern, Haptics};
use crate::signal::SignalModel;

/// Radio-specific failures.
#[derive(Debug, Error)]
pub enum RadioError {
    /// No adapter is present.
    #[error("no Bluetooth adapter found")]
    AdapterNotFound,

    /// The adapter is present but off and could not be powered on.
    #[error("Bluetooth adapter is powered off")]
    AdapterPoweredOff,

    /// Scanning was started without the needed permissions.
    #[error("Bluetooth scan permission not granted")]
    PermissionDenied,

    /// The platform Bluetooth session could not be opened.
    #[error("failed to open Bluetooth session: {message}")]
    SessionInitFailed {
        /// Platform error text.
        message: String,
    },

    /// Device discovery could not be started.
    #[error("failed to start discovery: {message}")]
    DiscoveryFailed {
        /// Platform error text.
        message: String,
    },
}

/// Result alias for radio operations.
pub type RadioResult<T> = std::result::Result<T, RadioError>;

/// Outcome of the combined permission request. Each grant is independent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioPermissions {
    /// Fine location, required for scanning on some platforms.
    pub fine_location: bool,
    /// Permission to scan.
    pub radio_scan: bool,
    /// Permission to connect.
    pub radio_connect: bool,
}

impl RadioPermissions {
    /// Everything granted.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            fine_location: true,
            radio_scan: true,
            radio_connect: true,
        }
    }

    /// Whether scanning can go ahead.
    #[must_use]
    pub const fn is_granted(&self) -> bool {
        self.fine_location && self.radio_scan && self.radio_connect
    }
}

/// One forwarded advertisement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioMatch {
    /// Platform device identifier (MAC address on Linux).
    pub device_id: String,
    /// Advertised name.
    pub name: String,
    /// Signal strength in dBm, when reported.
    pub rssi: Option<i16>,
}

/// Substring allow-list on advertised device names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameFilter {
    tokens: Vec<String>,
}

impl NameFilter {
    /// Build from configuration; blank tokens are ignored.
    #[must_use]
    pub fn new(config: &RadioConfig) -> Self {
        Self {
            tokens: config
                .name_tokens
                .iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    /// Whether `name` contains any token (case-sensitive).
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.tokens.iter().any(|t| name.contains(t.as_str()))
    }
}

/// Filters raw advertisements, vibrates, and forwards matches to the session.
///
/// Cheap to clone; scanners hand a clone to their background task.
#[derive(Clone)]
pub struct MatchForwarder {
    filter: NameFilter,
    model: SignalModel,
    haptics: Arc<dyn Haptics>,
    sink: mpsc::UnboundedSender<ProximityEvent>,
}

impl MatchForwarder {
    /// Create a forwarder writing into `sink`.
    #[must_use]
    pub fn new(
        filter: NameFilter,
        model: SignalModel,
        haptics: Arc<dyn Haptics>,
        sink: mpsc::UnboundedSender<ProximityEvent>,
    ) -> Self {
        Self {
            filter,
            model,
            haptics,
            sink,
        }
    }

    /// Handle one advertisement. Returns `true` if it matched and was sent.
    pub fn forward(&self, device_id: &str, name: &str, rssi: Option<i16>) -> bool {
        if !self.filter.matches(name) {
            return false;
        }
        let reading = self.model.read(rssi);
        self.haptics.vibrate(&HapticPattern::for_label(reading.label));
        trace!(device_id, name, ?rssi, "beacon advertisement");

        self.sink
            .send(ProximityEvent::Radio(RadioMatch {
                device_id: device_id.to_string(),
                name: name.to_string(),
                rssi,
            }))
            .is_ok()
    }
}

/// A short-range radio scanning capability.
#[async_trait]
pub trait RadioScanner: Send {
    /// Request fine location, scan, and connect permissions together.
    ///
    /// A refused grant does not stop the others from being requested.
    async fn request_permissions(&mut self) -> RadioPermissions;

    /// Begin continuous scanning, forwarding matches through `forwarder`.
    ///
    /// # Errors
    ///
    /// Returns an error if scanning cannot be started.
    async fn start(&mut self, forwarder: MatchForwarder) -> RadioResult<()>;

    /// Halt scanning and release the radio. Safe to call at any time,
    /// any number of times.
    async fn stop(&mut self);
}

#[cfg(feature = "bluetooth")]
pub use bluez::BluezScanner;

#[cfg(feature = "bluetooth")]
mod bluez {
    use async_trait::async_trait;
    use bluer::{Adapter, AdapterEvent, Session};
    use futures::{pin_mut, StreamExt};
    use tokio::task::JoinHandle;
    use tokio_util::sync::CancellationToken;
    use tracing::{debug, info, warn};

    use super::{MatchForwarder, RadioError, RadioPermissions, RadioResult, RadioScanner};

    /// BlueZ-backed scanner.
    pub struct BluezScanner {
        // Keeps the D-Bus connection alive for the adapter.
        _session: Session,
        adapter: Adapter,
        running: Option<(CancellationToken, JoinHandle<()>)>,
    }

    impl BluezScanner {
        /// Open a BlueZ session on the default adapter.
        ///
        /// # Errors
        ///
        /// Returns an error if BlueZ is unreachable or no adapter exists.
        pub async fn new() -> RadioResult<Self> {
            let session = Session::new()
                .await
                .map_err(|e| RadioError::SessionInitFailed {
                    message: e.to_string(),
                })?;
            let adapter = session
                .default_adapter()
                .await
                .map_err(|_| RadioError::AdapterNotFound)?;
            info!(adapter = adapter.name(), "using Bluetooth adapter");
            Ok(Self {
                _session: session,
                adapter,
                running: None,
            })
        }

        async fn ensure_powered(&self) -> bool {
            if self.adapter.is_powered().await.unwrap_or(false) {
                return true;
            }
            match self.adapter.set_powered(true).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "could not power on Bluetooth adapter");
                    false
                }
            }
        }
    }

    #[async_trait]
    impl RadioScanner for BluezScanner {
        async fn request_permissions(&mut self) -> RadioPermissions {
            // BlueZ has no runtime permission prompts; an adapter we can
            // power on is as granted as it gets.
            let powered = self.ensure_powered().await;
            RadioPermissions {
                fine_location: true,
                radio_scan: powered,
                radio_connect: powered,
            }
        }

        async fn start(&mut self, forwarder: MatchForwarder) -> RadioResult<()> {
            if self.running.is_some() {
                return Ok(());
            }
            if !self.ensure_powered().await {
                return Err(RadioError::AdapterPoweredOff);
            }

            // Re-announces devices whose RSSI changed, so repeats are forwarded.
            let events = self
                .adapter
                .discover_devices_with_changes()
                .await
                .map_err(|e| RadioError::DiscoveryFailed {
                    message: e.to_string(),
                })?;

            let token = CancellationToken::new();
            let child = token.clone();
            let adapter = self.adapter.clone();
            let task = tokio::spawn(async move {
                pin_mut!(events);
                loop {
                    tokio::select! {
                        biased;
                        () = child.cancelled() => break,
                        event = events.next() => match event {
                            Some(AdapterEvent::DeviceAdded(addr)) => {
                                let Ok(device) = adapter.device(addr) else { continue };
                                let Ok(Some(name)) = device.name().await else { continue };
                                let rssi = device.rssi().await.ok().flatten();
                                forwarder.forward(&addr.to_string(), &name, rssi);
                            }
                            Some(_) => {}
                            None => {
                                warn!("Bluetooth discovery stream ended");
                                break;
                            }
                        },
                    }
                }
                debug!("Bluetooth discovery stopped");
            });

            self.running = Some((token, task));
            Ok(())
        }

        async fn stop(&mut self) {
            if let Some((token, task)) = self.running.take() {
                token.cancel();
                let _ = task.await;
            }
        }
    }

    impl Drop for BluezScanner {
        fn drop(&mut self) {
            if let Some((token, _)) = &self.running {
                token.cancel();
            }
        }
    }
}

#[cfg(any(test, feature = "mock-bluetooth", not(feature = "bluetooth")))]
pub use mock::{MockDevice, MockScanner};

#[cfg(any(test, feature = "mock-bluetooth", not(feature = "bluetooth")))]
mod mock {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::{MatchForwarder, RadioError, RadioPermissions, RadioResult, RadioScanner};

    /// A scripted advertiser.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct MockDevice {
        /// Device identifier.
        pub device_id: String,
        /// Advertised name.
        pub name: String,
        /// Signal strength.
        pub rssi: Option<i16>,
    }

    impl MockDevice {
        /// Convenience constructor.
        #[must_use]
        pub fn new(device_id: &str, name: &str, rssi: Option<i16>) -> Self {
            Self {
                device_id: device_id.to_string(),
                name: name.to_string(),
                rssi,
            }
        }
    }

    #[derive(Default)]
    struct Shared {
        forwarder: Option<MatchForwarder>,
        starts: usize,
        stops: usize,
    }

    /// Scanner that replays scripted advertisements.
    ///
    /// Clones share state, so a test can keep one to inject advertisements
    /// after handing the other to a session.
    #[derive(Clone)]
    pub struct MockScanner {
        permissions: RadioPermissions,
        initial: Vec<MockDevice>,
        shared: Arc<Mutex<Shared>>,
    }

    impl MockScanner {
        /// Scanner with every permission granted and nothing scripted.
        #[must_use]
        pub fn new() -> Self {
            Self::with_permissions(RadioPermissions::all())
        }

        /// Scanner returning `permissions` from the permission request.
        #[must_use]
        pub fn with_permissions(permissions: RadioPermissions) -> Self {
            Self {
                permissions,
                initial: Vec::new(),
                shared: Arc::default(),
            }
        }

        /// Advertisements replayed as soon as scanning starts.
        #[must_use]
        pub fn with_devices(mut self, devices: Vec<MockDevice>) -> Self {
            self.initial = devices;
            self
        }

        /// Deliver one advertisement now. Returns `true` if it was forwarded;
        /// nothing is delivered while stopped.
        pub fn advertise(&self, device: &MockDevice) -> bool {
            let forwarder = self
                .shared
                .lock()
                .ok()
                .and_then(|s| s.forwarder.clone());
            forwarder.is_some_and(|f| f.forward(&device.device_id, &device.name, device.rssi))
        }

        /// Whether a scan is running.
        #[must_use]
        pub fn is_scanning(&self) -> bool {
            self.shared.lock().is_ok_and(|s| s.forwarder.is_some())
        }

        /// Calls to `start` and `stop` so far.
        #[must_use]
        pub fn lifecycle_counts(&self) -> (usize, usize) {
            self.shared
                .lock()
                .map(|s| (s.starts, s.stops))
                .unwrap_or_default()
        }
    }

    impl Default for MockScanner {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl RadioScanner for MockScanner {
        async fn request_permissions(&mut self) -> RadioPermissions {
            self.permissions
        }

        async fn start(&mut self, forwarder: MatchForwarder) -> RadioResult<()> {
            if !self.permissions.is_granted() {
                return Err(RadioError::PermissionDenied);
            }
            if let Ok(mut shared) = self.shared.lock() {
                shared.starts += 1;
                shared.forwarder = Some(forwarder);
            }
            for device in &self.initial {
                self.advertise(device);
            }
            Ok(())
        }

        async fn stop(&mut self) {
            if let Ok(mut shared) = self.shared.lock() {
                shared.stops += 1;
                shared.forwarder = None;
            }
        }
    }
}
