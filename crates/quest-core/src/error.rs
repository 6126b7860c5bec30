//! Unified error types for the quest core library.
//!
//! This module provides a unified error type [`QuestError`] that covers all failure
//! modes across the beacon quest client. Some modules also have their own specific
//! error types ([`ConfigError`](crate::config::ConfigError),
//! [`RadioError`](crate::radio::RadioError)) for internal use.
//!
//! # Design Principles
//!
//! - **Specific variants**: Each error variant captures exactly one failure mode
//! - **Actionable messages**: Error messages guide users toward resolution
//! - **Context preservation**: Wrapped errors maintain their original context
//! - **Never fatal**: Every variant converts to a user-visible message via
//!   [`QuestError::user_message`]
//!
//! # Example
//!
//! ```rust
//! use quest_core::error::{Capability, QuestError, Result};
//!
//! fn ensure_location(granted: bool) -> Result<()> {
//!     if !granted {
//!         return Err(QuestError::PermissionDenied(Capability::Location));
//!     }
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A device capability that requires a user-granted permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Fine-grained device location.
    Location,
    /// Short-range radio scanning and connecting.
    Radio,
    /// Photo library / camera media.
    Media,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Location => f.write_str("location"),
            Self::Radio => f.write_str("bluetooth"),
            Self::Media => f.write_str("media"),
        }
    }
}

/// The unified error type for all quest operations.
#[derive(Debug, Error)]
pub enum QuestError {
    // =========================================================================
    // PERMISSION ERRORS
    // =========================================================================
    /// The user (or platform) refused a capability the feature needs.
    #[error("Permission for {0} was denied. Grant it in the system settings and reopen the map.")]
    PermissionDenied(Capability),

    // =========================================================================
    // NETWORK / BACKEND ERRORS
    // =========================================================================
    /// The request never produced an HTTP response (DNS, connect, timeout).
    #[error("Network request failed: {0}")]
    NetworkFailure(String),

    /// The backend rejected the credentials or the access token expired.
    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    /// The backend answered with a non-2xx status.
    #[error("Request failed ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// First field-level or `detail` message from the error body.
        message: String,
    },

    /// The requested beacon (or other resource) does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A successful response body could not be decoded.
    #[error("Unexpected response from server: {0}")]
    Decode(String),

    // =========================================================================
    // RADIO ERRORS
    // =========================================================================
    /// No Bluetooth adapter was found on this system.
    #[error(
        "No Bluetooth adapter found. Ensure Bluetooth hardware is present and drivers are loaded."
    )]
    RadioAdapterNotFound,

    /// The Bluetooth adapter exists but is powered off.
    #[error("Bluetooth adapter is powered off. Run 'bluetoothctl power on' to enable.")]
    RadioAdapterPoweredOff,

    /// Bluetooth scanning failed.
    #[error("Bluetooth scan failed: {0}")]
    RadioScanFailed(String),

    // =========================================================================
    // DISCOVERY ERRORS
    // =========================================================================
    /// A scanned QR payload is not a beacon locator.
    #[error("Not a beacon code: '{0}'")]
    InvalidLocator(String),

    /// The discovery for this scan was already submitted.
    #[error("Discovery for beacon '{0}' was already submitted")]
    AlreadyConfirmed(String),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // I/O ERRORS
    // =========================================================================
    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for quest operations.
pub type Result<T> = std::result::Result<T, QuestError>;

/// Short alias, mirrors the `Result` alias.
pub type Error = QuestError;

impl QuestError {
    /// Returns `true` if this error is a refused permission.
    #[inline]
    #[must_use]
    pub const fn is_permission_error(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }

    /// Returns `true` if this error came from talking to the backend.
    #[inline]
    #[must_use]
    pub const fn is_network_error(&self) -> bool {
        matches!(
            self,
            Self::NetworkFailure(_)
                | Self::AuthFailure(_)
                | Self::Api { .. }
                | Self::NotFound(_)
                | Self::Decode(_)
        )
    }

    /// Returns `true` if the user has to sign in (again).
    #[inline]
    #[must_use]
    pub const fn is_auth_error(&self) -> bool {
        matches!(self, Self::AuthFailure(_))
    }

    /// Returns `true` if this error is related to the radio adapter.
    #[inline]
    #[must_use]
    pub const fn is_radio_error(&self) -> bool {
        matches!(
            self,
            Self::RadioAdapterNotFound | Self::RadioAdapterPoweredOff | Self::RadioScanFailed(_)
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if a manual retry (re-open the screen, re-tap) may succeed.
    ///
    /// Nothing is retried automatically.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NetworkFailure(_) | Self::RadioScanFailed(_) | Self::Api { status: 500.., .. }
        )
    }

    /// Returns a machine-readable error code.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::PermissionDenied(_) => "PERMISSION_DENIED",
            Self::NetworkFailure(_) => "NETWORK_FAILURE",
            Self::AuthFailure(_) => "AUTH_FAILURE",
            Self::Api { .. } => "API_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Decode(_) => "DECODE_ERROR",
            Self::RadioAdapterNotFound => "RADIO_ADAPTER_NOT_FOUND",
            Self::RadioAdapterPoweredOff => "RADIO_ADAPTER_POWERED_OFF",
            Self::RadioScanFailed(_) => "RADIO_SCAN_FAILED",
            Self::InvalidLocator(_) => "INVALID_LOCATOR",
            Self::AlreadyConfirmed(_) => "ALREADY_CONFIRMED",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }

    /// Text suitable for showing to the user as-is.
    ///
    /// Backend messages are passed through untouched; everything else uses
    /// the display message.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Api { message, .. } | Self::AuthFailure(message) => message.clone(),
            Self::NetworkFailure(_) => {
                "Could not reach the server. Check your connection and try again.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for QuestError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::NetworkFailure(err.to_string())
        }
    }
}

impl From<url::ParseError> for QuestError {
    fn from(err: url::ParseError) -> Self {
        Self::ConfigValidationError(format!("api.base_url: {err}"))
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for QuestError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::ReadError { path, source } => Self::ConfigParseError(format!(
                "Failed to read {}: {}",
                path.display(),
                source
            )),
            ConfigError::WriteError { path, source } => Self::IoError(std::io::Error::new(
                source.kind(),
                format!("Failed to write {}: {}", path.display(), source),
            )),
            ConfigError::ParseError(e) => Self::ConfigParseError(e),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<crate::radio::RadioError> for QuestError {
    fn from(err: crate::radio::RadioError) -> Self {
        use crate::radio::RadioError;
        match err {
            RadioError::AdapterNotFound => Self::RadioAdapterNotFound,
            RadioError::AdapterPoweredOff => Self::RadioAdapterPoweredOff,
            RadioError::PermissionDenied => Self::PermissionDenied(Capability::Radio),
            RadioError::SessionInitFailed { message }
            | RadioError::DiscoveryFailed { message } => Self::RadioScanFailed(message),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
