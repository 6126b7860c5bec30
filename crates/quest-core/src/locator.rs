//! Beacon identification from scanned QR payloads.
//!
//! Printed codes carry `https://<host>/.../beacon/{id}`. Inside the app the
//! beacon travels as `beacon://{id}`.

use std::fmt;
use std::str::FromStr;

use url::Url;

use crate::error::QuestError;

/// Custom scheme used when handing a beacon to the detail/discovery view.
pub const BEACON_SCHEME: &str = "beacon";

/// A beacon identifier extracted from a QR code or an internal link.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BeaconLocator {
    id: String,
}

impl BeaconLocator {
    /// Wrap an already-known beacon id.
    ///
    /// # Errors
    ///
    /// Returns `InvalidLocator` for an empty or slash-containing id.
    pub fn new(id: impl Into<String>) -> Result<Self, QuestError> {
        let id = id.into();
        if id.is_empty() || id.contains('/') {
            return Err(QuestError::InvalidLocator(id));
        }
        Ok(Self { id })
    }

    /// The beacon id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Internal `beacon://{id}` form.
    #[must_use]
    pub fn to_custom_scheme(&self) -> String {
        format!("{BEACON_SCHEME}://{}", self.id)
    }
}

impl FromStr for BeaconLocator {
    type Err = QuestError;

    /// Accepts `http(s)://host/.../beacon/{id}[/]` and `beacon://{id}`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || QuestError::InvalidLocator(raw.to_string());
        let url = Url::parse(raw.trim()).map_err(|_| invalid())?;

        match url.scheme() {
            BEACON_SCHEME => {
                let id = url
                    .host_str()
                    .map(str::to_string)
                    .or_else(|| {
                        let path = url.path().trim_matches('/');
                        (!path.is_empty()).then(|| path.to_string())
                    })
                    .ok_or_else(invalid)?;
                Self::new(id).map_err(|_| invalid())
            }
            "http" | "https" => {
                let segments: Vec<&str> = url
                    .path_segments()
                    .map(|s| s.filter(|seg| !seg.is_empty()).collect())
                    .unwrap_or_default();
                match segments.as_slice() {
                    [.., "beacon", id] => Self::new(*id).map_err(|_| invalid()),
                    _ => Err(invalid()),
                }
            }
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for BeaconLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_custom_scheme())
    }
}
