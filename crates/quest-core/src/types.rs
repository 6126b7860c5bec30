//! Request and response payloads for the quest REST API.
//!
//! Field names follow the backend's JSON (`snake_case`). Identifiers are
//! accepted as JSON strings or numbers and carried as strings.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Beacon as returned by `GET /beacons/` and `GET /beacons/{id}/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBeacon {
    /// Public beacon identifier. Absent from detail payloads.
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub beacon_id: Option<String>,

    /// Row primary key, when the backend sends one.
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub id: Option<String>,

    /// Display name.
    #[serde(default)]
    pub name: String,

    /// Free-text `"lat, lng"` location.
    #[serde(default)]
    pub location: String,

    /// Longer description, detail view only.
    #[serde(default)]
    pub description: Option<String>,

    /// Username of whoever placed the beacon.
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub created_by: Option<String>,

    /// Picture of the spot.
    #[serde(default)]
    pub image_url: Option<String>,
}

impl RawBeacon {
    /// The identifier to track the beacon by: `beacon_id`, else `id`.
    #[must_use]
    pub fn identifier(&self) -> Option<&str> {
        self.beacon_id.as_deref().or(self.id.as_deref())
    }
}

/// Body of `POST /signup/`.
#[derive(Debug, Clone, Serialize)]
pub struct SignUpRequest {
    /// Desired username.
    pub username: String,
    /// Email address.
    pub email: String,
    /// Password.
    pub password: String,
    /// Date of birth.
    pub dob: NaiveDate,
}

/// Body of `POST /signin/`.
#[derive(Debug, Clone, Serialize)]
pub struct SignInRequest {
    /// Username.
    pub username: String,
    /// Password.
    pub password: String,
}

/// Token payload from `POST /signin/`.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// Bearer access token.
    pub access: String,
    /// Refresh token, when the backend issues one.
    #[serde(default)]
    pub refresh: Option<String>,
}

/// The signed-in user, from `GET /userinfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    /// Username.
    pub username: String,
    /// Email address.
    #[serde(default)]
    pub email: Option<String>,
    /// Avatar URL.
    #[serde(default)]
    pub profile_picture: Option<String>,
    /// Free-text bio.
    #[serde(default)]
    pub bio: Option<String>,
    /// Points collected so far.
    #[serde(default, alias = "total_points")]
    pub points: Option<i64>,
}

/// Body of `POST /discover/`.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoverRequest<'a> {
    /// Beacon being confirmed.
    pub beacon_id: &'a str,
}

/// Response of `POST /discover/`.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoverResponse {
    /// Points granted by this confirmation; 0 for a repeat.
    #[serde(default)]
    pub points_awarded: i64,
    /// Explicit repeat flag, when the backend sends one.
    #[serde(default)]
    pub already_discovered: Option<bool>,
    /// Free-text message.
    #[serde(default, alias = "detail")]
    pub message: Option<String>,
}

/// One entry of `GET /my-discoveries/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryRecord {
    /// Discovered beacon.
    #[serde(deserialize_with = "string_or_number", alias = "beacon")]
    pub beacon_id: String,
    /// Beacon display name.
    #[serde(default, alias = "name")]
    pub beacon_name: Option<String>,
    /// When the discovery was recorded.
    #[serde(default, alias = "timestamp")]
    pub discovered_at: Option<DateTime<Utc>>,
    /// Points granted.
    #[serde(default)]
    pub points_awarded: i64,
}

/// Fields accepted by `PATCH /update-profile/`. `None` fields are not sent.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    /// New username.
    pub username: Option<String>,
    /// New email.
    pub email: Option<String>,
    /// New bio.
    pub bio: Option<String>,
    /// New profile picture.
    pub profile_picture: Option<ImageUpload>,
}

/// An image file to upload as a multipart part.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    /// File name sent to the server.
    pub file_name: String,
    /// MIME type, e.g. `image/jpeg`.
    pub mime_type: String,
    /// File contents.
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    /// Read an image from disk, guessing the MIME type from the extension.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn from_path(path: &std::path::Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .map_or_else(|| "avatar".to_string(), |n| n.to_string_lossy().into_owned());
        let mime_type = match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("png") => "image/png",
            Some("gif") => "image/gif",
            Some("webp") => "image/webp",
            _ => "image/jpeg",
        }
        .to_string();
        Ok(Self {
            file_name,
            mime_type,
            bytes,
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Int(i64),
    Float(f64),
}

impl From<StringOrNumber> for String {
    fn from(v: StringOrNumber) -> Self {
        match v {
            StringOrNumber::String(s) => s,
            StringOrNumber::Int(n) => n.to_string(),
            StringOrNumber::Float(n) => n.to_string(),
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    StringOrNumber::deserialize(deserializer).map(String::from)
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<StringOrNumber>::deserialize(deserializer)?.map(String::from))
}
