//! HTTP client for the quest REST API.
//!
//! The access token lives in an [`AuthSession`] owned by the client instance:
//! [`ApiClient::sign_in`] stores it, [`ApiClient::sign_out`] clears it, and a
//! 401 from any call clears it too. Separate clients hold separate sessions.
//!
//! # Endpoints
//!
//! ```text
//! POST   signup/          create an account
//! POST   signin/          obtain an access token
//! GET    userinfo         current user
//! GET    beacons/         beacon directory
//! GET    beacons/{id}/    beacon detail
//! POST   discover/        confirm a discovery
//! GET    my-discoveries/  discovery history
//! POST   upload-avatar/   multipart `avatar`
//! PATCH  update-profile/  multipart profile fields
//! ```

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ApiConfig;
use crate::directory::BeaconSource;
use crate::discovery::DiscoveryBackend;
use crate::error::{QuestError, Result};
use crate::types::{
    DiscoverRequest, DiscoverResponse, DiscoveryRecord, ImageUpload, ProfileUpdate, RawBeacon,
    SignInRequest, SignUpRequest, TokenResponse, UserInfo,
};

/// Shown when an error body carries nothing usable.
pub const GENERIC_FAILURE: &str = "Something went wrong. Please try again.";

/// Error-body fields checked, in order, before `detail`.
const FIELD_ERRORS: [&str; 4] = ["username", "password", "email", "dob"];

/// A signed-in user's credentials.
#[derive(Debug, Clone)]
pub struct AuthSession {
    /// Username that signed in.
    pub username: String,
    /// Bearer access token.
    pub access_token: String,
    /// Refresh token, when issued.
    pub refresh_token: Option<String>,
    /// When the token was obtained.
    pub signed_in_at: DateTime<Utc>,
}

/// Client for one backend and one user session.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    session: RwLock<Option<AuthSession>>,
}

impl ApiClient {
    /// Create a signed-out client.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the HTTP client cannot
    /// be built.
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let base_url = config.base_url()?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("beacon-quest/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url,
            session: RwLock::new(None),
        })
    }

    /// The base URL every endpoint is joined onto.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Current session, if signed in.
    #[must_use]
    pub fn session(&self) -> Option<AuthSession> {
        self.session.read().ok().and_then(|s| s.clone())
    }

    /// Whether a token is held.
    #[must_use]
    pub fn is_signed_in(&self) -> bool {
        self.session.read().is_ok_and(|s| s.is_some())
    }

    /// Forget the token.
    pub fn sign_out(&self) {
        if let Ok(mut session) = self.session.write() {
            if session.take().is_some() {
                info!("signed out");
            }
        }
    }

    /// Create an account. Does not sign in.
    ///
    /// # Errors
    ///
    /// Returns the first field error the backend reports, or a network error.
    pub async fn sign_up(&self, request: &SignUpRequest) -> Result<Value> {
        let req = self.http.post(self.endpoint("signup/")?).json(request);
        self.send(req).await
    }

    /// Sign in and keep the access token for later calls.
    ///
    /// # Errors
    ///
    /// Returns `AuthFailure` for bad credentials, or a network error.
    pub async fn sign_in(&self, username: &str, password: &str) -> Result<AuthSession> {
        let req = self.http.post(self.endpoint("signin/")?).json(&SignInRequest {
            username: username.to_string(),
            password: password.to_string(),
        });
        let token: TokenResponse = self.send(req).await?;
        let session = AuthSession {
            username: username.to_string(),
            access_token: token.access,
            refresh_token: token.refresh,
            signed_in_at: Utc::now(),
        };
        if let Ok(mut slot) = self.session.write() {
            *slot = Some(session.clone());
        }
        info!(username, "signed in");
        Ok(session)
    }

    /// The signed-in user.
    ///
    /// # Errors
    ///
    /// Returns `AuthFailure` when signed out or the token expired.
    pub async fn current_user(&self) -> Result<UserInfo> {
        let req = self.authed(self.http.get(self.endpoint("userinfo")?))?;
        self.send(req).await
    }

    /// Every beacon as an undecoded JSON record. Records are decoded one
    /// at a time by [`BeaconDirectory`](crate::directory::BeaconDirectory),
    /// so one malformed entry cannot fail the listing.
    ///
    /// # Errors
    ///
    /// Returns `AuthFailure` when signed out, or a network error.
    pub async fn list_beacons(&self) -> Result<Vec<Value>> {
        let req = self.authed(self.http.get(self.endpoint("beacons/")?))?;
        self.send(req).await
    }

    /// One beacon's details. The detail payload omits `beacon_id`, so it
    /// is filled in from the requested id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id.
    pub async fn beacon(&self, beacon_id: &str) -> Result<RawBeacon> {
        let url = self.endpoint(&format!("beacons/{beacon_id}/"))?;
        let req = self.authed(self.http.get(url))?;
        let mut beacon: RawBeacon = self.send(req).await.map_err(|e| match e {
            QuestError::NotFound(_) => QuestError::NotFound(format!("beacon '{beacon_id}'")),
            other => other,
        })?;
        beacon.beacon_id.get_or_insert_with(|| beacon_id.to_string());
        Ok(beacon)
    }

    /// Record a discovery.
    ///
    /// # Errors
    ///
    /// Returns `AuthFailure` when signed out, or a backend error.
    pub async fn discover(&self, beacon_id: &str) -> Result<DiscoverResponse> {
        let req = self
            .authed(self.http.post(self.endpoint("discover/")?))?
            .json(&DiscoverRequest { beacon_id });
        self.send(req).await
    }

    /// The signed-in user's discoveries.
    ///
    /// # Errors
    ///
    /// Returns `AuthFailure` when signed out, or a network error.
    pub async fn my_discoveries(&self) -> Result<Vec<DiscoveryRecord>> {
        let req = self.authed(self.http.get(self.endpoint("my-discoveries/")?))?;
        self.send(req).await
    }

    /// Replace the profile picture.
    ///
    /// # Errors
    ///
    /// Returns `AuthFailure` when signed out, or a backend error.
    pub async fn upload_avatar(&self, image: ImageUpload) -> Result<UserInfo> {
        let form = Form::new().part("avatar", image_part(image));
        let req = self
            .authed(self.http.post(self.endpoint("upload-avatar/")?))?
            .multipart(form);
        self.send(req).await
    }

    /// Change any of username, email, bio, and picture.
    ///
    /// # Errors
    ///
    /// Returns the first field error the backend reports, or a network error.
    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<UserInfo> {
        let mut form = Form::new();
        if let Some(username) = update.username {
            form = form.text("username", username);
        }
        if let Some(email) = update.email {
            form = form.text("email", email);
        }
        if let Some(bio) = update.bio {
            form = form.text("bio", bio);
        }
        if let Some(picture) = update.profile_picture {
            form = form.part("profile_picture", image_part(picture));
        }
        let req = self
            .authed(self.http.patch(self.endpoint("update-profile/")?))?
            .multipart(form);
        self.send(req).await
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    fn authed(&self, req: RequestBuilder) -> Result<RequestBuilder> {
        let token = self
            .session
            .read()
            .ok()
            .and_then(|s| s.as_ref().map(|s| s.access_token.clone()))
            .ok_or_else(|| QuestError::AuthFailure("Please sign in first.".to_string()))?;
        Ok(req.bearer_auth(token))
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let resp = req.send().await?;
        let resp = self.check(resp).await?;
        resp.json::<T>()
            .await
            .map_err(|e| QuestError::Decode(e.to_string()))
    }

    async fn check(&self, resp: Response) -> Result<Response> {
        let status = resp.status();
        debug!(url = %resp.url(), %status, "api response");
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| extract_error_message(&v))
            .unwrap_or_else(|| GENERIC_FAILURE.to_string());
        warn!(%status, error = %message, "api request failed");

        Err(match status {
            StatusCode::UNAUTHORIZED => {
                self.sign_out();
                QuestError::AuthFailure(message)
            }
            StatusCode::NOT_FOUND => QuestError::NotFound(message),
            _ => QuestError::Api {
                status: status.as_u16(),
                message,
            },
        })
    }
}

fn image_part(image: ImageUpload) -> Part {
    let ImageUpload {
        file_name,
        mime_type,
        bytes,
    } = image;
    let part = || Part::bytes(bytes.clone()).file_name(file_name.clone());
    part().mime_str(&mime_type).unwrap_or_else(|_| part())
}

/// First usable message in an error body.
///
/// Checks `username[0]`, `password[0]`, `email[0]`, `dob[0]` in that order,
/// then `detail`. Plain strings are accepted where a list is expected.
#[must_use]
pub fn extract_error_message(body: &Value) -> Option<String> {
    let text = |v: &Value| -> Option<String> {
        match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Array(items) => items.first().and_then(Value::as_str).map(str::to_string),
            _ => None,
        }
    };

    FIELD_ERRORS
        .iter()
        .find_map(|field| body.get(field).and_then(text))
        .or_else(|| body.get("detail").and_then(text))
}

#[async_trait]
impl BeaconSource for ApiClient {
    async fn fetch_beacons(&self) -> Result<Vec<Value>> {
        self.list_beacons().await
    }
}

#[async_trait]
impl DiscoveryBackend for ApiClient {
    async fn discover(&self, beacon_id: &str) -> Result<DiscoverResponse> {
        Self::discover(self, beacon_id).await
    }
}
