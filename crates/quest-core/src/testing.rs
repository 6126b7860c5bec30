//! In-process backend for exercising [`ApiClient`](crate::api::ApiClient).
//!
//! Serves the quest REST routes from an axum router on an ephemeral port.
//! One account (`ana` / `hunter22`) and four beacon records, two of them
//! unusable: one with an unparseable location, one that is not a record.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::api::ApiClient;
use crate::config::ApiConfig;

#[derive(Default)]
struct Fixture {
    hits: Mutex<HashMap<&'static str, usize>>,
    discovered: Mutex<Vec<String>>,
    expired: AtomicBool,
}

type Shared = Arc<Fixture>;

impl Fixture {
    fn hit(&self, route: &'static str) {
        *self.hits.lock().unwrap().entry(route).or_default() += 1;
    }

    fn authorized(&self, headers: &HeaderMap) -> Result<(), Response> {
        let expected = format!("Bearer {}", FixtureBackend::TOKEN);
        let sent = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        if sent == Some(expected.as_str()) && !self.expired.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(reply(
                StatusCode::UNAUTHORIZED,
                json!({"detail": "Given token not valid for any token type"}),
            ))
        }
    }
}

fn reply(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

/// Handle to a running fixture server.
pub(crate) struct FixtureBackend {
    addr: SocketAddr,
    state: Shared,
}

impl FixtureBackend {
    pub(crate) const TOKEN: &'static str = "fixture-access-token";

    pub(crate) async fn spawn() -> Self {
        let state = Shared::default();
        let app = Router::new()
            .route("/api/signup/", post(sign_up))
            .route("/api/signin/", post(sign_in))
            .route("/api/userinfo", get(user_info))
            .route("/api/beacons/", get(beacons))
            .route("/api/beacons/{id}/", get(beacon))
            .route("/api/discover/", post(discover))
            .route("/api/my-discoveries/", get(my_discoveries))
            .route("/api/upload-avatar/", post(upload_avatar))
            .route("/api/update-profile/", patch(update_profile))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, state }
    }

    /// A signed-out client pointed at this server.
    pub(crate) fn client(&self) -> ApiClient {
        ApiClient::new(&ApiConfig {
            base_url: format!("http://{}/api", self.addr),
            timeout_secs: 5,
        })
        .unwrap()
    }

    /// Requests that reached `route`.
    pub(crate) fn hits(&self, route: &str) -> usize {
        self.state
            .hits
            .lock()
            .unwrap()
            .get(route)
            .copied()
            .unwrap_or(0)
    }

    /// Reject the issued token from now on.
    pub(crate) fn expire_tokens(&self) {
        self.state.expired.store(true, Ordering::SeqCst);
    }
}

async fn sign_up(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    state.hit("signup");
    if body["username"] == "taken" {
        return reply(
            StatusCode::BAD_REQUEST,
            json!({
                "email": ["user with this email already exists."],
                "username": ["A user with that username already exists."]
            }),
        );
    }
    reply(StatusCode::CREATED, json!({"username": body["username"]}))
}

async fn sign_in(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    state.hit("signin");
    if body["username"] == "ana" && body["password"] == "hunter22" {
        reply(
            StatusCode::OK,
            json!({"access": FixtureBackend::TOKEN, "refresh": "fixture-refresh-token"}),
        )
    } else {
        reply(
            StatusCode::UNAUTHORIZED,
            json!({"detail": "No active account found with the given credentials"}),
        )
    }
}

async fn user_info(State(state): State<Shared>, headers: HeaderMap) -> Response {
    state.hit("userinfo");
    if let Err(denied) = state.authorized(&headers) {
        return denied;
    }
    let points = state.discovered.lock().unwrap().len() * 10;
    reply(
        StatusCode::OK,
        json!({"username": "ana", "email": "ana@example.com", "total_points": points}),
    )
}

async fn beacons(State(state): State<Shared>, headers: HeaderMap) -> Response {
    state.hit("beacons");
    if let Err(denied) = state.authorized(&headers) {
        return denied;
    }
    reply(
        StatusCode::OK,
        json!([
            {"id": 11, "beacon_id": 1, "name": "Fig tree", "location": "-27.5263381, 153.0954163"},
            {"id": 12, "beacon_id": "2", "name": "Fountain", "location": "-27.52544,153.0954163", "created_by": 4},
            {"id": 13, "beacon_id": 3, "name": "Lost", "location": "somewhere near the lake"},
            "not a beacon"
        ]),
    )
}

async fn beacon(
    State(state): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    state.hit("beacon");
    if let Err(denied) = state.authorized(&headers) {
        return denied;
    }
    if id == "1" {
        reply(
            StatusCode::OK,
            json!({
                "name": "Fig tree",
                "location": "-27.5263381, 153.0954163",
                "description": "By the old fig tree",
                "created_by": "ana",
                "image_url": null
            }),
        )
    } else {
        reply(StatusCode::NOT_FOUND, json!({"detail": "Not found."}))
    }
}

async fn discover(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.hit("discover");
    if let Err(denied) = state.authorized(&headers) {
        return denied;
    }
    let Some(id) = body["beacon_id"].as_str().map(str::to_string) else {
        return reply(
            StatusCode::BAD_REQUEST,
            json!({"detail": "beacon_id is required"}),
        );
    };
    let mut seen = state.discovered.lock().unwrap();
    if seen.contains(&id) {
        return reply(
            StatusCode::OK,
            json!({"points_awarded": 0, "already_discovered": true, "message": "Already discovered"}),
        );
    }
    seen.push(id);
    reply(
        StatusCode::CREATED,
        json!({"points_awarded": 10, "message": "Beacon discovered!"}),
    )
}

async fn my_discoveries(State(state): State<Shared>, headers: HeaderMap) -> Response {
    state.hit("my-discoveries");
    if let Err(denied) = state.authorized(&headers) {
        return denied;
    }
    let records: Vec<Value> = state
        .discovered
        .lock()
        .unwrap()
        .iter()
        .map(|id| json!({"beacon": id, "points_awarded": 10, "timestamp": "2026-10-18T09:30:00Z"}))
        .collect();
    reply(StatusCode::OK, Value::Array(records))
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"))
}

async fn upload_avatar(State(state): State<Shared>, headers: HeaderMap, body: Bytes) -> Response {
    state.hit("upload-avatar");
    if let Err(denied) = state.authorized(&headers) {
        return denied;
    }
    if !is_multipart(&headers) || !String::from_utf8_lossy(&body).contains("name=\"avatar\"") {
        return reply(
            StatusCode::BAD_REQUEST,
            json!({"detail": "No avatar uploaded"}),
        );
    }
    reply(
        StatusCode::OK,
        json!({"username": "ana", "profile_picture": "/media/avatars/me.png"}),
    )
}

async fn update_profile(State(state): State<Shared>, headers: HeaderMap, body: Bytes) -> Response {
    state.hit("update-profile");
    if let Err(denied) = state.authorized(&headers) {
        return denied;
    }
    if !is_multipart(&headers) {
        return reply(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            json!({"detail": "Unsupported media type"}),
        );
    }
    let text = String::from_utf8_lossy(&body);
    let bio = text.contains("name=\"bio\"").then_some("Out hunting");
    reply(StatusCode::OK, json!({"username": "ana", "bio": bio}))
}
