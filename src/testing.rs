//! In-process fake of the platform backend used by HTTP-facing tests

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::api::types::{Stream, StreamStatus, StreamView, StreamVisibility};
use crate::api::{ApiClient, OperatorSession};
use crate::config::ApiConfig;

pub(crate) struct Credential {
    pub stream_id: u64,
    pub max_uses: u32,
    pub used_count: u32,
    pub expired: bool,
}

pub(crate) struct FakeState {
    streams: Mutex<Vec<Stream>>,
    passwords: Mutex<HashMap<String, String>>,
    share_codes: Mutex<HashMap<String, Credential>>,
    share_links: Mutex<HashMap<String, Credential>>,
    issued: Mutex<HashMap<String, u64>>,
    next_token: AtomicU64,
    last_list_bearer: AtomicBool,
    list_requests: AtomicU64,
    webrtc_reply: Mutex<(StatusCode, String, String)>,
    webrtc_requests: Mutex<Vec<(String, Option<String>, String)>>,
}

pub(crate) struct FakeBackend {
    pub addr: SocketAddr,
    pub state: Arc<FakeState>,
}

fn record(id: u64, key: &str, name: &str, status: StreamStatus, visibility: StreamVisibility) -> Stream {
    Stream {
        stream_key: key.to_string(),
        share_code: None,
        share_code_max_uses: None,
        share_code_used_count: None,
        view: StreamView {
            id,
            name: name.to_string(),
            description: String::new(),
            device_id: String::new(),
            status,
            visibility,
            record_enabled: false,
            protocol: "rtmp".to_string(),
            bitrate: 0,
            fps: 0,
            streamer_name: "ops".to_string(),
            scheduled_start_time: None,
            scheduled_end_time: None,
            actual_start_time: None,
            actual_end_time: None,
            current_viewers: 0,
            total_viewers: 0,
            peak_viewers: 0,
        },
    }
}

impl FakeBackend {
    /// Seeded with one public stream (1), one private stream (7) and one ended private stream (9)
    pub async fn spawn() -> Self {
        let mut passwords = HashMap::new();
        passwords.insert("sk-private".to_string(), "hunter2".to_string());

        let mut share_codes = HashMap::new();
        share_codes.insert(
            "AB12CD34".to_string(),
            Credential { stream_id: 7, max_uses: 1, used_count: 0, expired: false },
        );
        share_codes.insert(
            "OPEN0000".to_string(),
            Credential { stream_id: 7, max_uses: 0, used_count: 0, expired: false },
        );
        share_codes.insert(
            "ENDED000".to_string(),
            Credential { stream_id: 9, max_uses: 0, used_count: 0, expired: false },
        );

        let mut share_links = HashMap::new();
        share_links.insert(
            "link-valid".to_string(),
            Credential { stream_id: 7, max_uses: 0, used_count: 0, expired: false },
        );
        share_links.insert(
            "link-expired".to_string(),
            Credential { stream_id: 7, max_uses: 0, used_count: 0, expired: true },
        );

        let state = Arc::new(FakeState {
            streams: Mutex::new(vec![
                record(1, "sk-public", "Public launch", StreamStatus::Pushing, StreamVisibility::Public),
                record(7, "sk-private", "Private rehearsal", StreamStatus::Pushing, StreamVisibility::Private),
                record(9, "sk-ended", "Yesterday", StreamStatus::Ended, StreamVisibility::Private),
            ]),
            passwords: Mutex::new(passwords),
            share_codes: Mutex::new(share_codes),
            share_links: Mutex::new(share_links),
            issued: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            last_list_bearer: AtomicBool::new(false),
            list_requests: AtomicU64::new(0),
            webrtc_reply: Mutex::new((
                StatusCode::OK,
                "application/json".to_string(),
                json!({"code": 0, "sdp": "v=0\r\nanswer\r\n"}).to_string(),
            )),
            webrtc_requests: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/streams", get(list_streams))
            .route("/streams/view/{id}", get(stream_view))
            .route("/streams/webrtc/{selector}", post(webrtc_offer))
            .route("/streams/{key}", get(stream_by_key))
            .route("/streams/{key}/verify", post(verify_password))
            .route("/shares/verify-code", post(verify_code))
            .route("/shares/verify-link", post(verify_link))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn config(&self) -> ApiConfig {
        ApiConfig {
            base_url: format!("http://{}", self.addr),
            timeout_ms: 2_000,
            ..Default::default()
        }
    }

    pub fn client(&self) -> ApiClient {
        ApiClient::new(&self.config()).unwrap()
    }

    pub fn operator_client(&self) -> ApiClient {
        self.client().with_operator(OperatorSession::new("operator-jwt"))
    }

    pub fn last_list_had_bearer(&self) -> bool {
        self.state.last_list_bearer.load(Ordering::SeqCst)
    }

    pub fn list_requests(&self) -> u64 {
        self.state.list_requests.load(Ordering::SeqCst)
    }

    pub fn set_viewers(&self, id: u64, viewers: u64) {
        if let Some(stream) = self.state.streams.lock().iter_mut().find(|s| s.view.id == id) {
            stream.view.current_viewers = viewers;
        }
    }

    pub fn share_code_used(&self, code: &str) -> u32 {
        self.state.share_codes.lock().get(code).map(|c| c.used_count).unwrap_or(0)
    }

    pub fn set_webrtc_reply(&self, status: StatusCode, content_type: &str, body: &str) {
        *self.state.webrtc_reply.lock() = (status, content_type.to_string(), body.to_string());
    }

    /// `(selector, access_token, sdp)` of every negotiation request received
    pub fn webrtc_requests(&self) -> Vec<(String, Option<String>, String)> {
        self.state.webrtc_requests.lock().clone()
    }
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn has_bearer(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("Bearer "))
        .unwrap_or(false)
}

impl FakeState {
    fn issue(&self, stream_id: u64) -> String {
        let token = format!("tok-{}", self.next_token.fetch_add(1, Ordering::SeqCst));
        self.issued.lock().insert(token.clone(), stream_id);
        token
    }

    fn authorizes(&self, token: Option<&String>, stream_id: u64) -> bool {
        token
            .and_then(|t| self.issued.lock().get(t).copied())
            .map(|id| id == stream_id)
            .unwrap_or(false)
    }

    fn stream_status(&self, id: u64) -> Option<StreamStatus> {
        self.streams.lock().iter().find(|s| s.view.id == id).map(|s| s.view.status)
    }

    fn redeem(&self, table: &Mutex<HashMap<String, Credential>>, key: &str) -> Response {
        let mut table = table.lock();
        let Some(credential) = table.get_mut(key) else {
            return error(StatusCode::NOT_FOUND, "invalid share credential");
        };
        if credential.expired {
            return error(StatusCode::UNAUTHORIZED, "share credential expired");
        }
        if self.stream_status(credential.stream_id) == Some(StreamStatus::Ended) {
            return error(StatusCode::FORBIDDEN, "stream has ended");
        }
        if credential.max_uses != 0 && credential.used_count >= credential.max_uses {
            return error(StatusCode::FORBIDDEN, "usage limit reached");
        }
        credential.used_count += 1;
        let stream_id = credential.stream_id;
        drop(table);
        let token = self.issue(stream_id);
        Json(json!({
            "stream_id": stream_id,
            "access_token": token,
            "expires_at": (Utc::now() + ChronoDuration::hours(24)).to_rfc3339(),
        }))
        .into_response()
    }
}

async fn verify_code(State(state): State<Arc<FakeState>>, Json(body): Json<Value>) -> Response {
    let code = body["share_code"].as_str().unwrap_or_default().to_string();
    state.redeem(&state.share_codes, &code)
}

async fn verify_link(State(state): State<Arc<FakeState>>, Json(body): Json<Value>) -> Response {
    let token = body["token"].as_str().unwrap_or_default().to_string();
    state.redeem(&state.share_links, &token)
}

async fn verify_password(
    State(state): State<Arc<FakeState>>,
    Path(key): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let expected = state.passwords.lock().get(&key).cloned();
    let Some(expected) = expected else {
        return error(StatusCode::NOT_FOUND, "stream not found");
    };
    if body["password"].as_str() != Some(expected.as_str()) {
        return error(StatusCode::UNAUTHORIZED, "wrong password");
    }
    let id = state
        .streams
        .lock()
        .iter()
        .find(|s| s.stream_key == key)
        .map(|s| s.view.id)
        .unwrap_or_default();
    let token = state.issue(id);
    Json(json!({ "token": token })).into_response()
}

async fn list_streams(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let operator = has_bearer(&headers);
    state.list_requests.fetch_add(1, Ordering::SeqCst);
    state.last_list_bearer.store(operator, Ordering::SeqCst);
    let token = params.get("access_token");
    let streams: Vec<Stream> = state
        .streams
        .lock()
        .iter()
        .filter(|s| params.get("status").map(|v| v == s.view.status.as_str()).unwrap_or(true))
        .filter(|s| {
            let authorized = state.authorizes(token, s.view.id);
            let visible = operator || s.view.visibility == StreamVisibility::Public || authorized;
            let wanted = params
                .get("visibility")
                .map(|v| v == s.view.visibility.as_str() || authorized)
                .unwrap_or(true);
            visible && wanted
        })
        .cloned()
        .collect();
    if operator {
        Json(json!({ "total": streams.len(), "streams": streams })).into_response()
    } else {
        let views: Vec<StreamView> = streams.into_iter().map(|s| s.view).collect();
        Json(json!({ "total": views.len(), "streams": views })).into_response()
    }
}

async fn stream_view(
    State(state): State<Arc<FakeState>>,
    Path(id): Path<u64>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let stream = state.streams.lock().iter().find(|s| s.view.id == id).cloned();
    let Some(stream) = stream else {
        return error(StatusCode::NOT_FOUND, "stream not found");
    };
    if stream.view.visibility == StreamVisibility::Private
        && !state.authorizes(params.get("access_token"), id)
    {
        return error(StatusCode::FORBIDDEN, "share code required");
    }
    Json(stream.view).into_response()
}

async fn stream_by_key(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Path(key): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let stream = state.streams.lock().iter().find(|s| s.stream_key == key).cloned();
    let Some(stream) = stream else {
        return error(StatusCode::NOT_FOUND, "stream not found");
    };
    if has_bearer(&headers) {
        return Json(stream).into_response();
    }
    if stream.view.visibility == StreamVisibility::Private
        && !state.authorizes(params.get("access_token"), stream.view.id)
    {
        return error(StatusCode::UNAUTHORIZED, "password required");
    }
    Json(stream.view).into_response()
}

async fn webrtc_offer(
    State(state): State<Arc<FakeState>>,
    Path(selector): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Response {
    let sdp = body["sdp"].as_str().unwrap_or_default().to_string();
    state
        .webrtc_requests
        .lock()
        .push((selector, params.get("access_token").cloned(), sdp));
    let (status, content_type, reply) = state.webrtc_reply.lock().clone();
    (status, [(header::CONTENT_TYPE, content_type)], reply).into_response()
}
