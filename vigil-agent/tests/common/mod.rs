//! In-process central-server stand-in for integration tests.

// Each integration-test binary compiles this module; not every test uses
// every helper.
#![allow(dead_code)]

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Default)]
pub struct ServerState {
    /// Fail this many registration attempts with a 500 first.
    pub register_failures: AtomicU32,
    /// Answer this many event creations with `{}` (no id) first.
    pub event_id_omissions: AtomicU32,
    /// Fail every `PATCH /events/{id}/files` while set.
    pub fail_file_updates: AtomicBool,
    /// Fail every `POST /logs` while set.
    pub fail_logs: AtomicBool,
    /// Health answer.
    pub unhealthy: AtomicBool,

    pub registrations: Mutex<Vec<Value>>,
    pub events: Mutex<Vec<Value>>,
    pub file_update_attempts: AtomicU32,
    pub file_updates: Mutex<Vec<(i64, Value)>>,
    pub log_post_attempts: AtomicU32,
    pub log_batches: Mutex<Vec<Vec<Value>>>,
}

pub struct MockServer {
    pub state: Arc<ServerState>,
    pub base_url: String,
}

pub async fn spawn(state: Arc<ServerState>) -> MockServer {
    let app = Router::new()
        .route("/api/v1/cameras/register", post(register))
        .route("/api/v1/events", post(create_event))
        .route("/api/v1/events/{id}/files", patch(update_file))
        .route("/api/v1/logs", post(receive_logs))
        .route("/api/v1/health", get(health))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server");
    let addr = listener.local_addr().expect("mock server addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock server");
    });

    MockServer {
        state,
        base_url: format!("http://{addr}/api/v1"),
    }
}

fn take_budget(budget: &AtomicU32) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

async fn register(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if take_budget(&state.register_failures) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "try later"})),
        );
    }
    state.registrations.lock().unwrap().push(body);
    (StatusCode::CREATED, Json(json!({"status": "registered"})))
}

async fn create_event(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if take_budget(&state.event_id_omissions) {
        // 2xx with no id: the client must treat this as transient.
        return (StatusCode::OK, Json(json!({})));
    }
    state.events.lock().unwrap().push(body);
    let id = state.events.lock().unwrap().len() as i64 + 41;
    (StatusCode::CREATED, Json(json!({"id": id, "status": "open"})))
}

async fn update_file(
    State(state): State<Arc<ServerState>>,
    Path(event_id): Path<i64>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.file_update_attempts.fetch_add(1, Ordering::SeqCst);
    if state.fail_file_updates.load(Ordering::SeqCst) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "database busy"})),
        );
    }
    state.file_updates.lock().unwrap().push((event_id, body));
    (StatusCode::OK, Json(json!({"status": "recorded"})))
}

async fn receive_logs(
    State(state): State<Arc<ServerState>>,
    Json(batch): Json<Vec<Value>>,
) -> (StatusCode, Json<Value>) {
    state.log_post_attempts.fetch_add(1, Ordering::SeqCst);
    if state.fail_logs.load(Ordering::SeqCst) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "log store offline"})),
        );
    }
    let count = batch.len();
    state.log_batches.lock().unwrap().push(batch);
    (StatusCode::OK, Json(json!({"logs_inserted": count})))
}

async fn health(State(state): State<Arc<ServerState>>) -> (StatusCode, Json<Value>) {
    if state.unhealthy.load(Ordering::SeqCst) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "degraded"})),
        );
    }
    (StatusCode::OK, Json(json!({"status": "healthy"})))
}

/// Poll until `condition` holds or `timeout` elapses; false on timeout.
pub async fn wait_until<F: FnMut() -> bool>(
    mut condition: F,
    timeout: std::time::Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }
    condition()
}
