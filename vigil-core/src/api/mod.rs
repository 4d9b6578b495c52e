//! Typed client for the central server's REST API.
//!
//! Five operations with heterogeneous retry policies (see [`retry`]):
//!
//! | operation         | policy                                   |
//! |-------------------|------------------------------------------|
//! | `register_camera` | infinite, 0/5/10/30/30s…                 |
//! | `create_event`    | infinite, same schedule                  |
//! | `update_file`     | 3 attempts, 1s/2s/4s                     |
//! | `send_logs`       | 2 attempts, 1s/5s                        |
//! | `check_health`    | single attempt                           |
//!
//! The infinite loops honor the shutdown token between sleeps: they never
//! return failure while the agent is running, and return [`ApiError::Cancelled`]
//! once shutdown begins. The server is the source of truth, so permanent-
//! looking HTTP statuses retry on the same schedule as transient ones.

pub mod net;
pub mod retry;

use crate::artifacts::ArtifactKind;
use reqwest::StatusCode;
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Connection pooling timeouts for the regular client.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(30);
/// Shorter budget for the informational health probe.
const HEALTH_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server returned HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("event creation response missing 'id'")]
    MissingEventId,

    #[error("gave up after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("cancelled by shutdown")]
    Cancelled,
}

/// One batched log record, as posted to `POST /logs`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    /// Camera id; the server files the record under this source.
    pub source: String,
    /// ISO-8601 with microseconds, local time.
    pub timestamp: String,
    pub level: String,
    pub message: String,
}

/// Identity and endpoint settings, mapped from the validated config.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    /// `http://{host}:{port}/api/v1`
    pub base_url: String,
    pub camera_id: String,
    pub camera_name: String,
    pub camera_location: String,
}

#[derive(Debug, Serialize)]
struct RegisterPayload<'a> {
    camera_id: &'a str,
    name: &'a str,
    location: &'a str,
    ip_address: String,
}

#[derive(Debug, Serialize)]
struct CreateEventPayload<'a> {
    camera_id: &'a str,
    timestamp: &'a str,
    motion_score: u32,
}

/// Tolerant response shape: only `id` matters, anything else is ignored.
#[derive(Debug, Deserialize)]
struct CreateEventResponse {
    #[serde(default)]
    id: Option<i64>,
}

#[derive(Debug, Serialize)]
struct UpdateFilePayload<'a> {
    file_type: &'a str,
    file_path: &'a str,
    transferred: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    video_duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SendLogsResponse {
    #[serde(default)]
    logs_inserted: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    #[serde(default)]
    status: Option<String>,
}

/// Pooled HTTP client bound to one camera identity.
pub struct ApiClient {
    http: reqwest::Client,
    health_http: reqwest::Client,
    settings: ApiSettings,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(settings: ApiSettings, shutdown: CancellationToken) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        let user_agent = format!("SecurityCamera/{}", settings.camera_id);
        let http = reqwest::Client::builder()
            .user_agent(user_agent.clone())
            .default_headers(headers.clone())
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .build()?;
        // reqwest pins the connect timeout per client, so the short-budget
        // health probe gets its own pool.
        let health_http = reqwest::Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .connect_timeout(HEALTH_CONNECT_TIMEOUT)
            .timeout(HEALTH_TIMEOUT)
            .build()?;

        info!(base_url = %settings.base_url, "API client initialized");
        Ok(Self {
            http,
            health_http,
            settings,
            shutdown,
        })
    }

    pub fn camera_id(&self) -> &str {
        &self.settings.camera_id
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url, path)
    }

    /// Sleep the given delay, or bail out early on shutdown.
    async fn backoff(&self, delay: Duration) -> Result<(), ApiError> {
        if delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(ApiError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Register this camera with the central server.
    ///
    /// Critical: the camera cannot operate unregistered, so this blocks the
    /// caller until a 2xx arrives (or shutdown cancels it).
    pub async fn register_camera(&self) -> Result<(), ApiError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.try_register(attempt).await {
                Ok(()) => {
                    info!(camera_id = %self.settings.camera_id, "camera registered");
                    return Ok(());
                }
                Err(err) => {
                    warn!(attempt, error = %err, "camera registration failed")
                }
            }

            let delay = retry::critical_delay(attempt);
            if !delay.is_zero() {
                info!(seconds = delay.as_secs(), "retrying registration");
            }
            self.backoff(delay).await?;
        }
    }

    async fn try_register(&self, attempt: u32) -> Result<(), ApiError> {
        let payload = RegisterPayload {
            camera_id: &self.settings.camera_id,
            name: &self.settings.camera_name,
            location: &self.settings.camera_location,
            ip_address: net::local_ip().to_string(),
        };
        debug!(attempt, "attempting camera registration");

        let response = self
            .http
            .post(self.url("/cameras/register"))
            .json(&payload)
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    /// Create a motion event and return the server-assigned id.
    ///
    /// Critical: events must never be lost, so this blocks until the server
    /// acknowledges with an id. A 2xx without an `id` field is treated as
    /// transient and retried on the same schedule.
    pub async fn create_event(&self, timestamp: &str, motion_score: u32) -> Result<i64, ApiError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.try_create_event(timestamp, motion_score).await {
                Ok(event_id) => {
                    info!(event_id, "event created");
                    return Ok(event_id);
                }
                Err(err) => warn!(attempt, error = %err, "event creation failed"),
            }
            self.backoff(retry::critical_delay(attempt)).await?;
        }
    }

    async fn try_create_event(&self, timestamp: &str, motion_score: u32) -> Result<i64, ApiError> {
        let payload = CreateEventPayload {
            camera_id: &self.settings.camera_id,
            timestamp,
            motion_score,
        };

        let response = self
            .http
            .post(self.url("/events"))
            .json(&payload)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let body: CreateEventResponse = response.json().await?;
        body.id.ok_or(ApiError::MissingEventId)
    }

    /// Report a transferred artifact. Best-effort: the bytes are already
    /// durable on network storage, so this gives up after three attempts.
    pub async fn update_file(
        &self,
        event_id: i64,
        kind: ArtifactKind,
        file_path: &str,
        video_duration: Option<f64>,
    ) -> Result<(), ApiError> {
        let payload = UpdateFilePayload {
            file_type: kind.file_type(),
            file_path,
            transferred: true,
            video_duration,
        };
        let url = self.url(&format!("/events/{event_id}/files"));

        for attempt in 1..=retry::UPDATE_FILE_ATTEMPTS {
            let result = async {
                let response = self.http.patch(&url).json(&payload).send().await?;
                ensure_success(response).await
            }
            .await;

            match result {
                Ok(_) => {
                    debug!(event_id, file_type = kind.file_type(), "file status updated");
                    return Ok(());
                }
                Err(err) => warn!(
                    attempt,
                    event_id,
                    file_type = kind.file_type(),
                    error = %err,
                    "file update failed"
                ),
            }

            if attempt < retry::UPDATE_FILE_ATTEMPTS {
                self.backoff(retry::update_file_delay(attempt)).await?;
            }
        }

        Err(ApiError::Exhausted {
            attempts: retry::UPDATE_FILE_ATTEMPTS,
        })
    }

    /// Ship a log batch. Best-effort: on exhaustion the batch is dropped by
    /// the caller (the console already holds the records).
    pub async fn send_logs(&self, entries: &[LogEntry]) -> Result<u64, ApiError> {
        if entries.is_empty() {
            return Ok(0);
        }

        for attempt in 1..=retry::SEND_LOGS_ATTEMPTS {
            let result = async {
                let response = self.http.post(self.url("/logs")).json(entries).send().await?;
                let response = ensure_success(response).await?;
                let body: SendLogsResponse = response.json().await?;
                Ok::<_, ApiError>(body.logs_inserted.unwrap_or(entries.len() as u64))
            }
            .await;

            match result {
                Ok(count) => return Ok(count),
                Err(err) => warn!(attempt, error = %err, "log shipment failed"),
            }

            if attempt < retry::SEND_LOGS_ATTEMPTS {
                self.backoff(retry::send_logs_delay(attempt)).await?;
            }
        }

        Err(ApiError::Exhausted {
            attempts: retry::SEND_LOGS_ATTEMPTS,
        })
    }

    /// Probe the server. Informational only: one attempt, boolean answer.
    pub async fn check_health(&self) -> bool {
        let result = async {
            let response = self
                .health_http
                .get(self.url("/health"))
                .send()
                .await?;
            let response = ensure_success(response).await?;
            let body: HealthResponse = response.json().await?;
            Ok::<_, ApiError>(body.status.as_deref() == Some("healthy"))
        }
        .await;

        result.unwrap_or(false)
    }
}

/// Map non-2xx responses to [`ApiError::Status`], capturing the body for the
/// log line.
async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status { status, body })
}
