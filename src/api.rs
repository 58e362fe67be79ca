//! Admin dashboard API store.
//!
//! Orders and reservations live behind the admin dashboard REST API. The
//! return page reads them with `GET /api/{orders|reservations}/{id}` and
//! corrects their status with `PATCH /api/{orders|reservations}/{id}/status`.
//! Every call is a single request; nothing here retries.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use zeroize::Zeroizing;

use crate::entity::{Order, OrderStatus, Reservation, ReservationStatus};
use crate::error::StoreError;
use crate::store::{OrderStore, ReservationStore, StoreKind};

/// Default timeout for API requests (30 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the admin dashboard URL:
/// - strip trailing slashes
/// - strip a trailing `/api` segment
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_admin_url(url: &str) -> String {
    let mut url = url.trim().to_string();
    if url.is_empty() {
        return url;
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }

    // "/api/" leaves a slash behind
    while url.ends_with('/') {
        url.pop();
    }

    url
}

fn decode_connection_string_payload(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        return serde_json::from_str::<Value>(trimmed).ok();
    }

    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.starts_with('{') {
        return serde_json::from_str::<Value>(&compact).ok();
    }
    if compact.len() < 20 {
        return None;
    }

    let base64 = compact.replace('-', "+").replace('_', "/");
    let padded = format!(
        "{}{}",
        base64,
        "=".repeat((4usize.wrapping_sub(base64.len() % 4)) % 4)
    );
    let decoded = BASE64_STANDARD.decode(padded).ok()?;
    serde_json::from_slice::<Value>(&decoded).ok()
}

/// API key embedded in a connection string, if `raw` is one.
pub fn extract_api_key_from_connection_string(raw: &str) -> Option<String> {
    decode_connection_string_payload(raw)
        .and_then(|v| {
            v.get("key")
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
        })
        .filter(|s| !s.is_empty())
}

pub fn extract_admin_url_from_connection_string(raw: &str) -> Option<String> {
    decode_connection_string_payload(raw)
        .and_then(|v| {
            v.get("url")
                .and_then(Value::as_str)
                .map(normalize_admin_url)
        })
        .filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn transport_error(url: &str, err: &reqwest::Error) -> StoreError {
    if err.is_connect() {
        return StoreError::Transport(format!("Cannot reach admin dashboard at {url}"));
    }
    if err.is_timeout() {
        return StoreError::Transport(format!("Connection to {url} timed out"));
    }
    if err.is_builder() {
        return StoreError::Transport(format!("Invalid admin dashboard URL: {url}"));
    }
    StoreError::Transport(format!("Network error communicating with {url}: {err}"))
}

/// Convert a non-success HTTP status into a user-friendly message.
fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "API key is invalid or expired".to_string(),
        403 => "Terminal not authorized".to_string(),
        s if s >= 500 => format!("Admin dashboard server error (HTTP {s})"),
        s => format!("Unexpected response from admin dashboard (HTTP {s})"),
    }
}

/// Pick the record out of a response body. The dashboard answers with the
/// bare record, `{ "<kind>": {...} }` or `{ "data": {...} }` depending on
/// the endpoint version. A wrapper holding `null` yields `null`.
fn unwrap_record(body: Value, kind: StoreKind) -> Value {
    match body {
        Value::Object(mut map) => {
            for key in [kind.as_str(), "data"] {
                if matches!(map.get(key), Some(Value::Object(_) | Value::Null)) {
                    if let Some(inner) = map.remove(key) {
                        return inner;
                    }
                }
            }
            Value::Object(map)
        }
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct AdminApiStore {
    base_url: String,
    api_key: Zeroizing<String>,
    client: Client,
}

impl AdminApiStore {
    /// Build a store for `admin_url`. `api_key` may be a raw key or a
    /// connection string carrying one.
    pub fn new(admin_url: &str, api_key: &str, timeout: Duration) -> Result<Self, StoreError> {
        let base_url = normalize_admin_url(admin_url);
        if base_url.is_empty() {
            return Err(StoreError::Transport(
                "Admin dashboard URL is not configured".into(),
            ));
        }
        let resolved_api_key = extract_api_key_from_connection_string(api_key)
            .unwrap_or_else(|| api_key.trim().to_string());
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Transport(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            base_url,
            api_key: Zeroizing::new(resolved_api_key),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `{base}/api/{collection}/{id}[/status]` with `id` percent-encoded as
    /// a single path segment.
    fn record_url(&self, kind: StoreKind, id: &str, status: bool) -> Result<Url, StoreError> {
        let collection = match kind {
            StoreKind::Order => "orders",
            StoreKind::Reservation => "reservations",
        };
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| StoreError::Transport(format!("Invalid admin dashboard URL: {e}")))?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                StoreError::Transport(format!("Invalid admin dashboard URL: {}", self.base_url))
            })?;
            segments.pop_if_empty().extend(["api", collection, id]);
            if status {
                segments.push("status");
            }
        }
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        kind: StoreKind,
        id: &str,
        method: Method,
        body: Option<Value>,
    ) -> Result<T, StoreError> {
        let url = self.record_url(kind, id, body.is_some())?;
        debug!(method = %method, url = %url, "Admin dashboard request");

        let mut req = self
            .client
            .request(method, url)
            .header("X-POS-API-Key", self.api_key.as_str())
            .header("Content-Type", "application/json");
        if let Some(b) = body {
            req = req.json(&b);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| transport_error(&self.base_url, &e))?;
        let status = resp.status();

        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::not_found(kind.as_str(), id));
        }
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&body_text)
                .ok()
                .and_then(|json| {
                    json.get("error")
                        .or_else(|| json.get("message"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_else(|| status_error(status));
            return Err(StoreError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body_text = resp
            .text()
            .await
            .map_err(|e| transport_error(&self.base_url, &e))?;
        let json: Value = serde_json::from_str(&body_text)
            .map_err(|e| StoreError::Decode(format!("Invalid JSON from admin dashboard: {e}")))?;
        // A success with an empty or null record means the id did not resolve.
        let record = unwrap_record(json, kind);
        if record.is_null() {
            return Err(StoreError::not_found(kind.as_str(), id));
        }
        serde_json::from_value(record).map_err(|e| StoreError::Decode(e.to_string()))
    }
}

#[async_trait]
impl OrderStore for AdminApiStore {
    async fn find_order(&self, id: &str) -> Result<Order, StoreError> {
        self.send(StoreKind::Order, id, Method::GET, None).await
    }

    async fn update_order_status(
        &self,
        id: &str,
        status: OrderStatus,
    ) -> Result<Order, StoreError> {
        let body = serde_json::json!({ "status": status });
        self.send(StoreKind::Order, id, Method::PATCH, Some(body))
            .await
    }
}

#[async_trait]
impl ReservationStore for AdminApiStore {
    async fn find_reservation(&self, id: &str) -> Result<Reservation, StoreError> {
        self.send(StoreKind::Reservation, id, Method::GET, None)
            .await
    }

    async fn update_reservation_status(
        &self,
        id: &str,
        status: ReservationStatus,
    ) -> Result<Reservation, StoreError> {
        let body = serde_json::json!({ "status": status });
        self.send(StoreKind::Reservation, id, Method::PATCH, Some(body))
            .await
    }
}
