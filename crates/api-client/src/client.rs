//! Stylist backend API client.
//!
//! Thin REST wrapper: every method performs one request and maps the response
//! into a typed value or an [`ApiError`]. Retrying is the caller's concern.

use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use std::time::Duration;

use stylist_core::transport::DeviceInfo;

use crate::error::{ApiError, Result};
use crate::types::*;

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const MAX_LOG_BODY_CHARS: usize = 512;

/// Client for the stylist backend API.
#[derive(Debug, Clone)]
pub struct StylistApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl StylistApiClient {
    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("[StylistApi] Response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("[StylistApi] Response error ({}): {}", status, preview);
    }

    /// Create a new client with the default request timeout.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Backend API root (e.g., "https://stylist.example.com/api")
    pub fn new(base_url: &str) -> Self {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a new client whose requests abort after `timeout`.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(Self::default_headers())
            .build()
            .unwrap_or_else(|err| {
                log::warn!("[StylistApi] Failed to build HTTP client ({}); using defaults", err);
                reqwest::Client::new()
            });

        Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers
    }

    fn error_from_body(status: reqwest::StatusCode, body: &str) -> ApiError {
        if let Ok(error) = serde_json::from_str::<ApiErrorResponse>(body) {
            if let Some(detail) = error.detail {
                let message = match error.code {
                    Some(code) => format!("{}: {}", code, detail),
                    None => detail,
                };
                return ApiError::api(status.as_u16(), message);
            }
        }
        ApiError::api(status.as_u16(), format!("Request failed: {}", body))
    }

    /// Parse a JSON response body.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if !status.is_success() {
            return Err(Self::error_from_body(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            log::error!(
                "[StylistApi] Failed to deserialize response. Body: {}, Error: {}",
                body,
                e
            );
            ApiError::malformed(format!("Failed to parse response: {}", e))
        })
    }

    /// Like [`Self::parse_response`] but maps 404 to `Ok(None)`.
    async fn parse_optional_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<Option<T>> {
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!("[StylistApi] Resource not found");
            return Ok(None);
        }
        Self::parse_response(response).await.map(Some)
    }

    /// Pull a non-negative integer `balance` out of a response body.
    fn extract_balance(body: &serde_json::Value) -> Result<u64> {
        let value = body
            .get("balance")
            .ok_or_else(|| ApiError::malformed("Response has no balance field"))?;

        if let Some(balance) = value.as_u64() {
            return Ok(balance);
        }
        if let Some(balance) = value.as_f64() {
            if balance.is_finite() && balance >= 0.0 && balance.fract() == 0.0 {
                return Ok(balance as u64);
            }
        }
        Err(ApiError::malformed(format!(
            "Balance is not a non-negative integer: {}",
            value
        )))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Balance
    // ─────────────────────────────────────────────────────────────────────────

    /// Authoritative current balance.
    ///
    /// GET /users/{id}/balance
    pub async fn get_balance(&self, user_id: i64) -> Result<u64> {
        let url = format!("{}/users/{}/balance", self.base_url, user_id);

        let response = self.client.get(&url).send().await?;
        let body: serde_json::Value = Self::parse_response(response).await?;
        Self::extract_balance(&body)
    }

    /// Force a server-side refresh and return the recomputed balance.
    ///
    /// POST /users/{id}/balance/sync
    pub async fn sync_balance(&self, user_id: i64, body: BalanceSyncBody) -> Result<u64> {
        let url = format!("{}/users/{}/balance/sync", self.base_url, user_id);
        debug!("[StylistApi] Balance sync for user {}: {:?}", user_id, body);

        let response = self.client.post(&url).json(&body).send().await?;
        let body: serde_json::Value = Self::parse_response(response).await?;
        Self::extract_balance(&body)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Identity
    // ─────────────────────────────────────────────────────────────────────────

    /// Identity previously associated with a device fingerprint.
    ///
    /// GET /users/device/{fingerprint}
    pub async fn find_user_by_device(&self, fingerprint: &str) -> Result<Option<DeviceLookupUser>> {
        if fingerprint.trim().is_empty() {
            return Err(ApiError::invalid_request("Device fingerprint is empty"));
        }
        let url = format!(
            "{}/users/device/{}",
            self.base_url,
            urlencoding::encode(fingerprint)
        );

        let response = self.client.get(&url).send().await?;
        let lookup: Option<DeviceLookupResponse> = Self::parse_optional_response(response).await?;
        Ok(lookup
            .filter(|lookup| lookup.success)
            .and_then(|lookup| lookup.user)
            .filter(|user| user.effective_id().is_some()))
    }

    /// Create (or return the existing) anonymous identity for a device.
    ///
    /// POST /users/anonymous
    pub async fn create_anonymous_user(
        &self,
        fingerprint: &str,
        device_info: &DeviceInfo,
    ) -> Result<AnonymousUserPayload> {
        let url = format!("{}/users/anonymous", self.base_url);
        let request = AnonymousUserRequest {
            device_fingerprint: fingerprint,
            device_info,
        };

        let response = self.client.post(&url).json(&request).send().await?;
        let created: AnonymousUserResponse = Self::parse_response(response).await?;
        if !created.success {
            return Err(ApiError::malformed("Anonymous user creation reported failure"));
        }
        created
            .user
            .filter(|user| user.id.is_some_and(|id| id > 0))
            .ok_or_else(|| ApiError::malformed("Anonymous user response has no id"))
    }

    /// Associate an anonymous identity with a host-platform account.
    ///
    /// POST /users/link-telegram
    pub async fn link_telegram(&self, request: &LinkTelegramRequest) -> Result<SuccessResponse> {
        let url = format!("{}/users/link-telegram", self.base_url);

        let response = self.client.post(&url).json(request).send().await?;
        Self::parse_response(response).await
    }

    /// Resolve a username to a host-platform id.
    ///
    /// GET /users/resolve?username=...
    pub async fn resolve_username(&self, username: &str) -> Result<Option<i64>> {
        let handle = username.trim().trim_start_matches('@');
        if handle.is_empty() {
            return Err(ApiError::invalid_request("Username is empty"));
        }
        let url = format!(
            "{}/users/resolve?username={}",
            self.base_url,
            urlencoding::encode(handle)
        );

        let response = self.client.get(&url).send().await?;
        let resolved: Option<ResolveUsernameResponse> =
            Self::parse_optional_response(response).await?;
        Ok(resolved
            .and_then(|resolved| resolved.telegram_id)
            .filter(|id| *id > 0))
    }
}

#[cfg(test)]
pub(crate) mod test_server {
    //! Minimal scripted HTTP/1.1 server for client tests.

    use std::collections::{HashMap, VecDeque};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::Mutex as TokioMutex;

    #[derive(Debug, Clone)]
    pub struct CapturedRequest {
        pub method: String,
        pub path: String,
        pub body: String,
    }

    #[derive(Debug, Clone)]
    pub struct MockResponse {
        pub status: u16,
        pub body: String,
        pub delay_ms: u64,
    }

    impl MockResponse {
        pub fn json(status: u16, body: &str) -> Self {
            Self {
                status,
                body: body.to_string(),
                delay_ms: 0,
            }
        }

        pub fn delayed(mut self, delay_ms: u64) -> Self {
            self.delay_ms = delay_ms;
            self
        }
    }

    fn header_end_offset(buffer: &[u8]) -> Option<usize> {
        buffer.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
    }

    async fn read_http_request(stream: &mut TcpStream) -> Option<CapturedRequest> {
        let mut buffer = Vec::new();
        let mut chunk = [0_u8; 4096];
        let header_end = loop {
            let read = stream.read(&mut chunk).await.ok()?;
            if read == 0 {
                return None;
            }
            buffer.extend_from_slice(&chunk[..read]);
            if let Some(end) = header_end_offset(&buffer) {
                break end;
            }
        };

        let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
        let mut lines = head.split("\r\n");
        let request_line = lines.next()?.to_string();
        let mut parts = request_line.split_whitespace();
        let method = parts.next()?.to_string();
        let path = parts.next()?.to_string();

        let headers: HashMap<String, String> = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
            .collect();
        let content_length = headers
            .get("content-length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);

        while buffer.len() < header_end + content_length {
            let read = stream.read(&mut chunk).await.ok()?;
            if read == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..read]);
        }
        let body_end = (header_end + content_length).min(buffer.len());
        let body = String::from_utf8_lossy(&buffer[header_end..body_end]).to_string();

        Some(CapturedRequest { method, path, body })
    }

    fn status_text(status: u16) -> &'static str {
        match status {
            200 => "OK",
            201 => "Created",
            400 => "Bad Request",
            404 => "Not Found",
            500 => "Internal Server Error",
            503 => "Service Unavailable",
            _ => "Unknown",
        }
    }

    async fn write_http_response(stream: &mut TcpStream, status: u16, body: &str) {
        let response = format!(
            "HTTP/1.1 {} {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            status,
            status_text(status),
            body.len(),
            body
        );
        let _ = stream.write_all(response.as_bytes()).await;
        let _ = stream.shutdown().await;
    }

    pub async fn start(
        responses: Vec<MockResponse>,
    ) -> (
        String,
        Arc<TokioMutex<Vec<CapturedRequest>>>,
        tokio::task::JoinHandle<()>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener addr");
        let captured = Arc::new(TokioMutex::new(Vec::<CapturedRequest>::new()));
        let scripted = Arc::new(TokioMutex::new(VecDeque::from(responses)));
        let captured_clone = Arc::clone(&captured);

        let handle = tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(value) => value,
                    Err(_) => break,
                };
                let captured_inner = Arc::clone(&captured_clone);
                let scripted_inner = Arc::clone(&scripted);
                tokio::spawn(async move {
                    let Some(request) = read_http_request(&mut stream).await else {
                        return;
                    };
                    captured_inner.lock().await.push(request);
                    let response = scripted_inner
                        .lock()
                        .await
                        .pop_front()
                        .unwrap_or_else(|| {
                            MockResponse::json(500, r#"{"detail":"unexpected request"}"#)
                        });
                    if response.delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(response.delay_ms)).await;
                    }
                    write_http_response(&mut stream, response.status, &response.body).await;
                });
            }
        });

        (format!("http://{}", addr), captured, handle)
    }
}
