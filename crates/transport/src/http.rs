//! `reqwest`-based implementation of the C5 transport contract against the
//! relay's HTTP protocol.

use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tokio::time::sleep;

use notewire_core::errors::{CoreError, Result, RetryClass, SyncErrorCode};
use notewire_core::retry::classify_http_status;
use notewire_core::transport::{PullRequest, PullResponse, PushRequest, PushResponse, Transport};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const BLOB_UPLOAD_MAX_ATTEMPTS: usize = 5;
const BLOB_UPLOAD_BASE_BACKOFF_MS: u64 = 250;
const BLOB_UPLOAD_MAX_BACKOFF_MS: u64 = 8_000;

static BLOB_UPLOAD_IN_FLIGHT: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();

fn blob_upload_in_flight() -> &'static Mutex<HashSet<String>> {
    BLOB_UPLOAD_IN_FLIGHT.get_or_init(|| Mutex::new(HashSet::new()))
}

fn is_retryable_status(status: u16) -> bool {
    matches!(classify_http_status(status), RetryClass::Retryable)
}

fn is_retryable_transport_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
}

fn backoff_with_jitter(attempt: usize) -> Duration {
    let exp = (attempt.saturating_sub(1) as u32).min(8);
    let backoff = (BLOB_UPLOAD_BASE_BACKOFF_MS.saturating_mul(1_u64 << exp)).min(BLOB_UPLOAD_MAX_BACKOFF_MS);
    let jitter = rand::random::<u64>() % (backoff / 5).max(1);
    Duration::from_millis(backoff.saturating_add(jitter))
}

/// The `{code, message, retryable, details?}` envelope every relay error
/// response carries.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    code: String,
    message: String,
    #[serde(default)]
    details: Option<String>,
}

fn error_code_from_wire(code: &str) -> SyncErrorCode {
    match code {
        "AUTH" => SyncErrorCode::Auth,
        "NETWORK" => SyncErrorCode::Network,
        "HASH_MISMATCH" => SyncErrorCode::HashMismatch,
        "QUOTA" => SyncErrorCode::Quota,
        "DISK_FULL" => SyncErrorCode::DiskFull,
        "SCHEMA_INVALID" => SyncErrorCode::SchemaInvalid,
        "SCHEMA_UNSUPPORTED" => SyncErrorCode::SchemaUnsupported,
        _ => SyncErrorCode::ServerError,
    }
}

fn error_from_response(status: reqwest::StatusCode, body: &str) -> CoreError {
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) {
        let mut err = CoreError::new(error_code_from_wire(&envelope.code), envelope.message);
        if let Some(details) = envelope.details {
            err = err.with_details(details);
        }
        return err;
    }
    let code = if is_retryable_status(status.as_u16()) {
        SyncErrorCode::ServerError
    } else {
        SyncErrorCode::Validation
    };
    CoreError::new(code, format!("request failed with HTTP {status}: {body}"))
}

/// The client's signed-in HTTP transport. One instance is shared across the
/// sync engine's lifetime; the bearer token can be rotated without rebuilding
/// the underlying connection pool.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    token: RwLock<String>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: RwLock::new(token.into()),
        }
    }

    pub async fn set_token(&self, token: impl Into<String>) {
        *self.token.write().await = token.into();
    }

    async fn auth_header(&self) -> Result<HeaderMap> {
        let token = self.token.read().await.clone();
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| CoreError::auth("invalid token format"))?;
        headers.insert(AUTHORIZATION, value);
        Ok(headers)
    }

    async fn parse_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body = response.text().await.map_err(|err| CoreError::network(err.to_string()))?;
        if !status.is_success() {
            return Err(error_from_response(status, &body));
        }
        serde_json::from_str(&body).map_err(|err| {
            debug!("failed to deserialize relay response: {err}");
            CoreError::schema_invalid(format!("failed to parse relay response: {err}"))
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn push(&self, request: PushRequest) -> Result<PushResponse> {
        let url = format!("{}/sync/push", self.base_url);
        let response = self
            .client
            .post(&url)
            .headers(self.auth_header().await?)
            .json(&request)
            .send()
            .await
            .map_err(|err| CoreError::network(err.to_string()))?;
        Self::parse_json(response).await
    }

    async fn pull(&self, request: PullRequest) -> Result<PullResponse> {
        let url = format!("{}/sync/pull", self.base_url);
        let response = self
            .client
            .get(&url)
            .headers(self.auth_header().await?)
            .query(&[("cursor", request.cursor.to_string())])
            .send()
            .await
            .map_err(|err| CoreError::network(err.to_string()))?;
        Self::parse_json(response).await
    }

    async fn upload_blob(&self, _workspace_id: &str, hash: &str, content_type: &str, bytes: Vec<u8>) -> Result<()> {
        let dedupe_key = hash.to_string();
        {
            let mut in_flight = blob_upload_in_flight().lock().await;
            if !in_flight.insert(dedupe_key.clone()) {
                return Err(CoreError::validation("blob upload already in progress for this hash"));
            }
        }
        let result = self.upload_blob_with_retry(hash, content_type, bytes).await;
        blob_upload_in_flight().lock().await.remove(&dedupe_key);
        result
    }

    async fn download_blob(&self, _workspace_id: &str, hash: &str) -> Result<Vec<u8>> {
        let url = format!("{}/blobs/{hash}", self.base_url);
        let response = self
            .client
            .get(&url)
            .headers(self.auth_header().await?)
            .send()
            .await
            .map_err(|err| CoreError::network(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_from_response(status, &body));
        }
        response.bytes().await.map(|b| b.to_vec()).map_err(|err| CoreError::network(err.to_string()))
    }
}

impl HttpTransport {
    async fn upload_blob_with_retry(&self, hash: &str, content_type: &str, bytes: Vec<u8>) -> Result<()> {
        let url = format!("{}/blobs/upload?hash={hash}&contentType={content_type}", self.base_url);
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let mut headers = self.auth_header().await?;
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
            let send_result = self.client.post(&url).headers(headers).body(bytes.clone()).send().await;
            match send_result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(());
                    }
                    let body = response.text().await.unwrap_or_default();
                    let error = error_from_response(status, &body);
                    if is_retryable_status(status.as_u16()) && attempt < BLOB_UPLOAD_MAX_ATTEMPTS {
                        debug!("blob upload retry {attempt}/{BLOB_UPLOAD_MAX_ATTEMPTS} after HTTP {status}");
                        sleep(backoff_with_jitter(attempt)).await;
                        continue;
                    }
                    return Err(error);
                }
                Err(err) => {
                    if is_retryable_transport_error(&err) && attempt < BLOB_UPLOAD_MAX_ATTEMPTS {
                        debug!("blob upload retry {attempt}/{BLOB_UPLOAD_MAX_ATTEMPTS} after transport error: {err}");
                        sleep(backoff_with_jitter(attempt)).await;
                        continue;
                    }
                    return Err(CoreError::network(err.to_string()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::Mutex as TokioMutex;

    async fn read_request_line_and_drain(stream: &mut tokio::net::TcpStream) -> String {
        let mut buffer = Vec::new();
        loop {
            let mut chunk = [0_u8; 2048];
            let read = stream.read(&mut chunk).await.unwrap_or(0);
            if read == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..read]);
            if buffer.windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }
        String::from_utf8_lossy(&buffer).lines().next().unwrap_or_default().to_string()
    }

    async fn write_response(stream: &mut tokio::net::TcpStream, status: u16, body: &str) {
        let text = match status {
            200 => "OK",
            201 => "Created",
            500 => "Internal Server Error",
            _ => "Error",
        };
        let response = format!(
            "HTTP/1.1 {status} {text}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let _ = stream.write_all(response.as_bytes()).await;
        let _ = stream.flush().await;
    }

    #[tokio::test]
    async fn push_parses_successful_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(TokioMutex::new(Vec::new()));
        let requests_clone = Arc::clone(&requests);

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let line = read_request_line_and_drain(&mut stream).await;
            requests_clone.lock().await.push(line);
            let body = r#"{"accepted":[{"eventId":"e1","serverSeq":1}],"cursor":1,"missingBlobHashes":[]}"#;
            write_response(&mut stream, 200, body).await;
        });

        let transport = HttpTransport::new(format!("http://{addr}"), "token");
        let response = transport
            .push(PushRequest {
                workspace_id: "ws-1".into(),
                user_id: "user-1".into(),
                device_id: "device-a".into(),
                client_cursor: 0,
                events: vec![],
            })
            .await
            .expect("push ok");

        assert_eq!(response.cursor, 1);
        assert_eq!(response.accepted[0].event_id, "e1");
        server.await.unwrap();
        let lines = requests.lock().await.clone();
        assert!(lines[0].starts_with("POST /sync/push"));
    }

    #[tokio::test]
    async fn error_envelope_maps_to_core_error_code() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = read_request_line_and_drain(&mut stream).await;
            let body = r#"{"code":"AUTH","message":"token expired","retryable":false}"#;
            write_response(&mut stream, 401, body).await;
        });

        let transport = HttpTransport::new(format!("http://{addr}"), "token");
        let err = transport
            .pull(PullRequest { workspace_id: "ws-1".into(), user_id: "user-1".into(), device_id: "device-a".into(), cursor: 0 })
            .await
            .unwrap_err();

        assert_eq!(err.code, SyncErrorCode::Auth);
        server.await.unwrap();
    }
}
