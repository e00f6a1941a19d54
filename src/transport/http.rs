//! HTTP client for the backend's batch-sync endpoint.
//!
//! The backend wraps every payload in `{ success, message, data, error }`; the
//! batch response lives under `data`.

use std::{sync::Arc, time::Duration};

use log::debug;
use reqwest::{Client, Request, StatusCode};
use serde::Deserialize;
use tokio::sync::RwLock;

use super::{BatchSyncRequest, BatchSyncResponse, BatchTransport, TransportError, TransportResult};

/// Connection settings for [`HttpTransport`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HttpTransportConfig {
    /// Scheme and host, e.g. `https://notes.example.com`.
    pub base_url: String,
    /// Path of the batch-sync route.
    pub batch_path: String,
    /// Whole-request timeout.
    pub timeout_ms: u64,
    /// TCP/TLS connect timeout.
    pub connect_timeout_ms: u64,
    /// Initial bearer token; replace it later with [`HttpTransport::set_access_token`].
    pub access_token: Option<String>,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            batch_path: "/api/v1/notion/blocks/batch-sync".to_string(),
            timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            access_token: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<BatchSyncResponse>,
    #[serde(default)]
    error: Option<ErrorInfo>,
}

#[derive(Debug, Deserialize)]
struct ErrorInfo {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// `reqwest`-backed [`BatchTransport`].
///
/// The bearer token is read per request, so a refreshed token applies to the
/// next batch (including retries of a batch that failed with 401).
pub struct HttpTransport {
    client: Client,
    url: String,
    access_token: Arc<RwLock<Option<String>>>,
}

impl HttpTransport {
    /// Builds the client and joins `base_url` with `batch_path`.
    pub fn new(config: HttpTransportConfig) -> TransportResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self {
            client,
            url: format!(
                "{}{}",
                config.base_url.trim_end_matches('/'),
                config.batch_path
            ),
            access_token: Arc::new(RwLock::new(config.access_token)),
        })
    }

    /// Full batch-sync URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Replaces the bearer token used from the next request on.
    pub async fn set_access_token(&self, token: String) {
        *self.access_token.write().await = Some(token);
    }

    /// Stops sending an `Authorization` header.
    pub async fn clear_access_token(&self) {
        *self.access_token.write().await = None;
    }

    /// Current bearer token, if any.
    pub async fn access_token(&self) -> Option<String> {
        self.access_token.read().await.clone()
    }

    async fn build_request(&self, request: &BatchSyncRequest) -> TransportResult<Request> {
        let mut builder = self.client.post(&self.url).json(request);
        if let Some(token) = self.access_token().await {
            builder = builder.bearer_auth(token);
        }
        builder.build().map_err(map_reqwest_error)
    }
}

impl BatchTransport for HttpTransport {
    async fn send_batch(&self, request: BatchSyncRequest) -> TransportResult<BatchSyncResponse> {
        let http_request = self.build_request(&request).await?;
        let resp = self
            .client
            .execute(http_request)
            .await
            .map_err(map_reqwest_error)?;
        let status = resp.status();
        let body = resp.bytes().await.map_err(map_reqwest_error)?;
        debug!("batch-sync returned {status} ({} bytes)", body.len());
        decode_response(status, &body)
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_decode() {
        TransportError::Decode(err.to_string())
    } else {
        TransportError::Network(err.to_string())
    }
}

fn decode_response(status: StatusCode, body: &[u8]) -> TransportResult<BatchSyncResponse> {
    let envelope = serde_json::from_slice::<Envelope>(body);

    if !status.is_success() {
        let message = match envelope {
            Ok(Envelope {
                error: Some(info), ..
            }) => format!("{}: {}", info.code, info.message),
            Ok(Envelope {
                message: Some(message),
                ..
            }) => message,
            _ => String::from_utf8_lossy(body).into_owned(),
        };
        return Err(TransportError::Status {
            status: status.as_u16(),
            message,
        });
    }

    let envelope = envelope.map_err(|e| TransportError::Decode(e.to_string()))?;
    if !envelope.success {
        let message = envelope
            .error
            .map(|info| format!("{}: {}", info.code, info.message))
            .or(envelope.message)
            .unwrap_or_else(|| "unsuccessful response".to_string());
        return Err(TransportError::Rejected(message));
    }
    envelope
        .data
        .ok_or_else(|| TransportError::Decode("response has no data".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BlockId;

    #[test]
    fn unwraps_success_envelope() {
        let body = br#"{"success": true, "message": "ok", "data": {"creates": [], "updates": [], "deletes": ["b-1"], "errors": []}, "timestamp": 1}"#;
        let resp = decode_response(StatusCode::OK, body).expect("decode");
        assert_eq!(resp.deletes, vec![BlockId::from("b-1")]);
    }

    #[test]
    fn error_status_carries_backend_message() {
        let body = br#"{"success": false, "error": {"type": "INTERNAL", "code": "BLOCK_SYNC_FAILED", "message": "db down"}, "timestamp": 1}"#;
        let err = decode_response(StatusCode::SERVICE_UNAVAILABLE, body).expect_err("status");
        assert_eq!(
            err,
            TransportError::Status {
                status: 503,
                message: "BLOCK_SYNC_FAILED: db down".into()
            }
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn unsuccessful_envelope_is_rejected() {
        let body = br#"{"success": false, "message": "forbidden", "timestamp": 1}"#;
        let err = decode_response(StatusCode::OK, body).expect_err("rejected");
        assert_eq!(err, TransportError::Rejected("forbidden".into()));
        assert!(err.is_retryable());
    }

    #[test]
    fn builds_url_from_config() {
        let transport = HttpTransport::new(HttpTransportConfig {
            base_url: "https://notes.example.com/".into(),
            ..HttpTransportConfig::default()
        })
        .expect("client");
        assert_eq!(
            transport.url(),
            "https://notes.example.com/api/v1/notion/blocks/batch-sync"
        );
    }

    #[tokio::test]
    async fn refreshed_token_applies_to_next_request() {
        let transport = HttpTransport::new(HttpTransportConfig {
            access_token: Some("stale".into()),
            ..HttpTransportConfig::default()
        })
        .expect("client");
        let batch = BatchSyncRequest::default();

        let req = transport.build_request(&batch).await.expect("request");
        assert_eq!(
            req.headers()
                .get(reqwest::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok()),
            Some("Bearer stale")
        );

        transport.set_access_token("fresh".into()).await;
        assert_eq!(transport.access_token().await.as_deref(), Some("fresh"));
        let req = transport.build_request(&batch).await.expect("request");
        assert_eq!(
            req.headers()
                .get(reqwest::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok()),
            Some("Bearer fresh")
        );

        transport.clear_access_token().await;
        let req = transport.build_request(&batch).await.expect("request");
        assert!(req.headers().get(reqwest::header::AUTHORIZATION).is_none());
    }
}
