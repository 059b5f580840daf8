//! OTLP/HTTP protobuf transport.

use super::{ExportError, ExportRequest, ExportTransport};
use crate::config::BackendConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE, RETRY_AFTER,
};
use std::time::Duration;

const PROTOBUF: &str = "application/x-protobuf";
const MAX_ERROR_BODY: usize = 512;

/// Posts encoded batches to `{endpoint}/v1/{traces|metrics|logs}`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    headers: HeaderMap,
}

impl HttpTransport {
    /// Creates a transport for one backend.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Transport`] if a configured header is not a
    /// valid HTTP header or the client cannot be built.
    pub fn new(backend: &BackendConfig) -> Result<Self, ExportError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &backend.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ExportError::Transport(format!("invalid header name {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ExportError::Transport(format!("invalid value for header {name}: {e}")))?;
            headers.insert(name, value);
        }
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ExportError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: backend.endpoint.trim_end_matches('/').to_string(),
            headers,
        })
    }
}

/// Parses `Retry-After` as delta-seconds or an HTTP date.
fn parse_retry_after(value: &HeaderValue) -> Option<Duration> {
    let value = value.to_str().ok()?.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let cut = (0..=MAX_ERROR_BODY)
            .rev()
            .find(|&i| body.is_char_boundary(i))
            .unwrap_or(0);
        body.truncate(cut);
    }
    body
}

#[async_trait]
impl ExportTransport for HttpTransport {
    async fn send(&self, request: &ExportRequest) -> Result<(), ExportError> {
        let url = format!("{}{}", self.endpoint, request.kind.path());
        let mut builder = self
            .client
            .post(url)
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, PROTOBUF)
            .body(request.body.clone());
        if let Some(encoding) = request.content_encoding {
            builder = builder.header(CONTENT_ENCODING, encoding);
        }
        if let Some(token) = &request.token {
            builder = builder.bearer_auth(token.bearer());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ExportError::Transport(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let retry_after = response.headers().get(RETRY_AFTER).and_then(parse_retry_after);
        let body = response.text().await.unwrap_or_default();
        Err(ExportError::Status {
            status: status.as_u16(),
            retry_after,
            body: truncate(body),
        })
    }
}
