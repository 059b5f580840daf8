//! Batch export to OTLP/HTTP backends.
//!
//! Export workers pull batches from a pipeline's batch channel and deliver
//! each one to every configured backend. Each backend gets its own retry
//! loop driven by an [`ExportAttempt`]. Failures end here: they are logged
//! and counted, never reported back to producers.

pub mod http;
pub mod retry;

pub use http::HttpTransport;
pub use retry::ExportAttempt;

use crate::auth::{AuthError, Authenticator, Credential};
use crate::config::{BackendConfig, Compression, RetryConfig};
use crate::limiter::MemoryLimiter;
use crate::models::{Batch, SignalKind};
use crate::otlp::encode_batch;
use crate::stats::PipelineStats;
use async_trait::async_trait;
use bytes::Bytes;
use flate2::write::GzEncoder;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Errors from a single export attempt.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The backend answered with a non-success status.
    #[error("backend returned status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Parsed `Retry-After` header.
        retry_after: Option<Duration>,
        /// Response body, truncated.
        body: String,
    },

    /// The attempt did not complete within the export timeout.
    #[error("export timed out after {0:?}")]
    Timeout(Duration),

    /// Connection-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// No credential could be obtained.
    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// How the retry loop treats an [`ExportError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Retry with backoff.
    Retryable,
    /// Invalidate the credential, then retry.
    Unauthorized,
    /// Drop the batch.
    NonRetryable,
}

impl ExportError {
    /// Classifies the error.
    #[must_use]
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::Status { status: 401, .. } => Disposition::Unauthorized,
            Self::Status { status, .. } if *status == 408 || *status == 429 || *status >= 500 => {
                Disposition::Retryable
            }
            Self::Status { .. } => Disposition::NonRetryable,
            Self::Timeout(_) | Self::Transport(_) | Self::Auth(_) => Disposition::Retryable,
        }
    }

    /// Server-provided retry hint.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// One encoded batch addressed to a backend.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    /// Signal, selects the URL path.
    pub kind: SignalKind,
    /// Protobuf body, compressed when `content_encoding` is set.
    pub body: Bytes,
    /// `Content-Encoding` value.
    pub content_encoding: Option<&'static str>,
    /// Bearer credential.
    pub token: Option<Arc<Credential>>,
}

/// Sends encoded batches to a backend.
#[async_trait]
pub trait ExportTransport: Send + Sync {
    /// Sends one request. Returns `Ok` on a 2xx response.
    async fn send(&self, request: &ExportRequest) -> Result<(), ExportError>;
}

/// A named export destination.
#[derive(Clone)]
pub struct Backend {
    name: String,
    transport: Arc<dyn ExportTransport>,
    compression: Compression,
    authenticate: bool,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("name", &self.name)
            .field("compression", &self.compression)
            .field("authenticate", &self.authenticate)
            .finish_non_exhaustive()
    }
}

impl Backend {
    /// Creates an uncompressed, authenticated backend.
    #[must_use]
    pub fn new(name: impl Into<String>, transport: Arc<dyn ExportTransport>) -> Self {
        Self {
            name: name.into(),
            transport,
            compression: Compression::None,
            authenticate: true,
        }
    }

    /// Creates a backend from configuration using `transport`.
    #[must_use]
    pub fn from_config(config: &BackendConfig, transport: Arc<dyn ExportTransport>) -> Self {
        Self {
            name: config.name.clone(),
            transport,
            compression: config.compression,
            authenticate: config.authenticate,
        }
    }

    /// Sets the body compression.
    #[must_use]
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Sets whether a bearer credential is attached.
    #[must_use]
    pub fn with_authentication(mut self, authenticate: bool) -> Self {
        self.authenticate = authenticate;
        self
    }

    /// Backend name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Final result of delivering a batch to one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Accepted by the backend.
    Delivered,
    /// Retries exhausted or stopped by shutdown.
    PermanentFailure,
    /// Rejected with a non-retryable response.
    Dropped,
}

fn gzip(body: &[u8]) -> std::io::Result<Bytes> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 2), flate2::Compression::default());
    encoder.write_all(body)?;
    Ok(Bytes::from(encoder.finish()?))
}

/// Delivers batches of one pipeline.
pub struct Exporter {
    kind: SignalKind,
    backends: Vec<Backend>,
    retry: RetryConfig,
    export_timeout: Duration,
    auth: Option<Authenticator>,
    limiter: Arc<MemoryLimiter>,
    stats: Arc<PipelineStats>,
    stopping: CancellationToken,
}

impl Exporter {
    /// Creates an exporter with the default retry policy, a 30 second export
    /// timeout and no authentication.
    #[must_use]
    pub fn new(
        kind: SignalKind,
        backends: Vec<Backend>,
        limiter: Arc<MemoryLimiter>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            kind,
            backends,
            retry: RetryConfig::default(),
            export_timeout: Duration::from_secs(30),
            auth: None,
            limiter,
            stats,
            stopping: CancellationToken::new(),
        }
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Bounds every send.
    #[must_use]
    pub fn with_export_timeout(mut self, timeout: Duration) -> Self {
        self.export_timeout = timeout;
        self
    }

    /// Attaches credentials from `auth` to authenticated backends.
    #[must_use]
    pub fn with_authenticator(mut self, auth: Authenticator) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Once `stopping` is cancelled, failed sends are not retried beyond one
    /// final attempt.
    #[must_use]
    pub fn with_shutdown(mut self, stopping: CancellationToken) -> Self {
        self.stopping = stopping;
        self
    }

    /// Delivers `batch` to every backend, then releases its memory
    /// reservation.
    pub async fn export(&self, batch: Batch) -> Vec<Delivery> {
        let records = batch.len();
        let body = Bytes::from(encode_batch(&batch));
        let compressed = self
            .backends
            .iter()
            .any(|b| b.compression == Compression::Gzip)
            .then(|| {
                gzip(&body)
                    .inspect_err(|e| {
                        tracing::error!(
                            signal = %self.kind,
                            batch_id = batch.id,
                            error = %e,
                            "Failed to compress batch"
                        );
                    })
                    .ok()
            })
            .flatten();
        let mut outcomes = Vec::with_capacity(self.backends.len());

        for backend in &self.backends {
            let payload = match (backend.compression, &compressed) {
                (Compression::None, _) => Some((body.clone(), None)),
                (Compression::Gzip, Some(gz)) => Some((gz.clone(), Some("gzip"))),
                (Compression::Gzip, None) => None,
            };
            let outcome = match payload {
                Some((body, encoding)) => self.deliver(backend, batch.id, body, encoding).await,
                None => Delivery::Dropped,
            };
            match outcome {
                Delivery::Delivered => self.stats.record_export_success(records),
                Delivery::PermanentFailure => self.stats.record_permanent_failure(records),
                Delivery::Dropped => self.stats.record_non_retryable_failure(records),
            }
            outcomes.push(outcome);
        }

        self.limiter.release(batch.size_bytes);
        outcomes
    }

    async fn send_once(
        &self,
        backend: &Backend,
        body: &Bytes,
        content_encoding: Option<&'static str>,
    ) -> (Result<(), ExportError>, Option<Arc<Credential>>) {
        let token = match (&self.auth, backend.authenticate) {
            (Some(auth), true) => match auth.get_valid_token().await {
                Ok(token) => Some(token),
                Err(e) => return (Err(e.into()), None),
            },
            _ => None,
        };
        let request = ExportRequest {
            kind: self.kind,
            body: body.clone(),
            content_encoding,
            token: token.clone(),
        };
        let result = tokio::time::timeout(self.export_timeout, backend.transport.send(&request))
            .await
            .unwrap_or(Err(ExportError::Timeout(self.export_timeout)));
        (result, token)
    }

    async fn deliver(
        &self,
        backend: &Backend,
        batch_id: u64,
        body: Bytes,
        content_encoding: Option<&'static str>,
    ) -> Delivery {
        let mut attempt = ExportAttempt::new(batch_id, &self.retry);
        let mut reauthenticated = false;
        let mut last_chance = false;

        loop {
            let (result, token) = self.send_once(backend, &body, content_encoding).await;
            let error = match result {
                Ok(()) => {
                    tracing::debug!(
                        signal = %self.kind,
                        backend = %backend.name,
                        batch_id,
                        attempt = attempt.attempt(),
                        "Batch exported"
                    );
                    return Delivery::Delivered;
                }
                Err(e) => e,
            };

            match error.disposition() {
                Disposition::NonRetryable => {
                    tracing::warn!(
                        signal = %self.kind,
                        backend = %backend.name,
                        batch_id,
                        error = %error,
                        "Batch rejected by backend, dropping"
                    );
                    return Delivery::Dropped;
                }
                Disposition::Unauthorized => {
                    // without a credential there is nothing to refresh
                    if let (Some(auth), Some(token)) = (&self.auth, &token) {
                        auth.invalidate(token);
                        if !reauthenticated {
                            reauthenticated = true;
                            continue;
                        }
                    }
                }
                Disposition::Retryable => {}
            }

            if last_chance || self.stopping.is_cancelled() {
                tracing::warn!(
                    signal = %self.kind,
                    backend = %backend.name,
                    batch_id,
                    error = %error,
                    "Shutting down, giving up on batch"
                );
                return Delivery::PermanentFailure;
            }
            let Some(delay) = attempt.backoff(error.retry_after()) else {
                tracing::error!(
                    signal = %self.kind,
                    backend = %backend.name,
                    batch_id,
                    attempts = attempt.attempt(),
                    elapsed_ms = u64::try_from(attempt.elapsed().as_millis()).unwrap_or(u64::MAX),
                    error = %error,
                    "Export failed permanently, dropping batch"
                );
                return Delivery::PermanentFailure;
            };

            self.stats.record_retry();
            tracing::debug!(
                signal = %self.kind,
                backend = %backend.name,
                batch_id,
                attempt = attempt.attempt(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "Export failed, retrying"
            );
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.stopping.cancelled() => last_chance = true,
            }
        }
    }

    /// Spawns `count` workers sharing `batches`. Each batch is taken by
    /// exactly one worker. Workers exit when the channel is closed and
    /// drained.
    pub fn spawn_workers(
        self: &Arc<Self>,
        batches: mpsc::Receiver<Batch>,
        count: usize,
    ) -> Vec<JoinHandle<()>> {
        let batches = Arc::new(tokio::sync::Mutex::new(batches));
        (0..count.max(1))
            .map(|worker| {
                let exporter = Arc::clone(self);
                let batches = Arc::clone(&batches);
                tokio::spawn(async move {
                    loop {
                        let next = batches.lock().await.recv().await;
                        let Some(batch) = next else { break };
                        exporter.export(batch).await;
                    }
                    tracing::debug!(signal = %exporter.kind, worker, "Export worker stopped");
                })
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::tests::FakeSource;
    use crate::auth::TokenSource;
    use crate::models::record::test_span;
    use crate::models::FlushReason;
    use crate::otlp::proto::collector::trace::v1::ExportTraceServiceRequest;
    use flate2::read::GzDecoder;
    use prost::Message;
    use std::collections::VecDeque;
    use std::io::Read;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// What a [`FakeTransport`] saw.
    #[derive(Debug, Clone)]
    pub(crate) struct Seen {
        pub kind: SignalKind,
        pub body: Bytes,
        pub encoding: Option<&'static str>,
        pub token: Option<String>,
        pub at: Instant,
    }

    impl Seen {
        /// Span names in a traces request.
        pub(crate) fn span_names(&self) -> Vec<String> {
            let mut raw = Vec::new();
            if self.encoding == Some("gzip") {
                GzDecoder::new(&self.body[..]).read_to_end(&mut raw).unwrap();
            } else {
                raw = self.body.to_vec();
            }
            ExportTraceServiceRequest::decode(&raw[..])
                .unwrap()
                .resource_spans
                .into_iter()
                .flat_map(|rs| rs.scope_spans)
                .flat_map(|ss| ss.spans)
                .map(|s| s.name)
                .collect()
        }
    }

    /// Answers with scripted status codes, then 200.
    #[derive(Default)]
    pub(crate) struct FakeTransport {
        script: Mutex<VecDeque<u16>>,
        seen: Mutex<Vec<Seen>>,
        delay: Duration,
    }

    impl FakeTransport {
        pub(crate) fn scripted(statuses: impl IntoIterator<Item = u16>) -> Self {
            Self {
                script: Mutex::new(statuses.into_iter().collect()),
                ..Self::default()
            }
        }

        pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub(crate) fn seen(&self) -> Vec<Seen> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ExportTransport for FakeTransport {
        async fn send(&self, request: &ExportRequest) -> Result<(), ExportError> {
            self.seen.lock().unwrap().push(Seen {
                kind: request.kind,
                body: request.body.clone(),
                encoding: request.content_encoding,
                token: request.token.as_ref().map(|t| t.bearer().to_string()),
                at: Instant::now(),
            });
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let status = self.script.lock().unwrap().pop_front().unwrap_or(200);
            if status < 300 {
                return Ok(());
            }
            Err(ExportError::Status {
                status,
                retry_after: (status == 429).then(|| Duration::from_secs(5)),
                body: String::new(),
            })
        }
    }

    struct Harness {
        limiter: Arc<MemoryLimiter>,
        stats: Arc<PipelineStats>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                limiter: Arc::new(MemoryLimiter::new(SignalKind::Traces, 1 << 20, 1 << 21)),
                stats: Arc::new(PipelineStats::default()),
            }
        }

        fn exporter(&self, backends: Vec<Backend>) -> Exporter {
            Exporter::new(
                SignalKind::Traces,
                backends,
                Arc::clone(&self.limiter),
                Arc::clone(&self.stats),
            )
            .with_retry(RetryConfig {
                max_attempts: 4,
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(10),
                multiplier: 2.0,
                max_elapsed_time: Duration::from_secs(300),
            })
        }

        fn batch(&self, names: &[&str]) -> Batch {
            self.limiter.admit(100, names.len()).unwrap();
            Batch {
                id: 7,
                kind: SignalKind::Traces,
                records: names.iter().map(|n| test_span(n)).collect(),
                size_bytes: 100,
                reason: FlushReason::Timer,
            }
        }
    }

    fn backend(transport: &Arc<FakeTransport>) -> Backend {
        Backend::new("test", Arc::clone(transport) as Arc<dyn ExportTransport>)
    }

    #[tokio::test(start_paused = true)]
    async fn test_export_success_releases_memory() {
        let h = Harness::new();
        let transport = Arc::new(FakeTransport::default());
        let exporter = h.exporter(vec![backend(&transport).with_compression(Compression::Gzip)]);

        let outcomes = exporter.export(h.batch(&["a", "b"])).await;

        assert_eq!(outcomes, vec![Delivery::Delivered]);
        let seen = transport.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind, SignalKind::Traces);
        assert_eq!(seen[0].encoding, Some("gzip"));
        assert_eq!(seen[0].span_names(), vec!["a", "b"]);
        assert!(seen[0].token.is_none());
        assert_eq!(h.stats.batches_exported(), 1);
        assert_eq!(h.limiter.usage(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried_with_backoff() {
        let h = Harness::new();
        let transport = Arc::new(FakeTransport::scripted([503, 503]));
        let exporter = h.exporter(vec![backend(&transport)]);
        let start = Instant::now();

        let outcomes = exporter.export(h.batch(&["a"])).await;

        assert_eq!(outcomes, vec![Delivery::Delivered]);
        let seen = transport.seen();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[1].at - seen[0].at, Duration::from_secs(1));
        assert_eq!(seen[2].at - seen[1].at, Duration::from_secs(2));
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert_eq!(h.stats.export_retries(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_is_permanent_failure() {
        let h = Harness::new();
        let transport = Arc::new(FakeTransport::scripted([500; 10]));
        let exporter = h.exporter(vec![backend(&transport)]);

        let outcomes = exporter.export(h.batch(&["a"])).await;

        assert_eq!(outcomes, vec![Delivery::PermanentFailure]);
        assert_eq!(transport.seen().len(), 4);
        assert_eq!(h.stats.permanent_failures(), 1);
        assert_eq!(h.limiter.usage(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_is_dropped_immediately() {
        let h = Harness::new();
        let transport = Arc::new(FakeTransport::scripted([400]));
        let exporter = h.exporter(vec![backend(&transport)]);

        let outcomes = exporter.export(h.batch(&["a"])).await;

        assert_eq!(outcomes, vec![Delivery::Dropped]);
        assert_eq!(transport.seen().len(), 1);
        assert_eq!(h.stats.non_retryable_failures(), 1);
        assert_eq!(h.stats.export_retries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_is_honored() {
        let h = Harness::new();
        let transport = Arc::new(FakeTransport::scripted([429]));
        let exporter = h.exporter(vec![backend(&transport)]);

        exporter.export(h.batch(&["a"])).await;

        let seen = transport.seen();
        assert_eq!(seen[1].at - seen[0].at, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_refreshes_token_and_retries_immediately() {
        let h = Harness::new();
        let source = Arc::new(FakeSource::new(Duration::from_secs(3600)));
        let auth = Authenticator::new(Arc::clone(&source) as Arc<dyn TokenSource>, Duration::from_secs(30));
        let transport = Arc::new(FakeTransport::scripted([401]));
        let exporter = h
            .exporter(vec![backend(&transport)])
            .with_authenticator(auth.clone());

        let outcomes = exporter.export(h.batch(&["a"])).await;

        assert_eq!(outcomes, vec![Delivery::Delivered]);
        let seen = transport.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].token.as_deref(), Some("token-1"));
        assert_eq!(seen[1].token.as_deref(), Some("token-2"));
        assert_eq!(seen[1].at, seen[0].at);
        assert_eq!(auth.status().invalidations, 1);
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_unauthorized_follows_backoff() {
        let h = Harness::new();
        let source = Arc::new(FakeSource::new(Duration::from_secs(3600)));
        let auth = Authenticator::new(Arc::clone(&source) as Arc<dyn TokenSource>, Duration::from_secs(30));
        let transport = Arc::new(FakeTransport::scripted([401, 401]));
        let exporter = h
            .exporter(vec![backend(&transport)])
            .with_authenticator(auth);

        let outcomes = exporter.export(h.batch(&["a"])).await;

        assert_eq!(outcomes, vec![Delivery::Delivered]);
        let seen = transport.seen();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2].at - seen[1].at, Duration::from_secs(1));
        assert_eq!(seen[2].token.as_deref(), Some("token-3"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_unauthorized_fetch_once() {
        let h = Harness::new();
        let source = Arc::new(FakeSource::new(Duration::from_secs(3600)));
        let auth = Authenticator::new(Arc::clone(&source) as Arc<dyn TokenSource>, Duration::from_secs(30));
        let transport =
            Arc::new(FakeTransport::scripted([401, 401]).with_delay(Duration::from_millis(100)));
        let exporter = h
            .exporter(vec![backend(&transport)])
            .with_authenticator(auth.clone());

        let (first, second) = tokio::join!(
            exporter.export(h.batch(&["a"])),
            exporter.export(h.batch(&["b"])),
        );

        assert_eq!(first, vec![Delivery::Delivered]);
        assert_eq!(second, vec![Delivery::Delivered]);
        let seen = transport.seen();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0].token.as_deref(), Some("token-1"));
        assert_eq!(seen[1].token.as_deref(), Some("token-1"));
        assert_eq!(seen[2].token.as_deref(), Some("token-2"));
        assert_eq!(seen[3].token.as_deref(), Some("token-2"));
        assert_eq!(auth.status().invalidations, 1);
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_without_authenticator_follows_backoff() {
        let h = Harness::new();
        let transport = Arc::new(FakeTransport::scripted([401]));
        let exporter = h.exporter(vec![backend(&transport)]);

        let outcomes = exporter.export(h.batch(&["a"])).await;

        assert_eq!(outcomes, vec![Delivery::Delivered]);
        let seen = transport.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].at - seen[0].at, Duration::from_secs(1));
        assert_eq!(h.stats.export_retries(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_unauthenticated_backend_follows_backoff() {
        let h = Harness::new();
        let source = Arc::new(FakeSource::new(Duration::from_secs(3600)));
        let auth = Authenticator::new(Arc::clone(&source) as Arc<dyn TokenSource>, Duration::from_secs(30));
        let transport = Arc::new(FakeTransport::scripted([401]));
        let exporter = h
            .exporter(vec![backend(&transport).with_authentication(false)])
            .with_authenticator(auth.clone());

        exporter.export(h.batch(&["a"])).await;

        let seen = transport.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].at - seen[0].at, Duration::from_secs(1));
        assert_eq!(source.fetches(), 0);
        assert_eq!(auth.status().invalidations, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthenticated_backend_skips_token() {
        let h = Harness::new();
        let source = Arc::new(FakeSource::new(Duration::from_secs(3600)));
        let auth = Authenticator::new(Arc::clone(&source) as Arc<dyn TokenSource>, Duration::from_secs(30));
        let transport = Arc::new(FakeTransport::default());
        let exporter = h
            .exporter(vec![backend(&transport).with_authentication(false)])
            .with_authenticator(auth);

        exporter.export(h.batch(&["a"])).await;

        assert!(transport.seen()[0].token.is_none());
        assert_eq!(source.fetches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backends_are_independent() {
        let h = Harness::new();
        let rejecting = Arc::new(FakeTransport::scripted([403]));
        let flaky = Arc::new(FakeTransport::scripted([502]));
        let exporter = h.exporter(vec![backend(&rejecting), backend(&flaky)]);

        let outcomes = exporter.export(h.batch(&["a"])).await;

        assert_eq!(outcomes, vec![Delivery::Dropped, Delivery::Delivered]);
        assert_eq!(rejecting.seen().len(), 1);
        assert_eq!(flaky.seen().len(), 2);
        assert_eq!(h.stats.batches_exported(), 1);
        assert_eq!(h.stats.non_retryable_failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retryable() {
        let h = Harness::new();
        let transport = Arc::new(FakeTransport::default().with_delay(Duration::from_secs(60)));
        let exporter = h
            .exporter(vec![backend(&transport)])
            .with_export_timeout(Duration::from_secs(2));

        let outcomes = exporter.export(h.batch(&["a"])).await;

        assert_eq!(outcomes, vec![Delivery::PermanentFailure]);
        assert_eq!(transport.seen().len(), 4);
        assert_eq!(h.stats.export_retries(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_allows_one_final_attempt() {
        let h = Harness::new();
        let transport = Arc::new(FakeTransport::scripted([503; 10]));
        let stopping = CancellationToken::new();
        let exporter = h
            .exporter(vec![backend(&transport)])
            .with_shutdown(stopping.clone());

        let export = exporter.export(h.batch(&["a"]));
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            stopping.cancel();
        };
        let (outcomes, ()) = tokio::join!(export, cancel);

        assert_eq!(outcomes, vec![Delivery::PermanentFailure]);
        assert_eq!(transport.seen().len(), 2);
        assert_eq!(h.limiter.usage(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_workers_share_batches() {
        let h = Harness::new();
        let transport = Arc::new(FakeTransport::default());
        let exporter = Arc::new(h.exporter(vec![backend(&transport)]));
        let (tx, rx) = mpsc::channel(8);
        let workers = exporter.spawn_workers(rx, 3);
        assert_eq!(workers.len(), 3);

        for i in 0..5 {
            let mut batch = h.batch(&["a"]);
            batch.id = i;
            tx.send(batch).await.unwrap();
        }
        drop(tx);
        for worker in workers {
            worker.await.unwrap();
        }

        assert_eq!(transport.seen().len(), 5);
        assert_eq!(h.stats.batches_exported(), 5);
        assert_eq!(h.limiter.usage(), 0);
    }

    #[test]
    fn test_disposition() {
        let status = |status| ExportError::Status {
            status,
            retry_after: None,
            body: String::new(),
        };
        assert_eq!(status(503).disposition(), Disposition::Retryable);
        assert_eq!(status(429).disposition(), Disposition::Retryable);
        assert_eq!(status(408).disposition(), Disposition::Retryable);
        assert_eq!(status(401).disposition(), Disposition::Unauthorized);
        assert_eq!(status(400).disposition(), Disposition::NonRetryable);
        assert_eq!(status(413).disposition(), Disposition::NonRetryable);
        assert_eq!(
            ExportError::Transport("reset".to_string()).disposition(),
            Disposition::Retryable
        );
        assert_eq!(
            ExportError::Auth(AuthError::Closed).disposition(),
            Disposition::Retryable
        );
    }
}
