//! Signal pipelines and the collector that owns them.
//!
//! A [`SignalPipeline`] wires one signal's memory limiter, attribute
//! processor, batcher and export workers together. The [`Collector`] owns one
//! pipeline per signal plus the shared resource context and authenticator,
//! and is the only thing receivers talk to.
//!
//! Admission is synchronous: [`SignalPipeline::ingest`] returns once records
//! are in the batcher queue (or were refused), never after export.

use crate::auth::{AuthError, Authenticator, ClientCredentials, TokenSource};
use crate::batcher::Batcher;
use crate::config::{CollectorConfig, PipelineConfig, RetryConfig};
use crate::error::{ConfigError, LimitResolveError, PipelineError};
use crate::exporter::{Backend, ExportError, ExportTransport, Exporter, HttpTransport};
use crate::limiter::MemoryLimiter;
use crate::models::{Record, SignalKind};
use crate::otlp::proto::collector::logs::v1::ExportLogsServiceRequest;
use crate::otlp::proto::collector::metrics::v1::ExportMetricsServiceRequest;
use crate::otlp::proto::collector::trace::v1::ExportTraceServiceRequest;
use crate::otlp::{decode_logs, decode_metrics, decode_traces, Decoded};
use crate::processor::{AttributeProcessor, PatternError};
use crate::resource::ResourceContext;
use crate::stats::{CollectorSnapshot, PipelineGauges, PipelineSnapshot, PipelineStats};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(30);

/// Errors starting the collector.
#[derive(Debug, Error)]
pub enum StartError {
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A memory limit could not be resolved.
    #[error("{kind} memory limiter: {source}")]
    Limit {
        /// Pipeline.
        kind: SignalKind,
        /// Cause.
        source: LimitResolveError,
    },

    /// An attribute action could not be compiled.
    #[error("{kind} processor: {source}")]
    Pattern {
        /// Pipeline.
        kind: SignalKind,
        /// Cause.
        source: PatternError,
    },

    /// The token client could not be created.
    #[error("authenticator: {0}")]
    Auth(#[from] AuthError),

    /// A backend transport could not be created.
    #[error("exporter backend: {0}")]
    Export(#[from] ExportError),
}

/// Outcome of an accepted export request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Records admitted to the queue.
    pub accepted: usize,
    /// Items rejected while decoding.
    pub rejected: i64,
    /// Reason for the first rejection.
    pub error_message: Option<String>,
}

/// Limiter, processor, batcher and export workers of one signal.
pub struct SignalPipeline {
    kind: SignalKind,
    limiter: Arc<MemoryLimiter>,
    processor: AttributeProcessor,
    batcher: Batcher,
    stats: Arc<PipelineStats>,
    accepting: AtomicBool,
    stopping: CancellationToken,
    checker_cancel: CancellationToken,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl SignalPipeline {
    /// Starts the export workers, flush task and limiter check task.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the memory limits cannot be resolved or an
    /// attribute action is invalid.
    pub fn start(
        kind: SignalKind,
        config: &PipelineConfig,
        backends: Vec<Backend>,
        retry: &RetryConfig,
        auth: Option<Authenticator>,
    ) -> Result<Self, StartError> {
        let limiter = Arc::new(
            MemoryLimiter::from_config(kind, &config.memory_limiter)
                .map_err(|source| StartError::Limit { kind, source })?,
        );
        let processor = AttributeProcessor::new(&config.processor)
            .map_err(|source| StartError::Pattern { kind, source })?;
        let stats = Arc::new(PipelineStats::default());
        let stopping = CancellationToken::new();

        let mut exporter = Exporter::new(kind, backends, Arc::clone(&limiter), Arc::clone(&stats))
            .with_retry(retry.clone())
            .with_export_timeout(config.batch.export_timeout)
            .with_shutdown(stopping.clone());
        if let Some(auth) = auth {
            exporter = exporter.with_authenticator(auth);
        }
        let (batch_tx, batch_rx) = mpsc::channel(config.batch.max_pending_batches.max(1));
        let workers = Arc::new(exporter).spawn_workers(batch_rx, config.export_workers);

        let batcher = Batcher::start(
            kind,
            config.batch.clone(),
            Arc::clone(&limiter),
            Arc::clone(&stats),
            batch_tx,
        );

        let checker_cancel = CancellationToken::new();
        limiter.spawn_checker(config.memory_limiter.check_interval, checker_cancel.clone());

        tracing::info!(
            signal = %kind,
            soft_limit = limiter.soft_limit(),
            hard_limit = limiter.hard_limit(),
            max_queue_size = config.batch.max_queue_size,
            max_export_batch_size = config.batch.max_export_batch_size,
            workers = workers.len(),
            actions = config.processor.actions.len(),
            "Pipeline started"
        );

        Ok(Self {
            kind,
            limiter,
            processor,
            batcher,
            stats,
            accepting: AtomicBool::new(true),
            stopping,
            checker_cancel,
            workers: tokio::sync::Mutex::new(workers),
        })
    }

    /// Signal of this pipeline.
    #[must_use]
    pub fn kind(&self) -> SignalKind {
        self.kind
    }

    /// Admits records: memory limiter, then attribute processor, then the
    /// batcher queue. Returns the number of records admitted.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::AdmissionRejected`] when the limiter refuses
    /// or the queue is full, and [`PipelineError::ShuttingDown`] once
    /// shutdown began. A refused call admits nothing.
    pub fn ingest(&self, mut records: Vec<Record>) -> Result<usize, PipelineError> {
        if records.is_empty() {
            return Ok(0);
        }
        if !self.accepting.load(Ordering::Acquire) {
            return Err(PipelineError::ShuttingDown { kind: self.kind });
        }
        let count = records.len();
        self.stats.record_received(count);

        let sizes: Vec<usize> = records.iter().map(Record::estimated_size).collect();
        let reserved: usize = sizes.iter().sum();
        self.limiter.admit(reserved, count)?;

        self.processor.process(self.kind, &mut records);

        match self.batcher.push(records.into_iter().zip(sizes).collect()) {
            Ok(()) => {
                self.stats.record_admitted(count);
                Ok(count)
            }
            Err(e) => {
                self.limiter.release(reserved);
                Err(e)
            }
        }
    }

    /// Counts a request that could not be decoded.
    pub fn record_malformed(&self) {
        self.stats.record_malformed();
    }

    /// Counts items rejected while decoding.
    pub fn record_rejected(&self, items: i64) {
        if let Ok(items) = usize::try_from(items) {
            self.stats.record_rejected(items);
        }
    }

    /// Flushes the queue and waits until the batches reach the exporters.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ShuttingDown`] after shutdown.
    pub async fn force_flush(&self) -> Result<(), PipelineError> {
        self.batcher.force_flush().await
    }

    /// Stops admissions, flushes the queue and drains the export workers.
    ///
    /// Failed exports get no further retries once this is called. Workers
    /// still running after `grace` are aborted and their batches lost.
    pub async fn shutdown(&self, grace: Duration) {
        self.accepting.store(false, Ordering::Release);
        self.stopping.cancel();

        let mut workers = std::mem::take(&mut *self.workers.lock().await);
        let drain = async {
            self.batcher.shutdown().await;
            for worker in &mut workers {
                if let Err(e) = worker.await {
                    tracing::error!(signal = %self.kind, error = %e, "Export worker failed");
                }
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            tracing::warn!(
                signal = %self.kind,
                grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                "Shutdown grace period expired, aborting export workers"
            );
            for worker in &workers {
                worker.abort();
            }
        }
        self.checker_cancel.cancel();
        tracing::info!(signal = %self.kind, "Pipeline stopped");
    }

    /// Point-in-time statistics.
    #[must_use]
    pub fn snapshot(&self) -> PipelineSnapshot {
        self.stats.snapshot(PipelineGauges {
            signal: self.kind,
            queue_depth: self.batcher.queue_depth(),
            memory_usage_bytes: self.limiter.usage(),
            limiter_state: self.limiter.state(),
            rejected_admissions: self.limiter.rejected_admissions(),
            refused_records: self.limiter.refused_records(),
        })
    }
}

/// Builds a [`Collector`], optionally replacing the token source or backend
/// transports.
pub struct CollectorBuilder {
    config: CollectorConfig,
    token_source: Option<Arc<dyn TokenSource>>,
    transports: BTreeMap<String, Arc<dyn ExportTransport>>,
}

impl CollectorBuilder {
    /// Uses `source` for credentials instead of the configured token endpoint.
    #[must_use]
    pub fn token_source(mut self, source: Arc<dyn TokenSource>) -> Self {
        self.token_source = Some(source);
        self
    }

    /// Uses `transport` for the backend named `name` instead of HTTP.
    #[must_use]
    pub fn transport(mut self, name: impl Into<String>, transport: Arc<dyn ExportTransport>) -> Self {
        self.transports.insert(name.into(), transport);
        self
    }

    /// Checks the configuration and starts all pipelines.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a component
    /// cannot be created.
    pub fn start(self) -> Result<Collector, StartError> {
        let config = self.config;
        config.check()?;

        let resource = ResourceContext::from_config(&config.resource);
        let auth = match (self.token_source, &config.auth) {
            (Some(source), auth) => Some(Authenticator::new(
                source,
                auth.as_ref().map_or(DEFAULT_REFRESH_MARGIN, |a| a.refresh_margin),
            )),
            (None, Some(auth)) => Some(Authenticator::new(
                Arc::new(ClientCredentials::new(auth)?),
                auth.refresh_margin,
            )),
            (None, None) => None,
        };

        let mut backends = Vec::with_capacity(config.exporter.backends.len());
        for backend in &config.exporter.backends {
            let transport: Arc<dyn ExportTransport> = match self.transports.get(&backend.name) {
                Some(transport) => Arc::clone(transport),
                None => Arc::new(HttpTransport::new(backend)?),
            };
            backends.push(Backend::from_config(backend, transport));
        }

        let start = |kind| {
            SignalPipeline::start(
                kind,
                config.pipelines.get(kind),
                backends.clone(),
                &config.exporter.retry,
                auth.clone(),
            )
        };
        let traces = start(SignalKind::Traces)?;
        let metrics = start(SignalKind::Metrics)?;
        let logs = start(SignalKind::Logs)?;

        tracing::info!(
            service = resource.resource().service_name().unwrap_or_default(),
            backends = backends.len(),
            authenticated = auth.is_some(),
            "Collector started"
        );

        Ok(Collector {
            config,
            resource,
            auth,
            traces,
            metrics,
            logs,
        })
    }
}

/// The three signal pipelines with their shared context.
pub struct Collector {
    config: CollectorConfig,
    resource: ResourceContext,
    auth: Option<Authenticator>,
    traces: SignalPipeline,
    metrics: SignalPipeline,
    logs: SignalPipeline,
}

impl Collector {
    /// Starts a builder for `config`.
    #[must_use]
    pub fn builder(config: CollectorConfig) -> CollectorBuilder {
        CollectorBuilder {
            config,
            token_source: None,
            transports: BTreeMap::new(),
        }
    }

    /// Starts a collector with HTTP transports and the configured token
    /// endpoint.
    ///
    /// # Errors
    ///
    /// See [`CollectorBuilder::start`].
    pub fn start(config: CollectorConfig) -> Result<Self, StartError> {
        Self::builder(config).start()
    }

    /// Pipeline of `kind`.
    #[must_use]
    pub fn pipeline(&self, kind: SignalKind) -> &SignalPipeline {
        match kind {
            SignalKind::Traces => &self.traces,
            SignalKind::Metrics => &self.metrics,
            SignalKind::Logs => &self.logs,
        }
    }

    fn pipelines(&self) -> [&SignalPipeline; 3] {
        [&self.traces, &self.metrics, &self.logs]
    }

    fn ingest_decoded(&self, kind: SignalKind, decoded: Decoded) -> Result<IngestSummary, PipelineError> {
        let pipeline = self.pipeline(kind);
        if decoded.rejected > 0 {
            pipeline.record_rejected(decoded.rejected);
            tracing::debug!(
                signal = %kind,
                rejected = decoded.rejected,
                reason = decoded.error_message.as_deref().unwrap_or_default(),
                "Rejected invalid items"
            );
        }
        let accepted = pipeline.ingest(decoded.records)?;
        Ok(IngestSummary {
            accepted,
            rejected: decoded.rejected,
            error_message: decoded.error_message,
        })
    }

    /// Decodes and admits a trace export request.
    ///
    /// # Errors
    ///
    /// See [`SignalPipeline::ingest`].
    pub fn ingest_traces(&self, request: ExportTraceServiceRequest) -> Result<IngestSummary, PipelineError> {
        self.ingest_decoded(SignalKind::Traces, decode_traces(request, &self.resource))
    }

    /// Decodes and admits a metrics export request.
    ///
    /// # Errors
    ///
    /// See [`SignalPipeline::ingest`].
    pub fn ingest_metrics(&self, request: ExportMetricsServiceRequest) -> Result<IngestSummary, PipelineError> {
        self.ingest_decoded(SignalKind::Metrics, decode_metrics(request, &self.resource))
    }

    /// Decodes and admits a logs export request.
    ///
    /// # Errors
    ///
    /// See [`SignalPipeline::ingest`].
    pub fn ingest_logs(&self, request: ExportLogsServiceRequest) -> Result<IngestSummary, PipelineError> {
        self.ingest_decoded(SignalKind::Logs, decode_logs(request, &self.resource))
    }

    /// Flushes every pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ShuttingDown`] after shutdown.
    pub async fn force_flush(&self) -> Result<(), PipelineError> {
        for pipeline in self.pipelines() {
            pipeline.force_flush().await?;
        }
        Ok(())
    }

    /// Stops admissions, drains every pipeline within the configured grace
    /// period and discards the credential.
    pub async fn shutdown(&self) {
        let grace = self.config.shutdown_grace;
        tracing::info!(grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX), "Shutting down collector");
        tokio::join!(
            self.traces.shutdown(grace),
            self.metrics.shutdown(grace),
            self.logs.shutdown(grace),
        );
        if let Some(auth) = &self.auth {
            auth.close();
        }
        tracing::info!("Collector stopped");
    }

    /// Statistics of every pipeline plus credential state.
    #[must_use]
    pub fn snapshot(&self) -> CollectorSnapshot {
        CollectorSnapshot {
            traces: self.traces.snapshot(),
            metrics: self.metrics.snapshot(),
            logs: self.logs.snapshot(),
            credential: self.auth.as_ref().map(Authenticator::status),
        }
    }
}
