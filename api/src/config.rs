//! Server configuration module.
//!
//! Handles loading configuration from environment variables with sensible defaults.

use anyhow::{bail, Context, Result};
use shared::config::{AuthConfig, BackendConfig, CollectorConfig};
use std::net::SocketAddr;
use std::time::Duration;

/// Log output format of the server binary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Server configuration.
///
/// Configuration values can be set via environment variables:
/// - `OTELGATE_HOST`: The host address to bind to (default: "0.0.0.0")
/// - `OTELGATE_GRPC_PORT`: OTLP/gRPC port (default: 4317)
/// - `OTELGATE_HTTP_PORT`: OTLP/HTTP and health port (default: 4318)
/// - `OTELGATE_MAX_REQUEST_BYTES`: HTTP body limit (default: 8 MiB)
/// - `OTELGATE_LOG_FORMAT`: `text` or `json`
/// - `OTELGATE_CONFIG`: Path of a JSON collector configuration file
/// - `OTELGATE_SHUTDOWN_GRACE_MS`: Drain time on shutdown
/// - `OTELGATE_EXPORTER_ENDPOINT`: Endpoint of the default backend
/// - `OTELGATE_SERVICE_NAME`, `OTELGATE_ENVIRONMENT`: Resource defaults
/// - `OTELGATE_TOKEN_URL`, `OTELGATE_CLIENT_ID`, `OTELGATE_CLIENT_SECRET`,
///   `OTELGATE_AUDIENCE`: OAuth2 client credentials
#[derive(Debug, Clone)]
pub struct Config {
    /// The host address to bind to.
    pub host: String,
    /// The OTLP/gRPC port.
    pub grpc_port: u16,
    /// The OTLP/HTTP port.
    pub http_port: u16,
    /// Maximum accepted HTTP request body, before decompression.
    pub max_request_bytes: usize,
    /// Log output format.
    pub log_format: LogFormat,
    /// Pipeline configuration.
    pub collector: CollectorConfig,
}

impl Config {
    /// Creates a new configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - A numeric variable cannot be parsed
    /// - The configuration file cannot be read
    /// - Client credentials are only partially given
    /// - The resulting collector configuration is invalid
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Creates a configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// See [`Config::from_env`].
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let host = var("OTELGATE_HOST").unwrap_or(defaults.host);

        let grpc_port = parse_var(&var, "OTELGATE_GRPC_PORT")?.unwrap_or(defaults.grpc_port);
        let http_port = parse_var(&var, "OTELGATE_HTTP_PORT")?.unwrap_or(defaults.http_port);
        let max_request_bytes =
            parse_var(&var, "OTELGATE_MAX_REQUEST_BYTES")?.unwrap_or(defaults.max_request_bytes);

        let log_format = match var("OTELGATE_LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => bail!("OTELGATE_LOG_FORMAT must be text or json, got {other:?}"),
        };

        let mut collector = match var("OTELGATE_CONFIG") {
            Some(path) => CollectorConfig::read_file(&path)?,
            None => CollectorConfig::default(),
        };
        apply_overrides(&mut collector, &var)?;
        collector.check()?;

        Ok(Self {
            host,
            grpc_port,
            http_port,
            max_request_bytes,
            log_format,
            collector,
        })
    }

    /// Returns the OTLP/gRPC socket address.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is not a valid IP address.
    pub fn grpc_addr(&self) -> Result<SocketAddr> {
        socket_addr(&self.host, self.grpc_port)
    }

    /// Returns the OTLP/HTTP socket address.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is not a valid IP address.
    pub fn http_addr(&self) -> Result<SocketAddr> {
        socket_addr(&self.host, self.http_port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            grpc_port: 4317,
            http_port: 4318,
            max_request_bytes: 8 * 1024 * 1024,
            log_format: LogFormat::Text,
            collector: CollectorConfig::default(),
        }
    }
}

fn socket_addr(host: &str, port: u16) -> Result<SocketAddr> {
    format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid listen address {host}:{port}"))
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(key)
        .map(|value| value.parse::<T>())
        .transpose()
        .with_context(|| format!("invalid value for {key}"))
}

fn apply_overrides(config: &mut CollectorConfig, var: &impl Fn(&str) -> Option<String>) -> Result<()> {
    if let Some(endpoint) = var("OTELGATE_EXPORTER_ENDPOINT") {
        match config.exporter.backends.first_mut() {
            Some(backend) => backend.endpoint = endpoint,
            None => config.exporter.backends.push(BackendConfig::new(endpoint)),
        }
    }
    if let Some(service_name) = var("OTELGATE_SERVICE_NAME") {
        config.resource.service_name = service_name;
    }
    if let Some(environment) = var("OTELGATE_ENVIRONMENT") {
        config.resource.environment = Some(environment);
    }
    if let Some(grace) = parse_var::<u64>(var, "OTELGATE_SHUTDOWN_GRACE_MS")? {
        config.shutdown_grace = Duration::from_millis(grace);
    }

    let token_url = var("OTELGATE_TOKEN_URL");
    let client_id = var("OTELGATE_CLIENT_ID");
    let client_secret = var("OTELGATE_CLIENT_SECRET");
    let audience = var("OTELGATE_AUDIENCE");

    match &mut config.auth {
        Some(auth) => {
            if let Some(token_url) = token_url {
                auth.token_url = token_url;
            }
            if let Some(client_id) = client_id {
                auth.client_id = client_id;
            }
            if let Some(client_secret) = client_secret {
                auth.client_secret = client_secret;
            }
            if audience.is_some() {
                auth.audience = audience;
            }
        }
        None => match (token_url, client_id, client_secret) {
            (Some(token_url), Some(client_id), Some(client_secret)) => {
                let mut auth = AuthConfig::new(token_url, client_id, client_secret);
                auth.audience = audience;
                config.auth = Some(auth);
            }
            (None, None, None) => {}
            _ => bail!(
                "OTELGATE_TOKEN_URL, OTELGATE_CLIENT_ID and OTELGATE_CLIENT_SECRET must be set together"
            ),
        },
    }
    Ok(())
}
