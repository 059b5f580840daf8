//! Bearer credentials for export requests.
//!
//! The [`Authenticator`] caches one credential obtained from a
//! [`TokenSource`] and hands it to exporters through
//! [`Authenticator::get_valid_token`]. Refreshes are single-flight: at most
//! one fetch is in flight and concurrent callers share its result.
//! Exporters that get a 401 call [`Authenticator::invalidate`] with the token
//! that was rejected; only the first such call clears the cache.

pub mod client_credentials;

pub use client_credentials::ClientCredentials;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Lifetimes longer than this are clamped.
const MAX_LIFETIME: Duration = Duration::from_secs(365 * 24 * 3600);

/// Errors obtaining a credential.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The token request failed at the transport level.
    #[error("token request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The token endpoint answered with an error status.
    #[error("token endpoint returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// The token response could not be understood.
    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    /// A concurrent fetch this call waited on failed.
    #[error("credential unavailable: {0}")]
    Unavailable(String),

    /// The authenticator was closed.
    #[error("authenticator is closed")]
    Closed,
}

/// A bearer token with its expiry.
#[derive(Debug)]
pub struct Credential {
    token: SecretString,
    expires_at: Instant,
    expires_at_utc: DateTime<Utc>,
}

impl Credential {
    /// Creates a credential valid for `lifetime` from now.
    #[must_use]
    pub fn new(token: impl Into<String>, lifetime: Duration) -> Self {
        let lifetime = lifetime.min(MAX_LIFETIME);
        let now = Utc::now();
        Self {
            token: SecretString::from(token.into()),
            expires_at: Instant::now() + lifetime,
            expires_at_utc: chrono::Duration::from_std(lifetime).map_or(now, |d| now + d),
        }
    }

    /// The token value, for the `Authorization` header.
    #[must_use]
    pub fn bearer(&self) -> &str {
        self.token.expose_secret()
    }

    /// Wall-clock expiry.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at_utc
    }

    /// True once the expiry has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// True if the credential expires within `margin`.
    #[must_use]
    pub fn needs_refresh(&self, margin: Duration) -> bool {
        Instant::now() + margin >= self.expires_at
    }
}

/// Where credentials come from.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Obtains a new credential.
    async fn fetch(&self) -> Result<Credential, AuthError>;
}

/// Credential state reported by the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthState {
    /// No usable credential.
    Unauthenticated,
    /// A blocking fetch is in flight.
    Fetching,
    /// A valid credential is cached.
    Cached,
    /// A valid credential is cached and a background refresh is running.
    Refreshing,
    /// Closed at shutdown.
    Closed,
}

/// Snapshot of the authenticator.
#[derive(Debug, Clone, Serialize)]
pub struct AuthStatus {
    /// Current state.
    pub state: AuthState,
    /// Expiry of the cached credential.
    pub expires_at: Option<DateTime<Utc>>,
    /// Token fetches performed.
    pub fetches: u64,
    /// Credentials invalidated after a 401.
    pub invalidations: u64,
    /// Message of the last failed fetch, cleared by a successful one.
    pub last_error: Option<String>,
}

struct Inner {
    source: Arc<dyn TokenSource>,
    refresh_margin: Duration,
    cached: RwLock<Option<Arc<Credential>>>,
    fetch_lock: tokio::sync::Mutex<()>,
    generation: AtomicU64,
    last_error: Mutex<Option<String>>,
    refreshing: AtomicBool,
    closed: AtomicBool,
    fetches: AtomicU64,
    invalidations: AtomicU64,
}

/// Shared credential cache. Cloning is cheap.
#[derive(Clone)]
pub struct Authenticator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    /// Creates an authenticator that refreshes credentials `refresh_margin`
    /// before they expire.
    #[must_use]
    pub fn new(source: Arc<dyn TokenSource>, refresh_margin: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                refresh_margin,
                cached: RwLock::new(None),
                fetch_lock: tokio::sync::Mutex::new(()),
                generation: AtomicU64::new(0),
                last_error: Mutex::new(None),
                refreshing: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                fetches: AtomicU64::new(0),
                invalidations: AtomicU64::new(0),
            }),
        }
    }

    fn cached(&self) -> Option<Arc<Credential>> {
        self.inner
            .cached
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn last_error(&self) -> Option<String> {
        self.inner
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns a credential that is valid now.
    ///
    /// A cached, unexpired credential is returned without waiting; if it is
    /// within the refresh margin a background refresh is started. Otherwise
    /// the caller waits for a fetch, shared with concurrent callers.
    ///
    /// # Errors
    ///
    /// Returns the fetch error, [`AuthError::Unavailable`] when a shared
    /// fetch failed, or [`AuthError::Closed`] after [`close`](Self::close).
    pub async fn get_valid_token(&self) -> Result<Arc<Credential>, AuthError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(AuthError::Closed);
        }
        if let Some(credential) = self.cached().filter(|c| !c.is_expired()) {
            if credential.needs_refresh(self.inner.refresh_margin) {
                self.spawn_refresh();
            }
            return Ok(credential);
        }

        let generation = self.inner.generation.load(Ordering::Acquire);
        let _guard = self.inner.fetch_lock.lock().await;
        if let Some(credential) = self.cached().filter(|c| !c.is_expired()) {
            return Ok(credential);
        }
        if self.inner.generation.load(Ordering::Acquire) != generation {
            // a fetch completed while this call waited and left no credential
            let message = self
                .last_error()
                .unwrap_or_else(|| "credential was invalidated".to_string());
            return Err(AuthError::Unavailable(message));
        }
        self.fetch_locked().await
    }

    /// Fetches and caches a credential. Callers hold `fetch_lock`.
    async fn fetch_locked(&self) -> Result<Arc<Credential>, AuthError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(AuthError::Closed);
        }
        self.inner.fetches.fetch_add(1, Ordering::Relaxed);
        let result = self.inner.source.fetch().await;
        let outcome = match result {
            Ok(credential) => {
                let credential = Arc::new(credential);
                *self
                    .inner
                    .cached
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&credential));
                *self
                    .inner
                    .last_error
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = None;
                tracing::info!(expires_at = %credential.expires_at(), "Credential obtained");
                Ok(credential)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Credential fetch failed");
                *self
                    .inner
                    .last_error
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(e.to_string());
                Err(e)
            }
        };
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        outcome
    }

    fn spawn_refresh(&self) {
        if self
            .inner
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            let _guard = this.inner.fetch_lock.lock().await;
            let stale = this
                .cached()
                .is_none_or(|c| c.needs_refresh(this.inner.refresh_margin));
            if stale {
                tracing::debug!("Refreshing credential before expiry");
                // on failure the cached credential stays usable until it expires
                let _ = this.fetch_locked().await;
            }
            this.inner.refreshing.store(false, Ordering::Release);
        });
    }

    /// Drops `token` from the cache if it is still the cached credential.
    ///
    /// Returns true if this call cleared it. Concurrent calls for the same
    /// rejected token clear the cache once.
    pub fn invalidate(&self, token: &Arc<Credential>) -> bool {
        let mut cached = self
            .inner
            .cached
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match cached.as_ref() {
            Some(current) if Arc::ptr_eq(current, token) => {
                *cached = None;
                self.inner.invalidations.fetch_add(1, Ordering::Relaxed);
                tracing::info!("Credential rejected by backend, invalidated");
                true
            }
            _ => false,
        }
    }

    /// Current state for health reporting.
    #[must_use]
    pub fn status(&self) -> AuthStatus {
        let cached = self.cached();
        let valid = cached.as_ref().is_some_and(|c| !c.is_expired());
        let state = if self.inner.closed.load(Ordering::Acquire) {
            AuthState::Closed
        } else if valid && self.inner.refreshing.load(Ordering::Acquire) {
            AuthState::Refreshing
        } else if valid {
            AuthState::Cached
        } else if self.inner.fetch_lock.try_lock().is_err() {
            AuthState::Fetching
        } else {
            AuthState::Unauthenticated
        };
        AuthStatus {
            state,
            expires_at: cached.map(|c| c.expires_at()),
            fetches: self.inner.fetches.load(Ordering::Relaxed),
            invalidations: self.inner.invalidations.load(Ordering::Relaxed),
            last_error: self.last_error(),
        }
    }

    /// Discards the cached credential and refuses further requests.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        *self
            .inner
            .cached
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
        tracing::debug!("Authenticator closed");
    }
}
