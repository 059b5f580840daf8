//! Application state module.
//!
//! Defines the shared application state that is passed to route handlers
//! and gRPC services.

use shared::Collector;
use std::sync::Arc;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    collector: Arc<Collector>,
}

impl AppState {
    /// Creates a new application state around a running collector.
    #[must_use]
    pub fn new(collector: Arc<Collector>) -> Self {
        Self { collector }
    }

    /// Returns the collector.
    #[must_use]
    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    /// Returns a shared handle to the collector.
    #[must_use]
    pub fn collector_handle(&self) -> Arc<Collector> {
        Arc::clone(&self.collector)
    }
}
