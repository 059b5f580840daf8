//! Process resource configuration.

use crate::models::AttributeValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::Validate;

/// Identity stamped onto incoming telemetry that lacks it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ResourceConfig {
    /// `service.name` default.
    #[validate(length(min = 1))]
    pub service_name: String,
    /// `service.version` default.
    pub service_version: Option<String>,
    /// `deployment.environment` default.
    pub environment: Option<String>,
    /// `host.name` default. Falls back to the `HOSTNAME` environment variable.
    pub host_name: Option<String>,
    /// Additional attributes, e.g. `k8s.cluster.name`.
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown_service".to_string(),
            service_version: None,
            environment: None,
            host_name: None,
            attributes: BTreeMap::new(),
        }
    }
}
