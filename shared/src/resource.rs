//! Process-wide resource context.
//!
//! The collector's own identity defaults (service name, version, environment,
//! host and any extra attributes). Receivers stamp these onto every incoming
//! resource descriptor, filling only the keys the producer did not send.

use crate::config::ResourceConfig;
use crate::models::{AttributeValue, Attributes, Resource};
use std::sync::Arc;

/// Attribute key for the service name.
pub const SERVICE_NAME: &str = "service.name";
/// Attribute key for the service version.
pub const SERVICE_VERSION: &str = "service.version";
/// Attribute key for the deployment environment.
pub const DEPLOYMENT_ENVIRONMENT: &str = "deployment.environment";
/// Attribute key for the host name.
pub const HOST_NAME: &str = "host.name";

/// Immutable process resource, shared by reference with every pipeline.
#[derive(Debug, Clone)]
pub struct ResourceContext {
    defaults: Arc<Resource>,
}

impl ResourceContext {
    /// Creates a context from an already-built resource.
    #[must_use]
    pub fn new(defaults: Resource) -> Self {
        Self {
            defaults: Arc::new(defaults),
        }
    }

    /// Builds the context from configuration.
    ///
    /// `host.name` falls back to the `HOSTNAME` environment variable.
    #[must_use]
    pub fn from_config(config: &ResourceConfig) -> Self {
        let mut attributes: Attributes = config
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        attributes.insert(SERVICE_NAME, config.service_name.as_str());
        if let Some(version) = &config.service_version {
            attributes.insert(SERVICE_VERSION, version.as_str());
        }
        if let Some(environment) = &config.environment {
            attributes.insert(DEPLOYMENT_ENVIRONMENT, environment.as_str());
        }
        let host = config
            .host_name
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .filter(|h| !h.is_empty());
        if let Some(host) = host {
            attributes.insert(HOST_NAME, host);
        }

        Self::new(Resource::new(attributes))
    }

    /// The process resource itself.
    #[must_use]
    pub fn resource(&self) -> &Arc<Resource> {
        &self.defaults
    }

    /// Completes an incoming resource descriptor with the process defaults.
    ///
    /// Keys present on the incoming resource win. A missing descriptor gets
    /// the shared process resource without copying it.
    ///
    /// # Examples
    ///
    /// ```
    /// use shared::models::{Attributes, Resource};
    /// use shared::resource::ResourceContext;
    ///
    /// let context = ResourceContext::new(Resource::new(
    ///     Attributes::new().with("service.name", "default").with("deployment.environment", "prod"),
    /// ));
    /// let stamped = context.stamp(Some(Resource::new(
    ///     Attributes::new().with("service.name", "checkout"),
    /// )));
    ///
    /// assert_eq!(stamped.service_name(), Some("checkout"));
    /// assert!(stamped.attributes.contains_key("deployment.environment"));
    /// ```
    #[must_use]
    pub fn stamp(&self, incoming: Option<Resource>) -> Arc<Resource> {
        let Some(mut resource) = incoming else {
            return Arc::clone(&self.defaults);
        };
        for (key, value) in self.defaults.attributes.iter() {
            if !resource.attributes.contains_key(key) {
                resource.attributes.insert(key.clone(), value.clone());
            }
        }
        Arc::new(resource)
    }

    /// Returns a default attribute value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.defaults.attributes.get(key)
    }
}

impl Default for ResourceContext {
    fn default() -> Self {
        Self::from_config(&ResourceConfig::default())
    }
}
