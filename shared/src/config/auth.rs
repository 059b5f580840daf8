//! OAuth2 client-credentials configuration.

use serde::{Deserialize, Serialize, Serializer};
use std::time::Duration;
use validator::Validate;

/// How the client authenticates against the token endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
    /// `client_id` and `client_secret` in the form body.
    #[default]
    ClientSecretPost,
    /// HTTP basic authentication.
    ClientSecretBasic,
}

/// Token endpoint and client credentials.
#[derive(Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct AuthConfig {
    /// OAuth2 token endpoint.
    #[validate(url)]
    pub token_url: String,
    /// Client identifier.
    #[validate(length(min = 1))]
    pub client_id: String,
    /// Client secret. Never logged or serialized.
    #[serde(serialize_with = "redacted")]
    pub client_secret: String,
    /// Optional `audience` form parameter.
    #[serde(default)]
    pub audience: Option<String>,
    /// Optional `scope` form parameter.
    #[serde(default)]
    pub scope: Option<String>,
    /// Client authentication method.
    #[serde(default)]
    pub method: ClientAuthMethod,
    /// Refresh a cached token this long before it expires.
    #[serde(default = "default_refresh_margin", with = "super::duration_ms")]
    pub refresh_margin: Duration,
    /// Timeout for a token request.
    #[serde(default = "default_token_timeout", with = "super::duration_ms")]
    pub timeout: Duration,
}

fn default_refresh_margin() -> Duration {
    Duration::from_secs(30)
}

fn default_token_timeout() -> Duration {
    Duration::from_secs(10)
}

fn redacted<T: ?Sized, S: Serializer>(_: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str("***")
}

impl AuthConfig {
    /// Creates a configuration with default margin, timeout and method.
    #[must_use]
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            audience: None,
            scope: None,
            method: ClientAuthMethod::default(),
            refresh_margin: default_refresh_margin(),
            timeout: default_token_timeout(),
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("audience", &self.audience)
            .field("scope", &self.scope)
            .field("method", &self.method)
            .field("refresh_margin", &self.refresh_margin)
            .field("timeout", &self.timeout)
            .finish()
    }
}
