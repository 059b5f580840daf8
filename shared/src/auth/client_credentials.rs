//! OAuth2 client-credentials grant.

use super::{AuthError, Credential, TokenSource};
use crate::config::{AuthConfig, ClientAuthMethod};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_EXPIRES_IN: u64 = 3600;
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    token_type: Option<String>,
}

/// Fetches tokens from an OAuth2 token endpoint.
pub struct ClientCredentials {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: SecretString,
    audience: Option<String>,
    scope: Option<String>,
    method: ClientAuthMethod,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

impl ClientCredentials {
    /// Creates a token source from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &AuthConfig) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: SecretString::from(config.client_secret.clone()),
            audience: config.audience.clone(),
            scope: config.scope.clone(),
            method: config.method,
        })
    }

    fn form(&self) -> Vec<(&'static str, &str)> {
        let mut form = vec![("grant_type", "client_credentials")];
        if self.method == ClientAuthMethod::ClientSecretPost {
            form.push(("client_id", self.client_id.as_str()));
            form.push(("client_secret", self.client_secret.expose_secret()));
        }
        if let Some(audience) = &self.audience {
            form.push(("audience", audience.as_str()));
        }
        if let Some(scope) = &self.scope {
            form.push(("scope", scope.as_str()));
        }
        form
    }
}

fn parse_token_response(body: &str) -> Result<Credential, AuthError> {
    let response: TokenResponse =
        serde_json::from_str(body).map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
    if response.access_token.is_empty() {
        return Err(AuthError::InvalidResponse("empty access_token".to_string()));
    }
    if let Some(token_type) = &response.token_type {
        if !token_type.eq_ignore_ascii_case("bearer") {
            return Err(AuthError::InvalidResponse(format!(
                "unsupported token_type {token_type:?}"
            )));
        }
    }
    let lifetime = Duration::from_secs(response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN));
    Ok(Credential::new(response.access_token, lifetime))
}

#[async_trait]
impl TokenSource for ClientCredentials {
    async fn fetch(&self) -> Result<Credential, AuthError> {
        let mut request = self.client.post(&self.token_url).form(&self.form());
        if self.method == ClientAuthMethod::ClientSecretBasic {
            request = request.basic_auth(&self.client_id, Some(self.client_secret.expose_secret()));
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let mut body = body;
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|&i| body.is_char_boundary(i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            return Err(AuthError::Status {
                status: status.as_u16(),
                body,
            });
        }
        parse_token_response(&body)
    }
}
