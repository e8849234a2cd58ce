//! Remote token introspection (RFC 7662) as an alternate verification path.
//!
//! Used when this service acts as a resource server only. Access tokens are
//! POSTed form-encoded to the configured endpoint with HTTP Basic client
//! credentials. An active response is turned into a transient token record
//! that lives only for the current request; nothing is written to storage.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use super::scope_set::ScopeSet;
use super::types::{IssuedToken, TokenRecord};
use super::verifier::TokenVerifier;
use crate::errors::VerifyError;

/// Lifetime assumed when the introspection response carries no `exp`
const DEFAULT_INTROSPECTED_TTL: i64 = 3600;

/// Introspection endpoint response body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntrospectionResponse {
    #[serde(default)]
    pub active: bool,
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub scope: Option<String>,
    /// Expiry in seconds since the epoch
    pub exp: Option<i64>,
    pub token_type: Option<String>,
}

impl IntrospectionResponse {
    /// Translate an active response into an in-memory access-only record.
    pub fn into_record(self, token: &str, now: DateTime<Utc>) -> TokenRecord {
        let expires_in = self
            .exp
            .and_then(|exp| DateTime::<Utc>::from_timestamp(exp, 0))
            .map(|exp| exp - now)
            .unwrap_or_else(|| Duration::seconds(DEFAULT_INTROSPECTED_TTL));

        let mut record = TokenRecord::new(
            self.client_id.unwrap_or_default(),
            self.username.filter(|username| !username.is_empty()),
            ScopeSet::parse(self.scope.as_deref().unwrap_or_default()),
        );
        record.access = Some(IssuedToken::new(token.to_string(), now, expires_in));
        record
    }
}

/// Verifier that delegates to a remote introspection endpoint.
pub struct IntrospectionVerifier {
    http_client: reqwest::Client,
    url: String,
    client_id: String,
    client_secret: String,
}

impl IntrospectionVerifier {
    /// Build a verifier whose HTTP client aborts requests after `timeout`.
    pub fn new(
        url: String,
        client_id: String,
        client_secret: String,
        timeout: std::time::Duration,
        user_agent: &str,
    ) -> Result<Self, VerifyError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| VerifyError::UpstreamUnavailable(e.to_string()))?;

        Ok(Self {
            http_client,
            url,
            client_id,
            client_secret,
        })
    }

    /// POST the token to the introspection endpoint.
    pub async fn introspect(&self, token: &str) -> Result<IntrospectionResponse, VerifyError> {
        let response = self
            .http_client
            .post(&self.url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("token", token)])
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "introspection request failed");
                VerifyError::UpstreamUnavailable(e.to_string())
            })?;

        if !response.status().is_success() {
            tracing::debug!(status = %response.status(), "introspection rejected token");
            return Err(VerifyError::InvalidToken);
        }

        response.json::<IntrospectionResponse>().await.map_err(|e| {
            tracing::warn!(error = %e, "introspection response could not be decoded");
            VerifyError::InvalidToken
        })
    }
}

#[async_trait]
impl TokenVerifier for IntrospectionVerifier {
    async fn lookup_access(&self, token: &str) -> Result<Option<TokenRecord>, VerifyError> {
        let response = self.introspect(token).await?;
        if !response.active {
            return Err(VerifyError::InvalidToken);
        }
        Ok(Some(response.into_record(token, Utc::now())))
    }

    async fn lookup_refresh(&self, _token: &str) -> Result<Option<TokenRecord>, VerifyError> {
        Err(VerifyError::Unsupported("refresh token lookup".to_string()))
    }

    async fn lookup_code(&self, _code: &str) -> Result<Option<TokenRecord>, VerifyError> {
        Err(VerifyError::Unsupported("authorization code lookup".to_string()))
    }
}
