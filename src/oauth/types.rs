//! OAuth 2.0 core types and data structures.
//!
//! Defines grant types, token records, clients, and the request/response
//! shapes of the token and authorize endpoints.

use base64::prelude::*;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

use super::scope_set::ScopeSet;
use crate::errors::OAuthError;

/// OAuth 2.0 Grant Types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    Password,
    ClientCredentials,
    RefreshToken,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::AuthorizationCode => "authorization_code",
            GrantType::Password => "password",
            GrantType::ClientCredentials => "client_credentials",
            GrantType::RefreshToken => "refresh_token",
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantType {
    type Err = OAuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "authorization_code" => Ok(GrantType::AuthorizationCode),
            "password" => Ok(GrantType::Password),
            "client_credentials" => Ok(GrantType::ClientCredentials),
            "refresh_token" => Ok(GrantType::RefreshToken),
            other => Err(OAuthError::UnsupportedGrantType(other.to_string())),
        }
    }
}

/// OAuth 2.0 Token Types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenType {
    Bearer,
}

/// The three token strings a record can be looked up by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Code,
    Access,
    Refresh,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Code => f.write_str("code"),
            TokenKind::Access => f.write_str("access"),
            TokenKind::Refresh => f.write_str("refresh"),
        }
    }
}

/// One issued token string with its lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub expires_in: Duration,
}

impl IssuedToken {
    pub fn new(value: String, created_at: DateTime<Utc>, expires_in: Duration) -> Self {
        Self {
            value,
            created_at,
            expires_in,
        }
    }

    /// Generate a fresh random token starting its lifetime at `now`.
    pub fn generate(now: DateTime<Utc>, expires_in: Duration) -> Self {
        Self::new(generate_token(), now, expires_in)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + self.expires_in
    }

    /// A token is expired once `now` is strictly past creation plus TTL.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }
}

/// Persisted grant: one record per issuance, looked up by any of its token strings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub client_id: String,
    /// Resource owner; absent for client-credentials grants
    pub user_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: ScopeSet,
    pub code: Option<IssuedToken>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub access: Option<IssuedToken>,
    pub refresh: Option<IssuedToken>,
}

impl TokenRecord {
    pub fn new(client_id: impl Into<String>, user_id: Option<String>, scope: ScopeSet) -> Self {
        Self {
            client_id: client_id.into(),
            user_id,
            redirect_uri: None,
            scope,
            code: None,
            code_challenge: None,
            code_challenge_method: None,
            access: None,
            refresh: None,
        }
    }

    pub fn token(&self, kind: TokenKind) -> Option<&IssuedToken> {
        match kind {
            TokenKind::Code => self.code.as_ref(),
            TokenKind::Access => self.access.as_ref(),
            TokenKind::Refresh => self.refresh.as_ref(),
        }
    }

    /// Expired for `kind`, treating an absent token as expired.
    pub fn is_expired(&self, kind: TokenKind, now: DateTime<Utc>) -> bool {
        self.token(kind)
            .map(|token| token.is_expired_at(now))
            .unwrap_or(true)
    }

    /// Latest expiry across the present tokens; the record is dead after this instant.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        [&self.code, &self.access, &self.refresh]
            .into_iter()
            .flatten()
            .map(IssuedToken::expires_at)
            .max()
    }
}

/// Registered OAuth client and its authorization policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Client {
    pub id: String,
    #[serde(skip_serializing)]
    pub secret: String,
    /// Registered redirect origin (and optional path prefix) for authorize redirects
    pub domain: String,
    pub public: bool,
    pub user_id: Option<String>,
    pub scopes: ScopeSet,
    pub grant_types: ScopeSet,
}

impl Client {
    /// Whether a redirect URI falls under the registered domain.
    ///
    /// Scheme, host and port must match exactly. A path on the registered
    /// domain only admits redirects under it on a `/` boundary. Userinfo and
    /// fragments are never accepted.
    pub fn accepts_redirect(&self, redirect_uri: &str) -> bool {
        let (Ok(registered), Ok(redirect)) = (Url::parse(&self.domain), Url::parse(redirect_uri))
        else {
            return false;
        };

        if !redirect.username().is_empty()
            || redirect.password().is_some()
            || redirect.fragment().is_some()
            || redirect.host_str().is_none()
        {
            return false;
        }

        if redirect.scheme() != registered.scheme()
            || redirect.host_str() != registered.host_str()
            || redirect.port_or_known_default() != registered.port_or_known_default()
        {
            return false;
        }

        let base = registered.path().trim_end_matches('/');
        let path = redirect.path();
        base.is_empty()
            || path == base
            || path
                .strip_prefix(base)
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// Token endpoint form parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenForm {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub scope: Option<String>,
}

/// Authorization endpoint query parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorizeQuery {
    pub response_type: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

/// Issued authorization code and where to send it
#[derive(Debug, Clone)]
pub struct AuthorizeResponse {
    pub code: String,
    pub state: Option<String>,
    pub redirect_uri: String,
}

/// Token Response
#[derive(Debug, Clone, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: TokenType,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Extension claims such as `primary_org` and `organizations`
    #[serde(flatten)]
    pub extension: serde_json::Map<String, serde_json::Value>,
}

impl TokenResponse {
    pub fn from_record(record: &TokenRecord) -> Option<Self> {
        let access = record.access.as_ref()?;
        Some(Self {
            access_token: access.value.clone(),
            token_type: TokenType::Bearer,
            expires_in: access.expires_in.num_seconds(),
            refresh_token: record.refresh.as_ref().map(|token| token.value.clone()),
            scope: (!record.scope.is_empty()).then(|| record.scope.to_string()),
            extension: serde_json::Map::new(),
        })
    }
}

/// Generate a secure random token
pub fn generate_token() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.r#gen();
    BASE64_URL_SAFE_NO_PAD.encode(bytes)
}
