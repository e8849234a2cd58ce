//! Bearer token verification.
//!
//! The bearer-token gate only sees [`TokenVerifier`]. Two implementations
//! exist: [`StoreTokenVerifier`] reads the local token store and
//! [`IntrospectionVerifier`](super::introspection::IntrospectionVerifier)
//! asks a remote authority. Which one is used is decided once at startup.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use super::scope_set::ScopeSet;
use super::types::{TokenKind, TokenRecord};
use crate::errors::VerifyError;
use crate::storage::traits::TokenStore;

/// Identity attached to a request after its bearer token was verified
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedIdentity {
    pub client_id: String,
    pub user_id: Option<String>,
    pub scope: ScopeSet,
    pub expires_at: DateTime<Utc>,
}

impl ResolvedIdentity {
    /// Build the identity from a record's access token, checking expiry at `now`.
    pub fn from_record(record: &TokenRecord, now: DateTime<Utc>) -> Result<Self, VerifyError> {
        let access = record.access.as_ref().ok_or(VerifyError::InvalidToken)?;
        if record.is_expired(TokenKind::Access, now) {
            return Err(VerifyError::ExpiredToken);
        }

        Ok(Self {
            client_id: record.client_id.clone(),
            user_id: record.user_id.clone(),
            scope: record.scope.clone(),
            expires_at: access.expires_at(),
        })
    }
}

/// Verification contract shared by the local store and remote introspection.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn lookup_access(&self, token: &str) -> Result<Option<TokenRecord>, VerifyError>;

    async fn lookup_refresh(&self, token: &str) -> Result<Option<TokenRecord>, VerifyError>;

    async fn lookup_code(&self, code: &str) -> Result<Option<TokenRecord>, VerifyError>;

    /// Resolve a bearer token into the identity it was issued for.
    async fn resolve(&self, token: &str) -> Result<ResolvedIdentity, VerifyError> {
        let record = self
            .lookup_access(token)
            .await?
            .ok_or(VerifyError::InvalidToken)?;
        ResolvedIdentity::from_record(&record, Utc::now())
    }
}

/// Verifier backed by the local token store.
pub struct StoreTokenVerifier {
    tokens: Arc<dyn TokenStore>,
}

impl StoreTokenVerifier {
    pub fn new(tokens: Arc<dyn TokenStore>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl TokenVerifier for StoreTokenVerifier {
    async fn lookup_access(&self, token: &str) -> Result<Option<TokenRecord>, VerifyError> {
        Ok(self.tokens.find_by_access(token).await?)
    }

    async fn lookup_refresh(&self, token: &str) -> Result<Option<TokenRecord>, VerifyError> {
        Ok(self.tokens.find_by_refresh(token).await?)
    }

    async fn lookup_code(&self, code: &str) -> Result<Option<TokenRecord>, VerifyError> {
        Ok(self.tokens.find_by_code(code).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::types::IssuedToken;
    use crate::storage::MemoryOAuthStorage;
    use chrono::Duration;

    fn record(access: &str, created_at: DateTime<Utc>, ttl: Duration) -> TokenRecord {
        let mut record =
            TokenRecord::new("c1", Some("u1".to_string()), ScopeSet::parse("read,write"));
        record.access = Some(IssuedToken::new(access.to_string(), created_at, ttl));
        record.refresh = Some(IssuedToken::new(
            format!("{}-refresh", access),
            created_at,
            Duration::days(360),
        ));
        record
    }

    #[tokio::test]
    async fn test_resolve_live_token() {
        let storage = Arc::new(MemoryOAuthStorage::new());
        storage
            .save_token(&record("at-live", Utc::now(), Duration::hours(24)))
            .await
            .unwrap();

        let verifier = StoreTokenVerifier::new(storage);
        let identity = verifier.resolve("at-live").await.unwrap();
        assert_eq!(identity.user_id.as_deref(), Some("u1"));
        assert_eq!(identity.client_id, "c1");
        assert_eq!(identity.scope.to_string(), "read,write");
        assert!(identity.expires_at > Utc::now());
    }

    #[tokio::test]
    async fn test_resolve_expired_token() {
        let storage = Arc::new(MemoryOAuthStorage::new());
        storage
            .save_token(&record(
                "at-stale",
                Utc::now() - Duration::hours(48),
                Duration::hours(24),
            ))
            .await
            .unwrap();

        let verifier = StoreTokenVerifier::new(storage);
        assert!(matches!(
            verifier.resolve("at-stale").await,
            Err(VerifyError::ExpiredToken)
        ));
    }

    #[tokio::test]
    async fn test_resolve_unknown_token() {
        let verifier = StoreTokenVerifier::new(Arc::new(MemoryOAuthStorage::new()));
        assert!(matches!(
            verifier.resolve("nope").await,
            Err(VerifyError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_lookups_by_kind() {
        let storage = Arc::new(MemoryOAuthStorage::new());
        storage
            .save_token(&record("at-1", Utc::now(), Duration::hours(1)))
            .await
            .unwrap();

        let verifier = StoreTokenVerifier::new(storage);
        assert!(verifier.lookup_refresh("at-1-refresh").await.unwrap().is_some());
        assert!(verifier.lookup_code("at-1").await.unwrap().is_none());
    }
}
