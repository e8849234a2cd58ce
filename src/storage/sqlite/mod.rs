//! SQLite storage implementations
//!
//! This module provides SQLite-based implementations of all storage traits.
//! SQLite is suitable for single-instance deployments and development.

mod accounts;
mod oauth_clients;
mod tokens;

use crate::directory::{Organization, User};
use crate::errors::StorageError;
use crate::oauth::types::{Client, TokenRecord};
use crate::storage::traits::*;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use std::sync::Arc;

pub use accounts::SqliteAccountStore;
pub use oauth_clients::SqliteOAuthClientStore;
pub use tokens::SqliteTokenStore;

/// Comprehensive SQLite OAuth storage implementation
pub struct SqliteOAuthStorage {
    pool: SqlitePool,
    token_store: Arc<SqliteTokenStore>,
    client_store: Arc<SqliteOAuthClientStore>,
    account_store: Arc<SqliteAccountStore>,
}

impl SqliteOAuthStorage {
    /// Create a new SQLite OAuth storage instance
    pub fn new(pool: SqlitePool) -> Self {
        let token_store = Arc::new(SqliteTokenStore::new(pool.clone()));
        let client_store = Arc::new(SqliteOAuthClientStore::new(pool.clone()));
        let account_store = Arc::new(SqliteAccountStore::new(pool.clone()));

        Self {
            pool,
            token_store,
            client_store,
            account_store,
        }
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations/sqlite")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::DatabaseError(format!("Migration failed: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for SqliteOAuthStorage {
    async fn save_token(&self, record: &TokenRecord) -> Result<()> {
        self.token_store.save_token(record).await
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<TokenRecord>> {
        self.token_store.find_by_code(code).await
    }

    async fn find_by_access(&self, access: &str) -> Result<Option<TokenRecord>> {
        self.token_store.find_by_access(access).await
    }

    async fn find_by_refresh(&self, refresh: &str) -> Result<Option<TokenRecord>> {
        self.token_store.find_by_refresh(refresh).await
    }

    async fn delete_by_code(&self, code: &str) -> Result<()> {
        self.token_store.delete_by_code(code).await
    }

    async fn consume_code(&self, code: &str) -> Result<TokenRecord> {
        self.token_store.consume_code(code).await
    }

    async fn delete_by_access(&self, access: &str) -> Result<()> {
        self.token_store.delete_by_access(access).await
    }

    async fn delete_by_refresh(&self, refresh: &str) -> Result<()> {
        self.token_store.delete_by_refresh(refresh).await
    }

    async fn rotate_refresh(&self, old_refresh: &str, record: &TokenRecord) -> Result<()> {
        self.token_store.rotate_refresh(old_refresh, record).await
    }

    async fn cleanup_expired_tokens(&self) -> Result<usize> {
        self.token_store.cleanup_expired_tokens().await
    }
}

#[async_trait]
impl ClientStore for SqliteOAuthStorage {
    async fn save_client(&self, client: &Client) -> Result<()> {
        self.client_store.save_client(client).await
    }

    async fn find_client_by_id(&self, client_id: &str) -> Result<Option<Client>> {
        self.client_store.find_client_by_id(client_id).await
    }

    async fn delete_client_by_id(&self, client_id: &str) -> Result<()> {
        self.client_store.delete_client_by_id(client_id).await
    }

    async fn set_client(&self, client_id: &str, client: &Client) -> Result<()> {
        self.client_store.set_client(client_id, client).await
    }

    async fn list_clients(&self, limit: Option<usize>) -> Result<Vec<Client>> {
        self.client_store.list_clients(limit).await
    }
}

#[async_trait]
impl AccountStore for SqliteOAuthStorage {
    async fn register_user_with_organization(
        &self,
        user: &User,
        organization: &Organization,
    ) -> Result<()> {
        self.account_store
            .register_user_with_organization(user, organization)
            .await
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.account_store.find_user_by_username(username).await
    }

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>> {
        self.account_store.find_user_by_id(user_id).await
    }

    async fn list_organization_ids(&self, user_id: &str) -> Result<Vec<String>> {
        self.account_store.list_organization_ids(user_id).await
    }
}

// Implement the combined OAuthStorage trait
impl OAuthStorage for SqliteOAuthStorage {}
