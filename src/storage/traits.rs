//! Storage trait definitions for tokens, clients and accounts.
//!
//! Defines async storage interfaces that can be implemented by various
//! backend providers. Lookups return `Ok(None)` when nothing matches so
//! callers can tell an unknown token apart from a storage failure.

use crate::directory::{Organization, User};
use crate::errors::StorageError;
use crate::oauth::types::{Client, TokenRecord};
use async_trait::async_trait;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Trait for storing and retrieving token records
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Persist a new record; a duplicate code, access or refresh string is a
    /// `ConstraintViolation`, never an overwrite
    async fn save_token(&self, record: &TokenRecord) -> Result<()>;

    /// Find the record owning an authorization code
    async fn find_by_code(&self, code: &str) -> Result<Option<TokenRecord>>;

    /// Find the record owning an access token
    async fn find_by_access(&self, access: &str) -> Result<Option<TokenRecord>>;

    /// Find the record owning a refresh token
    async fn find_by_refresh(&self, refresh: &str) -> Result<Option<TokenRecord>>;

    async fn delete_by_code(&self, code: &str) -> Result<()>;

    /// Remove and return the record owning an authorization code in one step.
    ///
    /// Returns `NotFound` when no record owns `code`, so only one of several
    /// concurrent redemptions gets the record back.
    async fn consume_code(&self, code: &str) -> Result<TokenRecord>;

    async fn delete_by_access(&self, access: &str) -> Result<()>;

    async fn delete_by_refresh(&self, refresh: &str) -> Result<()>;

    /// Atomically replace the record owning `old_refresh` with `record`.
    ///
    /// Returns `NotFound` when no record owns `old_refresh`, which is also how
    /// the loser of two concurrent redemptions finds out.
    async fn rotate_refresh(&self, old_refresh: &str, record: &TokenRecord) -> Result<()>;

    /// Remove records whose every token has expired
    async fn cleanup_expired_tokens(&self) -> Result<usize>;
}

/// Trait for storing and retrieving OAuth clients
#[async_trait]
pub trait ClientStore: Send + Sync {
    /// Store a new client; fails if the ID is taken
    async fn save_client(&self, client: &Client) -> Result<()>;

    async fn find_client_by_id(&self, client_id: &str) -> Result<Option<Client>>;

    async fn delete_client_by_id(&self, client_id: &str) -> Result<()>;

    /// Insert or replace the whole client record in one statement
    async fn set_client(&self, client_id: &str, client: &Client) -> Result<()>;

    /// List clients (for admin purposes)
    async fn list_clients(&self, limit: Option<usize>) -> Result<Vec<Client>>;
}

/// Trait for users, organizations and memberships
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Create the organization, the user and an owner membership in one transaction
    async fn register_user_with_organization(
        &self,
        user: &User,
        organization: &Organization,
    ) -> Result<()>;

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>>;

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>>;

    /// Organization IDs the user is a member of, oldest membership first
    async fn list_organization_ids(&self, user_id: &str) -> Result<Vec<String>>;
}

/// Combined storage interface for the authorization server
pub trait OAuthStorage: TokenStore + ClientStore + AccountStore + Send + Sync {}

/// Reject a `set` whose key disagrees with the record it carries.
pub(crate) fn ensure_client_id(client_id: &str, client: &Client) -> Result<()> {
    if client_id == client.id {
        Ok(())
    } else {
        Err(StorageError::InvalidData(format!(
            "client id mismatch: {} != {}",
            client_id, client.id
        )))
    }
}
