//! User and organization directory.
//!
//! Holds the account data model and the two collaborators the authorization
//! server consumes: password verification for the password grant and
//! organization membership lookups for token extension claims.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::errors::{DirectoryError, StorageError};
use crate::storage::traits::AccountStore;

/// Role a user holds inside an organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrganizationRole {
    Owner,
    Member,
}

impl OrganizationRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrganizationRole::Owner => "owner",
            OrganizationRole::Member => "member",
        }
    }
}

impl fmt::Display for OrganizationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrganizationRole {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(OrganizationRole::Owner),
            "member" => Ok(OrganizationRole::Member),
            other => Err(StorageError::InvalidData(format!(
                "unknown organization role: {}",
                other
            ))),
        }
    }
}

/// Registered user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub primary_org_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Organization owning users
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Input to user registration; the password is hashed before it reaches storage.
#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub organization_name: String,
}

/// Verifies resource-owner credentials for the password grant.
#[async_trait]
pub trait UserAuthenticator: Send + Sync {
    /// Check the password and return the user ID on success.
    async fn verify_password(&self, username: &str, password: &str)
    -> Result<String, DirectoryError>;
}

/// Organization membership lookups used for extension claims.
#[async_trait]
pub trait MembershipDirectory: Send + Sync {
    /// IDs of every organization the user belongs to.
    async fn organizations(&self, user_id: &str) -> Result<Vec<String>, StorageError>;

    /// The user's primary organization, if any.
    async fn primary_organization(&self, user_id: &str) -> Result<Option<String>, StorageError>;
}

/// Password verification against bcrypt hashes held in the account store.
pub struct BcryptUserAuthenticator {
    accounts: Arc<dyn AccountStore>,
}

impl BcryptUserAuthenticator {
    pub fn new(accounts: Arc<dyn AccountStore>) -> Self {
        Self { accounts }
    }
}

#[async_trait]
impl UserAuthenticator for BcryptUserAuthenticator {
    async fn verify_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<String, DirectoryError> {
        if username.is_empty() || password.is_empty() {
            return Err(DirectoryError::MissingCredentials);
        }

        let user = self
            .accounts
            .find_user_by_username(username)
            .await?
            .ok_or(DirectoryError::InvalidCredentials)?;

        if verify_password_hash(password, &user.password_hash).await? {
            Ok(user.id)
        } else {
            Err(DirectoryError::InvalidCredentials)
        }
    }
}

/// Membership lookups served straight from the account store.
pub struct StoreMembershipDirectory {
    accounts: Arc<dyn AccountStore>,
}

impl StoreMembershipDirectory {
    pub fn new(accounts: Arc<dyn AccountStore>) -> Self {
        Self { accounts }
    }
}

#[async_trait]
impl MembershipDirectory for StoreMembershipDirectory {
    async fn organizations(&self, user_id: &str) -> Result<Vec<String>, StorageError> {
        self.accounts.list_organization_ids(user_id).await
    }

    async fn primary_organization(&self, user_id: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .accounts
            .find_user_by_id(user_id)
            .await?
            .and_then(|user| user.primary_org_id))
    }
}

/// Register a user together with a fresh organization they own.
///
/// The organization, the user and the owner membership are written in one
/// store transaction.
pub async fn register_user(
    accounts: &dyn AccountStore,
    registration: Registration,
) -> Result<(User, Organization), DirectoryError> {
    if registration.username.is_empty() || registration.password.is_empty() {
        return Err(DirectoryError::MissingCredentials);
    }

    let now = Utc::now();
    let organization = Organization {
        id: uuid::Uuid::new_v4().to_string(),
        name: registration.organization_name,
        created_at: now,
    };
    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        username: registration.username,
        password_hash: hash_password(&registration.password).await?,
        first_name: registration.first_name,
        last_name: registration.last_name,
        primary_org_id: Some(organization.id.clone()),
        created_at: now,
    };

    accounts
        .register_user_with_organization(&user, &organization)
        .await?;

    tracing::info!(user_id = %user.id, organization_id = %organization.id, "registered user");
    Ok((user, organization))
}

/// Hash a password with bcrypt off the async runtime.
pub async fn hash_password(password: &str) -> Result<String, DirectoryError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, bcrypt::DEFAULT_COST))
        .await
        .map_err(|e| DirectoryError::HashingFailed(e.to_string()))?
        .map_err(|e| DirectoryError::HashingFailed(e.to_string()))
}

async fn verify_password_hash(password: &str, hash: &str) -> Result<bool, DirectoryError> {
    let password = password.to_string();
    let hash = hash.to_string();
    match tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash)).await {
        Ok(Ok(matches)) => Ok(matches),
        // A malformed stored hash never matches.
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "stored password hash could not be verified");
            Ok(false)
        }
        Err(err) => Err(DirectoryError::HashingFailed(err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryOAuthStorage;

    fn registration(username: &str) -> Registration {
        Registration {
            username: username.to_string(),
            password: "hunter22".to_string(),
            first_name: Some("Ada".to_string()),
            last_name: None,
            organization_name: "Analytical Engines".to_string(),
        }
    }

    #[tokio::test]
    async fn test_register_then_verify_password() {
        let storage = Arc::new(MemoryOAuthStorage::new());
        let (user, organization) = register_user(&*storage, registration("ada"))
            .await
            .unwrap();
        assert_eq!(user.primary_org_id.as_deref(), Some(organization.id.as_str()));
        assert_ne!(user.password_hash, "hunter22");

        let authenticator = BcryptUserAuthenticator::new(storage.clone());
        let user_id = authenticator.verify_password("ada", "hunter22").await.unwrap();
        assert_eq!(user_id, user.id);

        assert!(matches!(
            authenticator.verify_password("ada", "wrong").await,
            Err(DirectoryError::InvalidCredentials)
        ));
        assert!(matches!(
            authenticator.verify_password("nobody", "hunter22").await,
            Err(DirectoryError::InvalidCredentials)
        ));
        assert!(matches!(
            authenticator.verify_password("", "").await,
            Err(DirectoryError::MissingCredentials)
        ));
    }

    #[tokio::test]
    async fn test_membership_directory() {
        let storage = Arc::new(MemoryOAuthStorage::new());
        let (user, organization) = register_user(&*storage, registration("grace"))
            .await
            .unwrap();

        let directory = StoreMembershipDirectory::new(storage.clone());
        assert_eq!(
            directory.primary_organization(&user.id).await.unwrap(),
            Some(organization.id.clone())
        );
        assert_eq!(
            directory.organizations(&user.id).await.unwrap(),
            vec![organization.id]
        );
        assert!(directory.organizations("missing").await.unwrap().is_empty());
        assert_eq!(directory.primary_organization("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected() {
        let storage = Arc::new(MemoryOAuthStorage::new());
        register_user(&*storage, registration("linus"))
            .await
            .unwrap();
        let second = register_user(&*storage, registration("linus")).await;
        assert!(matches!(
            second,
            Err(DirectoryError::Storage(StorageError::ConstraintViolation(_)))
        ));
    }

    #[test]
    fn test_role_round_trip() {
        assert_eq!("owner".parse::<OrganizationRole>().unwrap(), OrganizationRole::Owner);
        assert!("admin".parse::<OrganizationRole>().is_err());
    }
}
