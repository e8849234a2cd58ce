//! PostgreSQL implementation for users, organizations and memberships

use crate::directory::{Organization, OrganizationRole, User};
use crate::errors::StorageError;
use crate::storage::traits::{AccountStore, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgRow};

/// PostgreSQL implementation of account storage
pub struct PostgresAccountStore {
    pool: PgPool,
}

impl PostgresAccountStore {
    /// Create a new PostgreSQL account store
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Convert PostgreSQL row to User
    fn row_to_user(row: &PgRow) -> Result<User> {
        let get = |name: &str| -> Result<Option<String>> {
            row.try_get(name)
                .map_err(|e| StorageError::DatabaseError(format!("Failed to get {}: {}", name, e)))
        };
        let required = |name: &str| -> Result<String> {
            get(name)?.ok_or_else(|| StorageError::InvalidData(format!("{} is null", name)))
        };

        let created_at: chrono::DateTime<Utc> = row
            .try_get("created_at")
            .map_err(|e| StorageError::DatabaseError(format!("Failed to get created_at: {}", e)))?;

        Ok(User {
            id: required("id")?,
            username: required("username")?,
            password_hash: required("password_hash")?,
            first_name: get("first_name")?,
            last_name: get("last_name")?,
            primary_org_id: get("primary_org_id")?,
            created_at,
        })
    }
}

#[async_trait]
impl AccountStore for PostgresAccountStore {
    async fn register_user_with_organization(
        &self,
        user: &User,
        organization: &Organization,
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?;

        sqlx::query("INSERT INTO organizations (id, name, created_at) VALUES ($1, $2, $3)")
            .bind(&organization.id)
            .bind(&organization.name)
            .bind(organization.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::from_write(e, "insert organization"))?;

        sqlx::query(
            r#"
            INSERT INTO users (
                id, username, password_hash, first_name, last_name, primary_org_id, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&organization.id)
        .bind(user.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::from_write(e, "insert user"))?;

        sqlx::query(
            "INSERT INTO user_organizations (user_id, organization_id, role, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(&user.id)
        .bind(&organization.id)
        .bind(OrganizationRole::Owner.as_str())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::from_write(e, "insert membership"))?;

        tx.commit()
            .await
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    async fn list_organization_ids(&self, user_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT organization_id FROM user_organizations WHERE user_id = $1 ORDER BY created_at, organization_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        rows.iter()
            .map(|row| {
                row.try_get("organization_id").map_err(|e| {
                    StorageError::DatabaseError(format!("Failed to get organization_id: {}", e))
                })
            })
            .collect()
    }
}
