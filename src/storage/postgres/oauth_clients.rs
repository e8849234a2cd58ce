//! PostgreSQL implementation for OAuth client storage

use crate::errors::StorageError;
use crate::oauth::scope_set::ScopeSet;
use crate::oauth::types::Client;
use crate::storage::traits::{ClientStore, Result, ensure_client_id};
use async_trait::async_trait;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgRow};

/// PostgreSQL implementation of OAuth client storage
pub struct PostgresOAuthClientStore {
    pool: PgPool,
}

impl PostgresOAuthClientStore {
    /// Create a new PostgreSQL OAuth client store
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Convert PostgreSQL row to Client
    fn row_to_client(row: &PgRow) -> Result<Client> {
        let scope: String = row
            .try_get("scope")
            .map_err(|e| StorageError::DatabaseError(format!("Failed to get scope: {}", e)))?;
        let grant_types: String = row.try_get("grant_types").map_err(|e| {
            StorageError::DatabaseError(format!("Failed to get grant_types: {}", e))
        })?;

        Ok(Client {
            id: row
                .try_get("id")
                .map_err(|e| StorageError::DatabaseError(format!("Failed to get id: {}", e)))?,
            secret: row
                .try_get("secret")
                .map_err(|e| StorageError::DatabaseError(format!("Failed to get secret: {}", e)))?,
            domain: row
                .try_get("domain")
                .map_err(|e| StorageError::DatabaseError(format!("Failed to get domain: {}", e)))?,
            public: row
                .try_get("public")
                .map_err(|e| StorageError::DatabaseError(format!("Failed to get public: {}", e)))?,
            user_id: row.try_get("user_id").map_err(|e| {
                StorageError::DatabaseError(format!("Failed to get user_id: {}", e))
            })?,
            scopes: ScopeSet::parse(&scope),
            grant_types: ScopeSet::parse(&grant_types),
        })
    }
}

#[async_trait]
impl ClientStore for PostgresOAuthClientStore {
    async fn save_client(&self, client: &Client) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO clients (id, secret, domain, public, user_id, scope, grant_types)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&client.id)
        .bind(&client.secret)
        .bind(&client.domain)
        .bind(client.public)
        .bind(&client.user_id)
        .bind(client.scopes.to_string())
        .bind(client.grant_types.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::from_write(e, "insert client"))?;

        Ok(())
    }

    async fn find_client_by_id(&self, client_id: &str) -> Result<Option<Client>> {
        let row = sqlx::query("SELECT * FROM clients WHERE id = $1")
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        match row {
            Some(row) => Ok(Some(Self::row_to_client(&row)?)),
            None => Ok(None),
        }
    }

    async fn delete_client_by_id(&self, client_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM clients WHERE id = $1")
            .bind(client_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    async fn set_client(&self, client_id: &str, client: &Client) -> Result<()> {
        ensure_client_id(client_id, client)?;

        sqlx::query(
            r#"
            INSERT INTO clients (id, secret, domain, public, user_id, scope, grant_types)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                secret = EXCLUDED.secret,
                domain = EXCLUDED.domain,
                public = EXCLUDED.public,
                user_id = EXCLUDED.user_id,
                scope = EXCLUDED.scope,
                grant_types = EXCLUDED.grant_types,
                updated_at = NOW()
            "#,
        )
        .bind(client_id)
        .bind(&client.secret)
        .bind(&client.domain)
        .bind(client.public)
        .bind(&client.user_id)
        .bind(client.scopes.to_string())
        .bind(client.grant_types.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::from_write(e, "upsert client"))?;

        Ok(())
    }

    async fn list_clients(&self, limit: Option<usize>) -> Result<Vec<Client>> {
        let rows = sqlx::query("SELECT * FROM clients ORDER BY id LIMIT $1")
            .bind(limit.map(|l| l as i64))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        rows.iter().map(Self::row_to_client).collect()
    }
}
