//! SQLite implementation for OAuth client storage

use crate::errors::StorageError;
use crate::oauth::scope_set::ScopeSet;
use crate::oauth::types::Client;
use crate::storage::traits::{ClientStore, Result, ensure_client_id};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};

/// SQLite implementation of OAuth client storage
pub struct SqliteOAuthClientStore {
    pool: SqlitePool,
}

impl SqliteOAuthClientStore {
    /// Create a new SQLite OAuth client store
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Convert SQLite row to Client
    fn row_to_client(row: &SqliteRow) -> Result<Client> {
        let id: String = row
            .try_get("id")
            .map_err(|e| StorageError::DatabaseError(format!("Failed to get id: {}", e)))?;
        let secret: String = row
            .try_get("secret")
            .map_err(|e| StorageError::DatabaseError(format!("Failed to get secret: {}", e)))?;
        let domain: String = row
            .try_get("domain")
            .map_err(|e| StorageError::DatabaseError(format!("Failed to get domain: {}", e)))?;
        let public: i64 = row
            .try_get("public")
            .map_err(|e| StorageError::DatabaseError(format!("Failed to get public: {}", e)))?;
        let user_id: Option<String> = row
            .try_get("user_id")
            .map_err(|e| StorageError::DatabaseError(format!("Failed to get user_id: {}", e)))?;
        let scope: String = row
            .try_get("scope")
            .map_err(|e| StorageError::DatabaseError(format!("Failed to get scope: {}", e)))?;
        let grant_types: String = row.try_get("grant_types").map_err(|e| {
            StorageError::DatabaseError(format!("Failed to get grant_types: {}", e))
        })?;

        Ok(Client {
            id,
            secret,
            domain,
            public: public != 0,
            user_id,
            scopes: ScopeSet::parse(&scope),
            grant_types: ScopeSet::parse(&grant_types),
        })
    }
}

#[async_trait]
impl ClientStore for SqliteOAuthClientStore {
    async fn save_client(&self, client: &Client) -> Result<()> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO clients (
                id, secret, domain, public, user_id, scope, grant_types, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&client.id)
        .bind(&client.secret)
        .bind(&client.domain)
        .bind(if client.public { 1i64 } else { 0i64 })
        .bind(&client.user_id)
        .bind(client.scopes.to_string())
        .bind(client.grant_types.to_string())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::from_write(e, "insert client"))?;

        Ok(())
    }

    async fn find_client_by_id(&self, client_id: &str) -> Result<Option<Client>> {
        let row = sqlx::query("SELECT * FROM clients WHERE id = ?")
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
        sqlx::query("DELETE FROM clients WHERE id = ?")
            .bind(client_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    async fn set_client(&self, client_id: &str, client: &Client) -> Result<()> {
        ensure_client_id(client_id, client)?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO clients (
                id, secret, domain, public, user_id, scope, grant_types, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                secret = excluded.secret,
                domain = excluded.domain,
                public = excluded.public,
                user_id = excluded.user_id,
                scope = excluded.scope,
                grant_types = excluded.grant_types,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(client_id)
        .bind(&client.secret)
        .bind(&client.domain)
        .bind(if client.public { 1i64 } else { 0i64 })
        .bind(&client.user_id)
        .bind(client.scopes.to_string())
        .bind(client.grant_types.to_string())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::from_write(e, "upsert client"))?;

        Ok(())
    }

    async fn list_clients(&self, limit: Option<usize>) -> Result<Vec<Client>> {
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let rows = sqlx::query("SELECT * FROM clients ORDER BY id LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        rows.iter().map(Self::row_to_client).collect()
    }
}
