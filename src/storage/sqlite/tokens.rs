//! SQLite implementation for token record storage

use crate::errors::StorageError;
use crate::oauth::scope_set::ScopeSet;
use crate::oauth::types::{IssuedToken, TokenRecord};
use crate::storage::traits::{Result, TokenStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqlitePool, SqliteRow};
use sqlx::{Decode, Row, Type};

/// SQLite implementation of token record storage
pub struct SqliteTokenStore {
    pool: SqlitePool,
}

impl SqliteTokenStore {
    /// Create a new SQLite token store
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T>
    where
        T: Decode<'r, Sqlite> + Type<Sqlite>,
    {
        row.try_get(name)
            .map_err(|e| StorageError::DatabaseError(format!("Failed to get {}: {}", name, e)))
    }

    /// Read one `<kind>`, `<kind>_created_at`, `<kind>_expires_in` column triple
    fn issued_token(row: &SqliteRow, kind: &str) -> Result<Option<IssuedToken>> {
        let value: Option<String> = Self::column(row, kind)?;
        let Some(value) = value else {
            return Ok(None);
        };

        let created_at: Option<String> = Self::column(row, &format!("{}_created_at", kind))?;
        let expires_in: Option<i64> = Self::column(row, &format!("{}_expires_in", kind))?;
        let (Some(created_at), Some(expires_in)) = (created_at, expires_in) else {
            return Err(StorageError::InvalidData(format!(
                "{} token without lifetime",
                kind
            )));
        };

        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| {
                StorageError::InvalidData(format!("Invalid {}_created_at timestamp: {}", kind, e))
            })?
            .with_timezone(&Utc);

        Ok(Some(IssuedToken::new(
            value,
            created_at,
            chrono::Duration::seconds(expires_in),
        )))
    }

    /// Convert SQLite row to TokenRecord
    fn row_to_record(row: &SqliteRow) -> Result<TokenRecord> {
        let scope: String = Self::column(row, "scope")?;

        Ok(TokenRecord {
            client_id: Self::column(row, "client_id")?,
            user_id: Self::column(row, "user_id")?,
            redirect_uri: Self::column(row, "redirect_uri")?,
            scope: ScopeSet::parse(&scope),
            code: Self::issued_token(row, "code")?,
            code_challenge: Self::column(row, "code_challenge")?,
            code_challenge_method: Self::column(row, "code_challenge_method")?,
            access: Self::issued_token(row, "access")?,
            refresh: Self::issued_token(row, "refresh")?,
        })
    }

    fn insert_query(record: &TokenRecord) -> Result<Query<'_, Sqlite, SqliteArguments<'_>>> {
        let expires_at = record
            .expires_at()
            .ok_or_else(|| StorageError::InvalidData("token record carries no token".to_string()))?;

        let value = |token: &Option<IssuedToken>| token.as_ref().map(|t| t.value.clone());
        let created = |token: &Option<IssuedToken>| token.as_ref().map(|t| t.created_at.to_rfc3339());
        let ttl = |token: &Option<IssuedToken>| token.as_ref().map(|t| t.expires_in.num_seconds());

        Ok(sqlx::query(
            r#"
            INSERT INTO tokens (
                client_id, user_id, redirect_uri, scope,
                code, code_created_at, code_expires_in, code_challenge, code_challenge_method,
                access, access_created_at, access_expires_in,
                refresh, refresh_created_at, refresh_expires_in,
                expires_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.client_id)
        .bind(&record.user_id)
        .bind(&record.redirect_uri)
        .bind(record.scope.to_string())
        .bind(value(&record.code))
        .bind(created(&record.code))
        .bind(ttl(&record.code))
        .bind(&record.code_challenge)
        .bind(&record.code_challenge_method)
        .bind(value(&record.access))
        .bind(created(&record.access))
        .bind(ttl(&record.access))
        .bind(value(&record.refresh))
        .bind(created(&record.refresh))
        .bind(ttl(&record.refresh))
        .bind(expires_at.timestamp()))
    }

    async fn find_by(&self, column: &str, token: &str) -> Result<Option<TokenRecord>> {
        let sql = format!("SELECT * FROM tokens WHERE {} = ?", column);
        let row = sqlx::query(&sql)
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn delete_by(&self, column: &str, token: &str) -> Result<()> {
        let sql = format!("DELETE FROM tokens WHERE {} = ?", column);
        sqlx::query(&sql)
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for SqliteTokenStore {
    async fn save_token(&self, record: &TokenRecord) -> Result<()> {
        Self::insert_query(record)?
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::from_write(e, "insert token"))?;
        Ok(())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<TokenRecord>> {
        self.find_by("code", code).await
    }

    async fn find_by_access(&self, access: &str) -> Result<Option<TokenRecord>> {
        self.find_by("access", access).await
    }

    async fn find_by_refresh(&self, refresh: &str) -> Result<Option<TokenRecord>> {
        self.find_by("refresh", refresh).await
    }

    async fn delete_by_code(&self, code: &str) -> Result<()> {
        self.delete_by("code", code).await
    }

    async fn consume_code(&self, code: &str) -> Result<TokenRecord> {
        let row = sqlx::query("DELETE FROM tokens WHERE code = ? RETURNING *")
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?
            .ok_or_else(|| StorageError::NotFound("authorization code".to_string()))?;

        Self::row_to_record(&row)
    }

    async fn delete_by_access(&self, access: &str) -> Result<()> {
        self.delete_by("access", access).await
    }

    async fn delete_by_refresh(&self, refresh: &str) -> Result<()> {
        self.delete_by("refresh", refresh).await
    }

    async fn rotate_refresh(&self, old_refresh: &str, record: &TokenRecord) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?;

        let deleted = sqlx::query("DELETE FROM tokens WHERE refresh = ?")
            .bind(old_refresh)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        if deleted.rows_affected() == 0 {
            return Err(StorageError::NotFound("refresh token".to_string()));
        }

        Self::insert_query(record)?
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::from_write(e, "insert rotated token"))?;

        tx.commit()
            .await
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    async fn cleanup_expired_tokens(&self) -> Result<usize> {
        let result = sqlx::query("DELETE FROM tokens WHERE expires_at < ?")
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(result.rows_affected() as usize)
    }
}
