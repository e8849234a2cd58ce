//! In-memory OAuth storage implementation
//!
//! This module provides in-memory implementations for the token, client and
//! account storage traits. Each table sits behind its own mutex; operations
//! that touch several rows hold that one lock for the whole write.

use crate::directory::{Organization, OrganizationRole, User};
use crate::errors::StorageError;
use crate::oauth::types::{Client, TokenKind, TokenRecord};
use crate::storage::traits::*;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Default)]
struct TokenTable {
    next_id: u64,
    records: HashMap<u64, TokenRecord>,
    by_code: HashMap<String, u64>,
    by_access: HashMap<String, u64>,
    by_refresh: HashMap<String, u64>,
}

impl TokenTable {
    fn index(&self, kind: TokenKind) -> &HashMap<String, u64> {
        match kind {
            TokenKind::Code => &self.by_code,
            TokenKind::Access => &self.by_access,
            TokenKind::Refresh => &self.by_refresh,
        }
    }

    fn find(&self, kind: TokenKind, value: &str) -> Option<TokenRecord> {
        self.index(kind)
            .get(value)
            .and_then(|id| self.records.get(id))
            .cloned()
    }

    fn check_unique(&self, record: &TokenRecord) -> Result<()> {
        for kind in [TokenKind::Code, TokenKind::Access, TokenKind::Refresh] {
            if let Some(token) = record.token(kind) {
                if self.index(kind).contains_key(&token.value) {
                    return Err(StorageError::ConstraintViolation(format!(
                        "duplicate {} token",
                        kind
                    )));
                }
            }
        }
        Ok(())
    }

    fn insert(&mut self, record: &TokenRecord) -> Result<()> {
        self.check_unique(record)?;
        self.next_id += 1;
        let id = self.next_id;
        if let Some(code) = &record.code {
            self.by_code.insert(code.value.clone(), id);
        }
        if let Some(access) = &record.access {
            self.by_access.insert(access.value.clone(), id);
        }
        if let Some(refresh) = &record.refresh {
            self.by_refresh.insert(refresh.value.clone(), id);
        }
        self.records.insert(id, record.clone());
        Ok(())
    }

    fn remove_id(&mut self, id: u64) -> Option<TokenRecord> {
        let record = self.records.remove(&id)?;
        if let Some(code) = &record.code {
            self.by_code.remove(&code.value);
        }
        if let Some(access) = &record.access {
            self.by_access.remove(&access.value);
        }
        if let Some(refresh) = &record.refresh {
            self.by_refresh.remove(&refresh.value);
        }
        Some(record)
    }

    fn remove(&mut self, kind: TokenKind, value: &str) -> Option<TokenRecord> {
        let id = *self.index(kind).get(value)?;
        self.remove_id(id)
    }
}

#[derive(Default)]
struct AccountTables {
    users: HashMap<String, User>,
    organizations: HashMap<String, Organization>,
    // (user_id, organization_id, role) in insertion order
    memberships: Vec<(String, String, OrganizationRole)>,
}

/// In-memory implementation for OAuth storage
#[derive(Default)]
pub struct MemoryOAuthStorage {
    clients: Mutex<HashMap<String, Client>>,
    tokens: Mutex<TokenTable>,
    accounts: Mutex<AccountTables>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|e| StorageError::DatabaseError(format!("Lock error: {}", e)))
}

impl MemoryOAuthStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryOAuthStorage {
    async fn save_token(&self, record: &TokenRecord) -> Result<()> {
        lock(&self.tokens)?.insert(record)
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<TokenRecord>> {
        Ok(lock(&self.tokens)?.find(TokenKind::Code, code))
    }

    async fn find_by_access(&self, access: &str) -> Result<Option<TokenRecord>> {
        Ok(lock(&self.tokens)?.find(TokenKind::Access, access))
    }

    async fn find_by_refresh(&self, refresh: &str) -> Result<Option<TokenRecord>> {
        Ok(lock(&self.tokens)?.find(TokenKind::Refresh, refresh))
    }

    async fn delete_by_code(&self, code: &str) -> Result<()> {
        lock(&self.tokens)?.remove(TokenKind::Code, code);
        Ok(())
    }

    async fn consume_code(&self, code: &str) -> Result<TokenRecord> {
        lock(&self.tokens)?
            .remove(TokenKind::Code, code)
            .ok_or_else(|| StorageError::NotFound("authorization code".to_string()))
    }

    async fn delete_by_access(&self, access: &str) -> Result<()> {
        lock(&self.tokens)?.remove(TokenKind::Access, access);
        Ok(())
    }

    async fn delete_by_refresh(&self, refresh: &str) -> Result<()> {
        lock(&self.tokens)?.remove(TokenKind::Refresh, refresh);
        Ok(())
    }

    async fn rotate_refresh(&self, old_refresh: &str, record: &TokenRecord) -> Result<()> {
        let mut tokens = lock(&self.tokens)?;
        let previous = tokens
            .remove(TokenKind::Refresh, old_refresh)
            .ok_or_else(|| StorageError::NotFound("refresh token".to_string()))?;

        if let Err(err) = tokens.insert(record) {
            // Put the old record back so a failed rotation changes nothing.
            tokens.insert(&previous)?;
            return Err(err);
        }
        Ok(())
    }

    async fn cleanup_expired_tokens(&self) -> Result<usize> {
        let now = Utc::now();
        let mut tokens = lock(&self.tokens)?;
        let expired: Vec<u64> = tokens
            .records
            .iter()
            .filter(|(_, record)| record.expires_at().is_none_or(|at| at < now))
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            tokens.remove_id(*id);
        }
        Ok(expired.len())
    }
}

#[async_trait]
impl ClientStore for MemoryOAuthStorage {
    async fn save_client(&self, client: &Client) -> Result<()> {
        let mut clients = lock(&self.clients)?;
        if clients.contains_key(&client.id) {
            return Err(StorageError::ConstraintViolation(format!(
                "client {} already exists",
                client.id
            )));
        }
        clients.insert(client.id.clone(), client.clone());
        Ok(())
    }

    async fn find_client_by_id(&self, client_id: &str) -> Result<Option<Client>> {
        Ok(lock(&self.clients)?.get(client_id).cloned())
    }

    async fn delete_client_by_id(&self, client_id: &str) -> Result<()> {
        lock(&self.clients)?.remove(client_id);
        Ok(())
    }

    async fn set_client(&self, client_id: &str, client: &Client) -> Result<()> {
        ensure_client_id(client_id, client)?;
        lock(&self.clients)?.insert(client_id.to_string(), client.clone());
        Ok(())
    }

    async fn list_clients(&self, limit: Option<usize>) -> Result<Vec<Client>> {
        let clients = lock(&self.clients)?;
        let mut result: Vec<_> = clients.values().cloned().collect();
        result.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(limit) = limit {
            result.truncate(limit);
        }
        Ok(result)
    }
}

#[async_trait]
impl AccountStore for MemoryOAuthStorage {
    async fn register_user_with_organization(
        &self,
        user: &User,
        organization: &Organization,
    ) -> Result<()> {
        let mut accounts = lock(&self.accounts)?;
        if accounts.organizations.contains_key(&organization.id) {
            return Err(StorageError::ConstraintViolation(format!(
                "organization {} already exists",
                organization.id
            )));
        }
        if accounts.users.contains_key(&user.id)
            || accounts.users.values().any(|u| u.username == user.username)
        {
            return Err(StorageError::ConstraintViolation(format!(
                "username {} already taken",
                user.username
            )));
        }

        let mut user = user.clone();
        user.primary_org_id = Some(organization.id.clone());

        accounts
            .organizations
            .insert(organization.id.clone(), organization.clone());
        accounts.memberships.push((
            user.id.clone(),
            organization.id.clone(),
            OrganizationRole::Owner,
        ));
        accounts.users.insert(user.id.clone(), user);
        Ok(())
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let accounts = lock(&self.accounts)?;
        Ok(accounts
            .users
            .values()
            .find(|user| user.username == username)
            .cloned())
    }

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>> {
        Ok(lock(&self.accounts)?.users.get(user_id).cloned())
    }

    async fn list_organization_ids(&self, user_id: &str) -> Result<Vec<String>> {
        let accounts = lock(&self.accounts)?;
        Ok(accounts
            .memberships
            .iter()
            .filter(|(member, _, _)| member == user_id)
            .map(|(_, organization_id, _)| organization_id.clone())
            .collect())
    }
}

impl OAuthStorage for MemoryOAuthStorage {}
