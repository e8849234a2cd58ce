//! OAuth 2.0 Authorization Server implementation
//!
//! Orchestrates the four token grants (authorization code, password, client
//! credentials and refresh token) over the client store, the token store, the
//! grant policy checks and the token extension supplier.

use axum::http::HeaderMap;
use base64::prelude::*;
use chrono::{Duration, Utc};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use super::extension::TokenExtensionSupplier;
use super::policy::{authorize_request, check_grant_type, check_scopes};
use super::scope_set::ScopeSet;
use super::types::*;
use crate::config::Config;
use crate::directory::UserAuthenticator;
use crate::errors::{DirectoryError, OAuthError, StorageError};
use crate::storage::traits::OAuthStorage;

/// Token lifetimes and refresh behaviour applied at issuance
#[derive(Debug, Clone)]
pub struct GrantSettings {
    pub access_token_ttl: Duration,
    pub password_refresh_token_ttl: Duration,
    pub code_refresh_token_ttl: Duration,
    pub authorization_code_ttl: Duration,
    /// Issue a new refresh token on every refresh instead of reusing the old one
    pub rotate_refresh_tokens: bool,
}

impl Default for GrantSettings {
    fn default() -> Self {
        Self {
            access_token_ttl: Duration::hours(24),
            password_refresh_token_ttl: Duration::days(360),
            code_refresh_token_ttl: Duration::days(3),
            authorization_code_ttl: Duration::minutes(10),
            rotate_refresh_tokens: true,
        }
    }
}

impl From<&Config> for GrantSettings {
    fn from(config: &Config) -> Self {
        Self {
            access_token_ttl: *config.access_token_expiration.as_ref(),
            password_refresh_token_ttl: *config.password_refresh_token_expiration.as_ref(),
            code_refresh_token_ttl: *config.code_refresh_token_expiration.as_ref(),
            authorization_code_ttl: *config.authorization_code_expiration.as_ref(),
            rotate_refresh_tokens: *config.rotate_refresh_tokens.as_ref(),
        }
    }
}

/// Client credentials presented with a token request
#[derive(Clone)]
pub struct ClientAuthentication {
    pub client_id: String,
    pub client_secret: Option<String>,
}

/// OAuth 2.0 Authorization Server
pub struct AuthorizationServer {
    pub storage: Arc<dyn OAuthStorage>,
    authenticator: Arc<dyn UserAuthenticator>,
    extension: Arc<dyn TokenExtensionSupplier>,
    settings: GrantSettings,
}

impl AuthorizationServer {
    /// Create a new authorization server
    pub fn new(
        storage: Arc<dyn OAuthStorage>,
        authenticator: Arc<dyn UserAuthenticator>,
        extension: Arc<dyn TokenExtensionSupplier>,
        settings: GrantSettings,
    ) -> Self {
        Self {
            storage,
            authenticator,
            extension,
            settings,
        }
    }

    /// Issue an authorization code for an already authenticated end user.
    pub async fn authorize(
        &self,
        query: AuthorizeQuery,
        user_id: &str,
    ) -> Result<AuthorizeResponse, OAuthError> {
        match query.response_type.as_deref() {
            Some("code") => {}
            Some(other) => return Err(OAuthError::UnsupportedResponseType(other.to_string())),
            None => {
                return Err(OAuthError::InvalidRequest(
                    "Missing response_type".to_string(),
                ));
            }
        }

        let client_id = query
            .client_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| OAuthError::InvalidRequest("Missing client_id".to_string()))?;
        let client = self.find_client(client_id).await?;

        let redirect_uri = query
            .redirect_uri
            .filter(|uri| !uri.is_empty())
            .ok_or_else(|| OAuthError::InvalidRequest("Missing redirect_uri".to_string()))?;
        if !client.accepts_redirect(&redirect_uri) {
            return Err(OAuthError::InvalidRequest(
                "redirect_uri does not match the client domain".to_string(),
            ));
        }

        let scope = self.granted_scope(
            &client,
            GrantType::AuthorizationCode,
            query.scope.as_deref(),
        )?;

        let now = Utc::now();
        let mut record = TokenRecord::new(client.id.clone(), Some(user_id.to_string()), scope);
        record.redirect_uri = Some(redirect_uri.clone());
        record.code = Some(IssuedToken::generate(now, self.settings.authorization_code_ttl));
        record.code_challenge = query.code_challenge;
        record.code_challenge_method = query.code_challenge_method;
        self.storage.save_token(&record).await?;

        let code = record
            .code
            .map(|code| code.value)
            .ok_or_else(|| OAuthError::ServerError("authorization code missing".to_string()))?;

        tracing::info!(client_id = %client.id, user_id, "issued authorization code");
        Ok(AuthorizeResponse {
            code,
            state: query.state,
            redirect_uri,
        })
    }

    /// Handle token requests (RFC 6749 Section 4.1.3, 4.3, 4.4 and 6)
    pub async fn token(
        &self,
        form: TokenForm,
        headers: &HeaderMap,
    ) -> Result<TokenResponse, OAuthError> {
        let grant_type: GrantType = form
            .grant_type
            .as_deref()
            .filter(|value| !value.is_empty())
            .ok_or_else(|| OAuthError::InvalidRequest("Missing grant_type".to_string()))?
            .parse()?;

        let client_auth = extract_client_auth(headers, &form)
            .ok_or_else(|| OAuthError::InvalidClient("Missing client credentials".to_string()))?;
        let client = self.authenticate_client(&client_auth).await?;

        let response = match grant_type {
            GrantType::AuthorizationCode => {
                self.handle_authorization_code_grant(&client, form).await
            }
            GrantType::Password => self.handle_password_grant(&client, form).await,
            GrantType::ClientCredentials => {
                self.handle_client_credentials_grant(&client, form).await
            }
            GrantType::RefreshToken => {
                let refresh_token = required(form.refresh_token, "refresh_token")?;
                self.redeem_refresh_token(&client, &refresh_token, form.scope.as_deref())
                    .await
            }
        };

        if let Err(err) = &response {
            tracing::debug!(client_id = %client.id, grant_type = %grant_type, error = %err, "token request denied");
        }
        response
    }

    /// Handle the dedicated refresh endpoint.
    ///
    /// `refresh_token`, `client_id` and `client_secret` must all be present as
    /// form parameters, even for public clients.
    pub async fn refresh(&self, form: TokenForm) -> Result<TokenResponse, OAuthError> {
        let refresh_token = required(form.refresh_token, "refresh_token")?;
        let client_auth = ClientAuthentication {
            client_id: required(form.client_id, "client_id")?,
            client_secret: Some(required(form.client_secret, "client_secret")?),
        };

        let client = self.authenticate_client(&client_auth).await?;
        self.redeem_refresh_token(&client, &refresh_token, form.scope.as_deref())
            .await
    }

    async fn handle_authorization_code_grant(
        &self,
        client: &Client,
        form: TokenForm,
    ) -> Result<TokenResponse, OAuthError> {
        check_grant_type(&client.grant_types, GrantType::AuthorizationCode)?;
        let code = required(form.code, "code")?;
        let redirect_uri = required(form.redirect_uri, "redirect_uri")?;

        // Codes are single use, whatever the outcome below.
        let code_record = match self.storage.consume_code(&code).await {
            Ok(record) => record,
            Err(StorageError::NotFound(_)) => {
                return Err(OAuthError::InvalidGrant(
                    "Invalid authorization code".to_string(),
                ));
            }
            Err(err) => return Err(err.into()),
        };

        if code_record.client_id != client.id {
            return Err(OAuthError::InvalidGrant(
                "Authorization code was issued to another client".to_string(),
            ));
        }

        let now = Utc::now();
        if code_record.is_expired(TokenKind::Code, now) {
            return Err(OAuthError::InvalidGrant(
                "Authorization code expired".to_string(),
            ));
        }
        if code_record.redirect_uri.as_deref() != Some(redirect_uri.as_str()) {
            return Err(OAuthError::InvalidGrant("Redirect URI mismatch".to_string()));
        }
        check_scopes(&client.scopes, &code_record.scope)?;

        let mut record = TokenRecord::new(
            client.id.clone(),
            code_record.user_id,
            code_record.scope,
        );
        record.redirect_uri = Some(redirect_uri);
        record.access = Some(IssuedToken::generate(now, self.settings.access_token_ttl));
        record.refresh = Some(IssuedToken::generate(
            now,
            self.settings.code_refresh_token_ttl,
        ));

        self.issue(record, GrantType::AuthorizationCode).await
    }

    async fn handle_password_grant(
        &self,
        client: &Client,
        form: TokenForm,
    ) -> Result<TokenResponse, OAuthError> {
        let scope = self.granted_scope(client, GrantType::Password, form.scope.as_deref())?;
        let username = required(form.username, "username")?;
        let password = required(form.password, "password")?;

        let user_id = self
            .authenticator
            .verify_password(&username, &password)
            .await
            .map_err(|err| match err {
                DirectoryError::MissingCredentials => {
                    OAuthError::InvalidRequest("Missing username or password".to_string())
                }
                DirectoryError::InvalidCredentials => {
                    OAuthError::InvalidGrant("Invalid username or password".to_string())
                }
                other => OAuthError::ServerError(other.to_string()),
            })?;

        let now = Utc::now();
        let mut record = TokenRecord::new(client.id.clone(), Some(user_id), scope);
        record.access = Some(IssuedToken::generate(now, self.settings.access_token_ttl));
        record.refresh = Some(IssuedToken::generate(
            now,
            self.settings.password_refresh_token_ttl,
        ));

        self.issue(record, GrantType::Password).await
    }

    async fn handle_client_credentials_grant(
        &self,
        client: &Client,
        form: TokenForm,
    ) -> Result<TokenResponse, OAuthError> {
        let scope =
            self.granted_scope(client, GrantType::ClientCredentials, form.scope.as_deref())?;

        let mut record = TokenRecord::new(client.id.clone(), None, scope);
        record.access = Some(IssuedToken::generate(
            Utc::now(),
            self.settings.access_token_ttl,
        ));

        self.issue(record, GrantType::ClientCredentials).await
    }

    /// Exchange a refresh token for a new access token, replacing the old record atomically.
    async fn redeem_refresh_token(
        &self,
        client: &Client,
        refresh_token: &str,
        requested_scope: Option<&str>,
    ) -> Result<TokenResponse, OAuthError> {
        check_grant_type(&client.grant_types, GrantType::RefreshToken)?;

        let existing = self
            .storage
            .find_by_refresh(refresh_token)
            .await?
            .ok_or_else(|| OAuthError::InvalidGrant("Invalid refresh token".to_string()))?;

        if existing.client_id != client.id {
            return Err(OAuthError::InvalidGrant(
                "Refresh token was issued to another client".to_string(),
            ));
        }

        let now = Utc::now();
        let old_refresh = match existing.refresh.as_ref() {
            Some(token) if !token.is_expired_at(now) => token,
            _ => {
                return Err(OAuthError::InvalidGrant(
                    "Refresh token expired".to_string(),
                ));
            }
        };

        let requested = ScopeSet::parse(requested_scope.unwrap_or_default());
        let scope = if requested.is_empty() {
            existing.scope.clone()
        } else {
            check_scopes(&existing.scope, &requested)?;
            requested
        };

        let mut record = TokenRecord::new(client.id.clone(), existing.user_id.clone(), scope);
        record.redirect_uri = existing.redirect_uri.clone();
        record.access = Some(IssuedToken::generate(now, self.settings.access_token_ttl));
        record.refresh = Some(if self.settings.rotate_refresh_tokens {
            IssuedToken::generate(now, old_refresh.expires_in)
        } else {
            old_refresh.clone()
        });

        match self.storage.rotate_refresh(refresh_token, &record).await {
            Ok(()) => {}
            Err(StorageError::NotFound(_)) => {
                return Err(OAuthError::InvalidGrant(
                    "Refresh token already redeemed".to_string(),
                ));
            }
            Err(err) => return Err(err.into()),
        }

        tracing::info!(client_id = %client.id, user_id = ?record.user_id, "refreshed access token");
        self.respond(&record).await
    }

    /// Persist a freshly issued record and build its response.
    async fn issue(
        &self,
        record: TokenRecord,
        grant_type: GrantType,
    ) -> Result<TokenResponse, OAuthError> {
        self.storage.save_token(&record).await?;
        tracing::info!(
            client_id = %record.client_id,
            user_id = ?record.user_id,
            grant_type = %grant_type,
            "issued access token"
        );
        self.respond(&record).await
    }

    async fn respond(&self, record: &TokenRecord) -> Result<TokenResponse, OAuthError> {
        let mut response = TokenResponse::from_record(record)
            .ok_or_else(|| OAuthError::ServerError("issued record has no access token".to_string()))?;

        if let Some(user_id) = record.user_id.as_deref() {
            let fields = self.extension.extension_fields(user_id).await?;
            response.extension.extend(fields);
        }
        Ok(response)
    }

    /// Apply the grant policy and settle on the scope the token will carry.
    ///
    /// An empty request receives everything the client is authorized for.
    fn granted_scope(
        &self,
        client: &Client,
        grant_type: GrantType,
        requested: Option<&str>,
    ) -> Result<ScopeSet, OAuthError> {
        let requested = ScopeSet::parse(requested.unwrap_or_default());
        authorize_request(client, grant_type, &requested)?;
        Ok(if requested.is_empty() {
            client.scopes.clone()
        } else {
            requested
        })
    }

    async fn find_client(&self, client_id: &str) -> Result<Client, OAuthError> {
        self.storage
            .find_client_by_id(client_id)
            .await?
            .ok_or_else(|| OAuthError::InvalidClient("Client not found".to_string()))
    }

    /// Resolve the client and check its secret. Public clients pass without one.
    async fn authenticate_client(
        &self,
        client_auth: &ClientAuthentication,
    ) -> Result<Client, OAuthError> {
        let client = self.find_client(&client_auth.client_id).await?;
        if client.public {
            return Ok(client);
        }

        let presented = client_auth
            .client_secret
            .as_deref()
            .ok_or_else(|| OAuthError::InvalidClient("Missing client secret".to_string()))?;
        if !secrets_match(presented, &client.secret) {
            return Err(OAuthError::InvalidClient(
                "Invalid client secret".to_string(),
            ));
        }
        Ok(client)
    }

    /// Remove expired token records, returning how many were dropped.
    pub async fn cleanup_expired_tokens(&self) -> Result<usize, StorageError> {
        self.storage.cleanup_expired_tokens().await
    }
}

/// Extract client authentication from the Basic authorization header or the form
pub fn extract_client_auth(headers: &HeaderMap, form: &TokenForm) -> Option<ClientAuthentication> {
    if let Some(credentials) = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Basic "))
        .and_then(|encoded| BASE64_STANDARD.decode(encoded.trim()).ok())
        .and_then(|decoded| String::from_utf8(decoded).ok())
    {
        if let Some((client_id, client_secret)) = credentials.split_once(':') {
            return Some(ClientAuthentication {
                client_id: client_id.to_string(),
                client_secret: Some(client_secret.to_string()),
            });
        }
    }

    form.client_id
        .as_ref()
        .filter(|id| !id.is_empty())
        .map(|client_id| ClientAuthentication {
            client_id: client_id.clone(),
            client_secret: form.client_secret.clone(),
        })
}

fn secrets_match(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

fn required(value: Option<String>, name: &str) -> Result<String, OAuthError> {
    value
        .filter(|value| !value.is_empty())
        .ok_or_else(|| OAuthError::InvalidRequest(format!("Missing {}", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ExtensionError, VerifyError};
    use crate::oauth::extension::NoExtension;
    use crate::oauth::verifier::{StoreTokenVerifier, TokenVerifier};
    use crate::storage::MemoryOAuthStorage;
    use crate::storage::traits::{ClientStore, TokenStore};
    use async_trait::async_trait;
    use serde_json::{Map, Value, json};

    struct StaticAuthenticator;

    #[async_trait]
    impl UserAuthenticator for StaticAuthenticator {
        async fn verify_password(
            &self,
            username: &str,
            password: &str,
        ) -> Result<String, DirectoryError> {
            match (username, password) {
                ("alice", "hunter2") => Ok("user-alice".to_string()),
                ("", _) | (_, "") => Err(DirectoryError::MissingCredentials),
                _ => Err(DirectoryError::InvalidCredentials),
            }
        }
    }

    struct StaticExtension {
        fail: bool,
    }

    #[async_trait]
    impl TokenExtensionSupplier for StaticExtension {
        async fn extension_fields(
            &self,
            user_id: &str,
        ) -> Result<Map<String, Value>, ExtensionError> {
            if self.fail {
                return Err(ExtensionError::MembershipLookupFailed(
                    user_id.to_string(),
                    "directory down".to_string(),
                ));
            }
            let mut fields = Map::new();
            fields.insert("primary_org".to_string(), json!("org-1"));
            fields.insert("organizations".to_string(), json!(["org-1"]));
            Ok(fields)
        }
    }

    fn client(id: &str, grant_types: &str) -> Client {
        Client {
            id: id.to_string(),
            secret: "s3cret".to_string(),
            domain: "https://app.example.com".to_string(),
            public: false,
            user_id: None,
            scopes: ScopeSet::parse("read,write"),
            grant_types: ScopeSet::parse(grant_types),
        }
    }

    async fn server_with(
        clients: Vec<Client>,
        extension: Arc<dyn TokenExtensionSupplier>,
        settings: GrantSettings,
    ) -> (AuthorizationServer, Arc<MemoryOAuthStorage>) {
        let storage = Arc::new(MemoryOAuthStorage::new());
        for client in &clients {
            storage.save_client(client).await.unwrap();
        }
        let server = AuthorizationServer::new(
            storage.clone(),
            Arc::new(StaticAuthenticator),
            extension,
            settings,
        );
        (server, storage)
    }

    async fn server() -> (AuthorizationServer, Arc<MemoryOAuthStorage>) {
        server_with(
            vec![client(
                "c1",
                "password,refresh_token,client_credentials,authorization_code",
            )],
            Arc::new(StaticExtension { fail: false }),
            GrantSettings::default(),
        )
        .await
    }

    fn password_form(scope: Option<&str>) -> TokenForm {
        TokenForm {
            grant_type: Some("password".to_string()),
            client_id: Some("c1".to_string()),
            client_secret: Some("s3cret".to_string()),
            username: Some("alice".to_string()),
            password: Some("hunter2".to_string()),
            scope: scope.map(str::to_string),
            ..Default::default()
        }
    }

    fn refresh_form(refresh_token: &str) -> TokenForm {
        TokenForm {
            refresh_token: Some(refresh_token.to_string()),
            client_id: Some("c1".to_string()),
            client_secret: Some("s3cret".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_password_grant_issues_verifiable_token() {
        let (server, storage) = server().await;
        let response = server
            .token(password_form(Some("read")), &HeaderMap::new())
            .await
            .unwrap();

        assert_eq!(response.expires_in, 86400);
        assert_eq!(response.scope.as_deref(), Some("read"));
        assert!(response.refresh_token.is_some());
        assert_eq!(response.extension["primary_org"], json!("org-1"));

        let identity = StoreTokenVerifier::new(storage)
            .resolve(&response.access_token)
            .await
            .unwrap();
        assert_eq!(identity.user_id.as_deref(), Some("user-alice"));
        assert!(identity.expires_at > Utc::now());
    }

    #[tokio::test]
    async fn test_password_grant_refresh_lifetime() {
        let (server, storage) = server().await;
        let response = server
            .token(password_form(None), &HeaderMap::new())
            .await
            .unwrap();
        let refresh_token = response.refresh_token.unwrap();

        let record = storage.find_by_refresh(&refresh_token).await.unwrap().unwrap();
        assert_eq!(record.refresh.unwrap().expires_in, Duration::days(360));
        assert_eq!(record.scope.to_string(), "read,write");
    }

    #[tokio::test]
    async fn test_password_grant_bad_credentials() {
        let (server, _) = server().await;
        let mut form = password_form(None);
        form.password = Some("wrong".to_string());
        assert!(matches!(
            server.token(form, &HeaderMap::new()).await,
            Err(OAuthError::InvalidGrant(_))
        ));

        let mut form = password_form(None);
        form.username = None;
        assert!(matches!(
            server.token(form, &HeaderMap::new()).await,
            Err(OAuthError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_unauthorized_grant_type() {
        let (server, _) = server_with(
            vec![client("password-only", "password")],
            Arc::new(NoExtension),
            GrantSettings::default(),
        )
        .await;

        let form = TokenForm {
            grant_type: Some("client_credentials".to_string()),
            client_id: Some("password-only".to_string()),
            client_secret: Some("s3cret".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            server.token(form, &HeaderMap::new()).await,
            Err(OAuthError::UnauthorizedClient(_))
        ));
    }

    #[tokio::test]
    async fn test_unauthorized_scope() {
        let (server, _) = server().await;
        assert!(matches!(
            server
                .token(password_form(Some("read,admin")), &HeaderMap::new())
                .await,
            Err(OAuthError::InvalidScope(_))
        ));
    }

    #[tokio::test]
    async fn test_client_authentication() {
        let (server, _) = server().await;

        let mut form = password_form(None);
        form.client_secret = Some("nope".to_string());
        assert!(matches!(
            server.token(form, &HeaderMap::new()).await,
            Err(OAuthError::InvalidClient(_))
        ));

        let mut form = password_form(None);
        form.client_id = Some("ghost".to_string());
        assert!(matches!(
            server.token(form, &HeaderMap::new()).await,
            Err(OAuthError::InvalidClient(_))
        ));

        let mut form = password_form(None);
        form.client_id = None;
        form.client_secret = None;
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::AUTHORIZATION,
            format!("Basic {}", BASE64_STANDARD.encode("c1:s3cret"))
                .parse()
                .unwrap(),
        );
        assert!(server.token(form, &headers).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_and_unknown_grant_type() {
        let (server, _) = server().await;
        let mut form = password_form(None);
        form.grant_type = None;
        assert!(matches!(
            server.token(form, &HeaderMap::new()).await,
            Err(OAuthError::InvalidRequest(_))
        ));

        let mut form = password_form(None);
        form.grant_type = Some("implicit".to_string());
        assert!(matches!(
            server.token(form, &HeaderMap::new()).await,
            Err(OAuthError::UnsupportedGrantType(_))
        ));
    }

    #[tokio::test]
    async fn test_client_credentials_has_no_refresh_or_extension() {
        let (server, storage) = server().await;
        let form = TokenForm {
            grant_type: Some("client_credentials".to_string()),
            client_id: Some("c1".to_string()),
            client_secret: Some("s3cret".to_string()),
            scope: Some("write".to_string()),
            ..Default::default()
        };
        let response = server.token(form, &HeaderMap::new()).await.unwrap();
        assert!(response.refresh_token.is_none());
        assert!(response.extension.is_empty());

        let record = storage
            .find_by_access(&response.access_token)
            .await
            .unwrap()
            .unwrap();
        assert!(record.user_id.is_none());
        assert_eq!(record.scope.to_string(), "write");
    }

    #[tokio::test]
    async fn test_refresh_redeems_seeded_token() {
        let (server, storage) = server().await;
        let t0 = Utc::now() - Duration::hours(1);
        let mut seeded = TokenRecord::new("c1", Some("user-alice".to_string()), ScopeSet::parse("read"));
        seeded.access = Some(IssuedToken::new("at-123".to_string(), t0, Duration::hours(24)));
        seeded.refresh = Some(IssuedToken::new("rt-123".to_string(), t0, Duration::days(360)));
        storage.save_token(&seeded).await.unwrap();

        let response = server.refresh(refresh_form("rt-123")).await.unwrap();
        assert_eq!(response.expires_in, 86400);
        assert_ne!(response.access_token, "at-123");
        assert_eq!(response.extension["organizations"], json!(["org-1"]));

        let rotated = response.refresh_token.unwrap();
        assert_ne!(rotated, "rt-123");

        let verifier = StoreTokenVerifier::new(storage.clone());
        assert!(matches!(
            verifier.resolve("at-123").await,
            Err(VerifyError::InvalidToken)
        ));
        assert!(verifier.resolve(&response.access_token).await.is_ok());
        assert!(storage.find_by_refresh("rt-123").await.unwrap().is_none());

        assert!(matches!(
            server.refresh(refresh_form("rt-123")).await,
            Err(OAuthError::InvalidGrant(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_without_rotation_keeps_refresh_token() {
        let settings = GrantSettings {
            rotate_refresh_tokens: false,
            ..Default::default()
        };
        let (server, storage) = server_with(
            vec![client("c1", "password,refresh_token")],
            Arc::new(NoExtension),
            settings,
        )
        .await;

        let issued = server
            .token(password_form(None), &HeaderMap::new())
            .await
            .unwrap();
        let refresh_token = issued.refresh_token.unwrap();
        let original = storage.find_by_refresh(&refresh_token).await.unwrap().unwrap();

        let refreshed = server.refresh(refresh_form(&refresh_token)).await.unwrap();
        assert_eq!(refreshed.refresh_token.as_deref(), Some(refresh_token.as_str()));
        assert_ne!(refreshed.access_token, issued.access_token);

        let replaced = storage.find_by_refresh(&refresh_token).await.unwrap().unwrap();
        assert_eq!(
            replaced.refresh.unwrap().expires_at(),
            original.refresh.unwrap().expires_at()
        );
        assert!(storage.find_by_access(&issued.access_token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refresh_rejections() {
        let (server, storage) = server_with(
            vec![
                client("c1", "password,refresh_token"),
                client("c2", "refresh_token"),
            ],
            Arc::new(NoExtension),
            GrantSettings::default(),
        )
        .await;

        let mut stale = TokenRecord::new("c1", Some("u1".to_string()), ScopeSet::parse("read"));
        let long_ago = Utc::now() - Duration::days(400);
        stale.access = Some(IssuedToken::new("at-old".to_string(), long_ago, Duration::hours(24)));
        stale.refresh = Some(IssuedToken::new("rt-old".to_string(), long_ago, Duration::days(360)));
        storage.save_token(&stale).await.unwrap();

        assert!(matches!(
            server.refresh(refresh_form("rt-old")).await,
            Err(OAuthError::InvalidGrant(_))
        ));
        assert!(matches!(
            server.refresh(refresh_form("rt-unknown")).await,
            Err(OAuthError::InvalidGrant(_))
        ));

        let issued = server
            .token(password_form(None), &HeaderMap::new())
            .await
            .unwrap();
        let mut foreign = refresh_form(&issued.refresh_token.unwrap());
        foreign.client_id = Some("c2".to_string());
        assert!(matches!(
            server.refresh(foreign).await,
            Err(OAuthError::InvalidGrant(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_endpoint_requires_all_parameters() {
        let (server, _) = server().await;
        for missing in ["refresh_token", "client_id", "client_secret"] {
            let mut form = refresh_form("rt-123");
            match missing {
                "refresh_token" => form.refresh_token = None,
                "client_id" => form.client_id = None,
                _ => form.client_secret = None,
            }
            match server.refresh(form).await {
                Err(OAuthError::InvalidRequest(msg)) => assert!(msg.contains(missing)),
                other => panic!("expected InvalidRequest for {}, got {:?}", missing, other.err()),
            }
        }
    }

    #[tokio::test]
    async fn test_refresh_may_only_narrow_scope() {
        let (server, _) = server().await;
        let issued = server
            .token(password_form(Some("read,write")), &HeaderMap::new())
            .await
            .unwrap();
        let refresh_token = issued.refresh_token.unwrap();

        let mut widened = refresh_form(&refresh_token);
        widened.scope = Some("read,admin".to_string());
        assert!(matches!(
            server.refresh(widened).await,
            Err(OAuthError::InvalidScope(_))
        ));

        let mut narrowed = refresh_form(&refresh_token);
        narrowed.scope = Some("read".to_string());
        let response = server.refresh(narrowed).await.unwrap();
        assert_eq!(response.scope.as_deref(), Some("read"));
    }

    #[tokio::test]
    async fn test_extension_failure_aborts_issuance() {
        let (server, _) = server_with(
            vec![client("c1", "password")],
            Arc::new(StaticExtension { fail: true }),
            GrantSettings::default(),
        )
        .await;
        assert!(matches!(
            server.token(password_form(None), &HeaderMap::new()).await,
            Err(OAuthError::ServerError(_))
        ));
    }

    #[tokio::test]
    async fn test_authorization_code_flow() {
        let (server, storage) = server().await;
        let query = AuthorizeQuery {
            response_type: Some("code".to_string()),
            client_id: Some("c1".to_string()),
            redirect_uri: Some("https://app.example.com/callback".to_string()),
            scope: Some("read".to_string()),
            state: Some("xyz".to_string()),
            code_challenge: Some("challenge".to_string()),
            code_challenge_method: Some("S256".to_string()),
        };
        let authorized = server.authorize(query, "user-alice").await.unwrap();
        assert_eq!(authorized.state.as_deref(), Some("xyz"));

        let code_record = storage.find_by_code(&authorized.code).await.unwrap().unwrap();
        assert_eq!(code_record.code_challenge.as_deref(), Some("challenge"));
        assert_eq!(
            code_record.code.as_ref().unwrap().expires_in,
            Duration::minutes(10)
        );

        let form = TokenForm {
            grant_type: Some("authorization_code".to_string()),
            code: Some(authorized.code.clone()),
            redirect_uri: Some("https://app.example.com/callback".to_string()),
            client_id: Some("c1".to_string()),
            client_secret: Some("s3cret".to_string()),
            ..Default::default()
        };
        let response = server.token(form.clone(), &HeaderMap::new()).await.unwrap();
        assert_eq!(response.scope.as_deref(), Some("read"));

        let record = storage
            .find_by_refresh(response.refresh_token.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.refresh.unwrap().expires_in, Duration::days(3));
        assert!(storage.find_by_code(&authorized.code).await.unwrap().is_none());

        assert!(matches!(
            server.token(form, &HeaderMap::new()).await,
            Err(OAuthError::InvalidGrant(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_code_redemption_issues_once() {
        let (server, _) = server().await;
        let authorized = server
            .authorize(
                AuthorizeQuery {
                    response_type: Some("code".to_string()),
                    client_id: Some("c1".to_string()),
                    redirect_uri: Some("https://app.example.com/cb".to_string()),
                    ..Default::default()
                },
                "u1",
            )
            .await
            .unwrap();

        let form = TokenForm {
            grant_type: Some("authorization_code".to_string()),
            code: Some(authorized.code),
            redirect_uri: Some("https://app.example.com/cb".to_string()),
            client_id: Some("c1".to_string()),
            client_secret: Some("s3cret".to_string()),
            ..Default::default()
        };
        let headers = HeaderMap::new();
        let (first, second) = tokio::join!(
            server.token(form.clone(), &headers),
            server.token(form, &headers)
        );

        let issued = [&first, &second].iter().filter(|r| r.is_ok()).count();
        assert_eq!(issued, 1);
        assert!(
            [first, second]
                .into_iter()
                .any(|r| matches!(r, Err(OAuthError::InvalidGrant(_))))
        );
    }

    #[tokio::test]
    async fn test_authorize_rejections() {
        let (server, _) = server().await;
        let base = AuthorizeQuery {
            response_type: Some("code".to_string()),
            client_id: Some("c1".to_string()),
            redirect_uri: Some("https://app.example.com/callback".to_string()),
            ..Default::default()
        };

        let mut query = base.clone();
        query.response_type = Some("token".to_string());
        assert!(matches!(
            server.authorize(query, "u1").await,
            Err(OAuthError::UnsupportedResponseType(_))
        ));

        let mut query = base.clone();
        query.redirect_uri = Some("https://evil.example.net/callback".to_string());
        assert!(matches!(
            server.authorize(query, "u1").await,
            Err(OAuthError::InvalidRequest(_))
        ));

        let mut query = base;
        query.client_id = Some("ghost".to_string());
        assert!(matches!(
            server.authorize(query, "u1").await,
            Err(OAuthError::InvalidClient(_))
        ));
    }

    #[tokio::test]
    async fn test_code_redemption_redirect_mismatch() {
        let (server, _) = server().await;
        let authorized = server
            .authorize(
                AuthorizeQuery {
                    response_type: Some("code".to_string()),
                    client_id: Some("c1".to_string()),
                    redirect_uri: Some("https://app.example.com/a".to_string()),
                    ..Default::default()
                },
                "u1",
            )
            .await
            .unwrap();

        let form = TokenForm {
            grant_type: Some("authorization_code".to_string()),
            code: Some(authorized.code),
            redirect_uri: Some("https://app.example.com/b".to_string()),
            client_id: Some("c1".to_string()),
            client_secret: Some("s3cret".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            server.token(form, &HeaderMap::new()).await,
            Err(OAuthError::InvalidGrant(_))
        ));
    }

    #[test]
    fn test_secret_comparison() {
        assert!(secrets_match("abc", "abc"));
        assert!(!secrets_match("abc", "abd"));
        assert!(!secrets_match("abc", "abcd"));
    }
}
