//! Standardized error types following the `error-tollgate-<domain>-<number>` format.

use axum::response::{IntoResponse, Response};
use http::StatusCode;
use thiserror::Error;

/// Configuration errors that occur during application startup
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error when a required environment variable is not set
    #[error("error-tollgate-config-1 {0} must be set")]
    EnvVarRequired(String),

    /// Error when PORT cannot be parsed
    #[error("error-tollgate-config-2 Parsing PORT into u16 failed: {0:?}")]
    PortParsingFailed(std::num::ParseIntError),

    /// Error when version information is not available
    #[error("error-tollgate-config-3 One of GIT_HASH or CARGO_PKG_VERSION must be set")]
    VersionNotSet,

    /// Error when duration string cannot be parsed
    #[error("error-tollgate-config-4 Failed to parse duration '{0}': {1}")]
    DurationParsingFailed(String, String),

    /// Error when boolean string cannot be parsed
    #[error(
        "error-tollgate-config-5 Failed to parse boolean '{0}': expected true/false/1/0/yes/no/on/off"
    )]
    BoolParsingFailed(String),

    /// Error when an enumerated setting has an unknown value
    #[error("error-tollgate-config-6 Invalid value '{1}' for {0}")]
    InvalidValue(String, String),
}

/// OAuth-related errors surfaced by the authorization server
#[derive(Debug, Error)]
pub enum OAuthError {
    /// Invalid client credentials
    #[error("error-tollgate-oauth-1 Invalid client credentials: {0}")]
    InvalidClient(String),

    /// Invalid authorization code, refresh token or resource owner credentials
    #[error("error-tollgate-oauth-2 Invalid grant: {0}")]
    InvalidGrant(String),

    /// Unsupported grant type
    #[error("error-tollgate-oauth-3 Unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    /// Invalid scope
    #[error("error-tollgate-oauth-4 Invalid scope: {0}")]
    InvalidScope(String),

    /// Invalid request
    #[error("error-tollgate-oauth-5 Invalid request: {0}")]
    InvalidRequest(String),

    /// Unauthorized client
    #[error("error-tollgate-oauth-6 Unauthorized client: {0}")]
    UnauthorizedClient(String),

    /// Unsupported response type
    #[error("error-tollgate-oauth-7 Unsupported response type: {0}")]
    UnsupportedResponseType(String),

    /// Server error
    #[error("error-tollgate-oauth-8 Server error: {0}")]
    ServerError(String),
}

impl OAuthError {
    /// RFC 6749 error code for the response body.
    pub fn error_code(&self) -> &'static str {
        match self {
            OAuthError::InvalidClient(_) => "invalid_client",
            OAuthError::InvalidGrant(_) => "invalid_grant",
            OAuthError::UnsupportedGrantType(_) => "unsupported_grant_type",
            OAuthError::InvalidScope(_) => "invalid_scope",
            OAuthError::InvalidRequest(_) => "invalid_request",
            OAuthError::UnauthorizedClient(_) => "unauthorized_client",
            OAuthError::UnsupportedResponseType(_) => "unsupported_response_type",
            OAuthError::ServerError(_) => "server_error",
        }
    }

    /// HTTP status used at the token endpoint.
    pub fn status_code(&self) -> StatusCode {
        match self {
            OAuthError::InvalidClient(_) => StatusCode::UNAUTHORIZED,
            OAuthError::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Description safe to hand back to the caller.
    pub fn description(&self) -> String {
        match self {
            OAuthError::InvalidClient(msg)
            | OAuthError::InvalidGrant(msg)
            | OAuthError::UnsupportedGrantType(msg)
            | OAuthError::InvalidScope(msg)
            | OAuthError::InvalidRequest(msg)
            | OAuthError::UnauthorizedClient(msg)
            | OAuthError::UnsupportedResponseType(msg) => msg.clone(),
            OAuthError::ServerError(_) => "internal server error".to_string(),
        }
    }
}

impl From<StorageError> for OAuthError {
    fn from(err: StorageError) -> Self {
        OAuthError::ServerError(err.to_string())
    }
}

impl From<ExtensionError> for OAuthError {
    fn from(err: ExtensionError) -> Self {
        OAuthError::ServerError(err.to_string())
    }
}

/// Bearer token verification errors
#[derive(Debug, Error)]
pub enum VerifyError {
    /// Token is unknown or was rejected by the introspection endpoint
    #[error("error-tollgate-verify-1 Invalid access token")]
    InvalidToken,

    /// Token exists but its lifetime has elapsed
    #[error("error-tollgate-verify-2 Expired access token")]
    ExpiredToken,

    /// Introspection endpoint could not be reached in time
    #[error("error-tollgate-verify-3 Introspection endpoint unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Lookup kind is not available on this verifier
    #[error("error-tollgate-verify-4 Unsupported lookup: {0}")]
    Unsupported(String),

    /// Local token store failed
    #[error("error-tollgate-verify-5 Token lookup failed: {0}")]
    Storage(#[from] StorageError),
}

impl VerifyError {
    /// Whether the failure denies authentication rather than signalling a fault.
    pub fn is_auth_denial(&self) -> bool {
        matches!(
            self,
            VerifyError::InvalidToken
                | VerifyError::ExpiredToken
                | VerifyError::UpstreamUnavailable(_)
        )
    }
}

/// Token extension errors
#[derive(Debug, Error)]
pub enum ExtensionError {
    /// Organization membership lookup failed
    #[error("error-tollgate-extension-1 Membership lookup failed for {0}: {1}")]
    MembershipLookupFailed(String, String),
}

/// User directory errors
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Username or password missing
    #[error("error-tollgate-directory-1 Username and password are required")]
    MissingCredentials,

    /// Username unknown or password mismatch
    #[error("error-tollgate-directory-2 Invalid username or password")]
    InvalidCredentials,

    /// Password hashing failed
    #[error("error-tollgate-directory-3 Password hashing failed: {0}")]
    HashingFailed(String),

    /// Underlying account store failed
    #[error("error-tollgate-directory-4 Account lookup failed: {0}")]
    Storage(#[from] StorageError),
}

/// Database/storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Error when database connection fails
    #[error("error-tollgate-storage-1 Database connection failed: {0}")]
    ConnectionFailed(String),

    /// Error when query execution fails
    #[error("error-tollgate-storage-2 Query execution failed: {0}")]
    QueryFailed(String),

    /// Error when database operation fails
    #[error("error-tollgate-storage-3 Database error: {0}")]
    DatabaseError(String),

    /// Error when data validation fails
    #[error("error-tollgate-storage-4 Invalid data: {0}")]
    InvalidData(String),

    /// Error when a unique constraint rejects a write
    #[error("error-tollgate-storage-5 Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Error when requested resource is not found
    #[error("error-tollgate-storage-6 Not found: {0}")]
    NotFound(String),
}

#[cfg(any(feature = "sqlite", feature = "postgres"))]
impl StorageError {
    /// Classify a failed write, separating unique-key collisions from other faults.
    pub(crate) fn from_write(err: sqlx::Error, context: &str) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StorageError::ConstraintViolation(format!("{}: {}", context, db_err))
            }
            _ => StorageError::QueryFailed(format!("{}: {}", context, err)),
        }
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        if let OAuthError::ServerError(_) = &self {
            tracing::error!(error = ?self, "internal server error");
        }

        let body = serde_json::json!({
            "error": self.error_code(),
            "error_description": self.description(),
        });
        (
            self.status_code(),
            [(http::header::CACHE_CONTROL, "no-store")],
            axum::Json(body),
        )
            .into_response()
    }
}
