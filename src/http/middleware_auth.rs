//! Bearer-token gate for protected route groups.
//!
//! The gate resolves `Authorization: Bearer <token>` through the configured
//! [`TokenVerifier`] and stores the resulting [`ResolvedIdentity`] in the
//! request extensions. Handlers read it back with [`ExtractedAuth`].

use axum::extract::{FromRequestParts, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http::request::Parts;
use serde_json::json;
use std::sync::Arc;

use crate::errors::VerifyError;
use crate::oauth::{ResolvedIdentity, TokenVerifier};

/// Identity resolved by the gate for the current request
///
/// # Example
///
/// ```ignore
/// async fn protected_handler(ExtractedAuth(identity): ExtractedAuth) -> String {
///     identity.user_id.unwrap_or(identity.client_id)
/// }
/// ```
#[derive(Clone, Debug)]
pub struct ExtractedAuth(pub ResolvedIdentity);

impl<S> FromRequestParts<S> for ExtractedAuth
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<ResolvedIdentity>()
            .cloned()
            .map(ExtractedAuth)
            .ok_or_else(|| unauthenticated("invalid_request", "Missing bearer token"))
    }
}

/// Pull the token out of an `Authorization: Bearer` header. The scheme is case-insensitive.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Reject the request unless it carries a bearer token the verifier accepts.
pub async fn require_bearer_token(
    State(verifier): State<Arc<dyn TokenVerifier>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(request.headers()) else {
        return unauthenticated("invalid_request", "Missing bearer token");
    };

    match verifier.resolve(token).await {
        Ok(identity) => {
            tracing::debug!(client_id = %identity.client_id, user_id = ?identity.user_id, "bearer token accepted");
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(err) => verify_error_response(err),
    }
}

fn verify_error_response(err: VerifyError) -> Response {
    match err {
        VerifyError::InvalidToken => unauthenticated("invalid_token", "Invalid access token"),
        VerifyError::ExpiredToken => unauthenticated("invalid_token", "Access token expired"),
        VerifyError::UpstreamUnavailable(reason) => {
            tracing::warn!(reason = %reason, "token could not be introspected");
            unauthenticated("invalid_token", "Access token could not be verified")
        }
        other => {
            tracing::error!(error = ?other, "bearer token lookup failed");
            let body = json!({
                "error": "server_error",
                "error_description": "internal server error",
            });
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(body)).into_response()
        }
    }
}

fn unauthenticated(error: &str, error_description: &str) -> Response {
    let body = json!({
        "error": error,
        "error_description": error_description,
    });
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"))],
        axum::Json(body),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StorageError;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, value.parse().unwrap());
        headers
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(&headers("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers("bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers("Basic YTpi")), None);
        assert_eq!(bearer_token(&headers("Bearer ")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_verify_error_status() {
        assert_eq!(
            verify_error_response(VerifyError::ExpiredToken).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            verify_error_response(VerifyError::UpstreamUnavailable("timeout".to_string()))
                .status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            verify_error_response(VerifyError::Storage(StorageError::ConnectionFailed(
                "down".to_string()
            )))
            .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            verify_error_response(VerifyError::Unsupported("code".to_string())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
