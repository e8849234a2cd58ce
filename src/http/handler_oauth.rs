//! Handles the `/oauth2` endpoints: authorize, token and refresh_token.

use axum::{
    Form, Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::middleware_auth::ExtractedAuth;
use crate::errors::OAuthError;
use crate::oauth::{AuthorizationServer, AuthorizeQuery, TokenForm, TokenResponse};

/// POST /oauth2/token - Issue tokens for any of the four supported grants
pub async fn handle_oauth_token(
    State(auth_server): State<Arc<AuthorizationServer>>,
    headers: HeaderMap,
    Form(form): Form<TokenForm>,
) -> Result<Response, OAuthError> {
    let response = auth_server.token(form, &headers).await?;
    Ok(token_response(response))
}

/// POST /oauth2/refresh_token - Redeem a refresh token
pub async fn handle_oauth_refresh_token(
    State(auth_server): State<Arc<AuthorizationServer>>,
    Form(form): Form<TokenForm>,
) -> Result<Response, OAuthError> {
    let response = auth_server.refresh(form).await?;
    Ok(token_response(response))
}

/// GET /oauth2/authorize - Issue an authorization code and redirect back to the client
///
/// Served behind the bearer-token gate; the code is issued to the user who
/// owns the presented access token.
pub async fn handle_oauth_authorize(
    State(auth_server): State<Arc<AuthorizationServer>>,
    ExtractedAuth(identity): ExtractedAuth,
    Query(query): Query<AuthorizeQuery>,
) -> Result<Response, OAuthError> {
    let Some(user_id) = identity.user_id.as_deref().filter(|id| !id.is_empty()) else {
        return Ok(login_required());
    };

    let authorized = auth_server.authorize(query, user_id).await?;

    let mut location = url::Url::parse(&authorized.redirect_uri)
        .map_err(|e| OAuthError::InvalidRequest(format!("Invalid redirect_uri: {}", e)))?;
    {
        let mut pairs = location.query_pairs_mut();
        pairs.append_pair("code", &authorized.code);
        if let Some(state) = &authorized.state {
            pairs.append_pair("state", state);
        }
    }

    Ok((StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response())
}

fn token_response(response: TokenResponse) -> Response {
    (
        [
            (header::CACHE_CONTROL, "no-store"),
            (header::PRAGMA, "no-cache"),
        ],
        Json(response),
    )
        .into_response()
}

fn login_required() -> Response {
    let body = serde_json::json!({
        "error": "login_required",
        "error_description": "Access token is not bound to an end user",
    });
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}
