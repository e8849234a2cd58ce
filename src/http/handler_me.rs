//! Handles GET {API_BASE_PATH}/me - Returns the identity behind the presented bearer token

use axum::Json;

use super::middleware_auth::ExtractedAuth;
use crate::oauth::ResolvedIdentity;

pub async fn handle_me(ExtractedAuth(identity): ExtractedAuth) -> Json<ResolvedIdentity> {
    Json(identity)
}
