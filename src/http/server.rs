//! Main router configuration assembling the public, OAuth and protected API groups.

use axum::{
    Router,
    http::{Method, header},
    middleware,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::{
    context::AppState,
    handler_health::handle_health,
    handler_me::handle_me,
    handler_oauth::{handle_oauth_authorize, handle_oauth_refresh_token, handle_oauth_token},
    middleware_auth::require_bearer_token,
};

/// Routes mounted together, optionally behind the bearer-token gate.
pub struct RouteGroup {
    prefix: Option<String>,
    routes: Router<AppState>,
    requires_auth: bool,
}

impl RouteGroup {
    /// Routes merged at the root of the router
    pub fn root(routes: Router<AppState>) -> Self {
        Self {
            prefix: None,
            routes,
            requires_auth: false,
        }
    }

    /// Routes nested under `prefix`
    pub fn nested(prefix: impl Into<String>, routes: Router<AppState>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            routes,
            requires_auth: false,
        }
    }

    /// Put every route of the group behind the bearer-token gate.
    pub fn require_auth(mut self) -> Self {
        self.requires_auth = true;
        self
    }

    pub fn requires_auth(&self) -> bool {
        self.requires_auth
    }

    fn mount(self, router: Router<AppState>, ctx: &AppState) -> Router<AppState> {
        let routes = if self.requires_auth {
            self.routes.route_layer(middleware::from_fn_with_state(
                ctx.clone(),
                require_bearer_token,
            ))
        } else {
            self.routes
        };

        match self.prefix {
            Some(prefix) => router.nest(&prefix, routes),
            None => router.merge(routes),
        }
    }
}

/// The route groups served by tollgate
pub fn route_groups(ctx: &AppState) -> Vec<RouteGroup> {
    let public_routes = Router::new().route("/health", get(handle_health));

    let oauth_routes = Router::new()
        .route("/token", post(handle_oauth_token))
        .route("/refresh_token", post(handle_oauth_refresh_token));

    let consent_routes = Router::new().route("/oauth2/authorize", get(handle_oauth_authorize));

    let api_routes = Router::new().route("/me", get(handle_me));
    let api_base_path: &str = ctx.config.api_base_path.as_ref();

    vec![
        RouteGroup::root(public_routes),
        RouteGroup::nested("/oauth2", oauth_routes),
        RouteGroup::root(consent_routes).require_auth(),
        RouteGroup::nested(api_base_path, api_routes).require_auth(),
    ]
}

/// Build the application router
pub fn build_router(ctx: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);

    let router = route_groups(&ctx)
        .into_iter()
        .fold(Router::new(), |router, group| group.mount(router, &ctx));

    router
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ExtensionFailurePolicy, VerifierMode};
    use crate::directory::BcryptUserAuthenticator;
    use crate::oauth::{AuthorizationServer, GrantSettings, NoExtension, StoreTokenVerifier};
    use crate::storage::MemoryOAuthStorage;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn create_test_app_state() -> AppState {
        let storage = Arc::new(MemoryOAuthStorage::new());
        let config = Arc::new(Config {
            version: "test".to_string(),
            http_port: "8080".to_string().try_into().unwrap(),
            api_base_path: "/api".to_string().try_into().unwrap(),
            user_agent: "tollgate-test".to_string(),
            storage_backend: "memory".to_string(),
            database_url: None,
            verifier_mode: VerifierMode::Local,
            access_token_expiration: chrono::Duration::hours(24).into(),
            password_refresh_token_expiration: chrono::Duration::days(360).into(),
            code_refresh_token_expiration: chrono::Duration::days(3).into(),
            authorization_code_expiration: chrono::Duration::minutes(10).into(),
            rotate_refresh_tokens: true.into(),
            extension_failure_policy: ExtensionFailurePolicy::FailClosed,
            bootstrap_client: None,
        });

        let auth_server = Arc::new(AuthorizationServer::new(
            storage.clone(),
            Arc::new(BcryptUserAuthenticator::new(storage.clone())),
            Arc::new(NoExtension),
            GrantSettings::from(config.as_ref()),
        ));

        AppState {
            config,
            auth_server,
            verifier: Arc::new(StoreTokenVerifier::new(storage)),
        }
    }

    #[test]
    fn test_only_api_group_is_gated() {
        let groups = route_groups(&create_test_app_state());
        let gated: Vec<bool> = groups.iter().map(RouteGroup::requires_auth).collect();
        assert_eq!(gated, vec![false, false, true, true]);
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let response = build_router(create_test_app_state())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_authorize_ignores_user_header() {
        let response = build_router(create_test_app_state())
            .oneshot(
                Request::get("/oauth2/authorize?response_type=code&client_id=c1")
                    .header("x-authenticated-user", "someone-else")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
    }

    #[tokio::test]
    async fn test_api_requires_bearer_token() {
        let response = build_router(create_test_app_state())
            .oneshot(Request::get("/api/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
    }
}
