//! Axum HTTP server handlers and middleware for the OAuth 2.0 endpoints and protected API.

pub mod context;
mod handler_health;
mod handler_me;
mod handler_oauth;
pub mod middleware_auth;
pub mod server;

pub use context::AppState;
pub use server::{RouteGroup, build_router};
