//! OAuth 2.0 authorization server core: grant policy, token issuance and bearer verification.

pub mod auth_server;
pub mod extension;
pub mod introspection;
pub mod policy;
pub mod scope_set;
pub mod types;
pub mod verifier;

// Re-export frequently used items from each module
pub use auth_server::{AuthorizationServer, ClientAuthentication, GrantSettings};
pub use extension::{NoExtension, OrganizationExtensionSupplier, TokenExtensionSupplier};
pub use introspection::IntrospectionVerifier;
pub use scope_set::ScopeSet;
pub use types::{
    AuthorizeQuery, AuthorizeResponse, Client, GrantType, IssuedToken, TokenForm, TokenKind,
    TokenRecord, TokenResponse, TokenType,
};
pub use verifier::{ResolvedIdentity, StoreTokenVerifier, TokenVerifier};
