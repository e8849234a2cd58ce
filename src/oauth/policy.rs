//! Grant policy checks for token requests.
//!
//! Both checks are subset tests over normalized comma-separated lists: a request
//! may ask for anything the client is authorized for, and nothing else.

use super::scope_set::ScopeSet;
use super::types::{Client, GrantType};
use crate::errors::OAuthError;

/// Verify every requested scope is authorized.
pub fn check_scopes(authorized: &ScopeSet, requested: &ScopeSet) -> Result<(), OAuthError> {
    let missing = requested.missing_from(authorized);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(OAuthError::InvalidScope(format!(
            "scope not authorized: {}",
            missing.join(",")
        )))
    }
}

/// Verify the grant type of the current request is authorized.
pub fn check_grant_type(authorized: &ScopeSet, grant_type: GrantType) -> Result<(), OAuthError> {
    let requested = ScopeSet::parse(grant_type.as_str());
    if requested.is_subset_of(authorized) {
        Ok(())
    } else {
        Err(OAuthError::UnauthorizedClient(format!(
            "client is not authorized for grant type {}",
            grant_type
        )))
    }
}

/// Run both checks against a client's policy, grant type first.
pub fn authorize_request(
    client: &Client,
    grant_type: GrantType,
    requested_scope: &ScopeSet,
) -> Result<(), OAuthError> {
    check_grant_type(&client.grant_types, grant_type)?;
    check_scopes(&client.scopes, requested_scope)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scopes(value: &str) -> ScopeSet {
        ScopeSet::parse(value)
    }

    #[test]
    fn test_scope_subset_ignores_case_and_whitespace() {
        assert!(check_scopes(&scopes("Read, Write"), &scopes("read")).is_ok());
        assert!(check_scopes(&scopes("read,write"), &scopes(" WRITE , read ")).is_ok());
    }

    #[test]
    fn test_empty_request_always_passes() {
        assert!(check_scopes(&scopes("read"), &scopes("")).is_ok());
        assert!(check_scopes(&scopes(""), &scopes("")).is_ok());
    }

    #[test]
    fn test_empty_authorized_rejects_non_empty_request() {
        let result = check_scopes(&scopes(""), &scopes("read"));
        assert!(matches!(result, Err(OAuthError::InvalidScope(_))));
    }

    #[test]
    fn test_unauthorized_scope_is_named() {
        let result = check_scopes(&scopes("read"), &scopes("read,admin"));
        match result {
            Err(OAuthError::InvalidScope(msg)) => assert!(msg.contains("admin")),
            other => panic!("expected InvalidScope, got {:?}", other),
        }
    }

    #[test]
    fn test_grant_type_check() {
        let authorized = scopes("password");
        assert!(check_grant_type(&authorized, GrantType::Password).is_ok());
        assert!(matches!(
            check_grant_type(&authorized, GrantType::ClientCredentials),
            Err(OAuthError::UnauthorizedClient(_))
        ));
        assert!(matches!(
            check_grant_type(&scopes(""), GrantType::Password),
            Err(OAuthError::UnauthorizedClient(_))
        ));
    }

    #[test]
    fn test_grant_type_case_insensitive() {
        let authorized = scopes(" Password , REFRESH_TOKEN");
        assert!(check_grant_type(&authorized, GrantType::RefreshToken).is_ok());
    }

    #[test]
    fn test_authorize_request_checks_grant_first() {
        let client = Client {
            id: "c1".to_string(),
            secret: "secret".to_string(),
            domain: String::new(),
            public: false,
            user_id: None,
            scopes: scopes("read"),
            grant_types: scopes("password"),
        };
        assert!(matches!(
            authorize_request(&client, GrantType::ClientCredentials, &scopes("admin")),
            Err(OAuthError::UnauthorizedClient(_))
        ));
        assert!(matches!(
            authorize_request(&client, GrantType::Password, &scopes("admin")),
            Err(OAuthError::InvalidScope(_))
        ));
        assert!(authorize_request(&client, GrantType::Password, &scopes("read")).is_ok());
    }
}
