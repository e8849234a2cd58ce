//! Environment-based configuration types for tollgate server runtime settings.

use anyhow::Result;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::oauth::{Client, ScopeSet};

/// HTTP server port configuration
#[derive(Clone)]
pub struct HttpPort(u16);

/// Base path the protected API group is mounted under
#[derive(Clone)]
pub struct ApiBasePath(String);

/// Token lifetime configuration, parsed from duration strings like "24h" or "360d"
#[derive(Clone, Copy, Debug)]
pub struct TokenLifetime(chrono::Duration);

/// Boolean toggle accepting true/false/1/0/yes/no/on/off
#[derive(Clone, Copy, Debug)]
pub struct Toggle(bool);

/// Timeout applied to outbound introspection requests
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IntrospectTimeout(Duration);

/// Which verifier backs the bearer-token gate
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerifierMode {
    /// Look access tokens up in the local token store
    Local,
    /// Delegate to a remote introspection endpoint
    Introspection {
        url: String,
        client_id: String,
        client_secret: String,
        timeout: IntrospectTimeout,
    },
}

/// Behaviour when organization claims cannot be computed at issuance
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExtensionFailurePolicy {
    /// Abort the issuance request with a server error
    #[default]
    FailClosed,
    /// Issue the token without extension fields and log a warning
    Degraded,
}

/// The well-known client upserted at startup
#[derive(Clone, Debug)]
pub struct BootstrapClient {
    pub client_id: String,
    pub client_secret: String,
    pub domain: String,
    pub scopes: String,
    pub grant_types: String,
}

impl BootstrapClient {
    /// The confidential client record written to the client store at startup.
    pub fn to_client(&self) -> Client {
        Client {
            id: self.client_id.clone(),
            secret: self.client_secret.clone(),
            domain: self.domain.clone(),
            public: false,
            user_id: None,
            scopes: ScopeSet::parse(&self.scopes),
            grant_types: ScopeSet::parse(&self.grant_types),
        }
    }
}

/// Main application configuration
#[derive(Clone)]
pub struct Config {
    pub version: String,
    pub http_port: HttpPort,
    pub api_base_path: ApiBasePath,
    pub user_agent: String,
    pub storage_backend: String,
    pub database_url: Option<String>,
    pub verifier_mode: VerifierMode,
    pub access_token_expiration: TokenLifetime,
    pub password_refresh_token_expiration: TokenLifetime,
    pub code_refresh_token_expiration: TokenLifetime,
    pub authorization_code_expiration: TokenLifetime,
    pub rotate_refresh_tokens: Toggle,
    pub extension_failure_policy: ExtensionFailurePolicy,
    pub bootstrap_client: Option<BootstrapClient>,
}

impl Config {
    /// Create a new configuration from environment variables
    pub fn new() -> Result<Self> {
        let default_user_agent = format!("tollgate/{}", version()?);
        let http_port: HttpPort = default_env("HTTP_PORT", "8080").try_into()?;
        let api_base_path: ApiBasePath = default_env("API_BASE_PATH", "/api").try_into()?;
        let user_agent = default_env("USER_AGENT", &default_user_agent);
        let storage_backend = default_env("STORAGE_BACKEND", "memory");
        let database_url = optional_env("DATABASE_URL");
        let verifier_mode = verifier_mode_from_env()?;
        let access_token_expiration: TokenLifetime =
            default_env("ACCESS_TOKEN_EXPIRATION", "24h").try_into()?;
        let password_refresh_token_expiration: TokenLifetime =
            default_env("PASSWORD_REFRESH_TOKEN_EXPIRATION", "360d").try_into()?;
        let code_refresh_token_expiration: TokenLifetime =
            default_env("CODE_REFRESH_TOKEN_EXPIRATION", "3d").try_into()?;
        let authorization_code_expiration: TokenLifetime =
            default_env("AUTHORIZATION_CODE_EXPIRATION", "10m").try_into()?;
        let rotate_refresh_tokens: Toggle =
            default_env("ROTATE_REFRESH_TOKENS", "true").try_into()?;
        let extension_failure_policy: ExtensionFailurePolicy =
            default_env("EXTENSION_FAILURE_POLICY", "fail_closed").try_into()?;
        let bootstrap_client = bootstrap_client_from_env()?;

        Ok(Self {
            version: version()?,
            http_port,
            api_base_path,
            user_agent,
            storage_backend,
            database_url,
            verifier_mode,
            access_token_expiration,
            password_refresh_token_expiration,
            code_refresh_token_expiration,
            authorization_code_expiration,
            rotate_refresh_tokens,
            extension_failure_policy,
            bootstrap_client,
        })
    }
}

fn verifier_mode_from_env() -> Result<VerifierMode> {
    match default_env("TOKEN_VERIFIER", "local").to_lowercase().as_str() {
        "local" => Ok(VerifierMode::Local),
        "introspection" => Ok(VerifierMode::Introspection {
            url: require_env("INTROSPECT_URL")?,
            client_id: require_env("INTROSPECT_CLIENT_ID")?,
            client_secret: require_env("INTROSPECT_CLIENT_SECRET")?,
            timeout: default_env("INTROSPECT_TIMEOUT", "5s").try_into()?,
        }),
        other => {
            Err(ConfigError::InvalidValue("TOKEN_VERIFIER".to_string(), other.to_string()).into())
        }
    }
}

fn bootstrap_client_from_env() -> Result<Option<BootstrapClient>> {
    let Some(client_id) = optional_env("BOOTSTRAP_CLIENT_ID").filter(|v| !v.is_empty()) else {
        return Ok(None);
    };

    Ok(Some(BootstrapClient {
        client_id,
        client_secret: require_env("BOOTSTRAP_CLIENT_SECRET")?,
        domain: default_env("BOOTSTRAP_CLIENT_DOMAIN", "http://localhost"),
        scopes: default_env("BOOTSTRAP_CLIENT_SCOPES", "read,write"),
        grant_types: default_env(
            "BOOTSTRAP_CLIENT_GRANT_TYPES",
            "password,refresh_token,client_credentials,authorization_code",
        ),
    }))
}

/// Get application version from build environment
pub fn version() -> Result<String> {
    option_env!("GIT_HASH")
        .or(option_env!("CARGO_PKG_VERSION"))
        .map(|val| val.to_string())
        .ok_or(ConfigError::VersionNotSet.into())
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| ConfigError::EnvVarRequired(name.to_string()).into())
}

pub(crate) fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn default_env(name: &str, default_value: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default_value.to_string())
}

impl TryFrom<String> for HttpPort {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            Ok(Self(8080))
        } else {
            value
                .parse::<u16>()
                .map(Self)
                .map_err(|err| ConfigError::PortParsingFailed(err).into())
        }
    }
}

impl AsRef<u16> for HttpPort {
    fn as_ref(&self) -> &u16 {
        &self.0
    }
}

impl TryFrom<String> for ApiBasePath {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let trimmed = value.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(ConfigError::InvalidValue("API_BASE_PATH".to_string(), value).into());
        }
        if trimmed.starts_with('/') {
            Ok(Self(trimmed.to_string()))
        } else {
            Ok(Self(format!("/{}", trimmed)))
        }
    }
}

impl AsRef<str> for ApiBasePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TokenLifetime {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let duration = duration_str::parse(&value)
            .map_err(|e| ConfigError::DurationParsingFailed(value, e.to_string()))?;
        Ok(Self(chrono::Duration::from_std(duration)?))
    }
}

impl From<chrono::Duration> for TokenLifetime {
    fn from(value: chrono::Duration) -> Self {
        Self(value)
    }
}

impl AsRef<chrono::Duration> for TokenLifetime {
    fn as_ref(&self) -> &chrono::Duration {
        &self.0
    }
}

impl TryFrom<String> for Toggle {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Self(true)),
            "false" | "0" | "no" | "off" => Ok(Self(false)),
            _ => Err(ConfigError::BoolParsingFailed(value).into()),
        }
    }
}

impl From<bool> for Toggle {
    fn from(value: bool) -> Self {
        Self(value)
    }
}

impl AsRef<bool> for Toggle {
    fn as_ref(&self) -> &bool {
        &self.0
    }
}

impl TryFrom<String> for IntrospectTimeout {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Ok(Self(Duration::from_secs(5)));
        }
        let duration = duration_str::parse(&value)
            .map_err(|e| ConfigError::DurationParsingFailed(value, e.to_string()))?;
        Ok(Self(duration))
    }
}

impl Default for IntrospectTimeout {
    fn default() -> Self {
        Self(Duration::from_secs(5))
    }
}

impl AsRef<Duration> for IntrospectTimeout {
    fn as_ref(&self) -> &Duration {
        &self.0
    }
}

impl TryFrom<String> for ExtensionFailurePolicy {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_lowercase().replace('-', "_").as_str() {
            "fail_closed" | "strict" => Ok(Self::FailClosed),
            "degraded" | "lenient" => Ok(Self::Degraded),
            _ => Err(
                ConfigError::InvalidValue("EXTENSION_FAILURE_POLICY".to_string(), value).into(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_lifetime_parsing() {
        let access: TokenLifetime = "24h".to_string().try_into().unwrap();
        assert_eq!(access.as_ref().num_seconds(), 86400);

        let refresh: TokenLifetime = "360d".to_string().try_into().unwrap();
        assert_eq!(refresh.as_ref().num_days(), 360);

        let bad = TokenLifetime::try_from("soon".to_string());
        assert!(bad.is_err());
    }

    #[test]
    fn test_toggle_parsing() {
        assert!(*Toggle::try_from("yes".to_string()).unwrap().as_ref());
        assert!(!*Toggle::try_from("OFF".to_string()).unwrap().as_ref());
        assert!(Toggle::try_from("maybe".to_string()).is_err());
    }

    #[test]
    fn test_api_base_path_normalization() {
        let path: ApiBasePath = "api/".to_string().try_into().unwrap();
        assert_eq!(path.as_ref(), "/api");

        let path: ApiBasePath = "/v1/api".to_string().try_into().unwrap();
        assert_eq!(path.as_ref(), "/v1/api");

        assert!(ApiBasePath::try_from("/".to_string()).is_err());
    }

    #[test]
    fn test_introspect_timeout_default() {
        let timeout: IntrospectTimeout = String::new().try_into().unwrap();
        assert_eq!(*timeout.as_ref(), Duration::from_secs(5));

        let timeout: IntrospectTimeout = "250ms".to_string().try_into().unwrap();
        assert_eq!(*timeout.as_ref(), Duration::from_millis(250));
    }

    #[test]
    fn test_verifier_mode_equality() {
        let mode = |timeout: &str| VerifierMode::Introspection {
            url: "https://auth.example.com/introspect".to_string(),
            client_id: "rs".to_string(),
            client_secret: "secret".to_string(),
            timeout: timeout.to_string().try_into().unwrap(),
        };
        assert_eq!(mode("5s"), mode(""));
        assert_ne!(mode("1s"), mode("5s"));
        assert_ne!(mode("5s"), VerifierMode::Local);
    }

    #[test]
    fn test_extension_failure_policy_parsing() {
        assert_eq!(
            ExtensionFailurePolicy::try_from("fail-closed".to_string()).unwrap(),
            ExtensionFailurePolicy::FailClosed
        );
        assert_eq!(
            ExtensionFailurePolicy::try_from("degraded".to_string()).unwrap(),
            ExtensionFailurePolicy::Degraded
        );
        assert!(ExtensionFailurePolicy::try_from("ignore".to_string()).is_err());
    }

    #[test]
    fn test_bootstrap_client_record() {
        let bootstrap = BootstrapClient {
            client_id: "first-party".to_string(),
            client_secret: "changeme".to_string(),
            domain: "http://localhost".to_string(),
            scopes: "Read, Write".to_string(),
            grant_types: "password,refresh_token".to_string(),
        };
        let client = bootstrap.to_client();
        assert_eq!(client.id, "first-party");
        assert!(!client.public);
        assert_eq!(client.scopes.to_string(), "read,write");
        assert!(client.grant_types.contains("refresh_token"));
    }
}
