//! Deployment configuration
//!
//! Built once at startup and passed by reference into the registry, the
//! PDPs and the token service. Nothing here is mutated after construction.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::error::AuthzError;
use crate::pdp::TokenExchangePolicy;
use crate::scope::ScopeMatcher;

/// Environment variable holding the path to a JSON configuration file
pub const CONFIG_PATH_ENV: &str = "IAM_AUTHZ_CONFIG";

/// Upper bound on any configured token or code lifetime (100 years)
pub const MAX_LIFETIME_SECS: i64 = 100 * 365 * 24 * 3600;

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for AuthzError {
    fn from(err: ConfigError) -> Self {
        AuthzError::Config(err.to_string())
    }
}

/// Custom scope matcher, as configured per deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ScopeMatcherConfig {
    /// Literal scope
    String { scope: String },
    /// `prefix:path` scopes rooted at `path`
    Path {
        name: String,
        prefix: String,
        #[serde(default = "default_base_path")]
        path: String,
    },
    /// Scopes matching a regular expression
    Regexp { name: String, regexp: String },
}

fn default_base_path() -> String {
    "/".to_string()
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

/// Token issuance settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// `iss` claim of minted tokens
    pub issuer: String,

    /// HMAC secret used to sign access tokens
    #[serde(skip_serializing)]
    pub signing_secret: String,

    /// Access token lifetime in seconds
    pub access_token_validity_secs: i64,

    /// Refresh token lifetime in seconds; `None` never expires
    pub refresh_token_validity_secs: Option<i64>,

    /// Authorization code lifetime in seconds
    pub authorization_code_validity_secs: i64,

    /// Device code lifetime in seconds
    pub device_code_validity_secs: i64,

    /// Record the day each client last obtained a token
    pub track_last_used: bool,

    /// Replace the refresh token on every refresh grant
    pub rotate_refresh_tokens: bool,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            issuer: "http://localhost:8080/".to_string(),
            signing_secret: random_secret(),
            access_token_validity_secs: 3600,
            refresh_token_validity_secs: Some(30 * 24 * 3600),
            authorization_code_validity_secs: 300,
            device_code_validity_secs: 600,
            track_last_used: true,
            rotate_refresh_tokens: false,
        }
    }
}

fn random_secret() -> String {
    use base64::Engine;
    let bytes: [u8; 32] = rand::random();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Acceptable use policy gate settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AupConfig {
    /// Whether refresh and exchange grants check AUP signatures at all
    pub enabled: bool,
}

impl Default for AupConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Token exchange PDP policies
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenExchangeConfig {
    /// Policies, evaluated by rank
    pub policies: Vec<TokenExchangePolicy>,
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthzConfig {
    pub server: ServerConfig,
    pub tokens: TokenConfig,
    pub aup: AupConfig,
    pub scope_matchers: Vec<ScopeMatcherConfig>,
    pub token_exchange: TokenExchangeConfig,
}

impl AuthzConfig {
    /// Loads configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from `IAM_AUTHZ_CONFIG` if set, then applies the
    /// `PORT` and `IAM_ISSUER` overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_json_file(path)?,
            Err(_) => Self::default(),
        };

        if let Some(port) = std::env::var("PORT").ok().and_then(|s| s.parse().ok()) {
            config.server.port = port;
        }
        if let Ok(issuer) = std::env::var("IAM_ISSUER") {
            config.tokens.issuer = issuer;
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tokens.signing_secret.is_empty() {
            return Err(ConfigError::Invalid("tokens.signing_secret must not be empty".to_string()));
        }
        check_lifetime("tokens.access_token_validity_secs", self.tokens.access_token_validity_secs)?;
        if let Some(secs) = self.tokens.refresh_token_validity_secs {
            check_lifetime("tokens.refresh_token_validity_secs", secs)?;
        }
        check_lifetime(
            "tokens.authorization_code_validity_secs",
            self.tokens.authorization_code_validity_secs,
        )?;
        check_lifetime("tokens.device_code_validity_secs", self.tokens.device_code_validity_secs)?;
        for matcher in &self.scope_matchers {
            ScopeMatcher::from_config(matcher).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        for policy in &self.token_exchange.policies {
            for scope_policy in &policy.scope_policies {
                ScopeMatcher::from_config(&scope_policy.matcher).map_err(|e| {
                    ConfigError::Invalid(format!("token exchange policy '{}': {}", policy.id, e))
                })?;
            }
        }
        Ok(())
    }
}

fn check_lifetime(field: &str, secs: i64) -> Result<(), ConfigError> {
    if secs <= 0 || secs > MAX_LIFETIME_SECS {
        return Err(ConfigError::Invalid(format!(
            "{} must be between 1 and {} seconds",
            field, MAX_LIFETIME_SECS
        )));
    }
    Ok(())
}
