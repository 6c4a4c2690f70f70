//! Token endpoint grants
//!
//! Each granter follows the same shape: read the request, resolve the prior
//! artifact, validate its state, run the cross-cutting gates and hand off to
//! [`TokenService::mint`](crate::token::TokenService::mint). Nothing is
//! consumed or persisted before every check has passed.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::{AuthzError, Result};
use crate::token::TokenResponse;
use crate::types::{Client, GrantType, ScopeSet};

pub mod authorization_code;
pub mod device_code;
pub mod refresh_token;
pub mod token_exchange;

pub use authorization_code::AuthorizationCodeGranter;
pub use device_code::{DeviceAuthorization, DeviceAuthorizationService, DeviceCodeGranter};
pub use refresh_token::RefreshTokenGranter;
pub use token_exchange::TokenExchangeGranter;

/// Resource indicator parameter (RFC 8707)
pub const RESOURCE_PARAM: &str = "resource";

/// Audience parameters; both spellings are honored identically
pub const AUDIENCE_PARAMS: [&str; 2] = ["aud", "audience"];

/// Token request from an authenticated client
#[derive(Debug, Clone)]
pub struct TokenRequest {
    pub grant_type: GrantType,
    /// Authenticated client
    pub client: Client,
    /// Parsed `scope` parameter; empty when absent
    pub scopes: ScopeSet,
    /// All form parameters
    pub params: BTreeMap<String, String>,
}

impl TokenRequest {
    pub fn new(grant_type: GrantType, client: Client) -> Self {
        Self {
            grant_type,
            client,
            scopes: ScopeSet::new(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes.extend(scopes.into_iter().map(Into::into));
        self
    }

    /// Non-empty parameter value
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Parameter value, or `invalid_request`
    pub fn require(&self, name: &str) -> Result<&str> {
        self.param(name)
            .ok_or_else(|| AuthzError::InvalidRequest(format!("Missing required parameter: {}", name)))
    }

    /// Audience from `aud` or `audience`
    pub fn audience(&self) -> Vec<String> {
        audience_from(&self.params)
    }
}

/// Audience values from `aud`/`audience`, space-delimited
pub fn audience_from(params: &BTreeMap<String, String>) -> Vec<String> {
    AUDIENCE_PARAMS
        .iter()
        .find_map(|name| params.get(*name).filter(|v| !v.trim().is_empty()))
        .map(|v| v.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Merges the parameters bound at authorization time with those sent to the
/// token endpoint
///
/// Request values win. A stored `resource` is dropped unless the token
/// request asserts it again.
pub fn merge_params(
    stored: &BTreeMap<String, String>,
    request: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = stored.clone();
    if !request.contains_key(RESOURCE_PARAM) {
        merged.remove(RESOURCE_PARAM);
    }
    merged.extend(request.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Handles one grant type
#[async_trait]
pub trait TokenGranter: Send + Sync {
    fn grant_type(&self) -> GrantType;

    async fn grant(&self, request: &TokenRequest) -> Result<TokenResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_aud_and_audience_are_equivalent() {
        let aud = params(&[("aud", "https://a.example https://b.example")]);
        let audience = params(&[("audience", "https://a.example https://b.example")]);
        assert_eq!(audience_from(&aud), audience_from(&audience));
        assert_eq!(audience_from(&aud).len(), 2);
        assert!(audience_from(&params(&[])).is_empty());
    }

    #[test]
    fn test_merge_drops_unasserted_resource() {
        let stored = params(&[("resource", "https://rs.example"), ("nonce", "n")]);

        let merged = merge_params(&stored, &params(&[("code", "c")]));
        assert!(!merged.contains_key("resource"));
        assert_eq!(merged.get("nonce").map(String::as_str), Some("n"));

        let merged = merge_params(&stored, &params(&[("resource", "https://rs.example")]));
        assert_eq!(merged.get("resource").map(String::as_str), Some("https://rs.example"));
    }

    #[test]
    fn test_require_rejects_empty() {
        let request = TokenRequest::new(GrantType::AuthorizationCode, Client::new("c"))
            .with_param("code", "");
        let err = request.require("code").unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_request");
    }
}
