//! Core authorization types

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::AuthzError;

/// Unique policy identifier
pub type PolicyId = String;

/// Unique account identifier
pub type AccountId = String;

/// Unique group identifier
pub type GroupId = String;

/// OAuth2 client identifier
pub type ClientId = String;

/// Set of scope strings. Ordered so that every iteration is deterministic.
pub type ScopeSet = BTreeSet<String>;

/// The `offline_access` scope, which makes a grant refresh-capable
pub const OFFLINE_ACCESS: &str = "offline_access";

/// Token type URN for JWT tokens (RFC 8693 §3)
pub const TOKEN_TYPE_JWT: &str = "urn:ietf:params:oauth:token-type:jwt";

/// Token type URN for access tokens (RFC 8693 §3)
pub const TOKEN_TYPE_ACCESS_TOKEN: &str = "urn:ietf:params:oauth:token-type:access_token";

/// End-user account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account identifier (the `sub` claim of issued tokens)
    pub id: AccountId,

    /// Login name
    pub username: String,

    /// Groups the account belongs to
    #[serde(default)]
    pub groups: BTreeSet<GroupId>,

    /// When the account last signed the acceptable use policy
    #[serde(default)]
    pub aup_signature_time: Option<DateTime<Utc>>,
}

impl Account {
    /// Create a new account without groups or AUP signature
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            groups: BTreeSet::new(),
            aup_signature_time: None,
        }
    }

    /// Add the account to a group
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.insert(group.into());
        self
    }

    /// Record an AUP signature
    pub fn with_aup_signature(mut self, signed_at: DateTime<Utc>) -> Self {
        self.aup_signature_time = Some(signed_at);
        self
    }
}

/// OAuth2 grant types handled by the token endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GrantType {
    #[serde(rename = "authorization_code")]
    AuthorizationCode,
    #[serde(rename = "urn:ietf:params:oauth:grant-type:device_code")]
    DeviceCode,
    #[serde(rename = "refresh_token")]
    RefreshToken,
    #[serde(rename = "urn:ietf:params:oauth:grant-type:token-exchange")]
    TokenExchange,
}

impl GrantType {
    /// Wire value of the `grant_type` parameter
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::DeviceCode => "urn:ietf:params:oauth:grant-type:device_code",
            Self::RefreshToken => "refresh_token",
            Self::TokenExchange => "urn:ietf:params:oauth:grant-type:token-exchange",
        }
    }

    /// All supported grant types
    pub fn all() -> [GrantType; 4] {
        [
            Self::AuthorizationCode,
            Self::DeviceCode,
            Self::RefreshToken,
            Self::TokenExchange,
        ]
    }
}

impl FromStr for GrantType {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .into_iter()
            .find(|grant| grant.as_str() == s)
            .ok_or_else(|| AuthzError::UnsupportedGrantType(s.to_string()))
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registered OAuth2 client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    /// Public client identifier
    pub client_id: ClientId,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Client secret; `None` for public clients
    #[serde(default, skip_serializing)]
    pub secret: Option<String>,

    /// Scopes the client is registered for
    #[serde(default)]
    pub scopes: ScopeSet,

    /// Grant types the client may use
    #[serde(default)]
    pub grant_types: BTreeSet<GrantType>,

    /// Registered redirect URIs
    #[serde(default)]
    pub redirect_uris: Vec<String>,

    /// Day the client last obtained a token
    #[serde(default)]
    pub last_used: Option<NaiveDate>,
}

impl Client {
    /// Create a confidential client with no scopes or grants
    pub fn new(client_id: impl Into<String>) -> Self {
        let client_id = client_id.into();
        Self {
            name: client_id.clone(),
            client_id,
            secret: None,
            scopes: BTreeSet::new(),
            grant_types: BTreeSet::new(),
            redirect_uris: Vec::new(),
            last_used: None,
        }
    }

    /// Set the client secret
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Register scopes
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes.extend(scopes.into_iter().map(Into::into));
        self
    }

    /// Allow a grant type
    pub fn with_grant_type(mut self, grant_type: GrantType) -> Self {
        self.grant_types.insert(grant_type);
        self
    }

    /// Register a redirect URI
    pub fn with_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uris.push(uri.into());
        self
    }

    /// Whether the client may use `grant_type`
    pub fn allows_grant(&self, grant_type: GrantType) -> bool {
        self.grant_types.contains(&grant_type)
    }
}

/// Parse a space-delimited `scope` parameter (RFC 6749 §3.3)
pub fn parse_scope_param(value: Option<&str>) -> ScopeSet {
    value
        .map(|s| s.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Join a scope set into its space-delimited wire form
pub fn join_scopes(scopes: &ScopeSet) -> String {
    scopes.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
}
