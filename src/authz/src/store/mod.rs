//! Persistence interfaces consumed by the engine
//!
//! Every store is a narrow async trait. The in-memory implementations in
//! [`memory`] back the tests and the demo server.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;
use crate::types::{Account, AccountId, Client, ClientId, ScopeSet};

pub mod memory;

pub use memory::{
    InMemoryAccountRepository, InMemoryAuthorizationCodeStore, InMemoryClientRepository,
    InMemoryDeviceCodeStore, InMemoryTokenRepository,
};

/// BLAKE3 digest of a token value, as stored
pub fn token_hash(value: &str) -> String {
    blake3::hash(value.as_bytes()).to_hex().to_string()
}

/// Receives client configuration changes
///
/// Called synchronously from the client update path, after the update has
/// been committed.
pub trait ClientUpdateListener: Send + Sync {
    fn client_updated(&self, client_id: &str);
}

/// Authorization code bound at the authorization endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub code: String,
    pub client_id: ClientId,
    pub account_id: AccountId,
    /// Redirect URI sent with the authorization request, if any
    pub redirect_uri: Option<String>,
    /// Scopes approved by the user
    pub scopes: ScopeSet,
    /// Remaining authorization request parameters (`resource`, `audience`...)
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    pub expires_at: DateTime<Utc>,
}

impl AuthorizationCode {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// User decision on a pending device authorization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceApproval {
    pub account_id: AccountId,
    /// Scopes the user approved
    pub scopes: ScopeSet,
}

/// Pending device authorization (RFC 8628)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCode {
    pub device_code: String,
    pub user_code: String,
    pub client_id: ClientId,
    pub requested_scopes: ScopeSet,
    pub expires_at: DateTime<Utc>,
    /// Set once the user approves the request
    pub approval: Option<DeviceApproval>,
}

impl DeviceCode {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_approved(&self) -> bool {
        self.approval.is_some()
    }
}

/// Issued access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    /// JWT ID
    pub jti: String,
    /// Hash of the signed token value
    pub value_hash: String,
    pub client_id: ClientId,
    /// `None` for tokens issued to a client on its own behalf
    pub account_id: Option<AccountId>,
    pub scopes: ScopeSet,
    pub audience: Vec<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Hash of the refresh token issued alongside, if any
    pub refresh_token_hash: Option<String>,
}

/// Issued refresh token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshToken {
    /// Hash of the opaque token value
    pub value_hash: String,
    pub client_id: ClientId,
    pub account_id: Option<AccountId>,
    /// Scopes originally granted; refreshes may only narrow them
    pub scopes: ScopeSet,
    pub audience: Vec<String>,
    pub issued_at: DateTime<Utc>,
    /// `None` never expires
    pub expires_at: Option<DateTime<Utc>>,
}

impl RefreshToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| exp <= now).unwrap_or(false)
    }
}

/// Account lookup
#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Account>>;

    async fn find_by_username(&self, username: &str) -> Result<Option<Account>>;

    async fn save(&self, account: Account) -> Result<()>;
}

/// Client lookup and last-used bookkeeping
#[async_trait]
pub trait ClientRepository: Send + Sync {
    async fn find_by_client_id(&self, client_id: &str) -> Result<Option<Client>>;

    /// Create or update a client and notify update listeners
    async fn save(&self, client: Client) -> Result<()>;

    /// Set the client's last-used day if it is later than the stored one
    ///
    /// Returns whether the stored date changed.
    async fn advance_last_used(&self, client_id: &str, day: NaiveDate) -> Result<bool>;

    /// Register a listener called after every `save`
    fn subscribe(&self, listener: Arc<dyn ClientUpdateListener>) -> Result<()>;
}

/// Single-use authorization codes
#[async_trait]
pub trait AuthorizationCodeStore: Send + Sync {
    async fn save(&self, code: AuthorizationCode) -> Result<()>;

    /// Look up a code without consuming it
    async fn find(&self, code: &str) -> Result<Option<AuthorizationCode>>;

    /// Atomically remove and return a code
    ///
    /// Of two concurrent calls for the same code exactly one gets `Some`.
    async fn consume(&self, code: &str) -> Result<Option<AuthorizationCode>>;
}

/// Device authorizations
#[async_trait]
pub trait DeviceCodeStore: Send + Sync {
    async fn save(&self, device_code: DeviceCode) -> Result<()>;

    async fn find(&self, device_code: &str) -> Result<Option<DeviceCode>>;

    async fn find_by_user_code(&self, user_code: &str) -> Result<Option<DeviceCode>>;

    /// Record the user's approval; returns `false` if the user code is unknown
    async fn approve(&self, user_code: &str, approval: DeviceApproval) -> Result<bool>;

    /// Atomically remove and return a device code
    async fn consume(&self, device_code: &str) -> Result<Option<DeviceCode>>;
}

/// Issued tokens, keyed by hash
#[async_trait]
pub trait TokenRepository: Send + Sync {
    async fn save_access_token(&self, token: AccessToken) -> Result<()>;

    async fn find_access_token(&self, jti: &str) -> Result<Option<AccessToken>>;

    async fn count_access_tokens(&self) -> Result<usize>;

    async fn save_refresh_token(&self, token: RefreshToken) -> Result<()>;

    /// Look up a refresh token by its plain value
    async fn find_refresh_token(&self, value: &str) -> Result<Option<RefreshToken>>;

    /// Atomically remove and return a refresh token by its plain value
    async fn consume_refresh_token(&self, value: &str) -> Result<Option<RefreshToken>>;

    /// Remove a refresh token; returns whether it existed
    async fn revoke_refresh_token(&self, value: &str) -> Result<bool>;
}
