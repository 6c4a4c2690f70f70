//! Device authorization (RFC 8628) and the `device_code` grant

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use super::{TokenGranter, TokenRequest};
use crate::clock::{checked_add_secs, Clock};
use crate::error::{AuthzError, Result};
use crate::pdp::ScopePolicyPdp;
use crate::store::{AccountRepository, DeviceApproval, DeviceCode, DeviceCodeStore};
use crate::token::{generate_opaque_token, MintRequest, TokenResponse, TokenService};
use crate::types::{Account, Client, GrantType, ScopeSet};

/// Characters of user codes; no vowels, no look-alikes
const USER_CODE_ALPHABET: &[u8] = b"BCDFGHJKLMNPQRSTVWXZ";

/// Seconds a device should wait between polls
pub const DEFAULT_POLL_INTERVAL_SECS: i64 = 5;

/// Device authorization response (RFC 8628 §3.2)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    pub expires_in: i64,
    pub interval: i64,
}

/// Starts and approves device authorizations
pub struct DeviceAuthorizationService {
    device_codes: Arc<dyn DeviceCodeStore>,
    clock: Arc<dyn Clock>,
    validity_secs: i64,
}

impl DeviceAuthorizationService {
    pub fn new(device_codes: Arc<dyn DeviceCodeStore>, clock: Arc<dyn Clock>, validity_secs: i64) -> Self {
        Self {
            device_codes,
            clock,
            validity_secs,
        }
    }

    /// Issues a device code for `client`
    pub async fn start(&self, client: &Client, scopes: ScopeSet) -> Result<DeviceAuthorization> {
        let expires_at = checked_add_secs(self.clock.now(), self.validity_secs).ok_or_else(|| {
            AuthzError::Config(format!("device code lifetime of {}s is out of range", self.validity_secs))
        })?;
        let device_code = generate_opaque_token();
        let user_code = generate_user_code();

        self.device_codes
            .save(DeviceCode {
                device_code: device_code.clone(),
                user_code: user_code.clone(),
                client_id: client.client_id.clone(),
                requested_scopes: scopes,
                expires_at,
                approval: None,
            })
            .await?;

        info!(client_id = %client.client_id, "Device authorization started");

        Ok(DeviceAuthorization {
            device_code,
            user_code,
            expires_in: self.validity_secs,
            interval: DEFAULT_POLL_INTERVAL_SECS,
        })
    }

    /// Records that `account` approved the request behind `user_code`
    ///
    /// Only scopes that were requested can be approved.
    pub async fn approve(&self, user_code: &str, account: &Account, approved: &ScopeSet) -> Result<()> {
        let pending = self
            .device_codes
            .find_by_user_code(user_code)
            .await?
            .ok_or_else(|| AuthzError::InvalidRequest(format!("Unknown user code: {}", user_code)))?;

        if pending.is_expired(self.clock.now()) {
            return Err(AuthzError::InvalidRequest("Device code has expired".to_string()));
        }

        let scopes: ScopeSet = pending
            .requested_scopes
            .intersection(approved)
            .cloned()
            .collect();

        let recorded = self
            .device_codes
            .approve(
                user_code,
                DeviceApproval {
                    account_id: account.id.clone(),
                    scopes,
                },
            )
            .await?;

        if !recorded {
            return Err(AuthzError::InvalidRequest(format!("Unknown user code: {}", user_code)));
        }
        info!(account = %account.username, client_id = %pending.client_id, "Device authorization approved");
        Ok(())
    }
}

fn generate_user_code() -> String {
    let mut rng = rand::thread_rng();
    let mut code: String = (0..8)
        .map(|_| USER_CODE_ALPHABET[rng.gen_range(0..USER_CODE_ALPHABET.len())] as char)
        .collect();
    code.insert(4, '-');
    code
}

pub struct DeviceCodeGranter {
    device_codes: Arc<dyn DeviceCodeStore>,
    accounts: Arc<dyn AccountRepository>,
    scope_filter: Arc<ScopePolicyPdp>,
    tokens: Arc<TokenService>,
}

impl DeviceCodeGranter {
    pub fn new(
        device_codes: Arc<dyn DeviceCodeStore>,
        accounts: Arc<dyn AccountRepository>,
        scope_filter: Arc<ScopePolicyPdp>,
        tokens: Arc<TokenService>,
    ) -> Self {
        Self {
            device_codes,
            accounts,
            scope_filter,
            tokens,
        }
    }
}

#[async_trait]
impl TokenGranter for DeviceCodeGranter {
    fn grant_type(&self) -> GrantType {
        GrantType::DeviceCode
    }

    async fn grant(&self, request: &TokenRequest) -> Result<TokenResponse> {
        let device_code = request.require("device_code")?;

        let pending = self
            .device_codes
            .find(device_code)
            .await?
            .ok_or_else(|| AuthzError::InvalidGrant(format!("Device code not found: {}", device_code)))?;

        if pending.client_id != request.client.client_id {
            return Err(AuthzError::InvalidGrant(
                "Device code was issued to another client".to_string(),
            ));
        }

        if pending.is_expired(self.tokens.clock().now()) {
            self.device_codes.consume(device_code).await?;
            return Err(AuthzError::InvalidGrant("Device code has expired".to_string()));
        }

        let Some(approval) = pending.approval else {
            debug!(client_id = %request.client.client_id, "Device code not yet approved");
            return Err(AuthzError::AuthorizationPending);
        };

        let account = self
            .accounts
            .find_by_id(&approval.account_id)
            .await?
            .ok_or_else(|| AuthzError::InvalidGrant("Device code subject not found".to_string()))?;

        let scopes = self.scope_filter.filter_scopes(&approval.scopes, &account).await?;

        if self.device_codes.consume(device_code).await?.is_none() {
            return Err(AuthzError::InvalidGrant(format!("Device code not found: {}", device_code)));
        }

        self.tokens
            .mint(MintRequest::new(
                request.client.clone(),
                Some(account),
                scopes,
                GrantType::DeviceCode,
            ))
            .await
    }
}
