//! `refresh_token` grant

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{TokenGranter, TokenRequest};
use crate::aup::AupGate;
use crate::error::{AuthzError, Result};
use crate::pdp::ScopePolicyPdp;
use crate::store::AccountRepository;
use crate::token::{MintRequest, TokenResponse, TokenService};
use crate::types::GrantType;

pub struct RefreshTokenGranter {
    accounts: Arc<dyn AccountRepository>,
    aup: AupGate,
    scope_filter: Arc<ScopePolicyPdp>,
    tokens: Arc<TokenService>,
}

impl RefreshTokenGranter {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        aup: AupGate,
        scope_filter: Arc<ScopePolicyPdp>,
        tokens: Arc<TokenService>,
    ) -> Self {
        Self {
            accounts,
            aup,
            scope_filter,
            tokens,
        }
    }
}

#[async_trait]
impl TokenGranter for RefreshTokenGranter {
    fn grant_type(&self) -> GrantType {
        GrantType::RefreshToken
    }

    async fn grant(&self, request: &TokenRequest) -> Result<TokenResponse> {
        let value = request.require("refresh_token")?;
        let repository = self.tokens.tokens();

        let stored = repository
            .find_refresh_token(value)
            .await?
            .ok_or_else(|| AuthzError::InvalidGrant("Invalid refresh token".to_string()))?;

        if stored.client_id != request.client.client_id {
            return Err(AuthzError::InvalidGrant(
                "Refresh token was issued to another client".to_string(),
            ));
        }

        if stored.is_expired(self.tokens.clock().now()) {
            repository.revoke_refresh_token(value).await?;
            return Err(AuthzError::InvalidGrant("Refresh token has expired".to_string()));
        }

        let account = match &stored.account_id {
            Some(id) => {
                let account = self
                    .accounts
                    .find_by_id(id)
                    .await?
                    .ok_or_else(|| AuthzError::InvalidGrant("Refresh token subject not found".to_string()))?;
                self.aup.ensure_signed(&account).await?;
                Some(account)
            }
            None => None,
        };

        let requested = if request.scopes.is_empty() {
            stored.scopes.clone()
        } else {
            if let Some(extra) = request.scopes.iter().find(|s| !stored.scopes.contains(*s)) {
                return Err(AuthzError::InvalidScope(format!(
                    "Up-scoping is not allowed: {}",
                    extra
                )));
            }
            request.scopes.clone()
        };

        let scopes = match &account {
            Some(account) => self.scope_filter.filter_scopes(&requested, account).await?,
            None => requested,
        };

        let mint = MintRequest::new(request.client.clone(), account, scopes, GrantType::RefreshToken)
            .with_audience(stored.audience.clone());

        let mint = if self.tokens.config().rotate_refresh_tokens {
            if repository.consume_refresh_token(value).await?.is_none() {
                return Err(AuthzError::InvalidGrant("Invalid refresh token".to_string()));
            }
            debug!(client_id = %request.client.client_id, "Refresh token rotated");
            mint
        } else {
            mint.reusing_refresh_token(value)
        };

        self.tokens.mint(mint).await
    }
}
