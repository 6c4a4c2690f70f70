//! `authorization_code` grant

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{audience_from, merge_params, TokenGranter, TokenRequest, RESOURCE_PARAM};
use crate::error::{AuthzError, Result};
use crate::pdp::ScopePolicyPdp;
use crate::store::{AccountRepository, AuthorizationCodeStore};
use crate::token::{MintRequest, TokenResponse, TokenService};
use crate::types::GrantType;

pub struct AuthorizationCodeGranter {
    codes: Arc<dyn AuthorizationCodeStore>,
    accounts: Arc<dyn AccountRepository>,
    scope_filter: Arc<ScopePolicyPdp>,
    tokens: Arc<TokenService>,
}

impl AuthorizationCodeGranter {
    pub fn new(
        codes: Arc<dyn AuthorizationCodeStore>,
        accounts: Arc<dyn AccountRepository>,
        scope_filter: Arc<ScopePolicyPdp>,
        tokens: Arc<TokenService>,
    ) -> Self {
        Self {
            codes,
            accounts,
            scope_filter,
            tokens,
        }
    }
}

#[async_trait]
impl TokenGranter for AuthorizationCodeGranter {
    fn grant_type(&self) -> GrantType {
        GrantType::AuthorizationCode
    }

    async fn grant(&self, request: &TokenRequest) -> Result<TokenResponse> {
        let code = request.require("code")?;

        let stored = self
            .codes
            .find(code)
            .await?
            .ok_or_else(|| AuthzError::InvalidGrant(format!("Invalid authorization code: {}", code)))?;

        if stored.is_expired(self.tokens.clock().now()) {
            self.codes.consume(code).await?;
            return Err(AuthzError::InvalidGrant("Authorization code has expired".to_string()));
        }

        if stored.client_id != request.client.client_id {
            return Err(AuthzError::InvalidGrant(
                "Authorization code was issued to another client".to_string(),
            ));
        }

        let redirect_matches = match (stored.redirect_uri.as_deref(), request.param("redirect_uri")) {
            (Some(bound), Some(sent)) => bound == sent,
            (None, None) => true,
            _ => false,
        };
        if !redirect_matches {
            return Err(AuthzError::InvalidGrant("Redirect URI mismatch".to_string()));
        }

        let account = self
            .accounts
            .find_by_id(&stored.account_id)
            .await?
            .ok_or_else(|| AuthzError::InvalidGrant("Authorization code subject not found".to_string()))?;

        let scopes = self.scope_filter.filter_scopes(&stored.scopes, &account).await?;

        // Exactly one concurrent redemption gets the code
        let consumed = self.codes.consume(code).await?.ok_or_else(|| {
            AuthzError::InvalidGrant(format!("Invalid authorization code: {}", code))
        })?;

        let params = merge_params(&consumed.params, &request.params);
        let mut audience = audience_from(&params);
        if audience.is_empty() {
            if let Some(resource) = params.get(RESOURCE_PARAM) {
                audience.push(resource.clone());
            }
        }

        debug!(client_id = %request.client.client_id, account = %account.username, "Authorization code redeemed");

        self.tokens
            .mint(
                MintRequest::new(
                    request.client.clone(),
                    Some(account),
                    scopes,
                    GrantType::AuthorizationCode,
                )
                .with_audience(audience),
            )
            .await
    }
}
