//! Token exchange grant (RFC 8693)

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use super::{TokenGranter, TokenRequest};
use crate::aup::AupGate;
use crate::error::{AuthzError, Result};
use crate::pdp::{ExchangeDecision, TokenExchangePdp};
use crate::store::{AccountRepository, ClientRepository};
use crate::token::{MintRequest, TokenResponse, TokenService};
use crate::types::{GrantType, TOKEN_TYPE_ACCESS_TOKEN, TOKEN_TYPE_JWT};

pub struct TokenExchangeGranter {
    clients: Arc<dyn ClientRepository>,
    accounts: Arc<dyn AccountRepository>,
    aup: AupGate,
    exchange_pdp: Arc<TokenExchangePdp>,
    tokens: Arc<TokenService>,
}

impl TokenExchangeGranter {
    pub fn new(
        clients: Arc<dyn ClientRepository>,
        accounts: Arc<dyn AccountRepository>,
        aup: AupGate,
        exchange_pdp: Arc<TokenExchangePdp>,
        tokens: Arc<TokenService>,
    ) -> Self {
        Self {
            clients,
            accounts,
            aup,
            exchange_pdp,
            tokens,
        }
    }
}

#[async_trait]
impl TokenGranter for TokenExchangeGranter {
    fn grant_type(&self) -> GrantType {
        GrantType::TokenExchange
    }

    async fn grant(&self, request: &TokenRequest) -> Result<TokenResponse> {
        let subject_token = request.require("subject_token")?;
        let subject_token_type = request.require("subject_token_type")?;
        if subject_token_type != TOKEN_TYPE_ACCESS_TOKEN && subject_token_type != TOKEN_TYPE_JWT {
            return Err(AuthzError::InvalidRequest(format!(
                "Unsupported subject_token_type: {}",
                subject_token_type
            )));
        }

        let claims = self
            .tokens
            .validate_access_token(subject_token)
            .map_err(|e| AuthzError::InvalidRequest(format!("Invalid subject token: {}", e)))?;

        if request.param("actor_token").is_some()
            || request.param("actor_token_type").is_some()
            || claims.act.is_some()
        {
            return Err(AuthzError::InvalidRequest("Token delegation is not supported".to_string()));
        }

        let stored = self
            .tokens
            .tokens()
            .find_access_token(&claims.jti)
            .await?
            .ok_or_else(|| AuthzError::InvalidGrant("Subject token not found".to_string()))?;

        let subject_client = self
            .clients
            .find_by_client_id(&claims.client_id)
            .await?
            .ok_or_else(|| AuthzError::InvalidGrant(format!("Unknown subject token client: {}", claims.client_id)))?;

        let account = if claims.is_client_subject() {
            None
        } else {
            let account = self
                .accounts
                .find_by_id(&claims.sub)
                .await?
                .ok_or_else(|| AuthzError::InvalidGrant("Subject token account not found".to_string()))?;
            self.aup.ensure_signed(&account).await?;
            Some(account)
        };

        let decision = self.exchange_pdp.evaluate(
            &request.scopes,
            &stored.scopes,
            &subject_client,
            &request.client,
        );
        if let ExchangeDecision::Deny { message } | ExchangeDecision::InvalidScope { message, .. } = &decision {
            info!(
                actor = %request.client.client_id,
                subject_client = %subject_client.client_id,
                reason = %message,
                "Token exchange refused"
            );
        }
        let scopes = decision.into_result()?;

        debug!(
            actor = %request.client.client_id,
            subject_client = %subject_client.client_id,
            "Token exchange permitted"
        );

        self.tokens
            .mint(
                MintRequest::new(request.client.clone(), account, scopes, GrantType::TokenExchange)
                    .with_audience(request.audience())
                    .with_issued_token_type(TOKEN_TYPE_JWT),
            )
            .await
    }
}
