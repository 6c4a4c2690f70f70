//! Token minting
//!
//! Every grant ends in [`TokenService::mint`], which filters the scopes
//! once more through the scope policy PDP, signs and persists the tokens,
//! publishes audit events and records when the client was last used.

pub mod jwt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::audit::{publish_or_log, AuditEvent, AuditEventKind, AuditPublisher};
use crate::clock::{checked_add_secs, Clock};
use crate::config::TokenConfig;
use crate::error::{AuthzError, Result};
use crate::pdp::ScopePolicyPdp;
use crate::store::{token_hash, AccessToken, ClientRepository, RefreshToken, TokenRepository};
use crate::types::{join_scopes, Account, Client, GrantType, ScopeSet, OFFLINE_ACCESS};

pub use jwt::{HmacJwtService, JwtService, TokenClaims};

/// Successful token endpoint response (RFC 6749 §5.1)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_token_type: Option<String>,
}

impl TokenResponse {
    pub fn scopes(&self) -> ScopeSet {
        crate::types::parse_scope_param(Some(&self.scope))
    }
}

/// Everything needed to mint one access token
#[derive(Debug, Clone)]
pub struct MintRequest {
    pub client: Client,
    /// `None` for tokens a client obtains on its own behalf
    pub account: Option<Account>,
    pub scopes: ScopeSet,
    pub audience: Vec<String>,
    pub grant_type: GrantType,
    /// Reported back as `issued_token_type`
    pub issued_token_type: Option<String>,
    /// Refresh token to hand back unchanged instead of minting a new one
    pub reuse_refresh_token: Option<String>,
}

impl MintRequest {
    pub fn new(client: Client, account: Option<Account>, scopes: ScopeSet, grant_type: GrantType) -> Self {
        Self {
            client,
            account,
            scopes,
            audience: Vec::new(),
            grant_type,
            issued_token_type: None,
            reuse_refresh_token: None,
        }
    }

    pub fn with_audience(mut self, audience: Vec<String>) -> Self {
        self.audience = audience;
        self
    }

    pub fn with_issued_token_type(mut self, token_type: impl Into<String>) -> Self {
        self.issued_token_type = Some(token_type.into());
        self
    }

    pub fn reusing_refresh_token(mut self, value: impl Into<String>) -> Self {
        self.reuse_refresh_token = Some(value.into());
        self
    }
}

/// Records the day a client last obtained a token
pub struct LastUsedTracker {
    clients: Arc<dyn ClientRepository>,
}

impl LastUsedTracker {
    pub fn new(clients: Arc<dyn ClientRepository>) -> Self {
        Self { clients }
    }

    /// Advances the client's last-used day; returns whether anything changed
    ///
    /// The stored date only moves forward. A client already marked for
    /// `today` (or later) is not written at all.
    pub async fn track(&self, client: &Client, today: NaiveDate) -> Result<bool> {
        if client.last_used.map(|day| day >= today).unwrap_or(false) {
            return Ok(false);
        }
        let changed = self.clients.advance_last_used(&client.client_id, today).await?;
        if changed {
            debug!(client_id = %client.client_id, %today, "Client last-used date advanced");
        }
        Ok(changed)
    }
}

/// Mints, signs and persists tokens
pub struct TokenService {
    config: TokenConfig,
    tokens: Arc<dyn TokenRepository>,
    jwt: Arc<dyn JwtService>,
    scope_filter: Arc<ScopePolicyPdp>,
    audit: Arc<dyn AuditPublisher>,
    last_used: Option<LastUsedTracker>,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    pub fn new(
        config: TokenConfig,
        tokens: Arc<dyn TokenRepository>,
        jwt: Arc<dyn JwtService>,
        scope_filter: Arc<ScopePolicyPdp>,
        audit: Arc<dyn AuditPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            tokens,
            jwt,
            scope_filter,
            audit,
            last_used: None,
            clock,
        }
    }

    /// Enables last-used tracking
    pub fn with_last_used_tracker(mut self, tracker: LastUsedTracker) -> Self {
        self.last_used = Some(tracker);
        self
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    pub fn tokens(&self) -> &Arc<dyn TokenRepository> {
        &self.tokens
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Validates a bearer token issued by this server
    pub fn validate_access_token(&self, token: &str) -> Result<TokenClaims> {
        self.jwt.validate(token)
    }

    /// Mints an access token, and a refresh token when `offline_access` is
    /// granted to a client allowed to refresh
    pub async fn mint(&self, request: MintRequest) -> Result<TokenResponse> {
        let scopes = match &request.account {
            Some(account) => self.scope_filter.filter_scopes(&request.scopes, account).await?,
            None => request.scopes.clone(),
        };

        let now = self.clock.now();
        let expires_at = lifetime_end(now, self.config.access_token_validity_secs, "access token")?;
        let jti = uuid::Uuid::new_v4().to_string();
        let subject = request
            .account
            .as_ref()
            .map(|a| a.id.clone())
            .unwrap_or_else(|| request.client.client_id.clone());

        let claims = TokenClaims {
            iss: self.config.issuer.clone(),
            sub: subject,
            aud: request.audience.clone(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
            jti: jti.clone(),
            scope: join_scopes(&scopes),
            client_id: request.client.client_id.clone(),
            act: None,
        };
        let access_token = self.jwt.sign(&claims)?;

        let account_id = request.account.as_ref().map(|a| a.id.clone());

        let (refresh_token, minted_refresh) = match request.reuse_refresh_token.clone() {
            Some(existing) => (Some(existing), false),
            None if scopes.contains(OFFLINE_ACCESS)
                && request.client.allows_grant(GrantType::RefreshToken) =>
            {
                let value = generate_opaque_token();
                let refresh_expires_at = self
                    .config
                    .refresh_token_validity_secs
                    .map(|secs| lifetime_end(now, secs, "refresh token"))
                    .transpose()?;
                self.tokens
                    .save_refresh_token(RefreshToken {
                        value_hash: token_hash(&value),
                        client_id: request.client.client_id.clone(),
                        account_id: account_id.clone(),
                        scopes: scopes.clone(),
                        audience: request.audience.clone(),
                        issued_at: now,
                        expires_at: refresh_expires_at,
                    })
                    .await?;
                (Some(value), true)
            }
            None => (None, false),
        };

        self.tokens
            .save_access_token(AccessToken {
                jti: jti.clone(),
                value_hash: token_hash(&access_token),
                client_id: request.client.client_id.clone(),
                account_id: account_id.clone(),
                scopes: scopes.clone(),
                audience: request.audience.clone(),
                issued_at: now,
                expires_at,
                refresh_token_hash: refresh_token.as_deref().map(token_hash),
            })
            .await?;

        info!(
            client_id = %request.client.client_id,
            account = ?account_id,
            grant_type = %request.grant_type,
            scope = %claims.scope,
            "Access token issued"
        );

        publish_or_log(
            self.audit.as_ref(),
            AuditEvent::new(
                AuditEventKind::AccessTokenIssued,
                request.client.client_id.clone(),
                account_id.clone(),
                scopes.clone(),
                request.grant_type,
                jti.clone(),
                now,
            ),
        )
        .await;

        if minted_refresh {
            publish_or_log(
                self.audit.as_ref(),
                AuditEvent::new(
                    AuditEventKind::RefreshTokenIssued,
                    request.client.client_id.clone(),
                    account_id,
                    scopes.clone(),
                    request.grant_type,
                    jti,
                    now,
                ),
            )
            .await;
        }

        if let Some(tracker) = &self.last_used {
            if let Err(e) = tracker.track(&request.client, now.date_naive()).await {
                warn!(client_id = %request.client.client_id, error = %e, "Failed to update client last-used date");
            }
        }

        Ok(TokenResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.config.access_token_validity_secs,
            refresh_token,
            scope: claims.scope,
            issued_token_type: request.issued_token_type,
        })
    }
}

/// Expiry of a token with the configured lifetime
fn lifetime_end(now: DateTime<Utc>, secs: i64, what: &str) -> Result<DateTime<Utc>> {
    checked_add_secs(now, secs)
        .ok_or_else(|| AuthzError::Config(format!("{} lifetime of {}s is out of range", what, secs)))
}

/// 32 random bytes, URL-safe base64
pub fn generate_opaque_token() -> String {
    let bytes: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}
