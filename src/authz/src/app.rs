//! Composition root
//!
//! Wires stores, PDPs, the token service, the granters and the endpoint
//! from one immutable [`AuthzConfig`]. Collaborators not supplied to the
//! builder default to the in-memory implementations.

use std::sync::Arc;
use tracing::info;

use crate::audit::{AuditPublisher, TracingAuditPublisher};
use crate::aup::{AupGate, AupRepository, DefaultAupSignatureCheck, StaticAupRepository};
use crate::clock::{Clock, SystemClock};
use crate::config::AuthzConfig;
use crate::endpoint::TokenEndpoint;
use crate::error::Result;
use crate::grant::{
    AuthorizationCodeGranter, DeviceAuthorizationService, DeviceCodeGranter, RefreshTokenGranter,
    TokenExchangeGranter,
};
use crate::pdp::{ScopePolicyPdp, TokenExchangePdp};
use crate::policy::{InMemoryScopePolicyStore, ScopePolicyStore};
use crate::scope::ScopeMatcherRegistry;
use crate::store::{
    AccountRepository, AuthorizationCodeStore, ClientRepository, DeviceCodeStore,
    InMemoryAccountRepository, InMemoryAuthorizationCodeStore, InMemoryClientRepository,
    InMemoryDeviceCodeStore, InMemoryTokenRepository, TokenRepository,
};
use crate::token::{HmacJwtService, JwtService, LastUsedTracker, TokenService};

/// Fully wired authorization server core
pub struct AuthorizationServer {
    config: AuthzConfig,
    registry: Arc<ScopeMatcherRegistry>,
    policies: Arc<dyn ScopePolicyStore>,
    accounts: Arc<dyn AccountRepository>,
    clients: Arc<dyn ClientRepository>,
    jwt: Arc<dyn JwtService>,
    scope_pdp: Arc<ScopePolicyPdp>,
    exchange_pdp: Arc<TokenExchangePdp>,
    token_service: Arc<TokenService>,
    device_authorization: DeviceAuthorizationService,
    endpoint: TokenEndpoint,
}

impl AuthorizationServer {
    pub fn builder(config: AuthzConfig) -> AuthorizationServerBuilder {
        AuthorizationServerBuilder::new(config)
    }

    /// Server backed entirely by in-memory stores
    pub fn in_memory(config: AuthzConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &AuthzConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ScopeMatcherRegistry> {
        &self.registry
    }

    pub fn policies(&self) -> &Arc<dyn ScopePolicyStore> {
        &self.policies
    }

    pub fn accounts(&self) -> &Arc<dyn AccountRepository> {
        &self.accounts
    }

    pub fn clients(&self) -> &Arc<dyn ClientRepository> {
        &self.clients
    }

    pub fn jwt(&self) -> &Arc<dyn JwtService> {
        &self.jwt
    }

    pub fn scope_pdp(&self) -> &Arc<ScopePolicyPdp> {
        &self.scope_pdp
    }

    pub fn exchange_pdp(&self) -> &Arc<TokenExchangePdp> {
        &self.exchange_pdp
    }

    pub fn token_service(&self) -> &Arc<TokenService> {
        &self.token_service
    }

    pub fn device_authorization(&self) -> &DeviceAuthorizationService {
        &self.device_authorization
    }

    pub fn endpoint(&self) -> &TokenEndpoint {
        &self.endpoint
    }
}

/// Builder for [`AuthorizationServer`]
pub struct AuthorizationServerBuilder {
    config: AuthzConfig,
    policies: Option<Arc<dyn ScopePolicyStore>>,
    accounts: Option<Arc<dyn AccountRepository>>,
    clients: Option<Arc<dyn ClientRepository>>,
    authorization_codes: Option<Arc<dyn AuthorizationCodeStore>>,
    device_codes: Option<Arc<dyn DeviceCodeStore>>,
    tokens: Option<Arc<dyn TokenRepository>>,
    aup: Option<Arc<dyn AupRepository>>,
    audit: Option<Arc<dyn AuditPublisher>>,
    clock: Option<Arc<dyn Clock>>,
}

impl AuthorizationServerBuilder {
    pub fn new(config: AuthzConfig) -> Self {
        Self {
            config,
            policies: None,
            accounts: None,
            clients: None,
            authorization_codes: None,
            device_codes: None,
            tokens: None,
            aup: None,
            audit: None,
            clock: None,
        }
    }

    pub fn policies(mut self, policies: Arc<dyn ScopePolicyStore>) -> Self {
        self.policies = Some(policies);
        self
    }

    pub fn accounts(mut self, accounts: Arc<dyn AccountRepository>) -> Self {
        self.accounts = Some(accounts);
        self
    }

    pub fn clients(mut self, clients: Arc<dyn ClientRepository>) -> Self {
        self.clients = Some(clients);
        self
    }

    pub fn authorization_codes(mut self, codes: Arc<dyn AuthorizationCodeStore>) -> Self {
        self.authorization_codes = Some(codes);
        self
    }

    pub fn device_codes(mut self, codes: Arc<dyn DeviceCodeStore>) -> Self {
        self.device_codes = Some(codes);
        self
    }

    pub fn tokens(mut self, tokens: Arc<dyn TokenRepository>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn aup(mut self, aup: Arc<dyn AupRepository>) -> Self {
        self.aup = Some(aup);
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditPublisher>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<AuthorizationServer> {
        self.config.validate()?;
        let config = self.config;

        let registry = Arc::new(ScopeMatcherRegistry::new(&config.scope_matchers)?);
        let policies = self
            .policies
            .unwrap_or_else(|| Arc::new(InMemoryScopePolicyStore::new()));
        let accounts = self
            .accounts
            .unwrap_or_else(|| Arc::new(InMemoryAccountRepository::new()));
        let clients = self
            .clients
            .unwrap_or_else(|| Arc::new(InMemoryClientRepository::new()));
        let authorization_codes = self
            .authorization_codes
            .unwrap_or_else(|| Arc::new(InMemoryAuthorizationCodeStore::new()));
        let device_codes = self
            .device_codes
            .unwrap_or_else(|| Arc::new(InMemoryDeviceCodeStore::new()));
        let tokens = self
            .tokens
            .unwrap_or_else(|| Arc::new(InMemoryTokenRepository::new()));
        let aup_repository = self
            .aup
            .unwrap_or_else(|| Arc::new(StaticAupRepository::new(None)));
        let audit = self.audit.unwrap_or_else(|| Arc::new(TracingAuditPublisher));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        clients.subscribe(registry.clone())?;

        let jwt: Arc<dyn JwtService> = Arc::new(
            HmacJwtService::new(config.tokens.issuer.clone(), config.tokens.signing_secret.as_bytes())
                .with_clock(clock.clone()),
        );
        let scope_pdp = Arc::new(ScopePolicyPdp::new(policies.clone(), registry.clone()));
        let exchange_pdp = Arc::new(TokenExchangePdp::new(
            &config.token_exchange.policies,
            registry.clone(),
        )?);
        let aup_gate = AupGate::new(Arc::new(DefaultAupSignatureCheck::new(
            config.aup.enabled,
            aup_repository,
            clock.clone(),
        )));

        let mut token_service = TokenService::new(
            config.tokens.clone(),
            tokens,
            jwt.clone(),
            scope_pdp.clone(),
            audit,
            clock.clone(),
        );
        if config.tokens.track_last_used {
            token_service = token_service.with_last_used_tracker(LastUsedTracker::new(clients.clone()));
        }
        let token_service = Arc::new(token_service);

        let device_authorization = DeviceAuthorizationService::new(
            device_codes.clone(),
            clock,
            config.tokens.device_code_validity_secs,
        );

        let endpoint = TokenEndpoint::new(clients.clone())
            .with_granter(Arc::new(AuthorizationCodeGranter::new(
                authorization_codes,
                accounts.clone(),
                scope_pdp.clone(),
                token_service.clone(),
            )))
            .with_granter(Arc::new(DeviceCodeGranter::new(
                device_codes,
                accounts.clone(),
                scope_pdp.clone(),
                token_service.clone(),
            )))
            .with_granter(Arc::new(RefreshTokenGranter::new(
                accounts.clone(),
                aup_gate.clone(),
                scope_pdp.clone(),
                token_service.clone(),
            )))
            .with_granter(Arc::new(TokenExchangeGranter::new(
                clients.clone(),
                accounts.clone(),
                aup_gate,
                exchange_pdp.clone(),
                token_service.clone(),
            )));

        info!(
            issuer = %config.tokens.issuer,
            scope_matchers = config.scope_matchers.len(),
            exchange_policies = exchange_pdp.policy_count(),
            "Authorization server initialized"
        );

        Ok(AuthorizationServer {
            config,
            registry,
            policies,
            accounts,
            clients,
            jwt,
            scope_pdp,
            exchange_pdp,
            token_service,
            device_authorization,
            endpoint,
        })
    }
}
