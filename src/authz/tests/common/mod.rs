//! Shared fixtures for the integration tests

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use iam_authz::audit::InMemoryAuditLog;
use iam_authz::aup::{Aup, StaticAupRepository};
use iam_authz::clock::{Clock, FixedClock};
use iam_authz::config::{AuthzConfig, ScopeMatcherConfig, TokenConfig};
use iam_authz::endpoint::ClientCredentials;
use iam_authz::policy::InMemoryScopePolicyStore;
use iam_authz::store::{
    AccountRepository, AuthorizationCode, AuthorizationCodeStore, ClientRepository,
    InMemoryAccountRepository, InMemoryAuthorizationCodeStore, InMemoryClientRepository,
    InMemoryDeviceCodeStore, InMemoryTokenRepository,
};
use iam_authz::{
    Account, AuthorizationServer, Client, GrantType, PolicyRule, Result, ScopeSet,
    TokenExchangePolicy, TokenResponse,
};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const ISSUER: &str = "https://iam.example/";
pub const WEB_APP: &str = "web-app";
pub const WEB_SECRET: &str = "web-secret";
pub const SERVICE: &str = "storage-service";
pub const SERVICE_SECRET: &str = "service-secret";
pub const REDIRECT_URI: &str = "https://app.example/cb";

pub fn scopes(items: &[&str]) -> ScopeSet {
    items.iter().map(|s| s.to_string()).collect()
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
}

pub fn test_config() -> AuthzConfig {
    let mut config = AuthzConfig::default();
    config.tokens = TokenConfig {
        issuer: ISSUER.to_string(),
        signing_secret: "integration-test-secret".to_string(),
        ..TokenConfig::default()
    };
    config.scope_matchers = vec![
        ScopeMatcherConfig::Path {
            name: "storage.read".to_string(),
            prefix: "storage.read".to_string(),
            path: "/".to_string(),
        },
        ScopeMatcherConfig::Path {
            name: "storage.write".to_string(),
            prefix: "storage.write".to_string(),
            path: "/".to_string(),
        },
    ];
    config.token_exchange.policies = vec![TokenExchangePolicy::new("allow-all", PolicyRule::Permit)];
    config
}

fn all_grants(client: Client) -> Client {
    GrantType::all()
        .into_iter()
        .fold(client, |client, grant| client.with_grant_type(grant))
}

/// Server wired with in-memory stores the tests can reach directly
pub struct Harness {
    pub server: Arc<AuthorizationServer>,
    pub policies: Arc<InMemoryScopePolicyStore>,
    pub accounts: Arc<InMemoryAccountRepository>,
    pub clients: Arc<InMemoryClientRepository>,
    pub codes: Arc<InMemoryAuthorizationCodeStore>,
    pub device_codes: Arc<InMemoryDeviceCodeStore>,
    pub tokens: Arc<InMemoryTokenRepository>,
    pub aup: Arc<StaticAupRepository>,
    pub audit: Arc<InMemoryAuditLog>,
    pub clock: Arc<FixedClock>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: AuthzConfig) -> Self {
        let policies = Arc::new(InMemoryScopePolicyStore::new());
        let accounts = Arc::new(InMemoryAccountRepository::new());
        let clients = Arc::new(InMemoryClientRepository::new());
        let codes = Arc::new(InMemoryAuthorizationCodeStore::new());
        let device_codes = Arc::new(InMemoryDeviceCodeStore::new());
        let tokens = Arc::new(InMemoryTokenRepository::new());
        let aup = Arc::new(StaticAupRepository::new(None));
        let audit = Arc::new(InMemoryAuditLog::new());
        let clock = Arc::new(FixedClock::new(start_time()));

        let server = AuthorizationServer::builder(config)
            .policies(policies.clone())
            .accounts(accounts.clone())
            .clients(clients.clone())
            .authorization_codes(codes.clone())
            .device_codes(device_codes.clone())
            .tokens(tokens.clone())
            .aup(aup.clone())
            .audit(audit.clone())
            .clock(clock.clone())
            .build()
            .unwrap();

        let harness = Self {
            server: Arc::new(server),
            policies,
            accounts,
            clients,
            codes,
            device_codes,
            tokens,
            aup,
            audit,
            clock,
        };

        harness
            .clients
            .save(
                all_grants(Client::new(WEB_APP))
                    .with_secret(WEB_SECRET)
                    .with_redirect_uri(REDIRECT_URI)
                    .with_scopes([
                        "openid",
                        "profile",
                        "offline_access",
                        "scim:write",
                        "storage.read:/",
                        "storage.write:/",
                    ]),
            )
            .await
            .unwrap();
        harness
            .clients
            .save(
                all_grants(Client::new(SERVICE))
                    .with_secret(SERVICE_SECRET)
                    .with_scopes(["openid", "profile", "storage.read:/data"]),
            )
            .await
            .unwrap();
        harness.accounts.save(test_account()).await.unwrap();

        harness
    }

    pub async fn client(&self, client_id: &str) -> Client {
        self.clients.find_by_client_id(client_id).await.unwrap().unwrap()
    }

    pub async fn save_account(&self, account: Account) {
        self.accounts.save(account).await.unwrap();
    }

    /// Requires every account to sign a freshly updated AUP
    pub fn require_aup(&self) {
        self.aup
            .set(Some(Aup {
                last_update_time: self.clock.now(),
                signature_validity_days: 0,
            }))
            .unwrap();
    }

    /// Stores an authorization code for the test account
    pub async fn issue_code(&self, code: &str, requested: &[&str]) -> AuthorizationCode {
        self.issue_code_with(code, requested, Some(REDIRECT_URI), BTreeMap::new())
            .await
    }

    pub async fn issue_code_with(
        &self,
        code: &str,
        requested: &[&str],
        redirect_uri: Option<&str>,
        params: BTreeMap<String, String>,
    ) -> AuthorizationCode {
        let code = AuthorizationCode {
            code: code.to_string(),
            client_id: WEB_APP.to_string(),
            account_id: "acct-test".to_string(),
            redirect_uri: redirect_uri.map(str::to_string),
            scopes: scopes(requested),
            params,
            expires_at: self.clock.now() + Duration::minutes(5),
        };
        self.codes.save(code.clone()).await.unwrap();
        code
    }

    /// Sends a token request authenticated with HTTP Basic credentials
    pub async fn token(
        &self,
        client_id: &str,
        secret: &str,
        params: &[(&str, &str)],
    ) -> Result<TokenResponse> {
        let form = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.server
            .endpoint()
            .handle(
                form,
                Some(ClientCredentials {
                    client_id: client_id.to_string(),
                    client_secret: Some(secret.to_string()),
                }),
            )
            .await
    }

    /// Redeems `code` for the web app
    pub async fn redeem_code(&self, code: &str) -> Result<TokenResponse> {
        self.token(
            WEB_APP,
            WEB_SECRET,
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", REDIRECT_URI),
            ],
        )
        .await
    }

    /// Access and refresh token for the test account
    pub async fn login(&self, requested: &[&str]) -> TokenResponse {
        let code = format!("login-{}", uuid::Uuid::new_v4());
        self.issue_code(&code, requested).await;
        self.redeem_code(&code).await.unwrap()
    }

    pub async fn access_token_count(&self) -> usize {
        use iam_authz::store::TokenRepository;
        self.tokens.count_access_tokens().await.unwrap()
    }
}

pub fn test_account() -> Account {
    Account::new("acct-test", "test").with_aup_signature(start_time() - Duration::days(1))
}
