//! In-memory store implementations
//!
//! Single-use artifacts live in `DashMap`s so that consumption is one
//! atomic `remove`.

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, RwLock as StdRwLock};
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    token_hash, AccessToken, AccountRepository, AuthorizationCode, AuthorizationCodeStore,
    ClientRepository, ClientUpdateListener, DeviceApproval, DeviceCode, DeviceCodeStore,
    RefreshToken, TokenRepository,
};
use crate::error::{AuthzError, Result};
use crate::types::{Account, AccountId, Client, ClientId};

/// In-memory account repository
#[derive(Default)]
pub struct InMemoryAccountRepository {
    accounts: Arc<RwLock<HashMap<AccountId, Account>>>,
}

impl InMemoryAccountRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountRepository for InMemoryAccountRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<Account>> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Account>> {
        let accounts = self.accounts.read().await;
        Ok(accounts.values().find(|a| a.username == username).cloned())
    }

    async fn save(&self, account: Account) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        accounts.insert(account.id.clone(), account);
        Ok(())
    }
}

/// In-memory client repository that notifies listeners on every save
#[derive(Default)]
pub struct InMemoryClientRepository {
    clients: Arc<RwLock<HashMap<ClientId, Client>>>,
    listeners: StdRwLock<Vec<Arc<dyn ClientUpdateListener>>>,
}

impl InMemoryClientRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn notify(&self, client_id: &str) -> Result<()> {
        let listeners = self
            .listeners
            .read()
            .map_err(|_| AuthzError::Internal("client listener lock poisoned".to_string()))?;
        for listener in listeners.iter() {
            listener.client_updated(client_id);
        }
        Ok(())
    }
}

#[async_trait]
impl ClientRepository for InMemoryClientRepository {
    async fn find_by_client_id(&self, client_id: &str) -> Result<Option<Client>> {
        let clients = self.clients.read().await;
        Ok(clients.get(client_id).cloned())
    }

    async fn save(&self, client: Client) -> Result<()> {
        let client_id = client.client_id.clone();
        {
            let mut clients = self.clients.write().await;
            clients.insert(client_id.clone(), client);
        }
        debug!(client_id = %client_id, "Client saved");
        self.notify(&client_id)
    }

    async fn advance_last_used(&self, client_id: &str, day: NaiveDate) -> Result<bool> {
        let mut clients = self.clients.write().await;
        let client = clients
            .get_mut(client_id)
            .ok_or_else(|| AuthzError::Storage(format!("unknown client '{}'", client_id)))?;

        match client.last_used {
            Some(stored) if stored >= day => Ok(false),
            _ => {
                client.last_used = Some(day);
                Ok(true)
            }
        }
    }

    fn subscribe(&self, listener: Arc<dyn ClientUpdateListener>) -> Result<()> {
        self.listeners
            .write()
            .map_err(|_| AuthzError::Internal("client listener lock poisoned".to_string()))?
            .push(listener);
        Ok(())
    }
}

/// In-memory authorization code store
#[derive(Default)]
pub struct InMemoryAuthorizationCodeStore {
    codes: DashMap<String, AuthorizationCode>,
}

impl InMemoryAuthorizationCodeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuthorizationCodeStore for InMemoryAuthorizationCodeStore {
    async fn save(&self, code: AuthorizationCode) -> Result<()> {
        self.codes.insert(code.code.clone(), code);
        Ok(())
    }

    async fn find(&self, code: &str) -> Result<Option<AuthorizationCode>> {
        Ok(self.codes.get(code).map(|c| c.clone()))
    }

    async fn consume(&self, code: &str) -> Result<Option<AuthorizationCode>> {
        Ok(self.codes.remove(code).map(|(_, c)| c))
    }
}

/// In-memory device code store
#[derive(Default)]
pub struct InMemoryDeviceCodeStore {
    codes: DashMap<String, DeviceCode>,
    /// user code -> device code
    user_codes: DashMap<String, String>,
}

impl InMemoryDeviceCodeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceCodeStore for InMemoryDeviceCodeStore {
    async fn save(&self, device_code: DeviceCode) -> Result<()> {
        self.user_codes
            .insert(device_code.user_code.clone(), device_code.device_code.clone());
        self.codes.insert(device_code.device_code.clone(), device_code);
        Ok(())
    }

    async fn find(&self, device_code: &str) -> Result<Option<DeviceCode>> {
        Ok(self.codes.get(device_code).map(|c| c.clone()))
    }

    async fn find_by_user_code(&self, user_code: &str) -> Result<Option<DeviceCode>> {
        let device_code = match self.user_codes.get(user_code) {
            Some(entry) => entry.value().clone(),
            None => return Ok(None),
        };
        self.find(&device_code).await
    }

    async fn approve(&self, user_code: &str, approval: DeviceApproval) -> Result<bool> {
        let device_code = match self.user_codes.get(user_code) {
            Some(entry) => entry.value().clone(),
            None => return Ok(false),
        };
        match self.codes.get_mut(&device_code) {
            Some(mut code) => {
                code.approval = Some(approval);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn consume(&self, device_code: &str) -> Result<Option<DeviceCode>> {
        let consumed = self.codes.remove(device_code).map(|(_, c)| c);
        if let Some(code) = &consumed {
            self.user_codes.remove(&code.user_code);
        }
        Ok(consumed)
    }
}

/// In-memory token repository
#[derive(Default)]
pub struct InMemoryTokenRepository {
    /// jti -> token
    access_tokens: DashMap<String, AccessToken>,
    /// value hash -> token
    refresh_tokens: DashMap<String, RefreshToken>,
}

impl InMemoryTokenRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenRepository for InMemoryTokenRepository {
    async fn save_access_token(&self, token: AccessToken) -> Result<()> {
        self.access_tokens.insert(token.jti.clone(), token);
        Ok(())
    }

    async fn find_access_token(&self, jti: &str) -> Result<Option<AccessToken>> {
        Ok(self.access_tokens.get(jti).map(|t| t.clone()))
    }

    async fn count_access_tokens(&self) -> Result<usize> {
        Ok(self.access_tokens.len())
    }

    async fn save_refresh_token(&self, token: RefreshToken) -> Result<()> {
        self.refresh_tokens.insert(token.value_hash.clone(), token);
        Ok(())
    }

    async fn find_refresh_token(&self, value: &str) -> Result<Option<RefreshToken>> {
        Ok(self.refresh_tokens.get(&token_hash(value)).map(|t| t.clone()))
    }

    async fn consume_refresh_token(&self, value: &str) -> Result<Option<RefreshToken>> {
        Ok(self.refresh_tokens.remove(&token_hash(value)).map(|(_, t)| t))
    }

    async fn revoke_refresh_token(&self, value: &str) -> Result<bool> {
        Ok(self.refresh_tokens.remove(&token_hash(value)).is_some())
    }
}
