//! Token endpoint dispatch
//!
//! Authenticates the client, checks the grant type is allowed for it and
//! hands the request to the matching granter.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

use crate::error::{AuthzError, Result};
use crate::grant::{TokenGranter, TokenRequest};
use crate::store::ClientRepository;
use crate::token::TokenResponse;
use crate::types::{parse_scope_param, Client, GrantType};

/// Client credentials presented with a token request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: Option<String>,
}

impl ClientCredentials {
    /// Credentials from HTTP Basic, falling back to the form parameters
    pub fn resolve(basic: Option<ClientCredentials>, form: &BTreeMap<String, String>) -> Option<Self> {
        basic.or_else(|| {
            form.get("client_id")
                .filter(|id| !id.is_empty())
                .map(|client_id| ClientCredentials {
                    client_id: client_id.clone(),
                    client_secret: form.get("client_secret").cloned(),
                })
        })
    }
}

/// Token endpoint
pub struct TokenEndpoint {
    clients: Arc<dyn ClientRepository>,
    granters: HashMap<GrantType, Arc<dyn TokenGranter>>,
}

impl TokenEndpoint {
    pub fn new(clients: Arc<dyn ClientRepository>) -> Self {
        Self {
            clients,
            granters: HashMap::new(),
        }
    }

    /// Registers a granter under its grant type
    pub fn with_granter(mut self, granter: Arc<dyn TokenGranter>) -> Self {
        self.granters.insert(granter.grant_type(), granter);
        self
    }

    pub fn supported_grant_types(&self) -> Vec<GrantType> {
        let mut grants: Vec<GrantType> = self.granters.keys().copied().collect();
        grants.sort();
        grants
    }

    /// Handles a form-encoded token request
    #[instrument(skip_all, fields(grant_type = form.get("grant_type").map(String::as_str).unwrap_or("")))]
    pub async fn handle(
        &self,
        form: BTreeMap<String, String>,
        basic: Option<ClientCredentials>,
    ) -> Result<TokenResponse> {
        let grant_type: GrantType = form
            .get("grant_type")
            .filter(|g| !g.is_empty())
            .ok_or_else(|| AuthzError::InvalidRequest("Missing required parameter: grant_type".to_string()))?
            .parse()?;

        let credentials = ClientCredentials::resolve(basic, &form)
            .ok_or_else(|| AuthzError::InvalidClient("Client authentication required".to_string()))?;
        let client = self.authenticate(&credentials).await?;

        if !client.allows_grant(grant_type) {
            return Err(AuthzError::UnauthorizedClient(format!(
                "Client {} is not allowed to use grant type {}",
                client.client_id, grant_type
            )));
        }

        let granter = self
            .granters
            .get(&grant_type)
            .ok_or_else(|| AuthzError::UnsupportedGrantType(grant_type.to_string()))?;

        let request = TokenRequest {
            grant_type,
            scopes: parse_scope_param(form.get("scope").map(String::as_str)),
            client,
            params: form,
        };

        let result = granter.grant(&request).await;
        match &result {
            Ok(_) => {}
            Err(AuthzError::AuthorizationPending) => {
                debug!(client_id = %request.client.client_id, "Authorization pending");
            }
            Err(e) if e.is_server_error() => {
                error!(client_id = %request.client.client_id, error = %e, "Token request failed");
            }
            Err(e) => {
                warn!(
                    client_id = %request.client.client_id,
                    error = e.oauth_error_code(),
                    description = %e,
                    "Token request rejected"
                );
            }
        }
        result
    }

    async fn authenticate(&self, credentials: &ClientCredentials) -> Result<Client> {
        let client = self
            .clients
            .find_by_client_id(&credentials.client_id)
            .await?
            .ok_or_else(|| AuthzError::InvalidClient("Bad client credentials".to_string()))?;

        if let Some(expected) = &client.secret {
            let presented = credentials.client_secret.as_deref().unwrap_or_default();
            // blake3::Hash equality is constant-time
            if blake3::hash(expected.as_bytes()) != blake3::hash(presented.as_bytes()) {
                return Err(AuthzError::InvalidClient("Bad client credentials".to_string()));
            }
        }
        Ok(client)
    }
}
