//! Acceptable use policy gate

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tracing::info;

use crate::clock::{checked_add_days, Clock};
use crate::error::{AuthzError, Result};
use crate::types::Account;

/// The deployment's acceptable use policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aup {
    /// Signatures older than this must be renewed
    pub last_update_time: DateTime<Utc>,
    /// Days a signature stays valid; 0 means forever
    #[serde(default)]
    pub signature_validity_days: i64,
}

/// Source of the current AUP
#[async_trait]
pub trait AupRepository: Send + Sync {
    async fn find_default(&self) -> Result<Option<Aup>>;
}

/// AUP repository holding a single, replaceable AUP
#[derive(Debug, Default)]
pub struct StaticAupRepository {
    aup: RwLock<Option<Aup>>,
}

impl StaticAupRepository {
    pub fn new(aup: Option<Aup>) -> Self {
        Self {
            aup: RwLock::new(aup),
        }
    }

    pub fn set(&self, aup: Option<Aup>) -> Result<()> {
        *self
            .aup
            .write()
            .map_err(|_| AuthzError::Internal("AUP lock poisoned".to_string()))? = aup;
        Ok(())
    }
}

#[async_trait]
impl AupRepository for StaticAupRepository {
    async fn find_default(&self) -> Result<Option<Aup>> {
        Ok(self
            .aup
            .read()
            .map_err(|_| AuthzError::Internal("AUP lock poisoned".to_string()))?
            .clone())
    }
}

/// Whether an account must (re)sign the AUP before getting a token
#[async_trait]
pub trait AupSignatureCheck: Send + Sync {
    async fn needs_signature(&self, account: &Account) -> Result<bool>;
}

/// Signature check based on the AUP's update time and validity window
pub struct DefaultAupSignatureCheck {
    enabled: bool,
    repository: Arc<dyn AupRepository>,
    clock: Arc<dyn Clock>,
}

impl DefaultAupSignatureCheck {
    pub fn new(enabled: bool, repository: Arc<dyn AupRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            enabled,
            repository,
            clock,
        }
    }
}

#[async_trait]
impl AupSignatureCheck for DefaultAupSignatureCheck {
    async fn needs_signature(&self, account: &Account) -> Result<bool> {
        if !self.enabled {
            return Ok(false);
        }
        let Some(aup) = self.repository.find_default().await? else {
            return Ok(false);
        };
        let Some(signed_at) = account.aup_signature_time else {
            return Ok(true);
        };

        if signed_at < aup.last_update_time {
            return Ok(true);
        }

        if aup.signature_validity_days > 0 {
            // A window reaching past the representable range never lapses
            return Ok(match checked_add_days(signed_at, aup.signature_validity_days) {
                Some(valid_until) => valid_until < self.clock.now(),
                None => false,
            });
        }

        Ok(false)
    }
}

/// Gate run by the refresh and token exchange grants
#[derive(Clone)]
pub struct AupGate {
    check: Arc<dyn AupSignatureCheck>,
}

impl AupGate {
    pub fn new(check: Arc<dyn AupSignatureCheck>) -> Self {
        Self { check }
    }

    /// Fails with `invalid_grant` when the account has to sign the AUP
    pub async fn ensure_signed(&self, account: &Account) -> Result<()> {
        if self.check.needs_signature(account).await? {
            info!(account = %account.username, "Token request blocked: AUP signature required");
            return Err(AuthzError::InvalidGrant(format!(
                "User {} needs to sign AUP for this organization in order to proceed.",
                account.username
            )));
        }
        Ok(())
    }
}
