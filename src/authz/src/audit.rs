//! Audit events for token issuance
//!
//! Publishing is fire-and-forget from the token service's point of view:
//! [`publish_or_log`] logs a failed publish and carries on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::Result;
use crate::types::{AccountId, ClientId, GrantType, ScopeSet};

/// Default number of events kept by [`InMemoryAuditLog`]
pub const DEFAULT_AUDIT_CAPACITY: usize = 10_000;

/// Kind of issuance event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventKind {
    AccessTokenIssued,
    RefreshTokenIssued,
}

/// Audit event entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: String,

    pub kind: AuditEventKind,

    /// Client the token was issued to
    pub client_id: ClientId,

    /// Owning account, if any
    pub account_id: Option<AccountId>,

    /// Granted scopes
    pub scopes: ScopeSet,

    pub grant_type: GrantType,

    /// JWT ID of the access token this event relates to
    pub jti: String,

    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        kind: AuditEventKind,
        client_id: impl Into<String>,
        account_id: Option<String>,
        scopes: ScopeSet,
        grant_type: GrantType,
        jti: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            client_id: client_id.into(),
            account_id,
            scopes,
            grant_type,
            jti: jti.into(),
            timestamp,
        }
    }
}

/// Audit event sink
#[async_trait]
pub trait AuditPublisher: Send + Sync {
    async fn publish(&self, event: AuditEvent) -> Result<()>;
}

/// Publishes an event, logging instead of failing when the sink errors
pub async fn publish_or_log(publisher: &dyn AuditPublisher, event: AuditEvent) {
    let kind = event.kind;
    let client_id = event.client_id.clone();
    if let Err(e) = publisher.publish(event).await {
        warn!(?kind, client_id = %client_id, error = %e, "Failed to publish audit event");
    }
}

/// Bounded in-memory audit log
pub struct InMemoryAuditLog {
    buffer: Arc<RwLock<Vec<AuditEvent>>>,
    capacity: usize,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_AUDIT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Arc::new(RwLock::new(Vec::new())),
            capacity: capacity.max(1),
        }
    }

    /// All retained events, oldest first
    pub async fn events(&self) -> Vec<AuditEvent> {
        self.buffer.read().await.clone()
    }

    /// Most recent events for a client, newest first
    pub async fn query_by_client(&self, client_id: &str, limit: usize) -> Vec<AuditEvent> {
        let buffer = self.buffer.read().await;
        buffer
            .iter()
            .rev()
            .filter(|e| e.client_id == client_id)
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.buffer.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.buffer.read().await.is_empty()
    }
}

impl Default for InMemoryAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditPublisher for InMemoryAuditLog {
    async fn publish(&self, event: AuditEvent) -> Result<()> {
        let mut buffer = self.buffer.write().await;
        buffer.push(event);

        // Drop the oldest tenth once over capacity
        if buffer.len() > self.capacity {
            let excess = buffer.len() - self.capacity;
            let drop = excess.max(self.capacity / 10).min(buffer.len());
            buffer.drain(0..drop);
        }

        Ok(())
    }
}

/// Writes audit events to the `audit` tracing target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditPublisher;

#[async_trait]
impl AuditPublisher for TracingAuditPublisher {
    async fn publish(&self, event: AuditEvent) -> Result<()> {
        info!(
            target: "audit",
            kind = ?event.kind,
            client_id = %event.client_id,
            account = ?event.account_id,
            grant_type = %event.grant_type,
            jti = %event.jti,
            scopes = ?event.scopes,
            "Token issued"
        );
        Ok(())
    }
}

/// Fans events out to several publishers
#[derive(Default)]
pub struct CompositeAuditPublisher {
    publishers: Vec<Arc<dyn AuditPublisher>>,
}

impl CompositeAuditPublisher {
    pub fn new(publishers: Vec<Arc<dyn AuditPublisher>>) -> Self {
        Self { publishers }
    }
}

#[async_trait]
impl AuditPublisher for CompositeAuditPublisher {
    async fn publish(&self, event: AuditEvent) -> Result<()> {
        for publisher in &self.publishers {
            publish_or_log(publisher.as_ref(), event.clone()).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthzError;

    fn event(client_id: &str) -> AuditEvent {
        AuditEvent::new(
            AuditEventKind::AccessTokenIssued,
            client_id,
            Some("a-1".to_string()),
            ScopeSet::new(),
            GrantType::RefreshToken,
            "jti",
            Utc::now(),
        )
    }

    struct FailingPublisher;

    #[async_trait]
    impl AuditPublisher for FailingPublisher {
        async fn publish(&self, _event: AuditEvent) -> Result<()> {
            Err(AuthzError::Internal("sink unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_in_memory_log() {
        let log = InMemoryAuditLog::new();
        log.publish(event("a")).await.unwrap();
        log.publish(event("b")).await.unwrap();
        log.publish(event("a")).await.unwrap();

        assert_eq!(log.len().await, 3);
        assert_eq!(log.query_by_client("a", 10).await.len(), 2);
        assert_eq!(log.query_by_client("a", 1).await.len(), 1);
    }

    #[tokio::test]
    async fn test_log_is_bounded() {
        let log = InMemoryAuditLog::with_capacity(20);
        for _ in 0..25 {
            log.publish(event("a")).await.unwrap();
        }
        assert!(log.len().await <= 20);
    }

    #[tokio::test]
    async fn test_publish_failure_is_swallowed() {
        let log = Arc::new(InMemoryAuditLog::new());
        let composite = CompositeAuditPublisher::new(vec![Arc::new(FailingPublisher), log.clone()]);

        publish_or_log(&FailingPublisher, event("a")).await;
        composite.publish(event("a")).await.unwrap();

        assert_eq!(log.len().await, 1);
    }
}
