//! Scope policy definition and storage

use crate::error::Result;
use crate::types::{AccountId, GroupId, PolicyId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Policy rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PolicyRule {
    /// Grant the matched scopes
    Permit,
    /// Withhold the matched scopes
    Deny,
}

impl fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Permit => f.write_str("PERMIT"),
            Self::Deny => f.write_str("DENY"),
        }
    }
}

/// How a policy's scope entries are compared with requested scopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MatchingPolicy {
    /// Literal equality
    #[default]
    Exact,
    /// `name:path` entries compared by path containment
    Path,
}

/// Who a policy applies to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum PolicySubject {
    /// Every account
    #[default]
    Global,
    /// A single account
    Account(AccountId),
    /// Every member of a group
    Group(GroupId),
}

/// Scope policy definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopePolicy {
    /// Unique policy identifier
    pub id: PolicyId,

    /// Free text, for diagnostics only
    #[serde(default)]
    pub description: String,

    /// Policy rule (permit or deny)
    pub rule: PolicyRule,

    /// Matching policy for the scope entries
    #[serde(default)]
    pub matching_policy: MatchingPolicy,

    /// Scope entries
    pub scopes: BTreeSet<String>,

    /// Policy subject
    #[serde(default)]
    pub subject: PolicySubject,
}

impl ScopePolicy {
    /// Create a global policy with no scopes
    pub fn new(id: impl Into<String>, rule: PolicyRule) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            rule,
            matching_policy: MatchingPolicy::Exact,
            scopes: BTreeSet::new(),
            subject: PolicySubject::Global,
        }
    }

    /// Global DENY policy
    pub fn deny(id: impl Into<String>) -> Self {
        Self::new(id, PolicyRule::Deny)
    }

    /// Global PERMIT policy
    pub fn permit(id: impl Into<String>) -> Self {
        Self::new(id, PolicyRule::Permit)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_matching(mut self, matching_policy: MatchingPolicy) -> Self {
        self.matching_policy = matching_policy;
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes.extend(scopes.into_iter().map(Into::into));
        self
    }

    /// Link the policy to one account
    pub fn for_account(mut self, account_id: impl Into<String>) -> Self {
        self.subject = PolicySubject::Account(account_id.into());
        self
    }

    /// Link the policy to one group
    pub fn for_group(mut self, group_id: impl Into<String>) -> Self {
        self.subject = PolicySubject::Group(group_id.into());
        self
    }

    pub fn is_global(&self) -> bool {
        self.subject == PolicySubject::Global
    }
}

/// Scope policy store trait
///
/// Read by the scope policy PDP on every token request. The PDP never
/// writes through this interface.
#[async_trait]
pub trait ScopePolicyStore: Send + Sync {
    /// Get a policy by ID
    async fn get(&self, id: &str) -> Result<Option<ScopePolicy>>;

    /// Store a policy, replacing any policy with the same ID
    async fn save(&self, policy: ScopePolicy) -> Result<()>;

    /// Delete a policy
    async fn delete(&self, id: &str) -> Result<()>;

    /// List all policies
    async fn list(&self) -> Result<Vec<ScopePolicy>>;

    /// Policies without a subject
    async fn find_global(&self) -> Result<Vec<ScopePolicy>>;

    /// Policies linked to the account
    async fn find_by_account(&self, account_id: &str) -> Result<Vec<ScopePolicy>>;

    /// Policies linked to any of the groups
    async fn find_by_groups(&self, group_ids: &[GroupId]) -> Result<Vec<ScopePolicy>>;
}

/// In-memory scope policy store implementation
pub struct InMemoryScopePolicyStore {
    policies: Arc<RwLock<HashMap<PolicyId, ScopePolicy>>>,
}

impl InMemoryScopePolicyStore {
    /// Create a new in-memory policy store
    pub fn new() -> Self {
        Self {
            policies: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn find_where<F>(&self, predicate: F) -> Vec<ScopePolicy>
    where
        F: Fn(&ScopePolicy) -> bool,
    {
        let policies = self.policies.read().await;
        let mut matching: Vec<ScopePolicy> =
            policies.values().filter(|p| predicate(p)).cloned().collect();
        matching.sort_by(|a, b| a.id.cmp(&b.id));
        matching
    }
}

impl Default for InMemoryScopePolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScopePolicyStore for InMemoryScopePolicyStore {
    async fn get(&self, id: &str) -> Result<Option<ScopePolicy>> {
        let policies = self.policies.read().await;
        Ok(policies.get(id).cloned())
    }

    async fn save(&self, policy: ScopePolicy) -> Result<()> {
        let mut policies = self.policies.write().await;
        policies.insert(policy.id.clone(), policy);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut policies = self.policies.write().await;
        policies.remove(id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ScopePolicy>> {
        Ok(self.find_where(|_| true).await)
    }

    async fn find_global(&self) -> Result<Vec<ScopePolicy>> {
        Ok(self.find_where(ScopePolicy::is_global).await)
    }

    async fn find_by_account(&self, account_id: &str) -> Result<Vec<ScopePolicy>> {
        Ok(self
            .find_where(|p| matches!(&p.subject, PolicySubject::Account(id) if id == account_id))
            .await)
    }

    async fn find_by_groups(&self, group_ids: &[GroupId]) -> Result<Vec<ScopePolicy>> {
        Ok(self
            .find_where(|p| matches!(&p.subject, PolicySubject::Group(id) if group_ids.contains(id)))
            .await)
    }
}
