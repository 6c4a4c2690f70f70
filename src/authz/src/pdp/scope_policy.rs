//! Scope policy PDP
//!
//! For each requested scope, every applicable policy (global, linked to the
//! account, linked to one of its groups) that matches the scope is ranked by
//! specificity. Among the most specific matches a DENY wins; otherwise, and
//! when nothing matches, the scope is kept.

use std::sync::Arc;
use tracing::{debug, instrument};

use crate::error::{AuthzError, Result};
use crate::policy::{PolicyRule, ScopePolicy, ScopePolicyStore};
use crate::scope::{path_contains, specificity, ParsedScope, PathScope, ScopeMatcherRegistry};
use crate::types::{Account, GroupId, PolicyId, ScopeSet};

/// Outcome for a single requested scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeDecision {
    /// Requested scope
    pub scope: String,
    /// Whether the scope survives filtering
    pub permitted: bool,
    /// Specificity of the deciding matches; `None` when nothing matched
    pub specificity: Option<usize>,
    /// Policies whose match had the deciding specificity
    pub deciding_policies: Vec<PolicyId>,
}

/// Policy with its scope entries validated and parsed
#[derive(Debug)]
struct CompiledPolicy<'a> {
    policy: &'a ScopePolicy,
    entries: Vec<ParsedScope>,
}

impl CompiledPolicy<'_> {
    /// Highest specificity at which this policy matches `scope`
    fn match_specificity(&self, scope: &str) -> Option<usize> {
        self.entries
            .iter()
            .filter_map(|entry| match entry {
                ParsedScope::Exact(raw) => (raw == scope).then_some(0),
                ParsedScope::Path(entry) => PathScope::parse_with_name(scope, entry.name())
                    .filter(|requested| path_contains(requested.path(), entry.path()))
                    .map(|_| specificity(entry.path())),
            })
            .max()
    }
}

/// Filters requested scopes against stored scope policies
pub struct ScopePolicyPdp {
    store: Arc<dyn ScopePolicyStore>,
    registry: Arc<ScopeMatcherRegistry>,
}

impl ScopePolicyPdp {
    pub fn new(store: Arc<dyn ScopePolicyStore>, registry: Arc<ScopeMatcherRegistry>) -> Self {
        Self { store, registry }
    }

    /// Policy store backing this PDP
    pub fn store(&self) -> &Arc<dyn ScopePolicyStore> {
        &self.store
    }

    /// Policies that apply to `account`
    pub async fn applicable_policies(&self, account: &Account) -> Result<Vec<ScopePolicy>> {
        let groups: Vec<GroupId> = account.groups.iter().cloned().collect();

        let mut policies = self.store.find_global().await?;
        policies.extend(self.store.find_by_account(&account.id).await?);
        if !groups.is_empty() {
            policies.extend(self.store.find_by_groups(&groups).await?);
        }
        Ok(policies)
    }

    /// Returns the subset of `requested` the account may receive
    #[instrument(skip(self, requested, account), fields(account = %account.username))]
    pub async fn filter_scopes(&self, requested: &ScopeSet, account: &Account) -> Result<ScopeSet> {
        if requested.is_empty() {
            return Ok(ScopeSet::new());
        }
        let policies = self.applicable_policies(account).await?;
        self.filter_with_policies(requested, &policies)
    }

    /// Filters `requested` against an explicit policy list
    ///
    /// The result does not depend on the order of `policies`.
    pub fn filter_with_policies(
        &self,
        requested: &ScopeSet,
        policies: &[ScopePolicy],
    ) -> Result<ScopeSet> {
        let compiled = self.compile(policies)?;

        let mut allowed = ScopeSet::new();
        for scope in requested {
            let decision = Self::decide(scope, &compiled);
            if decision.permitted {
                allowed.insert(scope.clone());
            } else {
                debug!(
                    scope = %scope,
                    specificity = ?decision.specificity,
                    policies = ?decision.deciding_policies,
                    "Scope denied by policy"
                );
            }
        }
        Ok(allowed)
    }

    /// Per-scope decisions, for diagnostics
    pub fn explain(&self, requested: &ScopeSet, policies: &[ScopePolicy]) -> Result<Vec<ScopeDecision>> {
        let compiled = self.compile(policies)?;
        Ok(requested
            .iter()
            .map(|scope| Self::decide(scope, &compiled))
            .collect())
    }

    fn compile<'a>(&self, policies: &'a [ScopePolicy]) -> Result<Vec<CompiledPolicy<'a>>> {
        policies
            .iter()
            .map(|policy| {
                let entries = policy
                    .scopes
                    .iter()
                    .map(|entry| {
                        self.registry
                            .validate(entry, policy.matching_policy)
                            .map_err(|e| AuthzError::policy_configuration(&policy.id, e.to_string()))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(CompiledPolicy { policy, entries })
            })
            .collect()
    }

    fn decide(scope: &str, policies: &[CompiledPolicy<'_>]) -> ScopeDecision {
        // (specificity, deny seen at that specificity, policies at that specificity)
        let mut best: Option<(usize, bool, Vec<PolicyId>)> = None;

        for compiled in policies {
            let Some(rank) = compiled.match_specificity(scope) else {
                continue;
            };
            let is_deny = compiled.policy.rule == PolicyRule::Deny;

            match &mut best {
                Some((top, deny, ids)) if *top == rank => {
                    *deny |= is_deny;
                    ids.push(compiled.policy.id.clone());
                }
                Some((top, deny, ids)) if *top < rank => {
                    *top = rank;
                    *deny = is_deny;
                    *ids = vec![compiled.policy.id.clone()];
                }
                Some(_) => {}
                None => best = Some((rank, is_deny, vec![compiled.policy.id.clone()])),
            }
        }

        match best {
            Some((rank, deny, mut ids)) => {
                ids.sort();
                ScopeDecision {
                    scope: scope.to_string(),
                    permitted: !deny,
                    specificity: Some(rank),
                    deciding_policies: ids,
                }
            }
            None => ScopeDecision {
                scope: scope.to_string(),
                permitted: true,
                specificity: None,
                deciding_policies: Vec::new(),
            },
        }
    }
}

impl std::fmt::Debug for ScopePolicyPdp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopePolicyPdp").finish_non_exhaustive()
    }
}
