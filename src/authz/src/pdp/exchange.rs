//! Token exchange PDP
//!
//! Decides whether an actor client may exchange a token issued to a
//! subject client, and for which scopes. The rule set is deployment
//! configuration: ranked policies matched on origin (subject client) and
//! destination (actor client), each with optional per-scope rules.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::config::ScopeMatcherConfig;
use crate::error::{AuthzError, Result};
use crate::policy::PolicyRule;
use crate::scope::{ScopeMatcher, ScopeMatcherRegistry};
use crate::types::{Client, PolicyId, ScopeSet, OFFLINE_ACCESS};

/// Selects clients by identity or registered scope
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMatcher {
    /// Every client
    #[default]
    Any,
    /// One client
    ClientId { id: String },
    /// Clients registered for a scope
    Scope { scope: String },
}

impl ClientMatcher {
    pub fn matches(&self, client: &Client) -> bool {
        match self {
            Self::Any => true,
            Self::ClientId { id } => *id == client.client_id,
            Self::Scope { scope } => client.scopes.contains(scope),
        }
    }
}

/// Per-scope rule inside an exchange policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeScopePolicy {
    pub rule: PolicyRule,
    pub matcher: ScopeMatcherConfig,
}

/// Deployment-defined token exchange policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenExchangePolicy {
    pub id: PolicyId,

    #[serde(default)]
    pub description: String,

    /// Only the highest-ranked applicable policies are considered
    #[serde(default)]
    pub rank: i32,

    pub rule: PolicyRule,

    /// Matches the client the subject token was issued to
    #[serde(default)]
    pub origin: ClientMatcher,

    /// Matches the client requesting the exchange
    #[serde(default)]
    pub destination: ClientMatcher,

    /// Evaluated in declaration order; the first match decides
    #[serde(default)]
    pub scope_policies: Vec<ExchangeScopePolicy>,
}

impl TokenExchangePolicy {
    pub fn new(id: impl Into<String>, rule: PolicyRule) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            rank: 0,
            rule,
            origin: ClientMatcher::Any,
            destination: ClientMatcher::Any,
            scope_policies: Vec::new(),
        }
    }

    pub fn with_rank(mut self, rank: i32) -> Self {
        self.rank = rank;
        self
    }

    pub fn with_origin(mut self, origin: ClientMatcher) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_destination(mut self, destination: ClientMatcher) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_scope_policy(mut self, rule: PolicyRule, matcher: ScopeMatcherConfig) -> Self {
        self.scope_policies.push(ExchangeScopePolicy { rule, matcher });
        self
    }

    fn applies_to(&self, subject_client: &Client, actor_client: &Client) -> bool {
        self.origin.matches(subject_client) && self.destination.matches(actor_client)
    }
}

/// Outcome of a token exchange evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeDecision {
    /// Exchange allowed for these scopes
    Permit { scopes: ScopeSet },
    /// Exchange refused as a whole
    Deny { message: String },
    /// One requested scope cannot be exchanged
    InvalidScope { message: String, scope: String },
}

impl ExchangeDecision {
    fn deny(message: impl Into<String>) -> Self {
        Self::Deny {
            message: message.into(),
        }
    }

    fn invalid_scope(scope: &str, message: impl Into<String>) -> Self {
        Self::InvalidScope {
            message: message.into(),
            scope: scope.to_string(),
        }
    }

    pub fn is_permit(&self) -> bool {
        matches!(self, Self::Permit { .. })
    }

    /// Granted scopes on permit, otherwise the matching OAuth2 error
    pub fn into_result(self) -> Result<ScopeSet> {
        match self {
            Self::Permit { scopes } => Ok(scopes),
            Self::Deny { message } => Err(AuthzError::AccessDenied(message)),
            Self::InvalidScope { message, scope } => {
                Err(AuthzError::InvalidScope(format!("{}: {}", message, scope)))
            }
        }
    }
}

struct CompiledExchangePolicy {
    policy: TokenExchangePolicy,
    scope_rules: Vec<(PolicyRule, ScopeMatcher)>,
}

/// Evaluates token exchange requests against configured policies
pub struct TokenExchangePdp {
    policies: Vec<CompiledExchangePolicy>,
    registry: Arc<ScopeMatcherRegistry>,
}

impl TokenExchangePdp {
    /// Compiles the configured policies
    pub fn new(policies: &[TokenExchangePolicy], registry: Arc<ScopeMatcherRegistry>) -> Result<Self> {
        let policies = policies
            .iter()
            .map(|policy| {
                let scope_rules = policy
                    .scope_policies
                    .iter()
                    .map(|sp| {
                        ScopeMatcher::from_config(&sp.matcher)
                            .map(|matcher| (sp.rule, matcher))
                            .map_err(|e| {
                                AuthzError::Config(format!(
                                    "token exchange policy '{}': {}",
                                    policy.id, e
                                ))
                            })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(CompiledExchangePolicy {
                    policy: policy.clone(),
                    scope_rules,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { policies, registry })
    }

    /// Number of configured policies
    pub fn policy_count(&self) -> usize {
        self.policies.len()
    }

    /// Evaluates an exchange of a token issued to `subject_client`, requested
    /// by `actor_client`
    ///
    /// Empty `requested` scopes default to `subject_scopes`.
    pub fn evaluate(
        &self,
        requested: &ScopeSet,
        subject_scopes: &ScopeSet,
        subject_client: &Client,
        actor_client: &Client,
    ) -> ExchangeDecision {
        let effective = if requested.is_empty() {
            subject_scopes.clone()
        } else {
            requested.clone()
        };

        if subject_client.client_id == actor_client.client_id && effective.contains(OFFLINE_ACCESS) {
            debug!(client_id = %actor_client.client_id, "Self-exchange requesting offline_access");
            return ExchangeDecision::deny(
                "Token exchange not allowed: a client cannot exchange its own token for offline_access",
            );
        }

        let applicable: Vec<&CompiledExchangePolicy> = self
            .policies
            .iter()
            .filter(|c| c.policy.applies_to(subject_client, actor_client))
            .collect();

        let Some(top_rank) = applicable.iter().map(|c| c.policy.rank).max() else {
            return ExchangeDecision::deny("No applicable policies found");
        };
        let winners: Vec<&CompiledExchangePolicy> = applicable
            .into_iter()
            .filter(|c| c.policy.rank == top_rank)
            .collect();

        if winners.iter().any(|c| c.policy.rule == PolicyRule::Deny) {
            return ExchangeDecision::deny("Token exchange not allowed by policy");
        }

        for scope in &effective {
            if !self.registry.client_allows(actor_client, scope) {
                return ExchangeDecision::invalid_scope(scope, "scope not allowed for client");
            }

            let rule = winners
                .iter()
                .flat_map(|c| c.scope_rules.iter())
                .find(|(_, matcher)| matcher.matches(scope))
                .map(|(rule, _)| *rule);

            if rule == Some(PolicyRule::Deny) {
                return ExchangeDecision::invalid_scope(scope, "scope exchange not allowed by policy");
            }
        }

        ExchangeDecision::Permit { scopes: effective }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GrantType;

    fn scopes(items: &[&str]) -> ScopeSet {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn client(id: &str, registered: &[&str]) -> Client {
        Client::new(id)
            .with_scopes(registered.iter().copied())
            .with_grant_type(GrantType::TokenExchange)
    }

    fn pdp(policies: &[TokenExchangePolicy]) -> TokenExchangePdp {
        TokenExchangePdp::new(policies, Arc::new(ScopeMatcherRegistry::empty())).unwrap()
    }

    #[test]
    fn test_no_policies_denies() {
        let decision = pdp(&[]).evaluate(
            &scopes(&["openid"]),
            &ScopeSet::new(),
            &client("subject", &["openid"]),
            &client("actor", &["openid"]),
        );
        assert_eq!(decision, ExchangeDecision::deny("No applicable policies found"));
    }

    #[test]
    fn test_empty_request_defaults_to_subject_scopes() {
        let decision = pdp(&[TokenExchangePolicy::new("all", PolicyRule::Permit)]).evaluate(
            &ScopeSet::new(),
            &scopes(&["openid", "profile"]),
            &client("subject", &[]),
            &client("actor", &["openid", "profile"]),
        );
        assert_eq!(
            decision,
            ExchangeDecision::Permit {
                scopes: scopes(&["openid", "profile"])
            }
        );
    }

    #[test]
    fn test_higher_rank_wins() {
        let policies = vec![
            TokenExchangePolicy::new("allow-all", PolicyRule::Permit),
            TokenExchangePolicy::new("deny-actor", PolicyRule::Deny)
                .with_rank(10)
                .with_destination(ClientMatcher::ClientId {
                    id: "actor".to_string(),
                }),
        ];

        let decision = pdp(&policies).evaluate(
            &scopes(&["openid"]),
            &ScopeSet::new(),
            &client("subject", &[]),
            &client("actor", &["openid"]),
        );
        assert!(matches!(decision, ExchangeDecision::Deny { .. }));

        let other = pdp(&policies).evaluate(
            &scopes(&["openid"]),
            &ScopeSet::new(),
            &client("subject", &[]),
            &client("other", &["openid"]),
        );
        assert!(other.is_permit());
    }

    #[test]
    fn test_scope_not_registered_for_actor() {
        let decision = pdp(&[TokenExchangePolicy::new("all", PolicyRule::Permit)]).evaluate(
            &scopes(&["openid", "scim:write"]),
            &ScopeSet::new(),
            &client("subject", &[]),
            &client("actor", &["openid"]),
        );
        assert_eq!(
            decision,
            ExchangeDecision::invalid_scope("scim:write", "scope not allowed for client")
        );
    }

    #[test]
    fn test_scope_policy_denies_single_scope() {
        let policy = TokenExchangePolicy::new("all", PolicyRule::Permit).with_scope_policy(
            PolicyRule::Deny,
            ScopeMatcherConfig::String {
                scope: "profile".to_string(),
            },
        );

        let err = pdp(&[policy])
            .evaluate(
                &scopes(&["openid", "profile"]),
                &ScopeSet::new(),
                &client("subject", &[]),
                &client("actor", &["openid", "profile"]),
            )
            .into_result()
            .unwrap_err();

        assert_eq!(err.oauth_error_code(), "invalid_scope");
        assert!(err.to_string().contains("profile"));
    }

    #[test]
    fn test_self_exchange_with_offline_access_is_denied() {
        let same = client("app", &["openid", OFFLINE_ACCESS]);
        let err = pdp(&[TokenExchangePolicy::new("all", PolicyRule::Permit)])
            .evaluate(&scopes(&["openid", OFFLINE_ACCESS]), &ScopeSet::new(), &same, &same)
            .into_result()
            .unwrap_err();

        assert_eq!(err.oauth_error_code(), "access_denied");
    }

    #[test]
    fn test_client_matcher_by_scope() {
        let matcher = ClientMatcher::Scope {
            scope: "token-exchange".to_string(),
        };
        assert!(matcher.matches(&client("a", &["token-exchange"])));
        assert!(!matcher.matches(&client("b", &["openid"])));
    }
}
