//! Scope matcher registry with per-client caching
//!
//! Resolves the matchers that apply to a client's registered scopes and
//! caches them per client. Entries are evicted explicitly when a client is
//! updated; there is no time-based expiry.

use std::sync::Arc;
use dashmap::DashMap;
use tracing::debug;

use super::matcher::ScopeMatcher;
use super::types::{ParsedScope, PathScope, ScopeError, ScopeResult};
use crate::config::ScopeMatcherConfig;
use crate::policy::MatchingPolicy;
use crate::store::ClientUpdateListener;
use crate::types::{Client, ClientId, ScopeSet};

/// Statistics about cache performance
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: usize,
    /// Number of cache misses
    pub misses: usize,
    /// Entries rebuilt because the client's scopes changed under them
    pub stale: usize,
    /// Number of explicit evictions
    pub evictions: usize,
    /// Total number of entries in cache
    pub entries: usize,
}

impl CacheStats {
    /// Calculates the cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Cached matchers along with the scope set they were built from
#[derive(Debug, Clone)]
struct CachedMatchers {
    scopes: ScopeSet,
    matchers: Arc<Vec<ScopeMatcher>>,
}

/// Interprets scope strings and resolves client scope matchers
///
/// # Examples
///
/// ```
/// use iam_authz::config::ScopeMatcherConfig;
/// use iam_authz::scope::{ParsedScope, ScopeMatcherRegistry};
///
/// let registry = ScopeMatcherRegistry::new(&[ScopeMatcherConfig::Path {
///     name: "storage.read".to_string(),
///     prefix: "storage.read".to_string(),
///     path: "/".to_string(),
/// }])
/// .unwrap();
///
/// assert!(matches!(registry.parse("storage.read:/data"), ParsedScope::Path(_)));
/// assert!(matches!(registry.parse("openid"), ParsedScope::Exact(_)));
/// ```
pub struct ScopeMatcherRegistry {
    /// Deployment-configured matchers, in declaration order
    matchers: Vec<ScopeMatcher>,
    /// Matchers per client
    client_cache: DashMap<ClientId, CachedMatchers>,
    /// Cache statistics
    stats: DashMap<&'static str, usize>,
}

impl ScopeMatcherRegistry {
    /// Creates a registry from the deployment's matcher configuration
    pub fn new(configs: &[ScopeMatcherConfig]) -> ScopeResult<Self> {
        let matchers = configs
            .iter()
            .map(ScopeMatcher::from_config)
            .collect::<ScopeResult<Vec<_>>>()?;

        Ok(Self {
            matchers,
            client_cache: DashMap::new(),
            stats: DashMap::new(),
        })
    }

    /// Registry without custom matchers; every scope is exact
    pub fn empty() -> Self {
        Self {
            matchers: Vec::new(),
            client_cache: DashMap::new(),
            stats: DashMap::new(),
        }
    }

    /// Configured matchers
    pub fn matchers(&self) -> &[ScopeMatcher] {
        &self.matchers
    }

    /// Interprets a scope string
    ///
    /// The scope is PATH only if a configured path matcher recognizes it.
    pub fn parse(&self, scope: &str) -> ParsedScope {
        self.matchers
            .iter()
            .filter(|m| matches!(m, ScopeMatcher::Path { .. }))
            .find_map(|m| m.parse(scope))
            .unwrap_or_else(|| ParsedScope::Exact(scope.to_string()))
    }

    /// Validates a scope entry of a stored policy
    ///
    /// Under PATH matching the entry itself must have the `name:path`
    /// shape; anything else is a configuration error.
    pub fn validate(&self, policy_scope: &str, matching: MatchingPolicy) -> ScopeResult<ParsedScope> {
        if policy_scope.is_empty() {
            return Err(ScopeError::EmptyScope);
        }

        match matching {
            MatchingPolicy::Exact => Ok(ParsedScope::Exact(policy_scope.to_string())),
            MatchingPolicy::Path => PathScope::parse(policy_scope)
                .map(ParsedScope::Path)
                .ok_or_else(|| ScopeError::MalformedPathScope(policy_scope.to_string())),
        }
    }

    /// Finds the matcher that governs a client-registered scope
    pub fn find_matcher_for_scope(&self, scope: &str) -> ScopeMatcher {
        self.matchers
            .iter()
            .find_map(|m| m.narrow_to(scope))
            .unwrap_or_else(|| ScopeMatcher::string(scope))
    }

    /// Resolves (and caches) the matchers for a client's registered scopes
    pub fn matchers_for_client(&self, client: &Client) -> Arc<Vec<ScopeMatcher>> {
        if let Some(entry) = self.client_cache.get(&client.client_id) {
            if entry.scopes == client.scopes {
                self.increment_stat("hits");
                return Arc::clone(&entry.matchers);
            }
            self.increment_stat("stale");
        } else {
            self.increment_stat("misses");
        }

        let matchers: Arc<Vec<ScopeMatcher>> = Arc::new(
            client
                .scopes
                .iter()
                .map(|scope| self.find_matcher_for_scope(scope))
                .collect(),
        );

        self.client_cache.insert(
            client.client_id.clone(),
            CachedMatchers {
                scopes: client.scopes.clone(),
                matchers: Arc::clone(&matchers),
            },
        );

        debug!(client_id = %client.client_id, matchers = matchers.len(), "Resolved client scope matchers");
        matchers
    }

    /// Whether `scope` is covered by one of the client's registered scopes
    pub fn client_allows(&self, client: &Client, scope: &str) -> bool {
        self.matchers_for_client(client)
            .iter()
            .any(|matcher| matcher.matches(scope))
    }

    /// Drops the cached matchers of one client
    pub fn evict(&self, client_id: &str) {
        if self.client_cache.remove(client_id).is_some() {
            self.increment_stat("evictions");
            debug!(client_id, "Evicted client scope matchers");
        }
    }

    /// Drops every cached entry
    pub fn clear(&self) {
        self.client_cache.clear();
        self.stats.clear();
    }

    /// Returns cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.get_stat("hits"),
            misses: self.get_stat("misses"),
            stale: self.get_stat("stale"),
            evictions: self.get_stat("evictions"),
            entries: self.client_cache.len(),
        }
    }

    fn increment_stat(&self, key: &'static str) {
        self.stats
            .entry(key)
            .and_modify(|count| *count += 1)
            .or_insert(1);
    }

    fn get_stat(&self, key: &'static str) -> usize {
        self.stats.get(key).map(|v| *v).unwrap_or(0)
    }
}

impl Default for ScopeMatcherRegistry {
    fn default() -> Self {
        Self::empty()
    }
}

impl ClientUpdateListener for ScopeMatcherRegistry {
    fn client_updated(&self, client_id: &str) {
        self.evict(client_id);
    }
}
