//! Scope matchers
//!
//! A matcher decides whether a requested scope is covered by a registered
//! or configured one.

use regex::Regex;

use super::types::{normalize_path, path_contains, ParsedScope, PathScope, ScopeError, ScopeResult};
use crate::config::ScopeMatcherConfig;

/// Compiled scope matcher
#[derive(Debug, Clone)]
pub enum ScopeMatcher {
    /// Literal equality
    String {
        /// Scope that must be requested verbatim
        scope: String,
    },
    /// `prefix:path` with path containment below `base_path`
    Path {
        /// Matcher name, reported as the scope name
        name: String,
        /// Part before the separator
        prefix: String,
        /// Root of the paths this matcher accepts
        base_path: String,
    },
    /// Anchored regular expression
    Regexp {
        /// Matcher name
        name: String,
        /// Compiled pattern
        pattern: Regex,
    },
}

impl ScopeMatcher {
    /// Matcher that accepts exactly `scope`
    pub fn string(scope: impl Into<String>) -> Self {
        Self::String {
            scope: scope.into(),
        }
    }

    /// Compiles a configured matcher
    pub fn from_config(config: &ScopeMatcherConfig) -> ScopeResult<Self> {
        match config {
            ScopeMatcherConfig::String { scope } => {
                if scope.is_empty() {
                    return Err(ScopeError::EmptyScope);
                }
                Ok(Self::string(scope.clone()))
            }
            ScopeMatcherConfig::Path { name, prefix, path } => {
                if prefix.is_empty() {
                    return Err(ScopeError::InvalidMatcher(format!(
                        "path matcher '{}' has an empty prefix",
                        name
                    )));
                }
                let base_path = normalize_path(path).ok_or_else(|| {
                    ScopeError::InvalidMatcher(format!(
                        "path matcher '{}' has a base path not starting with '/': {}",
                        name, path
                    ))
                })?;
                Ok(Self::Path {
                    name: name.clone(),
                    prefix: prefix.clone(),
                    base_path,
                })
            }
            ScopeMatcherConfig::Regexp { name, regexp } => {
                let pattern = Regex::new(&format!("^(?:{})$", regexp)).map_err(|e| {
                    ScopeError::InvalidMatcher(format!("regexp matcher '{}': {}", name, e))
                })?;
                Ok(Self::Regexp {
                    name: name.clone(),
                    pattern,
                })
            }
        }
    }

    /// Matcher name
    pub fn name(&self) -> &str {
        match self {
            Self::String { scope } => scope,
            Self::Path { name, .. } | Self::Regexp { name, .. } => name,
        }
    }

    /// Checks if `scope` is covered by this matcher
    pub fn matches(&self, scope: &str) -> bool {
        match self {
            Self::String { scope: expected } => expected == scope,
            Self::Path {
                prefix, base_path, ..
            } => PathScope::parse_with_name(scope, prefix)
                .map(|parsed| path_contains(parsed.path(), base_path))
                .unwrap_or(false),
            Self::Regexp { pattern, .. } => pattern.is_match(scope),
        }
    }

    /// Interprets `scope` through this matcher
    ///
    /// Path matchers turn a covered scope into [`ParsedScope::Path`] named
    /// after the matcher; everything else stays exact.
    pub fn parse(&self, scope: &str) -> Option<ParsedScope> {
        match self {
            Self::Path {
                prefix, base_path, ..
            } => {
                let parsed = PathScope::parse_with_name(scope, prefix)?;
                if path_contains(parsed.path(), base_path) {
                    Some(ParsedScope::Path(parsed))
                } else {
                    None
                }
            }
            _ if self.matches(scope) => Some(ParsedScope::Exact(scope.to_string())),
            _ => None,
        }
    }

    /// Narrows a configured matcher to a client-registered scope
    ///
    /// A client registered for `storage.read:/data` only gets the subtree
    /// `/data`, even though the configured matcher covers `/`.
    pub fn narrow_to(&self, registered: &str) -> Option<Self> {
        match self {
            Self::Path { name, prefix, .. } => {
                let parsed = self.parse(registered)?.as_path()?.clone();
                Some(Self::Path {
                    name: name.clone(),
                    prefix: prefix.clone(),
                    base_path: parsed.path().to_string(),
                })
            }
            _ if self.matches(registered) => Some(self.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path_matcher(prefix: &str, path: &str) -> ScopeMatcher {
        ScopeMatcher::from_config(&ScopeMatcherConfig::Path {
            name: prefix.to_string(),
            prefix: prefix.to_string(),
            path: path.to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_string_matcher() {
        let matcher = ScopeMatcher::string("openid");
        assert!(matcher.matches("openid"));
        assert!(!matcher.matches("openid2"));
    }

    #[test]
    fn test_path_matcher() {
        let matcher = path_matcher("storage.read", "/");
        assert!(matcher.matches("storage.read:/"));
        assert!(matcher.matches("storage.read:/data/sub"));
        assert!(!matcher.matches("storage.read"));
        assert!(!matcher.matches("storage.readx:/data"));
        assert!(!matcher.matches("storage.write:/data"));
    }

    #[test]
    fn test_path_matcher_base_path() {
        let matcher = path_matcher("storage.read", "/data");
        assert!(matcher.matches("storage.read:/data/x"));
        assert!(!matcher.matches("storage.read:/data2"));
        assert!(!matcher.matches("storage.read:/"));
    }

    #[test]
    fn test_regexp_matcher_is_anchored() {
        let matcher = ScopeMatcher::from_config(&ScopeMatcherConfig::Regexp {
            name: "wlcg.groups".to_string(),
            regexp: r"wlcg\.groups(:/.*)?".to_string(),
        })
        .unwrap();

        assert!(matcher.matches("wlcg.groups"));
        assert!(matcher.matches("wlcg.groups:/cms"));
        assert!(!matcher.matches("xwlcg.groups"));
    }

    #[test]
    fn test_invalid_configs() {
        let empty_prefix = ScopeMatcherConfig::Path {
            name: "bad".to_string(),
            prefix: String::new(),
            path: "/".to_string(),
        };
        assert!(matches!(
            ScopeMatcher::from_config(&empty_prefix),
            Err(ScopeError::InvalidMatcher(_))
        ));

        let bad_regexp = ScopeMatcherConfig::Regexp {
            name: "bad".to_string(),
            regexp: "(".to_string(),
        };
        assert!(ScopeMatcher::from_config(&bad_regexp).is_err());
    }

    #[test]
    fn test_narrow_to_registered_scope() {
        let matcher = path_matcher("storage.read", "/");
        let narrowed = matcher.narrow_to("storage.read:/data").unwrap();

        assert!(narrowed.matches("storage.read:/data/x"));
        assert!(!narrowed.matches("storage.read:/other"));
        assert!(matcher.narrow_to("openid").is_none());
    }
}
