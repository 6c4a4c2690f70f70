//! Scope interpretation and matching
//!
//! This module parses scope strings into exact or path-shaped scopes,
//! provides the `/`-segment containment used by PATH policies, and the
//! per-client matcher registry.
//!
//! # Examples
//!
//! ```
//! use iam_authz::scope::{path_contains, PathScope};
//!
//! let scope = PathScope::parse("storage.read:/data/sub").unwrap();
//! assert_eq!(scope.name(), "storage.read");
//! assert!(path_contains(scope.path(), "/data"));
//! assert!(!path_contains("/data2", "/data"));
//! ```

mod types;
mod matcher;
mod registry;


pub use types::{
    normalize_path, path_contains, specificity, ParsedScope, PathScope, ScopeError, ScopeResult,
    NAME_PATH_SEPARATOR,
};
pub use matcher::ScopeMatcher;
pub use registry::{CacheStats, ScopeMatcherRegistry};
