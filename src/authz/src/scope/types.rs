//! Scope type definitions and path semantics
//!
//! Scope strings are either plain tokens compared by equality (`openid`,
//! `scim:read`) or path-shaped tokens `name:path` (`storage.read:/data`)
//! compared by `/`-delimited path containment.

use std::fmt;

/// Result type for scope operations
pub type ScopeResult<T> = Result<T, ScopeError>;

/// Separator between the name and the path of a path-shaped scope
pub const NAME_PATH_SEPARATOR: char = ':';

/// Errors that can occur during scope operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeError {
    /// Empty scope string provided
    EmptyScope,
    /// Entry of a PATH policy that lacks the `name:path` shape
    MalformedPathScope(String),
    /// Scope matcher configuration cannot be used
    InvalidMatcher(String),
}

impl fmt::Display for ScopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyScope => write!(f, "Scope cannot be empty"),
            Self::MalformedPathScope(raw) => {
                write!(f, "Malformed path scope '{}': expected '<name>:/<path>'", raw)
            }
            Self::InvalidMatcher(msg) => write!(f, "Invalid scope matcher: {}", msg),
        }
    }
}

impl std::error::Error for ScopeError {}

/// A path-shaped scope, `name:path`
///
/// The path is kept normalized: empty and `.` segments are dropped, `..`
/// pops a segment (never above the root), and there is no trailing slash
/// except for the root itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathScope {
    /// Original scope string
    raw: String,
    /// Part before the separator (e.g. `storage.read`)
    name: String,
    /// Normalized path (e.g. `/data/sub`)
    path: String,
}

impl PathScope {
    /// Parses `raw` as `name:path`
    ///
    /// Returns `None` when there is no separator, the name is empty or
    /// contains whitespace, or the path does not start with `/`.
    pub fn parse(raw: &str) -> Option<Self> {
        let (name, path) = raw.split_once(NAME_PATH_SEPARATOR)?;
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return None;
        }
        let path = normalize_path(path)?;

        Some(Self {
            raw: raw.to_string(),
            name: name.to_string(),
            path,
        })
    }

    /// Parses `raw` as a path scope with a known name prefix
    pub fn parse_with_name(raw: &str, name: &str) -> Option<Self> {
        let rest = raw.strip_prefix(name)?.strip_prefix(NAME_PATH_SEPARATOR)?;
        let path = normalize_path(rest)?;

        Some(Self {
            raw: raw.to_string(),
            name: name.to_string(),
            path,
        })
    }

    /// Returns the raw scope string
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns the scope name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the normalized path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether this scope's path lies at or below `other`'s path, with the
    /// same name
    pub fn is_within(&self, other: &PathScope) -> bool {
        self.name == other.name && path_contains(&self.path, &other.path)
    }
}

impl fmt::Display for PathScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Result of interpreting a scope string
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParsedScope {
    /// Compared by literal equality
    Exact(String),
    /// Compared by path containment
    Path(PathScope),
}

impl ParsedScope {
    /// Returns the raw scope string
    pub fn as_str(&self) -> &str {
        match self {
            Self::Exact(raw) => raw,
            Self::Path(path) => path.as_str(),
        }
    }

    /// Returns the path form, if any
    pub fn as_path(&self) -> Option<&PathScope> {
        match self {
            Self::Exact(_) => None,
            Self::Path(path) => Some(path),
        }
    }
}

/// Normalizes a `/`-rooted path, or `None` when it is not rooted
pub fn normalize_path(path: &str) -> Option<String> {
    if !path.starts_with('/') {
        return None;
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    Some(format!("/{}", segments.join("/")))
}

/// Whether `candidate` equals `ancestor` or is one of its descendants
///
/// Comparison is segment by segment, so `/data2` is not inside `/data`.
/// Both paths are expected in normalized form.
pub fn path_contains(candidate: &str, ancestor: &str) -> bool {
    let mut candidate_segments = candidate.split('/').filter(|s| !s.is_empty());
    for ancestor_segment in ancestor.split('/').filter(|s| !s.is_empty()) {
        match candidate_segments.next() {
            Some(segment) if segment == ancestor_segment => {}
            _ => return false,
        }
    }
    true
}

/// Rank of a PATH policy entry; longer paths are more specific
///
/// Exact matches rank 0; the root path `/` ranks 1.
pub fn specificity(path: &str) -> usize {
    path.len()
}
