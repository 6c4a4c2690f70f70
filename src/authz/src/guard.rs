//! Route guards
//!
//! Handlers call these explicitly before doing any work: first
//! [`authenticate_bearer`] to turn the `Authorization` header into a
//! [`Subject`], then [`require_scope`] for the capability the route needs.

use crate::error::{AuthzError, Result};
use crate::token::{JwtService, TokenClaims};
use crate::types::ScopeSet;

/// Authenticated caller of a protected route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub subject: String,
    pub client_id: String,
    pub scopes: ScopeSet,
}

impl From<TokenClaims> for Subject {
    fn from(claims: TokenClaims) -> Self {
        Self {
            scopes: claims.scopes(),
            subject: claims.sub,
            client_id: claims.client_id,
        }
    }
}

/// Validates a `Bearer` authorization header
pub fn authenticate_bearer(header: Option<&str>, jwt: &dyn JwtService) -> Result<Subject> {
    let token = header
        .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AuthzError::InvalidToken("Missing bearer token".to_string()))?;

    jwt.validate(token).map(Subject::from)
}

/// Fails with `insufficient_scope` unless the subject holds `scope`
pub fn require_scope(subject: &Subject, scope: &str) -> Result<()> {
    if subject.scopes.contains(scope) {
        Ok(())
    } else {
        Err(AuthzError::InsufficientScope(format!("Required scope: {}", scope)))
    }
}
