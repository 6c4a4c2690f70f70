//! Error types for the authorization engine and token endpoint

use thiserror::Error;

use crate::scope::ScopeError;

/// Authorization engine errors
///
/// Every variant maps onto an OAuth2 error code through
/// [`AuthzError::oauth_error_code`], so granters can fail with the variant
/// that matches the cause and the endpoint renders the right wire error.
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Missing or malformed request parameter
    #[error("{0}")]
    InvalidRequest(String),

    /// Client authentication failed
    #[error("{0}")]
    InvalidClient(String),

    /// Client is not allowed to use the requested grant type
    #[error("{0}")]
    UnauthorizedClient(String),

    /// Grant type not supported by this server
    #[error("Unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    /// Expired, consumed, unknown or mismatched artifact
    #[error("{0}")]
    InvalidGrant(String),

    /// Requested scope is not acceptable
    #[error("{0}")]
    InvalidScope(String),

    /// Business-rule refusal (token exchange denial)
    #[error("{0}")]
    AccessDenied(String),

    /// Device code not yet approved by the user
    #[error("Authorization pending")]
    AuthorizationPending,

    /// Bearer token missing, malformed or not valid
    #[error("{0}")]
    InvalidToken(String),

    /// Bearer token lacks the scope a route requires
    #[error("{0}")]
    InsufficientScope(String),

    /// A stored scope policy cannot be evaluated
    #[error("Invalid scope policy '{policy_id}': {message}")]
    PolicyConfiguration {
        /// Offending policy
        policy_id: String,
        /// Description naming the malformed entry
        message: String,
    },

    /// Scope parsing error
    #[error("Invalid scope: {0}")]
    Scope(#[from] ScopeError),

    /// Persistence layer error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Token signing error
    #[error("Signing error: {0}")]
    Signing(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthzError {
    /// OAuth2 error code (RFC 6749 §5.2, RFC 8628 §3.5, RFC 6750 §3.1)
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidClient(_) => "invalid_client",
            Self::UnauthorizedClient(_) => "unauthorized_client",
            Self::UnsupportedGrantType(_) => "unsupported_grant_type",
            Self::InvalidGrant(_) => "invalid_grant",
            Self::InvalidScope(_) | Self::PolicyConfiguration { .. } | Self::Scope(_) => {
                "invalid_scope"
            }
            Self::AccessDenied(_) => "access_denied",
            Self::AuthorizationPending => "authorization_pending",
            Self::InvalidToken(_) => "invalid_token",
            Self::InsufficientScope(_) => "insufficient_scope",
            Self::Storage(_)
            | Self::Signing(_)
            | Self::Config(_)
            | Self::Internal(_)
            | Self::Io(_) => "server_error",
        }
    }

    /// HTTP status used when rendering this error
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidClient(_) | Self::InvalidToken(_) => 401,
            Self::AccessDenied(_) | Self::InsufficientScope(_) => 403,
            Self::Storage(_)
            | Self::Signing(_)
            | Self::Config(_)
            | Self::Internal(_)
            | Self::Io(_) => 500,
            _ => 400,
        }
    }

    /// Whether this error is a server-side failure rather than a client error
    pub fn is_server_error(&self) -> bool {
        self.http_status() >= 500
    }

    /// Shorthand for a malformed policy error
    pub fn policy_configuration(policy_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PolicyConfiguration {
            policy_id: policy_id.into(),
            message: message.into(),
        }
    }
}

/// Result type for authorization operations
pub type Result<T> = std::result::Result<T, AuthzError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oauth_error_codes() {
        assert_eq!(AuthzError::InvalidGrant("x".into()).oauth_error_code(), "invalid_grant");
        assert_eq!(AuthzError::AuthorizationPending.oauth_error_code(), "authorization_pending");
        assert_eq!(AuthzError::AccessDenied("x".into()).oauth_error_code(), "access_denied");
        assert_eq!(
            AuthzError::policy_configuration("p1", "bad").oauth_error_code(),
            "invalid_scope"
        );
        assert_eq!(AuthzError::Storage("down".into()).oauth_error_code(), "server_error");
    }

    #[test]
    fn test_http_status() {
        assert_eq!(AuthzError::InvalidClient("x".into()).http_status(), 401);
        assert_eq!(AuthzError::AccessDenied("x".into()).http_status(), 403);
        assert_eq!(AuthzError::InvalidScope("x".into()).http_status(), 400);
        assert!(AuthzError::Internal("x".into()).is_server_error());
    }

    #[test]
    fn test_policy_configuration_message_names_entry() {
        let err = AuthzError::policy_configuration("policy-7", "Malformed path scope 'storage.read/'");
        let message = err.to_string();
        assert!(message.contains("policy-7"));
        assert!(message.contains("storage.read/"));
    }
}
