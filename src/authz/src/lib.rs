//! # IAM Scope Authorization Engine
//!
//! Scope authorization core of an OAuth2/OIDC authorization server.
//!
//! ## Features
//!
//! - **Scope policies** linked to accounts, groups or everyone, with exact
//!   and path-aware matching
//! - **Deny-overrides** among the most specific matching policies, default
//!   permit otherwise
//! - **Token exchange PDP** driven by ranked, configurable policies
//! - **AUP gate** before refresh and token exchange grants
//! - **Four grants**: authorization code, device code, refresh token and
//!   token exchange, all minting through one token service
//! - **Async-first design** using Tokio runtime
//!
//! ## Example
//!
//! ```rust
//! use iam_authz::{Account, AuthorizationServer, AuthzConfig, ScopePolicy, ScopeSet};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = AuthorizationServer::in_memory(AuthzConfig::default())?;
//!
//!     server
//!         .policies()
//!         .save(ScopePolicy::deny("no-scim-write").with_scopes(["scim:write"]))
//!         .await?;
//!
//!     let requested: ScopeSet = ["openid", "scim:write"].iter().map(|s| s.to_string()).collect();
//!     let allowed = server
//!         .scope_pdp()
//!         .filter_scopes(&requested, &Account::new("a-1", "alice"))
//!         .await?;
//!
//!     assert!(allowed.contains("openid"));
//!     assert!(!allowed.contains("scim:write"));
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod audit;
pub mod aup;
pub mod clock;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod grant;
pub mod guard;
pub mod http;
pub mod pdp;
pub mod policy;
pub mod scope;
pub mod store;
pub mod token;
pub mod types;

// Re-export commonly used types
pub use app::{AuthorizationServer, AuthorizationServerBuilder};
pub use config::AuthzConfig;
pub use error::{AuthzError, Result};
pub use pdp::{ExchangeDecision, ScopePolicyPdp, TokenExchangePdp, TokenExchangePolicy};
pub use policy::{MatchingPolicy, PolicyRule, ScopePolicy, ScopePolicyStore};
pub use scope::{ScopeError, ScopeMatcherRegistry};
pub use token::{TokenResponse, TokenService};
pub use types::{Account, Client, GrantType, ScopeSet};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
