//! Policy decision points
//!
//! [`ScopePolicyPdp`] narrows the scopes requested for an account;
//! [`TokenExchangePdp`] decides whether one client may exchange another
//! client's token.

pub mod exchange;
pub mod scope_policy;

pub use exchange::{
    ClientMatcher, ExchangeDecision, ExchangeScopePolicy, TokenExchangePdp, TokenExchangePolicy,
};
pub use scope_policy::{ScopeDecision, ScopePolicyPdp};
