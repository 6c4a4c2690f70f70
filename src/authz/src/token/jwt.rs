//! JWT signing and validation

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::error::{AuthzError, Result};
use crate::types::{parse_scope_param, ScopeSet};

/// Claims of access tokens minted by this server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub iss: String,
    pub sub: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aud: Vec<String>,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    /// Space-delimited granted scopes
    #[serde(default)]
    pub scope: String,
    pub client_id: String,
    /// Delegation chain (RFC 8693 §4.1); never set by this server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub act: Option<serde_json::Value>,
}

impl TokenClaims {
    /// Granted scopes as a set
    pub fn scopes(&self) -> ScopeSet {
        parse_scope_param(Some(&self.scope))
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scope.split_whitespace().any(|s| s == scope)
    }

    /// Whether the token was issued to a client acting on its own behalf
    pub fn is_client_subject(&self) -> bool {
        self.sub == self.client_id
    }
}

/// Signs and validates bearer tokens
pub trait JwtService: Send + Sync {
    fn sign(&self, claims: &TokenClaims) -> Result<String>;

    /// Checks signature, expiry and issuer, and returns the claims
    fn validate(&self, token: &str) -> Result<TokenClaims>;
}

/// HS256 JWT service with a shared secret
///
/// Expiry is checked against the service clock rather than the wall clock,
/// so tokens minted under an injected clock validate under the same one.
pub struct HmacJwtService {
    issuer: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    clock: Arc<dyn Clock>,
}

impl HmacJwtService {
    pub fn new(issuer: impl Into<String>, secret: &[u8]) -> Self {
        Self {
            issuer: issuer.into(),
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }
}

impl JwtService for HmacJwtService {
    fn sign(&self, claims: &TokenClaims) -> Result<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| AuthzError::Signing(e.to_string()))
    }

    fn validate(&self, token: &str) -> Result<TokenClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        // Audience is checked by resource servers, not here
        validation.validate_aud = false;
        validation.validate_exp = false;

        let claims = decode::<TokenClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| AuthzError::InvalidToken(format!("Invalid token: {}", e)))?;

        if claims.exp <= self.clock.now().timestamp() {
            return Err(AuthzError::InvalidToken("Invalid token: ExpiredSignature".to_string()));
        }
        Ok(claims)
    }
}
