//! HTTP surface
//!
//! - `POST /token` - OAuth2 token endpoint (form-encoded)
//! - `GET /health` - Health check
//! - `GET /scope-policies` - Stored scope policies, requires `iam:admin.read`

use axum::{
    extract::{Form, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::app::AuthorizationServer;
use crate::endpoint::ClientCredentials;
use crate::error::AuthzError;
use crate::guard::{authenticate_bearer, require_scope};
use crate::policy::ScopePolicy;
use crate::token::TokenResponse;

/// Scope required to read scope policies
pub const ADMIN_READ_SCOPE: &str = "iam:admin.read";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub server: Arc<AuthorizationServer>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(server: Arc<AuthorizationServer>) -> Self {
        Self {
            server,
            start_time: Instant::now(),
        }
    }
}

/// OAuth2 error body (RFC 6749 §5.2)
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: &'static str,
    error_description: String,
}

/// Error rendered as an OAuth2 error response
#[derive(Debug)]
pub struct ApiError(pub AuthzError);

impl From<AuthzError> for ApiError {
    fn from(err: AuthzError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let code = self.0.oauth_error_code();
        let description = if self.0.is_server_error() {
            "Internal server error".to_string()
        } else {
            self.0.to_string()
        };

        let mut response = (
            status,
            Json(ErrorResponse {
                error: code,
                error_description: description,
            }),
        )
            .into_response();

        let challenge = match &self.0 {
            AuthzError::InvalidClient(_) => Some("Basic realm=\"token\"".to_string()),
            AuthzError::InvalidToken(_) | AuthzError::InsufficientScope(_) => {
                Some(format!("Bearer error=\"{}\"", code))
            }
            _ => None,
        };
        if let Some(value) = challenge.and_then(|c| HeaderValue::from_str(&c).ok()) {
            response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
        }
        response
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    uptime_seconds: u64,
    version: String,
}

/// Client credentials from an HTTP Basic `Authorization` header
pub fn basic_credentials(headers: &HeaderMap) -> Option<ClientCredentials> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (client_id, client_secret) = decoded.split_once(':')?;

    Some(ClientCredentials {
        client_id: client_id.to_string(),
        client_secret: Some(client_secret.to_string()),
    })
}

/// POST /token
async fn token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<BTreeMap<String, String>>,
) -> Result<Response, ApiError> {
    let response: TokenResponse = state
        .server
        .endpoint()
        .handle(form, basic_credentials(&headers))
        .await?;

    Ok((
        [
            (header::CACHE_CONTROL, "no-store"),
            (header::PRAGMA, "no-cache"),
        ],
        Json(response),
    )
        .into_response())
}

/// GET /health
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        version: crate::VERSION.to_string(),
    })
}

/// GET /scope-policies
async fn list_scope_policies(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ScopePolicy>>, ApiError> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let subject = authenticate_bearer(authorization, state.server.jwt().as_ref())?;
    require_scope(&subject, ADMIN_READ_SCOPE)?;

    Ok(Json(state.server.policies().list().await?))
}

/// Create the HTTP router with all endpoints
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace = TraceLayer::new_for_http().on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/token", post(token))
        .route("/health", get(health_check))
        .route("/scope-policies", get(list_scope_policies))
        .layer(ServiceBuilder::new().layer(trace).layer(cors))
        .with_state(state)
}
