//! Grant integration tests
//!
//! Authorization code, device code and refresh grants end to end, plus the
//! cross-cutting checks every grant shares: AUP gating, last-used tracking
//! and scope matcher cache eviction.

mod common;

use chrono::{Duration, NaiveDate};
use common::{
    scopes, test_account, test_config, Harness, REDIRECT_URI, SERVICE, SERVICE_SECRET, WEB_APP,
    WEB_SECRET,
};
use iam_authz::audit::AuditEventKind;
use iam_authz::clock::Clock;
use iam_authz::store::{AuthorizationCodeStore, ClientRepository, DeviceCodeStore};
use iam_authz::types::TOKEN_TYPE_ACCESS_TOKEN;
use iam_authz::{ScopePolicy, ScopePolicyStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Barrier;

const DEVICE_CODE: &str = "urn:ietf:params:oauth:grant-type:device_code";

// ============================================================================
// Authorization code
// ============================================================================

#[tokio::test]
async fn test_code_redemption_issues_tokens_and_audit_events() {
    let harness = Harness::new().await;
    harness.issue_code("code-1", &["openid", "offline_access"]).await;

    let response = harness.redeem_code("code-1").await.unwrap();

    assert_eq!(response.token_type, "Bearer");
    assert_eq!(response.scope, "offline_access openid");
    assert!(response.refresh_token.is_some());

    let events = harness.audit.query_by_client(WEB_APP, 10).await;
    assert_eq!(events.len(), 2);
    assert!(events.iter().any(|e| e.kind == AuditEventKind::AccessTokenIssued));
    assert!(events.iter().any(|e| e.kind == AuditEventKind::RefreshTokenIssued));
    assert!(events.iter().all(|e| e.account_id.as_deref() == Some("acct-test")));
}

#[tokio::test]
async fn test_code_cannot_be_redeemed_twice() {
    let harness = Harness::new().await;
    harness.issue_code("code-1", &["openid"]).await;

    harness.redeem_code("code-1").await.unwrap();
    let err = harness.redeem_code("code-1").await.unwrap_err();

    assert_eq!(err.oauth_error_code(), "invalid_grant");
    assert_eq!(harness.access_token_count().await, 1);
}

#[tokio::test]
async fn test_code_redirect_and_client_must_match() {
    let harness = Harness::new().await;
    harness.issue_code("code-1", &["openid"]).await;

    let wrong_redirect = harness
        .token(
            WEB_APP,
            WEB_SECRET,
            &[
                ("grant_type", "authorization_code"),
                ("code", "code-1"),
                ("redirect_uri", "https://evil.example/cb"),
            ],
        )
        .await
        .unwrap_err();
    assert_eq!(wrong_redirect.oauth_error_code(), "invalid_grant");

    let wrong_client = harness
        .token(
            SERVICE,
            SERVICE_SECRET,
            &[
                ("grant_type", "authorization_code"),
                ("code", "code-1"),
                ("redirect_uri", REDIRECT_URI),
            ],
        )
        .await
        .unwrap_err();
    assert_eq!(wrong_client.oauth_error_code(), "invalid_grant");

    // Failed attempts leave the code redeemable by its owner
    assert!(harness.redeem_code("code-1").await.is_ok());
}

#[tokio::test]
async fn test_expired_code_is_purged() {
    let harness = Harness::new().await;
    harness.issue_code("code-1", &["openid"]).await;
    harness.clock.advance(Duration::minutes(6));

    let err = harness.redeem_code("code-1").await.unwrap_err();

    assert_eq!(err.oauth_error_code(), "invalid_grant");
    assert!(harness.codes.find("code-1").await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_redemption_has_single_winner() {
    let harness = Arc::new(Harness::new().await);
    harness.issue_code("contested", &["openid"]).await;

    let tasks = 8;
    let barrier = Arc::new(Barrier::new(tasks));
    let mut handles = Vec::new();
    for _ in 0..tasks {
        let harness = harness.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            harness.redeem_code("contested").await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(e) => assert_eq!(e.oauth_error_code(), "invalid_grant"),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(harness.access_token_count().await, 1);
}

#[tokio::test]
async fn test_resource_must_be_reasserted_at_token_endpoint() {
    let harness = Harness::new().await;
    let params: BTreeMap<String, String> =
        [("resource".to_string(), "https://storage.example".to_string())].into();
    harness
        .issue_code_with("dropped", &["openid"], Some(REDIRECT_URI), params.clone())
        .await;
    harness
        .issue_code_with("kept", &["openid"], Some(REDIRECT_URI), params)
        .await;

    let dropped = harness.redeem_code("dropped").await.unwrap();
    let kept = harness
        .token(
            WEB_APP,
            WEB_SECRET,
            &[
                ("grant_type", "authorization_code"),
                ("code", "kept"),
                ("redirect_uri", REDIRECT_URI),
                ("resource", "https://storage.example"),
            ],
        )
        .await
        .unwrap();

    let service = harness.server.token_service();
    assert!(service.validate_access_token(&dropped.access_token).unwrap().aud.is_empty());
    assert_eq!(
        service.validate_access_token(&kept.access_token).unwrap().aud,
        vec!["https://storage.example".to_string()]
    );
}

// ============================================================================
// Device code
// ============================================================================

#[tokio::test]
async fn test_device_flow() {
    let harness = Harness::new().await;
    let client = harness.client(WEB_APP).await;
    let device = harness
        .server
        .device_authorization()
        .start(&client, scopes(&["openid", "profile", "scim:write"]))
        .await
        .unwrap();
    let poll = [("grant_type", DEVICE_CODE), ("device_code", device.device_code.as_str())];

    let pending = harness.token(WEB_APP, WEB_SECRET, &poll).await.unwrap_err();
    assert_eq!(pending.oauth_error_code(), "authorization_pending");

    // The user approves less than was requested, plus something that was not
    harness
        .server
        .device_authorization()
        .approve(&device.user_code, &test_account(), &scopes(&["openid", "profile", "offline_access"]))
        .await
        .unwrap();

    let response = harness.token(WEB_APP, WEB_SECRET, &poll).await.unwrap();
    assert_eq!(response.scope, "openid profile");

    let reused = harness.token(WEB_APP, WEB_SECRET, &poll).await.unwrap_err();
    assert_eq!(reused.oauth_error_code(), "invalid_grant");
}

#[tokio::test]
async fn test_device_code_bound_to_client() {
    let harness = Harness::new().await;
    let client = harness.client(WEB_APP).await;
    let device = harness
        .server
        .device_authorization()
        .start(&client, scopes(&["openid"]))
        .await
        .unwrap();

    let err = harness
        .token(
            SERVICE,
            SERVICE_SECRET,
            &[("grant_type", DEVICE_CODE), ("device_code", device.device_code.as_str())],
        )
        .await
        .unwrap_err();
    assert_eq!(err.oauth_error_code(), "invalid_grant");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_device_code_polls_have_single_winner() {
    let harness = Arc::new(Harness::new().await);
    let client = harness.client(WEB_APP).await;
    let device = harness
        .server
        .device_authorization()
        .start(&client, scopes(&["openid", "profile"]))
        .await
        .unwrap();
    harness
        .server
        .device_authorization()
        .approve(&device.user_code, &test_account(), &scopes(&["openid", "profile"]))
        .await
        .unwrap();

    let tasks = 8;
    let barrier = Arc::new(Barrier::new(tasks));
    let mut handles = Vec::new();
    for _ in 0..tasks {
        let harness = harness.clone();
        let barrier = barrier.clone();
        let device_code = device.device_code.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            harness
                .token(
                    WEB_APP,
                    WEB_SECRET,
                    &[("grant_type", DEVICE_CODE), ("device_code", device_code.as_str())],
                )
                .await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(response) => {
                assert_eq!(response.scope, "openid profile");
                successes += 1;
            }
            Err(e) => assert_eq!(e.oauth_error_code(), "invalid_grant"),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(harness.access_token_count().await, 1);
    assert!(harness.device_codes.find(&device.device_code).await.unwrap().is_none());
}

#[tokio::test]
async fn test_expired_device_code_is_purged() {
    let harness = Harness::new().await;
    let client = harness.client(WEB_APP).await;
    let device = harness
        .server
        .device_authorization()
        .start(&client, scopes(&["openid"]))
        .await
        .unwrap();
    harness.clock.advance(Duration::seconds(device.expires_in + 1));

    let err = harness
        .token(
            WEB_APP,
            WEB_SECRET,
            &[("grant_type", DEVICE_CODE), ("device_code", device.device_code.as_str())],
        )
        .await
        .unwrap_err();

    assert_eq!(err.oauth_error_code(), "invalid_grant");
    assert!(harness.device_codes.find(&device.device_code).await.unwrap().is_none());
}

// ============================================================================
// Refresh token
// ============================================================================

async fn refresh(
    harness: &Harness,
    refresh_token: &str,
    scope: Option<&str>,
) -> iam_authz::Result<iam_authz::TokenResponse> {
    let mut params = vec![("grant_type", "refresh_token"), ("refresh_token", refresh_token)];
    if let Some(scope) = scope {
        params.push(("scope", scope));
    }
    harness.token(WEB_APP, WEB_SECRET, &params).await
}

#[tokio::test]
async fn test_refresh_reuses_token_and_keeps_scopes() {
    let harness = Harness::new().await;
    let login = harness.login(&["openid", "profile", "offline_access"]).await;
    let refresh_token = login.refresh_token.unwrap();

    let refreshed = refresh(&harness, &refresh_token, None).await.unwrap();

    assert_eq!(refreshed.scope, "offline_access openid profile");
    assert_eq!(refreshed.refresh_token.as_deref(), Some(refresh_token.as_str()));
}

#[tokio::test]
async fn test_refresh_can_narrow_but_not_widen() {
    let harness = Harness::new().await;
    let login = harness.login(&["openid", "profile", "offline_access"]).await;
    let refresh_token = login.refresh_token.unwrap();

    let narrowed = refresh(&harness, &refresh_token, Some("openid")).await.unwrap();
    assert_eq!(narrowed.scope, "openid");

    let before = harness.access_token_count().await;
    let err = refresh(&harness, &refresh_token, Some("openid scim:write")).await.unwrap_err();
    assert_eq!(err.oauth_error_code(), "invalid_scope");
    assert!(err.to_string().contains("scim:write"));
    assert_eq!(harness.access_token_count().await, before);
}

#[tokio::test]
async fn test_refresh_applies_policies_created_after_login() {
    let harness = Harness::new().await;
    let login = harness.login(&["openid", "profile", "offline_access"]).await;

    harness
        .policies
        .save(ScopePolicy::deny("no-profile").with_scopes(["profile"]).for_account("acct-test"))
        .await
        .unwrap();

    let refreshed = refresh(&harness, &login.refresh_token.unwrap(), None).await.unwrap();
    assert_eq!(refreshed.scope, "offline_access openid");
}

#[tokio::test]
async fn test_refresh_rotation() {
    let mut config = test_config();
    config.tokens.rotate_refresh_tokens = true;
    let harness = Harness::with_config(config).await;
    let login = harness.login(&["openid", "offline_access"]).await;
    let original = login.refresh_token.unwrap();

    let rotated = refresh(&harness, &original, None).await.unwrap();
    let replacement = rotated.refresh_token.unwrap();
    assert_ne!(replacement, original);

    assert_eq!(
        refresh(&harness, &original, None).await.unwrap_err().oauth_error_code(),
        "invalid_grant"
    );
    assert!(refresh(&harness, &replacement, None).await.is_ok());
}

#[tokio::test]
async fn test_expired_refresh_token_is_revoked() {
    let harness = Harness::new().await;
    let login = harness.login(&["openid", "offline_access"]).await;
    let refresh_token = login.refresh_token.unwrap();
    harness.clock.advance(Duration::days(31));

    let err = refresh(&harness, &refresh_token, None).await.unwrap_err();
    assert_eq!(err.oauth_error_code(), "invalid_grant");

    harness.clock.set(common::start_time());
    assert!(refresh(&harness, &refresh_token, None).await.is_err());
}

// ============================================================================
// AUP gate
// ============================================================================

#[tokio::test]
async fn test_refresh_requires_current_aup_signature() {
    let harness = Harness::new().await;
    let login = harness.login(&["openid", "offline_access"]).await;
    harness.require_aup();
    let before = harness.access_token_count().await;

    let err = refresh(&harness, &login.refresh_token.unwrap(), None).await.unwrap_err();

    assert_eq!(err.oauth_error_code(), "invalid_grant");
    assert!(err.to_string().contains("needs to sign AUP"));
    assert_eq!(harness.access_token_count().await, before);
}

#[tokio::test]
async fn test_exchange_requires_current_aup_signature() {
    let harness = Harness::new().await;
    let login = harness.login(&["openid"]).await;
    harness.require_aup();
    let before = harness.access_token_count().await;

    let err = harness
        .token(
            SERVICE,
            SERVICE_SECRET,
            &[
                ("grant_type", "urn:ietf:params:oauth:grant-type:token-exchange"),
                ("subject_token", login.access_token.as_str()),
                ("subject_token_type", TOKEN_TYPE_ACCESS_TOKEN),
            ],
        )
        .await
        .unwrap_err();

    assert_eq!(err.oauth_error_code(), "invalid_grant");
    assert_eq!(harness.access_token_count().await, before);
}

#[tokio::test]
async fn test_signing_the_aup_lifts_the_gate() {
    let harness = Harness::new().await;
    let login = harness.login(&["openid", "offline_access"]).await;
    harness.require_aup();
    harness.clock.advance(Duration::minutes(1));
    harness
        .save_account(test_account().with_aup_signature(harness.clock.now()))
        .await;

    assert!(refresh(&harness, &login.refresh_token.unwrap(), None).await.is_ok());
}

#[tokio::test]
async fn test_code_grant_is_not_gated_by_aup() {
    let harness = Harness::new().await;
    harness.require_aup();

    harness.login(&["openid"]).await;
}

// ============================================================================
// Client bookkeeping
// ============================================================================

#[tokio::test]
async fn test_last_used_advances_once_per_day() {
    let harness = Harness::new().await;
    let first_day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();

    harness.login(&["openid"]).await;
    assert_eq!(harness.client(WEB_APP).await.last_used, Some(first_day));

    harness.clock.advance(Duration::hours(3));
    harness.login(&["openid"]).await;
    assert_eq!(harness.client(WEB_APP).await.last_used, Some(first_day));

    harness.clock.advance(Duration::days(1));
    harness.login(&["openid"]).await;
    assert_eq!(
        harness.client(WEB_APP).await.last_used,
        NaiveDate::from_ymd_opt(2024, 5, 2)
    );
    assert_eq!(harness.client(SERVICE).await.last_used, None);
}

#[tokio::test]
async fn test_client_update_evicts_cached_matchers() {
    let harness = Harness::new().await;
    let registry = harness.server.registry();
    let client = harness.client(SERVICE).await;

    assert!(registry.client_allows(&client, "storage.read:/data/x"));
    assert!(!registry.client_allows(&client, "storage.read:/other"));
    assert_eq!(registry.stats().entries, 1);

    let widened = client.with_scopes(["storage.read:/"]);
    harness.clients.save(widened.clone()).await.unwrap();

    let stats = registry.stats();
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.entries, 0);
    assert!(registry.client_allows(&widened, "storage.read:/other"));
}
