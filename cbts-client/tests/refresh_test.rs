//! Silent refresh on 401: single flight, replay once, rotation and failure

mod common;

use cbts_client::{ApiRequest, AuthState, CbtsApi, StorageKey, TokenStore};
use cbts_core::{CbtsError, Route};
use common::{credentials, Harness};
use futures::future::join_all;
use std::time::Duration;

async fn logged_in(username: &str) -> Harness {
    let harness = Harness::new();
    harness
        .session
        .login(&credentials(username), None)
        .await
        .unwrap();
    harness
}

#[tokio::test]
async fn test_expired_access_token_is_refreshed_and_request_replayed() {
    let harness = logged_in("dev").await;
    let old_access = harness.session.access_token().await.unwrap();
    harness.backend.expire_access_tokens();

    let api = CbtsApi::new(harness.session.clone());
    let bugs = api.list_bugs().await.unwrap();

    assert_eq!(bugs.len(), 1);
    assert_eq!(harness.backend.refresh_calls(), 1);
    assert_eq!(harness.backend.call_count("GET", "bugs/"), 2);

    let new_access = harness.session.access_token().await.unwrap();
    assert_ne!(new_access, old_access);
    assert_eq!(
        harness.store.load(StorageKey::AccessToken).unwrap(),
        Some(new_access)
    );
    assert_eq!(harness.session.state().state, AuthState::Authenticated);
}

#[tokio::test]
async fn test_concurrent_unauthorized_requests_share_one_refresh() {
    let harness = logged_in("tess").await;
    harness.backend.set_refresh_delay(Duration::from_millis(50));
    harness.backend.expire_access_tokens();

    let api = CbtsApi::new(harness.session.clone());
    let results = join_all((0..5).map(|_| api.list_bugs())).await;

    for result in results {
        assert_eq!(result.unwrap().len(), 1);
    }
    assert_eq!(harness.backend.refresh_calls(), 1);
}

#[tokio::test]
async fn test_concurrent_requests_across_tasks_share_one_refresh() {
    let harness = logged_in("cass").await;
    harness.backend.set_refresh_delay(Duration::from_millis(50));
    harness.backend.expire_access_tokens();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let api = CbtsApi::new(harness.session.clone());
            tokio::spawn(async move { api.list_projects().await })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().len(), 1);
    }
    assert_eq!(harness.backend.refresh_calls(), 1);
}

#[tokio::test]
async fn test_replayed_request_never_refreshes_again() {
    let harness = logged_in("dev").await;
    harness.backend.set_reject_all_bearers(true);

    let api = CbtsApi::new(harness.session.clone());
    let result = api.list_bugs().await;

    assert!(matches!(result, Err(CbtsError::SessionExpired { .. })));
    assert_eq!(harness.backend.refresh_calls(), 1);
    assert_eq!(harness.backend.call_count("GET", "bugs/"), 2);
}

#[tokio::test]
async fn test_request_marked_as_retry_is_not_refreshed() {
    let harness = logged_in("dev").await;
    harness.backend.expire_access_tokens();

    let response = harness
        .session
        .send_authorized(ApiRequest::get("bugs/").into_retry())
        .await
        .unwrap();

    assert_eq!(response.status, 401);
    assert_eq!(harness.backend.refresh_calls(), 0);
}

#[tokio::test]
async fn test_rotated_refresh_token_replaces_the_old_one() {
    let harness = logged_in("lee").await;
    harness.backend.set_rotate_refresh(true);
    let old_refresh = harness
        .store
        .load(StorageKey::RefreshToken)
        .unwrap()
        .unwrap();
    harness.backend.expire_access_tokens();

    CbtsApi::new(harness.session.clone())
        .list_teams()
        .await
        .unwrap();

    let new_refresh = harness
        .store
        .load(StorageKey::RefreshToken)
        .unwrap()
        .unwrap();
    assert_ne!(new_refresh, old_refresh);
    assert!(harness.backend.is_refresh_token_valid(&new_refresh));
    assert!(!harness.backend.is_refresh_token_valid(&old_refresh));

    // The rotated token is the one used next time
    harness.backend.expire_access_tokens();
    CbtsApi::new(harness.session.clone())
        .list_teams()
        .await
        .unwrap();
    assert_eq!(harness.backend.refresh_calls(), 2);
}

#[tokio::test]
async fn test_rejected_refresh_ends_session_and_navigates_to_login() {
    let harness = logged_in("emma").await;
    let mut navigation = harness.session.subscribe_navigation();
    harness.backend.expire_access_tokens();
    harness.backend.revoke_refresh_tokens();

    let result = CbtsApi::new(harness.session.clone()).list_users().await;

    assert!(matches!(result, Err(CbtsError::SessionExpired { .. })));
    assert!(harness.store.is_empty());
    assert!(!harness.session.is_authenticated());
    assert_eq!(harness.session.state().state, AuthState::Unauthenticated);
    assert_eq!(navigation.recv().await.unwrap(), Route::login());
}

#[tokio::test]
async fn test_key_session_without_refresh_token_expires_on_401() {
    let harness = Harness::new();
    harness.backend.set_key_login(true);
    harness
        .session
        .login(&credentials("cass"), None)
        .await
        .unwrap();
    harness.backend.expire_access_tokens();

    let result = CbtsApi::new(harness.session.clone()).list_bugs().await;

    assert!(matches!(result, Err(CbtsError::SessionExpired { .. })));
    assert_eq!(harness.backend.refresh_calls(), 0);
    assert!(harness.store.is_empty());
}

#[tokio::test]
async fn test_unreachable_refresh_endpoint_keeps_session() {
    let harness = logged_in("tess").await;
    harness.backend.expire_access_tokens();
    harness.backend.set_refresh_unreachable(true);

    let result = CbtsApi::new(harness.session.clone()).list_bugs().await;

    assert!(matches!(result, Err(CbtsError::Network { .. })));
    assert!(harness.session.is_authenticated());
    assert_eq!(harness.session.state().state, AuthState::Authenticated);
    assert!(harness.store.load(StorageKey::RefreshToken).unwrap().is_some());
}

#[tokio::test]
async fn test_concurrent_requests_share_a_failed_refresh() {
    let harness = logged_in("tess").await;
    harness.backend.set_refresh_delay(Duration::from_millis(50));
    harness.backend.set_refresh_unreachable(true);
    harness.backend.expire_access_tokens();

    let api = CbtsApi::new(harness.session.clone());
    let results = join_all((0..5).map(|_| api.list_bugs())).await;

    for result in &results {
        assert!(
            matches!(result, Err(CbtsError::Network { .. })),
            "Expected Network error, got {:?}",
            result
        );
    }
    assert_eq!(harness.backend.call_count("POST", "token/refresh/"), 1);
    assert!(harness.session.is_authenticated());
    assert_eq!(harness.session.state().state, AuthState::Authenticated);

    // A request sent after the failure gets its own attempt
    harness.backend.set_refresh_unreachable(false);
    let bugs = api.list_bugs().await.unwrap();
    assert_eq!(bugs.len(), 1);
    assert_eq!(harness.backend.call_count("POST", "token/refresh/"), 2);
}

#[tokio::test]
async fn test_logout_during_refresh_discards_refresh_result() {
    let harness = logged_in("dev").await;
    harness.backend.set_refresh_delay(Duration::from_millis(100));
    harness.backend.expire_access_tokens();

    let api = CbtsApi::new(harness.session.clone());
    let request = tokio::spawn(async move { api.list_bugs().await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(harness.session.state().state, AuthState::Refreshing);
    harness.session.logout().await.unwrap();

    let result = request.await.unwrap();
    assert!(matches!(result, Err(CbtsError::Superseded { .. })));
    assert_eq!(harness.session.access_token().await, None);
    assert!(harness.store.is_empty());
    assert_eq!(harness.session.state().state, AuthState::Unauthenticated);
}
