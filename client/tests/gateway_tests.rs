use std::sync::Arc;
use std::time::Duration;

use fixtures::{MockBackend, RefreshMode, ALICE_EMAIL, BOB_EMAIL};
use noteshare::api::notes;
use noteshare::models::NoteDraft;
use noteshare::{
    ApiRequest, AuthEvent, ClientConfig, CredentialStore, Credentials, Gateway, Scope, StorageKey,
};
use reqwest::StatusCode;

const NOTES_PATH: &str = "/api/user/notes/";
const PROFILE_PATH: &str = "/api/user/profile/";

async fn setup() -> (MockBackend, Gateway) {
    let backend = MockBackend::new();
    let base = backend.spawn().await.expect("Failed to start mock backend");
    let config = ClientConfig::new(&base).unwrap();
    let gateway = Gateway::new(config, Credentials::in_memory()).unwrap();
    (backend, gateway)
}

fn store(gateway: &Gateway) -> Arc<dyn CredentialStore> {
    gateway.credentials().store().clone()
}

fn seed(gateway: &Gateway, scope: Scope, access: Option<&str>, refresh: Option<&str>) {
    let store = store(gateway);
    if let Some(access) = access {
        store.set(scope, StorageKey::AccessToken, access).unwrap();
    }
    if let Some(refresh) = refresh {
        store.set(scope, StorageKey::RefreshToken, refresh).unwrap();
    }
}

#[tokio::test]
async fn test_expired_session_token_is_refreshed_before_sending() {
    let (backend, gateway) = setup().await;
    let expired = backend.access_token_for(BOB_EMAIL, -600);
    let refresh = backend.refresh_token_for(BOB_EMAIL);
    seed(&gateway, Scope::Session, Some(expired.as_str()), Some(refresh.as_str()));

    let response = gateway.send(ApiRequest::get(NOTES_PATH)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(backend.refresh_calls(), 1);
    let store = store(&gateway);
    let new_access = store
        .get(Scope::Session, StorageKey::AccessToken)
        .expect("new access token stored in session scope");
    assert_ne!(new_access, expired);
    assert_eq!(store.get(Scope::Persistent, StorageKey::AccessToken), None);

    let calls = backend.calls("GET", NOTES_PATH);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].bearer(), Some(new_access.as_str()));
}

#[tokio::test]
async fn test_valid_token_without_refresh_token_is_sent_as_is() {
    let (backend, gateway) = setup().await;
    let access = backend.access_token_for(BOB_EMAIL, 300);
    seed(&gateway, Scope::Session, Some(access.as_str()), None);

    let response = gateway.send(ApiRequest::get(NOTES_PATH)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(backend.refresh_calls(), 0);
    let calls = backend.calls("GET", NOTES_PATH);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].bearer(), Some(access.as_str()));
}

#[tokio::test]
async fn test_no_tokens_sends_without_authorization() {
    let (backend, gateway) = setup().await;

    let response = gateway.send(ApiRequest::get(NOTES_PATH)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(backend.refresh_calls(), 0);
    let calls = backend.calls("GET", NOTES_PATH);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].authorization, None);
}

#[tokio::test]
async fn test_concurrent_sends_share_one_refresh() {
    let (backend, gateway) = setup().await;
    let expired = backend.access_token_for(BOB_EMAIL, -600);
    let refresh = backend.refresh_token_for(BOB_EMAIL);
    seed(&gateway, Scope::Session, Some(expired.as_str()), Some(refresh.as_str()));
    backend.set_refresh_delay(Duration::from_millis(200));

    let sends = (0..8).map(|_| {
        let gateway = gateway.clone();
        async move { gateway.send(ApiRequest::get(NOTES_PATH)).await }
    });
    let responses = futures::future::join_all(sends).await;

    for response in responses {
        assert_eq!(response.unwrap().status(), StatusCode::OK);
    }
    assert_eq!(backend.refresh_calls(), 1);

    let calls = backend.calls("GET", NOTES_PATH);
    assert_eq!(calls.len(), 8);
    let first = calls[0].bearer().expect("bearer token attached");
    assert_ne!(first, expired);
    assert!(calls.iter().all(|call| call.bearer() == Some(first)));
}

#[tokio::test]
async fn test_concurrent_401s_share_one_refresh() {
    let (backend, gateway) = setup().await;
    let access = backend.access_token_for(BOB_EMAIL, 300);
    let refresh = backend.refresh_token_for(BOB_EMAIL);
    seed(&gateway, Scope::Persistent, Some(access.as_str()), Some(refresh.as_str()));
    backend.revoke_access_token(&access);
    backend.set_refresh_delay(Duration::from_millis(500));

    let sends = (0..5).map(|_| {
        let gateway = gateway.clone();
        tokio::spawn(async move { gateway.send(ApiRequest::get(PROFILE_PATH)).await })
    });
    for handle in futures::future::join_all(sends).await {
        assert_eq!(handle.unwrap().unwrap().status(), StatusCode::OK);
    }

    assert_eq!(backend.refresh_calls(), 1);
    assert_eq!(backend.calls("GET", PROFILE_PATH).len(), 10);
}

#[tokio::test]
async fn test_refresh_keeps_persistent_scope() {
    let (backend, gateway) = setup().await;
    let expired = backend.access_token_for(ALICE_EMAIL, -600);
    let refresh = backend.refresh_token_for(ALICE_EMAIL);
    seed(&gateway, Scope::Persistent, Some(expired.as_str()), Some(refresh.as_str()));

    let new_access = gateway.refresh().await.expect("refresh succeeds");

    let store = store(&gateway);
    assert_eq!(
        store.get(Scope::Persistent, StorageKey::AccessToken),
        Some(new_access)
    );
    assert_eq!(store.get(Scope::Session, StorageKey::AccessToken), None);
}

#[tokio::test]
async fn test_401_is_retried_once_with_new_token() {
    let (backend, gateway) = setup().await;
    let access = backend.access_token_for(BOB_EMAIL, 300);
    let refresh = backend.refresh_token_for(BOB_EMAIL);
    seed(&gateway, Scope::Session, Some(access.as_str()), Some(refresh.as_str()));
    backend.revoke_access_token(&access);

    let response = gateway.send(ApiRequest::get(PROFILE_PATH)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(backend.refresh_calls(), 1);
    let calls = backend.calls("GET", PROFILE_PATH);
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].bearer(), Some(access.as_str()));

    let new_access = gateway.credentials().access_token().unwrap();
    assert_eq!(calls[1].bearer(), Some(new_access.as_str()));
}

#[tokio::test]
async fn test_retry_is_attempted_only_once() {
    let (backend, gateway) = setup().await;
    let access = backend.access_token_for(BOB_EMAIL, 300);
    let refresh = backend.refresh_token_for(BOB_EMAIL);
    seed(&gateway, Scope::Session, Some(access.as_str()), Some(refresh.as_str()));
    backend.reject_all_access_tokens(true);

    let response = gateway.send(ApiRequest::get(PROFILE_PATH)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    assert_eq!(backend.refresh_calls(), 1);
    assert_eq!(backend.calls("GET", PROFILE_PATH).len(), 2);
    // The refresh itself worked, so the session is kept
    assert!(gateway.credentials().refresh_token().is_some());
}

#[tokio::test]
async fn test_401_without_refresh_token_purges_without_network_refresh() {
    let (backend, gateway) = setup().await;
    let access = backend.access_token_for(BOB_EMAIL, 300);
    seed(&gateway, Scope::Session, Some(access.as_str()), None);
    store(&gateway)
        .set(Scope::Session, StorageKey::CurrentUser, BOB_EMAIL)
        .unwrap();
    backend.revoke_access_token(&access);
    let mut events = gateway.credentials().events().subscribe();

    let response = gateway.send(ApiRequest::get(PROFILE_PATH)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    assert_eq!(backend.refresh_calls(), 0);
    assert_eq!(backend.calls("GET", PROFILE_PATH).len(), 1);
    assert_eq!(gateway.credentials().access_token(), None);
    assert_eq!(store(&gateway).get(Scope::Session, StorageKey::CurrentUser), None);
    assert_eq!(events.try_recv().unwrap(), AuthEvent::CredentialsCleared);
}

#[tokio::test]
async fn test_failed_refresh_after_401_purges_and_returns_original_response() {
    let (backend, gateway) = setup().await;
    let access = backend.access_token_for(BOB_EMAIL, 300);
    let refresh = backend.refresh_token_for(BOB_EMAIL);
    seed(&gateway, Scope::Persistent, Some(access.as_str()), Some(refresh.as_str()));
    backend.revoke_access_token(&access);
    backend.set_refresh_mode(RefreshMode::Fail(400));

    let response = gateway.send(ApiRequest::get(PROFILE_PATH)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], "token_not_valid");

    assert_eq!(backend.refresh_calls(), 1);
    assert_eq!(backend.calls("GET", PROFILE_PATH).len(), 1);
    assert_eq!(gateway.credentials().access_token(), None);
    assert_eq!(gateway.credentials().refresh_token(), None);
}

#[tokio::test]
async fn test_bare_refresh_failure_does_not_purge() {
    let (backend, gateway) = setup().await;
    let expired = backend.access_token_for(BOB_EMAIL, -600);
    let refresh = backend.refresh_token_for(BOB_EMAIL);
    seed(&gateway, Scope::Session, Some(expired.as_str()), Some(refresh.as_str()));
    backend.set_refresh_mode(RefreshMode::Fail(400));

    assert_eq!(gateway.refresh().await, None);

    assert_eq!(backend.refresh_calls(), 1);
    assert_eq!(gateway.credentials().access_token(), Some(expired));
    assert_eq!(
        gateway.credentials().refresh_token(),
        Some((Scope::Session, refresh))
    );
}

#[tokio::test]
async fn test_refresh_without_access_field_fails() {
    let (backend, gateway) = setup().await;
    let expired = backend.access_token_for(BOB_EMAIL, -600);
    let refresh = backend.refresh_token_for(BOB_EMAIL);
    seed(&gateway, Scope::Session, Some(expired.as_str()), Some(refresh.as_str()));
    backend.set_refresh_mode(RefreshMode::Malformed);

    assert_eq!(gateway.refresh().await, None);
    assert_eq!(gateway.credentials().access_token(), Some(expired));
}

#[tokio::test]
async fn test_refresh_without_refresh_token_skips_network() {
    let (backend, gateway) = setup().await;
    let access = backend.access_token_for(BOB_EMAIL, -600);
    seed(&gateway, Scope::Session, Some(access.as_str()), None);

    assert_eq!(gateway.refresh().await, None);
    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn test_settled_refresh_is_not_reused() {
    let (backend, gateway) = setup().await;
    let refresh = backend.refresh_token_for(BOB_EMAIL);
    seed(&gateway, Scope::Session, None, Some(refresh.as_str()));

    let first = gateway.refresh().await.unwrap();
    let second = gateway.refresh().await.unwrap();

    assert_eq!(backend.refresh_calls(), 2);
    assert_ne!(first, second);
}

#[tokio::test]
async fn test_multipart_body_is_rebuilt_for_retry() {
    let (backend, gateway) = setup().await;
    let access = backend.access_token_for(ALICE_EMAIL, 300);
    let refresh = backend.refresh_token_for(ALICE_EMAIL);
    seed(&gateway, Scope::Session, Some(access.as_str()), Some(refresh.as_str()));
    backend.revoke_access_token(&access);

    let draft = NoteDraft {
        title: Some("Retry me".to_string()),
        body: Some("Sent twice".to_string()),
        category: Some("testing".to_string()),
    };
    let note = notes::create(
        &gateway,
        &draft,
        vec![notes::attachment("retry.txt", b"payload".to_vec())],
    )
    .await
    .unwrap();

    assert_eq!(note.title, "Retry me");
    assert_eq!(note.attachments.len(), 1);
    assert_eq!(backend.calls("POST", NOTES_PATH).len(), 2);
}
