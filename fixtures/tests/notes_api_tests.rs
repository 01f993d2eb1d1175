use fixtures::{MockBackend, RefreshMode, ALICE_EMAIL, ALICE_PASSWORD, BOB_EMAIL};
use serde_json::{json, Value};

async fn start() -> (MockBackend, String) {
    let backend = MockBackend::new();
    let base = backend.spawn().await.expect("Failed to start mock backend");
    (backend, base)
}

#[tokio::test]
async fn test_login_returns_token_pair_and_profile() {
    let (_backend, base) = start().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/api/user/login/"))
        .json(&json!({ "email": ALICE_EMAIL, "password": ALICE_PASSWORD }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    assert!(body["token"]["access"].as_str().is_some());
    assert!(body["token"]["refresh"].as_str().is_some());
    assert_eq!(body["email"], ALICE_EMAIL);
    assert_eq!(body["is_admin"], true);
}

#[tokio::test]
async fn test_login_with_bad_password_is_rejected() {
    let (_backend, base) = start().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/api/user/login/"))
        .json(&json!({ "email": ALICE_EMAIL, "password": "wrong-password" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_refresh_exchanges_live_token() {
    let (backend, base) = start().await;
    let client = reqwest::Client::new();
    let refresh = backend.refresh_token_for(BOB_EMAIL);

    let response = client
        .post(format!("{base}/api/token/refresh/"))
        .json(&json!({ "refresh": refresh }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert!(body["access"].as_str().is_some());

    let response = client
        .post(format!("{base}/api/token/refresh/"))
        .json(&json!({ "refresh": "not-a-live-token" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    assert_eq!(backend.refresh_calls(), 2);
}

#[tokio::test]
async fn test_refresh_modes() {
    let (backend, base) = start().await;
    let client = reqwest::Client::new();
    let refresh = backend.refresh_token_for(BOB_EMAIL);

    backend.set_refresh_mode(RefreshMode::Fail(500));
    let response = client
        .post(format!("{base}/api/token/refresh/"))
        .json(&json!({ "refresh": refresh }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);

    backend.set_refresh_mode(RefreshMode::Malformed);
    let response = client
        .post(format!("{base}/api/token/refresh/"))
        .json(&json!({ "refresh": refresh }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert!(body.get("access").is_none());
}

#[tokio::test]
async fn test_protected_routes_check_bearer_tokens() {
    let (backend, base) = start().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{base}/api/user/profile/"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);

    let expired = backend.access_token_for(BOB_EMAIL, -600);
    let response = client
        .get(format!("{base}/api/user/profile/"))
        .bearer_auth(&expired)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "token_not_valid");

    let valid = backend.access_token_for(BOB_EMAIL, 300);
    let response = client
        .get(format!("{base}/api/user/profile/"))
        .bearer_auth(&valid)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["email"], BOB_EMAIL);
    assert_eq!(body["notes_count"], 2);

    backend.revoke_access_token(&valid);
    let response = client
        .get(format!("{base}/api/user/profile/"))
        .bearer_auth(&valid)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);

    let recorded = backend.calls("GET", "/api/user/profile/");
    assert_eq!(recorded.len(), 4);
    assert_eq!(recorded[0].bearer(), None);
    assert_eq!(recorded[2].bearer(), Some(valid.as_str()));
}

#[tokio::test]
async fn test_feed_is_newest_first_with_viewer_fields() {
    let (backend, base) = start().await;
    let client = reqwest::Client::new();
    let token = backend.access_token_for(BOB_EMAIL, 300);

    let notes: Vec<Value> = client
        .get(format!("{base}/api/user/notes/"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let ids: Vec<u64> = notes.iter().map(|note| note["id"].as_u64().unwrap()).collect();
    assert_eq!(ids, vec![3, 2, 1]);

    let primer = &notes[2];
    assert_eq!(primer["slug"], "rust-ownership-primer-1");
    assert_eq!(primer["avg_rating"], 4.0);
    assert_eq!(primer["user_rating"], 4);
    assert_eq!(primer["attachments"][0]["id"], 1);
}

#[tokio::test]
async fn test_create_note_with_attachment_and_download_it() {
    let (backend, base) = start().await;
    let client = reqwest::Client::new();
    let token = backend.access_token_for(ALICE_EMAIL, 300);

    let form = reqwest::multipart::Form::new()
        .text("title", "Lifetimes explained")
        .text("body", "Elision rules")
        .text("category", "programming")
        .part(
            "attachments",
            reqwest::multipart::Part::bytes(b"'a and 'b".to_vec()).file_name("lifetimes.txt"),
        );

    let response = client
        .post(format!("{base}/api/user/notes/"))
        .bearer_auth(&token)
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    let note: Value = response.json().await.unwrap();
    assert_eq!(note["title"], "Lifetimes explained");
    assert_eq!(note["username"], ALICE_EMAIL);

    let attachment_id = note["attachments"][0]["id"].as_u64().unwrap();
    let response = client
        .get(format!("{base}/api/user/download/attachment/{attachment_id}/"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.bytes().await.unwrap().as_ref(), b"'a and 'b");
}

#[tokio::test]
async fn test_search_is_scoped_to_caller() {
    let (backend, base) = start().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{base}/api/user/search_notes/?q=rust"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);

    let token = backend.access_token_for(ALICE_EMAIL, 300);
    let results: Vec<Value> = client
        .get(format!("{base}/api/user/search_notes/?q=rust"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["title"], "Rust ownership primer");

    backend.break_search(true);
    let response = client
        .get(format!("{base}/api/user/search_notes/?q=rust"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_cannot_demote_self() {
    let (backend, base) = start().await;
    let client = reqwest::Client::new();
    let admin = backend.access_token_for(ALICE_EMAIL, 300);
    let regular = backend.access_token_for(BOB_EMAIL, 300);

    let response = client
        .get(format!("{base}/api/user/admin/users/?all=1"))
        .bearer_auth(&regular)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);

    let response = client
        .patch(format!("{base}/api/user/admin/users/1/"))
        .bearer_auth(&admin)
        .json(&json!({ "is_admin": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let response = client
        .patch(format!("{base}/api/user/admin/users/2/"))
        .bearer_auth(&admin)
        .json(&json!({ "is_admin": "true" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["is_admin"], true);
}

#[tokio::test]
async fn test_heartbeat_updates_last_seen() {
    let (backend, base) = start().await;
    let client = reqwest::Client::new();
    let token = backend.access_token_for(BOB_EMAIL, 300);
    assert!(backend.last_seen(BOB_EMAIL).is_none());

    let response = client
        .post(format!("{base}/api/user/heartbeat/"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert!(backend.last_seen(BOB_EMAIL).is_some());
}
