//! End-to-end sign-in flows against a mock backend

use equitycompass_client::api::ErrorKind;
use equitycompass_client::auth::{AuthManager, AuthState, SessionEvent, SessionStore, User};
use equitycompass_client::ClientSettings;
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn ok(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "success": true,
        "data": data,
        "message": "ok",
        "timestamp": "2024-05-01T10:00:00"
    }))
}

fn unauthorized() -> ResponseTemplate {
    ResponseTemplate::new(401).set_body_json(json!({
        "success": false,
        "error": "UNAUTHORIZED",
        "message": "Token has expired"
    }))
}

fn settings_for(server: &MockServer, dir: &tempfile::TempDir) -> ClientSettings {
    ClientSettings {
        api_base_url: server.uri(),
        data_dir: Some(dir.path().to_path_buf()),
        ..ClientSettings::default()
    }
}

fn stored_user() -> User {
    User {
        id: 1,
        email: "a@b.com".to_string(),
        nickname: None,
        created_at: None,
        plan: None,
    }
}

#[tokio::test]
async fn test_send_code_then_login_persists_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/send-code"))
        .respond_with(ok(json!({"email": "a@b.com", "expires_in": 600})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/verify-code"))
        .respond_with(ok(json!({"token": "tkn1", "user": {"id": 1, "email": "a@b.com"}})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let manager = AuthManager::from_settings(&settings_for(&server, &dir))
        .await
        .unwrap();
    let mut events = manager.events();

    manager.send_verification_code("a@b.com").await.unwrap();
    assert_eq!(
        manager.state(),
        AuthState::CodeSent {
            email: "a@b.com".to_string()
        }
    );

    let user = manager.login("a@b.com", "123456").await.unwrap();
    assert_eq!(user.id, 1);
    assert!(manager.is_authenticated());
    assert_eq!(events.recv().await.unwrap(), SessionEvent::SignedIn { user_id: 1 });

    // A fresh store over the same directory sees the session
    let (token, stored) = SessionStore::open(dir.path()).unwrap().load().unwrap();
    assert_eq!(token, "tkn1");
    assert_eq!(stored.id, 1);
    assert_eq!(stored.email, "a@b.com");
}

#[tokio::test]
async fn test_stored_session_survives_restart() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/status"))
        .and(header("Authorization", "Bearer tkn1"))
        .respond_with(ok(json!({"authenticated": true, "user": {"id": 1}})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    SessionStore::open(dir.path())
        .unwrap()
        .save("tkn1", &stored_user())
        .unwrap();

    let manager = AuthManager::from_settings(&settings_for(&server, &dir))
        .await
        .unwrap();
    assert!(manager.is_authenticated());
    assert_eq!(manager.user().unwrap().email, "a@b.com");
}

#[tokio::test]
async fn test_rejected_stored_token_is_discarded_at_startup() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/status"))
        .respond_with(unauthorized())
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    SessionStore::open(dir.path())
        .unwrap()
        .save("expired", &stored_user())
        .unwrap();

    let manager = AuthManager::from_settings(&settings_for(&server, &dir))
        .await
        .unwrap();

    assert_eq!(manager.state(), AuthState::Unauthenticated);
    assert!(manager.session().store().load().is_none());
    assert!(SessionStore::open(dir.path()).unwrap().load().is_none());
}

#[tokio::test]
async fn test_any_401_tears_down_the_session() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/status"))
        .respond_with(ok(json!({"authenticated": true})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/stocks/watchlist"))
        .and(header("Authorization", "Bearer tkn1"))
        .respond_with(unauthorized())
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    SessionStore::open(dir.path())
        .unwrap()
        .save("tkn1", &stored_user())
        .unwrap();

    let manager = AuthManager::from_settings(&settings_for(&server, &dir))
        .await
        .unwrap();
    assert!(manager.is_authenticated());
    let mut events = manager.events();
    let mut state_rx = manager.subscribe();

    let err = manager
        .client()
        .get::<Value>("/stocks/watchlist")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AuthenticationRejected);
    assert_eq!(err.message(), "Token has expired");
    assert_eq!(manager.state(), AuthState::Unauthenticated);
    assert!(manager.session().store().load().is_none());
    assert_eq!(*state_rx.borrow_and_update(), AuthState::Unauthenticated);
    assert_eq!(events.recv().await.unwrap(), SessionEvent::SignedOut);
    assert_eq!(events.recv().await.unwrap(), SessionEvent::LoginRequired);
}

#[tokio::test]
async fn test_unauthenticated_request_carries_no_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stocks/AAPL"))
        .respond_with(ok(json!({"symbol": "AAPL"})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let manager = AuthManager::from_settings(&settings_for(&server, &dir))
        .await
        .unwrap();

    let data: Value = manager.client().get("/stocks/AAPL").await.unwrap();
    assert_eq!(data["symbol"], "AAPL");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(!requests[0].headers.contains_key("authorization"));
}

#[tokio::test]
async fn test_logout_then_relogin() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/send-code"))
        .respond_with(ok(json!(null)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/verify-code"))
        .respond_with(ok(json!({"access_token": "tkn2", "user": {"id": 1, "email": "a@b.com"}})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .respond_with(ok(json!(null)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let manager = AuthManager::from_settings(&settings_for(&server, &dir))
        .await
        .unwrap();

    manager.send_verification_code("a@b.com").await.unwrap();
    manager.login("a@b.com", "123456").await.unwrap();

    manager.logout().unwrap().await.unwrap();
    assert_eq!(manager.state(), AuthState::Unauthenticated);
    assert!(SessionStore::open(dir.path()).unwrap().load().is_none());

    manager.send_verification_code("a@b.com").await.unwrap();
    manager.login("a@b.com", "654321").await.unwrap();
    assert_eq!(manager.session().token().as_deref(), Some("tkn2"));
}

#[tokio::test]
async fn test_rate_limit_message_reaches_caller() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/send-code"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "message": "Too many requests",
            "error": "RATE_LIMITED"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let manager = AuthManager::from_settings(&settings_for(&server, &dir))
        .await
        .unwrap();

    let err = manager.send_verification_code("a@b.com").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Application);
    assert_eq!(err.message(), "Too many requests");
    assert_eq!(err.code(), "RATE_LIMITED");
    assert_eq!(err.status(), Some(429));
    assert_eq!(manager.state(), AuthState::Unauthenticated);
}
