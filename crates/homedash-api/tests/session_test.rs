#![allow(clippy::unwrap_used)]
// Integration tests for `SessionStore` bootstrap/login using wiremock.

use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use url::Url;
use wiremock::matchers::{any, body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use homedash_api::storage::{ACCESS_KEY, REFRESH_KEY};
use homedash_api::{CredentialStorage, Error, Gateway, MemoryStorage, SessionStore};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup_with(
    storage: Arc<MemoryStorage>,
    bootstrap_timeout: Duration,
) -> (MockServer, Gateway, Arc<SessionStore>) {
    let server = MockServer::start().await;
    let session = Arc::new(
        SessionStore::new(storage).with_bootstrap_timeout(bootstrap_timeout),
    );
    let gateway = Gateway::with_client(
        reqwest::Client::new(),
        Url::parse(&server.uri()).unwrap(),
        Arc::clone(&session),
    );
    (server, gateway, session)
}

fn seeded(access: &str, refresh: &str) -> Arc<MemoryStorage> {
    let storage = Arc::new(MemoryStorage::default());
    storage.store(ACCESS_KEY, access).unwrap();
    storage.store(REFRESH_KEY, refresh).unwrap();
    storage
}

fn alice(is_admin: bool) -> Value {
    json!({
        "id": 1,
        "username": "alice",
        "email": "alice@example.com",
        "is_staff": is_admin,
        "is_admin": is_admin
    })
}

fn secret(value: &str) -> SecretString {
    SecretString::from(value.to_owned())
}

// ── Bootstrap ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_bootstrap_restores_valid_session() {
    let storage = seeded("a1", "r1");
    let (server, gateway, session) = setup_with(storage, Duration::from_secs(8)).await;

    Mock::given(method("GET"))
        .and(path("/api/auth/me/"))
        .and(header("authorization", "Bearer a1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(alice(true)))
        .expect(1)
        .mount(&server)
        .await;

    session.bootstrap(&gateway).await;

    assert!(session.is_initialized());
    assert!(session.is_authenticated());
    assert!(session.is_admin());
    assert_eq!(session.identity().unwrap().username, "alice");
}

#[tokio::test]
async fn test_bootstrap_with_stale_token_fails_closed() {
    let storage = seeded("stale", "also-stale");
    let (server, gateway, session) = setup_with(storage.clone(), Duration::from_secs(8)).await;

    Mock::given(method("GET"))
        .and(path("/api/auth/me/"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/token/refresh/"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    session.bootstrap(&gateway).await;

    assert!(session.is_initialized());
    assert!(!session.is_authenticated());
    assert!(session.access_token().is_none());
    assert_eq!(storage.load(ACCESS_KEY).unwrap(), None);
    assert_eq!(storage.load(REFRESH_KEY).unwrap(), None);
}

#[tokio::test]
async fn test_bootstrap_server_error_clears_credentials() {
    let storage = seeded("a1", "r1");
    let (server, gateway, session) = setup_with(storage, Duration::from_secs(8)).await;

    Mock::given(method("GET"))
        .and(path("/api/auth/me/"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    session.bootstrap(&gateway).await;

    assert!(session.is_initialized());
    assert!(!session.is_authenticated());
    assert!(session.refresh_token().is_none());
}

#[tokio::test]
async fn test_bootstrap_times_out_on_unresponsive_backend() {
    let storage = seeded("a1", "r1");
    let (server, gateway, session) = setup_with(storage, Duration::from_millis(200)).await;

    Mock::given(method("GET"))
        .and(path("/api/auth/me/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(alice(false))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let started = std::time::Instant::now();
    session.bootstrap(&gateway).await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(session.is_initialized());
    assert!(!session.is_authenticated());
    assert!(session.access_token().is_none());
}

#[tokio::test]
async fn test_bootstrap_without_stored_session_makes_no_request() {
    let (server, gateway, session) =
        setup_with(Arc::new(MemoryStorage::default()), Duration::from_secs(8)).await;

    Mock::given(any())
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let mut changes = session.subscribe();
    session.bootstrap(&gateway).await;

    assert!(session.is_initialized());
    assert!(!session.is_authenticated());
    assert!(changes.has_changed().unwrap());
    changes.mark_unchanged();

    // A second bootstrap does not re-announce initialization.
    session.bootstrap(&gateway).await;
    assert!(!changes.has_changed().unwrap());
}

// ── Login ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_login_persists_tokens_and_identity() {
    let storage = Arc::new(MemoryStorage::default());
    let (server, gateway, session) = setup_with(storage.clone(), Duration::from_secs(8)).await;

    Mock::given(method("POST"))
        .and(path("/api/auth/token/"))
        .and(body_json(json!({"username": "alice", "password": "pw"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"access": "a1", "refresh": "r1"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/auth/me/"))
        .and(header("authorization", "Bearer a1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(alice(false)))
        .mount(&server)
        .await;

    let identity = session.login(&gateway, "alice", &secret("pw")).await.unwrap();

    assert_eq!(identity.username, "alice");
    assert!(session.is_authenticated());
    assert!(!session.is_admin());
    assert_eq!(storage.load(ACCESS_KEY).unwrap().as_deref(), Some("a1"));
    assert_eq!(storage.load(REFRESH_KEY).unwrap().as_deref(), Some("r1"));
}

#[tokio::test]
async fn test_login_rejected_is_authentication_error() {
    let (server, gateway, session) =
        setup_with(Arc::new(MemoryStorage::default()), Duration::from_secs(8)).await;

    Mock::given(method("POST"))
        .and(path("/api/auth/token/"))
        .respond_with(ResponseTemplate::new(401).set_body_json(
            json!({"detail": "No active account found with the given credentials"}),
        ))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/token/refresh/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let result = session.login(&gateway, "alice", &secret("wrong")).await;

    match result {
        Err(Error::Authentication { message }) => {
            assert!(message.contains("No active account"));
        }
        other => panic!("expected Authentication error, got: {other:?}"),
    }
    assert!(!session.is_authenticated());
}

#[tokio::test]
async fn test_login_bad_request_is_authentication_error() {
    let (server, gateway, session) =
        setup_with(Arc::new(MemoryStorage::default()), Duration::from_secs(8)).await;

    Mock::given(method("POST"))
        .and(path("/api/auth/token/"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({"password": ["This field may not be blank."]})),
        )
        .mount(&server)
        .await;

    let result = session.login(&gateway, "alice", &secret("")).await;
    assert!(matches!(result, Err(Error::Authentication { .. })));
}

#[tokio::test]
async fn test_identity_failure_after_login_rolls_back() {
    let storage = Arc::new(MemoryStorage::default());
    let (server, gateway, session) = setup_with(storage.clone(), Duration::from_secs(8)).await;

    Mock::given(method("POST"))
        .and(path("/api/auth/token/"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"access": "a1", "refresh": "r1"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/auth/me/"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let result = session.login(&gateway, "alice", &secret("pw")).await;

    assert!(matches!(result, Err(Error::Http { status: 500, .. })));
    assert!(session.access_token().is_none());
    assert_eq!(storage.load(ACCESS_KEY).unwrap(), None);
    assert_eq!(storage.load(REFRESH_KEY).unwrap(), None);
}

// ── End to end ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_login_then_transparent_refresh() {
    let (server, gateway, session) =
        setup_with(Arc::new(MemoryStorage::default()), Duration::from_secs(8)).await;

    Mock::given(method("POST"))
        .and(path("/api/auth/token/"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"access": "a1", "refresh": "r1"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/auth/me/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(alice(false)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/alerts/"))
        .and(header("authorization", "Bearer a1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/alerts/"))
        .and(header("authorization", "Bearer a2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 9}])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/token/refresh/"))
        .and(body_json(json!({"refresh": "r1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access": "a2"})))
        .expect(1)
        .mount(&server)
        .await;

    session.login(&gateway, "alice", &secret("pw")).await.unwrap();
    assert!(session.is_authenticated());

    let alerts: Value = gateway.get("/api/alerts/").await.unwrap();

    assert_eq!(alerts[0]["id"], 9);
    assert!(session.is_authenticated());
    assert_eq!(session.access_token().unwrap().expose_secret(), "a2");
}

#[tokio::test]
async fn test_refresh_abandoned_by_bootstrap_does_not_leak_into_next_login() {
    let storage = seeded("a_old", "r_old");
    let (server, gateway, session) = setup_with(storage.clone(), Duration::from_millis(200)).await;

    // Bootstrap: the stored token is rejected and its refresh hangs.
    Mock::given(method("GET"))
        .and(path("/api/auth/me/"))
        .and(header("authorization", "Bearer a_old"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/token/refresh/"))
        .and(body_json(json!({"refresh": "r_old"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access": "a_stale"}))
                .set_delay(Duration::from_secs(1)),
        )
        .expect(1)
        .mount(&server)
        .await;

    session.bootstrap(&gateway).await;
    assert!(!session.is_authenticated());

    // A fresh login, then an expiry that needs its own refresh.
    Mock::given(method("POST"))
        .and(path("/api/auth/token/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access": "a_new", "refresh": "r_new"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/auth/me/"))
        .and(header("authorization", "Bearer a_new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(alice(false)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/scenes/"))
        .and(header("authorization", "Bearer a_new"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/scenes/"))
        .and(header("authorization", "Bearer a_fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/token/refresh/"))
        .and(body_json(json!({"refresh": "r_new"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access": "a_fresh"})))
        .expect(1)
        .mount(&server)
        .await;

    session.login(&gateway, "alice", &secret("pw")).await.unwrap();
    let scenes: Value = gateway.get("/api/scenes/").await.unwrap();
    assert_eq!(scenes, json!([]));
    assert_eq!(session.access_token().unwrap().expose_secret(), "a_fresh");

    // Let the abandoned exchange land; it must not touch the new session.
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert!(session.is_authenticated());
    assert_eq!(session.access_token().unwrap().expose_secret(), "a_fresh");
    assert_eq!(session.refresh_token().unwrap().expose_secret(), "r_new");
    assert_eq!(storage.load(ACCESS_KEY).unwrap().as_deref(), Some("a_fresh"));
}
