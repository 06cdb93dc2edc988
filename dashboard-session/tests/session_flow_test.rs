//! Integration tests for the session lifecycle against a mock dashboard API.
//!
//! These tests verify that:
//! - Restore resolves to a definite status for missing, valid and revoked tokens
//! - Normal and forced-password-change logins persist (or don't) the right token
//! - The change-password handshake ends in a full session after a fresh login
//! - Logout always clears the local session, even if the server call fails
//! - The route guard and navigation follow the session

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Form, Json, Router};
use dashboard_session::navigation::visible_items;
use dashboard_session::{
    BearerToken, DashboardApi, FileTokenStore, GuardDecision, LoginOutcome, RouteGuard,
    SessionStatus, SessionStore, TokenStorage,
};
use serde::Deserialize;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::oneshot;

#[derive(Debug, Clone)]
struct MockUser {
    password: String,
    is_admin: bool,
    force_password_change: bool,
}

#[derive(Debug, Clone)]
struct IssuedToken {
    email: String,
    restricted: bool,
}

/// In-memory stand-in for the dashboard backend.
#[derive(Default)]
struct MockApi {
    users: Mutex<HashMap<String, MockUser>>,
    tokens: Mutex<HashMap<String, IssuedToken>>,
    next_token: AtomicUsize,
    logout_calls: AtomicUsize,
    fail_logout: AtomicBool,
    fail_me: AtomicBool,
    me_delay_ms: AtomicU64,
}

impl MockApi {
    fn add_user(&self, email: &str, password: &str, is_admin: bool, force_password_change: bool) {
        self.users.lock().unwrap().insert(
            email.to_string(),
            MockUser {
                password: password.to_string(),
                is_admin,
                force_password_change,
            },
        );
    }

    fn add_token(&self, token: &str, email: &str) {
        self.tokens.lock().unwrap().insert(
            token.to_string(),
            IssuedToken {
                email: email.to_string(),
                restricted: false,
            },
        );
    }

    fn revoke_all(&self) {
        self.tokens.lock().unwrap().clear();
    }

    fn revoke(&self, token: &str) {
        self.tokens.lock().unwrap().remove(token);
    }

    fn require_password_change(&self, email: &str) {
        if let Some(user) = self.users.lock().unwrap().get_mut(email) {
            user.force_password_change = true;
        }
    }

    fn token_for(&self, headers: &HeaderMap) -> Option<IssuedToken> {
        let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
        let token = value.strip_prefix("Bearer ")?;
        self.tokens.lock().unwrap().get(token).cloned()
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"detail": "Invalid credentials (invalid token)"})),
    )
        .into_response()
}

#[derive(Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

async fn login(State(api): State<Arc<MockApi>>, Form(form): Form<LoginForm>) -> Response {
    let user = api.users.lock().unwrap().get(&form.username).cloned();
    let Some(user) = user.filter(|u| u.password == form.password) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "Wrong email or password"})),
        )
            .into_response();
    };

    let n = api.next_token.fetch_add(1, Ordering::SeqCst);
    let token = format!("token-{n}");
    api.tokens.lock().unwrap().insert(
        token.clone(),
        IssuedToken {
            email: form.username.clone(),
            restricted: user.force_password_change,
        },
    );

    Json(json!({
        "access_token": token,
        "token_type": "bearer",
        "force_password_change": user.force_password_change,
        "is_admin": user.is_admin,
    }))
    .into_response()
}

async fn me(State(api): State<Arc<MockApi>>, headers: HeaderMap) -> Response {
    let delay = api.me_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    if api.fail_me.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    let Some(token) = api.token_for(&headers).filter(|t| !t.restricted) else {
        return unauthorized();
    };
    let user = api.users.lock().unwrap().get(&token.email).cloned();
    let Some(user) = user else {
        return unauthorized();
    };
    Json(json!({
        "id": 1,
        "email": token.email,
        "is_active": true,
        "is_admin": user.is_admin,
        "created_at": "2025-01-01T10:00:00",
    }))
    .into_response()
}

async fn logout(State(api): State<Arc<MockApi>>, headers: HeaderMap) -> Response {
    api.logout_calls.fetch_add(1, Ordering::SeqCst);
    if api.fail_logout.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    if api.token_for(&headers).is_none() {
        return unauthorized();
    }
    Json(json!({"message": "Logout logged successfully"})).into_response()
}

#[derive(Deserialize)]
struct PasswordChangeBody {
    old_password: String,
    new_password: String,
}

async fn change_password(
    State(api): State<Arc<MockApi>>,
    headers: HeaderMap,
    Json(body): Json<PasswordChangeBody>,
) -> Response {
    let Some(token) = api.token_for(&headers) else {
        return unauthorized();
    };
    let mut users = api.users.lock().unwrap();
    let Some(user) = users.get_mut(&token.email) else {
        return unauthorized();
    };
    if user.password != body.old_password {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"detail": "Old password is not correct."})),
        )
            .into_response();
    }
    user.password = body.new_password;
    user.force_password_change = false;
    Json(json!({"message": "Password changed"})).into_response()
}

/// Test fixture running the mock API and owning a token directory.
struct TestFixture {
    temp_dir: TempDir,
    api: Arc<MockApi>,
    server_addr: SocketAddr,
    /// Channel for signaling server shutdown
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl TestFixture {
    async fn new() -> Self {
        let api = Arc::new(MockApi::default());
        api.add_user("admin@example.com", "admin-pass", true, false);
        api.add_user("editor@example.com", "editor-pass", false, false);
        api.add_user("new@example.com", "temp-pass", false, true);

        let app = Router::new()
            .route("/api/auth/login", post(login))
            .route("/api/auth/me", get(me))
            .route("/api/auth/logout", post(logout))
            .route("/api/auth/me/password", patch(change_password))
            .with_state(api.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap();
        });

        Self {
            temp_dir: TempDir::new().unwrap(),
            api,
            server_addr,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    fn token_store(&self) -> FileTokenStore {
        FileTokenStore::new(self.temp_dir.path().join("dashctl"))
    }

    /// A fresh session store, as if the process had just started.
    fn session_store(&self) -> SessionStore {
        let base_url = format!("http://{}/api", self.server_addr);
        let api = DashboardApi::new(base_url, false, None).unwrap();
        SessionStore::new(Arc::new(api), self.token_store())
    }

    fn stored_token(&self) -> Option<BearerToken> {
        self.token_store().load().unwrap()
    }
}

impl Drop for TestFixture {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[tokio::test]
async fn test_restore_without_token() {
    let fixture = TestFixture::new().await;
    let store = fixture.session_store();
    let guard = RouteGuard::new(store.subscribe());

    assert_eq!(guard.decide(), GuardDecision::Placeholder);
    assert_eq!(store.restore().await, SessionStatus::Anonymous);
    assert!(store.snapshot().user.is_none());
    assert_eq!(
        guard.decide(),
        GuardDecision::Redirect {
            to: "/login",
            replace: true
        }
    );
}

#[tokio::test]
async fn test_restore_with_valid_token_shows_admin_navigation() {
    let fixture = TestFixture::new().await;
    fixture.api.add_user("a@b.com", "pw", true, false);
    fixture.api.add_token("abc", "a@b.com");
    fixture.token_store().save(&BearerToken::new("abc")).unwrap();

    let store = fixture.session_store();
    let mut guard = RouteGuard::new(store.subscribe());

    assert_eq!(store.restore().await, SessionStatus::Authenticated);
    assert_eq!(guard.resolve().await, GuardDecision::Render);

    let session = store.snapshot();
    let user = session.user.as_ref().unwrap();
    assert_eq!(user.email, "a@b.com");
    assert!(user.is_admin);

    let paths: Vec<_> = visible_items(&session).iter().map(|i| i.path).collect();
    assert!(paths.contains(&"/admin/users"));
    assert!(paths.contains(&"/admin/messages"));
}

#[tokio::test]
async fn test_restore_with_revoked_token_clears_it() {
    let fixture = TestFixture::new().await;
    fixture
        .token_store()
        .save(&BearerToken::new("expired"))
        .unwrap();

    let store = fixture.session_store();
    assert_eq!(store.restore().await, SessionStatus::Anonymous);
    assert!(fixture.stored_token().is_none());
}

#[tokio::test]
async fn test_login_normal_persists_token() {
    let fixture = TestFixture::new().await;
    let store = fixture.session_store();
    store.restore().await;

    let outcome = store
        .login("editor@example.com", "editor-pass")
        .await
        .unwrap();
    let LoginOutcome::Authenticated(user) = outcome else {
        panic!("expected a full session, got {outcome:?}");
    };
    assert_eq!(user.email, "editor@example.com");
    assert!(!user.is_admin);

    assert_eq!(store.status(), SessionStatus::Authenticated);
    assert!(fixture.stored_token().is_some());

    // Non-admins don't see admin entries
    let paths: Vec<_> = visible_items(&store.snapshot())
        .iter()
        .map(|i| i.path)
        .collect();
    assert!(!paths.contains(&"/admin/users"));
}

#[tokio::test]
async fn test_login_survives_restart() {
    let fixture = TestFixture::new().await;
    let first = fixture.session_store();
    first.restore().await;
    first
        .login("admin@example.com", "admin-pass")
        .await
        .unwrap();

    let second = fixture.session_store();
    assert_eq!(second.restore().await, SessionStatus::Authenticated);
    assert_eq!(
        second.snapshot().user.map(|u| u.email),
        Some("admin@example.com".to_string())
    );
}

#[tokio::test]
async fn test_login_rejected_leaves_session_untouched() {
    let fixture = TestFixture::new().await;
    let store = fixture.session_store();
    let guard = RouteGuard::new(store.subscribe());
    store.restore().await;

    let failure = store.login("u@x.com", "wrong").await.unwrap_err();
    assert!(!failure.message.is_empty());
    assert_eq!(failure.message, "Wrong email or password");

    assert_eq!(store.status(), SessionStatus::Anonymous);
    assert!(fixture.stored_token().is_none());
    assert!(matches!(guard.decide(), GuardDecision::Redirect { .. }));
}

#[tokio::test]
async fn test_forced_change_does_not_persist_token() {
    let fixture = TestFixture::new().await;
    let store = fixture.session_store();
    let guard = RouteGuard::new(store.subscribe());
    store.restore().await;

    let outcome = store.login("new@example.com", "temp-pass").await.unwrap();
    let LoginOutcome::PasswordChangeRequired(token) = outcome else {
        panic!("expected a forced password change, got {outcome:?}");
    };

    assert_eq!(store.status(), SessionStatus::PasswordChangeRequired);
    assert!(store.snapshot().user.is_none());
    assert_eq!(store.restricted_token(), Some(token));
    assert!(fixture.stored_token().is_none());
    assert!(matches!(guard.decide(), GuardDecision::Redirect { .. }));
}

#[tokio::test]
async fn test_change_password_with_wrong_old_password() {
    let fixture = TestFixture::new().await;
    let store = fixture.session_store();
    store.restore().await;

    let LoginOutcome::PasswordChangeRequired(token) =
        store.login("new@example.com", "temp-pass").await.unwrap()
    else {
        panic!("expected a forced password change");
    };

    assert!(!store.change_password(&token, "not-it", "brand-new").await);
    assert_eq!(store.status(), SessionStatus::PasswordChangeRequired);
    assert!(store.restricted_token().is_some());
    assert!(fixture.stored_token().is_none());

    // A retry with the right password still works
    assert!(store.change_password(&token, "temp-pass", "brand-new").await);
}

#[tokio::test]
async fn test_change_password_then_login_again() {
    let fixture = TestFixture::new().await;
    let store = fixture.session_store();
    let guard = RouteGuard::new(store.subscribe());
    store.restore().await;

    let LoginOutcome::PasswordChangeRequired(token) =
        store.login("new@example.com", "temp-pass").await.unwrap()
    else {
        panic!("expected a forced password change");
    };

    assert!(store.change_password(&token, "temp-pass", "brand-new").await);
    assert!(store.restricted_token().is_none());
    // Changing the password alone doesn't create a session
    assert!(fixture.stored_token().is_none());

    let outcome = store.login("new@example.com", "brand-new").await.unwrap();
    assert!(matches!(outcome, LoginOutcome::Authenticated(_)));
    assert_eq!(store.status(), SessionStatus::Authenticated);
    assert!(fixture.stored_token().is_some());
    assert_eq!(guard.decide(), GuardDecision::Render);
}

#[tokio::test]
async fn test_logout_notifies_server_and_clears_session() {
    let fixture = TestFixture::new().await;
    let store = fixture.session_store();
    store.restore().await;
    store
        .login("admin@example.com", "admin-pass")
        .await
        .unwrap();

    store.logout().await;

    assert_eq!(fixture.api.logout_calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.status(), SessionStatus::Anonymous);
    assert!(store.snapshot().user.is_none());
    assert!(fixture.stored_token().is_none());
}

#[tokio::test]
async fn test_logout_clears_session_when_server_fails() {
    let fixture = TestFixture::new().await;
    let store = fixture.session_store();
    store.restore().await;
    store
        .login("admin@example.com", "admin-pass")
        .await
        .unwrap();

    fixture.api.fail_logout.store(true, Ordering::SeqCst);
    store.logout().await;

    assert_eq!(fixture.api.logout_calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.status(), SessionStatus::Anonymous);
    assert!(fixture.stored_token().is_none());
}

#[tokio::test]
async fn test_revoked_token_during_use_ends_session() {
    let fixture = TestFixture::new().await;
    let store = fixture.session_store();
    let mut guard = RouteGuard::new(store.subscribe());
    store.restore().await;
    store
        .login("admin@example.com", "admin-pass")
        .await
        .unwrap();
    assert_eq!(guard.resolve().await, GuardDecision::Render);

    fixture.api.revoke_all();
    let err = store.refresh_identity().await.unwrap_err();
    assert!(err.is_auth_error());

    assert_eq!(store.status(), SessionStatus::Anonymous);
    assert!(fixture.stored_token().is_none());
    assert!(matches!(
        guard.changed().await,
        Some(GuardDecision::Redirect { .. })
    ));
}

#[tokio::test]
async fn test_identity_failure_after_login_restores_previous_token() {
    let fixture = TestFixture::new().await;
    let store = fixture.session_store();
    store.restore().await;
    store
        .login("admin@example.com", "admin-pass")
        .await
        .unwrap();
    let before = fixture.stored_token();
    assert!(before.is_some());

    fixture.api.fail_me.store(true, Ordering::SeqCst);
    let failure = store
        .login("editor@example.com", "editor-pass")
        .await
        .unwrap_err();
    assert_eq!(failure.message, "Login failed");

    assert_eq!(store.status(), SessionStatus::Authenticated);
    assert_eq!(
        store.snapshot().user.map(|u| u.email),
        Some("admin@example.com".to_string())
    );
    assert_eq!(fixture.stored_token(), before);
}

#[tokio::test]
async fn test_identity_failure_on_first_login_leaves_nothing_stored() {
    let fixture = TestFixture::new().await;
    let store = fixture.session_store();
    store.restore().await;

    fixture.api.fail_me.store(true, Ordering::SeqCst);
    assert!(
        store
            .login("editor@example.com", "editor-pass")
            .await
            .is_err()
    );
    assert_eq!(store.status(), SessionStatus::Anonymous);
    assert!(fixture.stored_token().is_none());
}

#[tokio::test]
async fn test_forced_change_clears_stored_token() {
    let fixture = TestFixture::new().await;
    let store = fixture.session_store();
    store.restore().await;
    store
        .login("editor@example.com", "editor-pass")
        .await
        .unwrap();
    assert!(fixture.stored_token().is_some());

    fixture.api.require_password_change("editor@example.com");
    let outcome = store
        .login("editor@example.com", "editor-pass")
        .await
        .unwrap();

    assert!(matches!(outcome, LoginOutcome::PasswordChangeRequired(_)));
    assert_eq!(store.status(), SessionStatus::PasswordChangeRequired);
    assert!(store.snapshot().user.is_none());
    assert!(fixture.stored_token().is_none());
}

#[tokio::test]
async fn test_rejection_of_replaced_token_keeps_new_session() {
    let fixture = TestFixture::new().await;
    let store = fixture.session_store();
    store.restore().await;
    store
        .login("admin@example.com", "admin-pass")
        .await
        .unwrap();

    let store_ref = &store;
    let api_state = fixture.api.clone();
    let err = store
        .with_credential(|api, old_token| async move {
            // The user logs in again while this call is in flight
            api_state.revoke(old_token.as_str());
            store_ref
                .login("editor@example.com", "editor-pass")
                .await
                .unwrap();
            api.me(&old_token).await
        })
        .await
        .unwrap_err();
    assert!(err.is_auth_error());

    assert_eq!(store.status(), SessionStatus::Authenticated);
    assert_eq!(
        store.snapshot().user.map(|u| u.email),
        Some("editor@example.com".to_string())
    );
    assert!(fixture.stored_token().is_some());
    assert!(store.refresh_identity().await.is_ok());
}

#[tokio::test]
async fn test_logout_during_restore_wins() {
    let fixture = TestFixture::new().await;
    fixture.api.add_user("a@b.com", "pw", true, false);
    fixture.api.add_token("abc", "a@b.com");
    fixture.token_store().save(&BearerToken::new("abc")).unwrap();
    fixture.api.me_delay_ms.store(300, Ordering::SeqCst);

    let store = fixture.session_store();
    let (restored, ()) = tokio::join!(store.restore(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.logout().await;
    });

    assert_eq!(restored, SessionStatus::Anonymous);
    assert_eq!(store.status(), SessionStatus::Anonymous);
    assert!(store.snapshot().user.is_none());
    assert!(fixture.stored_token().is_none());
}
