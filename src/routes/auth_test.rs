use super::*;
use crate::auth::test_helpers::{MOCK_PASSWORD, MockAuthClient, sample_session};
use crate::routes::app;
use crate::state::test_helpers::test_app_state;
use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tower::ServiceExt;

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: String,
}

impl Reply {
    /// `Cookie` header value a browser would send back after this reply.
    fn cookies(&self) -> String {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok()?.split(';').next().map(str::to_owned))
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn set_cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.starts_with(&format!("{name}=")))
            .map(str::to_owned)
    }

    fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

async fn call(app: Router, method: Method, path: &str, cookies: Option<&str>, body: Option<serde_json::Value>) -> Reply {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(cookies) = cookies {
        builder = builder.header(header::COOKIE, cookies);
    }
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app.oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    Reply { status, headers, body: String::from_utf8(bytes.to_vec()).unwrap() }
}

fn credentials(email: &str, password: &str) -> serde_json::Value {
    serde_json::json!({ "email": email, "password": password })
}

fn cookies_for(session: &Session) -> String {
    format!("{ACCESS_TOKEN_COOKIE}={}; {REFRESH_TOKEN_COOKIE}={}", session.access_token, session.refresh_token)
}

async fn login_as(router: &Router, email: &str) -> String {
    let reply = call(router.clone(), Method::POST, "/login", None, Some(credentials(email, MOCK_PASSWORD))).await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    reply.cookies()
}

// =============================================================================
// env_bool — uses unique env var names to avoid races with parallel tests.
// =============================================================================

#[test]
fn env_bool_true_and_false_variants() {
    for (i, (val, expected)) in [("1", true), ("yes", true), ("On", true), ("0", false), ("FALSE", false), ("off", false)]
        .iter()
        .enumerate()
    {
        let key = format!("__TEST_SG_EB_{i}__");
        unsafe { std::env::set_var(&key, val) };
        assert_eq!(env_bool(&key), Some(*expected), "value {val:?}");
        unsafe { std::env::remove_var(&key) };
    }
}

#[test]
fn env_bool_invalid_or_unset_is_none() {
    let key = "__TEST_SG_EB_INVALID__";
    unsafe { std::env::set_var(key, "maybe") };
    assert_eq!(env_bool(key), None);
    unsafe { std::env::remove_var(key) };
    assert_eq!(env_bool("__TEST_SG_EB_SURELY_UNSET__"), None);
}

// =============================================================================
// cookies
// =============================================================================

#[test]
fn session_cookies_are_http_only_and_scoped_to_root() {
    let session = sample_session("user@example.com");
    let jar = with_session_cookies(CookieJar::new(), &session);

    let access = jar.get(ACCESS_TOKEN_COOKIE).unwrap();
    assert_eq!(access.value(), session.access_token);
    assert_eq!(access.http_only(), Some(true));
    assert_eq!(access.path(), Some("/"));
    assert_eq!(access.same_site(), Some(SameSite::Lax));
    assert_eq!(access.max_age(), Some(Duration::seconds(3600)));
    assert_eq!(jar.get(REFRESH_TOKEN_COOKIE).unwrap().value(), session.refresh_token);
}

#[test]
fn cleared_cookies_expire_immediately() {
    let jar = without_session_cookies(CookieJar::new());

    for name in [ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE] {
        let cookie = jar.get(name).unwrap();
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.max_age(), Some(Duration::ZERO));
    }
}

// =============================================================================
// failure_status
// =============================================================================

#[test]
fn failure_status_maps_rejections_and_outages() {
    let rejected = StatusCode::UNAUTHORIZED;
    assert_eq!(failure_status(&AuthError::InvalidCredentials("bad".into()), rejected), rejected);
    assert_eq!(failure_status(&AuthError::Api { status: 422, body: String::new() }, rejected), rejected);
    assert_eq!(failure_status(&AuthError::Api { status: 429, body: String::new() }, rejected), StatusCode::BAD_GATEWAY);
    assert_eq!(failure_status(&AuthError::Api { status: 503, body: String::new() }, rejected), StatusCode::BAD_GATEWAY);
    assert_eq!(failure_status(&AuthError::Transport("refused".into()), rejected), StatusCode::BAD_GATEWAY);
}

// =============================================================================
// POST /login
// =============================================================================

#[tokio::test]
async fn login_with_valid_password_sets_token_cookies() {
    let client = Arc::new(MockAuthClient::default());
    let router = app(test_app_state(client));

    let reply = call(router, Method::POST, "/login", None, Some(credentials("user@example.com", MOCK_PASSWORD))).await;

    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    let access = reply.set_cookie(ACCESS_TOKEN_COOKIE).expect("access cookie");
    assert!(access.contains("at-user@example.com"));
    assert!(access.contains("HttpOnly"));
    assert!(reply.set_cookie(REFRESH_TOKEN_COOKIE).is_some());
}

#[tokio::test]
async fn login_with_wrong_password_is_unauthorized() {
    let client = Arc::new(MockAuthClient::default());
    let router = app(test_app_state(client.clone()));

    let reply = call(router, Method::POST, "/login", None, Some(credentials("user@example.com", "nope"))).await;

    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert!(reply.set_cookie(ACCESS_TOKEN_COOKIE).is_none());
    assert!(client.session.lock().unwrap().is_none());
}

#[tokio::test]
async fn login_post_with_session_cookies_is_redirected() {
    let client = Arc::new(MockAuthClient::default());
    let session = client.issue(sample_session("user@example.com"));
    let router = app(test_app_state(client));

    let reply = call(
        router,
        Method::POST,
        "/login",
        Some(&cookies_for(&session)),
        Some(credentials("other@example.com", MOCK_PASSWORD)),
    )
    .await;

    assert_eq!(reply.status, StatusCode::FOUND);
    assert_eq!(reply.headers.get(header::LOCATION).unwrap(), "/");
}

#[tokio::test]
async fn entry_page_redirects_only_the_caller_who_logged_in() {
    let client = Arc::new(MockAuthClient::default());
    let router = app(test_app_state(client));

    let cookies = login_as(&router, "alice@example.com").await;

    let signed_in = call(router.clone(), Method::GET, "/login", Some(&cookies), None).await;
    assert_eq!(signed_in.status, StatusCode::FOUND);
    assert_eq!(signed_in.headers.get(header::LOCATION).unwrap(), "/");

    let anonymous = call(router, Method::GET, "/login", None, None).await;
    assert_eq!(anonymous.status, StatusCode::OK);
}

#[tokio::test]
async fn another_callers_login_grants_nothing_to_anonymous_requests() {
    let client = Arc::new(MockAuthClient::default());
    let router = app(test_app_state(client.clone()));
    let alice = login_as(&router, "alice@example.com").await;

    let page = call(router.clone(), Method::GET, "/login", None, None).await;
    assert_eq!(page.status, StatusCode::OK);

    let user = call(router.clone(), Method::GET, "/api/auth/user", None, None).await;
    assert_eq!(user.status, StatusCode::UNAUTHORIZED);
    assert!(!user.body.contains("alice@example.com"));

    let greeting = call(router.clone(), Method::GET, "/", None, None).await;
    assert_eq!(greeting.body, "Hello, anonymous");

    let session = call(router.clone(), Method::GET, "/api/auth/session", None, None).await;
    assert_eq!(session.json()["authenticated"], false);

    let logout = call(router.clone(), Method::POST, "/api/auth/logout", None, None).await;
    assert_eq!(logout.status, StatusCode::UNAUTHORIZED);
    assert_eq!(client.sign_out_calls.load(Ordering::SeqCst), 0);

    let still_alice = call(router, Method::GET, "/api/auth/session", Some(&alice), None).await;
    assert_eq!(still_alice.json()["user"]["email"], "alice@example.com");
}

#[tokio::test]
async fn two_callers_resolve_independently() {
    let client = Arc::new(MockAuthClient::default());
    let router = app(test_app_state(client));
    let alice = login_as(&router, "alice@example.com").await;
    let bob = login_as(&router, "bob@example.com").await;

    let as_alice = call(router.clone(), Method::GET, "/api/auth/user", Some(&alice), None).await;
    let as_bob = call(router, Method::GET, "/api/auth/user", Some(&bob), None).await;

    assert_eq!(as_alice.json()["email"], "alice@example.com");
    assert_eq!(as_bob.json()["email"], "bob@example.com");
}

// =============================================================================
// POST /register
// =============================================================================

#[tokio::test]
async fn register_with_session_is_created_with_cookies() {
    let client = Arc::new(MockAuthClient::default());
    let router = app(test_app_state(client));

    let reply = call(router, Method::POST, "/register", None, Some(credentials("new@example.com", MOCK_PASSWORD))).await;

    assert_eq!(reply.status, StatusCode::CREATED);
    assert!(reply.set_cookie(ACCESS_TOKEN_COOKIE).is_some());
}

#[tokio::test]
async fn register_pending_confirmation_is_accepted() {
    let client = Arc::new(MockAuthClient::default());
    let router = app(test_app_state(client.clone()));

    let reply =
        call(router, Method::POST, "/register", None, Some(credentials("confirm@example.com", MOCK_PASSWORD))).await;

    assert_eq!(reply.status, StatusCode::ACCEPTED);
    assert!(reply.body.contains("confirm"));
    assert!(reply.set_cookie(ACCESS_TOKEN_COOKIE).is_none());
    assert!(client.session.lock().unwrap().is_none());
}

#[tokio::test]
async fn register_rejected_is_bad_request() {
    let client = Arc::new(MockAuthClient::default());
    let router = app(test_app_state(client));

    let reply = call(router, Method::POST, "/register", None, Some(credentials("new@example.com", "short"))).await;

    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
}

// =============================================================================
// GET /auth/callback
// =============================================================================

#[tokio::test]
async fn callback_with_token_redirects_home_with_cookies() {
    let client = Arc::new(MockAuthClient::default());
    let router = app(test_app_state(client.clone()));

    let reply = call(router, Method::GET, "/auth/callback?access_token=at-callback&refresh_token=rt", None, None).await;

    assert_eq!(reply.status, StatusCode::FOUND);
    assert_eq!(reply.headers.get(header::LOCATION).unwrap(), "/");
    assert!(reply.set_cookie(ACCESS_TOKEN_COOKIE).unwrap().contains("at-callback"));
    let held = client.session.lock().unwrap().clone().unwrap();
    assert_eq!(held.access_token, "at-callback");
}

#[tokio::test]
async fn callback_without_token_is_bad_request() {
    let client = Arc::new(MockAuthClient::default());
    let router = app(test_app_state(client));

    let reply = call(router, Method::GET, "/auth/callback", None, None).await;

    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
}

// =============================================================================
// GET /api/auth/session
// =============================================================================

#[tokio::test]
async fn session_view_for_signed_in_caller_hides_tokens() {
    let client = Arc::new(MockAuthClient::default());
    let session = client.issue(sample_session("user@example.com"));
    let router = app(test_app_state(client));

    let reply = call(router, Method::GET, "/api/auth/session", Some(&cookies_for(&session)), None).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json()["authenticated"], true);
    assert_eq!(reply.json()["user"]["email"], "user@example.com");
    assert!(!reply.body.contains(&session.access_token));
    assert!(!reply.body.contains(&session.refresh_token));
}

#[tokio::test]
async fn session_view_for_anonymous_caller() {
    let client = Arc::new(MockAuthClient::with_session(Some(sample_session("held@example.com"))));
    let router = app(test_app_state(client));

    let reply = call(router, Method::GET, "/api/auth/session", None, None).await;

    assert_eq!(reply.json()["authenticated"], false);
    assert!(reply.json()["user"].is_null());
}

// =============================================================================
// GET /api/auth/user
// =============================================================================

#[tokio::test]
async fn user_lookup_returns_callers_user() {
    let client = Arc::new(MockAuthClient::default());
    let session = client.issue(sample_session("user@example.com"));
    let router = app(test_app_state(client));

    let reply = call(router, Method::GET, "/api/auth/user", Some(&cookies_for(&session)), None).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json()["email"], "user@example.com");
}

#[tokio::test]
async fn user_lookup_without_cookies_is_unauthorized() {
    let client = Arc::new(MockAuthClient::with_session(Some(sample_session("held@example.com"))));
    let router = app(test_app_state(client));

    let reply = call(router, Method::GET, "/api/auth/user", None, None).await;

    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}

// =============================================================================
// POST /api/auth/logout
// =============================================================================

#[tokio::test]
async fn logout_revokes_callers_token_and_clears_cookies() {
    let client = Arc::new(MockAuthClient::default());
    let router = app(test_app_state(client.clone()));
    let cookies = login_as(&router, "user@example.com").await;

    let reply = call(router.clone(), Method::POST, "/api/auth/logout", Some(&cookies), None).await;

    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    assert_eq!(client.sign_out_calls.load(Ordering::SeqCst), 1);
    assert!(reply.set_cookie(ACCESS_TOKEN_COOKIE).unwrap().contains("Max-Age=0"));

    let after = call(router, Method::GET, "/api/auth/session", Some(&cookies), None).await;
    assert_eq!(after.json()["authenticated"], false);
}

#[tokio::test]
async fn logout_leaves_other_callers_signed_in() {
    let client = Arc::new(MockAuthClient::default());
    let router = app(test_app_state(client));
    let alice = login_as(&router, "alice@example.com").await;
    let bob = login_as(&router, "bob@example.com").await;

    call(router.clone(), Method::POST, "/api/auth/logout", Some(&bob), None).await;

    let reply = call(router, Method::GET, "/api/auth/session", Some(&alice), None).await;
    assert_eq!(reply.json()["authenticated"], true);
}

#[tokio::test]
async fn logout_failure_is_bad_gateway_and_keeps_session() {
    let client = Arc::new(MockAuthClient::default());
    let session = client.issue(sample_session("user@example.com"));
    *client.fail_sign_out.lock().unwrap() = Some("service unavailable".into());
    let router = app(test_app_state(client));
    let cookies = cookies_for(&session);

    let reply = call(router.clone(), Method::POST, "/api/auth/logout", Some(&cookies), None).await;

    assert_eq!(reply.status, StatusCode::BAD_GATEWAY);
    assert!(reply.set_cookie(ACCESS_TOKEN_COOKIE).is_none());
    let after = call(router, Method::GET, "/api/auth/session", Some(&cookies), None).await;
    assert_eq!(after.json()["authenticated"], true);
}
