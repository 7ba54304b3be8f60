//! Auth routes — password sign-in, registration, callback session
//! detection, session and user readout, and logout.
//!
//! Sign-in, registration and the callback hand the caller its tokens as
//! HttpOnly cookies; the gate resolves later requests from those cookies.
//! Session, user and logout act only for the caller the gate resolved.

use axum::extract::State;
use axum::http::{StatusCode, Uri, header};
use axum::response::{IntoResponse, Json, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use time::Duration;
use url::Url;

use crate::auth::{AuthError, Session, User};
use crate::gate::{ACCESS_TOKEN_COOKIE, REDIRECT_TARGET, REFRESH_TOKEN_COOKIE, RequestSession};
use crate::state::AppState;

/// Base used to turn a request's origin-form URI into an absolute URL.
const CALLBACK_BASE: &str = "http://localhost";

pub(crate) fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .and_then(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
}

/// Token cookies carry the `Secure` flag when `COOKIE_SECURE` is on.
pub(crate) fn cookie_secure() -> bool {
    env_bool("COOKIE_SECURE").unwrap_or(false)
}

fn token_cookie(name: &'static str, value: String, max_age: Option<Duration>) -> Cookie<'static> {
    let mut cookie = Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(cookie_secure());
    if let Some(max_age) = max_age {
        cookie = cookie.max_age(max_age);
    }
    cookie.build()
}

/// Hand `session`'s tokens to the caller. The access cookie lives as long
/// as the access token.
pub(crate) fn with_session_cookies(jar: CookieJar, session: &Session) -> CookieJar {
    let max_age = session.expires_in.filter(|secs| *secs > 0).map(Duration::seconds);
    jar.add(token_cookie(ACCESS_TOKEN_COOKIE, session.access_token.clone(), max_age))
        .add(token_cookie(REFRESH_TOKEN_COOKIE, session.refresh_token.clone(), None))
}

pub(crate) fn without_session_cookies(jar: CookieJar) -> CookieJar {
    jar.add(token_cookie(ACCESS_TOKEN_COOKIE, String::new(), Some(Duration::ZERO)))
        .add(token_cookie(REFRESH_TOKEN_COOKIE, String::new(), Some(Duration::ZERO)))
}

#[derive(Deserialize)]
pub struct Credentials {
    email: String,
    password: String,
}

/// Body of `GET /api/auth/session`. Tokens stay in cookies.
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub authenticated: bool,
    pub user: Option<User>,
}

/// Status for a failed call to the auth service. Service rejections map to
/// `rejected`; everything else is a bad gateway.
fn failure_status(err: &AuthError, rejected: StatusCode) -> StatusCode {
    match err {
        AuthError::InvalidCredentials(_) => rejected,
        AuthError::Api { status, .. } if (400..500).contains(status) && !err.is_transient() => rejected,
        _ => StatusCode::BAD_GATEWAY,
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

/// `POST /login` — sign in with email and password.
pub async fn login(State(state): State<AppState>, jar: CookieJar, Json(body): Json<Credentials>) -> Response {
    match state.accounts.sign_in_with_password(&body.email, &body.password).await {
        Ok(session) => (with_session_cookies(jar, &session), StatusCode::NO_CONTENT).into_response(),
        Err(e) => {
            let status = failure_status(&e, StatusCode::UNAUTHORIZED);
            if status == StatusCode::BAD_GATEWAY {
                tracing::error!(error = %e, "password sign-in failed");
            } else {
                tracing::info!(email = %body.email, "sign-in rejected");
            }
            (status, "sign-in failed").into_response()
        }
    }
}

/// `POST /register` — create an account. `202` while the address awaits
/// confirmation.
pub async fn register(State(state): State<AppState>, jar: CookieJar, Json(body): Json<Credentials>) -> Response {
    match state.accounts.sign_up(&body.email, &body.password).await {
        Ok(Some(session)) => (with_session_cookies(jar, &session), StatusCode::CREATED).into_response(),
        Ok(None) => (StatusCode::ACCEPTED, "check your email to confirm the account").into_response(),
        Err(e) => {
            let status = failure_status(&e, StatusCode::BAD_REQUEST);
            tracing::error!(error = %e, status = status.as_u16(), "sign-up failed");
            (status, "registration failed").into_response()
        }
    }
}

/// `GET /auth/callback` — adopt the session handed over in the callback
/// URL, then send the visitor home.
pub async fn callback(State(state): State<AppState>, jar: CookieJar, uri: Uri) -> Response {
    let url = match Url::parse(CALLBACK_BASE).and_then(|base| base.join(&uri.to_string())) {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!(error = %e, "unparseable callback uri");
            return (StatusCode::BAD_REQUEST, "invalid callback").into_response();
        }
    };

    match state.accounts.detect_session_in_url(&url).await {
        Ok(Some(session)) => {
            (StatusCode::FOUND, with_session_cookies(jar, &session), [(header::LOCATION, REDIRECT_TARGET)]).into_response()
        }
        Ok(None) => (StatusCode::BAD_REQUEST, "callback carried no session").into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "callback session detection failed");
            (StatusCode::BAD_REQUEST, "invalid callback").into_response()
        }
    }
}

/// `GET /api/auth/session` — the caller's session as the gate resolved it.
pub async fn session(session: RequestSession) -> Json<SessionView> {
    let user = session.session().map(|s| s.user.clone());
    Json(SessionView { authenticated: user.is_some(), user })
}

/// `GET /api/auth/user` — the caller's user as the service reports it.
pub async fn user(State(state): State<AppState>, session: RequestSession) -> Result<Json<User>, StatusCode> {
    let Some(session) = session.session() else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    match state.accounts.get_user(&session.access_token).await {
        Ok(user) => Ok(Json(user)),
        Err(e) => {
            tracing::error!(error = %e, "user lookup failed");
            Err(failure_status(&e, StatusCode::UNAUTHORIZED))
        }
    }
}

/// `POST /api/auth/logout` — revoke the caller's token and clear its cookies.
pub async fn logout(State(state): State<AppState>, jar: CookieJar, session: RequestSession) -> Response {
    let Some(session) = session.session() else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    match state.accounts.sign_out_token(&session.access_token).await {
        Ok(()) => (without_session_cookies(jar), StatusCode::NO_CONTENT).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "error logging out");
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
