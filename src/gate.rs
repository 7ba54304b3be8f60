//! Request gate — per-request session resolution and entry-route redirects.
//!
//! SYSTEM CONTEXT
//! ==============
//! Runs as axum middleware in front of every route. Each request resolves
//! its own session from the token cookies it carries, through the auth
//! client, rather than reading the session store. Nothing shared is read or
//! written on this path, so one caller's sign-in never shows up on another
//! caller's request. The resolved session is attached to the request for
//! downstream handlers via [`RequestSession`].
//!
//! The only rule enforced: a request that already has a session and asks
//! for an entry-only page (login, registration) is sent to `/` instead.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use tracing::{debug, warn};

use crate::auth::{AuthClient, Session};

/// Routes meant only for visitors without a session.
pub const ENTRY_ONLY_PATHS: [&str; 2] = ["/login", "/register"];

/// Where signed-in visitors of an entry-only route are sent.
pub const REDIRECT_TARGET: &str = "/";

/// HttpOnly cookies carrying a caller's tokens.
pub const ACCESS_TOKEN_COOKIE: &str = "sb-access-token";
pub const REFRESH_TOKEN_COOKIE: &str = "sb-refresh-token";

/// Outcome of checking one request against the gate's rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Continue,
    Redirect(&'static str),
}

#[derive(Clone)]
pub struct RequestGate {
    client: Arc<dyn AuthClient>,
}

impl RequestGate {
    #[must_use]
    pub fn new(client: Arc<dyn AuthClient>) -> Self {
        Self { client }
    }

    /// Decide what to do with a request for `path`. Paths match exactly.
    #[must_use]
    pub fn decide(path: &str, session: Option<&Session>) -> GateDecision {
        if session.is_some() && is_entry_only(path) {
            GateDecision::Redirect(REDIRECT_TARGET)
        } else {
            GateDecision::Continue
        }
    }

    /// Resolve the session for one request from its token cookies. No
    /// cookies, a rejected token, or a failed lookup all count as no
    /// session.
    pub async fn resolve_session(&self, headers: &HeaderMap) -> Option<Session> {
        let jar = CookieJar::from_headers(headers);
        let access_token = jar.get(ACCESS_TOKEN_COOKIE).map(Cookie::value).filter(|t| !t.is_empty())?;
        let refresh_token = jar.get(REFRESH_TOKEN_COOKIE).map(Cookie::value).filter(|t| !t.is_empty())?;

        match self.client.session_for_tokens(access_token, refresh_token).await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "session fetch failed; treating request as anonymous");
                None
            }
        }
    }
}

#[must_use]
pub fn is_entry_only(path: &str) -> bool {
    ENTRY_ONLY_PATHS.contains(&path)
}

/// Middleware entry point; install with
/// `axum::middleware::from_fn_with_state(gate, intercept)`.
pub async fn intercept(State(gate): State<RequestGate>, request: Request, next: Next) -> Response {
    let (parts, body) = request.into_parts();
    let session = gate.resolve_session(&parts.headers).await;
    let mut request = Request::from_parts(parts, body);
    let decision = RequestGate::decide(request.uri().path(), session.as_ref());
    request.extensions_mut().insert(RequestSession(session));

    match decision {
        GateDecision::Redirect(target) => {
            debug!(path = %request.uri().path(), redirect_to = target, "signed-in request for entry-only route; redirecting");
            (StatusCode::FOUND, [(header::LOCATION, target)]).into_response()
        }
        GateDecision::Continue => next.run(request).await,
    }
}

// =============================================================================
// EXTRACTOR
// =============================================================================

/// Session resolved by the gate for the current request. `None` when the
/// request is anonymous or the gate did not run.
#[derive(Debug, Clone, Default)]
pub struct RequestSession(pub Option<Session>);

impl RequestSession {
    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.0.as_ref()
    }
}

impl<S> FromRequestParts<S> for RequestSession
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<Self>().cloned().unwrap_or_default())
    }
}

#[cfg(test)]
#[path = "gate_test.rs"]
mod tests;
