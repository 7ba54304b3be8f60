//! Hosted auth service client — password sign-in, sign-up, sign-out, user
//! lookup, and callback-URL session detection against `/auth/v1/*`.
//!
//! DESIGN
//! ======
//! The client owns the session. It keeps the signed-in session in memory
//! (when `persist_session` is on) and announces every change to its
//! subscribers. Token refresh is left to the service; an expired session is
//! dropped on the next `fetch_session` and reported as a sign-out.
//!
//! Calls made on behalf of one HTTP caller (`session_for_tokens`,
//! `get_user`, `sign_out_token`) take that caller's access token and only
//! touch the held session when it carries the same token.
//!
//! Pure parsing lives in `parse_session_body` and `url_session_params` for
//! testability.

use std::sync::{RwLock, RwLockWriteGuard};
use std::time::Duration;

use tracing::{debug, info, warn};
use url::Url;

use super::client::{AccountClient, AuthClient, Subscribers, Subscription};
use super::types::{AuthError, AuthEvent, Session, User};
use crate::config::AuthConfig;

const TOKEN_PATH: &str = "/auth/v1/token";
const SIGNUP_PATH: &str = "/auth/v1/signup";
const USER_PATH: &str = "/auth/v1/user";
const LOGOUT_PATH: &str = "/auth/v1/logout";

// =============================================================================
// CLIENT
// =============================================================================

pub struct SupabaseAuthClient {
    http: reqwest::Client,
    config: AuthConfig,
    session: RwLock<Option<Session>>,
    subscribers: Subscribers,
}

impl SupabaseAuthClient {
    /// Build a client from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: AuthConfig) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeouts.request_secs))
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .build()
            .map_err(|e| AuthError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, config, session: RwLock::new(None), subscribers: Subscribers::new() })
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Sign in with email and password.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidCredentials`] when the service rejects the
    /// credentials, or a transport/API error otherwise.
    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let url = format!("{}?grant_type=password", self.config.endpoint(TOKEN_PATH));
        debug!(url = %url, email = %email, "password sign-in");

        let response = self
            .http
            .post(&url)
            .header("apikey", &self.config.anon_key)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let (status, body) = read_body(response).await?;
        match status {
            200..=299 => {}
            400 | 401 | 422 => return Err(AuthError::InvalidCredentials(body)),
            _ => return Err(AuthError::Api { status, body }),
        }

        let session = parse_session_body(&body)?
            .ok_or_else(|| AuthError::Api { status, body: "token response carried no session".into() })?;
        self.store_session(AuthEvent::SignedIn, session.clone());
        Ok(session)
    }

    /// Register a new account. Returns `None` when the service requires the
    /// email address to be confirmed before issuing a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the service rejects it.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Option<Session>, AuthError> {
        let url = self.config.endpoint(SIGNUP_PATH);
        debug!(url = %url, email = %email, "sign-up");

        let response = self
            .http
            .post(&url)
            .header("apikey", &self.config.anon_key)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let (status, body) = read_body(response).await?;
        if !(200..300).contains(&status) {
            return Err(AuthError::Api { status, body });
        }

        let session = parse_session_body(&body)?;
        match &session {
            Some(session) => self.store_session(AuthEvent::SignedIn, session.clone()),
            None => info!(email = %email, "sign-up pending email confirmation"),
        }
        Ok(session)
    }

    /// Look up the user owning `access_token`. When that token is the held
    /// session's and the identity changed, the held session is updated and
    /// `UserUpdated` is broadcast.
    ///
    /// # Errors
    ///
    /// Returns the service error when the token is rejected.
    pub async fn get_user(&self, access_token: &str) -> Result<User, AuthError> {
        let user = self.fetch_user(access_token).await?;

        let changed = {
            let mut guard = self.write_session();
            match guard.as_mut() {
                Some(held) if held.access_token == access_token && held.user != user => {
                    held.user = user.clone();
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.subscribers.broadcast(AuthEvent::UserUpdated, self.current());
        }
        Ok(user)
    }

    /// Revoke `access_token`. The held session is cleared, with a
    /// `SignedOut` broadcast, only when it carries that token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::SignOut`] when the service refuses or cannot be
    /// reached.
    pub async fn sign_out_token(&self, access_token: &str) -> Result<(), AuthError> {
        self.revoke(access_token).await?;
        if self.current().is_some_and(|held| held.access_token == access_token) {
            self.clear_session();
        }
        Ok(())
    }

    /// Adopt a session handed over in an auth callback URL.
    ///
    /// Tokens are read from the fragment, falling back to the query string.
    /// Returns `Ok(None)` when detection is disabled or the URL carries no
    /// token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UrlSession`] when the URL reports an error or the
    /// token set is incomplete, or the service error when the access token
    /// is rejected.
    pub async fn detect_session_in_url(&self, url: &Url) -> Result<Option<Session>, AuthError> {
        if !self.config.detect_session_in_url {
            return Ok(None);
        }
        let Some(params) = url_session_params(url)? else {
            return Ok(None);
        };

        let user = self.fetch_user(&params.access_token).await?;
        let session = Session {
            access_token: params.access_token,
            refresh_token: params.refresh_token,
            token_type: params.token_type,
            expires_in: params.expires_in,
            expires_at: params.expires_at,
            user,
        }
        .with_computed_expiry(now_unix());

        let event = if params.recovery { AuthEvent::PasswordRecovery } else { AuthEvent::SignedIn };
        self.store_session(event, session.clone());
        Ok(Some(session))
    }

    async fn fetch_user(&self, access_token: &str) -> Result<User, AuthError> {
        let response = self
            .http
            .get(self.config.endpoint(USER_PATH))
            .header("apikey", &self.config.anon_key)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let (status, body) = read_body(response).await?;
        if !(200..300).contains(&status) {
            warn!(status, "user lookup rejected");
            return Err(AuthError::Api { status, body });
        }
        serde_json::from_str(&body).map_err(|e| AuthError::Api { status, body: format!("malformed user: {e}") })
    }

    async fn revoke(&self, access_token: &str) -> Result<(), AuthError> {
        let response = self
            .http
            .post(self.config.endpoint(LOGOUT_PATH))
            .header("apikey", &self.config.anon_key)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AuthError::SignOut(e.to_string()))?;

        let status = response.status().as_u16();
        match status {
            200..=299 => Ok(()),
            // The service no longer knows the token; the session is gone either way.
            401 | 403 | 404 => {
                debug!(status, "logout for unknown session");
                Ok(())
            }
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(AuthError::SignOut(format!("{status}: {body}")))
            }
        }
    }

    fn current(&self) -> Option<Session> {
        self.session.read().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    fn write_session(&self) -> RwLockWriteGuard<'_, Option<Session>> {
        self.session.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn store_session(&self, event: AuthEvent, session: Session) {
        let session = session.with_computed_expiry(now_unix());
        if self.config.persist_session {
            *self.write_session() = Some(session.clone());
        }
        info!(event = %event, user_id = %session.user.id, "session stored");
        self.subscribers.broadcast(event, Some(session));
    }

    fn clear_session(&self) {
        *self.write_session() = None;
        self.subscribers.broadcast(AuthEvent::SignedOut, None);
    }
}

#[async_trait::async_trait]
impl AuthClient for SupabaseAuthClient {
    async fn fetch_session(&self) -> Result<Option<Session>, AuthError> {
        let mut guard = self.write_session();
        if guard.as_ref().is_some_and(Session::is_expired) {
            *guard = None;
            drop(guard);
            info!("held session expired; dropping it");
            self.subscribers.broadcast(AuthEvent::SignedOut, None);
            return Ok(None);
        }
        Ok(guard.clone())
    }

    fn subscribe(&self) -> Subscription {
        self.subscribers.subscribe(self.current())
    }

    async fn session_for_tokens(&self, access_token: &str, refresh_token: &str) -> Result<Option<Session>, AuthError> {
        match self.fetch_user(access_token).await {
            Ok(user) => Ok(Some(Session {
                access_token: access_token.to_owned(),
                refresh_token: refresh_token.to_owned(),
                token_type: "bearer".into(),
                expires_in: None,
                expires_at: None,
                user,
            })),
            Err(AuthError::Api { status: 401 | 403, .. }) => Ok(None),
            Err(e) => Err(AuthError::SessionFetch(e.to_string())),
        }
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        if let Some(session) = self.current() {
            self.revoke(&session.access_token).await?;
        }
        self.clear_session();
        Ok(())
    }
}

#[async_trait::async_trait]
impl AccountClient for SupabaseAuthClient {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        SupabaseAuthClient::sign_in_with_password(self, email, password).await
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Option<Session>, AuthError> {
        SupabaseAuthClient::sign_up(self, email, password).await
    }

    async fn detect_session_in_url(&self, url: &Url) -> Result<Option<Session>, AuthError> {
        SupabaseAuthClient::detect_session_in_url(self, url).await
    }

    async fn get_user(&self, access_token: &str) -> Result<User, AuthError> {
        SupabaseAuthClient::get_user(self, access_token).await
    }

    async fn sign_out_token(&self, access_token: &str) -> Result<(), AuthError> {
        SupabaseAuthClient::sign_out_token(self, access_token).await
    }
}

// =============================================================================
// PARSING
// =============================================================================

/// Session tokens carried by an auth callback URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UrlSessionParams {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: Option<i64>,
    pub expires_at: Option<i64>,
    pub recovery: bool,
}

/// Extract session tokens from `url`'s fragment, or its query when the
/// fragment has none.
pub(crate) fn url_session_params(url: &Url) -> Result<Option<UrlSessionParams>, AuthError> {
    let fragment_pairs: Vec<(String, String)> = url
        .fragment()
        .map(|f| url::form_urlencoded::parse(f.as_bytes()).into_owned().collect())
        .unwrap_or_default();
    let pairs: Vec<(String, String)> = if fragment_pairs.iter().any(|(k, _)| is_session_key(k)) {
        fragment_pairs
    } else {
        url.query_pairs().into_owned().collect()
    };
    let get = |key: &str| pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone());

    if let Some(description) = get("error_description").or_else(|| get("error")) {
        return Err(AuthError::UrlSession(description));
    }
    let Some(access_token) = get("access_token").filter(|t| !t.is_empty()) else {
        return Ok(None);
    };
    let refresh_token = get("refresh_token")
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AuthError::UrlSession("missing refresh_token".into()))?;

    Ok(Some(UrlSessionParams {
        access_token,
        refresh_token,
        token_type: get("token_type").unwrap_or_else(|| "bearer".into()),
        expires_in: get("expires_in").and_then(|v| v.parse().ok()),
        expires_at: get("expires_at").and_then(|v| v.parse().ok()),
        recovery: get("type").as_deref() == Some("recovery"),
    }))
}

fn is_session_key(key: &str) -> bool {
    matches!(key, "access_token" | "error" | "error_description")
}

/// Parse a token or sign-up response. Sign-up answers with a bare user
/// object when confirmation is pending, which yields `None`.
pub(crate) fn parse_session_body(body: &str) -> Result<Option<Session>, AuthError> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| AuthError::Api { status: 200, body: format!("malformed body: {e}") })?;
    if value.get("access_token").is_none() {
        return Ok(None);
    }
    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| AuthError::Api { status: 200, body: format!("malformed session: {e}") })
}

async fn read_body(response: reqwest::Response) -> Result<(u16, String), AuthError> {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|e| AuthError::Transport(e.to_string()))?;
    Ok((status, body))
}

fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

#[cfg(test)]
#[path = "supabase_test.rs"]
mod tests;
