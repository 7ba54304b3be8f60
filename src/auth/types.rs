//! Auth types — session records, change events, and errors.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// ERROR
// =============================================================================

/// Errors produced by auth client operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The current session could not be resolved.
    #[error("session fetch failed: {0}")]
    SessionFetch(String),

    /// The service did not complete a sign-out.
    #[error("sign out failed: {0}")]
    SignOut(String),

    /// The service rejected the supplied email/password.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The service returned a non-success HTTP status.
    #[error("auth API error: status {status}")]
    Api { status: u16, body: String },

    /// The HTTP request could not be sent or its body read.
    #[error("auth request failed: {0}")]
    Transport(String),

    /// A callback URL carried an error or malformed tokens.
    #[error("url session rejected: {0}")]
    UrlSession(String),

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

impl AuthError {
    /// Whether retrying the same call could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Api { status: 429 | 500..=599, .. })
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// Identity attached to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Token bundle issued by the auth service. Owned by the client.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Unix seconds.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: User,
}

fn default_token_type() -> String {
    "bearer".into()
}

impl Session {
    /// True once `expires_at` lies at or before `now` (unix seconds).
    /// Sessions without an expiry never expire locally.
    #[must_use]
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(time::OffsetDateTime::now_utc().unix_timestamp())
    }

    /// Fill `expires_at` from `expires_in` when the service omitted it.
    #[must_use]
    pub(crate) fn with_computed_expiry(mut self, now: i64) -> Self {
        if self.expires_at.is_none() {
            self.expires_at = self.expires_in.map(|secs| now + secs);
        }
        self
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

// =============================================================================
// EVENTS
// =============================================================================

/// Kinds of session change reported by the auth client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEvent {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
}

impl AuthEvent {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InitialSession => "INITIAL_SESSION",
            Self::SignedIn => "SIGNED_IN",
            Self::SignedOut => "SIGNED_OUT",
            Self::TokenRefreshed => "TOKEN_REFRESHED",
            Self::UserUpdated => "USER_UPDATED",
            Self::PasswordRecovery => "PASSWORD_RECOVERY",
        }
    }
}

impl std::fmt::Display for AuthEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
impl std::str::FromStr for AuthEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INITIAL_SESSION" => Ok(Self::InitialSession),
            "SIGNED_IN" => Ok(Self::SignedIn),
            "SIGNED_OUT" => Ok(Self::SignedOut),
            "TOKEN_REFRESHED" => Ok(Self::TokenRefreshed),
            "USER_UPDATED" => Ok(Self::UserUpdated),
            "PASSWORD_RECOVERY" => Ok(Self::PasswordRecovery),
            other => Err(format!("unknown auth event: {other}")),
        }
    }
}

/// One notification delivered through a [`super::client::Subscription`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChange {
    pub event: AuthEvent,
    pub session: Option<Session>,
}

// =============================================================================
// SESSION STATE
// =============================================================================

/// The `(session, user)` pair held by the session store.
///
/// `user` is derived from `session` on construction and cannot be set
/// independently, so it is `Some` exactly when `session` is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    session: Option<Session>,
    user: Option<User>,
}

impl SessionState {
    #[must_use]
    pub fn from_session(session: Option<Session>) -> Self {
        let user = session.as_ref().map(|s| s.user.clone());
        Self { session, user }
    }

    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    #[must_use]
    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }
}

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;
