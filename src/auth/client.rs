//! The auth client seam.
//!
//! DESIGN
//! ======
//! Everything that talks to the hosted auth service hides behind
//! [`AuthClient`], so the session store and request gate can be exercised
//! with in-memory fakes. Change notifications are delivered through a
//! per-subscriber unbounded channel: each subscriber sees changes in the
//! order they were broadcast, one at a time.

use std::sync::Mutex;

use tokio::sync::mpsc;
use url::Url;

use super::types::{AuthChange, AuthError, AuthEvent, Session, User};

/// Capability for obtaining, observing, and invalidating sessions.
#[async_trait::async_trait]
pub trait AuthClient: Send + Sync {
    /// Return the current session, if any.
    async fn fetch_session(&self) -> Result<Option<Session>, AuthError>;

    /// Register for session changes. The first change delivered is an
    /// [`AuthEvent::InitialSession`] carrying the session at subscribe time.
    fn subscribe(&self) -> Subscription;

    /// Resolve the session a caller presents with its own tokens. Neither
    /// reads nor changes the session the client holds; a token the service
    /// rejects is `Ok(None)`.
    async fn session_for_tokens(&self, access_token: &str, refresh_token: &str) -> Result<Option<Session>, AuthError>;

    /// Invalidate the current session.
    async fn sign_out(&self) -> Result<(), AuthError>;
}

/// Account entry points used by the login, registration, and callback
/// routes. Successful calls announce `SignedIn` to subscribers.
#[async_trait::async_trait]
pub trait AccountClient: AuthClient {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError>;

    /// `Ok(None)` when the account awaits email confirmation.
    async fn sign_up(&self, email: &str, password: &str) -> Result<Option<Session>, AuthError>;

    /// `Ok(None)` when detection is disabled or `url` carries no session.
    async fn detect_session_in_url(&self, url: &Url) -> Result<Option<Session>, AuthError>;

    /// Look up the user owning `access_token`, announcing `UserUpdated`
    /// when it is the held session and its identity changed.
    async fn get_user(&self, access_token: &str) -> Result<User, AuthError>;

    /// Revoke `access_token` at the service. The held session is cleared
    /// only when it is the one revoked.
    async fn sign_out_token(&self, access_token: &str) -> Result<(), AuthError>;
}

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// Receiving half of a change subscription. Dropping it unsubscribes.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<AuthChange>,
}

impl Subscription {
    /// Wait for the next change. Returns `None` once the client is gone.
    pub async fn recv(&mut self) -> Option<AuthChange> {
        self.rx.recv().await
    }

    /// Take a change that is already queued, without waiting.
    #[cfg(test)]
    pub fn try_recv(&mut self) -> Option<AuthChange> {
        self.rx.try_recv().ok()
    }

    /// Stop receiving. Changes already queued are discarded.
    pub fn unsubscribe(self) {}
}

/// Fan-out list of live subscribers, shared by client implementations.
#[derive(Default)]
pub struct Subscribers {
    senders: Mutex<Vec<mpsc::UnboundedSender<AuthChange>>>,
}

impl Subscribers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber and queue its initial change.
    pub fn subscribe(&self, current: Option<Session>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(AuthChange { event: AuthEvent::InitialSession, session: current });
        self.lock().push(tx);
        Subscription { rx }
    }

    /// Send a change to every live subscriber, pruning closed ones.
    pub fn broadcast(&self, event: AuthEvent, session: Option<Session>) {
        let change = AuthChange { event, session };
        self.lock().retain(|tx| tx.send(change.clone()).is_ok());
    }

    /// Number of subscribers that have not been dropped yet.
    #[cfg(test)]
    #[must_use]
    pub fn len(&self) -> usize {
        let mut senders = self.lock();
        senders.retain(|tx| !tx.is_closed());
        senders.len()
    }

    #[cfg(test)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<AuthChange>>> {
        self.senders.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
