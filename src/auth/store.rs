//! Session store — the application's single view of the current session.
//!
//! DESIGN
//! ======
//! `SessionStore` is an explicitly owned handle (cheap `Clone`, `Arc`
//! inside) injected wherever the session must be read. It has two writers:
//! the one-shot `initialize` fetch and the change-subscription loop. Both
//! replace the whole `SessionState` under one write lock, so readers never
//! observe a half-applied update and the last write wins.
//!
//! Change notifications from the client arrive on a FIFO channel drained by
//! a single task, so events are applied one at a time in delivery order.
//! Observers run after each write, in registration order, once the state
//! lock is released. Writers stay serialized until every observer returns,
//! so an observer may call `read()` but must not call `subscribe` or write
//! to the store; either would deadlock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::client::{AuthClient, Subscription};
use super::types::{AuthError, AuthEvent, Session, SessionState};

type Observer = Arc<dyn Fn(&SessionState) + Send + Sync>;

#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    client: Arc<dyn AuthClient>,
    state: Mutex<SessionState>,
    /// Serializes writers so observers see changes in the order applied.
    write_lock: Mutex<()>,
    changes: watch::Sender<SessionState>,
    observers: Mutex<Vec<(u64, Observer)>>,
    next_observer_id: AtomicU64,
}

impl SessionStore {
    /// Create an anonymous store backed by `client`. Call
    /// [`SessionStore::initialize`] and [`SessionStore::spawn_event_loop`]
    /// (or use [`SessionStore::start`]) to bring it up to date.
    #[must_use]
    pub fn new(client: Arc<dyn AuthClient>) -> Self {
        let (changes, _) = watch::channel(SessionState::default());
        Self {
            inner: Arc::new(StoreInner {
                client,
                state: Mutex::new(SessionState::default()),
                write_lock: Mutex::new(()),
                changes,
                observers: Mutex::new(Vec::new()),
                next_observer_id: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe to `client`, spawn the event loop, then run the initial
    /// fetch. Subscribing first means no change between the fetch and the
    /// loop starting can be missed.
    pub async fn start(client: Arc<dyn AuthClient>) -> (Self, JoinHandle<()>) {
        let store = Self::new(client);
        let subscription = store.inner.client.subscribe();
        let handle = store.spawn_event_loop(subscription);
        store.initialize().await;
        (store, handle)
    }

    /// Fetch the session once and adopt it. Failures are logged and leave
    /// the current state untouched.
    pub async fn initialize(&self) {
        match self.inner.client.fetch_session().await {
            Ok(session) => self.replace(SessionState::from_session(session)),
            Err(e) => error!(error = %e, "error getting initial session"),
        }
    }

    /// Apply one change notification. The event kind is only logged; the
    /// state always becomes exactly `session`.
    pub fn on_auth_event(&self, event: AuthEvent, session: Option<Session>) {
        let email = session.as_ref().and_then(|s| s.user.email.as_deref());
        info!(event = %event, email = ?email, "auth event");
        self.replace(SessionState::from_session(session));
    }

    /// Sign out through the client. State is cleared by the `SignedOut`
    /// change that follows, not here.
    ///
    /// # Errors
    ///
    /// Returns the client's error when sign-out fails; the state is left as
    /// it was.
    pub async fn logout(&self) -> Result<(), AuthError> {
        self.inner
            .client
            .sign_out()
            .await
            .inspect_err(|e| error!(error = %e, "error logging out"))
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn read(&self) -> SessionState {
        lock(&self.inner.state).clone()
    }

    /// Register `observer`. It is called immediately with the current state
    /// and again after every change until the returned handle is dropped.
    pub fn subscribe<F>(&self, observer: F) -> ObserverHandle
    where
        F: Fn(&SessionState) + Send + Sync + 'static,
    {
        let _writer = lock(&self.inner.write_lock);
        let id = self.inner.next_observer_id.fetch_add(1, Ordering::Relaxed);
        let observer: Observer = Arc::new(observer);
        lock(&self.inner.observers).push((id, observer.clone()));
        observer(&self.read());
        ObserverHandle { id, store: Arc::downgrade(&self.inner) }
    }

    /// Async change feed. The receiver starts at the current state.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.inner.changes.subscribe()
    }

    /// Drain `subscription` in a background task, applying each change in
    /// arrival order. The task ends when the client closes the channel.
    pub fn spawn_event_loop(&self, mut subscription: Subscription) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            while let Some(change) = subscription.recv().await {
                store.on_auth_event(change.event, change.session);
            }
            debug!("auth change subscription closed");
        })
    }

    fn replace(&self, next: SessionState) {
        let _writer = lock(&self.inner.write_lock);
        *lock(&self.inner.state) = next.clone();
        self.inner.changes.send_replace(next.clone());

        let observers: Vec<Observer> = lock(&self.inner.observers).iter().map(|(_, o)| o.clone()).collect();
        for observer in observers {
            observer(&next);
        }
    }
}

/// Keeps an observer registered. Dropping it unsubscribes.
#[must_use = "dropping the handle unsubscribes the observer"]
pub struct ObserverHandle {
    id: u64,
    store: Weak<StoreInner>,
}

impl ObserverHandle {
    pub fn unsubscribe(self) {}
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        if let Some(inner) = self.store.upgrade() {
            lock(&inner.observers).retain(|(id, _)| *id != self.id);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
