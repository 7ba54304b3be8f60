//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the account client used by the auth routes and the request gate.
//! Both share one underlying client. Handlers act for the caller whose
//! tokens the gate resolved; the process-wide `SessionStore` is owned by
//! `main` and is not consulted per request.

use std::sync::Arc;

use crate::auth::{AccountClient, AuthClient};
use crate::gate::RequestGate;

/// Clone is required by Axum; every field is Arc-backed.
#[derive(Clone)]
pub struct AppState {
    pub accounts: Arc<dyn AccountClient>,
    pub gate: RequestGate,
}

impl AppState {
    #[must_use]
    pub fn new<C>(client: Arc<C>) -> Self
    where
        C: AccountClient + 'static,
    {
        let auth: Arc<dyn AuthClient> = client.clone();
        Self { accounts: client, gate: RequestGate::new(auth) }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
