//! Auth — hosted-service client, change subscriptions, and the session store.
//!
//! ARCHITECTURE
//! ============
//! `client` defines the capability seam, `supabase` implements it over HTTP,
//! and `store` keeps the application's view of the current session in sync
//! with the client's change notifications.

pub mod client;
pub mod store;
pub mod supabase;
pub mod types;

pub use client::{AccountClient, AuthClient, Subscription};
pub use store::SessionStore;
pub use supabase::SupabaseAuthClient;
pub use types::{AuthChange, AuthError, AuthEvent, Session, SessionState, User};

// =============================================================================
// TEST HELPERS
// =============================================================================
