//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Every route sits behind the request gate, so entry pages are redirected
//! for signed-in visitors before any handler runs. Handlers read the
//! gate's per-request session through [`RequestSession`]; the session API
//! reads the shared store instead.

pub mod auth;

use axum::Router;
use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::gate::{self, RequestSession};
use crate::state::AppState;

/// Build the application router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/login", get(login_page).post(auth::login))
        .route("/register", get(register_page).post(auth::register))
        .route("/auth/callback", get(auth::callback))
        .route("/api/auth/session", get(auth::session))
        .route("/api/auth/user", get(auth::user))
        .route("/api/auth/logout", post(auth::logout))
        .route("/healthz", get(healthz))
        .layer(middleware::from_fn_with_state(state.gate.clone(), gate::intercept))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `GET /` — greet the visitor by email, or as anonymous.
async fn index(session: RequestSession) -> String {
    let name = session
        .session()
        .map(|s| s.user.email.clone().unwrap_or_else(|| s.user.id.to_string()))
        .unwrap_or_else(|| "anonymous".into());
    format!("Hello, {name}")
}

async fn login_page() -> &'static str {
    "Sign in: POST /login with {\"email\", \"password\"}"
}

async fn register_page() -> &'static str {
    "Create an account: POST /register with {\"email\", \"password\"}"
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
