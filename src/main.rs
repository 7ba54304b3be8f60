mod auth;
mod config;
mod gate;
mod routes;
mod state;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()
        .expect("invalid PORT");

    let config = config::AuthConfig::from_env().expect("auth service configuration required");
    let client = Arc::new(auth::SupabaseAuthClient::new(config).expect("auth client init failed"));
    tracing::info!(url = %client.config().service_url, "auth service configured");
    let auth_client: Arc<dyn auth::AuthClient> = client.clone();

    // Subscribes, spawns the change loop, then loads the initial session.
    let (store, _events) = auth::SessionStore::start(auth_client).await;
    let _observer = store.subscribe(|session| {
        tracing::debug!(authenticated = session.is_authenticated(), "session state changed");
    });
    let state = state::AppState::new(client);

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "sessiongate listening");
    axum::serve(listener, app).await.expect("server failed");
}
