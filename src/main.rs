use anyhow::Result;
use axum::extract::DefaultBodyLimit;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

mod config;
mod error;
mod logging;
mod models;
mod routes;
mod services;

use services::auth::{CredentialStore, LoginLog};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    logging::init_logging()?;

    // Load configuration and the injected auth policy
    let config = config::load_config()?;
    let credentials = CredentialStore::load(config.credentials_path.as_deref())?;
    let login_log = LoginLog::new(config.login_log_path.clone());

    let addr = config.bind_addr;
    // Leave headroom for multipart framing around the payload itself
    let body_limit = config.max_file_size + 16 * 1024;

    let state = Arc::new(AppState {
        config,
        credentials,
        login_log,
    });

    let app = routes::routes()
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// Application state
pub struct AppState {
    pub config: config::Config,
    pub credentials: CredentialStore,
    pub login_log: LoginLog,
}
