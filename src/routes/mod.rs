use std::sync::Arc;

use axum::{routing::get, Router};

use crate::AppState;

pub mod auth;
pub mod datasets;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .merge(auth::routes())
        .merge(datasets::routes())
}

async fn health_check() -> &'static str {
    "OK"
}
