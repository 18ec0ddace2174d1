use std::sync::Arc;

use axum::{
    extract::State,
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::{
    error::AppError,
    services::auth::{LoginRecord, Session},
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/history", get(login_history))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    username: String,
    password: String,
}

/// Checks the injected credential table and issues a session. A successful
/// login appends to the audit log as a best-effort side effect.
async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<Session>, AppError> {
    let Some(role) = state
        .credentials
        .verify(&request.username, &request.password)
    else {
        tracing::info!(user = %request.username, "rejected login attempt");
        return Err(AppError::InvalidCredentials);
    };

    let session = Session::issue(request.username, role);
    state.login_log.record(&session);
    tracing::info!(user = %session.user, role = role.as_str(), "login succeeded");
    Ok(Json(session))
}

/// Admin-only view of the append-only login log.
async fn login_history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<LoginRecord>>, AppError> {
    let session = Session::from_headers(&headers)?;
    if !session.role.can_view_audit() {
        return Err(AppError::Forbidden(
            "only admin sessions may view the login history".to_string(),
        ));
    }
    Ok(Json(state.login_log.read_all()?))
}
