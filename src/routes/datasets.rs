use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Multipart, State},
    http::{HeaderMap, Method},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use tower_http::cors::{Any, CorsLayer};

use crate::{
    error::AppError,
    models::{CorrelationResult, ProfileOptions, ProfileReport},
    services::{auth::Session, ingest, profile},
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/datasets/profile", post(profile_dataset))
        .route("/datasets/correlate", post(correlate_columns))
        .layer(cors)
}

struct Upload {
    filename: String,
    data: Bytes,
    fields: HashMap<String, String>,
}

/// Pulls the `file` part plus any text fields out of a multipart body.
async fn read_upload(multipart: &mut Multipart) -> Result<Upload, AppError> {
    let mut filename = None;
    let mut data = None;
    let mut fields = HashMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidInput(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                filename = field.file_name().map(str::to_string);
                data = Some(field.bytes().await.map_err(|e| {
                    AppError::InvalidInput(format!("failed to read file part: {e}"))
                })?);
            }
            Some(other) => {
                let key = other.to_string();
                let value = field.text().await.map_err(|e| {
                    AppError::InvalidInput(format!("failed to read field '{key}': {e}"))
                })?;
                fields.insert(key, value);
            }
            None => {}
        }
    }

    let filename =
        filename.ok_or_else(|| AppError::InvalidInput("file part must carry a filename".into()))?;
    let data = data.ok_or_else(|| AppError::InvalidInput("missing file part".into()))?;
    Ok(Upload {
        filename,
        data,
        fields,
    })
}

fn authorize_upload(headers: &HeaderMap) -> Result<Session, AppError> {
    let session = Session::from_headers(headers)?;
    if !session.role.can_profile() {
        return Err(AppError::Forbidden(
            "viewer sessions cannot upload or profile datasets".to_string(),
        ));
    }
    Ok(session)
}

fn check_size(data: &Bytes, limit: usize) -> Result<(), AppError> {
    if data.len() > limit {
        return Err(AppError::InvalidInput(format!(
            "file exceeds the {limit} byte upload limit"
        )));
    }
    Ok(())
}

/// Full profiling pass: resolve the upload into a dataset and run the report
/// battery. Each request re-runs ingestion from scratch; nothing is cached.
async fn profile_dataset(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<ProfileReport>, AppError> {
    let session = authorize_upload(&headers)?;
    let start = std::time::Instant::now();

    let upload = read_upload(&mut multipart).await?;
    check_size(&upload.data, state.config.max_file_size)?;
    let options: ProfileOptions = match upload.fields.get("options") {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| AppError::InvalidInput(format!("invalid options payload: {e}")))?,
        None => ProfileOptions::default(),
    };

    tracing::info!(
        user = %session.user,
        file = %upload.filename,
        size_kb = upload.data.len() / 1024,
        "profiling upload"
    );

    let resolve_start = std::time::Instant::now();
    let dataset = ingest::resolve(&upload.data, &upload.filename)?;
    tracing::info!(
        "resolved {} rows x {} columns in {:?}",
        dataset.row_count(),
        dataset.column_count(),
        resolve_start.elapsed()
    );

    let report = profile::profile(&dataset, &options)?;
    tracing::info!("profiling completed in {:?}", start.elapsed());
    Ok(Json(report))
}

/// On-demand Pearson test between two numeric columns of a fresh upload.
async fn correlate_columns(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<CorrelationResult>, AppError> {
    let session = authorize_upload(&headers)?;

    let upload = read_upload(&mut multipart).await?;
    check_size(&upload.data, state.config.max_file_size)?;
    let column_x = upload
        .fields
        .get("column_x")
        .ok_or_else(|| AppError::InvalidInput("missing column_x field".into()))?;
    let column_y = upload
        .fields
        .get("column_y")
        .ok_or_else(|| AppError::InvalidInput("missing column_y field".into()))?;

    tracing::info!(
        user = %session.user,
        file = %upload.filename,
        x = %column_x,
        y = %column_y,
        "running correlation test"
    );

    let dataset = ingest::resolve(&upload.data, &upload.filename)?;
    let result = profile::correlation_test(&dataset, column_x, column_y)?;
    Ok(Json(result))
}
