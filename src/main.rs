//! Sheet Porter - config-driven spreadsheet template, import and export server.

mod config;
mod engine;
mod error;
mod exporter;
mod field;
mod importer;
mod progress;
mod sheet_parser;
mod sink;
mod template;
#[cfg(test)]
mod test_support;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use config::{ConfigStore, ImportExportConfig, Settings};
use engine::ImportExportEngine;
use error::EngineError;
use progress::{ImportResult, ImportStatus, ImportTracker, TrackerRegistry};
use serde::{Deserialize, Serialize};
use sink::{MemorySink, RecordSink, SupabaseSink};
use std::sync::Arc;
use template::GeneratedFile;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const XLSX_CONTENT_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    configs: Arc<ConfigStore>,
    sink: Arc<dyn RecordSink>,
    trackers: TrackerRegistry,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "sheet_porter=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;

    let configs = ConfigStore::load_from_dir(&settings.config_dir)?;
    info!("Loaded {} configs: {:?}", configs.list().len(), configs.list());

    let sink: Arc<dyn RecordSink> = match &settings.supabase {
        Some(supabase) => Arc::new(SupabaseSink::new(supabase)),
        None => Arc::new(MemorySink::new()),
    };
    info!("Using {} record sink", sink.name());

    let state = AppState {
        configs: Arc::new(configs),
        sink,
        trackers: TrackerRegistry::new(),
    };

    let app = router(state, settings.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    info!("Server listening on http://{}", settings.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/configs", get(list_configs))
        .route("/configs/:entity", get(get_config).put(put_config))
        .route("/configs/:entity/template", get(download_template))
        .route("/configs/:entity/import", post(import_file))
        .route("/configs/:entity/export", post(export_data))
        .route("/imports", get(list_sessions))
        .route("/imports/:session", get(import_status).delete(reset_import))
        .route("/imports/:session/cancel", post(cancel_import))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

type HandlerError = (StatusCode, String);

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// List available entity configs.
async fn list_configs(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.configs.list())
}

/// Get a specific config.
async fn get_config(
    State(state): State<AppState>,
    Path(entity): Path<String>,
) -> Result<Json<ImportExportConfig>, HandlerError> {
    let config = find_config(&state, &entity)?;
    Ok(Json(config.as_ref().clone()))
}

/// Register or replace an entity config at runtime.
async fn put_config(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Json(config): Json<ImportExportConfig>,
) -> Result<StatusCode, HandlerError> {
    if config.entity_name != entity {
        return Err((
            StatusCode::BAD_REQUEST,
            format!(
                "Path entity {} does not match entity_name {}",
                entity, config.entity_name
            ),
        ));
    }
    let replaced = state.configs.get(&entity).is_some();
    state
        .configs
        .insert(config)
        .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e))?;
    info!("{} config: {}", if replaced { "Replaced" } else { "Registered" }, entity);
    Ok(if replaced { StatusCode::OK } else { StatusCode::CREATED })
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    session: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImportResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
    result: ImportResult,
}

#[derive(Debug, Default, Deserialize)]
struct ExportRequest {
    #[serde(default)]
    records: Option<Vec<serde_json::Value>>,
}

async fn download_template(
    State(state): State<AppState>,
    Path(entity): Path<String>,
) -> Result<Response, HandlerError> {
    let engine = build_engine(&state, &entity, ImportTracker::new())?;
    let file = engine.download_template().map_err(engine_error)?;
    Ok(xlsx_download(file))
}

/// Upload a spreadsheet and import its rows. With `?session=` the progress
/// is visible under `/imports/{session}` while the request is running;
/// without one the import is not tracked beyond the response.
async fn import_file(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Query(query): Query<SessionQuery>,
    mut multipart: Multipart,
) -> Result<Json<ImportResponse>, HandlerError> {
    let tracker = match &query.session {
        Some(session) => state.trackers.get_or_create(session),
        None => ImportTracker::new(),
    };
    let engine = build_engine(&state, &entity, tracker)?;

    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        (StatusCode::BAD_REQUEST, format!("Multipart error: {}", e))
    })? {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or("upload.xlsx").to_string();
            let data = field.bytes().await.map_err(|e| {
                (StatusCode::BAD_REQUEST, format!("Failed to read file: {}", e))
            })?;
            upload = Some((filename, data.to_vec()));
            break;
        }
    }

    let Some((filename, file_data)) = upload else {
        return Err((StatusCode::BAD_REQUEST, "No file uploaded".to_string()));
    };

    info!(
        "Received file: {} ({} bytes) for {} in session {}",
        filename,
        file_data.len(),
        entity,
        query.session.as_deref().unwrap_or("-")
    );

    let result = engine
        .import_file(&filename, &file_data)
        .await
        .map_err(engine_error)?;

    Ok(Json(ImportResponse {
        session_id: query.session,
        result,
    }))
}

/// Export the posted records, or everything the sink holds for the entity.
async fn export_data(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Query(query): Query<SessionQuery>,
    body: Bytes,
) -> Result<Response, HandlerError> {
    let request: ExportRequest = if body.is_empty() {
        ExportRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid export request: {}", e)))?
    };

    // Only sessions that already exist report export state.
    let tracker = query
        .session
        .as_deref()
        .and_then(|session| state.trackers.get(session))
        .unwrap_or_default();
    let engine = build_engine(&state, &entity, tracker)?;
    let file = engine
        .export_data(request.records)
        .await
        .map_err(engine_error)?;
    Ok(xlsx_download(file))
}

/// Session ids currently holding import state.
async fn list_sessions(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.trackers.sessions())
}

async fn import_status(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> Result<Json<ImportStatus>, StatusCode> {
    state
        .trackers
        .get(&session)
        .map(|t| Json(t.snapshot()))
        .ok_or(StatusCode::NOT_FOUND)
}

async fn cancel_import(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> Result<StatusCode, StatusCode> {
    let tracker = state.trackers.get(&session).ok_or(StatusCode::NOT_FOUND)?;
    tracker.cancel();
    info!("Cancellation requested for session {}", session);
    Ok(StatusCode::ACCEPTED)
}

async fn reset_import(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> Result<StatusCode, StatusCode> {
    let tracker = state.trackers.get(&session).ok_or(StatusCode::NOT_FOUND)?;
    if !tracker.try_reset() {
        return Err(StatusCode::CONFLICT);
    }
    state.trackers.remove(&session);
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Helper functions
// ============================================================================

fn find_config(state: &AppState, entity: &str) -> Result<Arc<ImportExportConfig>, HandlerError> {
    state.configs.get(entity).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            format!("Unknown entity: {}. Available: {:?}", entity, state.configs.list()),
        )
    })
}

fn build_engine(
    state: &AppState,
    entity: &str,
    tracker: ImportTracker,
) -> Result<ImportExportEngine, HandlerError> {
    let config = find_config(state, entity)?;
    ImportExportEngine::new(config, state.sink.clone(), tracker).map_err(engine_error)
}

fn engine_error(e: EngineError) -> HandlerError {
    let status = match &e {
        EngineError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        EngineError::FileRead(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::NoExportData => StatusCode::BAD_REQUEST,
        EngineError::ImportInProgress => StatusCode::CONFLICT,
        EngineError::Sink(_) => StatusCode::BAD_GATEWAY,
        EngineError::InvalidConfig(_) | EngineError::Spreadsheet(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    if status.is_server_error() {
        error!("Request failed: {}", e);
    }
    (status, e.to_string())
}

fn xlsx_download(file: GeneratedFile) -> Response {
    let headers = [
        (header::CONTENT_TYPE, XLSX_CONTENT_TYPE.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", file.file_name),
        ),
    ];
    (headers, file.bytes).into_response()
}
