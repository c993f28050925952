use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use hearth_shared::constants::{ALLOWED_MIME_TYPES, APP_NAME};
use hearth_shared::protocol::{
    ActiveMessage, GlobalSyncResult, HealthResponse, PullQuery, PullResponse, PushAck,
    RemoteChat, RemoteDocument, RemoteMessage, SyncResult, UploadResponse,
};
use hearth_shared::types::{EntityKind, Role};
use hearth_shared::HearthError;

use crate::active_store::{submit_message, ActiveStore};
use crate::archive::ArchivalSyncer;
use crate::config::ServerConfig;
use crate::db::Db;
use crate::error::ServerError;
use crate::file_store::{content_type_for, FileStore};

/// Room for multipart framing on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub files: Arc<FileStore>,
    pub active: Arc<dyn ActiveStore>,
    pub archive: Arc<ArchivalSyncer>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let body_limit = state.config.max_upload_size as usize + MULTIPART_OVERHEAD;

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/api/sync/changes", get(pull_changes))
        .route("/api/sync/:kind/:id", put(push_record).delete(delete_record))
        .route("/api/files/upload", post(upload_file))
        .route("/api/files/:stored_name", get(download_file))
        .route(
            "/api/sessions/:id/messages",
            post(submit_session_message).get(archived_messages),
        )
        .route("/api/admin/archive", post(archive_all))
        .route("/api/admin/archive/:session_id", post(archive_session))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct InfoResponse {
    name: &'static str,
    version: &'static str,
    max_upload_size: u64,
    allowed_mime_types: &'static [&'static str],
    archive_batch_size: usize,
    admin_enabled: bool,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<InfoResponse> {
    Json(InfoResponse {
        name: APP_NAME,
        version: env!("CARGO_PKG_VERSION"),
        max_upload_size: state.config.max_upload_size,
        allowed_mime_types: ALLOWED_MIME_TYPES,
        archive_batch_size: state.config.archive_batch_size,
        admin_enabled: state.config.admin_token.is_some(),
    })
}

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

fn parse_kind(segment: &str) -> Result<EntityKind, ServerError> {
    EntityKind::from_route_segment(segment)
        .ok_or_else(|| ServerError::NotFound(format!("Unknown record kind '{segment}'")))
}

fn decode<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ServerError> {
    serde_json::from_slice(body).map_err(|e| ServerError::BadRequest(format!("Invalid body: {e}")))
}

fn ensure_same_id(path_id: Uuid, body_id: Uuid) -> Result<(), ServerError> {
    if path_id != body_id {
        return Err(ServerError::BadRequest(format!(
            "Body id {body_id} does not match path id {path_id}"
        )));
    }
    Ok(())
}

async fn push_record(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, Uuid)>,
    body: Bytes,
) -> Result<Json<PushAck>, ServerError> {
    let kind = parse_kind(&kind)?;
    let applied = match kind {
        EntityKind::Chat => {
            let chat: RemoteChat = decode(&body)?;
            ensure_same_id(id, chat.id)?;
            state.db.put_chat(chat).await?
        }
        EntityKind::Message => {
            let message: RemoteMessage = decode(&body)?;
            ensure_same_id(id, message.id)?;
            state.db.put_message(message).await?
        }
        EntityKind::Document => {
            let document: RemoteDocument = decode(&body)?;
            ensure_same_id(id, document.id)?;
            state.db.put_document(document).await?
        }
    };

    tracing::debug!(%kind, %id, applied, "Record pushed");
    Ok(Json(PushAck { id, applied }))
}

async fn delete_record(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, Uuid)>,
) -> Result<StatusCode, ServerError> {
    let kind = parse_kind(&kind)?;
    if !state.db.delete(kind, id).await? {
        return Err(ServerError::NotFound(format!("{kind} {id}")));
    }
    info!(%kind, %id, "Record deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn pull_changes(
    State(state): State<AppState>,
    Query(query): Query<PullQuery>,
) -> Result<Json<PullResponse>, ServerError> {
    let changes = state.db.changes_since(query.since).await?;
    tracing::debug!(since = query.since, records = changes.len(), "Changes pulled");
    Ok(Json(changes))
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ServerError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Multipart error: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let file_name = field.file_name().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| ServerError::BadRequest(format!("Failed to read field: {e}")))?;

        let stored_name = state
            .files
            .store(&data, &content_type, file_name.as_deref())
            .await?;

        info!(
            name = %stored_name,
            size = data.len(),
            content_type = %content_type,
            "File uploaded"
        );

        return Ok(Json(UploadResponse {
            url: state.config.file_url(&stored_name),
            stored_name,
            content_type,
        }));
    }

    Err(ServerError::BadRequest(
        "Missing 'file' field in multipart form".to_string(),
    ))
}

async fn download_file(
    State(state): State<AppState>,
    Path(stored_name): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    let data = state.files.get(&stored_name).await?;
    Ok((
        [
            (header::CONTENT_TYPE, content_type_for(&stored_name)),
            (header::CACHE_CONTROL, "public, max-age=31536000, immutable"),
        ],
        data,
    ))
}

// ---------------------------------------------------------------------------
// Active sessions
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SubmitMessageRequest {
    #[serde(default)]
    id: Option<Uuid>,
    role: Role,
    content: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

async fn submit_session_message(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<SubmitMessageRequest>,
) -> Result<(StatusCode, Json<ActiveMessage>), ServerError> {
    let session_id = parse_session_id(&session_id)?;
    let message = ActiveMessage {
        id: req.id.unwrap_or_else(Uuid::new_v4),
        session_id,
        role: req.role,
        content: req.content,
        created_at: req.created_at.unwrap_or_else(Utc::now),
    };
    submit_message(state.active.as_ref(), &message).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// Messages of a session that have already been archived.
async fn archived_messages(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Vec<RemoteMessage>>, ServerError> {
    let session_id = parse_session_id(&session_id)?;
    Ok(Json(state.db.messages_for(session_id).await?))
}

fn parse_session_id(raw: &str) -> Result<Uuid, ServerError> {
    Uuid::parse_str(raw).map_err(|_| HearthError::InvalidSessionId(raw.to_string()).into())
}

// ---------------------------------------------------------------------------
// Admin
// ---------------------------------------------------------------------------

fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.admin_token else {
        return Err(ServerError::Forbidden(
            "Admin API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);

    use subtle::ConstantTimeEq;
    let given = token.as_bytes();
    let expected = expected.as_bytes();
    if given.len() != expected.len() || given.ct_eq(expected).unwrap_u8() != 1 {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }
    Ok(())
}

async fn archive_session(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SyncResult>, ServerError> {
    verify_admin_token(&headers, &state.config)?;
    let session_id = parse_session_id(&session_id)?;
    Ok(Json(state.archive.sync_session(session_id).await))
}

async fn archive_all(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<GlobalSyncResult>, ServerError> {
    verify_admin_token(&headers, &state.config)?;
    Ok(Json(state.archive.sync_all().await))
}

pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
