//! HTTP surface.
//!
//! Thin axum handlers over the content-service trait: parse the request,
//! call the service, map the error taxonomy onto status codes. All business
//! rules live in the engine.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use depot_core::{ContentService, DeploymentFile, DeploymentOrigin, ServiceError};
use depot_types::audit::simple_chain;
use depot_types::{AuthChain, EntityType, Timestamp};

/// Uploads may carry many content files; cap the request body generously.
const MAX_BODY_BYTES: usize = 256 * 1024 * 1024;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// The (blacklist-wrapped) content service.
    pub service: Arc<dyn ContentService>,
}

/// Builds the router over a service.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/entities/:entity_type", get(get_entities))
        .route("/entities", post(post_entity))
        .route("/contents/:hash_id", get(get_content))
        .route("/available-content", post(available_content))
        .route("/pointers/:entity_type", get(get_pointers))
        .route("/audit/:entity_type/:entity_id", get(get_audit))
        .route("/history", get(get_history))
        .route("/status", get(get_status))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Handler-level failure, mapped onto the HTTP error taxonomy.
#[derive(Debug)]
enum ApiError {
    /// 400 with all collected reasons.
    BadRequest(String),
    /// 404, absent or blacklisted alike.
    NotFound,
    /// 500.
    Internal(String),
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation { errors } => ApiError::BadRequest(errors.join("\n")),
            ServiceError::NotFound { .. } | ServiceError::Blacklisted { .. } => ApiError::NotFound,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "Not found".to_string()),
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string())
            },
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

fn parse_entity_type(value: &str) -> Result<EntityType, ApiError> {
    value.parse().map_err(|_| ApiError::BadRequest(format!("Unknown entity type: {value}")))
}

/// Splits repeated `pointer=` / `id=` query pairs.
fn split_query_filters(pairs: &[(String, String)]) -> (Vec<String>, Vec<String>) {
    let mut pointers = Vec::new();
    let mut ids = Vec::new();
    for (key, value) in pairs {
        match key.as_str() {
            "pointer" => pointers.push(value.to_ascii_lowercase()),
            "id" => ids.push(value.clone()),
            _ => {},
        }
    }
    (pointers, ids)
}

async fn get_entities(
    State(state): State<AppState>,
    Path(entity_type): Path<String>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Response, ApiError> {
    let entity_type = parse_entity_type(&entity_type)?;
    let (pointers, ids) = split_query_filters(&pairs);

    let entities = match (pointers.is_empty(), ids.is_empty()) {
        (false, true) => state.service.get_entities_by_pointers(entity_type, &pointers).await?,
        (true, false) => state.service.get_entities_by_ids(entity_type, &ids).await?,
        _ => {
            return Err(ApiError::BadRequest(
                "Must set either ids or pointers, but not both".to_string(),
            ));
        },
    };
    Ok(Json(entities).into_response())
}

async fn post_entity(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let upload = parse_deployment_upload(multipart).await?;

    let auth_chain = match upload.auth_chain {
        Some(chain) => chain,
        None => simple_chain(
            upload.eth_address.as_deref().unwrap_or_default(),
            &upload.entity_id,
            upload.signature.as_deref().unwrap_or_default(),
        ),
    };

    let creation_timestamp = state
        .service
        .deploy(
            upload.files,
            upload.entity_id,
            auth_chain,
            upload.migration_data,
            DeploymentOrigin::Local { fix: upload.fix },
        )
        .await?;
    Ok(Json(serde_json::json!({ "creationTimestamp": creation_timestamp })).into_response())
}

struct DeploymentUpload {
    entity_id: String,
    eth_address: Option<String>,
    signature: Option<String>,
    auth_chain: Option<AuthChain>,
    migration_data: Option<serde_json::Value>,
    fix: bool,
    files: Vec<DeploymentFile>,
}

async fn parse_deployment_upload(mut multipart: Multipart) -> Result<DeploymentUpload, ApiError> {
    let mut entity_id = None;
    let mut eth_address = None;
    let mut signature = None;
    let mut auth_chain = None;
    let mut migration_data = None;
    let mut fix = false;
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart request: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        match name.as_str() {
            "entityId" => entity_id = Some(read_text(field).await?),
            "ethAddress" => eth_address = Some(read_text(field).await?),
            "signature" => signature = Some(read_text(field).await?),
            "fix" => fix = read_text(field).await?.trim() == "true",
            "authChain" => {
                let raw = read_text(field).await?;
                let chain: AuthChain = serde_json::from_str(&raw)
                    .map_err(|e| ApiError::BadRequest(format!("Invalid auth chain: {e}")))?;
                auth_chain = Some(chain);
            },
            "migrationData" => {
                let raw = read_text(field).await?;
                let value: serde_json::Value = serde_json::from_str(&raw)
                    .map_err(|e| ApiError::BadRequest(format!("Invalid migration data: {e}")))?;
                migration_data = Some(value);
            },
            _ => {
                // Anything else is a content file; the part's file name wins
                // over its field name so `entity.json` uploads keep their
                // required name.
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read file part: {e}")))?;
                let file_name = file_name.unwrap_or(name);
                files.push(DeploymentFile::new(file_name, bytes.to_vec()));
            },
        }
    }

    let entity_id = entity_id
        .ok_or_else(|| ApiError::BadRequest("Missing form field: entityId".to_string()))?;
    Ok(DeploymentUpload {
        entity_id,
        eth_address,
        signature,
        auth_chain,
        migration_data,
        fix,
        files,
    })
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to read form field: {e}")))
}

async fn get_content(
    State(state): State<AppState>,
    Path(hash_id): Path<String>,
) -> Result<Response, ApiError> {
    let Some(bytes) = state.service.get_content(&hash_id).await? else {
        return Err(ApiError::NotFound);
    };
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response())
}

async fn available_content(
    State(state): State<AppState>,
    Json(hashes): Json<Vec<String>>,
) -> Result<Response, ApiError> {
    let availability = state.service.is_content_available(&hashes).await?;
    Ok(Json(availability).into_response())
}

async fn get_pointers(
    State(state): State<AppState>,
    Path(entity_type): Path<String>,
) -> Result<Response, ApiError> {
    let entity_type = parse_entity_type(&entity_type)?;
    let pointers = state.service.get_active_pointers(entity_type).await?;
    Ok(Json(pointers).into_response())
}

async fn get_audit(
    State(state): State<AppState>,
    Path((entity_type, entity_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let entity_type = parse_entity_type(&entity_type)?;
    let Some(audit) = state.service.get_audit_info(entity_type, &entity_id).await? else {
        return Err(ApiError::NotFound);
    };
    Ok(Json(audit).into_response())
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    from: Option<Timestamp>,
    to: Option<Timestamp>,
    #[serde(rename = "serverName")]
    server_name: Option<String>,
}

async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Response, ApiError> {
    let history = state
        .service
        .get_history(query.from, query.to, query.server_name.as_deref())
        .await?;
    Ok(Json(history).into_response())
}

async fn get_status(State(state): State<AppState>) -> Response {
    Json(state.service.get_status().await).into_response()
}
