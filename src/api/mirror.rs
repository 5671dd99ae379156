use super::error::AppError;
use crate::mirror::{MirrorStore, MirroredDocument};
use crate::resource::ResourceKind;
use axum::{
    extract::{Path, State},
    response::Json,
    routing::get,
    Router,
};
use std::sync::Arc;
use tracing::error;

/// State for the read-only mirror endpoints.
#[derive(Clone)]
pub struct MirrorAppState {
    pub mirror: MirrorStore,
}

pub fn create_mirror_router(state: MirrorAppState) -> Router {
    Router::new()
        .route("/mirror/:kind", get(list_documents))
        .route("/mirror/:kind/:id", get(get_document))
        .with_state(Arc::new(state))
}

/// GET /mirror/:kind
async fn list_documents(
    State(state): State<Arc<MirrorAppState>>,
    Path(kind): Path<String>,
) -> Result<Json<Vec<MirroredDocument>>, AppError> {
    let kind = parse_kind(&kind)?;

    let documents = state.mirror.list(kind).await.map_err(|e| {
        error!(kind = %kind, error = %format!("{:#}", e), "Failed to list mirrored documents");
        AppError::InternalServerError("Failed to read local store".to_string())
    })?;

    Ok(Json(documents))
}

/// GET /mirror/:kind/:id
async fn get_document(
    State(state): State<Arc<MirrorAppState>>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<Json<MirroredDocument>, AppError> {
    let kind = parse_kind(&kind)?;

    let document = state.mirror.get(kind, &id).await.map_err(|e| {
        error!(kind = %kind, id = %id, error = %format!("{:#}", e), "Failed to read mirrored document");
        AppError::InternalServerError("Failed to read local store".to_string())
    })?;

    document
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("{} '{}' not mirrored", kind.fhir_type(), id)))
}

fn parse_kind(raw: &str) -> Result<ResourceKind, AppError> {
    raw.parse()
        .map_err(|e: crate::resource::UnknownResourceKind| AppError::NotFound(e.to_string()))
}
