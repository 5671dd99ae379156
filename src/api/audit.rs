use super::error::AppError;
use crate::audit::{AuditEntry, AuditStore};
use axum::{
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::error;

/// State for the audit query endpoint.
#[derive(Clone)]
pub struct AuditAppState {
    pub audit: AuditStore,
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    /// Resource kind to filter on, e.g. `location`. Empty = no filter.
    pub resource: Option<String>,
}

pub fn create_audit_router(state: AuditAppState) -> Router {
    Router::new()
        .route("/audit-logs", get(list_audit_logs))
        .with_state(Arc::new(state))
}

/// GET /audit-logs?resource=<kind>
async fn list_audit_logs(
    State(state): State<Arc<AuditAppState>>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Vec<AuditEntry>>, AppError> {
    let resource = query.resource.as_deref().filter(|r| !r.is_empty());

    let entries = state.audit.list(resource).await.map_err(|e| {
        error!(error = %format!("{:#}", e), "Failed to query audit logs");
        AppError::InternalServerError("Failed to query audit logs".to_string())
    })?;

    Ok(Json(entries))
}
