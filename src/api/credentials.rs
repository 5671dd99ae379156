use super::error::AppError;
use crate::credentials::{Credential, CredentialStore};
use axum::{
    body::Bytes,
    extract::State,
    response::Json,
    routing::get,
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info};

/// State for the credential endpoints.
#[derive(Clone)]
pub struct CredentialsAppState {
    pub credentials: Arc<CredentialStore>,
}

pub fn create_credentials_router(state: CredentialsAppState) -> Router {
    Router::new()
        .route(
            "/credentials",
            get(get_credentials)
                .post(upsert_credentials)
                .delete(delete_credentials),
        )
        .with_state(Arc::new(state))
}

/// GET /credentials returns the stored credential, or `null`.
async fn get_credentials(
    State(state): State<Arc<CredentialsAppState>>,
) -> Result<Json<Option<Credential>>, AppError> {
    let credential = state.credentials.get().await.map_err(|e| {
        error!(error = %format!("{:#}", e), "Failed to load credentials");
        AppError::InternalServerError("Failed to load credentials".to_string())
    })?;

    Ok(Json(credential))
}

/// POST /credentials replaces the stored credential.
async fn upsert_credentials(
    State(state): State<Arc<CredentialsAppState>>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let credential: Credential = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid credential body: {}", e)))?;

    if let Some(field) = credential.missing_field() {
        return Err(AppError::BadRequest(format!("Missing field '{}'", field)));
    }

    state.credentials.upsert(&credential).await.map_err(|e| {
        error!(error = %format!("{:#}", e), "Failed to store credentials");
        AppError::InternalServerError("Failed to store credentials".to_string())
    })?;

    info!(client_id = %credential.client_id, "Credentials updated");

    Ok(Json(json!({"status": "ok"})))
}

/// DELETE /credentials removes every stored credential.
async fn delete_credentials(
    State(state): State<Arc<CredentialsAppState>>,
) -> Result<Json<Value>, AppError> {
    let deleted = state.credentials.clear().await.map_err(|e| {
        error!(error = %format!("{:#}", e), "Failed to delete credentials");
        AppError::InternalServerError("Failed to delete credentials".to_string())
    })?;

    info!(deleted, "Credentials cleared");

    Ok(Json(json!({"status": "deleted"})))
}
