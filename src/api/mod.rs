// Inbound HTTP surface, mounted under /simrs/v1

mod actor;
mod audit;
mod credentials;
mod error;
mod mirror;
mod resources;

pub use actor::{ActorError, ActorResolver, ACTOR_HEADER};
pub use audit::{create_audit_router, AuditAppState, AuditQuery};
pub use credentials::{create_credentials_router, CredentialsAppState};
pub use error::AppError;
pub use mirror::{create_mirror_router, MirrorAppState};
pub use resources::{create_resource_router, ResourceAppState};

use crate::credentials::CredentialStore;
use crate::pipeline::Gateway;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub const API_PREFIX: &str = "/simrs/v1";

/// Everything the full router needs.
#[derive(Clone)]
pub struct GatewayAppState {
    pub gateway: Arc<Gateway>,
    pub credentials: Arc<CredentialStore>,
    pub actors: ActorResolver,
}

/// Merges every API area under [`API_PREFIX`].
pub fn create_router(state: GatewayAppState) -> Router {
    let audit = state.gateway.audit().store().clone();
    let mirror = state.gateway.mirror().clone();

    let api = Router::new()
        .merge(create_resource_router(ResourceAppState {
            gateway: Arc::clone(&state.gateway),
            actors: state.actors,
        }))
        .merge(create_credentials_router(CredentialsAppState {
            credentials: state.credentials,
        }))
        .merge(create_audit_router(AuditAppState { audit }))
        .merge(create_mirror_router(MirrorAppState { mirror }));

    Router::new()
        .nest(API_PREFIX, api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
