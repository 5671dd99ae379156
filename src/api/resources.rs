use super::actor::ActorResolver;
use super::error::AppError;
use crate::pipeline::Gateway;
use crate::resource::ResourceKind;
use crate::upstream::UpstreamReply;
use axum::{
    body::{Body, Bytes},
    extract::{Path, RawQuery, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;

/// State for the resource proxy routes.
#[derive(Clone)]
pub struct ResourceAppState {
    pub gateway: Arc<Gateway>,
    pub actors: ActorResolver,
}

/// Per-kind handler state; the kind is fixed by the route prefix.
struct KindState {
    kind: ResourceKind,
    gateway: Arc<Gateway>,
    actors: ActorResolver,
}

/// One sub-router per resource kind:
///
/// - `GET /{kind}/:id` for every kind
/// - `POST /{kind}/create`, `POST /{kind}/update/:id`, `PATCH /{kind}/patch/:id`
///   for kinds that accept writes
pub fn create_resource_router(state: ResourceAppState) -> Router {
    ResourceKind::ALL
        .into_iter()
        .fold(Router::new(), |router, kind| {
            router.nest(&format!("/{}", kind.as_str()), kind_router(kind, &state))
        })
}

fn kind_router(kind: ResourceKind, state: &ResourceAppState) -> Router {
    let mut router = Router::new().route("/:id", get(read_resource));

    if kind.supports_mutation() {
        router = router
            .route("/create", post(create_resource))
            .route("/update/:id", post(update_resource))
            .route("/patch/:id", patch(patch_resource));
    }

    router.with_state(Arc::new(KindState {
        kind,
        gateway: Arc::clone(&state.gateway),
        actors: state.actors.clone(),
    }))
}

async fn read_resource(
    State(state): State<Arc<KindState>>,
    Path(id): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let actor = state.actors.resolve(&headers)?;
    let query = parse_query(query.as_deref())?;

    let reply = state.gateway.read(&actor, state.kind, &id, &query).await?;
    Ok(passthrough(reply))
}

async fn create_resource(
    State(state): State<Arc<KindState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let actor = state.actors.resolve(&headers)?;

    let reply = state.gateway.create(&actor, state.kind, body).await?;
    Ok(passthrough(reply))
}

async fn update_resource(
    State(state): State<Arc<KindState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let actor = state.actors.resolve(&headers)?;

    let reply = state.gateway.update(&actor, state.kind, &id, body).await?;
    Ok(passthrough(reply))
}

async fn patch_resource(
    State(state): State<Arc<KindState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let actor = state.actors.resolve(&headers)?;

    let reply = state.gateway.patch(&actor, state.kind, &id, body).await?;
    Ok(passthrough(reply))
}

/// Query string as ordered key/value pairs; repeated keys are kept.
fn parse_query(query: Option<&str>) -> Result<Vec<(String, String)>, AppError> {
    match query {
        None | Some("") => Ok(Vec::new()),
        Some(raw) => serde_urlencoded::from_str(raw)
            .map_err(|e| AppError::BadRequest(format!("Invalid query string: {}", e))),
    }
}

/// Upstream status, content type and body, unchanged.
fn passthrough(reply: UpstreamReply) -> Response {
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut response = Response::new(Body::from(reply.body));
    *response.status_mut() = status;
    if let Some(value) = reply
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    response
}
