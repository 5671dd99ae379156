//! Proxy, mirror and audit pipeline.
//!
//! Every operation walks the same states:
//!
//! ```text
//! Validating ──> TokenAcquiring ──> Forwarding ──> Auditing ──> (Mirroring) ──> Responding
//!     │                │                 │
//!     └── 400          └── 500           └── 500        (no audit, no mirror)
//! ```
//!
//! Once the upstream produced a reply, exactly one audit entry is attempted;
//! its failure is logged and otherwise ignored. The mirror is written only for
//! the success statuses of the verb, and a mirror failure turns the response
//! into a 500 even though the upstream already applied the change.

use crate::audit::{body_value, AuditAction, AuditRecorder, NewAuditEntry};
use crate::mirror::{replacement_ops, MirrorStore};
use crate::resource::ResourceKind;
use crate::token::TokenCache;
use crate::upstream::{UpstreamClient, UpstreamReply, UpstreamRequest};
use axum::body::Bytes;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};


const CREATE_SUCCESS: &[u16] = &[200, 201];
const UPDATE_SUCCESS: &[u16] = &[200, 201];
const PATCH_SUCCESS: &[u16] = &[200];

const MAX_ID_LEN: usize = 64;

/// The authenticated caller a transaction is attributed to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Actor(String);

impl Actor {
    /// Returns `None` for a blank identity.
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            None
        } else {
            Some(Self(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a transaction ended without passing the upstream reply through.
#[derive(Debug)]
pub enum PipelineError {
    /// Bad or missing input. Nothing was sent, audited or mirrored.
    Validation(String),
    /// No valid token could be obtained. Nothing was sent or audited.
    Token(anyhow::Error),
    /// The upstream could not be reached. Nothing was audited.
    Transport(anyhow::Error),
    /// The upstream accepted the change but the local mirror write failed.
    Mirror(anyhow::Error),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Validation(msg) => write!(f, "Validation failed: {}", msg),
            PipelineError::Token(e) => write!(f, "Token acquisition failed: {:#}", e),
            PipelineError::Transport(e) => write!(f, "Upstream transport failed: {:#}", e),
            PipelineError::Mirror(e) => write!(f, "Mirror write failed: {:#}", e),
        }
    }
}

impl std::error::Error for PipelineError {}

/// Sequences token cache, upstream client, audit recorder and mirror store.
pub struct Gateway {
    tokens: Arc<TokenCache>,
    upstream: UpstreamClient,
    mirror: MirrorStore,
    audit: AuditRecorder,
}

impl Gateway {
    pub fn new(
        tokens: Arc<TokenCache>,
        upstream: UpstreamClient,
        mirror: MirrorStore,
        audit: AuditRecorder,
    ) -> Self {
        Self {
            tokens,
            upstream,
            mirror,
            audit,
        }
    }

    pub fn mirror(&self) -> &MirrorStore {
        &self.mirror
    }

    pub fn audit(&self) -> &AuditRecorder {
        &self.audit
    }

    /// Creates a resource upstream and mirrors the returned representation.
    pub async fn create(
        &self,
        actor: &Actor,
        kind: ResourceKind,
        body: Bytes,
    ) -> Result<UpstreamReply, PipelineError> {
        ensure_mutable(kind)?;
        serde_json::from_slice::<Value>(&body)
            .map_err(|e| PipelineError::Validation(format!("Invalid JSON body: {}", e)))?;

        let token = self.token().await?;
        let reply = self
            .forward(UpstreamRequest::create(kind, body.clone()), &token)
            .await?;

        let response: Option<Value> = serde_json::from_slice(&reply.body).ok();
        let resource_id = response
            .as_ref()
            .and_then(|doc| doc.get("id"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        self.record(
            actor,
            AuditAction::Create,
            kind,
            &resource_id,
            &reply,
            mutation_details(&body, &reply.body),
        )
        .await;

        if CREATE_SUCCESS.contains(&reply.status) {
            match response {
                Some(document) if !resource_id.is_empty() => {
                    self.mirror
                        .upsert(kind, &resource_id, document)
                        .await
                        .map_err(|e| mirror_failed(kind, &resource_id, e))?;
                    info!(kind = %kind, id = %resource_id, "Created resource mirrored");
                }
                _ => warn!(
                    kind = %kind,
                    status = reply.status,
                    "Create succeeded upstream but the response carried no id; not mirrored"
                ),
            }
        }

        Ok(reply)
    }

    /// Replaces a resource upstream and merges the submitted body into the mirror.
    pub async fn update(
        &self,
        actor: &Actor,
        kind: ResourceKind,
        id: &str,
        body: Bytes,
    ) -> Result<UpstreamReply, PipelineError> {
        ensure_mutable(kind)?;
        validate_id(id)?;
        let fields = match serde_json::from_slice::<Value>(&body) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                return Err(PipelineError::Validation(
                    "Body must be a JSON object".to_string(),
                ))
            }
            Err(e) => return Err(PipelineError::Validation(format!("Invalid JSON body: {}", e))),
        };

        let token = self.token().await?;
        let reply = self
            .forward(UpstreamRequest::update(kind, id, body.clone()), &token)
            .await?;

        self.record(
            actor,
            AuditAction::Put,
            kind,
            id,
            &reply,
            mutation_details(&body, &reply.body),
        )
        .await;

        if UPDATE_SUCCESS.contains(&reply.status) {
            self.mirror
                .merge(kind, id, fields)
                .await
                .map_err(|e| mirror_failed(kind, id, e))?;
            info!(kind = %kind, id = %id, "Updated resource mirrored");
        }

        Ok(reply)
    }

    /// Applies a JSON Patch upstream; only `replace` operations reach the mirror.
    pub async fn patch(
        &self,
        actor: &Actor,
        kind: ResourceKind,
        id: &str,
        body: Bytes,
    ) -> Result<UpstreamReply, PipelineError> {
        ensure_mutable(kind)?;
        validate_id(id)?;
        let ops = match serde_json::from_slice::<Value>(&body) {
            Ok(Value::Array(ops)) if ops.iter().all(Value::is_object) => ops,
            Ok(_) => {
                return Err(PipelineError::Validation(
                    "Body must be a JSON array of patch operations".to_string(),
                ))
            }
            Err(e) => return Err(PipelineError::Validation(format!("Invalid JSON body: {}", e))),
        };

        let token = self.token().await?;
        let reply = self
            .forward(UpstreamRequest::patch(kind, id, body.clone()), &token)
            .await?;

        self.record(
            actor,
            AuditAction::Patch,
            kind,
            id,
            &reply,
            mutation_details(&body, &reply.body),
        )
        .await;

        if PATCH_SUCCESS.contains(&reply.status) {
            let replacements = replacement_ops(&ops);
            if replacements.is_empty() {
                debug!(kind = %kind, id = %id, "Patch has no replace operations; mirror untouched");
            } else {
                let applied = self
                    .mirror
                    .apply_replacements(kind, id, replacements)
                    .await
                    .map_err(|e| mirror_failed(kind, id, e))?;
                if applied {
                    info!(kind = %kind, id = %id, "Patched resource mirrored");
                } else {
                    debug!(kind = %kind, id = %id, "No mirrored document to patch");
                }
            }
        }

        Ok(reply)
    }

    /// Reads a resource upstream. Audited, never mirrored.
    pub async fn read(
        &self,
        actor: &Actor,
        kind: ResourceKind,
        id: &str,
        query: &[(String, String)],
    ) -> Result<UpstreamReply, PipelineError> {
        validate_id(id)?;

        let token = self.token().await?;
        let reply = self.forward(UpstreamRequest::read(kind, id), &token).await?;

        let mut details = Map::new();
        details.insert("queryParams".to_string(), query_params_value(query));
        details.insert("response".to_string(), body_value(&reply.body));

        self.record(actor, AuditAction::Get, kind, id, &reply, details)
            .await;

        Ok(reply)
    }

    async fn token(&self) -> Result<String, PipelineError> {
        self.tokens.get_valid_token().await.map_err(|e| {
            error!(error = %format!("{:#}", e), "Failed to get upstream token");
            PipelineError::Token(e)
        })
    }

    async fn forward(
        &self,
        request: UpstreamRequest,
        token: &str,
    ) -> Result<UpstreamReply, PipelineError> {
        let kind = request.kind;
        let method = request.method.clone();

        let reply = self.upstream.send(request, token).await.map_err(|e| {
            error!(kind = %kind, method = %method, error = %format!("{:#}", e), "Upstream request failed");
            PipelineError::Transport(e)
        })?;

        debug!(kind = %kind, method = %method, status = reply.status, "Upstream replied");
        Ok(reply)
    }

    /// Best effort: a failed audit write never changes the outcome.
    async fn record(
        &self,
        actor: &Actor,
        action: AuditAction,
        kind: ResourceKind,
        resource_id: &str,
        reply: &UpstreamReply,
        details: Map<String, Value>,
    ) {
        let entry = NewAuditEntry {
            user: actor.to_string(),
            action,
            resource: kind.as_str().to_string(),
            resource_id: resource_id.to_string(),
            status_code: reply.status,
            details,
        };

        if let Err(e) = self.audit.record(entry).await {
            warn!(
                action = %action,
                kind = %kind,
                id = %resource_id,
                error = %format!("{:#}", e),
                "Failed to write audit entry"
            );
        }
    }
}

fn ensure_mutable(kind: ResourceKind) -> Result<(), PipelineError> {
    if kind.supports_mutation() {
        Ok(())
    } else {
        Err(PipelineError::Validation(format!(
            "Resource '{}' is read-only",
            kind
        )))
    }
}

/// FHIR logical ids: 1-64 characters of `[A-Za-z0-9-.]`.
fn validate_id(id: &str) -> Result<(), PipelineError> {
    if id.is_empty() {
        return Err(PipelineError::Validation("Missing resource ID".to_string()));
    }
    let valid = id.len() <= MAX_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
    if !valid {
        return Err(PipelineError::Validation(format!(
            "Invalid resource ID '{}'",
            id
        )));
    }
    Ok(())
}

fn mirror_failed(kind: ResourceKind, id: &str, e: anyhow::Error) -> PipelineError {
    error!(
        kind = %kind,
        id = %id,
        error = %format!("{:#}", e),
        "Upstream accepted the change but the mirror write failed"
    );
    PipelineError::Mirror(e)
}

fn mutation_details(request: &[u8], response: &[u8]) -> Map<String, Value> {
    let mut details = Map::new();
    details.insert("requestBody".to_string(), body_value(request));
    details.insert("responseBody".to_string(), body_value(response));
    details
}

/// Groups repeated query keys into arrays, e.g. `{"_count": ["10"]}`.
fn query_params_value(query: &[(String, String)]) -> Value {
    let mut params = Map::new();
    for (key, value) in query {
        let entry = params
            .entry(key.clone())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(values) = entry {
            values.push(Value::String(value.clone()));
        }
    }
    Value::Object(params)
}
