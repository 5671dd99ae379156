use crate::pipeline::Actor;
use axum::http::HeaderMap;

/// Header carrying the caller identity recorded in audit entries.
pub const ACTOR_HEADER: &str = "x-actor-id";

#[derive(Debug, PartialEq)]
pub enum ActorError {
    /// No header and no configured default
    Missing,
    /// Header present but not valid UTF-8
    InvalidFormat,
}

impl std::fmt::Display for ActorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActorError::Missing => write!(f, "Missing X-Actor-Id header"),
            ActorError::InvalidFormat => write!(f, "Invalid X-Actor-Id header"),
        }
    }
}

impl std::error::Error for ActorError {}

/// Resolves the acting identity of an inbound request.
///
/// The `X-Actor-Id` header wins; a blank header counts as absent. Without it
/// the configured default actor is used, and without that the request is
/// rejected before anything reaches the upstream.
#[derive(Clone, Debug, Default)]
pub struct ActorResolver {
    default_actor: Option<Actor>,
}

impl ActorResolver {
    pub fn new(default_actor: Option<String>) -> Self {
        Self {
            default_actor: default_actor.and_then(Actor::new),
        }
    }

    pub fn resolve(&self, headers: &HeaderMap) -> Result<Actor, ActorError> {
        if let Some(value) = headers.get(ACTOR_HEADER) {
            let value = value.to_str().map_err(|_| ActorError::InvalidFormat)?;
            if let Some(actor) = Actor::new(value) {
                return Ok(actor);
            }
        }

        self.default_actor.clone().ok_or(ActorError::Missing)
    }
}
