use anyhow::{Context, Result};
use fhirgate::api::{create_router, ActorResolver, GatewayAppState};
use fhirgate::audit::{AuditRecorder, AuditStore};
use fhirgate::config::{load_config, GatewayConfig};
use fhirgate::credentials::CredentialStore;
use fhirgate::mirror::MirrorStore;
use fhirgate::pipeline::Gateway;
use fhirgate::storage::{Database, SecretCipher};
use fhirgate::token::{HttpTokenIssuer, TokenCache, TokenStore};
use fhirgate::upstream::UpstreamClient;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fhirgate=info,tower_http=info".into()),
        )
        .init();

    info!("fhirgate starting...");

    let mut config = match std::env::var("FHIRGATE_CONFIG") {
        Ok(path) => {
            info!(path = %path, "Loading configuration");
            load_config(&path)?
        }
        Err(_) => GatewayConfig::default(),
    };
    config.apply_env_overrides();

    if config.audit.default_actor.is_none() {
        warn!("No default actor configured; requests without X-Actor-Id will be rejected");
    }

    let key = std::env::var("FHIRGATE_ENCRYPTION_KEY")
        .context("FHIRGATE_ENCRYPTION_KEY must be set (base64, 32 bytes)")?;
    let cipher = SecretCipher::from_base64_key(&key)?;

    let db = Database::open(&config.storage.db_path, config.storage.timeout())?;
    info!(path = %config.storage.db_path, "Database opened");

    let credentials = Arc::new(CredentialStore::new(db.clone(), cipher.clone()));
    let issuer = Arc::new(HttpTokenIssuer::new(config.token.issuer_timeout())?);
    let tokens = Arc::new(
        TokenCache::new(
            TokenStore::new(db.clone(), cipher),
            Arc::clone(&credentials),
            issuer,
        )
        .with_safety_margin(chrono::Duration::seconds(config.token.safety_margin_secs)),
    );

    let upstream = UpstreamClient::new(&config.upstream.base_url, config.upstream.timeout())?;
    info!(base_url = %upstream.base_url(), "Upstream configured");

    let gateway = Arc::new(Gateway::new(
        tokens,
        upstream,
        MirrorStore::new(db.clone()),
        AuditRecorder::new(AuditStore::new(db)),
    ));

    let router = create_router(GatewayAppState {
        gateway,
        credentials,
        actors: ActorResolver::new(config.audit.default_actor.clone()),
    });

    let listener = tokio::net::TcpListener::bind(config.server.bind_addr.as_str())
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!(addr = %config.server.bind_addr, "fhirgate listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("fhirgate stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
