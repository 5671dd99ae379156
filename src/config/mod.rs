use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_UPSTREAM_BASE_URL: &str = "https://api-satusehat-stg.dto.kemkes.go.id/fhir-r4/v1";

/// Complete gateway configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub token: TokenConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

/// Inbound HTTP listener
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

/// Local SQLite store
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Upper bound for a single store operation (seconds)
    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,
}

fn default_db_path() -> String {
    "fhirgate.db".to_string()
}

fn default_store_timeout() -> u64 {
    5
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            timeout_secs: default_store_timeout(),
        }
    }
}

impl StorageConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Remote FHIR API
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    DEFAULT_UPSTREAM_BASE_URL.to_string()
}

fn default_upstream_timeout() -> u64 {
    10
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_upstream_timeout(),
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Token cache and issuer
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    /// A token expiring within this window is treated as expired
    #[serde(default = "default_safety_margin")]
    pub safety_margin_secs: i64,
    #[serde(default = "default_issuer_timeout")]
    pub issuer_timeout_secs: u64,
}

fn default_safety_margin() -> i64 {
    crate::token::DEFAULT_SAFETY_MARGIN_SECS
}

fn default_issuer_timeout() -> u64 {
    10
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            safety_margin_secs: default_safety_margin(),
            issuer_timeout_secs: default_issuer_timeout(),
        }
    }
}

impl TokenConfig {
    pub fn issuer_timeout(&self) -> Duration {
        Duration::from_secs(self.issuer_timeout_secs)
    }
}

/// Audit attribution
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditConfig {
    /// Actor used when a request carries no `X-Actor-Id` header.
    /// None = such requests are rejected.
    #[serde(default)]
    pub default_actor: Option<String>,
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<GatewayConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: GatewayConfig =
        toml::from_str(&contents).with_context(|| format!("Invalid config file {}", path))?;
    Ok(config)
}

impl GatewayConfig {
    /// Applies `FHIRGATE_*` environment overrides on top of the file values.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = lookup("FHIRGATE_BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Some(v) = lookup("FHIRGATE_DB_PATH") {
            self.storage.db_path = v;
        }
        if let Some(v) = lookup("FHIRGATE_UPSTREAM_BASE_URL") {
            self.upstream.base_url = v;
        }
    }
}
