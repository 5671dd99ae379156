//! Bearer token lifecycle for upstream calls.
//!
//! ```text
//! get_valid_token()
//!   ├─ stored token still valid (now < expiry - margin) ──> return it
//!   └─ missing / expiring
//!        ├─ take refresh lock (single-flight)
//!        ├─ re-check store (another caller may have refreshed)
//!        ├─ load credential ──> TokenIssuer::issue
//!        └─ upsert token ──> return it
//! ```
//!
//! Errors from the store or the issuer fail the request. An expired token is
//! never handed out when the issuer fails.

mod issuer;
mod store;

pub use issuer::{HttpTokenIssuer, IssuedToken, TokenIssuer};
pub use store::TokenStore;

use crate::credentials::CredentialStore;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};


/// Default safety margin: a token expiring within 10 seconds is treated as
/// expired so it cannot lapse mid-flight.
pub const DEFAULT_SAFETY_MARGIN_SECS: i64 = 10;

/// The cached upstream access token.
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub access_token: String,
    pub expiry: DateTime<Utc>,
}

impl Token {
    pub fn is_valid_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        !self.access_token.is_empty() && now < self.expiry - margin
    }
}

/// Hands out a valid bearer token, refreshing it through the issuer when needed.
pub struct TokenCache {
    tokens: TokenStore,
    credentials: Arc<CredentialStore>,
    issuer: Arc<dyn TokenIssuer>,
    safety_margin: Duration,
    refresh_lock: Mutex<()>,
}

impl TokenCache {
    pub fn new(
        tokens: TokenStore,
        credentials: Arc<CredentialStore>,
        issuer: Arc<dyn TokenIssuer>,
    ) -> Self {
        Self {
            tokens,
            credentials,
            issuer,
            safety_margin: Duration::seconds(DEFAULT_SAFETY_MARGIN_SECS),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn with_safety_margin(mut self, margin: Duration) -> Self {
        self.safety_margin = margin;
        self
    }

    /// Returns a token valid for at least the safety margin.
    pub async fn get_valid_token(&self) -> Result<String> {
        if let Some(token) = self.cached().await? {
            return Ok(token.access_token);
        }

        let _guard = self.refresh_lock.lock().await;

        // A concurrent caller may have refreshed while this one waited
        if let Some(token) = self.cached().await? {
            debug!("Token refreshed by a concurrent request");
            return Ok(token.access_token);
        }

        let token = self.refresh().await?;
        Ok(token.access_token)
    }

    async fn cached(&self) -> Result<Option<Token>> {
        let token = self
            .tokens
            .get()
            .await
            .context("Failed to read cached token")?;

        Ok(token.filter(|t| t.is_valid_at(Utc::now(), self.safety_margin)))
    }

    async fn refresh(&self) -> Result<Token> {
        let (credential, revision) = self
            .credentials
            .get_with_revision()
            .await
            .context("Failed to read credential")?
            .ok_or_else(|| anyhow!("No credential configured"))?;

        let issued = self
            .issuer
            .issue(&credential)
            .await
            .context("Token issuer failed")?;

        let token = Token {
            expiry: expiry_after(Utc::now(), issued.expires_in)?,
            access_token: issued.access_token,
        };

        // Only stored while the credential it was issued for is still current
        let stored = self
            .tokens
            .upsert_for_revision(&token, &revision)
            .await
            .context("Failed to store refreshed token")?;
        if !stored {
            return Err(anyhow!(
                "Credential changed during token refresh; issued token discarded"
            ));
        }

        info!(expiry = %token.expiry.to_rfc3339(), "Upstream access token refreshed");

        Ok(token)
    }
}

/// `now + expires_in`, or an error when the issuer's lifetime is not a
/// positive number of seconds or overflows the calendar.
fn expiry_after(now: DateTime<Utc>, expires_in: i64) -> Result<DateTime<Utc>> {
    if expires_in <= 0 {
        return Err(anyhow!("Issued token has non-positive lifetime {}s", expires_in));
    }

    Duration::try_seconds(expires_in)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .ok_or_else(|| anyhow!("Issued token lifetime {}s is out of range", expires_in))
}
