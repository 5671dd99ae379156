//! Client credentials for the upstream token endpoint.
//!
//! Exactly one credential set exists at a time. Posting a new one replaces the
//! previous record, deleting clears it. The client secret is sealed at rest.
//!
//! # Usage
//!
//! ```no_run
//! use fhirgate::credentials::{Credential, CredentialStore};
//! use fhirgate::storage::{Database, SecretCipher};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let db = Database::in_memory()?;
//! let cipher = SecretCipher::from_base64_key(&std::env::var("FHIRGATE_ENCRYPTION_KEY")?)?;
//! let store = CredentialStore::new(db, cipher);
//!
//! store
//!     .upsert(&Credential {
//!         client_id: "simrs".to_string(),
//!         client_secret: "s3cret".to_string(),
//!         token_url: "https://auth.example/oauth2/v1/accesstoken".to_string(),
//!     })
//!     .await?;
//!
//! assert!(store.get().await?.is_some());
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};

mod storage;

pub use storage::CredentialStore;

/// Client-credentials grant parameters for the token endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
}

impl Credential {
    /// Returns the first missing field, if any.
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.client_id.trim().is_empty() {
            Some("client_id")
        } else if self.client_secret.trim().is_empty() {
            Some("client_secret")
        } else if self.token_url.trim().is_empty() {
            Some("token_url")
        } else {
            None
        }
    }
}
