//! Singleton token persistence. The access token is sealed at rest.

use super::Token;
use crate::storage::{Database, SecretCipher};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

pub struct TokenStore {
    db: Database,
    cipher: SecretCipher,
}

impl TokenStore {
    pub fn new(db: Database, cipher: SecretCipher) -> Self {
        Self { db, cipher }
    }

    /// Reads the cached token. A missing record is `Ok(None)`, not an error.
    pub async fn get(&self) -> Result<Option<Token>> {
        let row = self
            .db
            .run("read token", |conn| {
                let row = conn
                    .query_row(
                        "SELECT access_token, access_token_nonce, expiry FROM tokens WHERE slot = 1",
                        [],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, String>(2)?,
                            ))
                        },
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;

        let Some((sealed, nonce, expiry)) = row else {
            return Ok(None);
        };

        let access_token = self
            .cipher
            .open(&sealed, &nonce)
            .context("Failed to decrypt access token")?;
        let expiry = DateTime::parse_from_rfc3339(&expiry)
            .context("Failed to parse token expiry")?
            .with_timezone(&Utc);

        Ok(Some(Token {
            access_token,
            expiry,
        }))
    }

    /// Replaces the cached token. The last successful write wins.
    pub async fn upsert(&self, token: &Token) -> Result<()> {
        let sealed = self
            .cipher
            .seal(&token.access_token)
            .context("Failed to encrypt access token")?;
        let expiry = token.expiry.to_rfc3339();
        let now = Utc::now().to_rfc3339();

        self.db
            .run("upsert token", move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO tokens (slot, access_token, access_token_nonce, expiry, updated_at)
                    VALUES (1, ?1, ?2, ?3, ?4)
                    ON CONFLICT(slot) DO UPDATE SET
                        access_token = excluded.access_token,
                        access_token_nonce = excluded.access_token_nonce,
                        expiry = excluded.expiry,
                        updated_at = excluded.updated_at
                    "#,
                    params![sealed.ciphertext, sealed.nonce, expiry, now],
                )?;
                Ok(())
            })
            .await
    }

    /// Stores `token` only if the credential row still carries `revision`.
    ///
    /// Returns `false` without writing when the credential was replaced or
    /// cleared since the token was requested.
    pub async fn upsert_for_revision(&self, token: &Token, revision: &str) -> Result<bool> {
        let sealed = self
            .cipher
            .seal(&token.access_token)
            .context("Failed to encrypt access token")?;
        let expiry = token.expiry.to_rfc3339();
        let now = Utc::now().to_rfc3339();
        let revision = revision.to_string();

        self.db
            .run("upsert token for revision", move |conn| {
                let written = conn.execute(
                    r#"
                    INSERT INTO tokens (slot, access_token, access_token_nonce, expiry, updated_at)
                    SELECT 1, ?1, ?2, ?3, ?4
                    WHERE EXISTS (SELECT 1 FROM credentials WHERE slot = 1 AND revision = ?5)
                    ON CONFLICT(slot) DO UPDATE SET
                        access_token = excluded.access_token,
                        access_token_nonce = excluded.access_token_nonce,
                        expiry = excluded.expiry,
                        updated_at = excluded.updated_at
                    "#,
                    params![sealed.ciphertext, sealed.nonce, expiry, now, revision],
                )?;
                Ok(written > 0)
            })
            .await
    }

    pub async fn clear(&self) -> Result<()> {
        self.db
            .run("clear token", |conn| {
                conn.execute("DELETE FROM tokens", [])?;
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store() -> TokenStore {
        TokenStore::new(
            Database::in_memory().unwrap(),
            SecretCipher::from_key_bytes(&[3u8; 32]).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_missing_token_is_none() {
        assert!(store().get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_keeps_single_latest_token() {
        let store = store();
        let expiry = Utc::now() + Duration::minutes(30);

        store
            .upsert(&Token {
                access_token: "first".to_string(),
                expiry,
            })
            .await
            .unwrap();
        store
            .upsert(&Token {
                access_token: "second".to_string(),
                expiry,
            })
            .await
            .unwrap();

        let token = store.get().await.unwrap().unwrap();
        assert_eq!(token.access_token, "second");
        assert_eq!(token.expiry.timestamp(), expiry.timestamp());
    }

    #[tokio::test]
    async fn test_clear() {
        let store = store();
        store
            .upsert(&Token {
                access_token: "tok".to_string(),
                expiry: Utc::now(),
            })
            .await
            .unwrap();

        store.clear().await.unwrap();
        assert!(store.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_for_revision_requires_current_credential() {
        use crate::credentials::{Credential, CredentialStore};

        let db = Database::in_memory().unwrap();
        let cipher = SecretCipher::from_key_bytes(&[3u8; 32]).unwrap();
        let credentials = CredentialStore::new(db.clone(), cipher.clone());
        let store = TokenStore::new(db, cipher);
        let token = Token {
            access_token: "tok".to_string(),
            expiry: Utc::now() + Duration::minutes(30),
        };

        // No credential at all
        assert!(!store.upsert_for_revision(&token, "r1").await.unwrap());

        credentials
            .upsert(&Credential {
                client_id: "clinic".to_string(),
                client_secret: "secret".to_string(),
                token_url: "https://auth.example/token".to_string(),
            })
            .await
            .unwrap();
        let (_, revision) = credentials.get_with_revision().await.unwrap().unwrap();

        assert!(!store.upsert_for_revision(&token, "stale").await.unwrap());
        assert!(store.get().await.unwrap().is_none());

        assert!(store.upsert_for_revision(&token, &revision).await.unwrap());
        assert_eq!(store.get().await.unwrap().unwrap().access_token, "tok");
    }
}
