//! Singleton credential persistence.
//!
//! The `credentials` table holds at most one row (`slot = 1`). Any change to
//! the credential also drops the cached token, which was issued for the old
//! client and must not outlive it. Every upsert stamps a fresh `revision` so a
//! token issued for an earlier credential can be told apart from one issued
//! for the current row.

use super::Credential;
use crate::storage::{Database, SecretCipher};
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

pub struct CredentialStore {
    db: Database,
    cipher: SecretCipher,
}

impl CredentialStore {
    pub fn new(db: Database, cipher: SecretCipher) -> Self {
        Self { db, cipher }
    }

    /// Replaces the stored credential (upsert). Never leaves two records.
    pub async fn upsert(&self, credential: &Credential) -> Result<()> {
        let sealed = self
            .cipher
            .seal(&credential.client_secret)
            .context("Failed to encrypt client secret")?;
        let credential = credential.clone();
        let revision = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        self.db
            .run("upsert credential", move |conn| {
                let tx = conn.unchecked_transaction()?;
                tx.execute(
                    r#"
                    INSERT INTO credentials (
                        slot, client_id, client_secret, client_secret_nonce, token_url,
                        revision, updated_at
                    )
                    VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)
                    ON CONFLICT(slot) DO UPDATE SET
                        client_id = excluded.client_id,
                        client_secret = excluded.client_secret,
                        client_secret_nonce = excluded.client_secret_nonce,
                        token_url = excluded.token_url,
                        revision = excluded.revision,
                        updated_at = excluded.updated_at
                    "#,
                    params![
                        credential.client_id,
                        sealed.ciphertext,
                        sealed.nonce,
                        credential.token_url,
                        revision,
                        now,
                    ],
                )?;
                tx.execute("DELETE FROM tokens", [])?;
                tx.commit()?;
                Ok(())
            })
            .await
    }

    /// Returns the current credential, or `None` when none is configured.
    pub async fn get(&self) -> Result<Option<Credential>> {
        Ok(self
            .get_with_revision()
            .await?
            .map(|(credential, _)| credential))
    }

    /// Returns the current credential together with its revision stamp.
    pub async fn get_with_revision(&self) -> Result<Option<(Credential, String)>> {
        let row = self
            .db
            .run("read credential", |conn| {
                let row = conn
                    .query_row(
                        "SELECT client_id, client_secret, client_secret_nonce, token_url, revision
                         FROM credentials WHERE slot = 1",
                        [],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, String>(2)?,
                                row.get::<_, String>(3)?,
                                row.get::<_, String>(4)?,
                            ))
                        },
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;

        let Some((client_id, secret, nonce, token_url, revision)) = row else {
            return Ok(None);
        };

        let client_secret = self
            .cipher
            .open(&secret, &nonce)
            .context("Failed to decrypt client secret")?;

        Ok(Some((
            Credential {
                client_id,
                client_secret,
                token_url,
            },
            revision,
        )))
    }

    /// Deletes every stored credential. Returns how many rows were removed.
    pub async fn clear(&self) -> Result<usize> {
        self.db
            .run("clear credentials", |conn| {
                let tx = conn.unchecked_transaction()?;
                let removed = tx.execute("DELETE FROM credentials", [])?;
                tx.execute("DELETE FROM tokens", [])?;
                tx.commit()?;
                Ok(removed)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{Token, TokenStore};
    use chrono::Duration;

    fn cipher() -> SecretCipher {
        SecretCipher::from_key_bytes(&[0u8; 32]).unwrap()
    }

    fn credential(client_id: &str) -> Credential {
        Credential {
            client_id: client_id.to_string(),
            client_secret: format!("{}-secret", client_id),
            token_url: "https://auth.example/oauth2/v1/accesstoken".to_string(),
        }
    }

    async fn count_rows(db: &Database) -> i64 {
        db.run("count credentials", |conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM credentials", [], |row| row.get(0))?)
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_get_when_empty() {
        let store = CredentialStore::new(Database::in_memory().unwrap(), cipher());
        assert!(store.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_upsert_replaces_first() {
        let db = Database::in_memory().unwrap();
        let store = CredentialStore::new(db.clone(), cipher());

        store.upsert(&credential("first")).await.unwrap();
        store.upsert(&credential("second")).await.unwrap();

        assert_eq!(count_rows(&db).await, 1);
        assert_eq!(store.get().await.unwrap(), Some(credential("second")));
    }

    #[tokio::test]
    async fn test_secret_is_sealed_at_rest() {
        let db = Database::in_memory().unwrap();
        let store = CredentialStore::new(db.clone(), cipher());
        store.upsert(&credential("clinic")).await.unwrap();

        let raw: String = db
            .run("raw secret", |conn| {
                Ok(conn.query_row("SELECT client_secret FROM credentials", [], |row| {
                    row.get(0)
                })?)
            })
            .await
            .unwrap();

        assert_ne!(raw, "clinic-secret");
    }

    #[tokio::test]
    async fn test_clear() {
        let db = Database::in_memory().unwrap();
        let store = CredentialStore::new(db.clone(), cipher());
        store.upsert(&credential("clinic")).await.unwrap();

        assert_eq!(store.clear().await.unwrap(), 1);
        assert!(store.get().await.unwrap().is_none());
        assert_eq!(store.clear().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_credential_change_drops_cached_token() {
        let db = Database::in_memory().unwrap();
        let store = CredentialStore::new(db.clone(), cipher());
        let tokens = TokenStore::new(db.clone(), cipher());

        store.upsert(&credential("first")).await.unwrap();
        tokens
            .upsert(&Token {
                access_token: "old".to_string(),
                expiry: Utc::now() + Duration::hours(1),
            })
            .await
            .unwrap();

        store.upsert(&credential("second")).await.unwrap();
        assert!(tokens.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_every_upsert_gets_a_new_revision() {
        let store = CredentialStore::new(Database::in_memory().unwrap(), cipher());

        store.upsert(&credential("clinic")).await.unwrap();
        let (_, first) = store.get_with_revision().await.unwrap().unwrap();
        store.upsert(&credential("clinic")).await.unwrap();
        let (stored, second) = store.get_with_revision().await.unwrap().unwrap();

        assert_eq!(stored, credential("clinic"));
        assert_ne!(first, second);
    }
}
