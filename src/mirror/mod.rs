//! Local read replica of upstream resources.
//!
//! Written only after the upstream confirmed a mutation, so the mirror never
//! holds state the upstream did not accept. Documents are keyed by
//! `(kind, id)`.

mod patch;

pub use patch::{apply_replacements, replacement_ops, Replacement};

use crate::resource::ResourceKind;
use crate::storage::Database;
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};

/// A mirrored document as returned by the read API.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct MirroredDocument {
    pub kind: ResourceKind,
    pub id: String,
    pub document: Value,
    pub updated_at: String,
}

#[derive(Clone)]
pub struct MirrorStore {
    db: Database,
}

impl MirrorStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Stores `document` as the full known state of `(kind, id)`.
    pub async fn upsert(&self, kind: ResourceKind, id: &str, document: Value) -> Result<()> {
        let id = id.to_string();
        self.db
            .run("mirror upsert", move |conn| {
                write_document(conn, kind, &id, &document)
            })
            .await
    }

    /// Overlays the top-level fields of `fields` onto the stored document,
    /// creating it when absent. The stored document always carries `"id"`.
    pub async fn merge(&self, kind: ResourceKind, id: &str, fields: Map<String, Value>) -> Result<()> {
        let id = id.to_string();
        self.db
            .run("mirror merge", move |conn| {
                let tx = conn.unchecked_transaction()?;
                let mut document = read_document(&tx, kind, &id)?
                    .filter(Value::is_object)
                    .unwrap_or_else(|| Value::Object(Map::new()));

                if let Value::Object(map) = &mut document {
                    map.insert("id".to_string(), Value::String(id.clone()));
                    for (key, value) in fields {
                        map.insert(key, value);
                    }
                }

                write_document(&tx, kind, &id, &document)?;
                tx.commit()?;
                Ok(())
            })
            .await
    }

    /// Applies `replace` operations to an existing document.
    ///
    /// Returns `false` without writing when there is nothing to apply or no
    /// document is mirrored under `id`.
    pub async fn apply_replacements(
        &self,
        kind: ResourceKind,
        id: &str,
        replacements: Vec<Replacement>,
    ) -> Result<bool> {
        if replacements.is_empty() {
            return Ok(false);
        }

        let id = id.to_string();
        self.db
            .run("mirror patch", move |conn| {
                let tx = conn.unchecked_transaction()?;
                let Some(mut document) = read_document(&tx, kind, &id)? else {
                    return Ok(false);
                };

                apply_replacements(&mut document, &replacements);
                write_document(&tx, kind, &id, &document)?;
                tx.commit()?;
                Ok(true)
            })
            .await
    }

    pub async fn get(&self, kind: ResourceKind, id: &str) -> Result<Option<MirroredDocument>> {
        let id = id.to_string();
        self.db
            .run("mirror get", move |conn| {
                let row = conn
                    .query_row(
                        "SELECT document, updated_at FROM mirrored_resources WHERE kind = ?1 AND id = ?2",
                        params![kind.as_str(), id],
                        |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                    )
                    .optional()?;

                row.map(|(document, updated_at)| -> Result<MirroredDocument> {
                    Ok(MirroredDocument {
                        kind,
                        id: id.clone(),
                        document: serde_json::from_str(&document)
                            .context("Corrupt mirrored document")?,
                        updated_at,
                    })
                })
                .transpose()
            })
            .await
    }

    /// All mirrored documents of one kind, ordered by id.
    pub async fn list(&self, kind: ResourceKind) -> Result<Vec<MirroredDocument>> {
        self.db
            .run("mirror list", move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, document, updated_at FROM mirrored_resources
                     WHERE kind = ?1 ORDER BY id",
                )?;
                let rows = stmt
                    .query_map(params![kind.as_str()], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                rows.into_iter()
                    .map(|(id, document, updated_at)| -> Result<MirroredDocument> {
                        let document = serde_json::from_str(&document)
                            .with_context(|| format!("Corrupt mirrored document {}", id))?;
                        Ok(MirroredDocument {
                            kind,
                            id,
                            document,
                            updated_at,
                        })
                    })
                    .collect()
            })
            .await
    }
}

fn read_document(conn: &Connection, kind: ResourceKind, id: &str) -> Result<Option<Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT document FROM mirrored_resources WHERE kind = ?1 AND id = ?2",
            params![kind.as_str(), id],
            |row| row.get(0),
        )
        .optional()?;

    raw.map(|s| serde_json::from_str(&s).context("Corrupt mirrored document"))
        .transpose()
}

fn write_document(conn: &Connection, kind: ResourceKind, id: &str, document: &Value) -> Result<()> {
    let json = serde_json::to_string(document).context("Failed to serialize document")?;
    conn.execute(
        r#"
        INSERT INTO mirrored_resources (kind, id, document, updated_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(kind, id) DO UPDATE SET
            document = excluded.document,
            updated_at = excluded.updated_at
        "#,
        params![kind.as_str(), id, json, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}
