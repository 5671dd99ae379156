//! Append-only audit trail of upstream transactions.
//!
//! One entry per upstream reply, whatever its status. Entries are never
//! updated or deleted by the gateway.

use crate::storage::Database;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Create,
    Get,
    Put,
    Patch,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Get => "get",
            AuditAction::Put => "put",
            AuditAction::Patch => "patch",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(AuditAction::Create),
            "get" => Ok(AuditAction::Get),
            "put" => Ok(AuditAction::Put),
            "patch" => Ok(AuditAction::Patch),
            other => Err(anyhow::anyhow!("Unknown audit action '{}'", other)),
        }
    }
}

/// An entry before it is stamped and stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    pub user: String,
    pub action: AuditAction,
    pub resource: String,
    /// Empty when the upstream did not reveal an id (failed create).
    pub resource_id: String,
    pub status_code: u16,
    pub details: Map<String, Value>,
}

/// A stored audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub user: String,
    pub action: AuditAction,
    pub resource: String,
    pub resource_id: String,
    pub status_code: u16,
    pub details: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

/// Audit persistence: append and filtered listing.
#[derive(Clone)]
pub struct AuditStore {
    db: Database,
}

impl AuditStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn append(&self, entry: AuditEntry) -> Result<()> {
        let details =
            serde_json::to_string(&entry.details).context("Failed to serialize audit details")?;

        self.db
            .run("append audit entry", move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO audit_logs (
                        id, user, action, resource, resource_id, status_code, details, timestamp
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    "#,
                    params![
                        entry.id.to_string(),
                        entry.user,
                        entry.action.as_str(),
                        entry.resource,
                        entry.resource_id,
                        entry.status_code,
                        details,
                        entry.timestamp.to_rfc3339(),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    /// Lists entries oldest first, optionally only those for one resource.
    pub async fn list(&self, resource: Option<&str>) -> Result<Vec<AuditEntry>> {
        let resource = resource.map(str::to_string);

        self.db
            .run("list audit entries", move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT id, user, action, resource, resource_id, status_code, details, timestamp
                    FROM audit_logs
                    WHERE (?1 IS NULL OR resource = ?1)
                    ORDER BY seq ASC
                    "#,
                )?;

                let rows = stmt
                    .query_map(params![resource], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, u16>(5)?,
                            row.get::<_, String>(6)?,
                            row.get::<_, String>(7)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                rows.into_iter().map(decode_row).collect()
            })
            .await
    }
}

type AuditRow = (String, String, String, String, String, u16, String, String);

fn decode_row(row: AuditRow) -> Result<AuditEntry> {
    let (id, user, action, resource, resource_id, status_code, details, timestamp) = row;

    Ok(AuditEntry {
        id: Uuid::parse_str(&id).with_context(|| format!("Invalid audit id {}", id))?,
        user,
        action: action.parse()?,
        resource,
        resource_id,
        status_code,
        details: serde_json::from_str(&details)
            .with_context(|| format!("Invalid details in audit entry {}", id))?,
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .with_context(|| format!("Invalid timestamp in audit entry {}", id))?
            .with_timezone(&Utc),
    })
}

/// Stamps entries and appends them to the audit store.
#[derive(Clone)]
pub struct AuditRecorder {
    store: AuditStore,
}

impl AuditRecorder {
    pub fn new(store: AuditStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &AuditStore {
        &self.store
    }

    /// Assigns an id and the current time, then appends the entry.
    pub async fn record(&self, entry: NewAuditEntry) -> Result<AuditEntry> {
        let stamped = AuditEntry {
            id: Uuid::now_v7(),
            user: entry.user,
            action: entry.action,
            resource: entry.resource,
            resource_id: entry.resource_id,
            status_code: entry.status_code,
            details: entry.details,
            timestamp: Utc::now(),
        };

        self.store.append(stamped.clone()).await?;

        tracing::debug!(
            audit_id = %stamped.id,
            action = %stamped.action,
            resource = %stamped.resource,
            status = stamped.status_code,
            "Audit entry recorded"
        );

        Ok(stamped)
    }
}

/// Turns a raw HTTP body into a JSON detail value: parsed JSON when possible,
/// the text otherwise, `null` when empty.
pub fn body_value(body: &[u8]) -> Value {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recorder() -> AuditRecorder {
        AuditRecorder::new(AuditStore::new(Database::in_memory().unwrap()))
    }

    fn entry(resource: &str, action: AuditAction, status: u16) -> NewAuditEntry {
        let mut details = Map::new();
        details.insert("requestBody".to_string(), json!({"name": "Clinic A"}));
        NewAuditEntry {
            user: "nurse-01".to_string(),
            action,
            resource: resource.to_string(),
            resource_id: "loc-1".to_string(),
            status_code: status,
            details,
        }
    }

    #[tokio::test]
    async fn test_record_stamps_and_lists() {
        let recorder = recorder();
        let before = Utc::now();

        let stored = recorder
            .record(entry("location", AuditAction::Create, 201))
            .await
            .unwrap();

        assert!(stored.timestamp >= before);
        let listed = recorder.store().list(None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, stored.id);
        assert_eq!(listed[0].action, AuditAction::Create);
        assert_eq!(listed[0].status_code, 201);
        assert_eq!(listed[0].details["requestBody"]["name"], "Clinic A");
    }

    #[tokio::test]
    async fn test_no_dedup() {
        let recorder = recorder();
        recorder.record(entry("location", AuditAction::Get, 200)).await.unwrap();
        recorder.record(entry("location", AuditAction::Get, 200)).await.unwrap();

        assert_eq!(recorder.store().list(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_filter_by_resource_keeps_order() {
        let recorder = recorder();
        recorder.record(entry("location", AuditAction::Create, 201)).await.unwrap();
        recorder.record(entry("patient", AuditAction::Get, 200)).await.unwrap();
        recorder.record(entry("location", AuditAction::Patch, 400)).await.unwrap();

        let locations = recorder.store().list(Some("location")).await.unwrap();
        let actions: Vec<AuditAction> = locations.iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![AuditAction::Create, AuditAction::Patch]);

        assert!(recorder.store().list(Some("encounter")).await.unwrap().is_empty());
    }

    #[test]
    fn test_entry_serialization_field_names() {
        let entry = AuditEntry {
            id: Uuid::now_v7(),
            user: "Admin".to_string(),
            action: AuditAction::Put,
            resource: "location".to_string(),
            resource_id: "loc-1".to_string(),
            status_code: 200,
            details: Map::new(),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["action"], "put");
        assert_eq!(json["resource_id"], "loc-1");
        assert_eq!(json["status_code"], 200);
    }

    #[test]
    fn test_body_value() {
        assert_eq!(body_value(br#"{"id":"x"}"#), json!({"id": "x"}));
        assert_eq!(body_value(b"upstream exploded"), json!("upstream exploded"));
        assert_eq!(body_value(b""), Value::Null);
        assert_eq!(body_value(b"  \n"), Value::Null);
    }
}
