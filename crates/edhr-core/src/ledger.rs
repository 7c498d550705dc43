//! Append-only audit ledger.
//!
//! Every workflow transition and provisioning action records exactly one
//! entry. Appends are fire-and-continue: the business transaction has
//! already committed by the time the ledger is written, and a ledger fault
//! must never turn a legitimate state change into an error.

use crate::access::Role;
use crate::error::HrError;
use crate::types::CallerContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tokio::sync::Mutex;
use uuid::Uuid;

/// One domain event. Entries are never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub actor: Uuid,
    pub role: Role,
    pub action: String,
    pub description: String,
    pub ip: Option<String>,
    pub office_id: Option<Uuid>,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn from_caller(
        ctx: &CallerContext,
        action: impl Into<String>,
        description: impl Into<String>,
        office_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor: ctx.subject,
            role: ctx.role,
            action: action.into(),
            description: description.into(),
            ip: ctx.ip.clone(),
            office_id,
            recorded_at: Utc::now(),
        }
    }
}

#[derive(Debug)]
enum LedgerBackend {
    Memory,
    Postgres(PostgresAuditStore),
}

/// Audit ledger persistence configuration, mirroring the organization
/// store's backend split.
#[derive(Debug, Clone)]
pub enum LedgerConfig {
    Memory,
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self::Memory
    }
}

/// The append-only ledger. No mutation API exists past `record`.
#[derive(Debug)]
pub struct AuditLedger {
    entries: Mutex<Vec<AuditEntry>>,
    backend: LedgerBackend,
}

impl AuditLedger {
    pub fn in_memory() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            backend: LedgerBackend::Memory,
        }
    }

    pub async fn bootstrap(config: LedgerConfig) -> Result<Self, HrError> {
        match config {
            LedgerConfig::Memory => Ok(Self::in_memory()),
            LedgerConfig::Postgres {
                database_url,
                max_connections,
            } => {
                let store = PostgresAuditStore::connect(&database_url, max_connections).await?;
                store.ensure_schema().await?;
                let entries = store.load_entries().await?;
                Ok(Self {
                    entries: Mutex::new(entries),
                    backend: LedgerBackend::Postgres(store),
                })
            }
        }
    }

    pub fn backend_label(&self) -> &'static str {
        match self.backend {
            LedgerBackend::Memory => "memory",
            LedgerBackend::Postgres(_) => "postgres",
        }
    }

    /// Append an entry, swallowing any failure.
    ///
    /// Callers invoke this after their unit of work has committed; by
    /// policy the ledger is best-effort observability, so faults are
    /// logged and suppressed rather than propagated.
    pub async fn record(&self, entry: AuditEntry) {
        if let Err(err) = self.append(entry).await {
            tracing::warn!(error = %err, "audit append failed; business write already committed");
        }
    }

    async fn append(&self, entry: AuditEntry) -> Result<(), HrError> {
        if let LedgerBackend::Postgres(store) = &self.backend {
            store.insert_entry(&entry).await?;
        }

        let mut entries = self.entries.lock().await;
        entries.push(entry);
        Ok(())
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().await.clone()
    }

    /// Filtered read for the audit endpoint. Newest first.
    pub async fn query(
        &self,
        actor: Option<Uuid>,
        action: Option<&str>,
        limit: usize,
    ) -> Vec<AuditEntry> {
        let entries = self.entries.lock().await;
        entries
            .iter()
            .rev()
            .filter(|entry| actor.map(|a| entry.actor == a).unwrap_or(true))
            .filter(|entry| action.map(|a| entry.action == a).unwrap_or(true))
            .take(limit)
            .cloned()
            .collect()
    }
}

#[derive(Debug)]
struct PostgresAuditStore {
    pool: PgPool,
}

impl PostgresAuditStore {
    async fn connect(database_url: &str, max_connections: u32) -> Result<Self, HrError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| HrError::Storage(format!("postgres connect failed: {e}")))?;
        Ok(Self { pool })
    }

    async fn ensure_schema(&self) -> Result<(), HrError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS edhr_audit_entries (
                id UUID PRIMARY KEY,
                actor UUID NOT NULL,
                action TEXT NOT NULL,
                recorded_at TIMESTAMPTZ NOT NULL,
                doc JSONB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| HrError::Storage(format!("postgres schema create failed: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_edhr_audit_actor ON edhr_audit_entries (actor)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| HrError::Storage(format!("postgres index create failed: {e}")))?;

        Ok(())
    }

    async fn load_entries(&self) -> Result<Vec<AuditEntry>, HrError> {
        let rows = sqlx::query("SELECT doc FROM edhr_audit_entries ORDER BY recorded_at ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| HrError::Storage(format!("postgres load failed: {e}")))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let doc: serde_json::Value = row
                .try_get("doc")
                .map_err(|e| HrError::Storage(format!("postgres decode doc failed: {e}")))?;
            let entry: AuditEntry = serde_json::from_value(doc)
                .map_err(|e| HrError::Storage(format!("audit doc decode failed: {e}")))?;
            entries.push(entry);
        }
        Ok(entries)
    }

    async fn insert_entry(&self, entry: &AuditEntry) -> Result<(), HrError> {
        let doc = serde_json::to_value(entry)
            .map_err(|e| HrError::Storage(format!("audit doc encode failed: {e}")))?;
        sqlx::query(
            "INSERT INTO edhr_audit_entries (id, actor, action, recorded_at, doc)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(entry.id)
        .bind(entry.actor)
        .bind(&entry.action)
        .bind(entry.recorded_at)
        .bind(&doc)
        .execute(&self.pool)
        .await
        .map_err(|e| HrError::Storage(format!("postgres insert failed: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller() -> CallerContext {
        CallerContext::new(Uuid::new_v4(), Role::Ceo)
    }

    #[tokio::test]
    async fn records_and_reads_back_in_order() {
        let ledger = AuditLedger::in_memory();
        let ctx = caller();

        ledger
            .record(AuditEntry::from_caller(&ctx, "transfer.create", "created", None))
            .await;
        ledger
            .record(AuditEntry::from_caller(&ctx, "transfer.review", "approved", None))
            .await;

        let entries = ledger.entries().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "transfer.create");
        assert_eq!(entries[1].action, "transfer.review");
    }

    #[tokio::test]
    async fn query_filters_by_actor_and_action() {
        let ledger = AuditLedger::in_memory();
        let first = caller();
        let second = caller();

        ledger
            .record(AuditEntry::from_caller(&first, "zone.provision", "zone A", None))
            .await;
        ledger
            .record(AuditEntry::from_caller(&second, "zone.provision", "zone B", None))
            .await;
        ledger
            .record(AuditEntry::from_caller(&second, "office.provision", "office C", None))
            .await;

        let by_actor = ledger.query(Some(second.subject), None, 100).await;
        assert_eq!(by_actor.len(), 2);

        let by_action = ledger.query(None, Some("zone.provision"), 100).await;
        assert_eq!(by_action.len(), 2);

        let both = ledger
            .query(Some(second.subject), Some("office.provision"), 100)
            .await;
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].description, "office C");
    }
}
