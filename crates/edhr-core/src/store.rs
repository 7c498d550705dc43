//! Organization store and the unit-of-work transaction coordinator.
//!
//! The in-memory state is authoritative and serialized through one mutex:
//! a unit of work holds the lock from `begin` to `commit`, so a
//! check-then-write sequence can never interleave with a concurrent
//! operation. PostgreSQL, when configured, mirrors every committed write:
//! staged rows are persisted in one database transaction *before* the
//! in-memory swap, and hydrated back into memory on startup.

use crate::error::HrError;
use crate::types::{
    District, Employee, Office, School, TransferRemark, TransferRequest, TransferStatus, User,
    Zone,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Organization persistence backend configuration.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    /// Keep all organization state in process memory only.
    Memory,
    /// Mirror all committed writes to PostgreSQL and hydrate on startup.
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn postgres(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self::Postgres {
            database_url: database_url.into(),
            max_connections,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Memory
    }
}

/// Complete organization state. One normalized map per entity; every
/// cross-entity relationship is an id reference.
#[derive(Debug, Clone, Default)]
pub struct OrgState {
    pub districts: HashMap<Uuid, District>,
    pub zones: HashMap<Uuid, Zone>,
    pub offices: HashMap<Uuid, Office>,
    pub schools: HashMap<Uuid, School>,
    pub users: HashMap<Uuid, User>,
    pub employees: HashMap<Uuid, Employee>,
    pub transfer_requests: HashMap<Uuid, TransferRequest>,
    pub transfer_remarks: Vec<TransferRemark>,
}

impl OrgState {
    /// The non-terminal transfer request for an employee, if any. The
    /// store-level counterpart of "at most one open transfer per employee".
    pub fn active_transfer_for(&self, employee_id: Uuid) -> Option<&TransferRequest> {
        self.transfer_requests
            .values()
            .find(|req| req.employee_id == employee_id && !req.status.is_terminal())
    }

    /// A school's roster: every employee currently posted at it.
    pub fn roster_for(&self, school_id: Uuid) -> Vec<&Employee> {
        self.employees
            .values()
            .filter(|employee| employee.school_id == Some(school_id))
            .collect()
    }

    pub fn remarks_for(&self, transfer_request_id: Uuid) -> Vec<TransferRemark> {
        self.transfer_remarks
            .iter()
            .filter(|remark| remark.transfer_request_id == transfer_request_id)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone)]
enum OrgStoreBackend {
    Memory,
    Postgres(PostgresOrgStore),
}

/// A staged row write, applied to PostgreSQL (when mirrored) and to the
/// authoritative state only at commit time.
#[derive(Debug, Clone)]
enum StagedWrite {
    UpsertDistrict(District),
    UpsertZone(Zone),
    UpsertOffice(Office),
    UpsertSchool(School),
    UpsertUser(User),
    UpsertEmployee(Employee),
    UpsertTransferRequest(TransferRequest),
    InsertRemark(TransferRemark),
}

/// The shared organization store.
#[derive(Debug, Clone)]
pub struct OrgStore {
    state: Arc<Mutex<OrgState>>,
    backend: OrgStoreBackend,
}

impl OrgStore {
    /// Build a store according to the configured backend, hydrating state
    /// from PostgreSQL when mirroring is enabled.
    pub async fn bootstrap(config: StorageConfig) -> Result<Self, HrError> {
        match config {
            StorageConfig::Memory => Ok(Self {
                state: Arc::new(Mutex::new(OrgState::default())),
                backend: OrgStoreBackend::Memory,
            }),
            StorageConfig::Postgres {
                database_url,
                max_connections,
            } => {
                let store = PostgresOrgStore::connect(&database_url, max_connections).await?;
                store.ensure_schema().await?;
                let state = store.load_state().await?;
                Ok(Self {
                    state: Arc::new(Mutex::new(state)),
                    backend: OrgStoreBackend::Postgres(store),
                })
            }
        }
    }

    /// Memory-backed store over pre-seeded state.
    pub fn with_state(state: OrgState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            backend: OrgStoreBackend::Memory,
        }
    }

    pub fn backend_label(&self) -> &'static str {
        match self.backend {
            OrgStoreBackend::Memory => "memory",
            OrgStoreBackend::Postgres(_) => "postgres",
        }
    }

    /// Open a unit of work. Holds the store lock until committed or dropped;
    /// this is the only way any component obtains write access.
    pub async fn begin(&self) -> UnitOfWork {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        UnitOfWork {
            guard,
            working,
            writes: Vec::new(),
            backend: self.backend.clone(),
        }
    }

    /// Consistent read-only snapshot for query endpoints.
    pub async fn snapshot(&self) -> OrgState {
        self.state.lock().await.clone()
    }
}

/// A bounded set of writes that commit or abort together.
///
/// Reads go through the working copy, so an operation observes its own
/// staged writes. Dropping the unit of work without committing discards
/// everything; nothing is visible to other operations before `commit`.
pub struct UnitOfWork {
    guard: OwnedMutexGuard<OrgState>,
    working: OrgState,
    writes: Vec<StagedWrite>,
    backend: OrgStoreBackend,
}

impl UnitOfWork {
    pub fn state(&self) -> &OrgState {
        &self.working
    }

    pub fn upsert_district(&mut self, district: District) {
        self.working.districts.insert(district.id, district.clone());
        self.writes.push(StagedWrite::UpsertDistrict(district));
    }

    pub fn upsert_zone(&mut self, zone: Zone) {
        self.working.zones.insert(zone.id, zone.clone());
        self.writes.push(StagedWrite::UpsertZone(zone));
    }

    pub fn upsert_office(&mut self, office: Office) {
        self.working.offices.insert(office.id, office.clone());
        self.writes.push(StagedWrite::UpsertOffice(office));
    }

    pub fn upsert_school(&mut self, school: School) {
        self.working.schools.insert(school.id, school.clone());
        self.writes.push(StagedWrite::UpsertSchool(school));
    }

    pub fn upsert_user(&mut self, user: User) {
        self.working.users.insert(user.id, user.clone());
        self.writes.push(StagedWrite::UpsertUser(user));
    }

    pub fn upsert_employee(&mut self, employee: Employee) {
        self.working.employees.insert(employee.id, employee.clone());
        self.writes.push(StagedWrite::UpsertEmployee(employee));
    }

    pub fn upsert_transfer_request(&mut self, request: TransferRequest) {
        self.working
            .transfer_requests
            .insert(request.id, request.clone());
        self.writes.push(StagedWrite::UpsertTransferRequest(request));
    }

    /// Remarks are append-only: there is deliberately no update path.
    pub fn insert_remark(&mut self, remark: TransferRemark) {
        self.working.transfer_remarks.push(remark.clone());
        self.writes.push(StagedWrite::InsertRemark(remark));
    }

    /// Persist staged writes (mirror first, then swap the working copy into
    /// the authoritative state). A mirror failure aborts with nothing
    /// applied on either side.
    pub async fn commit(self) -> Result<(), HrError> {
        let UnitOfWork {
            mut guard,
            working,
            writes,
            backend,
        } = self;

        if let OrgStoreBackend::Postgres(store) = &backend {
            store.apply(&writes).await?;
        }

        *guard = working;
        Ok(())
    }
}

/// Run a transactional operation under the coordinator's time bound.
///
/// An elapsed timer drops the operation's unit of work, so no partial
/// writes become visible; the caller sees `Timeout`, distinct from
/// `InvalidState` and `Conflict`.
pub async fn with_deadline<T, F>(
    what: &str,
    limit: std::time::Duration,
    fut: F,
) -> Result<T, HrError>
where
    F: std::future::Future<Output = Result<T, HrError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(HrError::Timeout(format!(
            "{what} exceeded {}ms",
            limit.as_millis()
        ))),
    }
}

#[derive(Debug, Clone)]
struct PostgresOrgStore {
    pool: PgPool,
}

/// Entity tables all share one shape: the id key plus the serialized
/// document. Transfer requests additionally expose `employee_id` and
/// `status` as columns so the open-transfer uniqueness guard can live in
/// the database as well.
const ENTITY_TABLES: [&str; 6] = [
    "edhr_districts",
    "edhr_zones",
    "edhr_offices",
    "edhr_schools",
    "edhr_users",
    "edhr_employees",
];

impl PostgresOrgStore {
    async fn connect(database_url: &str, max_connections: u32) -> Result<Self, HrError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| HrError::Storage(format!("postgres connect failed: {e}")))?;

        Ok(Self { pool })
    }

    async fn ensure_schema(&self) -> Result<(), HrError> {
        for table in ENTITY_TABLES {
            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id UUID PRIMARY KEY,
                    doc JSONB NOT NULL
                )"
            ))
            .execute(&self.pool)
            .await
            .map_err(|e| HrError::Storage(format!("postgres schema create failed: {e}")))?;
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS edhr_transfer_requests (
                id UUID PRIMARY KEY,
                employee_id UUID NOT NULL,
                status TEXT NOT NULL,
                doc JSONB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| HrError::Storage(format!("postgres schema create failed: {e}")))?;

        // Database-side twin of the engine's duplicate-pending check.
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_edhr_one_open_transfer_per_employee
            ON edhr_transfer_requests (employee_id)
            WHERE status IN ('pending', 'ceo_approved')
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| HrError::Storage(format!("postgres index create failed: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS edhr_transfer_remarks (
                id UUID PRIMARY KEY,
                transfer_request_id UUID NOT NULL,
                doc JSONB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| HrError::Storage(format!("postgres schema create failed: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_edhr_remarks_request
             ON edhr_transfer_remarks (transfer_request_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| HrError::Storage(format!("postgres index create failed: {e}")))?;

        Ok(())
    }

    async fn load_state(&self) -> Result<OrgState, HrError> {
        let mut state = OrgState::default();

        state.districts = self.load_entities("edhr_districts").await?;
        state.zones = self.load_entities("edhr_zones").await?;
        state.offices = self.load_entities("edhr_offices").await?;
        state.schools = self.load_entities("edhr_schools").await?;
        state.users = self.load_entities("edhr_users").await?;
        state.employees = self.load_entities("edhr_employees").await?;

        let rows = sqlx::query("SELECT id, doc FROM edhr_transfer_requests")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| HrError::Storage(format!("postgres load failed: {e}")))?;
        for row in rows {
            let request: TransferRequest = decode_doc(&row, "edhr_transfer_requests")?;
            state.transfer_requests.insert(request.id, request);
        }

        let rows = sqlx::query("SELECT id, doc FROM edhr_transfer_remarks ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| HrError::Storage(format!("postgres load failed: {e}")))?;
        for row in rows {
            let remark: TransferRemark = decode_doc(&row, "edhr_transfer_remarks")?;
            state.transfer_remarks.push(remark);
        }
        state
            .transfer_remarks
            .sort_by_key(|remark| remark.added_date);

        Ok(state)
    }

    async fn load_entities<T>(&self, table: &str) -> Result<HashMap<Uuid, T>, HrError>
    where
        T: serde::de::DeserializeOwned,
    {
        let rows = sqlx::query(&format!("SELECT id, doc FROM {table}"))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| HrError::Storage(format!("postgres load failed: {e}")))?;

        let mut entities = HashMap::with_capacity(rows.len());
        for row in rows {
            let id: Uuid = row
                .try_get("id")
                .map_err(|e| HrError::Storage(format!("postgres decode id failed: {e}")))?;
            entities.insert(id, decode_doc(&row, table)?);
        }
        Ok(entities)
    }

    async fn apply(&self, writes: &[StagedWrite]) -> Result<(), HrError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| HrError::Storage(format!("postgres begin failed: {e}")))?;

        for write in writes {
            match write {
                StagedWrite::UpsertDistrict(d) => {
                    upsert_entity(&mut tx, "edhr_districts", d.id, d).await?
                }
                StagedWrite::UpsertZone(z) => upsert_entity(&mut tx, "edhr_zones", z.id, z).await?,
                StagedWrite::UpsertOffice(o) => {
                    upsert_entity(&mut tx, "edhr_offices", o.id, o).await?
                }
                StagedWrite::UpsertSchool(s) => {
                    upsert_entity(&mut tx, "edhr_schools", s.id, s).await?
                }
                StagedWrite::UpsertUser(u) => upsert_entity(&mut tx, "edhr_users", u.id, u).await?,
                StagedWrite::UpsertEmployee(e) => {
                    upsert_entity(&mut tx, "edhr_employees", e.id, e).await?
                }
                StagedWrite::UpsertTransferRequest(request) => {
                    let doc = encode_doc(request)?;
                    sqlx::query(
                        r#"
                        INSERT INTO edhr_transfer_requests (id, employee_id, status, doc)
                        VALUES ($1, $2, $3, $4)
                        ON CONFLICT (id) DO UPDATE
                        SET employee_id = EXCLUDED.employee_id,
                            status = EXCLUDED.status,
                            doc = EXCLUDED.doc
                        "#,
                    )
                    .bind(request.id)
                    .bind(request.employee_id)
                    .bind(request.status.as_str())
                    .bind(&doc)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| map_unique_violation(e, request.status))?;
                }
                StagedWrite::InsertRemark(remark) => {
                    let doc = encode_doc(remark)?;
                    sqlx::query(
                        "INSERT INTO edhr_transfer_remarks (id, transfer_request_id, doc)
                         VALUES ($1, $2, $3)",
                    )
                    .bind(remark.id)
                    .bind(remark.transfer_request_id)
                    .bind(&doc)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| HrError::Storage(format!("postgres insert failed: {e}")))?;
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| HrError::Storage(format!("postgres commit failed: {e}")))?;
        Ok(())
    }
}

async fn upsert_entity<T: serde::Serialize>(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    table: &str,
    id: Uuid,
    entity: &T,
) -> Result<(), HrError> {
    let doc = encode_doc(entity)?;
    sqlx::query(&format!(
        "INSERT INTO {table} (id, doc) VALUES ($1, $2)
         ON CONFLICT (id) DO UPDATE SET doc = EXCLUDED.doc"
    ))
    .bind(id)
    .bind(&doc)
    .execute(&mut **tx)
    .await
    .map_err(|e| HrError::Storage(format!("postgres upsert failed: {e}")))?;
    Ok(())
}

fn encode_doc<T: serde::Serialize>(entity: &T) -> Result<serde_json::Value, HrError> {
    serde_json::to_value(entity).map_err(|e| HrError::Storage(format!("doc encode failed: {e}")))
}

fn decode_doc<T: serde::de::DeserializeOwned>(
    row: &sqlx::postgres::PgRow,
    table: &str,
) -> Result<T, HrError> {
    let doc: serde_json::Value = row
        .try_get("doc")
        .map_err(|e| HrError::Storage(format!("postgres decode doc failed for {table}: {e}")))?;
    serde_json::from_value(doc)
        .map_err(|e| HrError::Storage(format!("doc decode failed for {table}: {e}")))
}

/// The partial unique index firing means two open transfers raced for one
/// employee; report that as the same conflict the engine-level check raises.
fn map_unique_violation(err: sqlx::Error, status: TransferStatus) -> HrError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") && !status.is_terminal() {
            return HrError::Conflict(
                "an open transfer request already exists for this employee".to_string(),
            );
        }
    }
    HrError::Storage(format!("postgres insert failed: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{District, Employee};

    #[tokio::test]
    async fn dropped_unit_of_work_leaves_no_trace() {
        let store = OrgStore::bootstrap(StorageConfig::memory()).await.unwrap();

        {
            let mut uow = store.begin().await;
            uow.upsert_district(District::new("North"));
            // No commit.
        }

        assert!(store.snapshot().await.districts.is_empty());
    }

    #[tokio::test]
    async fn committed_writes_become_visible_atomically() {
        let store = OrgStore::bootstrap(StorageConfig::memory()).await.unwrap();

        let district = District::new("North");
        let employee = Employee::new("A. Teacher", Uuid::new_v4());
        let mut uow = store.begin().await;
        uow.upsert_district(district.clone());
        uow.upsert_employee(employee.clone());
        uow.commit().await.unwrap();

        let state = store.snapshot().await;
        assert!(state.districts.contains_key(&district.id));
        assert!(state.employees.contains_key(&employee.id));
    }

    #[tokio::test]
    async fn unit_of_work_observes_its_own_staged_writes() {
        let store = OrgStore::bootstrap(StorageConfig::memory()).await.unwrap();

        let district = District::new("South");
        let mut uow = store.begin().await;
        uow.upsert_district(district.clone());
        assert!(uow.state().districts.contains_key(&district.id));
        drop(uow);

        // Staged reads never leak into the shared state.
        assert!(store.snapshot().await.districts.is_empty());
    }

    #[tokio::test]
    async fn roster_lists_only_employees_posted_at_the_school() {
        let store = OrgStore::bootstrap(StorageConfig::memory()).await.unwrap();
        let office_id = Uuid::new_v4();
        let school_id = Uuid::new_v4();

        let posted = Employee::new("A. Posted", office_id).with_school(school_id);
        let elsewhere = Employee::new("B. Elsewhere", office_id).with_school(Uuid::new_v4());
        let unassigned = Employee::new("C. Unassigned", office_id);

        let mut uow = store.begin().await;
        uow.upsert_employee(posted.clone());
        uow.upsert_employee(elsewhere);
        uow.upsert_employee(unassigned);
        uow.commit().await.unwrap();

        let state = store.snapshot().await;
        let roster = state.roster_for(school_id);
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].id, posted.id);
    }

    #[tokio::test]
    async fn elapsed_deadline_surfaces_timeout_and_discards_staged_writes() {
        let store = OrgStore::bootstrap(StorageConfig::memory()).await.unwrap();

        let err = with_deadline(
            "slow operation",
            std::time::Duration::from_millis(20),
            async {
                let mut uow = store.begin().await;
                uow.upsert_district(District::new("West"));
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                uow.commit().await
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HrError::Timeout(_)));

        // The abandoned unit of work took its staged writes with it.
        assert!(store.snapshot().await.districts.is_empty());
    }

    #[tokio::test]
    async fn begin_serializes_against_open_unit_of_work() {
        let store = OrgStore::bootstrap(StorageConfig::memory()).await.unwrap();

        let mut uow = store.begin().await;
        uow.upsert_district(District::new("East"));

        let second = tokio::time::timeout(std::time::Duration::from_millis(50), store.begin());
        assert!(second.await.is_err(), "begin must block while a unit of work is open");

        uow.commit().await.unwrap();
        let uow = store.begin().await;
        assert_eq!(uow.state().districts.len(), 1);
    }
}
