//! REST surface for the district employee management core.
//!
//! Authorization context arrives as headers resolved by the upstream
//! identity gate; this layer parses them into a `CallerContext`, runs the
//! role capability check once, and hands off to the workflow engine or
//! provisioner. Error kinds map deterministically onto HTTP status codes.

#![deny(unsafe_code)]

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::NaiveDate;
use edhr_core::{
    access, AdminCredentials, AuditEntry, AuditLedger, CallerContext, CreateTransferInput,
    HrError, LedgerConfig, Office, OfficeSpec, OfficeType, OrgProvisioner, OrgStore, Role,
    RespondAction, ReviewAction, SchoolSpec, StorageConfig, TransferRemark, TransferRequest,
    TransferWorkflow, User, Zone, ZonalOfficeSpec, DEFAULT_OP_TIMEOUT,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const HEADER_ACTOR_ID: &str = "x-actor-id";
pub const HEADER_ACTOR_ROLE: &str = "x-actor-role";
pub const HEADER_ACTOR_OFFICE: &str = "x-actor-office";
pub const HEADER_ACTOR_ZONE: &str = "x-actor-zone";
pub const HEADER_ACTOR_DISTRICT: &str = "x-actor-district";
pub const HEADER_FORWARDED_FOR: &str = "x-forwarded-for";

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub storage: StorageConfig,
    pub op_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::Memory,
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }
}

#[derive(Clone)]
pub struct ServiceState {
    pub store: OrgStore,
    pub ledger: Arc<AuditLedger>,
    pub workflow: Arc<TransferWorkflow>,
    pub provisioner: Arc<OrgProvisioner>,
}

impl ServiceState {
    pub async fn bootstrap(config: ServiceConfig) -> Result<Self, HrError> {
        let ledger_config = match &config.storage {
            StorageConfig::Memory => LedgerConfig::Memory,
            StorageConfig::Postgres {
                database_url,
                max_connections,
            } => LedgerConfig::Postgres {
                database_url: database_url.clone(),
                max_connections: *max_connections,
            },
        };

        let store = OrgStore::bootstrap(config.storage).await?;
        let ledger = Arc::new(AuditLedger::bootstrap(ledger_config).await?);
        Ok(Self::from_parts(store, ledger, config.op_timeout))
    }

    /// Assemble state over an existing store; used by tests and embedders.
    pub fn from_parts(store: OrgStore, ledger: Arc<AuditLedger>, op_timeout: Duration) -> Self {
        let workflow = Arc::new(TransferWorkflow::new(
            store.clone(),
            ledger.clone(),
            op_timeout,
        ));
        let provisioner = Arc::new(OrgProvisioner::new(
            store.clone(),
            ledger.clone(),
            op_timeout,
        ));
        Self {
            store,
            ledger,
            workflow,
            provisioner,
        }
    }
}

pub fn build_router(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/transfers", post(create_transfer).get(list_transfers))
        .route("/v1/transfers/:id", get(get_transfer))
        .route("/v1/transfers/:id/approve", put(approve_transfer))
        .route("/v1/transfers/:id/respond", put(respond_transfer))
        .route("/v1/zones", post(create_zone))
        .route("/v1/offices", post(create_office))
        .route("/v1/audit/entries", get(list_audit_entries))
        .with_state(state)
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ApiError(#[from] HrError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            HrError::Validation(_) => StatusCode::BAD_REQUEST,
            HrError::Forbidden(_) => StatusCode::FORBIDDEN,
            HrError::NotFound(_) => StatusCode::NOT_FOUND,
            HrError::Conflict(_) | HrError::InvalidState(_) | HrError::AlreadyFinal(_) => {
                StatusCode::CONFLICT
            }
            HrError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            HrError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({
            "error": { "kind": self.0.kind(), "message": self.0.to_string() }
        });
        (status, Json(body)).into_response()
    }
}

/// Parse the gate-resolved caller headers. The id and role are mandatory;
/// scope headers are optional because district reviewers carry none.
fn caller_from_headers(headers: &HeaderMap) -> Result<CallerContext, ApiError> {
    let subject = required_uuid_header(headers, HEADER_ACTOR_ID)?;
    let role_value = headers
        .get(HEADER_ACTOR_ROLE)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            ApiError(HrError::Validation(format!(
                "missing '{HEADER_ACTOR_ROLE}' header"
            )))
        })?;
    let role = Role::from_str(role_value).map_err(ApiError)?;

    let mut ctx = CallerContext::new(subject, role);
    ctx.office_id = optional_uuid_header(headers, HEADER_ACTOR_OFFICE)?;
    ctx.zone_id = optional_uuid_header(headers, HEADER_ACTOR_ZONE)?;
    ctx.district_id = optional_uuid_header(headers, HEADER_ACTOR_DISTRICT)?;
    ctx.ip = headers
        .get(HEADER_FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());
    Ok(ctx)
}

fn required_uuid_header(headers: &HeaderMap, name: &str) -> Result<Uuid, ApiError> {
    optional_uuid_header(headers, name)?
        .ok_or_else(|| ApiError(HrError::Validation(format!("missing '{name}' header"))))
}

fn optional_uuid_header(headers: &HeaderMap, name: &str) -> Result<Option<Uuid>, ApiError> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => {
            let text = value.to_str().map_err(|_| {
                ApiError(HrError::Validation(format!("malformed '{name}' header")))
            })?;
            let id = Uuid::parse_str(text).map_err(|_| {
                ApiError(HrError::Validation(format!(
                    "'{name}' header is not a valid id"
                )))
            })?;
            Ok(Some(id))
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    storage_backend: &'static str,
    ledger_backend: &'static str,
}

async fn health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "edhr-service",
        storage_backend: state.store.backend_label(),
        ledger_backend: state.ledger.backend_label(),
    })
}

/// Wire view of a user account; credential material never leaves the core.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: Uuid,
    pub user_name: String,
    pub role: Role,
    pub office_id: Option<Uuid>,
    pub zone_id: Option<Uuid>,
    pub district_id: Option<Uuid>,
    pub school_id: Option<Uuid>,
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            user_name: user.user_name,
            role: user.role,
            office_id: user.office_id,
            zone_id: user.zone_id,
            district_id: user.district_id,
            school_id: user.school_id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTransferBody {
    employee: Uuid,
    from_office: Uuid,
    to_office: Uuid,
    transfer_type: String,
    transfer_reason: String,
    transfer_order_no: Option<String>,
    transfer_order_date: Option<NaiveDate>,
    transfer_order_document_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransferResponse {
    transfer_request: TransferRequest,
}

async fn create_transfer(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Json(body): Json<CreateTransferBody>,
) -> Result<(StatusCode, Json<TransferResponse>), ApiError> {
    let ctx = caller_from_headers(&headers)?;
    access::authorize(ctx.role, access::Operation::CreateTransfer)?;

    let request = state
        .workflow
        .create_request(
            &ctx,
            CreateTransferInput {
                employee_id: body.employee,
                from_office_id: body.from_office,
                to_office_id: body.to_office,
                transfer_type: body.transfer_type,
                transfer_reason: body.transfer_reason,
                transfer_order_no: body.transfer_order_no,
                transfer_order_date: body.transfer_order_date,
                transfer_order_document_ref: body.transfer_order_document_ref,
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(TransferResponse {
            transfer_request: request,
        }),
    ))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewBody {
    action: ReviewAction,
    remark_text: Option<String>,
}

async fn approve_transfer(
    State(state): State<ServiceState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<ReviewBody>,
) -> Result<Json<TransferResponse>, ApiError> {
    let ctx = caller_from_headers(&headers)?;
    access::authorize(ctx.role, access::Operation::ReviewTransfer)?;

    let request = state
        .workflow
        .review_request(&ctx, id, body.action, body.remark_text)
        .await?;
    Ok(Json(TransferResponse {
        transfer_request: request,
    }))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RespondBody {
    action: RespondAction,
    reason: Option<String>,
}

async fn respond_transfer(
    State(state): State<ServiceState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<RespondBody>,
) -> Result<Json<TransferResponse>, ApiError> {
    let ctx = caller_from_headers(&headers)?;
    access::authorize(ctx.role, access::Operation::RespondTransfer)?;

    let request = state
        .workflow
        .respond_to_request(&ctx, id, body.action, body.reason)
        .await?;
    Ok(Json(TransferResponse {
        transfer_request: request,
    }))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransferDetailResponse {
    transfer_request: TransferRequest,
    remarks: Vec<TransferRemark>,
}

async fn get_transfer(
    State(state): State<ServiceState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<TransferDetailResponse>, ApiError> {
    let ctx = caller_from_headers(&headers)?;
    access::authorize(ctx.role, access::Operation::ReadTransfers)?;

    let (request, remarks) = state.workflow.get_request(id).await?;
    Ok(Json(TransferDetailResponse {
        transfer_request: request,
        remarks,
    }))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListTransfersQuery {
    office: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
struct ListTransfersResponse {
    items: Vec<TransferRequest>,
}

async fn list_transfers(
    State(state): State<ServiceState>,
    Query(query): Query<ListTransfersQuery>,
    headers: HeaderMap,
) -> Result<Json<ListTransfersResponse>, ApiError> {
    let ctx = caller_from_headers(&headers)?;
    access::authorize(ctx.role, access::Operation::ReadTransfers)?;

    Ok(Json(ListTransfersResponse {
        items: state.workflow.list_requests(query.office).await,
    }))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ZonalOfficeBody {
    office_code: String,
    office_name: String,
    #[serde(default)]
    is_ddo: bool,
    ddo_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateZoneBody {
    name: String,
    district: Uuid,
    zeo_user_name: String,
    zeo_password: String,
    zonal_office: ZonalOfficeBody,
}

#[derive(Debug, Clone, Serialize)]
struct ZoneResponse {
    zone: Zone,
    user: UserView,
}

async fn create_zone(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Json(body): Json<CreateZoneBody>,
) -> Result<(StatusCode, Json<ZoneResponse>), ApiError> {
    let ctx = caller_from_headers(&headers)?;
    access::authorize(ctx.role, access::Operation::ProvisionZone)?;

    let (zone, user) = state
        .provisioner
        .provision_zone(
            &ctx,
            &body.name,
            body.district,
            ZonalOfficeSpec {
                office_code: body.zonal_office.office_code,
                office_name: body.zonal_office.office_name,
                is_ddo: body.zonal_office.is_ddo,
                ddo_code: body.zonal_office.ddo_code,
            },
            AdminCredentials {
                user_name: body.zeo_user_name,
                password: body.zeo_password,
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ZoneResponse {
            zone,
            user: user.into(),
        }),
    ))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchoolBody {
    name: String,
    udise_code: String,
    admin_user_name: Option<String>,
    admin_password: Option<String>,
}

impl SchoolBody {
    fn into_spec(self) -> Result<SchoolSpec, HrError> {
        let admin = match (self.admin_user_name, self.admin_password) {
            (None, None) => None,
            (Some(user_name), Some(password)) => Some(AdminCredentials {
                user_name,
                password,
            }),
            _ => {
                return Err(HrError::Validation(
                    "school admin credentials require both a user name and password".to_string(),
                ))
            }
        };
        Ok(SchoolSpec {
            name: self.name,
            udise_code: self.udise_code,
            admin,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateOfficeBody {
    office_id: String,
    office_name: String,
    office_type: OfficeType,
    zone: Uuid,
    parent_office_id: Option<Uuid>,
    #[serde(default)]
    is_ddo: bool,
    ddo_code: Option<String>,
    #[serde(default)]
    schools: Vec<SchoolBody>,
}

#[derive(Debug, Clone, Serialize)]
struct OfficeResponse {
    office: Office,
}

async fn create_office(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Json(body): Json<CreateOfficeBody>,
) -> Result<(StatusCode, Json<OfficeResponse>), ApiError> {
    let ctx = caller_from_headers(&headers)?;
    access::authorize(ctx.role, access::Operation::ProvisionOffice)?;

    let school_specs = body
        .schools
        .into_iter()
        .map(SchoolBody::into_spec)
        .collect::<Result<Vec<_>, _>>()?;

    let office = state
        .provisioner
        .provision_office(
            &ctx,
            OfficeSpec {
                office_code: body.office_id,
                office_name: body.office_name,
                office_type: body.office_type,
                parent_office_id: body.parent_office_id,
                is_ddo: body.is_ddo,
                ddo_code: body.ddo_code,
            },
            school_specs,
            body.zone,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(OfficeResponse { office })))
}

#[derive(Debug, Clone, Deserialize)]
struct AuditQuery {
    actor: Option<Uuid>,
    action: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
struct AuditResponse {
    returned: usize,
    items: Vec<AuditEntry>,
}

async fn list_audit_entries(
    State(state): State<ServiceState>,
    Query(query): Query<AuditQuery>,
    headers: HeaderMap,
) -> Result<Json<AuditResponse>, ApiError> {
    let ctx = caller_from_headers(&headers)?;
    access::authorize(ctx.role, access::Operation::ReadAudit)?;

    let limit = query.limit.unwrap_or(100).min(1000);
    let items = state
        .ledger
        .query(query.actor, query.action.as_deref(), limit)
        .await;
    Ok(Json(AuditResponse {
        returned: items.len(),
        items,
    }))
}
