use crate::access::Role;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Resolved caller identity handed in by the upstream identity gate.
///
/// Always passed explicitly into workflow/provisioner operations; no
/// component reads caller state from anywhere else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallerContext {
    pub subject: Uuid,
    pub role: Role,
    pub office_id: Option<Uuid>,
    pub zone_id: Option<Uuid>,
    pub district_id: Option<Uuid>,
    /// Source address, carried through to audit entries.
    pub ip: Option<String>,
}

impl CallerContext {
    pub fn new(subject: Uuid, role: Role) -> Self {
        Self {
            subject,
            role,
            office_id: None,
            zone_id: None,
            district_id: None,
            ip: None,
        }
    }

    pub fn with_office(mut self, office_id: Uuid) -> Self {
        self.office_id = Some(office_id);
        self
    }

    pub fn with_zone(mut self, zone_id: Uuid) -> Self {
        self.zone_id = Some(zone_id);
        self
    }

    pub fn with_district(mut self, district_id: Uuid) -> Self {
        self.district_id = Some(district_id);
        self
    }

    /// True when the caller administers the given office.
    ///
    /// District reviewers act across all offices; everyone else is bound to
    /// the office resolved by the identity gate.
    pub fn covers_office(&self, office_id: Uuid) -> bool {
        self.role == Role::Ceo || self.office_id == Some(office_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct District {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl District {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

/// A zone and its office membership. `office_ids` always contains
/// `my_office_id`, the zone's own administrative office.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub id: Uuid,
    pub name: String,
    pub district_id: Uuid,
    pub my_office_id: Uuid,
    pub office_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfficeType {
    Administrative,
    Educational,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Office {
    pub id: Uuid,
    /// External office code, unique across the district.
    pub office_code: String,
    pub office_name: String,
    pub office_type: OfficeType,
    pub zone_id: Uuid,
    pub parent_office_id: Option<Uuid>,
    /// Drawing and Disbursing Officer designation.
    pub is_ddo: bool,
    pub ddo_officer_id: Option<Uuid>,
    /// Unique when present.
    pub ddo_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct School {
    pub id: Uuid,
    pub name: String,
    /// National unique school identifier.
    pub udise_code: String,
    /// The Educational office this school is attached to.
    pub office_id: Uuid,
    pub zone_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub user_name: String,
    /// Opaque credential material; session issuance lives outside this core.
    /// Never exposed on the wire — the service responds with `UserView`.
    pub password: String,
    pub role: Role,
    pub office_id: Option<Uuid>,
    pub zone_id: Option<Uuid>,
    pub district_id: Option<Uuid>,
    pub school_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employee {
    pub id: Uuid,
    pub name: String,
    pub office_id: Uuid,
    /// Set when the employee is posted at a specific school of the office;
    /// a school's roster is the set of employees referencing it.
    #[serde(default)]
    pub school_id: Option<Uuid>,
    pub post_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Employee {
    pub fn new(name: impl Into<String>, office_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            office_id,
            school_id: None,
            post_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_school(mut self, school_id: Uuid) -> Self {
        self.school_id = Some(school_id);
        self
    }
}

/// Transfer request lifecycle.
///
/// The only permitted path is Pending -> CeoApproved -> Approved, with
/// Rejected reachable from Pending or CeoApproved. Approved and Rejected
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    CeoApproved,
    Approved,
    Rejected,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::CeoApproved => "ceo_approved",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

/// One employee's requested move between offices. Never physically deleted;
/// terminal records are retained for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub id: Uuid,
    pub employee_id: Uuid,
    pub from_office_id: Uuid,
    pub to_office_id: Uuid,
    pub requested_by: Uuid,
    pub status: TransferStatus,
    pub transfer_type: String,
    pub transfer_reason: String,
    pub transfer_order_no: Option<String>,
    pub transfer_order_date: Option<NaiveDate>,
    pub transfer_order_document_ref: Option<String>,
    pub accepted_by: Option<Uuid>,
    pub acceptance_date: Option<DateTime<Utc>>,
    pub processed_by: Option<Uuid>,
    pub approval_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemarkType {
    RequestCreation,
    MainAdminApproval,
    SchoolAdminApproval,
    Rejection,
}

/// Immutable note tied to exactly one state transition of a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRemark {
    pub id: Uuid,
    pub transfer_request_id: Uuid,
    pub remark_type: RemarkType,
    pub remark_text: String,
    pub added_by: Uuid,
    pub added_date: DateTime<Utc>,
}

impl TransferRemark {
    pub fn new(
        transfer_request_id: Uuid,
        remark_type: RemarkType,
        remark_text: impl Into<String>,
        added_by: Uuid,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transfer_request_id,
            remark_type,
            remark_text: remark_text.into(),
            added_by,
            added_date: Utc::now(),
        }
    }
}

/// Inputs to `TransferWorkflow::create_request`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTransferInput {
    pub employee_id: Uuid,
    pub from_office_id: Uuid,
    pub to_office_id: Uuid,
    pub transfer_type: String,
    pub transfer_reason: String,
    pub transfer_order_no: Option<String>,
    pub transfer_order_date: Option<NaiveDate>,
    pub transfer_order_document_ref: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Approve,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RespondAction {
    Accept,
    Reject,
}

/// Credentials supplied when provisioning an administrator account.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminCredentials {
    pub user_name: String,
    pub password: String,
}

impl AdminCredentials {
    pub fn validate(&self) -> Result<(), crate::error::HrError> {
        if self.user_name.trim().is_empty() || self.password.trim().is_empty() {
            return Err(crate::error::HrError::Validation(
                "administrator credentials require a user name and password".to_string(),
            ));
        }
        Ok(())
    }
}

/// Spec for the administrative office created alongside a new zone.
#[derive(Debug, Clone, Deserialize)]
pub struct ZonalOfficeSpec {
    pub office_code: String,
    pub office_name: String,
    pub is_ddo: bool,
    pub ddo_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OfficeSpec {
    pub office_code: String,
    pub office_name: String,
    pub office_type: OfficeType,
    pub parent_office_id: Option<Uuid>,
    pub is_ddo: bool,
    pub ddo_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchoolSpec {
    pub name: String,
    pub udise_code: String,
    pub admin: Option<AdminCredentials>,
}
