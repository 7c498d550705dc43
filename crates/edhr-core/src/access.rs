//! Role gate: a closed role vocabulary and a static capability table.
//!
//! Roles arrive already resolved by the external identity gate; this module
//! only answers "may this role perform this operation". Instance-level
//! checks (does the caller administer the sending office) stay with the
//! engines, which see the full request.

use crate::error::HrError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// District-level reviewing administrator.
    Ceo,
    /// Zone-level administrator.
    Zeo,
    OfficeAdmin,
    SchoolAdmin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ceo => "ceo",
            Self::Zeo => "zeo",
            Self::OfficeAdmin => "office_admin",
            Self::SchoolAdmin => "school_admin",
        }
    }
}

impl FromStr for Role {
    type Err = HrError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "ceo" => Ok(Self::Ceo),
            "zeo" => Ok(Self::Zeo),
            "office_admin" => Ok(Self::OfficeAdmin),
            "school_admin" => Ok(Self::SchoolAdmin),
            other => Err(HrError::Validation(format!(
                "unknown role '{other}'; expected one of: ceo, zeo, office_admin, school_admin"
            ))),
        }
    }
}

/// Operations gated at the service boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    CreateTransfer,
    ReviewTransfer,
    RespondTransfer,
    ReadTransfers,
    ProvisionZone,
    ProvisionOffice,
    ReadAudit,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateTransfer => "create_transfer",
            Self::ReviewTransfer => "review_transfer",
            Self::RespondTransfer => "respond_transfer",
            Self::ReadTransfers => "read_transfers",
            Self::ProvisionZone => "provision_zone",
            Self::ProvisionOffice => "provision_office",
            Self::ReadAudit => "read_audit",
        }
    }
}

/// The capability table. Closed on both axes, so the match is exhaustive
/// and a new role or operation forces a decision here.
pub fn allows(role: Role, operation: Operation) -> bool {
    use Operation::*;
    use Role::*;

    match operation {
        CreateTransfer => matches!(role, Ceo | Zeo | OfficeAdmin),
        ReviewTransfer => matches!(role, Ceo),
        RespondTransfer => matches!(role, Ceo | OfficeAdmin | SchoolAdmin),
        ReadTransfers => true,
        ProvisionZone => matches!(role, Ceo),
        ProvisionOffice => matches!(role, Ceo | Zeo),
        ReadAudit => matches!(role, Ceo),
    }
}

/// Boundary check: deny with the role and operation named, nothing else.
pub fn authorize(role: Role, operation: Operation) -> Result<(), HrError> {
    if allows(role, operation) {
        Ok(())
    } else {
        Err(HrError::Forbidden(format!(
            "role '{}' may not perform '{}'",
            role.as_str(),
            operation.as_str()
        )))
    }
}
