//! District employee management core.
//!
//! Two transactional subsystems share one discipline here: the transfer
//! approval workflow and the org hierarchy provisioner both run their
//! multi-document writes through a single unit-of-work coordinator, and
//! every committed state change leaves one append-only audit entry.

#![deny(unsafe_code)]

pub mod access;
pub mod allocation;
pub mod error;
pub mod ledger;
pub mod provision;
pub mod store;
pub mod types;
pub mod workflow;

pub use access::{allows, authorize, Operation, Role};
pub use allocation::AllocatedPosts;
pub use error::HrError;
pub use ledger::{AuditEntry, AuditLedger, LedgerConfig};
pub use provision::OrgProvisioner;
pub use store::{with_deadline, OrgState, OrgStore, StorageConfig, UnitOfWork};
pub use types::{
    AdminCredentials, CallerContext, CreateTransferInput, District, Employee, Office, OfficeSpec,
    OfficeType, RemarkType, RespondAction, ReviewAction, School, SchoolSpec, TransferRemark,
    TransferRequest, TransferStatus, User, Zone, ZonalOfficeSpec,
};
pub use workflow::{TransferWorkflow, DEFAULT_OP_TIMEOUT};
