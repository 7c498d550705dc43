//! Transfer workflow engine.
//!
//! Owns the `TransferRequest`/`TransferRemark` lifecycle. Every operation
//! is one unit of work: the status check and the write sit inside the same
//! coordinator scope, so two racing callers resolve to exactly one winner
//! and the loser sees `InvalidState` or `Conflict`, never a silent
//! overwrite. Exactly one remark accompanies every transition, and one
//! audit entry follows every commit.

use crate::error::HrError;
use crate::ledger::{AuditEntry, AuditLedger};
use crate::store::{with_deadline, OrgStore, UnitOfWork};
use crate::types::{
    CallerContext, CreateTransferInput, RemarkType, RespondAction, ReviewAction, TransferRemark,
    TransferRequest, TransferStatus,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct TransferWorkflow {
    store: OrgStore,
    ledger: Arc<AuditLedger>,
    op_timeout: Duration,
}

impl TransferWorkflow {
    pub fn new(store: OrgStore, ledger: Arc<AuditLedger>, op_timeout: Duration) -> Self {
        Self {
            store,
            ledger,
            op_timeout,
        }
    }

    /// Open a transfer request for an employee.
    ///
    /// The duplicate check and the insert share one unit of work; a second
    /// concurrent create for the same employee cannot also succeed.
    pub async fn create_request(
        &self,
        ctx: &CallerContext,
        input: CreateTransferInput,
    ) -> Result<TransferRequest, HrError> {
        if !ctx.covers_office(input.from_office_id) {
            return Err(HrError::Forbidden(
                "caller is not authorized for the sending office".to_string(),
            ));
        }
        if input.transfer_reason.trim().is_empty() {
            return Err(HrError::Validation(
                "a transfer reason is required".to_string(),
            ));
        }
        if input.transfer_type.trim().is_empty() {
            return Err(HrError::Validation("a transfer type is required".to_string()));
        }
        if input.from_office_id == input.to_office_id {
            return Err(HrError::Validation(
                "sending and receiving office must differ".to_string(),
            ));
        }

        let request = with_deadline("create transfer request", self.op_timeout, async {
            let mut uow = self.store.begin().await;

            let employee = uow
                .state()
                .employees
                .get(&input.employee_id)
                .cloned()
                .ok_or_else(|| HrError::not_found("employee", input.employee_id))?;
            if !uow.state().offices.contains_key(&input.from_office_id) {
                return Err(HrError::not_found("office", input.from_office_id));
            }
            if !uow.state().offices.contains_key(&input.to_office_id) {
                return Err(HrError::not_found("office", input.to_office_id));
            }
            if employee.office_id != input.from_office_id {
                return Err(HrError::Validation(
                    "employee is not posted at the sending office".to_string(),
                ));
            }
            if let Some(open) = uow.state().active_transfer_for(input.employee_id) {
                return Err(HrError::Conflict(format!(
                    "an open transfer request ({}) already exists for this employee",
                    open.id
                )));
            }

            let now = Utc::now();
            let request = TransferRequest {
                id: Uuid::new_v4(),
                employee_id: input.employee_id,
                from_office_id: input.from_office_id,
                to_office_id: input.to_office_id,
                requested_by: ctx.subject,
                status: TransferStatus::Pending,
                transfer_type: input.transfer_type,
                transfer_reason: input.transfer_reason.clone(),
                transfer_order_no: input.transfer_order_no,
                transfer_order_date: input.transfer_order_date,
                transfer_order_document_ref: input.transfer_order_document_ref,
                accepted_by: None,
                acceptance_date: None,
                processed_by: None,
                approval_date: None,
                created_at: now,
                updated_at: now,
            };

            uow.upsert_transfer_request(request.clone());
            uow.insert_remark(TransferRemark::new(
                request.id,
                RemarkType::RequestCreation,
                input.transfer_reason,
                ctx.subject,
            ));
            uow.commit().await?;
            Ok(request)
        })
        .await?;

        self.ledger
            .record(AuditEntry::from_caller(
                ctx,
                "transfer.create",
                format!(
                    "transfer request {} opened for employee {}",
                    request.id, request.employee_id
                ),
                Some(request.from_office_id),
            ))
            .await;

        Ok(request)
    }

    /// District-level review of a pending request.
    pub async fn review_request(
        &self,
        ctx: &CallerContext,
        request_id: Uuid,
        action: ReviewAction,
        remark_text: Option<String>,
    ) -> Result<TransferRequest, HrError> {
        let request = with_deadline("review transfer request", self.op_timeout, async {
            let mut uow = self.store.begin().await;

            let mut request = fetch_request(&uow, request_id)?;
            if request.status != TransferStatus::Pending {
                return Err(HrError::InvalidState(format!(
                    "request {} is '{}', review requires 'pending'",
                    request.id,
                    request.status.as_str()
                )));
            }

            let now = Utc::now();
            let (remark_type, default_text) = match action {
                ReviewAction::Approve => {
                    request.status = TransferStatus::CeoApproved;
                    (RemarkType::MainAdminApproval, "approved by district reviewer")
                }
                ReviewAction::Reject => {
                    request.status = TransferStatus::Rejected;
                    request.processed_by = Some(ctx.subject);
                    request.approval_date = Some(now);
                    (RemarkType::Rejection, "rejected by district reviewer")
                }
            };
            request.updated_at = now;

            uow.upsert_transfer_request(request.clone());
            uow.insert_remark(TransferRemark::new(
                request.id,
                remark_type,
                remark_text.unwrap_or_else(|| default_text.to_string()),
                ctx.subject,
            ));
            uow.commit().await?;
            Ok(request)
        })
        .await?;

        self.ledger
            .record(AuditEntry::from_caller(
                ctx,
                "transfer.review",
                format!(
                    "transfer request {} reviewed: {}",
                    request.id,
                    request.status.as_str()
                ),
                Some(request.from_office_id),
            ))
            .await;

        Ok(request)
    }

    /// Receiving-side response to a district-approved request.
    ///
    /// Terminal requests are immutable; a repeat call answers
    /// `AlreadyFinal` and leaves the record untouched.
    pub async fn respond_to_request(
        &self,
        ctx: &CallerContext,
        request_id: Uuid,
        action: RespondAction,
        reason: Option<String>,
    ) -> Result<TransferRequest, HrError> {
        let request = with_deadline("respond to transfer request", self.op_timeout, async {
            let mut uow = self.store.begin().await;

            let mut request = fetch_request(&uow, request_id)?;
            if request.status.is_terminal() {
                return Err(HrError::AlreadyFinal(format!(
                    "request {} is already '{}'",
                    request.id,
                    request.status.as_str()
                )));
            }
            if request.status != TransferStatus::CeoApproved {
                return Err(HrError::InvalidState(format!(
                    "request {} is '{}', response requires 'ceo_approved'",
                    request.id,
                    request.status.as_str()
                )));
            }
            if !ctx.covers_office(request.to_office_id) {
                return Err(HrError::Forbidden(
                    "caller is not authorized for the receiving office".to_string(),
                ));
            }

            let now = Utc::now();
            let remark = match action {
                RespondAction::Accept => {
                    request.status = TransferStatus::Approved;
                    request.accepted_by = Some(ctx.subject);
                    request.acceptance_date = Some(now);

                    // The accepted move takes effect in the same unit of
                    // work: the employee's posting follows the request.
                    let mut employee = uow
                        .state()
                        .employees
                        .get(&request.employee_id)
                        .cloned()
                        .ok_or_else(|| HrError::not_found("employee", request.employee_id))?;
                    employee.office_id = request.to_office_id;
                    // A school posting does not survive the move; the
                    // receiving office assigns one separately.
                    employee.school_id = None;
                    uow.upsert_employee(employee);

                    TransferRemark::new(
                        request.id,
                        RemarkType::SchoolAdminApproval,
                        reason.unwrap_or_else(|| "accepted by receiving office".to_string()),
                        ctx.subject,
                    )
                }
                RespondAction::Reject => {
                    let reason = reason
                        .as_deref()
                        .map(str::trim)
                        .filter(|text| !text.is_empty())
                        .ok_or_else(|| {
                            HrError::Validation(
                                "a non-empty reason is required to reject a transfer".to_string(),
                            )
                        })?;
                    request.status = TransferStatus::Rejected;
                    request.processed_by = Some(ctx.subject);
                    request.approval_date = Some(now);

                    TransferRemark::new(request.id, RemarkType::Rejection, reason, ctx.subject)
                }
            };
            request.updated_at = now;

            uow.upsert_transfer_request(request.clone());
            uow.insert_remark(remark);
            uow.commit().await?;
            Ok(request)
        })
        .await?;

        self.ledger
            .record(AuditEntry::from_caller(
                ctx,
                "transfer.respond",
                format!(
                    "transfer request {} resolved: {}",
                    request.id,
                    request.status.as_str()
                ),
                Some(request.to_office_id),
            ))
            .await;

        Ok(request)
    }

    pub async fn get_request(
        &self,
        request_id: Uuid,
    ) -> Result<(TransferRequest, Vec<TransferRemark>), HrError> {
        let state = self.store.snapshot().await;
        let request = state
            .transfer_requests
            .get(&request_id)
            .cloned()
            .ok_or_else(|| HrError::not_found("transfer request", request_id))?;
        let remarks = state.remarks_for(request_id);
        Ok((request, remarks))
    }

    /// Requests visible to an office (sending or receiving side), newest
    /// first; without a filter, everything.
    pub async fn list_requests(&self, office_id: Option<Uuid>) -> Vec<TransferRequest> {
        let state = self.store.snapshot().await;
        let mut requests: Vec<_> = state
            .transfer_requests
            .values()
            .filter(|req| {
                office_id
                    .map(|office| req.from_office_id == office || req.to_office_id == office)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        requests
    }
}

fn fetch_request(uow: &UnitOfWork, request_id: Uuid) -> Result<TransferRequest, HrError> {
    uow.state()
        .transfer_requests
        .get(&request_id)
        .cloned()
        .ok_or_else(|| HrError::not_found("transfer request", request_id))
}
