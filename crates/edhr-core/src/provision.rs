//! Org hierarchy provisioner.
//!
//! Creates the interdependent record groups (a zone with its
//! administrative office and ZEO account, or an office with its schools and
//! school-admin accounts) as single all-or-nothing units of work. A
//! failure at any step drops the unit of work with every earlier staged
//! record in it.

use crate::access::Role;
use crate::error::HrError;
use crate::ledger::{AuditEntry, AuditLedger};
use crate::store::{with_deadline, OrgState, OrgStore};
use crate::types::{
    AdminCredentials, CallerContext, Office, OfficeSpec, OfficeType, School, SchoolSpec, User,
    Zone, ZonalOfficeSpec,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub struct OrgProvisioner {
    store: OrgStore,
    ledger: Arc<AuditLedger>,
    op_timeout: Duration,
}

impl OrgProvisioner {
    pub fn new(store: OrgStore, ledger: Arc<AuditLedger>, op_timeout: Duration) -> Self {
        Self {
            store,
            ledger,
            op_timeout,
        }
    }

    /// Create a zone, its administrative office, and its ZEO account.
    pub async fn provision_zone(
        &self,
        ctx: &CallerContext,
        name: &str,
        district_id: Uuid,
        office_spec: ZonalOfficeSpec,
        zeo: AdminCredentials,
    ) -> Result<(Zone, User), HrError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(HrError::Validation("a zone name is required".to_string()));
        }
        if office_spec.office_name.trim().is_empty() || office_spec.office_code.trim().is_empty() {
            return Err(HrError::Validation(
                "the zonal office requires a name and code".to_string(),
            ));
        }
        zeo.validate()?;

        let (zone, user) = with_deadline("provision zone", self.op_timeout, async {
            let mut uow = self.store.begin().await;

            if !uow.state().districts.contains_key(&district_id) {
                return Err(HrError::not_found("district", district_id));
            }
            if uow.state().zones.values().any(|zone| {
                zone.district_id == district_id && zone.name.eq_ignore_ascii_case(name)
            }) {
                return Err(HrError::Conflict(format!(
                    "zone '{name}' already exists in this district"
                )));
            }
            ensure_office_code_free(uow.state(), &office_spec.office_code)?;
            ensure_ddo_code_free(uow.state(), office_spec.ddo_code.as_deref())?;
            ensure_user_name_free(uow.state(), &zeo.user_name)?;

            let now = Utc::now();
            let zone_id = Uuid::new_v4();
            let office = Office {
                id: Uuid::new_v4(),
                office_code: office_spec.office_code.clone(),
                office_name: office_spec.office_name.clone(),
                office_type: OfficeType::Administrative,
                zone_id,
                parent_office_id: None,
                is_ddo: office_spec.is_ddo,
                ddo_officer_id: None,
                ddo_code: office_spec.ddo_code.clone(),
                created_at: now,
            };
            let zone = Zone {
                id: zone_id,
                name: name.to_string(),
                district_id,
                my_office_id: office.id,
                office_ids: vec![office.id],
                created_at: now,
            };
            let user = User {
                id: Uuid::new_v4(),
                user_name: zeo.user_name.clone(),
                password: zeo.password.clone(),
                role: Role::Zeo,
                office_id: Some(office.id),
                zone_id: Some(zone_id),
                district_id: Some(district_id),
                school_id: None,
                created_at: now,
            };

            uow.upsert_office(office);
            uow.upsert_zone(zone.clone());
            uow.upsert_user(user.clone());
            uow.commit().await?;
            Ok((zone, user))
        })
        .await?;

        self.ledger
            .record(AuditEntry::from_caller(
                ctx,
                "zone.provision",
                format!("zone '{}' provisioned with office {}", zone.name, zone.my_office_id),
                Some(zone.my_office_id),
            ))
            .await;

        Ok((zone, user))
    }

    /// Create an office and, for Educational offices, its schools and any
    /// supplied school-admin accounts, then attach it to the owning zone.
    pub async fn provision_office(
        &self,
        ctx: &CallerContext,
        spec: OfficeSpec,
        school_specs: Vec<SchoolSpec>,
        zone_id: Uuid,
    ) -> Result<Office, HrError> {
        if spec.office_name.trim().is_empty() || spec.office_code.trim().is_empty() {
            return Err(HrError::Validation(
                "an office requires a name and code".to_string(),
            ));
        }
        match spec.office_type {
            OfficeType::Educational if school_specs.is_empty() => {
                return Err(HrError::Validation(
                    "an educational office requires at least one school".to_string(),
                ));
            }
            OfficeType::Administrative if !school_specs.is_empty() => {
                return Err(HrError::Validation(
                    "an administrative office cannot carry schools".to_string(),
                ));
            }
            _ => {}
        }

        let office = with_deadline("provision office", self.op_timeout, async {
            let mut uow = self.store.begin().await;

            let mut zone = uow
                .state()
                .zones
                .get(&zone_id)
                .cloned()
                .ok_or_else(|| HrError::not_found("zone", zone_id))?;
            ensure_office_code_free(uow.state(), &spec.office_code)?;
            ensure_ddo_code_free(uow.state(), spec.ddo_code.as_deref())?;

            let now = Utc::now();
            let office = Office {
                id: Uuid::new_v4(),
                office_code: spec.office_code.clone(),
                office_name: spec.office_name.clone(),
                office_type: spec.office_type,
                zone_id,
                parent_office_id: spec.parent_office_id,
                is_ddo: spec.is_ddo,
                ddo_officer_id: None,
                ddo_code: spec.ddo_code.clone(),
                created_at: now,
            };
            uow.upsert_office(office.clone());

            for school_spec in &school_specs {
                if school_spec.udise_code.trim().is_empty() || school_spec.name.trim().is_empty() {
                    return Err(HrError::Validation(
                        "every school requires a name and UDISE code".to_string(),
                    ));
                }
                if uow
                    .state()
                    .schools
                    .values()
                    .any(|school| school.udise_code == school_spec.udise_code)
                {
                    return Err(HrError::Conflict(format!(
                        "a school with UDISE code '{}' already exists",
                        school_spec.udise_code
                    )));
                }

                let school = School {
                    id: Uuid::new_v4(),
                    name: school_spec.name.clone(),
                    udise_code: school_spec.udise_code.clone(),
                    office_id: office.id,
                    zone_id,
                    created_at: now,
                };
                uow.upsert_school(school.clone());

                if let Some(admin) = &school_spec.admin {
                    admin.validate()?;
                    ensure_user_name_free(uow.state(), &admin.user_name)?;
                    uow.upsert_user(User {
                        id: Uuid::new_v4(),
                        user_name: admin.user_name.clone(),
                        password: admin.password.clone(),
                        role: Role::SchoolAdmin,
                        office_id: Some(office.id),
                        zone_id: Some(zone_id),
                        district_id: None,
                        school_id: Some(school.id),
                        created_at: now,
                    });
                }
            }

            zone.office_ids.push(office.id);
            uow.upsert_zone(zone);

            verify_school_invariant(uow.state(), &office)?;
            uow.commit().await?;
            Ok(office)
        })
        .await?;

        self.ledger
            .record(AuditEntry::from_caller(
                ctx,
                "office.provision",
                format!(
                    "office '{}' ({}) provisioned in zone {}",
                    office.office_name, office.office_code, zone_id
                ),
                Some(office.id),
            ))
            .await;

        Ok(office)
    }
}

fn ensure_office_code_free(state: &OrgState, office_code: &str) -> Result<(), HrError> {
    if state
        .offices
        .values()
        .any(|office| office.office_code == office_code)
    {
        return Err(HrError::Conflict(format!(
            "an office with code '{office_code}' already exists"
        )));
    }
    Ok(())
}

fn ensure_ddo_code_free(state: &OrgState, ddo_code: Option<&str>) -> Result<(), HrError> {
    if let Some(code) = ddo_code {
        if state
            .offices
            .values()
            .any(|office| office.ddo_code.as_deref() == Some(code))
        {
            return Err(HrError::Conflict(format!(
                "DDO code '{code}' is already assigned"
            )));
        }
    }
    Ok(())
}

fn ensure_user_name_free(state: &OrgState, user_name: &str) -> Result<(), HrError> {
    if state
        .users
        .values()
        .any(|user| user.user_name.eq_ignore_ascii_case(user_name))
    {
        return Err(HrError::Conflict(format!(
            "user name '{user_name}' is already taken"
        )));
    }
    Ok(())
}

/// Structural check run just before commit: an Educational office must end
/// up linked to at least one school, an Administrative office to none.
fn verify_school_invariant(state: &OrgState, office: &Office) -> Result<(), HrError> {
    let linked = state
        .schools
        .values()
        .filter(|school| school.office_id == office.id)
        .count();
    match office.office_type {
        OfficeType::Educational if linked == 0 => Err(HrError::Conflict(format!(
            "educational office '{}' would commit without a school",
            office.office_code
        ))),
        OfficeType::Administrative if linked > 0 => Err(HrError::Conflict(format!(
            "administrative office '{}' would commit with {linked} schools",
            office.office_code
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::District;
    use crate::workflow::DEFAULT_OP_TIMEOUT;

    struct Fixture {
        provisioner: OrgProvisioner,
        store: OrgStore,
        district_id: Uuid,
    }

    fn fixture() -> Fixture {
        let district = District::new("Central");
        let district_id = district.id;
        let mut state = OrgState::default();
        state.districts.insert(district.id, district);

        let store = OrgStore::with_state(state);
        let ledger = Arc::new(AuditLedger::in_memory());
        Fixture {
            provisioner: OrgProvisioner::new(store.clone(), ledger, DEFAULT_OP_TIMEOUT),
            store,
            district_id,
        }
    }

    fn ceo() -> CallerContext {
        CallerContext::new(Uuid::new_v4(), Role::Ceo)
    }

    fn zonal_office(code: &str) -> ZonalOfficeSpec {
        ZonalOfficeSpec {
            office_code: code.to_string(),
            office_name: format!("Zonal Education Office {code}"),
            is_ddo: true,
            ddo_code: None,
        }
    }

    fn zeo(user_name: &str) -> AdminCredentials {
        AdminCredentials {
            user_name: user_name.to_string(),
            password: "changeme".to_string(),
        }
    }

    fn school(udise: &str, admin: Option<&str>) -> SchoolSpec {
        SchoolSpec {
            name: format!("GPS {udise}"),
            udise_code: udise.to_string(),
            admin: admin.map(zeo),
        }
    }

    fn educational_office(code: &str) -> OfficeSpec {
        OfficeSpec {
            office_code: code.to_string(),
            office_name: format!("Block Office {code}"),
            office_type: OfficeType::Educational,
            parent_office_id: None,
            is_ddo: false,
            ddo_code: None,
        }
    }

    async fn provision_zone(fx: &Fixture) -> (Zone, User) {
        fx.provisioner
            .provision_zone(&ceo(), "North Zone", fx.district_id, zonal_office("ZO-1"), zeo("zeo.north"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn zone_comes_with_office_and_zeo_account() {
        let fx = fixture();
        let (zone, user) = provision_zone(&fx).await;

        let state = fx.store.snapshot().await;
        let office = state.offices.get(&zone.my_office_id).unwrap();
        assert_eq!(office.office_type, OfficeType::Administrative);
        assert_eq!(office.zone_id, zone.id);
        assert!(zone.office_ids.contains(&zone.my_office_id));
        assert_eq!(user.role, Role::Zeo);
        assert_eq!(user.zone_id, Some(zone.id));
        assert_eq!(user.office_id, Some(zone.my_office_id));
    }

    #[tokio::test]
    async fn duplicate_zone_name_is_a_conflict_and_leaves_nothing() {
        let fx = fixture();
        provision_zone(&fx).await;
        let before = fx.store.snapshot().await;

        let err = fx
            .provisioner
            .provision_zone(
                &ceo(),
                "north zone",
                fx.district_id,
                zonal_office("ZO-2"),
                zeo("zeo.other"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HrError::Conflict(_)));

        let after = fx.store.snapshot().await;
        assert_eq!(after.zones.len(), before.zones.len());
        assert_eq!(after.offices.len(), before.offices.len());
        assert_eq!(after.users.len(), before.users.len());
    }

    #[tokio::test]
    async fn unknown_district_is_not_found() {
        let fx = fixture();
        let err = fx
            .provisioner
            .provision_zone(&ceo(), "Ghost", Uuid::new_v4(), zonal_office("ZO-9"), zeo("zeo.ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, HrError::NotFound(_)));
    }

    #[tokio::test]
    async fn educational_office_provisions_schools_and_admins() {
        let fx = fixture();
        let (zone, _) = provision_zone(&fx).await;

        let office = fx
            .provisioner
            .provision_office(
                &ceo(),
                educational_office("BO-1"),
                vec![school("UD-001", Some("admin.ud001")), school("UD-002", None)],
                zone.id,
            )
            .await
            .unwrap();

        let state = fx.store.snapshot().await;
        let schools: Vec<_> = state
            .schools
            .values()
            .filter(|school| school.office_id == office.id)
            .collect();
        assert_eq!(schools.len(), 2);
        assert!(schools.iter().all(|school| school.zone_id == zone.id));

        let admin = state
            .users
            .values()
            .find(|user| user.user_name == "admin.ud001")
            .unwrap();
        assert_eq!(admin.role, Role::SchoolAdmin);
        assert_eq!(admin.office_id, Some(office.id));

        let zone = state.zones.get(&zone.id).unwrap();
        assert!(zone.office_ids.contains(&office.id));
    }

    #[tokio::test]
    async fn failed_school_admin_rolls_back_office_and_schools() {
        let fx = fixture();
        let (zone, _) = provision_zone(&fx).await;
        let before = fx.store.snapshot().await;

        // The second school's admin collides with the existing ZEO account.
        let err = fx
            .provisioner
            .provision_office(
                &ceo(),
                educational_office("BO-2"),
                vec![school("UD-101", None), school("UD-102", Some("zeo.north"))],
                zone.id,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HrError::Conflict(_)));

        let after = fx.store.snapshot().await;
        assert_eq!(after.offices.len(), before.offices.len());
        assert_eq!(after.schools.len(), before.schools.len());
        assert_eq!(after.users.len(), before.users.len());
        assert_eq!(
            after.zones.get(&zone.id).unwrap().office_ids,
            before.zones.get(&zone.id).unwrap().office_ids
        );
    }

    #[tokio::test]
    async fn duplicate_udise_rolls_back_everything() {
        let fx = fixture();
        let (zone, _) = provision_zone(&fx).await;
        fx.provisioner
            .provision_office(&ceo(), educational_office("BO-3"), vec![school("UD-201", None)], zone.id)
            .await
            .unwrap();
        let before = fx.store.snapshot().await;

        let err = fx
            .provisioner
            .provision_office(
                &ceo(),
                educational_office("BO-4"),
                vec![school("UD-202", None), school("UD-201", None)],
                zone.id,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HrError::Conflict(_)));

        let after = fx.store.snapshot().await;
        assert_eq!(after.offices.len(), before.offices.len());
        assert_eq!(after.schools.len(), before.schools.len());
    }

    #[tokio::test]
    async fn educational_office_without_schools_is_rejected_up_front() {
        let fx = fixture();
        let (zone, _) = provision_zone(&fx).await;

        let err = fx
            .provisioner
            .provision_office(&ceo(), educational_office("BO-5"), vec![], zone.id)
            .await
            .unwrap_err();
        assert!(matches!(err, HrError::Validation(_)));
    }

    #[tokio::test]
    async fn administrative_office_with_schools_is_rejected() {
        let fx = fixture();
        let (zone, _) = provision_zone(&fx).await;

        let spec = OfficeSpec {
            office_type: OfficeType::Administrative,
            ..educational_office("BO-6")
        };
        let err = fx
            .provisioner
            .provision_office(&ceo(), spec, vec![school("UD-301", None)], zone.id)
            .await
            .unwrap_err();
        assert!(matches!(err, HrError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_zone_is_not_found() {
        let fx = fixture();
        let err = fx
            .provisioner
            .provision_office(
                &ceo(),
                educational_office("BO-7"),
                vec![school("UD-401", None)],
                Uuid::new_v4(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HrError::NotFound(_)));
    }
}
