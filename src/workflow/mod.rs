//! Practitioner workflows
//!
//! Multi-call operations against the FHIR gateway, and the list and edit
//! workflows the presentation layer drives.

pub mod appointments;
pub mod edit;
pub mod list;
pub mod page_cache;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::activity_log;
use crate::config::Config;
use crate::fhir::{ResourceType, RPPS_SYSTEM};
use crate::gateway::{FhirGateway, GatewayError};
use crate::mapper::{from_bundle, specialties_from_value_set, FromWire, ToWire};
use crate::models::{Appointment, Practitioner, PractitionerRole, Schedule, Site, Specialty};

/// How much is removed together with a practitioner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteDepth {
    /// Roles, then the practitioner; a failing role delete aborts
    RolesOnly,
    /// Roles, appointments and schedules best-effort, then the practitioner
    #[default]
    Full,
}

/// Workflow errors
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Server response carries no id for {0}")]
    MissingId(&'static str),

    #[error("Practitioner saved but {failed} role operation(s) failed: {source}")]
    RolesIncomplete {
        practitioner: Box<Practitioner>,
        roles: Vec<PractitionerRole>,
        failed: usize,
        source: GatewayError,
    },

    #[error("Role deletion failed, practitioner kept: {0}")]
    RoleDeletion(GatewayError),
}

impl WorkflowError {
    /// Practitioner persisted on the server despite the failure
    pub fn persisted_practitioner(&self) -> Option<&Practitioner> {
        match self {
            WorkflowError::RolesIncomplete { practitioner, .. } => Some(practitioner.as_ref()),
            _ => None,
        }
    }
}

// ============================================================================
// Presentation-layer collaborators
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Info,
    Warning,
    Error,
}

/// Toast shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub severity: Severity,
    pub summary: String,
    pub detail: String,
}

impl Notification {
    pub fn new(severity: Severity, summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity,
            summary: summary.into(),
            detail: detail.into(),
        }
    }
}

/// Fire-and-forget notification sink
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Asks the user to accept or reject a destructive action
#[async_trait]
pub trait Confirmation: Send + Sync {
    async fn confirm(&self, message: &str) -> bool;
}

// ============================================================================
// Shared operations
// ============================================================================

/// A practitioner together with its roles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PractitionerWithRoles {
    pub practitioner: Practitioner,
    pub roles: Vec<PractitionerRole>,
}

/// Everything that references a practitioner
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PractitionerDetails {
    pub roles: Vec<PractitionerRole>,
    pub appointments: Vec<Appointment>,
    pub schedules: Vec<Schedule>,
}

/// Outcome of a cascading delete
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteReport {
    pub dependents_deleted: usize,
    pub dependents_failed: usize,
}

/// Specialty and site lists, fetched once per session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceData {
    pub specialties: Vec<Specialty>,
    pub sites: Vec<Site>,
}

impl ReferenceData {
    pub async fn load(gateway: &dyn FhirGateway, config: &Config) -> Result<Self, WorkflowError> {
        let (value_set, sites) = futures_util::try_join!(
            gateway.read_value_set(&config.specialty_value_set_id),
            gateway.list_sites(config.site_kind),
        )?;

        let reference = ReferenceData {
            specialties: specialties_from_value_set(&value_set),
            sites: from_bundle(&sites),
        };
        debug!(
            "Loaded {} specialties and {} sites",
            reference.specialties.len(),
            reference.sites.len()
        );
        Ok(reference)
    }

    pub fn specialty(&self, code: &str) -> Option<&Specialty> {
        self.specialties.iter().find(|s| s.code == code)
    }

    pub fn site(&self, id: &str) -> Option<&Site> {
        self.sites.iter().find(|s| s.id == id)
    }
}

fn resource_id(value: &Value, resource_type: &'static str) -> Result<String, WorkflowError> {
    value["id"]
        .as_str()
        .filter(|id| !id.is_empty())
        .map(|id| id.to_string())
        .ok_or(WorkflowError::MissingId(resource_type))
}

/// Practitioners whose RPPS identifier equals `rpps`
pub async fn find_by_rpps(
    gateway: &dyn FhirGateway,
    rpps: &str,
) -> Result<Vec<Practitioner>, WorkflowError> {
    let bundle = gateway.search_practitioners_by_identifier(RPPS_SYSTEM, rpps).await?;
    Ok(from_bundle(&bundle))
}

/// Create the practitioner, then all of its roles concurrently.
///
/// There is no rollback: if a role fails the practitioner stays on the
/// server and the error carries it.
pub async fn create_with_roles(
    gateway: &dyn FhirGateway,
    practitioner: &Practitioner,
    roles: Vec<PractitionerRole>,
) -> Result<PractitionerWithRoles, WorkflowError> {
    let mut draft = practitioner.clone();
    draft.id = None;
    let created = gateway.create(ResourceType::Practitioner, &draft.to_wire()).await?;
    let practitioner_id = resource_id(&created, "Practitioner")?;
    let practitioner = Practitioner::from_wire(&created);

    let bodies: Vec<Value> = roles
        .into_iter()
        .map(|mut role| {
            role.id = None;
            role.practitioner_id = practitioner_id.clone();
            role.to_wire()
        })
        .collect();

    let results = join_all(
        bodies
            .iter()
            .map(|body| gateway.create(ResourceType::PractitionerRole, body)),
    )
    .await;

    let (roles, failures) = split_results(results, |v| PractitionerRole::from_wire(&v));
    activity_log::log_practitioner_created(&practitioner_id, roles.len(), failures.len());
    finish_with_roles(practitioner, roles, failures)
}

/// Full-replace update of the practitioner alone
pub async fn update_practitioner(
    gateway: &dyn FhirGateway,
    id: &str,
    practitioner: &Practitioner,
) -> Result<Practitioner, WorkflowError> {
    let mut body = practitioner.clone();
    body.id = Some(id.to_string());
    let updated = gateway
        .update(ResourceType::Practitioner, id, &body.to_wire())
        .await?;

    // Some servers answer a PUT with an empty body
    if updated.is_null() {
        return Ok(body);
    }
    Ok(Practitioner::from_wire(&updated))
}

/// Update the practitioner, then reconcile its roles concurrently:
/// rows with an id are replaced, rows without one are created, and
/// `removed_role_ids` are deleted.
pub async fn update_with_roles(
    gateway: &dyn FhirGateway,
    id: &str,
    practitioner: &Practitioner,
    roles: Vec<PractitionerRole>,
    removed_role_ids: &[String],
) -> Result<PractitionerWithRoles, WorkflowError> {
    let practitioner = update_practitioner(gateway, id, practitioner).await?;

    let roles: Vec<PractitionerRole> = roles
        .into_iter()
        .map(|mut role| {
            role.practitioner_id = id.to_string();
            role
        })
        .collect();
    let bodies: Vec<Value> = roles.iter().map(|r| r.to_wire()).collect();

    let writes = join_all(roles.iter().zip(bodies.iter()).map(|(role, body)| async move {
        let stored = match role.id {
            Some(ref role_id) => {
                gateway
                    .update(ResourceType::PractitionerRole, role_id, body)
                    .await?
            }
            None => gateway.create(ResourceType::PractitionerRole, body).await?,
        };
        if stored.is_null() {
            Ok::<_, GatewayError>(role.clone())
        } else {
            Ok(PractitionerRole::from_wire(&stored))
        }
    }));
    let deletes = join_all(
        removed_role_ids
            .iter()
            .map(|role_id| gateway.delete(ResourceType::PractitionerRole, role_id)),
    );
    let (writes, deletes) = futures_util::join!(writes, deletes);

    let (roles, mut failures) = split_results(writes, |role| role);
    let removed = deletes.iter().filter(|r| r.is_ok()).count();
    failures.extend(deletes.into_iter().filter_map(Result::err));

    activity_log::log_practitioner_updated(id, roles.len(), removed);
    finish_with_roles(practitioner, roles, failures)
}

fn split_results<T, U>(
    results: Vec<Result<T, GatewayError>>,
    map: impl Fn(T) -> U,
) -> (Vec<U>, Vec<GatewayError>) {
    let mut ok = Vec::new();
    let mut failures = Vec::new();
    for result in results {
        match result {
            Ok(value) => ok.push(map(value)),
            Err(e) => failures.push(e),
        }
    }
    (ok, failures)
}

fn finish_with_roles(
    practitioner: Practitioner,
    roles: Vec<PractitionerRole>,
    failures: Vec<GatewayError>,
) -> Result<PractitionerWithRoles, WorkflowError> {
    let failed = failures.len();
    match failures.into_iter().next() {
        None => Ok(PractitionerWithRoles {
            practitioner,
            roles,
        }),
        Some(source) => Err(WorkflowError::RolesIncomplete {
            practitioner: Box::new(practitioner),
            roles,
            failed,
            source,
        }),
    }
}

/// Roles, appointments and schedules of a practitioner, fetched concurrently
pub async fn practitioner_details(
    gateway: &dyn FhirGateway,
    practitioner_id: &str,
) -> Result<PractitionerDetails, WorkflowError> {
    let (roles, appointments, schedules) = futures_util::try_join!(
        gateway.search_roles_by_practitioner(practitioner_id),
        gateway.search_appointments_by_practitioner(practitioner_id),
        gateway.search_schedules_by_practitioner(practitioner_id),
    )?;

    Ok(PractitionerDetails {
        roles: from_bundle(&roles),
        appointments: from_bundle(&appointments),
        schedules: from_bundle(&schedules),
    })
}

fn listed_or_empty<T: FromWire>(
    result: Result<crate::fhir::Bundle, GatewayError>,
    what: &str,
    practitioner_id: &str,
) -> Vec<T> {
    match result {
        Ok(bundle) => from_bundle(&bundle),
        Err(e) => {
            warn!(
                "Could not list {} of practitioner {}, deleting what is known: {}",
                what, practitioner_id, e
            );
            Vec::new()
        }
    }
}

/// Delete a practitioner and what references it.
///
/// Not transactional. With [`DeleteDepth::Full`] dependent deletions are
/// independent and their failures are only logged; the result is the result
/// of the final practitioner delete.
pub async fn delete_cascading(
    gateway: &dyn FhirGateway,
    practitioner_id: &str,
    depth: DeleteDepth,
) -> Result<DeleteReport, WorkflowError> {
    let report = match depth {
        DeleteDepth::RolesOnly => {
            let bundle = gateway
                .search_roles_by_practitioner(practitioner_id)
                .await
                .map_err(WorkflowError::RoleDeletion)?;
            let roles: Vec<PractitionerRole> = from_bundle(&bundle);
            let role_ids: Vec<String> = roles.into_iter().filter_map(|r| r.id).collect();

            let results = join_all(
                role_ids
                    .iter()
                    .map(|id| gateway.delete(ResourceType::PractitionerRole, id)),
            )
            .await;
            if let Some(e) = results.into_iter().find_map(Result::err) {
                return Err(WorkflowError::RoleDeletion(e));
            }
            DeleteReport {
                dependents_deleted: role_ids.len(),
                dependents_failed: 0,
            }
        }
        DeleteDepth::Full => {
            let (roles, appointments, schedules) = futures_util::join!(
                gateway.search_roles_by_practitioner(practitioner_id),
                gateway.search_appointments_by_practitioner(practitioner_id),
                gateway.search_schedules_by_practitioner(practitioner_id),
            );

            let mut targets: Vec<(ResourceType, String)> = Vec::new();
            targets.extend(
                listed_or_empty::<PractitionerRole>(roles, "roles", practitioner_id)
                    .into_iter()
                    .filter_map(|r| r.id)
                    .map(|id| (ResourceType::PractitionerRole, id)),
            );
            targets.extend(
                listed_or_empty::<Appointment>(appointments, "appointments", practitioner_id)
                    .into_iter()
                    .map(|a| (ResourceType::Appointment, a.id)),
            );
            targets.extend(
                listed_or_empty::<Schedule>(schedules, "schedules", practitioner_id)
                    .into_iter()
                    .map(|s| (ResourceType::Schedule, s.id)),
            );
            targets.retain(|(_, id)| !id.is_empty());

            let results = join_all(
                targets
                    .iter()
                    .map(|(resource_type, id)| gateway.delete(*resource_type, id)),
            )
            .await;

            let mut report = DeleteReport::default();
            for ((resource_type, id), result) in targets.iter().zip(results) {
                match result {
                    Ok(()) => report.dependents_deleted += 1,
                    Err(e) => {
                        report.dependents_failed += 1;
                        activity_log::log_dependent_delete_failed(
                            resource_type.as_str(),
                            id,
                            &e.to_string(),
                        );
                    }
                }
            }
            report
        }
    };

    gateway
        .delete(ResourceType::Practitioner, practitioner_id)
        .await?;
    activity_log::log_practitioner_deleted(
        practitioner_id,
        report.dependents_deleted,
        report.dependents_failed,
    );
    Ok(report)
}
