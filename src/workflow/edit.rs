//! Practitioner edit workflow
//!
//! A nested form (demographics plus ordered role rows) that is either blank
//! or pre-populated from an existing record, validated, then submitted as a
//! create-with-roles or an update with role reconciliation.

use std::sync::Arc;

use base64::Engine;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    create_with_roles, update_with_roles, PractitionerWithRoles, ReferenceData, WorkflowError,
};
use crate::activity_log;
use crate::config::Config;
use crate::fhir::{
    DEFAULT_SPECIALTY_SYSTEM, MATRICULE_SYSTEM, MATRICULE_TYPE_CODE, RPPS_SYSTEM, RPPS_TYPE_CODE,
};
use crate::gateway::FhirGateway;
use crate::mapper::from_bundle;
use crate::models::{
    Address, Coding, ContactPoint, ContactSystem, Gender, HumanName, Identifier, IdentifierType,
    Period, Photo, Practitioner, PractitionerRole, SiteKind, Specialty,
};

// ============================================================================
// Form
// ============================================================================

/// One role row of the form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleEntry {
    /// Server id when the row was loaded from an existing role
    pub id: Option<String>,
    pub service_start: Option<NaiveDate>,
    pub service_end: Option<NaiveDate>,
    pub specialty: Coding,
    pub location_id: String,
}

impl Default for RoleEntry {
    fn default() -> Self {
        Self {
            id: None,
            service_start: None,
            service_end: None,
            specialty: Coding {
                system: DEFAULT_SPECIALTY_SYSTEM.to_string(),
                code: String::new(),
                display: None,
            },
            location_id: String::new(),
        }
    }
}

impl RoleEntry {
    /// Pre-populate a row from a stored role.
    ///
    /// The specialty is swapped for the loaded list entry with the same code;
    /// an unknown code keeps the role's own coding.
    pub fn from_role(role: &PractitionerRole, specialties: &[Specialty]) -> Self {
        let specialty = match role.specialty {
            Some(ref coding) => specialties
                .iter()
                .find(|s| s.code == coding.code)
                .map(Specialty::to_coding)
                .unwrap_or_else(|| coding.clone()),
            None => RoleEntry::default().specialty,
        };

        Self {
            id: role.id.clone(),
            service_start: role.period.as_ref().and_then(|p| p.start),
            service_end: role.period.as_ref().and_then(|p| p.end),
            specialty,
            location_id: role
                .location_id
                .clone()
                .or_else(|| role.organization_id.clone())
                .unwrap_or_default(),
        }
    }
}

/// Values of the practitioner form
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PractitionerForm {
    pub family: String,
    pub given: String,
    pub gender: Gender,
    pub rpps: String,
    pub matricule: String,
    pub birth_date: Option<NaiveDate>,
    pub address_line: String,
    pub city: String,
    pub postal_code: String,
    pub country: String,
    pub email: String,
    pub phone: String,
    /// Base64 payload, with or without a `data:` URL prefix
    pub photo: Option<String>,
    pub roles: Vec<RoleEntry>,
}

/// Settings the form needs to produce wire records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormMapping {
    pub photo_content_type: String,
    pub managing_organization_id: Option<String>,
    pub site_kind: SiteKind,
}

impl Default for FormMapping {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for FormMapping {
    fn from(config: &Config) -> Self {
        Self {
            photo_content_type: config.photo_content_type.clone(),
            managing_organization_id: config.managing_organization_id.clone(),
            site_kind: config.site_kind,
        }
    }
}

fn trimmed(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Split an optional `data:<type>;base64,` prefix off a photo payload
fn split_data_url(photo: &str) -> (Option<&str>, &str) {
    let photo = photo.trim();
    match photo.strip_prefix("data:").and_then(|rest| rest.split_once(',')) {
        Some((header, data)) => {
            let content_type = header.trim_end_matches(";base64");
            (Some(content_type).filter(|c| !c.is_empty()), data)
        }
        None => (None, photo),
    }
}

impl PractitionerForm {
    /// Blank form with one empty role row
    pub fn new() -> Self {
        Self {
            roles: vec![RoleEntry::default()],
            ..Default::default()
        }
    }

    /// Append a blank role row and return its index
    pub fn add_role(&mut self) -> usize {
        self.roles.push(RoleEntry::default());
        self.roles.len() - 1
    }

    pub fn remove_role(&mut self, index: usize) -> Option<RoleEntry> {
        if index < self.roles.len() {
            Some(self.roles.remove(index))
        } else {
            None
        }
    }

    /// Demographic fields of an existing record; role rows are left empty
    pub fn from_practitioner(practitioner: &Practitioner) -> Self {
        let address = practitioner.address.clone().unwrap_or_default();
        Self {
            family: practitioner.name.family.clone(),
            given: practitioner.name.given.clone(),
            gender: practitioner.gender.unwrap_or_default(),
            rpps: practitioner.rpps().unwrap_or_default().to_string(),
            matricule: practitioner.matricule().unwrap_or_default().to_string(),
            birth_date: practitioner.birth_date,
            address_line: address.line.first().cloned().unwrap_or_default(),
            city: address.city.unwrap_or_default(),
            postal_code: address.postal_code.unwrap_or_default(),
            country: address.country.unwrap_or_default(),
            email: practitioner
                .contact(&ContactSystem::Email)
                .unwrap_or_default()
                .to_string(),
            phone: practitioner
                .contact(&ContactSystem::Phone)
                .unwrap_or_default()
                .to_string(),
            photo: practitioner.photo.as_ref().map(|p| {
                if p.content_type.is_empty() {
                    p.data.clone()
                } else {
                    format!("data:{};base64,{}", p.content_type, p.data)
                }
            }),
            roles: Vec::new(),
        }
    }

    pub fn to_practitioner(&self, mapping: &FormMapping, id: Option<&str>) -> Practitioner {
        let mut identifiers = Vec::with_capacity(2);
        if let Some(matricule) = trimmed(&self.matricule) {
            identifiers.push(Identifier {
                system: MATRICULE_SYSTEM.to_string(),
                value: matricule,
                use_: Some("official".to_string()),
                type_: Some(IdentifierType {
                    text: Some("Matricule".to_string()),
                    coding: vec![Coding {
                        system: MATRICULE_SYSTEM.to_string(),
                        code: MATRICULE_TYPE_CODE.to_string(),
                        display: Some("Identifiant interne".to_string()),
                    }],
                }),
            });
        }
        identifiers.push(Identifier {
            system: RPPS_SYSTEM.to_string(),
            value: self.rpps.trim().to_string(),
            use_: Some("official".to_string()),
            type_: Some(IdentifierType {
                text: Some("N° RPPS".to_string()),
                coding: vec![Coding {
                    system: MATRICULE_SYSTEM.to_string(),
                    code: RPPS_TYPE_CODE.to_string(),
                    display: Some("N° RPPS".to_string()),
                }],
            }),
        });

        let telecom = [
            (ContactSystem::Email, &self.email),
            (ContactSystem::Phone, &self.phone),
        ]
        .into_iter()
        .filter_map(|(system, value)| {
            trimmed(value).map(|value| ContactPoint {
                system,
                use_: Some("work".to_string()),
                value,
            })
        })
        .collect();

        let address = Address {
            line: trimmed(&self.address_line).into_iter().collect(),
            city: trimmed(&self.city),
            postal_code: trimmed(&self.postal_code),
            country: trimmed(&self.country),
        };
        let address = if address == Address::default() {
            None
        } else {
            Some(address)
        };

        let photo = self.photo.as_deref().and_then(|photo| {
            let (content_type, data) = split_data_url(photo);
            if data.is_empty() {
                return None;
            }
            Some(Photo {
                content_type: content_type
                    .unwrap_or(&mapping.photo_content_type)
                    .to_string(),
                data: data.to_string(),
            })
        });

        Practitioner {
            id: id.map(|id| id.to_string()),
            identifiers,
            name: HumanName {
                family: self.family.trim().to_string(),
                given: self.given.trim().to_string(),
            },
            gender: Some(self.gender),
            birth_date: self.birth_date,
            telecom,
            address,
            photo,
        }
    }

    /// Role records for every row, attached to `practitioner_id`
    pub fn to_roles(&self, mapping: &FormMapping, practitioner_id: &str) -> Vec<PractitionerRole> {
        self.roles
            .iter()
            .map(|entry| {
                let site = trimmed(&entry.location_id);
                let (location_id, organization_id) = match mapping.site_kind {
                    SiteKind::Location => (site, mapping.managing_organization_id.clone()),
                    SiteKind::Organization => (None, site),
                };
                PractitionerRole {
                    id: entry.id.clone(),
                    practitioner_id: practitioner_id.to_string(),
                    rpps: trimmed(&self.rpps),
                    specialty: Some(entry.specialty.clone()).filter(|c| !c.code.is_empty()),
                    location_id,
                    organization_id,
                    period: Some(Period {
                        start: entry.service_start,
                        end: entry.service_end,
                    }),
                }
            })
            .collect()
    }
}

// ============================================================================
// Validation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldErrorKind {
    Required,
    InvalidPhoto,
    EndBeforeStart,
    UnknownSpecialty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Form path, e.g. `roles[1].specialty`
    pub field: String,
    pub kind: FieldErrorKind,
}

impl FieldError {
    fn new(field: impl Into<String>, kind: FieldErrorKind) -> Self {
        Self {
            field: field.into(),
            kind,
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self.kind {
            FieldErrorKind::Required => "is required",
            FieldErrorKind::InvalidPhoto => "is not valid base64",
            FieldErrorKind::EndBeforeStart => "ends before it starts",
            FieldErrorKind::UnknownSpecialty => "is not in the specialty list",
        };
        write!(f, "{} {}", self.field, reason)
    }
}

/// Check the form against the required fields and the loaded specialty list
pub fn validate(form: &PractitionerForm, specialties: &[Specialty]) -> Vec<FieldError> {
    let mut errors = Vec::new();

    for (field, value) in [
        ("family", &form.family),
        ("given", &form.given),
        ("rpps", &form.rpps),
    ] {
        if value.trim().is_empty() {
            errors.push(FieldError::new(field, FieldErrorKind::Required));
        }
    }

    if let Some(ref photo) = form.photo {
        let (_, data) = split_data_url(photo);
        if !data.is_empty() && base64::engine::general_purpose::STANDARD.decode(data).is_err() {
            errors.push(FieldError::new("photo", FieldErrorKind::InvalidPhoto));
        }
    }

    for (i, role) in form.roles.iter().enumerate() {
        match role.service_start {
            None => errors.push(FieldError::new(
                format!("roles[{}].service_start", i),
                FieldErrorKind::Required,
            )),
            Some(start) => {
                if role.service_end.is_some_and(|end| end < start) {
                    errors.push(FieldError::new(
                        format!("roles[{}].service_end", i),
                        FieldErrorKind::EndBeforeStart,
                    ));
                }
            }
        }

        if role.specialty.code.trim().is_empty() {
            errors.push(FieldError::new(
                format!("roles[{}].specialty", i),
                FieldErrorKind::Required,
            ));
        } else if !specialties.iter().any(|s| s.code == role.specialty.code) {
            errors.push(FieldError::new(
                format!("roles[{}].specialty", i),
                FieldErrorKind::UnknownSpecialty,
            ));
        }

        if role.location_id.trim().is_empty() {
            errors.push(FieldError::new(
                format!("roles[{}].location", i),
                FieldErrorKind::Required,
            ));
        }
    }

    errors
}

// ============================================================================
// Editor
// ============================================================================

/// Closing payload of the edit dialog
#[derive(Debug)]
pub enum EditOutcome {
    Created(PractitionerWithRoles),
    Updated(PractitionerWithRoles),
    /// Nothing was sent; the dialog stays open
    Invalid(Vec<FieldError>),
    Failed {
        message: String,
        /// Practitioner that reached the server before the failure
        persisted: Option<Practitioner>,
    },
}

/// Create-or-edit dialog state
pub struct PractitionerEditor {
    gateway: Arc<dyn FhirGateway>,
    reference: Arc<ReferenceData>,
    mapping: FormMapping,
    practitioner_id: Option<String>,
    loaded_role_ids: Vec<String>,
    pub form: PractitionerForm,
}

impl PractitionerEditor {
    /// Blank form with one empty role row
    pub fn for_new(
        gateway: Arc<dyn FhirGateway>,
        reference: Arc<ReferenceData>,
        mapping: FormMapping,
    ) -> Self {
        Self {
            gateway,
            reference,
            mapping,
            practitioner_id: None,
            loaded_role_ids: Vec::new(),
            form: PractitionerForm::new(),
        }
    }

    /// Form pre-populated from `practitioner`, with its roles re-fetched
    pub async fn for_existing(
        gateway: Arc<dyn FhirGateway>,
        reference: Arc<ReferenceData>,
        mapping: FormMapping,
        practitioner: &Practitioner,
    ) -> Result<Self, WorkflowError> {
        let id = practitioner
            .id
            .clone()
            .ok_or(WorkflowError::MissingId("Practitioner"))?;

        let bundle = gateway.search_roles_by_practitioner(&id).await?;
        let roles: Vec<PractitionerRole> = from_bundle(&bundle);
        debug!("Editing practitioner {} with {} role(s)", id, roles.len());

        let mut form = PractitionerForm::from_practitioner(practitioner);
        form.roles = roles
            .iter()
            .map(|role| RoleEntry::from_role(role, &reference.specialties))
            .collect();

        Ok(Self {
            loaded_role_ids: roles.into_iter().filter_map(|r| r.id).collect(),
            gateway,
            reference,
            mapping,
            practitioner_id: Some(id),
            form,
        })
    }

    pub fn is_editing(&self) -> bool {
        self.practitioner_id.is_some()
    }

    pub fn practitioner_id(&self) -> Option<&str> {
        self.practitioner_id.as_deref()
    }

    pub fn reference(&self) -> &ReferenceData {
        &self.reference
    }

    pub fn validate(&self) -> Vec<FieldError> {
        validate(&self.form, &self.reference.specialties)
    }

    /// Roles loaded at open time whose row is no longer in the form
    fn removed_role_ids(&self) -> Vec<String> {
        self.loaded_role_ids
            .iter()
            .filter(|id| !self.form.roles.iter().any(|r| r.id.as_ref() == Some(*id)))
            .cloned()
            .collect()
    }

    pub async fn submit(&self) -> EditOutcome {
        let errors = self.validate();
        if !errors.is_empty() {
            debug!("Form rejected with {} field error(s)", errors.len());
            return EditOutcome::Invalid(errors);
        }

        let practitioner = self
            .form
            .to_practitioner(&self.mapping, self.practitioner_id.as_deref());

        let result = match self.practitioner_id {
            Some(ref id) => {
                let roles = self.form.to_roles(&self.mapping, id);
                update_with_roles(
                    self.gateway.as_ref(),
                    id,
                    &practitioner,
                    roles,
                    &self.removed_role_ids(),
                )
                .await
                .map(EditOutcome::Updated)
            }
            None => {
                let roles = self.form.to_roles(&self.mapping, "");
                create_with_roles(self.gateway.as_ref(), &practitioner, roles)
                    .await
                    .map(EditOutcome::Created)
            }
        };

        match result {
            Ok(outcome) => {
                info!("Practitioner form submitted");
                outcome
            }
            Err(e) => {
                activity_log::log_operation_failed("submit_practitioner", &e.to_string());
                EditOutcome::Failed {
                    message: e.to_string(),
                    persisted: e.persisted_practitioner().cloned(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specialties() -> Vec<Specialty> {
        vec![Specialty {
            system: DEFAULT_SPECIALTY_SYSTEM.to_string(),
            code: "CARD".to_string(),
            display: "Cardiologie".to_string(),
        }]
    }

    fn valid_form() -> PractitionerForm {
        let mut form = PractitionerForm::new();
        form.family = "Durand".to_string();
        form.given = "Sophie".to_string();
        form.rpps = "10101010101".to_string();
        form.roles[0].service_start = NaiveDate::from_ymd_opt(2024, 1, 1);
        form.roles[0].specialty.code = "CARD".to_string();
        form.roles[0].location_id = "loc-1".to_string();
        form
    }

    #[test]
    fn test_new_form_has_one_blank_role() {
        let form = PractitionerForm::new();
        assert_eq!(form.roles.len(), 1);
        assert_eq!(form.roles[0].specialty.system, DEFAULT_SPECIALTY_SYSTEM);
        assert!(form.roles[0].id.is_none());
    }

    #[test]
    fn test_add_and_remove_roles() {
        let mut form = PractitionerForm::new();
        assert_eq!(form.add_role(), 1);
        form.roles[1].location_id = "second".to_string();

        let removed = form.remove_role(0).unwrap();
        assert!(removed.location_id.is_empty());
        assert_eq!(form.roles[0].location_id, "second");
        assert!(form.remove_role(5).is_none());
    }

    #[test]
    fn test_valid_form_passes() {
        assert!(validate(&valid_form(), &specialties()).is_empty());
    }

    #[test]
    fn test_required_fields() {
        let errors = validate(&PractitionerForm::new(), &specialties());
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "family",
                "given",
                "rpps",
                "roles[0].service_start",
                "roles[0].specialty",
                "roles[0].location"
            ]
        );
        assert!(errors.iter().all(|e| e.kind == FieldErrorKind::Required));
    }

    #[test]
    fn test_end_before_start_rejected() {
        let mut form = valid_form();
        form.roles[0].service_end = NaiveDate::from_ymd_opt(2023, 12, 31);
        let errors = validate(&form, &specialties());
        assert_eq!(
            errors,
            vec![FieldError::new("roles[0].service_end", FieldErrorKind::EndBeforeStart)]
        );

        form.roles[0].service_end = NaiveDate::from_ymd_opt(2024, 1, 1);
        assert!(validate(&form, &specialties()).is_empty());
    }

    #[test]
    fn test_unknown_specialty_flagged() {
        let mut form = valid_form();
        form.roles[0].specialty.code = "GONE".to_string();
        let errors = validate(&form, &specialties());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, FieldErrorKind::UnknownSpecialty);
        assert_eq!(errors[0].to_string(), "roles[0].specialty is not in the specialty list");
    }

    #[test]
    fn test_photo_must_be_base64() {
        let mut form = valid_form();
        form.photo = Some("not base64 !!".to_string());
        assert_eq!(validate(&form, &specialties())[0].kind, FieldErrorKind::InvalidPhoto);

        form.photo = Some("data:image/png;base64,aGVsbG8=".to_string());
        assert!(validate(&form, &specialties()).is_empty());
    }

    #[test]
    fn test_to_practitioner_identifiers_and_telecom() {
        let mut form = valid_form();
        form.matricule = "M-001".to_string();
        form.email = "sophie@clinique.fr".to_string();

        let practitioner = form.to_practitioner(&FormMapping::default(), None);
        assert_eq!(practitioner.matricule(), Some("M-001"));
        assert_eq!(practitioner.rpps(), Some("10101010101"));
        assert_eq!(practitioner.telecom.len(), 1);
        assert_eq!(practitioner.telecom[0].system, ContactSystem::Email);
        assert!(practitioner.address.is_none());
        assert!(practitioner.photo.is_none());
        assert!(practitioner.id.is_none());
    }

    #[test]
    fn test_photo_data_url_prefix_stripped() {
        let mut form = valid_form();
        form.photo = Some("data:image/png;base64,aGVsbG8=".to_string());
        let photo = form
            .to_practitioner(&FormMapping::default(), Some("p1"))
            .photo
            .unwrap();
        assert_eq!(photo.content_type, "image/png");
        assert_eq!(photo.data, "aGVsbG8=");

        form.photo = Some("aGVsbG8=".to_string());
        let photo = form.to_practitioner(&FormMapping::default(), None).photo.unwrap();
        assert_eq!(photo.content_type, "image/jpeg");
    }

    #[test]
    fn test_form_round_trips_through_practitioner() {
        let mut form = valid_form();
        form.matricule = "M-001".to_string();
        form.city = "Lyon".to_string();
        form.phone = "0102030405".to_string();
        form.gender = Gender::Female;
        form.roles.clear();

        let practitioner = form.to_practitioner(&FormMapping::default(), Some("p1"));
        assert_eq!(PractitionerForm::from_practitioner(&practitioner), form);
    }

    #[test]
    fn test_photo_content_type_survives_edit() {
        let mut practitioner = valid_form().to_practitioner(&FormMapping::default(), Some("p1"));
        practitioner.photo = Some(Photo {
            content_type: "image/png".to_string(),
            data: "aGVsbG8=".to_string(),
        });

        let form = PractitionerForm::from_practitioner(&practitioner);
        assert_eq!(form.photo.as_deref(), Some("data:image/png;base64,aGVsbG8="));
        assert!(validate(&form, &specialties()).is_empty());

        // Configured default is image/jpeg
        let saved = form.to_practitioner(&FormMapping::default(), Some("p1"));
        assert_eq!(saved.photo, practitioner.photo);
    }

    #[test]
    fn test_roles_follow_site_kind() {
        let form = valid_form();
        let mapping = FormMapping {
            managing_organization_id: Some("34".to_string()),
            ..FormMapping::default()
        };
        let role = &form.to_roles(&mapping, "p1")[0];
        assert_eq!(role.location_id.as_deref(), Some("loc-1"));
        assert_eq!(role.organization_id.as_deref(), Some("34"));
        assert_eq!(role.rpps.as_deref(), Some("10101010101"));

        let mapping = FormMapping {
            site_kind: SiteKind::Organization,
            ..FormMapping::default()
        };
        let role = &form.to_roles(&mapping, "p1")[0];
        assert!(role.location_id.is_none());
        assert_eq!(role.organization_id.as_deref(), Some("loc-1"));
    }

    #[test]
    fn test_role_entry_keeps_unknown_coding() {
        let role = PractitionerRole {
            id: Some("r1".to_string()),
            specialty: Some(Coding {
                system: "urn:other".to_string(),
                code: "GONE".to_string(),
                display: None,
            }),
            location_id: Some("loc-9".to_string()),
            ..Default::default()
        };
        let entry = RoleEntry::from_role(&role, &specialties());
        assert_eq!(entry.specialty.system, "urn:other");
        assert_eq!(entry.location_id, "loc-9");

        let mut known = role.clone();
        known.specialty = Some(Coding {
            system: String::new(),
            code: "CARD".to_string(),
            display: None,
        });
        let entry = RoleEntry::from_role(&known, &specialties());
        assert_eq!(entry.specialty.display.as_deref(), Some("Cardiologie"));
        assert_eq!(entry.specialty.system, DEFAULT_SPECIALTY_SYSTEM);
    }
}
