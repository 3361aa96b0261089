//! FHIR R4 vocabulary shared by the mapper, the gateway and the workflows.

mod bundle;

pub use bundle::{Bundle, BundleEntry, BundleLink};

use serde::{Deserialize, Serialize};

/// MIME type sent in `Content-Type` and `Accept` on every request
pub const FHIR_JSON: &str = "application/fhir+json";

/// National registry of healthcare practitioners (RPPS)
pub const RPPS_SYSTEM: &str = "https://esante.gouv.fr/produits-services/repertoire-rpps";

/// Clinic-internal staff number (matricule)
pub const MATRICULE_SYSTEM: &str = "https://hl7.fr/ig/fhir/core/CodeSystem/fr-core-cs-v2-0203";

/// Identifier type code carried by the RPPS identifier
pub const RPPS_TYPE_CODE: &str = "RPPS";

/// Identifier type code carried by the matricule identifier
pub const MATRICULE_TYPE_CODE: &str = "INTRN";

/// Code system used for new role rows before a specialty is picked
pub const DEFAULT_SPECIALTY_SYSTEM: &str =
    "https://mos.esante.gouv.fr/NOS/TRE_R32-StatutHospitalier/FHIR/TRE-R32-StatutHospitalier";

/// Resource types this crate reads or writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    Practitioner,
    PractitionerRole,
    Organization,
    Location,
    ValueSet,
    Appointment,
    Schedule,
    Patient,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Practitioner => "Practitioner",
            ResourceType::PractitionerRole => "PractitionerRole",
            ResourceType::Organization => "Organization",
            ResourceType::Location => "Location",
            ResourceType::ValueSet => "ValueSet",
            ResourceType::Appointment => "Appointment",
            ResourceType::Schedule => "Schedule",
            ResourceType::Patient => "Patient",
        }
    }

    /// Build a literal reference such as `Practitioner/123`
    pub fn reference(&self, id: &str) -> String {
        format!("{}/{}", self.as_str(), id)
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split a literal reference (`Type/id`) into its parts.
///
/// Absolute references (`https://host/fhir/Type/id`) are accepted; only the
/// last two path segments are considered.
pub fn parse_reference(reference: &str) -> Option<(&str, &str)> {
    let mut segments = reference.trim_end_matches('/').rsplit('/');
    let id = segments.next().filter(|s| !s.is_empty())?;
    let resource_type = segments.next().filter(|s| !s.is_empty())?;
    Some((resource_type, id))
}

/// Id part of a reference, whatever its type
pub fn reference_id(reference: &str) -> Option<&str> {
    parse_reference(reference).map(|(_, id)| id)
}
