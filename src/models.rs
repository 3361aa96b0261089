//! Local, normalized records for the FHIR resources the clinic manages.
//!
//! These are session-scoped copies; the FHIR server owns every entity.

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

/// Administrative gender as FHIR defines it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    #[default]
    Male,
    Female,
    Other,
    Unknown,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
            Gender::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "male" => Some(Gender::Male),
            "female" => Some(Gender::Female),
            "other" => Some(Gender::Other),
            "unknown" => Some(Gender::Unknown),
            _ => None,
        }
    }
}

/// A code from a code system
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Coding {
    pub system: String,
    pub code: String,
    pub display: Option<String>,
}

/// `Identifier.type`: free text plus codings
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IdentifierType {
    pub text: Option<String>,
    pub coding: Vec<Coding>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Identifier {
    pub system: String,
    pub value: String,
    #[serde(rename = "use")]
    pub use_: Option<String>,
    #[serde(rename = "type")]
    pub type_: Option<IdentifierType>,
}

/// One family name, one given name
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HumanName {
    pub family: String,
    pub given: String,
}

impl HumanName {
    pub fn display(&self) -> String {
        format!("{} {}", self.given, self.family).trim().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactSystem {
    Email,
    Phone,
    Other(String),
}

impl ContactSystem {
    pub fn as_str(&self) -> &str {
        match self {
            ContactSystem::Email => "email",
            ContactSystem::Phone => "phone",
            ContactSystem::Other(s) => s,
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "email" => ContactSystem::Email,
            "phone" => ContactSystem::Phone,
            other => ContactSystem::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactPoint {
    pub system: ContactSystem,
    #[serde(rename = "use")]
    pub use_: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Address {
    pub line: Vec<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

/// Inline photo, base64 without any `data:` prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Photo {
    pub content_type: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Practitioner {
    pub id: Option<String>,
    pub identifiers: Vec<Identifier>,
    pub name: HumanName,
    pub gender: Option<Gender>,
    pub birth_date: Option<NaiveDate>,
    pub telecom: Vec<ContactPoint>,
    pub address: Option<Address>,
    pub photo: Option<Photo>,
}

impl Practitioner {
    /// Value of the first identifier issued by `system`
    pub fn identifier_value(&self, system: &str) -> Option<&str> {
        self.identifiers
            .iter()
            .find(|i| i.system == system)
            .map(|i| i.value.as_str())
    }

    pub fn rpps(&self) -> Option<&str> {
        self.identifier_value(crate::fhir::RPPS_SYSTEM)
    }

    /// Internal matricule.
    ///
    /// The matricule shares its system with other v2-0203 identifiers, so the
    /// `INTRN` type code is what singles it out.
    pub fn matricule(&self) -> Option<&str> {
        self.identifiers
            .iter()
            .find(|i| {
                i.type_
                    .as_ref()
                    .map(|t| t.coding.iter().any(|c| c.code == crate::fhir::MATRICULE_TYPE_CODE))
                    .unwrap_or(false)
            })
            .or_else(|| {
                self.identifiers
                    .iter()
                    .find(|i| i.system == crate::fhir::MATRICULE_SYSTEM)
            })
            .map(|i| i.value.as_str())
    }

    pub fn contact(&self, system: &ContactSystem) -> Option<&str> {
        self.telecom
            .iter()
            .find(|t| &t.system == system)
            .map(|t| t.value.as_str())
    }
}

/// Service period; an absent end means open-ended
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Period {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PractitionerRole {
    pub id: Option<String>,
    pub practitioner_id: String,
    /// RPPS number repeated on the role, as the clinic profile requires
    pub rpps: Option<String>,
    pub specialty: Option<Coding>,
    pub location_id: Option<String>,
    pub organization_id: Option<String>,
    pub period: Option<Period>,
}

/// Which reference list roles are attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SiteKind {
    #[default]
    Location,
    Organization,
}

/// Organization or Location a role can point at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: String,
    pub name: String,
    pub kind: SiteKind,
}

/// Entry of the specialty value set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Specialty {
    pub system: String,
    pub code: String,
    pub display: String,
}

impl Specialty {
    pub fn to_coding(&self) -> Coding {
        Coding {
            system: self.system.clone(),
            code: self.code.clone(),
            display: Some(self.display.clone()).filter(|d| !d.is_empty()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub status: Option<String>,
    pub start: Option<DateTime<FixedOffset>>,
    pub end: Option<DateTime<FixedOffset>>,
    pub description: Option<String>,
    /// Ids of the `Patient` participants
    pub patient_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub active: Option<bool>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Patient {
    pub id: String,
    pub name: HumanName,
    pub birth_date: Option<NaiveDate>,
}
