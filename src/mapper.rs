//! Conversions between FHIR JSON and the records in [`crate::models`].
//!
//! Reading is total: a missing or mistyped element falls back to an empty
//! value instead of failing, the same way the server's drafts are read.
//! Writing omits every optional element that has nothing to say.

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde_json::{json, Map, Value};

use crate::fhir::{reference_id, parse_reference, Bundle, ResourceType, RPPS_SYSTEM};
use crate::models::{
    Address, Appointment, Coding, ContactPoint, ContactSystem, Gender, HumanName, Identifier,
    IdentifierType, Patient, Period, Photo, Practitioner, PractitionerRole, Schedule, Site,
    SiteKind, Specialty,
};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Records that can be read from a FHIR resource
pub trait FromWire: Sized {
    /// `resourceType` values this record is read from
    const RESOURCE_TYPES: &'static [&'static str];

    fn from_wire(resource: &Value) -> Self;
}

/// Records that can be written as a FHIR resource
pub trait ToWire {
    fn to_wire(&self) -> Value;
}

/// Read every entry of a bundle whose type matches `T`
pub fn from_bundle<T: FromWire>(bundle: &Bundle) -> Vec<T> {
    bundle.resources_of(T::RESOURCE_TYPES).map(T::from_wire).collect()
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value[key].as_str().map(|s| s.to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn array<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value[key].as_array().map(|a| a.as_slice()).unwrap_or(&[])
}

/// FHIR `date` (or the date part of a `dateTime`)
pub fn parse_date(value: &Value) -> Option<NaiveDate> {
    let raw = value.as_str()?;
    let date_part = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(date_part, DATE_FORMAT).ok()
}

pub fn format_date(date: &NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_instant(value: &Value) -> Option<DateTime<FixedOffset>> {
    value.as_str().and_then(|s| DateTime::parse_from_rfc3339(s).ok())
}

fn coding_from_wire(value: &Value) -> Coding {
    Coding {
        system: str_field(value, "system").unwrap_or_default(),
        code: str_field(value, "code").unwrap_or_default(),
        display: str_field(value, "display"),
    }
}

fn coding_to_wire(coding: &Coding) -> Value {
    let mut map = Map::new();
    if !coding.system.is_empty() {
        map.insert("system".into(), json!(coding.system));
    }
    map.insert("code".into(), json!(coding.code));
    if let Some(ref display) = coding.display {
        map.insert("display".into(), json!(display));
    }
    Value::Object(map)
}

/// `name` is an array of HumanName in FHIR, but older records in the clinic
/// server store a single object.
fn name_from_wire(value: &Value) -> HumanName {
    let name = match &value["name"] {
        Value::Array(names) => names.first(),
        Value::Object(_) => Some(&value["name"]),
        _ => None,
    };
    let Some(name) = name else {
        return HumanName::default();
    };
    let given = match &name["given"] {
        Value::Array(given) => given.first().and_then(|g| g.as_str()),
        Value::String(given) => Some(given.as_str()),
        _ => None,
    };
    HumanName {
        family: name["family"].as_str().unwrap_or("").to_string(),
        given: given.unwrap_or("").to_string(),
    }
}

fn name_to_wire(name: &HumanName) -> Value {
    let mut map = Map::new();
    if !name.family.is_empty() {
        map.insert("family".into(), json!(name.family));
    }
    if !name.given.is_empty() {
        map.insert("given".into(), json!([name.given]));
    }
    json!([Value::Object(map)])
}

fn identifier_from_wire(value: &Value) -> Identifier {
    let type_ = match &value["type"] {
        Value::Object(_) => Some(IdentifierType {
            text: str_field(&value["type"], "text"),
            coding: array(&value["type"], "coding").iter().map(coding_from_wire).collect(),
        }),
        _ => None,
    };
    Identifier {
        system: str_field(value, "system").unwrap_or_default(),
        value: str_field(value, "value").unwrap_or_default(),
        use_: str_field(value, "use"),
        type_,
    }
}

fn identifier_to_wire(identifier: &Identifier) -> Value {
    let mut map = Map::new();
    if let Some(ref use_) = identifier.use_ {
        map.insert("use".into(), json!(use_));
    }
    map.insert("system".into(), json!(identifier.system));
    map.insert("value".into(), json!(identifier.value));
    if let Some(ref type_) = identifier.type_ {
        let mut t = Map::new();
        if let Some(ref text) = type_.text {
            t.insert("text".into(), json!(text));
        }
        t.insert(
            "coding".into(),
            Value::Array(type_.coding.iter().map(coding_to_wire).collect()),
        );
        map.insert("type".into(), Value::Object(t));
    }
    Value::Object(map)
}

fn address_from_wire(value: &Value) -> Option<Address> {
    let address = array(value, "address").first()?;
    Some(Address {
        line: array(address, "line")
            .iter()
            .filter_map(|l| l.as_str().map(|s| s.to_string()))
            .collect(),
        city: str_field(address, "city"),
        postal_code: str_field(address, "postalCode"),
        country: str_field(address, "country"),
    })
}

fn address_to_wire(address: &Address) -> Value {
    let mut map = Map::new();
    map.insert("line".into(), json!(address.line));
    if let Some(ref city) = address.city {
        map.insert("city".into(), json!(city));
    }
    if let Some(ref postal_code) = address.postal_code {
        map.insert("postalCode".into(), json!(postal_code));
    }
    if let Some(ref country) = address.country {
        map.insert("country".into(), json!(country));
    }
    json!([Value::Object(map)])
}

impl FromWire for Practitioner {
    const RESOURCE_TYPES: &'static [&'static str] = &["Practitioner"];

    fn from_wire(resource: &Value) -> Self {
        let photo = array(resource, "photo").first().and_then(|p| {
            let data = non_empty(str_field(p, "data"))?;
            Some(Photo {
                content_type: str_field(p, "contentType").unwrap_or_default(),
                data,
            })
        });

        Practitioner {
            id: str_field(resource, "id"),
            identifiers: array(resource, "identifier").iter().map(identifier_from_wire).collect(),
            name: name_from_wire(resource),
            gender: resource["gender"].as_str().and_then(Gender::parse),
            birth_date: parse_date(&resource["birthDate"]),
            telecom: array(resource, "telecom")
                .iter()
                .map(|t| ContactPoint {
                    system: ContactSystem::parse(t["system"].as_str().unwrap_or("other")),
                    use_: str_field(t, "use"),
                    value: str_field(t, "value").unwrap_or_default(),
                })
                .collect(),
            address: address_from_wire(resource),
            photo,
        }
    }
}

impl ToWire for Practitioner {
    fn to_wire(&self) -> Value {
        let mut map = Map::new();
        map.insert("resourceType".into(), json!(ResourceType::Practitioner.as_str()));
        if let Some(ref id) = self.id {
            map.insert("id".into(), json!(id));
        }
        map.insert(
            "identifier".into(),
            Value::Array(self.identifiers.iter().map(identifier_to_wire).collect()),
        );
        map.insert("name".into(), name_to_wire(&self.name));
        if let Some(gender) = self.gender {
            map.insert("gender".into(), json!(gender.as_str()));
        }
        if let Some(ref birth_date) = self.birth_date {
            map.insert("birthDate".into(), json!(format_date(birth_date)));
        }
        let telecom: Vec<Value> = self
            .telecom
            .iter()
            .map(|t| {
                let mut c = Map::new();
                c.insert("system".into(), json!(t.system.as_str()));
                if let Some(ref use_) = t.use_ {
                    c.insert("use".into(), json!(use_));
                }
                c.insert("value".into(), json!(t.value));
                Value::Object(c)
            })
            .collect();
        map.insert("telecom".into(), Value::Array(telecom));
        if let Some(ref address) = self.address {
            map.insert("address".into(), address_to_wire(address));
        }
        if let Some(ref photo) = self.photo {
            if !photo.data.is_empty() {
                map.insert(
                    "photo".into(),
                    json!([{ "contentType": photo.content_type, "data": photo.data }]),
                );
            }
        }
        Value::Object(map)
    }
}

impl FromWire for PractitionerRole {
    const RESOURCE_TYPES: &'static [&'static str] = &["PractitionerRole"];

    fn from_wire(resource: &Value) -> Self {
        let specialty = array(resource, "code")
            .first()
            .and_then(|c| array(c, "coding").first())
            .map(coding_from_wire);

        let organization_id = resource["organization"]["reference"]
            .as_str()
            .and_then(reference_id)
            .map(|s| s.to_string());

        // Roles created before sites moved to Location only carry an organization
        let location_id = array(resource, "location")
            .first()
            .and_then(|l| l["reference"].as_str())
            .and_then(reference_id)
            .map(|s| s.to_string())
            .or_else(|| organization_id.clone());

        let period = match &resource["period"] {
            Value::Object(_) => Some(Period {
                start: parse_date(&resource["period"]["start"]),
                end: parse_date(&resource["period"]["end"]),
            }),
            _ => None,
        };

        PractitionerRole {
            id: str_field(resource, "id"),
            practitioner_id: resource["practitioner"]["reference"]
                .as_str()
                .and_then(reference_id)
                .unwrap_or("")
                .to_string(),
            rpps: array(resource, "identifier")
                .iter()
                .find(|i| i["system"].as_str() == Some(RPPS_SYSTEM))
                .and_then(|i| str_field(i, "value")),
            specialty,
            location_id,
            organization_id,
            period,
        }
    }
}

impl ToWire for PractitionerRole {
    fn to_wire(&self) -> Value {
        let mut map = Map::new();
        map.insert("resourceType".into(), json!(ResourceType::PractitionerRole.as_str()));
        if let Some(ref id) = self.id {
            map.insert("id".into(), json!(id));
        }
        if let Some(ref rpps) = self.rpps {
            map.insert("identifier".into(), json!([{ "system": RPPS_SYSTEM, "value": rpps }]));
        }
        map.insert(
            "practitioner".into(),
            json!({ "reference": ResourceType::Practitioner.reference(&self.practitioner_id) }),
        );
        if let Some(ref specialty) = self.specialty {
            map.insert("code".into(), json!([{ "coding": [coding_to_wire(specialty)] }]));
        }
        if let Some(ref organization_id) = self.organization_id {
            map.insert(
                "organization".into(),
                json!({ "reference": ResourceType::Organization.reference(organization_id) }),
            );
        }
        if let Some(ref location_id) = self.location_id {
            map.insert(
                "location".into(),
                json!([{ "reference": ResourceType::Location.reference(location_id) }]),
            );
        }
        if let Some(ref period) = self.period {
            let mut p = Map::new();
            if let Some(ref start) = period.start {
                p.insert("start".into(), json!(format_date(start)));
            }
            if let Some(ref end) = period.end {
                p.insert("end".into(), json!(format_date(end)));
            }
            map.insert("period".into(), Value::Object(p));
        }
        Value::Object(map)
    }
}

impl FromWire for Site {
    const RESOURCE_TYPES: &'static [&'static str] = &["Location", "Organization"];

    fn from_wire(resource: &Value) -> Self {
        let kind = match resource["resourceType"].as_str() {
            Some("Organization") => SiteKind::Organization,
            _ => SiteKind::Location,
        };
        let id = str_field(resource, "id").unwrap_or_default();
        Site {
            name: non_empty(str_field(resource, "name")).unwrap_or_else(|| id.clone()),
            id,
            kind,
        }
    }
}

impl FromWire for Appointment {
    const RESOURCE_TYPES: &'static [&'static str] = &["Appointment"];

    fn from_wire(resource: &Value) -> Self {
        let patient_ids = array(resource, "participant")
            .iter()
            .filter_map(|p| p["actor"]["reference"].as_str())
            .filter_map(parse_reference)
            .filter(|(resource_type, _)| *resource_type == ResourceType::Patient.as_str())
            .map(|(_, id)| id.to_string())
            .collect();

        Appointment {
            id: str_field(resource, "id").unwrap_or_default(),
            status: str_field(resource, "status"),
            start: parse_instant(&resource["start"]),
            end: parse_instant(&resource["end"]),
            description: str_field(resource, "description"),
            patient_ids,
        }
    }
}

impl FromWire for Schedule {
    const RESOURCE_TYPES: &'static [&'static str] = &["Schedule"];

    fn from_wire(resource: &Value) -> Self {
        Schedule {
            id: str_field(resource, "id").unwrap_or_default(),
            active: resource["active"].as_bool(),
            comment: str_field(resource, "comment"),
        }
    }
}

impl FromWire for Patient {
    const RESOURCE_TYPES: &'static [&'static str] = &["Patient"];

    fn from_wire(resource: &Value) -> Self {
        Patient {
            id: str_field(resource, "id").unwrap_or_default(),
            name: name_from_wire(resource),
            birth_date: parse_date(&resource["birthDate"]),
        }
    }
}

/// Specialties listed by a ValueSet.
///
/// An expansion is authoritative when present; otherwise the concepts
/// enumerated in `compose.include` are used with their include's system.
pub fn specialties_from_value_set(value_set: &Value) -> Vec<Specialty> {
    let contains = array(&value_set["expansion"], "contains");
    if !contains.is_empty() {
        return contains
            .iter()
            .filter_map(|c| {
                Some(Specialty {
                    system: str_field(c, "system").unwrap_or_default(),
                    code: non_empty(str_field(c, "code"))?,
                    display: str_field(c, "display").unwrap_or_default(),
                })
            })
            .collect();
    }

    array(&value_set["compose"], "include")
        .iter()
        .flat_map(|include| {
            let system = str_field(include, "system").unwrap_or_default();
            array(include, "concept").iter().filter_map(move |c| {
                Some(Specialty {
                    system: system.clone(),
                    code: non_empty(str_field(c, "code"))?,
                    display: str_field(c, "display").unwrap_or_default(),
                })
            })
        })
        .collect()
}
