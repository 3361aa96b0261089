//! In-memory FHIR gateway and collaborators for workflow tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::fhir::{Bundle, ResourceType, RPPS_SYSTEM};
use crate::gateway::{FhirGateway, GatewayError, GatewayResult};
use crate::models::SiteKind;
use crate::workflow::{Confirmation, Notification, Notifier, Severity};

/// Gateway answering from scripted resources and recording every request.
///
/// Requests are recorded as `"<VERB> <path>"`. A request fails with a 500
/// when its failure key was scripted with [`MockGateway::fail`]; the key is
/// the recorded request, except for creates which use `"POST <type> #<n>"`
/// with `n` counting creates of that type from 1.
///
/// With [`MockGateway::hold_writes`] every create and delete stays pending for
/// a while, and the highest number of writes pending together is kept.
#[derive(Default)]
pub struct MockGateway {
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashSet<String>>,
    first_page: Mutex<Option<Value>>,
    pages: Mutex<HashMap<String, Value>>,
    identifier_matches: Mutex<Vec<Value>>,
    roles: Mutex<Vec<Value>>,
    appointments: Mutex<Vec<Value>>,
    schedules: Mutex<Vec<Value>>,
    patients: Mutex<HashMap<String, Value>>,
    value_set: Mutex<Value>,
    sites: Mutex<Vec<Value>>,
    create_counts: Mutex<HashMap<String, usize>>,
    created: Mutex<Vec<Value>>,
    write_delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, key: &str) {
        self.failures.lock().unwrap().insert(key.to_string());
    }

    pub fn set_first_page(&self, bundle: Value) {
        *self.first_page.lock().unwrap() = Some(bundle);
    }

    pub fn set_page(&self, url: &str, bundle: Value) {
        self.pages.lock().unwrap().insert(url.to_string(), bundle);
    }

    pub fn set_identifier_matches(&self, practitioners: Vec<Value>) {
        *self.identifier_matches.lock().unwrap() = practitioners;
    }

    pub fn set_roles(&self, roles: Vec<Value>) {
        *self.roles.lock().unwrap() = roles;
    }

    pub fn set_appointments(&self, appointments: Vec<Value>) {
        *self.appointments.lock().unwrap() = appointments;
    }

    pub fn set_schedules(&self, schedules: Vec<Value>) {
        *self.schedules.lock().unwrap() = schedules;
    }

    pub fn add_patient(&self, patient: Value) {
        let id = patient["id"].as_str().unwrap_or_default().to_string();
        self.patients.lock().unwrap().insert(id, patient);
    }

    pub fn set_value_set(&self, value_set: Value) {
        *self.value_set.lock().unwrap() = value_set;
    }

    pub fn set_sites(&self, sites: Vec<Value>) {
        *self.sites.lock().unwrap() = sites;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Recorded requests starting with `verb`
    pub fn calls_with(&self, verb: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(verb))
            .collect()
    }

    pub fn hold_writes(&self, delay: Duration) {
        *self.write_delay.lock().unwrap() = Some(delay);
    }

    /// Most creates/deletes seen pending at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    async fn settle_write(&self) {
        let delay = *self.write_delay.lock().unwrap();
        let Some(delay) = delay else {
            return;
        };
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    /// Bodies received by `create`, in call order
    pub fn created_bodies(&self) -> Vec<Value> {
        self.created.lock().unwrap().clone()
    }

    fn record(&self, call: String, failure_key: &str) -> GatewayResult<()> {
        self.calls.lock().unwrap().push(call);
        if self.failures.lock().unwrap().contains(failure_key) {
            return Err(GatewayError::Status {
                status: 500,
                body: format!("scripted failure: {}", failure_key),
            });
        }
        Ok(())
    }

    fn request(&self, call: String) -> GatewayResult<()> {
        let key = call.clone();
        self.record(call, &key)
    }
}

pub fn bundle(resources: Vec<Value>, total: Option<u64>, next: Option<&str>) -> Value {
    let mut link = Vec::new();
    if let Some(next) = next {
        link.push(json!({ "relation": "next", "url": next }));
    }
    let entry: Vec<Value> = resources.into_iter().map(|r| json!({ "resource": r })).collect();
    let mut bundle = json!({ "resourceType": "Bundle", "link": link, "entry": entry });
    if let Some(total) = total {
        bundle["total"] = json!(total);
    }
    bundle
}

fn as_bundle(value: Value) -> GatewayResult<Bundle> {
    Ok(serde_json::from_value(value)?)
}

pub fn practitioner_json(id: &str, family: &str, rpps: &str) -> Value {
    json!({
        "resourceType": "Practitioner",
        "id": id,
        "identifier": [{ "system": RPPS_SYSTEM, "value": rpps }],
        "name": [{ "family": family, "given": ["Jean"] }],
        "gender": "male"
    })
}

pub fn role_json(id: &str, practitioner_id: &str, specialty_code: &str) -> Value {
    json!({
        "resourceType": "PractitionerRole",
        "id": id,
        "practitioner": { "reference": format!("Practitioner/{}", practitioner_id) },
        "code": [{ "coding": [{ "system": "urn:specialties", "code": specialty_code }] }],
        "location": [{ "reference": "Location/loc-1" }],
        "period": { "start": "2024-01-01" }
    })
}

pub fn appointment_json(id: &str, patient_id: &str) -> Value {
    json!({
        "resourceType": "Appointment",
        "id": id,
        "status": "booked",
        "start": "2024-03-01T09:00:00+01:00",
        "description": "Consultation",
        "participant": [
            { "actor": { "reference": format!("Patient/{}", patient_id) } },
            { "actor": { "reference": "Practitioner/p1" } }
        ]
    })
}

pub fn schedule_json(id: &str) -> Value {
    json!({ "resourceType": "Schedule", "id": id, "active": true })
}

pub fn patient_json(id: &str, family: &str, given: &str) -> Value {
    json!({
        "resourceType": "Patient",
        "id": id,
        "name": [{ "family": family, "given": [given] }],
        "birthDate": "1980-05-17"
    })
}

#[async_trait]
impl FhirGateway for MockGateway {
    async fn search_practitioners(&self, count: usize) -> GatewayResult<Bundle> {
        self.request(format!("GET Practitioner?_count={}", count))?;
        let page = self.first_page.lock().unwrap().clone();
        as_bundle(page.unwrap_or_else(|| bundle(vec![], Some(0), None)))
    }

    async fn fetch_page(&self, url: &str) -> GatewayResult<Bundle> {
        self.request(format!("GET {}", url))?;
        let page = self.pages.lock().unwrap().get(url).cloned();
        match page {
            Some(page) => as_bundle(page),
            None => Err(GatewayError::NotFound(url.to_string())),
        }
    }

    async fn search_practitioners_by_identifier(
        &self,
        system: &str,
        value: &str,
    ) -> GatewayResult<Bundle> {
        self.request(format!("GET Practitioner?identifier={}|{}", system, value))?;
        let matches = self.identifier_matches.lock().unwrap().clone();
        as_bundle(bundle(matches, None, None))
    }

    async fn read_practitioner(&self, id: &str) -> GatewayResult<Value> {
        self.request(format!("GET Practitioner/{}", id))?;
        Err(GatewayError::NotFound(id.to_string()))
    }

    async fn search_roles_by_practitioner(&self, practitioner_id: &str) -> GatewayResult<Bundle> {
        self.request(format!(
            "GET PractitionerRole?practitioner=Practitioner/{}",
            practitioner_id
        ))?;
        let roles = self.roles.lock().unwrap().clone();
        as_bundle(bundle(roles, None, None))
    }

    async fn list_sites(&self, kind: SiteKind) -> GatewayResult<Bundle> {
        let resource_type = match kind {
            SiteKind::Location => ResourceType::Location,
            SiteKind::Organization => ResourceType::Organization,
        };
        self.request(format!("GET {}", resource_type))?;
        let sites = self.sites.lock().unwrap().clone();
        as_bundle(bundle(sites, None, None))
    }

    async fn read_value_set(&self, id: &str) -> GatewayResult<Value> {
        self.request(format!("GET ValueSet/{}", id))?;
        Ok(self.value_set.lock().unwrap().clone())
    }

    async fn search_appointments_by_practitioner(
        &self,
        practitioner_id: &str,
    ) -> GatewayResult<Bundle> {
        self.request(format!("GET Appointment?actor=Practitioner/{}", practitioner_id))?;
        let appointments = self.appointments.lock().unwrap().clone();
        as_bundle(bundle(appointments, None, None))
    }

    async fn search_schedules_by_practitioner(
        &self,
        practitioner_id: &str,
    ) -> GatewayResult<Bundle> {
        self.request(format!("GET Schedule?actor=Practitioner/{}", practitioner_id))?;
        let schedules = self.schedules.lock().unwrap().clone();
        as_bundle(bundle(schedules, None, None))
    }

    async fn read_patient(&self, id: &str) -> GatewayResult<Value> {
        self.request(format!("GET Patient/{}", id))?;
        let patient = self.patients.lock().unwrap().get(id).cloned();
        patient.ok_or_else(|| GatewayError::NotFound(id.to_string()))
    }

    async fn create(&self, resource_type: ResourceType, body: &Value) -> GatewayResult<Value> {
        let n = {
            let mut counts = self.create_counts.lock().unwrap();
            let count = counts.entry(resource_type.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        self.settle_write().await;
        self.record(
            format!("POST {}", resource_type),
            &format!("POST {} #{}", resource_type, n),
        )?;
        self.created.lock().unwrap().push(body.clone());

        let mut stored = body.clone();
        stored["id"] = json!(format!("{}-{}", resource_type, n));
        Ok(stored)
    }

    async fn update(
        &self,
        resource_type: ResourceType,
        id: &str,
        body: &Value,
    ) -> GatewayResult<Value> {
        self.request(format!("PUT {}/{}", resource_type, id))?;
        Ok(body.clone())
    }

    async fn delete(&self, resource_type: ResourceType, id: &str) -> GatewayResult<()> {
        self.settle_write().await;
        self.request(format!("DELETE {}/{}", resource_type, id))
    }

    async fn check_connectivity(&self) -> bool {
        true
    }
}

/// Notifier keeping every notification
#[derive(Default)]
pub struct RecordingNotifier {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn severities(&self) -> Vec<Severity> {
        self.notifications().iter().map(|n| n.severity).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.notifications.lock().unwrap().push(notification);
    }
}

/// Confirmation that always gives the same answer and counts prompts
pub struct ScriptedConfirmation {
    answer: bool,
    prompts: Mutex<usize>,
}

impl ScriptedConfirmation {
    pub fn new(answer: bool) -> Self {
        Self {
            answer,
            prompts: Mutex::new(0),
        }
    }

    pub fn prompts(&self) -> usize {
        *self.prompts.lock().unwrap()
    }
}

#[async_trait]
impl Confirmation for ScriptedConfirmation {
    async fn confirm(&self, _message: &str) -> bool {
        *self.prompts.lock().unwrap() += 1;
        self.answer
    }
}
