//! Appointments of a practitioner, labelled with their patients

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, NaiveDate};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{find_by_rpps, WorkflowError};
use crate::gateway::FhirGateway;
use crate::mapper::{from_bundle, FromWire};
use crate::models::{Appointment, Patient};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentRow {
    pub appointment_id: String,
    pub patient_family: Option<String>,
    pub patient_given: Option<String>,
    pub patient_birth_date: Option<NaiveDate>,
    pub start: Option<DateTime<FixedOffset>>,
    pub description: Option<String>,
}

/// Appointments of the practitioner, patients fetched concurrently.
///
/// A patient that cannot be read leaves its row without patient data.
pub async fn appointments_for(
    gateway: &dyn FhirGateway,
    practitioner_id: &str,
) -> Result<Vec<AppointmentRow>, WorkflowError> {
    let bundle = gateway
        .search_appointments_by_practitioner(practitioner_id)
        .await?;
    let appointments: Vec<Appointment> = from_bundle(&bundle);

    let mut patient_ids: Vec<&str> = appointments
        .iter()
        .filter_map(|a| a.patient_ids.first().map(|id| id.as_str()))
        .collect();
    patient_ids.sort_unstable();
    patient_ids.dedup();

    let lookups = join_all(patient_ids.iter().map(|id| gateway.read_patient(id))).await;
    let patients: HashMap<&str, Patient> = patient_ids
        .iter()
        .zip(lookups)
        .filter_map(|(id, result)| match result {
            Ok(value) => Some((*id, Patient::from_wire(&value))),
            Err(e) => {
                warn!("Patient {} unavailable for appointment list: {}", id, e);
                None
            }
        })
        .collect();

    Ok(appointments
        .iter()
        .map(|appointment| {
            let patient = appointment
                .patient_ids
                .first()
                .and_then(|id| patients.get(id.as_str()));
            AppointmentRow {
                appointment_id: appointment.id.clone(),
                patient_family: patient.map(|p| p.name.family.clone()),
                patient_given: patient.map(|p| p.name.given.clone()),
                patient_birth_date: patient.and_then(|p| p.birth_date),
                start: appointment.start,
                description: appointment.description.clone(),
            }
        })
        .collect())
}

/// Appointments of the practitioner holding `rpps`; empty when nobody does
pub async fn appointments_by_rpps(
    gateway: &dyn FhirGateway,
    rpps: &str,
) -> Result<Vec<AppointmentRow>, WorkflowError> {
    let practitioners = find_by_rpps(gateway, rpps.trim()).await?;
    let Some(id) = practitioners.into_iter().find_map(|p| p.id) else {
        return Ok(Vec::new());
    };
    appointments_for(gateway, &id).await
}
