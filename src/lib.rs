//! Administration client for the clinic's practitioners on a FHIR R4 server.
//!
//! Lists practitioners page by page, searches them by RPPS number, and
//! creates, edits or deletes them together with their roles.

pub mod activity_log;
pub mod config;
pub mod fhir;
pub mod gateway;
pub mod mapper;
pub mod models;
pub mod workflow;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use gateway::{FhirGateway, GatewayError, HttpFhirGateway};
pub use workflow::appointments::{appointments_by_rpps, appointments_for, AppointmentRow};
pub use workflow::edit::{
    validate, EditOutcome, FieldError, FieldErrorKind, FormMapping, PractitionerEditor,
    PractitionerForm, RoleEntry,
};
pub use workflow::list::{DeleteOutcome, PractitionerList};
pub use workflow::{
    Confirmation, DeleteDepth, DeleteReport, Notification, Notifier, PractitionerDetails,
    PractitionerWithRoles, ReferenceData, Severity, WorkflowError,
};
