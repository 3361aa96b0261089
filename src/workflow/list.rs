//! Practitioner list workflow
//!
//! Paginated listing over server continuation links, RPPS search, and the
//! create / update / delete flows that keep the page cache in step.

use std::sync::Arc;

use tracing::{debug, info};

use super::appointments::{appointments_for, AppointmentRow};
use super::edit::{EditOutcome, FormMapping, PractitionerForm};
use super::page_cache::PageCache;
use super::{
    create_with_roles, delete_cascading, find_by_rpps, practitioner_details, update_practitioner,
    Confirmation, DeleteDepth, DeleteReport, Notification, Notifier, PractitionerDetails,
    PractitionerWithRoles, Severity, WorkflowError,
};
use crate::activity_log;
use crate::config::Config;
use crate::gateway::FhirGateway;
use crate::mapper::from_bundle;
use crate::models::Practitioner;

const DELETE_PROMPT: &str = "Delete this practitioner and everything attached to it?";

/// Result of a delete request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Rejected at confirmation; nothing was sent
    Cancelled,
    Deleted(DeleteReport),
}

pub struct PractitionerList {
    gateway: Arc<dyn FhirGateway>,
    notifier: Arc<dyn Notifier>,
    confirmation: Arc<dyn Confirmation>,
    mapping: FormMapping,
    delete_depth: DeleteDepth,
    cache: PageCache,
    current_page: usize,
    displayed: Vec<Practitioner>,
    search_term: String,
}

impl PractitionerList {
    pub fn new(
        gateway: Arc<dyn FhirGateway>,
        notifier: Arc<dyn Notifier>,
        confirmation: Arc<dyn Confirmation>,
        config: &Config,
    ) -> Self {
        Self {
            gateway,
            notifier,
            confirmation,
            mapping: FormMapping::from(config),
            delete_depth: config.delete_depth,
            cache: PageCache::new(config.effective_page_size()),
            current_page: 0,
            displayed: Vec::new(),
            search_term: String::new(),
        }
    }

    pub fn displayed(&self) -> &[Practitioner] {
        &self.displayed
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn page_size(&self) -> usize {
        self.cache.page_size()
    }

    pub fn total(&self) -> Option<u64> {
        self.cache.total()
    }

    pub fn search_term(&self) -> &str {
        &self.search_term
    }

    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    fn notify(&self, severity: Severity, summary: &str, detail: impl Into<String>) {
        self.notifier
            .notify(Notification::new(severity, summary, detail));
    }

    fn failed(&self, operation: &str, error: WorkflowError) -> WorkflowError {
        activity_log::log_operation_failed(operation, &error.to_string());
        self.notify(Severity::Error, "Error", error.to_string());
        error
    }

    /// Show page `page`, leaving any RPPS search.
    ///
    /// Returns `Ok(None)` when the page is unreachable because no
    /// continuation URL was recorded for it; nothing changes then.
    pub async fn load_page(
        &mut self,
        page: usize,
        size: usize,
    ) -> Result<Option<&[Practitioner]>, WorkflowError> {
        let size = size.max(1);
        if size != self.cache.page_size() {
            debug!("Page size changed to {}, clearing cache", size);
            self.cache.reset(size);
        }

        if let Some(cached) = self.cache.page(page) {
            self.displayed = cached.to_vec();
            self.current_page = page;
            self.search_term.clear();
            activity_log::log_page_loaded(
                page,
                self.displayed.len(),
                true,
                self.cache.url_for(page + 1).is_some(),
            );
            return Ok(Some(&self.displayed));
        }

        let result = if page == 0 {
            self.gateway.search_practitioners(size).await
        } else {
            let Some(url) = self.cache.url_for(page).map(|u| u.to_string()) else {
                activity_log::log_page_unreachable(page);
                return Ok(None);
            };
            self.gateway.fetch_page(&url).await
        };
        let bundle = result.map_err(|e| self.failed("load_page", e.into()))?;

        let practitioners: Vec<Practitioner> = from_bundle(&bundle);
        self.cache.store(
            page,
            practitioners.clone(),
            bundle.next_url(),
            bundle.previous_url(),
            bundle.total,
        );
        activity_log::log_page_loaded(
            page,
            practitioners.len(),
            false,
            bundle.next_url().is_some(),
        );

        self.displayed = practitioners;
        self.current_page = page;
        self.search_term.clear();
        Ok(Some(&self.displayed))
    }

    /// Filter by RPPS number; a blank value shows the first page again
    pub async fn search_by_rpps(&mut self, value: &str) -> Result<&[Practitioner], WorkflowError> {
        let value = value.trim();

        if value.is_empty() {
            let size = self.cache.page_size();
            self.load_page(0, size).await?;
            return Ok(&self.displayed);
        }

        let matches = find_by_rpps(self.gateway.as_ref(), value)
            .await
            .map_err(|e| self.failed("search_by_rpps", e))?;
        activity_log::log_search(matches.len());
        self.displayed = matches;
        self.search_term = value.to_string();
        Ok(&self.displayed)
    }

    /// Create a practitioner and its roles from form values
    pub async fn create_practitioner(
        &mut self,
        form: &PractitionerForm,
    ) -> Result<PractitionerWithRoles, WorkflowError> {
        let practitioner = form.to_practitioner(&self.mapping, None);
        let roles = form.to_roles(&self.mapping, "");

        match create_with_roles(self.gateway.as_ref(), &practitioner, roles).await {
            Ok(created) => {
                self.fold_in(created.practitioner.clone());
                self.notify(Severity::Success, "Success", "Practitioner created");
                Ok(created)
            }
            Err(e) => {
                if let Some(persisted) = e.persisted_practitioner() {
                    self.fold_in(persisted.clone());
                }
                Err(self.failed("create_practitioner", e))
            }
        }
    }

    /// Full-replace update of the practitioner's demographics.
    ///
    /// The cache is left alone; callers refresh it with [`Self::replace_cached`].
    pub async fn update_practitioner(
        &self,
        id: &str,
        form: &PractitionerForm,
    ) -> Result<Practitioner, WorkflowError> {
        let practitioner = form.to_practitioner(&self.mapping, Some(id));
        let updated = update_practitioner(self.gateway.as_ref(), id, &practitioner)
            .await
            .map_err(|e| self.failed("update_practitioner", e))?;
        activity_log::log_practitioner_updated(id, 0, 0);
        self.notify(Severity::Success, "Success", "Practitioner updated");
        Ok(updated)
    }

    /// Swap the cached and displayed copies of `practitioner`
    pub fn replace_cached(&mut self, practitioner: &Practitioner) -> bool {
        let Some(id) = practitioner.id.as_deref() else {
            return false;
        };
        let mut replaced = self.cache.replace_practitioner(practitioner);
        for shown in self
            .displayed
            .iter_mut()
            .filter(|p| p.id.as_deref() == Some(id))
        {
            *shown = practitioner.clone();
            replaced = true;
        }
        replaced
    }

    fn fold_in(&mut self, practitioner: Practitioner) {
        if let Some(page) = self.cache.fold_in(practitioner.clone()) {
            if page == self.current_page && self.search_term.is_empty() {
                self.displayed.push(practitioner);
            }
        }
    }

    fn upsert_cached(&mut self, practitioner: &Practitioner) {
        let known = practitioner
            .id
            .as_deref()
            .is_some_and(|id| self.cache.contains_practitioner(id));
        if known {
            self.replace_cached(practitioner);
        } else {
            self.fold_in(practitioner.clone());
        }
    }

    /// Delete with the configured depth
    pub async fn delete_practitioner(&mut self, id: &str) -> Result<DeleteOutcome, WorkflowError> {
        let depth = self.delete_depth;
        self.delete_practitioner_with(id, depth).await
    }

    /// Ask for confirmation, then delete the practitioner and its dependents
    pub async fn delete_practitioner_with(
        &mut self,
        id: &str,
        depth: DeleteDepth,
    ) -> Result<DeleteOutcome, WorkflowError> {
        if !self.confirmation.confirm(DELETE_PROMPT).await {
            activity_log::log_delete_cancelled(id);
            return Ok(DeleteOutcome::Cancelled);
        }

        let report = delete_cascading(self.gateway.as_ref(), id, depth)
            .await
            .map_err(|e| self.failed("delete_practitioner", e))?;

        self.cache.remove_practitioner(id);
        self.displayed.retain(|p| p.id.as_deref() != Some(id));

        let detail = if report.dependents_failed == 0 {
            "Practitioner deleted".to_string()
        } else {
            format!(
                "Practitioner deleted; {} linked resource(s) could not be removed",
                report.dependents_failed
            )
        };
        self.notify(Severity::Success, "Success", detail);
        Ok(DeleteOutcome::Deleted(report))
    }

    /// Apply the closing payload of the edit dialog
    pub fn apply_edit_outcome(&mut self, outcome: &EditOutcome) {
        match outcome {
            EditOutcome::Created(created) => {
                self.fold_in(created.practitioner.clone());
                self.notify(Severity::Success, "Success", "Practitioner created");
            }
            EditOutcome::Updated(updated) => {
                self.replace_cached(&updated.practitioner);
                self.notify(Severity::Success, "Success", "Practitioner updated");
            }
            EditOutcome::Invalid(errors) => {
                debug!("Edit dialog still open with {} error(s)", errors.len());
            }
            EditOutcome::Failed { message, persisted } => {
                if let Some(practitioner) = persisted {
                    self.upsert_cached(practitioner);
                }
                self.notify(Severity::Error, "Error", message.as_str());
            }
        }
    }

    /// Roles, appointments and schedules of a practitioner
    pub async fn practitioner_details(&self, id: &str) -> Result<PractitionerDetails, WorkflowError> {
        practitioner_details(self.gateway.as_ref(), id)
            .await
            .map_err(|e| self.failed("practitioner_details", e))
    }

    /// Appointments of a practitioner, labelled with patient names
    pub async fn appointments(&self, id: &str) -> Result<Vec<AppointmentRow>, WorkflowError> {
        let rows = appointments_for(self.gateway.as_ref(), id)
            .await
            .map_err(|e| self.failed("appointments", e))?;
        info!("Loaded {} appointment(s)", rows.len());
        Ok(rows)
    }
}
