//! Activity Logging Module
//!
//! Structured activity logging for auditing and debugging.
//! IMPORTANT: This module must NEVER log PHI or practitioner identity.
//!
//! What IS logged:
//! - Server-assigned resource ids
//! - Page indices, counts and sizes
//! - Event types and outcomes (success/failure)
//! - Error messages
//!
//! What is NOT logged:
//! - Names, birth dates, addresses, telecom values
//! - RPPS numbers or matricules
//! - Photo payloads
//! - Appointment descriptions

use std::path::Path;
use std::sync::OnceLock;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Guard that must be held for the duration of the application
/// to ensure logs are flushed before exit
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize logging
///
/// - Console output (human-readable, `RUST_LOG` filter, `info` by default)
/// - File output (JSON, daily rotation) when `log_dir` is given
pub fn init_logging(log_dir: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

    let file_layer = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, "activity.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            LOG_GUARD.set(guard).ok();

            Some(
                fmt::layer()
                    .json()
                    .with_timer(UtcTime::rfc_3339())
                    .with_writer(non_blocking)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()?;

    info!(
        event = "logging_initialized",
        file_logging = log_dir.is_some(),
        "Activity logging system initialized"
    );

    Ok(())
}

// ============================================================================
// Listing
// ============================================================================

/// Log a list page shown, fetched or from the cache
pub fn log_page_loaded(page: usize, count: usize, from_cache: bool, has_next: bool) {
    info!(
        event = "page_loaded",
        page = page,
        count = count,
        from_cache = from_cache,
        has_next = has_next,
        "Practitioner page loaded"
    );
}

/// Log a page request with no known continuation URL
pub fn log_page_unreachable(page: usize) {
    warn!(
        event = "page_unreachable",
        page = page,
        "No continuation URL recorded for page"
    );
}

/// Log an RPPS search by its match count only
pub fn log_search(match_count: usize) {
    info!(event = "rpps_search", match_count = match_count, "RPPS search completed");
}

// ============================================================================
// Mutations
// ============================================================================

/// Log a created practitioner and how many of its roles were written
pub fn log_practitioner_created(practitioner_id: &str, roles_created: usize, roles_failed: usize) {
    if roles_failed == 0 {
        info!(
            event = "practitioner_created",
            practitioner_id = %practitioner_id,
            roles_created = roles_created,
            "Practitioner created"
        );
    } else {
        warn!(
            event = "practitioner_created_partially",
            practitioner_id = %practitioner_id,
            roles_created = roles_created,
            roles_failed = roles_failed,
            "Practitioner created but some roles failed"
        );
    }
}

/// Log a practitioner update by id
pub fn log_practitioner_updated(practitioner_id: &str, roles_written: usize, roles_removed: usize) {
    info!(
        event = "practitioner_updated",
        practitioner_id = %practitioner_id,
        roles_written = roles_written,
        roles_removed = roles_removed,
        "Practitioner updated"
    );
}

/// Log a dependent resource left behind by a cascading delete
pub fn log_dependent_delete_failed(resource: &str, id: &str, error: &str) {
    warn!(
        event = "dependent_delete_failed",
        resource = %resource,
        resource_id = %id,
        error = %error,
        "Dependent resource could not be deleted, continuing"
    );
}

/// Log a completed delete with its dependent counts
pub fn log_practitioner_deleted(practitioner_id: &str, dependents_deleted: usize, dependents_failed: usize) {
    info!(
        event = "practitioner_deleted",
        practitioner_id = %practitioner_id,
        dependents_deleted = dependents_deleted,
        dependents_failed = dependents_failed,
        "Practitioner deleted"
    );
}

/// Log a delete the user declined
pub fn log_delete_cancelled(practitioner_id: &str) {
    info!(
        event = "delete_cancelled",
        practitioner_id = %practitioner_id,
        "Deletion rejected at confirmation"
    );
}

// ============================================================================
// Failures
// ============================================================================

/// Log a failed gateway operation
pub fn log_operation_failed(operation: &str, error: &str) {
    error!(
        event = "operation_failed",
        operation = %operation,
        error = %error,
        "FHIR operation failed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_init_logging_once() {
        let dir = tempfile::tempdir().unwrap();
        assert!(init_logging(Some(&dir.path().join("logs"))).is_ok());
        assert!(dir.path().join("logs").is_dir());

        // A global subscriber is already installed
        assert!(init_logging(None).is_err());

        log_page_loaded(0, 5, false, true);
        log_practitioner_created("p1", 2, 0);
        log_practitioner_created("p2", 1, 1);
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_helpers_log_ids_and_counts() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            log_search(1);
            log_practitioner_deleted("p1", 4, 1);
            log_dependent_delete_failed("Appointment", "a1", "FHIR server returned 500: boom");
            log_delete_cancelled("p2");
        });

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let events: Vec<serde_json::Value> = output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0]["fields"]["event"], "rpps_search");
        assert_eq!(events[0]["fields"]["match_count"], 1);
        assert_eq!(events[1]["fields"]["practitioner_id"], "p1");
        assert_eq!(events[1]["fields"]["dependents_failed"], 1);
        assert_eq!(events[2]["level"], "WARN");
        assert_eq!(events[3]["fields"]["event"], "delete_cancelled");
    }
}
