//! Batch results reported to callers

use crate::request::RequestStatus;
use pkgd_errors::InstallCode;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Terminal outcome of one request in a batch
#[derive(Debug, Clone, Serialize)]
pub struct RequestOutcome {
    pub package: String,
    /// Stable numeric status; 1 is success, negatives are failures
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<u32>,
    pub update: bool,
    /// Old code path whose removal was deferred until the app exits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deferred_cleanup: Option<PathBuf>,
}

impl RequestOutcome {
    #[must_use]
    pub fn from_status(package: impl Into<String>, status: &RequestStatus) -> Self {
        Self {
            package: package.into(),
            code: status.code.as_i32(),
            message: status.message.clone(),
            app_id: None,
            update: false,
            deferred_cleanup: None,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code == InstallCode::Success.as_i32()
    }
}

/// Result of one batch: one outcome per requested package
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub batch_id: Uuid,
    pub outcomes: Vec<RequestOutcome>,
    pub duration: Duration,
}

impl BatchResult {
    #[must_use]
    pub fn new(batch_id: Uuid) -> Self {
        Self {
            batch_id,
            outcomes: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn succeeded(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.iter().all(RequestOutcome::is_success)
    }

    /// A fatal code means the registry can no longer be trusted and the
    /// hosting process should restart.
    #[must_use]
    pub fn fatal_code(&self) -> Option<InstallCode> {
        self.outcomes.iter().find_map(|outcome| {
            match outcome.code {
                c if c == InstallCode::RegistryPoisoned.as_i32() => {
                    Some(InstallCode::RegistryPoisoned)
                }
                c if c == InstallCode::WatchdogExpired.as_i32() => {
                    Some(InstallCode::WatchdogExpired)
                }
                c if c == InstallCode::PersistFailed.as_i32() => Some(InstallCode::PersistFailed),
                _ => None,
            }
        })
    }

    #[must_use]
    pub fn outcome_for(&self, package: &str) -> Option<&RequestOutcome> {
        self.outcomes.iter().find(|o| o.package == package)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_batch_did_not_succeed() {
        let result = BatchResult::new(Uuid::new_v4());
        assert!(!result.succeeded());
        assert!(result.fatal_code().is_none());
    }

    #[test]
    fn absent_fields_stay_out_of_the_serialized_outcome() {
        let outcome = RequestOutcome {
            package: "com.example.app".to_string(),
            code: InstallCode::Success.as_i32(),
            message: "installed".to_string(),
            app_id: Some(10_042),
            update: false,
            deferred_cleanup: None,
        };
        let value = serde_json::to_value(&outcome).expect("serialize");
        assert_eq!(value["app_id"], 10_042);
        assert!(value.get("deferred_cleanup").is_none());
    }

    #[test]
    fn fatal_code_is_detected() {
        let mut result = BatchResult::new(Uuid::new_v4());
        result.outcomes.push(RequestOutcome {
            package: "com.example.app".to_string(),
            code: InstallCode::WatchdogExpired.as_i32(),
            message: "budget exceeded".to_string(),
            app_id: None,
            update: false,
            deferred_cleanup: None,
        });
        assert_eq!(result.fatal_code(), Some(InstallCode::WatchdogExpired));
    }
}
