//! Install requests and batch context

use chrono::{DateTime, Utc};
use pkgd_errors::InstallCode;
use pkgd_events::{EventSender, PipelinePhase};
use pkgd_types::{InstallFlags, InstallSource, ParsedDescriptor, ScanFlags, UserId};
use tokio::sync::oneshot;

/// Terminal status of one request: the stable numeric code plus a
/// human-readable message for diagnostics. Callers match on the code.
#[derive(Debug, Clone)]
pub struct RequestStatus {
    pub code: InstallCode,
    pub message: String,
}

impl RequestStatus {
    #[must_use]
    pub fn success() -> Self {
        Self {
            code: InstallCode::Success,
            message: String::new(),
        }
    }

    #[must_use]
    pub fn failure(code: InstallCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code == InstallCode::Success
    }
}

/// One package in a batch
///
/// Created at batch start, mutated by every phase, never shared across
/// batches. The completion notifier replaces a post-commit callback: the
/// orchestrator sends the terminal status exactly once, after
/// post-install has run or failure is surfaced.
#[derive(Debug)]
pub struct InstallRequest {
    pub descriptor: ParsedDescriptor,
    pub flags: InstallFlags,
    pub user: UserId,
    pub source: InstallSource,
    status: Option<RequestStatus>,
    phase_times: Vec<(PipelinePhase, DateTime<Utc>)>,
    completion: Option<oneshot::Sender<RequestStatus>>,
}

impl InstallRequest {
    #[must_use]
    pub fn new(descriptor: ParsedDescriptor) -> Self {
        Self {
            descriptor,
            flags: InstallFlags::default(),
            user: UserId::PRIMARY,
            source: InstallSource::default(),
            status: None,
            phase_times: Vec::new(),
            completion: None,
        }
    }

    #[must_use]
    pub fn with_flags(mut self, flags: InstallFlags) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub fn with_user(mut self, user: UserId) -> Self {
        self.user = user;
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: InstallSource) -> Self {
        self.source = source;
        self
    }

    /// Attach a typed completion notifier, fired once with the terminal
    /// status.
    #[must_use]
    pub fn with_completion_notifier(mut self, tx: oneshot::Sender<RequestStatus>) -> Self {
        self.completion = Some(tx);
        self
    }

    #[must_use]
    pub fn package_name(&self) -> &str {
        &self.descriptor.name
    }

    /// Record that a phase finished for this request
    pub fn mark_phase(&mut self, phase: PipelinePhase) {
        self.phase_times.push((phase, Utc::now()));
    }

    #[must_use]
    pub fn phase_times(&self) -> &[(PipelinePhase, DateTime<Utc>)] {
        &self.phase_times
    }

    #[must_use]
    pub fn status(&self) -> Option<&RequestStatus> {
        self.status.as_ref()
    }

    /// Set the terminal status and fire the completion notifier. The
    /// first terminal status wins; later calls are ignored.
    pub fn finish(&mut self, status: RequestStatus) {
        if self.status.is_some() {
            return;
        }
        if let Some(tx) = self.completion.take() {
            // The waiter may be gone; completion is best-effort.
            let _ = tx.send(status.clone());
        }
        self.status = Some(status);
    }
}

/// Context for one install batch
#[derive(Debug)]
pub struct InstallContext {
    /// Requests committed together, all-or-nothing
    pub requests: Vec<InstallRequest>,
    /// Flags for the whole scan pass
    pub scan_flags: ScanFlags,
    /// Users known to the system; per-user state is initialized for all
    /// of them on commit
    pub known_users: Vec<UserId>,
    /// Event sender for progress reporting
    pub event_sender: Option<EventSender>,
}

context_builder! {
    InstallContext {
        requests: Vec<InstallRequest>,
        scan_flags: ScanFlags,
        known_users: Vec<UserId>,
    }
}
context_add_request_method!(InstallContext, InstallRequest);

impl InstallContext {
    /// Users the commit initializes state for, defaulting to the primary
    /// user when none were given
    #[must_use]
    pub fn users(&self) -> Vec<UserId> {
        if self.known_users.is_empty() {
            vec![UserId::PRIMARY]
        } else {
            self.known_users.clone()
        }
    }
}

impl pkgd_events::EventEmitter for InstallContext {
    fn event_sender(&self) -> Option<&EventSender> {
        self.event_sender.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkgd_types::Version;

    #[test]
    fn finish_is_first_writer_wins() {
        let descriptor = ParsedDescriptor::new("com.example.app", 1, Version::new(1, 0, 0));
        let (tx, mut rx) = oneshot::channel();
        let mut request = InstallRequest::new(descriptor).with_completion_notifier(tx);

        request.finish(RequestStatus::failure(
            InstallCode::VersionDowngrade,
            "downgrade",
        ));
        request.finish(RequestStatus::success());

        assert_eq!(
            request.status().map(|s| s.code),
            Some(InstallCode::VersionDowngrade)
        );
        let delivered = rx.try_recv().expect("notified");
        assert_eq!(delivered.code, InstallCode::VersionDowngrade);
    }

    #[test]
    fn context_builder_defaults() {
        let context = InstallContext::new();
        assert!(context.requests.is_empty());
        assert_eq!(context.users(), vec![UserId::PRIMARY]);
    }
}
