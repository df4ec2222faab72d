//! Admission control in front of the installer
//!
//! Hosts submit batches here rather than calling the installer directly.
//! A semaphore caps how many batches run concurrently; everything past
//! the cap queues in submission order. Per-package serialization is the
//! freezer's job, so two admitted batches only contend when they touch
//! the same names.

use crate::installer::Installer;
use crate::request::{InstallContext, RequestStatus};
use crate::result::{BatchResult, RequestOutcome};
use pkgd_errors::InstallCode;
use std::sync::Arc;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Cloneable front door; clones share the installer and the admission
/// limit.
#[derive(Clone, Debug)]
pub struct InstallService {
    installer: Arc<Installer>,
    permits: Arc<Semaphore>,
}

impl InstallService {
    #[must_use]
    pub fn new(installer: Arc<Installer>, max_concurrent_batches: usize) -> Self {
        Self {
            installer,
            permits: Arc::new(Semaphore::new(max_concurrent_batches.max(1))),
        }
    }

    #[must_use]
    pub fn installer(&self) -> &Installer {
        &self.installer
    }

    /// Batch slots currently free
    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// Admit one batch, waiting for a slot when the pipeline is full.
    pub async fn submit(&self, mut context: InstallContext) -> BatchResult {
        let permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                // The semaphore is never closed today; settle the batch
                // instead of panicking if that ever changes.
                let status =
                    RequestStatus::failure(InstallCode::Internal, "install service shut down");
                let mut result = BatchResult::new(Uuid::new_v4());
                for request in &mut context.requests {
                    result
                        .outcomes
                        .push(RequestOutcome::from_status(request.package_name(), &status));
                    request.finish(status.clone());
                }
                return result;
            }
        };
        let result = self.installer.install(context).await;
        drop(permit);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installer::PipelineConfig;
    use crate::request::InstallRequest;
    use pkgd_registry::{MemorySnapshotStore, PackageRegistry};
    use pkgd_types::{ParsedDescriptor, SigningDetails, Version};

    fn service(max_batches: usize) -> InstallService {
        let installer = Installer::new(
            PipelineConfig::default(),
            PackageRegistry::new(),
            Arc::new(MemorySnapshotStore::new()),
        );
        InstallService::new(Arc::new(installer), max_batches)
    }

    fn descriptor(name: &str) -> ParsedDescriptor {
        let mut d = ParsedDescriptor::new(name, 1, Version::new(1, 0, 0));
        d.signing = SigningDetails::from_cert(b"k1");
        d.sdk.target = 30;
        d
    }

    #[tokio::test]
    async fn slots_return_after_each_batch() {
        let service = service(2);
        assert_eq!(service.available_slots(), 2);

        let result = service
            .submit(
                InstallContext::new()
                    .add_request(InstallRequest::new(descriptor("com.example.one"))),
            )
            .await;
        assert!(result.succeeded());
        assert_eq!(service.available_slots(), 2);
    }

    #[tokio::test]
    async fn clones_share_the_installed_world() {
        let service = service(1);
        let sibling = service.clone();

        let first = service
            .submit(
                InstallContext::new()
                    .add_request(InstallRequest::new(descriptor("com.example.app"))),
            )
            .await;
        assert!(first.succeeded());

        // same package without the replace flag fails against the shared
        // registry
        let second = sibling
            .submit(
                InstallContext::new()
                    .add_request(InstallRequest::new(descriptor("com.example.app"))),
            )
            .await;
        assert_eq!(
            second.outcome_for("com.example.app").map(|o| o.code),
            Some(InstallCode::AlreadyExists.as_i32())
        );
    }
}
