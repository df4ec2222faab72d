//! Per-package freeze locks.
//!
//! Two batches touching the same package name must not interleave. Each name
//! owns an async mutex; a batch holds the guards for every name it touches
//! from before scan until after post-install.

use dashmap::DashMap;
use pkgd_events::{events::InstallEvent, AppEvent, EventEmitter, EventSender};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Default)]
pub struct PackageFreezer {
    // Entries are never removed; a queued waiter may still hold a clone of
    // the Arc for a name another batch just released.
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl PackageFreezer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Freezes a single package name, waiting until any current holder
    /// releases it. Waiters are served in FIFO order.
    pub async fn freeze(&self, package: &str, tx: Option<EventSender>) -> FreezeGuard {
        let lock = Arc::clone(
            self.locks
                .entry(package.to_string())
                .or_default()
                .value(),
        );
        // The dashmap shard guard is dropped here; only the mutex is awaited.
        let permit = lock.lock_owned().await;
        tx.emit(AppEvent::Install(InstallEvent::FreezeAcquired {
            package: package.to_string(),
        }));
        FreezeGuard {
            package: package.to_string(),
            _permit: permit,
            tx,
        }
    }

    /// Freezes a whole batch worth of names. Names are deduplicated and
    /// acquired in sorted order so two overlapping batches cannot deadlock
    /// against each other.
    pub async fn freeze_batch(
        &self,
        names: impl IntoIterator<Item = String>,
        tx: Option<EventSender>,
    ) -> Vec<FreezeGuard> {
        let mut sorted: Vec<String> = names.into_iter().collect();
        sorted.sort();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for name in sorted {
            guards.push(self.freeze(&name, tx.clone()).await);
        }
        guards
    }

    /// True while some batch holds the freeze for this name.
    #[must_use]
    pub fn is_frozen(&self, package: &str) -> bool {
        self.locks
            .get(package)
            .is_some_and(|lock| lock.try_lock().is_err())
    }
}

impl std::fmt::Debug for PackageFreezer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageFreezer")
            .field("tracked", &self.locks.len())
            .finish()
    }
}

/// Held freeze on one package name; released on drop.
pub struct FreezeGuard {
    package: String,
    _permit: OwnedMutexGuard<()>,
    tx: Option<EventSender>,
}

impl FreezeGuard {
    #[must_use]
    pub fn package(&self) -> &str {
        &self.package
    }
}

impl Drop for FreezeGuard {
    fn drop(&mut self) {
        self.tx.emit(AppEvent::Install(InstallEvent::FreezeReleased {
            package: self.package.clone(),
        }));
    }
}

impl std::fmt::Debug for FreezeGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FreezeGuard")
            .field("package", &self.package)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_name_serializes() {
        let freezer = PackageFreezer::new();
        let guard = freezer.freeze("com.example.app", None).await;
        assert!(freezer.is_frozen("com.example.app"));

        let contender = {
            let freezer = freezer.clone();
            tokio::spawn(async move {
                let _guard = freezer.freeze("com.example.app", None).await;
            })
        };
        tokio::task::yield_now().await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
        assert!(!freezer.is_frozen("com.example.app"));
    }

    #[tokio::test]
    async fn distinct_names_run_concurrently() {
        let freezer = PackageFreezer::new();
        let _a = freezer.freeze("com.example.a", None).await;
        let _b = freezer.freeze("com.example.b", None).await;
        assert!(freezer.is_frozen("com.example.a"));
        assert!(freezer.is_frozen("com.example.b"));
    }

    #[tokio::test]
    async fn batch_freeze_dedups_names() {
        let freezer = PackageFreezer::new();
        let guards = freezer
            .freeze_batch(
                vec![
                    "com.example.b".to_string(),
                    "com.example.a".to_string(),
                    "com.example.b".to_string(),
                ],
                None,
            )
            .await;
        assert_eq!(guards.len(), 2);
        assert_eq!(guards[0].package(), "com.example.a");
        assert_eq!(guards[1].package(), "com.example.b");
    }

    #[tokio::test]
    async fn guard_emits_lifecycle_events() {
        let (tx, mut rx) = pkgd_events::channel();
        let freezer = PackageFreezer::new();
        let guard = freezer.freeze("com.example.app", Some(tx)).await;
        drop(guard);

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let AppEvent::Install(install) = event {
                seen.push(install);
            }
        }
        assert!(matches!(
            seen.as_slice(),
            [
                InstallEvent::FreezeAcquired { .. },
                InstallEvent::FreezeReleased { .. }
            ]
        ));
    }
}
