//! App identity allocation
//!
//! Identities are reserved optimistically during scan so that
//! reconciliation across a batch sees them, and released automatically
//! if the batch fails before commit. The allocator is serialized
//! internally and independent of the registry write lock.

use pkgd_errors::RegistryError;
use pkgd_types::{AppId, FIRST_APPLICATION_APP_ID, LAST_APPLICATION_APP_ID};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct AllocatorState {
    used: BTreeSet<u32>,
}

impl AllocatorState {
    /// Lowest free identity in the application range
    fn first_free(&self) -> Option<u32> {
        let mut candidate = FIRST_APPLICATION_APP_ID;
        for used in self.used.range(FIRST_APPLICATION_APP_ID..=LAST_APPLICATION_APP_ID) {
            if *used > candidate {
                return Some(candidate);
            }
            candidate = used + 1;
        }
        (candidate <= LAST_APPLICATION_APP_ID).then_some(candidate)
    }
}

/// Shared allocator handle. Cloning shares the underlying state.
#[derive(Debug, Clone, Default)]
pub struct AppIdAllocator {
    state: Arc<Mutex<AllocatorState>>,
}

impl AppIdAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, AllocatorState> {
        // Nothing inside the critical sections can panic, so a poisoned
        // lock still holds consistent state.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark an identity as in use. Used while rebuilding from a snapshot;
    /// idempotent, ignores identities outside the application range.
    pub fn mark_used(&self, app_id: AppId) {
        if app_id.is_application() {
            self.lock().used.insert(app_id.0);
        }
    }

    /// Reserve the lowest free identity, holding it until the returned
    /// guard is dropped or committed.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AppIdExhausted`] when the application
    /// range is fully allocated.
    pub fn reserve(&self) -> Result<AppIdReservation, RegistryError> {
        let mut state = self.lock();
        let Some(id) = state.first_free() else {
            return Err(RegistryError::AppIdExhausted);
        };
        state.used.insert(id);
        drop(state);
        Ok(AppIdReservation {
            allocator: self.clone(),
            app_id: AppId(id),
            committed: false,
        })
    }

    /// Release a committed identity, e.g. when an empty shared-user group
    /// is pruned.
    pub fn release(&self, app_id: AppId) {
        if app_id.is_application() {
            self.lock().used.remove(&app_id.0);
        }
    }

    #[must_use]
    pub fn is_used(&self, app_id: AppId) -> bool {
        self.lock().used.contains(&app_id.0)
    }

    /// Number of identities currently held
    #[must_use]
    pub fn used_count(&self) -> usize {
        self.lock().used.len()
    }
}

/// Optimistic hold on one app identity
///
/// Dropping the reservation returns the identity to the pool. A batch
/// that commits calls [`AppIdReservation::commit`], which keeps the
/// identity marked and hands back the bare id for the durable record.
#[derive(Debug)]
pub struct AppIdReservation {
    allocator: AppIdAllocator,
    app_id: AppId,
    committed: bool,
}

impl AppIdReservation {
    #[must_use]
    pub fn app_id(&self) -> AppId {
        self.app_id
    }

    /// Keep the identity allocated permanently
    #[must_use]
    pub fn commit(mut self) -> AppId {
        self.committed = true;
        self.app_id
    }
}

impl Drop for AppIdReservation {
    fn drop(&mut self) {
        if !self.committed {
            self.allocator.release(self.app_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn allocation_is_dense_first_free() {
        let allocator = AppIdAllocator::new();
        let first = allocator.reserve().expect("reserve").commit();
        let second = allocator.reserve().expect("reserve").commit();
        assert_eq!(first, AppId(FIRST_APPLICATION_APP_ID));
        assert_eq!(second, AppId(FIRST_APPLICATION_APP_ID + 1));

        allocator.release(first);
        let third = allocator.reserve().expect("reserve").commit();
        assert_eq!(third, first);
    }

    #[test]
    fn drop_releases_reservation() {
        let allocator = AppIdAllocator::new();
        let id = {
            let reservation = allocator.reserve().expect("reserve");
            reservation.app_id()
        };
        assert!(!allocator.is_used(id));

        let committed = allocator.reserve().expect("reserve").commit();
        assert_eq!(committed, id);
        assert!(allocator.is_used(id));
    }

    #[test]
    fn gap_after_mark_used_is_filled_first() {
        let allocator = AppIdAllocator::new();
        allocator.mark_used(AppId(FIRST_APPLICATION_APP_ID));
        allocator.mark_used(AppId(FIRST_APPLICATION_APP_ID + 2));
        let reserved = allocator.reserve().expect("reserve").commit();
        assert_eq!(reserved, AppId(FIRST_APPLICATION_APP_ID + 1));
    }

    #[test]
    fn exhaustion_is_an_error_not_a_panic() {
        let allocator = AppIdAllocator::new();
        for id in FIRST_APPLICATION_APP_ID..=LAST_APPLICATION_APP_ID {
            allocator.mark_used(AppId(id));
        }
        assert!(matches!(
            allocator.reserve(),
            Err(RegistryError::AppIdExhausted)
        ));
    }

    #[test]
    fn non_application_ids_are_ignored() {
        let allocator = AppIdAllocator::new();
        allocator.mark_used(AppId::platform());
        assert_eq!(allocator.used_count(), 0);
    }

    proptest! {
        #[test]
        fn reservations_are_unique(count in 1usize..200) {
            let allocator = AppIdAllocator::new();
            let mut seen = std::collections::HashSet::new();
            let mut held = Vec::new();
            for _ in 0..count {
                let reservation = allocator.reserve().expect("range not exhausted");
                prop_assert!(seen.insert(reservation.app_id()));
                held.push(reservation);
            }
            drop(held);
            prop_assert_eq!(allocator.used_count(), 0);
        }
    }
}
