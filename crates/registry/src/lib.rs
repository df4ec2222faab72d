#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Installed-package registry for pkgd
//!
//! This crate owns the durable universe the install pipeline transacts
//! against: package records, shared-user groups, shared-library version
//! tables, permission and protected-broadcast tables, and the app
//! identity allocator. Access is transactional only: snapshots for
//! reads, an exclusive write guard for the commit span, and a poisoned
//! state after any commit failure.

pub mod allocator;
pub mod libraries;
pub mod models;
pub mod permissions;
pub mod registry;
pub mod snapshot;
pub mod store;

pub use allocator::{AppIdAllocator, AppIdReservation};
pub use libraries::{SdkLibraryInfo, SharedLibraryTable, StaticLibraryInfo, StaticOrderViolation};
pub use models::{PackageSetting, PackageUserState, SharedUserSetting};
pub use permissions::{PermissionEntry, PermissionGroupEntry, PermissionTable};
pub use registry::{PackageRegistry, RegistryWriteGuard};
pub use snapshot::{RegistrySnapshot, SNAPSHOT_SCHEMA_VERSION};
pub use store::{JsonSnapshotStore, MemorySnapshotStore, SnapshotStore};
