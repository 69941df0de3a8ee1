//! Two-way synchronization between stored RBAC rules and YAML documents.
//!
//! # Purpose
//! Operators declare roles and per-collection permissions as text, keep the
//! text in version control, and reconcile it into a live store. Changes made
//! directly in the store are projected back out to the same documents.
//!
//! # How it fits
//! - [`Exporter`] turns stored records into canonical documents through the
//!   grouping engine.
//! - [`Importer`] diffs a document against the store and applies the minimal
//!   set of deletes, updates and creates.
//! - [`SyncHooks`] subscribes to [`StoreEvent`]s and re-exports the documents
//!   a change touched.
//! - [`RbacStore`] is the persistence boundary; [`InMemoryStore`] is the
//!   process-local backend.
//!
//! # Key invariants
//! - export, import, export converges: the second export is byte-identical.
//! - The public role ([`RoleRef::Public`]) is a value of its own. It never
//!   matches a named role, including one literally called `"null"`.
//! - Reconciliation writes are silent and never re-trigger an export.
//!
//! # Examples
//! ```rust
//! use rbac_sync_core::{Action, PermissionRecord, RoleRef, group_permissions};
//!
//! let records = [
//!     PermissionRecord::new(RoleRef::named("editor"), "articles", Action::Read),
//!     PermissionRecord::new(RoleRef::Public, "articles", Action::Read),
//! ];
//! let blocks = group_permissions(&records);
//! assert_eq!(blocks.len(), 1);
//! assert_eq!(blocks[0].roles, vec![RoleRef::named("editor"), RoleRef::Public]);
//! ```
//!
//! # Common pitfalls
//! - A permission block without roles fails the whole collection import.
//! - Removing a role from the roles document does not delete it from the store.

mod action;
mod codec;
mod errors;
mod events;
mod export;
mod grouping;
mod hooks;
mod import;
mod layout;
mod permission;
mod role;
mod tracker;

pub mod store;

pub use action::Action;
pub use codec::{
    FieldList, PermissionBlock, RoleEntry, decode_permissions, decode_roles, encode_permissions,
    encode_roles,
};
pub use errors::{SyncError, SyncResult};
pub use events::{StoreEvent, StoreObserver};
pub use export::{ExportOutcome, ExportScope, ExportSummary, Exporter};
pub use grouping::group_permissions;
pub use hooks::SyncHooks;
pub use import::{ImportReport, ImportSummary, Importer};
pub use layout::{
    DOCUMENT_EXTENSION, PERMISSIONS_DIR, ROLES_FILE, SyncPaths, validate_collection,
};
pub use permission::{PermissionId, PermissionRecord, StoredPermission};
pub use role::{DEFAULT_ROLE_ICON, Role, RoleRef};
pub use store::memory::InMemoryStore;
pub use store::{
    ActionFilter, PermissionFilter, RbacStore, RoleFilter, StoreError, StoreResult, WriteOptions,
};
pub use tracker::DeleteTracker;
