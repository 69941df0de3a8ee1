//! Domain events emitted by store backends.
//!
//! # Purpose
//! Backends report role and permission changes as a closed set of
//! [`StoreEvent`]s to subscribed [`StoreObserver`]s. The observer receives the
//! store handle with each event so it can read what it needs without owning
//! the store.
//!
//! # Key invariants
//! - `PermissionsDeleting` is delivered while the records can still be
//!   resolved (or carries the collection when the source already knows it);
//!   `PermissionsDeleted` follows once they are gone.
//! - Writes made with `WriteOptions::SILENT` produce no events.
use crate::errors::SyncResult;
use crate::permission::PermissionId;
use crate::store::RbacStore;
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    PermissionCreated {
        id: PermissionId,
    },
    PermissionsUpdated {
        ids: Vec<PermissionId>,
    },
    PermissionsDeleting {
        ids: Vec<PermissionId>,
        collection: Option<String>,
    },
    PermissionsDeleted {
        ids: Vec<PermissionId>,
    },
    RolesChanged {
        ids: Vec<String>,
    },
}

impl StoreEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            StoreEvent::PermissionCreated { .. } => "permission.created",
            StoreEvent::PermissionsUpdated { .. } => "permissions.updated",
            StoreEvent::PermissionsDeleting { .. } => "permissions.deleting",
            StoreEvent::PermissionsDeleted { .. } => "permissions.deleted",
            StoreEvent::RolesChanged { .. } => "roles.changed",
        }
    }
}

#[async_trait]
pub trait StoreObserver: Send + Sync {
    async fn observe(&self, store: &dyn RbacStore, event: &StoreEvent) -> SyncResult<()>;
}
