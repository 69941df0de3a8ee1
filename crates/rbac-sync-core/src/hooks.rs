//! Trigger handlers that keep documents current after store changes.
//!
//! # Purpose
//! [`SyncHooks`] re-exports the documents touched by a store change. Each
//! handler is a plain async function taking the affected ids and a store
//! handle; [`StoreObserver`] wiring only dispatches to them.
//!
//! # Delete flow
//! A delete is observed twice. `permissions_deleting` runs while the ids
//! still resolve and records their collections in the [`DeleteTracker`];
//! `permissions_deleted` takes those entries back out and exports each
//! collection.
//!
//! # Errors
//! Handlers return their errors. A change touching several collections
//! exports all of them and then reports the failed ones together. `observe`
//! logs and drops the error: trigger-driven export is best effort and must
//! never fail the write that caused it.
use crate::errors::{SyncError, SyncResult};
use crate::events::{StoreEvent, StoreObserver};
use crate::export::Exporter;
use crate::permission::PermissionId;
use crate::store::RbacStore;
use crate::tracker::DeleteTracker;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::BTreeSet;

#[derive(Debug)]
pub struct SyncHooks {
    exporter: Exporter,
    tracker: DeleteTracker,
}

impl SyncHooks {
    pub fn new(exporter: Exporter) -> Self {
        Self {
            exporter,
            tracker: DeleteTracker::new(),
        }
    }

    pub fn tracker(&self) -> &DeleteTracker {
        &self.tracker
    }

    pub async fn permission_created(
        &self,
        store: &dyn RbacStore,
        id: PermissionId,
    ) -> SyncResult<()> {
        let stored = store.read_permission(id).await?;
        self.exporter
            .export_permissions(store, &stored.record.collection)
            .await?;
        Ok(())
    }

    pub async fn permissions_updated(
        &self,
        store: &dyn RbacStore,
        ids: &[PermissionId],
    ) -> SyncResult<()> {
        let collections: BTreeSet<String> = store
            .permission_collections(ids)
            .await?
            .into_iter()
            .map(|(_, collection)| collection)
            .collect();
        self.export_collections(store, collections).await
    }

    pub async fn permissions_deleting(
        &self,
        store: &dyn RbacStore,
        ids: &[PermissionId],
    ) -> SyncResult<()> {
        let resolved = store.permission_collections(ids).await?;
        self.tracker.capture(resolved);
        Ok(())
    }

    /// Capture for a source that already knows the collection of the ids.
    pub fn capture_deleting(&self, ids: &[PermissionId], collection: &str) {
        self.tracker
            .capture(ids.iter().map(|id| (*id, collection.to_string())));
    }

    pub async fn permissions_deleted(
        &self,
        store: &dyn RbacStore,
        ids: &[PermissionId],
    ) -> SyncResult<()> {
        let collections = self.tracker.take(ids);
        self.export_collections(store, collections).await
    }

    pub async fn roles_changed(&self, store: &dyn RbacStore) -> SyncResult<()> {
        self.exporter.export_roles(store).await?;
        Ok(())
    }

    async fn export_collections(
        &self,
        store: &dyn RbacStore,
        collections: BTreeSet<String>,
    ) -> SyncResult<()> {
        let results = join_all(collections.iter().map(|collection| async move {
            (
                collection,
                self.exporter.export_permissions(store, collection).await,
            )
        }))
        .await;
        let mut failed = Vec::new();
        for (collection, result) in results {
            if let Err(err) = result {
                tracing::warn!(collection = %collection, error = %err, "collection export failed");
                failed.push(collection.clone());
            }
        }
        if !failed.is_empty() {
            return Err(SyncError::CollectionsFailed(failed));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreObserver for SyncHooks {
    async fn observe(&self, store: &dyn RbacStore, event: &StoreEvent) -> SyncResult<()> {
        let result = match event {
            StoreEvent::PermissionCreated { id } => self.permission_created(store, *id).await,
            StoreEvent::PermissionsUpdated { ids } => self.permissions_updated(store, ids).await,
            StoreEvent::PermissionsDeleting {
                ids,
                collection: Some(collection),
            } => {
                self.capture_deleting(ids, collection);
                Ok(())
            }
            StoreEvent::PermissionsDeleting {
                ids,
                collection: None,
            } => self.permissions_deleting(store, ids).await,
            StoreEvent::PermissionsDeleted { ids } => self.permissions_deleted(store, ids).await,
            StoreEvent::RolesChanged { .. } => self.roles_changed(store).await,
        };
        if let Err(err) = result {
            metrics::counter!("rbac_sync_trigger_failures_total", "event" => event.kind())
                .increment(1);
            tracing::warn!(event = event.kind(), error = %err, "trigger export failed");
        }
        Ok(())
    }
}
