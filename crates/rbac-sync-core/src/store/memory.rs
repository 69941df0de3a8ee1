//! In-memory implementation of the RBAC store.
//!
//! # Purpose
//! Implements [`RbacStore`] with `BTreeMap`s guarded by `tokio::sync::RwLock`.
//! It exists for:
//! - local development and tests (no external dependencies)
//! - embedding the reconciler in a process that already owns its records
//!
//! # Durability and consistency
//! - **Not durable**: all state is lost on process restart.
//! - **Single-process consistency**: writes take the write lock of the table
//!   they touch; reads share the read lock.
//!
//! # Events
//! Observers are called after the lock of the mutated table is released, so
//! an observer may read the store from inside its callback. Deletes notify
//! `PermissionsDeleting` before the rows are removed and `PermissionsDeleted`
//! after.
use super::{PermissionFilter, RbacStore, StoreError, StoreResult, WriteOptions};
use crate::events::{StoreEvent, StoreObserver};
use crate::permission::{PermissionId, PermissionRecord, StoredPermission};
use crate::role::Role;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct PermissionTable {
    next_id: i64,
    rows: BTreeMap<PermissionId, PermissionRecord>,
}

impl PermissionTable {
    fn occupant(&self, record: &PermissionRecord) -> Option<PermissionId> {
        self.rows
            .iter()
            .find(|(_, row)| row.same_slot(record))
            .map(|(id, _)| *id)
    }

    fn matching(&self, filter: &PermissionFilter, limit: Option<usize>) -> Vec<StoredPermission> {
        self.rows
            .iter()
            .filter(|(_, record)| filter.matches(record))
            .take(limit.unwrap_or(usize::MAX))
            .map(|(id, record)| StoredPermission {
                id: *id,
                record: record.clone(),
            })
            .collect()
    }
}

/// In-memory RBAC store.
///
/// Ids are assigned from a per-store counter starting at 1 and never reused.
#[derive(Default)]
pub struct InMemoryStore {
    permissions: RwLock<PermissionTable>,
    roles: RwLock<BTreeMap<String, Role>>,
    observers: RwLock<Vec<Arc<dyn StoreObserver>>>,
    cache_generation: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `clear_caches` has run.
    pub fn cache_generation(&self) -> u64 {
        self.cache_generation.load(Ordering::Relaxed)
    }

    async fn notify(&self, opts: WriteOptions, event: StoreEvent) {
        if !opts.emit_events {
            return;
        }
        // Snapshot the observer list so callbacks can subscribe or write freely.
        let observers = self.observers.read().await.clone();
        for observer in observers {
            if let Err(err) = observer.observe(self, &event).await {
                tracing::warn!(event = event.kind(), error = %err, "store observer failed");
            }
        }
    }

    async fn remove_permissions(
        &self,
        ids: Vec<PermissionId>,
        opts: WriteOptions,
    ) -> Vec<PermissionId> {
        if ids.is_empty() {
            return ids;
        }
        self.notify(
            opts,
            StoreEvent::PermissionsDeleting {
                ids: ids.clone(),
                collection: None,
            },
        )
        .await;
        let removed: Vec<PermissionId> = {
            let mut table = self.permissions.write().await;
            ids.into_iter()
                .filter(|id| table.rows.remove(id).is_some())
                .collect()
        };
        if !removed.is_empty() {
            self.notify(
                opts,
                StoreEvent::PermissionsDeleted {
                    ids: removed.clone(),
                },
            )
            .await;
        }
        removed
    }
}

#[async_trait]
impl RbacStore for InMemoryStore {
    async fn create_permission(
        &self,
        record: PermissionRecord,
        opts: WriteOptions,
    ) -> StoreResult<PermissionId> {
        let id = {
            let mut table = self.permissions.write().await;
            if let Some(existing) = table.occupant(&record) {
                return Err(StoreError::Conflict(format!(
                    "permission {}/{}/{} exists as {existing}",
                    record.collection, record.action, record.role
                )));
            }
            table.next_id += 1;
            let id = PermissionId(table.next_id);
            table.rows.insert(id, record);
            id
        };
        self.notify(opts, StoreEvent::PermissionCreated { id }).await;
        Ok(id)
    }

    async fn read_permission(&self, id: PermissionId) -> StoreResult<StoredPermission> {
        self.permissions
            .read()
            .await
            .rows
            .get(&id)
            .map(|record| StoredPermission {
                id,
                record: record.clone(),
            })
            .ok_or_else(|| StoreError::NotFound(format!("permission {id}")))
    }

    async fn permission_collections(
        &self,
        ids: &[PermissionId],
    ) -> StoreResult<Vec<(PermissionId, String)>> {
        let table = self.permissions.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| {
                table
                    .rows
                    .get(id)
                    .map(|record| (*id, record.collection.clone()))
            })
            .collect())
    }

    async fn find_permissions(
        &self,
        filter: &PermissionFilter,
        limit: Option<usize>,
    ) -> StoreResult<Vec<StoredPermission>> {
        Ok(self.permissions.read().await.matching(filter, limit))
    }

    async fn find_permission_ids(
        &self,
        filter: &PermissionFilter,
        limit: Option<usize>,
    ) -> StoreResult<Vec<PermissionId>> {
        let table = self.permissions.read().await;
        Ok(table
            .rows
            .iter()
            .filter(|(_, record)| filter.matches(record))
            .take(limit.unwrap_or(usize::MAX))
            .map(|(id, _)| *id)
            .collect())
    }

    async fn update_permission(
        &self,
        id: PermissionId,
        record: PermissionRecord,
        opts: WriteOptions,
    ) -> StoreResult<()> {
        {
            let mut table = self.permissions.write().await;
            if !table.rows.contains_key(&id) {
                return Err(StoreError::NotFound(format!("permission {id}")));
            }
            if let Some(existing) = table.occupant(&record)
                && existing != id
            {
                return Err(StoreError::Conflict(format!(
                    "permission {}/{}/{} exists as {existing}",
                    record.collection, record.action, record.role
                )));
            }
            table.rows.insert(id, record);
        }
        self.notify(opts, StoreEvent::PermissionsUpdated { ids: vec![id] })
            .await;
        Ok(())
    }

    async fn delete_permissions(
        &self,
        filter: &PermissionFilter,
        opts: WriteOptions,
    ) -> StoreResult<Vec<PermissionId>> {
        let ids = self.find_permission_ids(filter, None).await?;
        Ok(self.remove_permissions(ids, opts).await)
    }

    async fn delete_permissions_by_id(
        &self,
        ids: &[PermissionId],
        opts: WriteOptions,
    ) -> StoreResult<Vec<PermissionId>> {
        let existing: Vec<PermissionId> = {
            let table = self.permissions.read().await;
            ids.iter()
                .copied()
                .filter(|id| table.rows.contains_key(id))
                .collect()
        };
        Ok(self.remove_permissions(existing, opts).await)
    }

    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        Ok(self.roles.read().await.values().cloned().collect())
    }

    async fn upsert_roles(&self, roles: Vec<Role>, opts: WriteOptions) -> StoreResult<Vec<String>> {
        if roles.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = {
            let mut table = self.roles.write().await;
            roles
                .into_iter()
                .map(|role| {
                    let id = role.id.clone();
                    table.insert(id.clone(), role);
                    id
                })
                .collect()
        };
        self.notify(opts, StoreEvent::RolesChanged { ids: ids.clone() })
            .await;
        Ok(ids)
    }

    async fn delete_roles(&self, ids: &[String], opts: WriteOptions) -> StoreResult<Vec<String>> {
        let removed: Vec<String> = {
            let mut table = self.roles.write().await;
            ids.iter()
                .filter(|id| table.remove(id.as_str()).is_some())
                .cloned()
                .collect()
        };
        if !removed.is_empty() {
            self.notify(
                opts,
                StoreEvent::RolesChanged {
                    ids: removed.clone(),
                },
            )
            .await;
        }
        Ok(removed)
    }

    async fn list_collections(&self) -> StoreResult<Vec<String>> {
        let table = self.permissions.read().await;
        let collections: BTreeSet<&str> = table
            .rows
            .values()
            .map(|record| record.collection.as_str())
            .collect();
        Ok(collections.into_iter().map(str::to_string).collect())
    }

    async fn clear_caches(&self) -> StoreResult<()> {
        self.cache_generation.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn subscribe(&self, observer: Arc<dyn StoreObserver>) -> StoreResult<()> {
        self.observers.write().await.push(observer);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
