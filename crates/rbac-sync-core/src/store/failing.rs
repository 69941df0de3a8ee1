//! In-memory store that rejects writes to chosen collections.
use super::memory::InMemoryStore;
use super::{PermissionFilter, RbacStore, StoreError, StoreResult, WriteOptions};
use crate::events::StoreObserver;
use crate::permission::{PermissionId, PermissionRecord, StoredPermission};
use crate::role::Role;
use anyhow::anyhow;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Default)]
pub(crate) struct FailingStore {
    pub(crate) inner: InMemoryStore,
    failing: BTreeSet<String>,
    fail_cache_clear: bool,
}

impl FailingStore {
    pub(crate) fn failing_writes_for<I, S>(collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            failing: collections.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub(crate) fn with_cache_clear_failure(mut self) -> Self {
        self.fail_cache_clear = true;
        self
    }

    fn check(&self, record: &PermissionRecord) -> StoreResult<()> {
        if self.failing.contains(&record.collection) {
            return Err(StoreError::Unexpected(anyhow!(
                "write to {} rejected",
                record.collection
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RbacStore for FailingStore {
    async fn create_permission(
        &self,
        record: PermissionRecord,
        opts: WriteOptions,
    ) -> StoreResult<PermissionId> {
        self.check(&record)?;
        self.inner.create_permission(record, opts).await
    }

    async fn read_permission(&self, id: PermissionId) -> StoreResult<StoredPermission> {
        self.inner.read_permission(id).await
    }

    async fn permission_collections(
        &self,
        ids: &[PermissionId],
    ) -> StoreResult<Vec<(PermissionId, String)>> {
        self.inner.permission_collections(ids).await
    }

    async fn find_permissions(
        &self,
        filter: &PermissionFilter,
        limit: Option<usize>,
    ) -> StoreResult<Vec<StoredPermission>> {
        self.inner.find_permissions(filter, limit).await
    }

    async fn find_permission_ids(
        &self,
        filter: &PermissionFilter,
        limit: Option<usize>,
    ) -> StoreResult<Vec<PermissionId>> {
        self.inner.find_permission_ids(filter, limit).await
    }

    async fn update_permission(
        &self,
        id: PermissionId,
        record: PermissionRecord,
        opts: WriteOptions,
    ) -> StoreResult<()> {
        self.check(&record)?;
        self.inner.update_permission(id, record, opts).await
    }

    async fn delete_permissions(
        &self,
        filter: &PermissionFilter,
        opts: WriteOptions,
    ) -> StoreResult<Vec<PermissionId>> {
        self.inner.delete_permissions(filter, opts).await
    }

    async fn delete_permissions_by_id(
        &self,
        ids: &[PermissionId],
        opts: WriteOptions,
    ) -> StoreResult<Vec<PermissionId>> {
        self.inner.delete_permissions_by_id(ids, opts).await
    }

    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        self.inner.list_roles().await
    }

    async fn upsert_roles(&self, roles: Vec<Role>, opts: WriteOptions) -> StoreResult<Vec<String>> {
        self.inner.upsert_roles(roles, opts).await
    }

    async fn delete_roles(&self, ids: &[String], opts: WriteOptions) -> StoreResult<Vec<String>> {
        self.inner.delete_roles(ids, opts).await
    }

    async fn list_collections(&self) -> StoreResult<Vec<String>> {
        self.inner.list_collections().await
    }

    async fn clear_caches(&self) -> StoreResult<()> {
        if self.fail_cache_clear {
            return Err(StoreError::Unexpected(anyhow!("cache clear rejected")));
        }
        self.inner.clear_caches().await
    }

    async fn subscribe(&self, observer: Arc<dyn StoreObserver>) -> StoreResult<()> {
        self.inner.subscribe(observer).await
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }
}
