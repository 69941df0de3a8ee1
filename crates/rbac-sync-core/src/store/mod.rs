//! Persistence boundary for roles and permission records.
//!
//! # Purpose
//! The reconciler never talks to a database directly. It needs a small set of
//! record operations, each able to tell "role equals this id" apart from
//! "role is null", and each able to suppress change notifications so that
//! reconciliation writes do not re-trigger an export.
//!
//! # Key invariants
//! - (role, collection, action) is unique; backends reject a second record for
//!   an occupied slot with [`StoreError::Conflict`].
//! - Reads return records ordered by id.
//! - A write with [`WriteOptions::SILENT`] emits no [`StoreEvent`].
use crate::action::Action;
use crate::events::StoreObserver;
use crate::permission::{PermissionId, PermissionRecord, StoredPermission};
use crate::role::{Role, RoleRef};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[cfg(test)]
pub(crate) mod failing;
pub mod memory;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Per-call write behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    pub emit_events: bool,
}

impl WriteOptions {
    /// Write without notifying observers. Used for every reconciliation write.
    pub const SILENT: WriteOptions = WriteOptions { emit_events: false };
    pub const NOTIFY: WriteOptions = WriteOptions { emit_events: true };
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self::NOTIFY
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RoleFilter {
    #[default]
    Any,
    /// Exactly this role; [`RoleRef::Public`] means "role is null".
    Is(RoleRef),
    /// Any of these roles. May mix named roles and [`RoleRef::Public`]; an
    /// empty list matches nothing.
    AnyOf(Vec<RoleRef>),
}

impl RoleFilter {
    pub fn matches(&self, role: &RoleRef) -> bool {
        match self {
            RoleFilter::Any => true,
            RoleFilter::Is(expected) => expected == role,
            RoleFilter::AnyOf(roles) => roles.contains(role),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ActionFilter {
    #[default]
    Any,
    Is(Action),
    /// Every action except these. An empty list matches every action.
    NoneOf(Vec<Action>),
}

impl ActionFilter {
    pub fn matches(&self, action: Action) -> bool {
        match self {
            ActionFilter::Any => true,
            ActionFilter::Is(expected) => *expected == action,
            ActionFilter::NoneOf(actions) => !actions.contains(&action),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PermissionFilter {
    pub collection: Option<String>,
    pub role: RoleFilter,
    pub action: ActionFilter,
}

impl PermissionFilter {
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: Some(collection.into()),
            ..Self::default()
        }
    }

    pub fn with_role(mut self, role: RoleFilter) -> Self {
        self.role = role;
        self
    }

    pub fn with_action(mut self, action: ActionFilter) -> Self {
        self.action = action;
        self
    }

    /// Filter addressing one uniqueness slot.
    pub fn slot(record: &PermissionRecord) -> Self {
        Self::collection(record.collection.clone())
            .with_role(RoleFilter::Is(record.role.clone()))
            .with_action(ActionFilter::Is(record.action))
    }

    pub fn matches(&self, record: &PermissionRecord) -> bool {
        self.collection
            .as_deref()
            .is_none_or(|collection| collection == record.collection)
            && self.role.matches(&record.role)
            && self.action.matches(record.action)
    }
}

/// Record store the reconciler reads from and writes to.
#[async_trait]
pub trait RbacStore: Send + Sync {
    async fn create_permission(
        &self,
        record: PermissionRecord,
        opts: WriteOptions,
    ) -> StoreResult<PermissionId>;
    async fn read_permission(&self, id: PermissionId) -> StoreResult<StoredPermission>;
    /// Collection of each existing id. Unknown ids are skipped.
    async fn permission_collections(
        &self,
        ids: &[PermissionId],
    ) -> StoreResult<Vec<(PermissionId, String)>>;
    async fn find_permissions(
        &self,
        filter: &PermissionFilter,
        limit: Option<usize>,
    ) -> StoreResult<Vec<StoredPermission>>;
    async fn find_permission_ids(
        &self,
        filter: &PermissionFilter,
        limit: Option<usize>,
    ) -> StoreResult<Vec<PermissionId>>;
    async fn update_permission(
        &self,
        id: PermissionId,
        record: PermissionRecord,
        opts: WriteOptions,
    ) -> StoreResult<()>;
    async fn delete_permissions(
        &self,
        filter: &PermissionFilter,
        opts: WriteOptions,
    ) -> StoreResult<Vec<PermissionId>>;
    async fn delete_permissions_by_id(
        &self,
        ids: &[PermissionId],
        opts: WriteOptions,
    ) -> StoreResult<Vec<PermissionId>>;

    async fn list_roles(&self) -> StoreResult<Vec<Role>>;
    /// Insert or replace every role by id in one batch.
    async fn upsert_roles(&self, roles: Vec<Role>, opts: WriteOptions) -> StoreResult<Vec<String>>;
    async fn delete_roles(&self, ids: &[String], opts: WriteOptions) -> StoreResult<Vec<String>>;

    /// Distinct collections that currently hold at least one permission record.
    async fn list_collections(&self) -> StoreResult<Vec<String>>;

    /// Invalidate caches derived from the stored rules after an import.
    async fn clear_caches(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Deliver future change events to `observer`.
    async fn subscribe(&self, observer: Arc<dyn StoreObserver>) -> StoreResult<()>;

    fn backend_name(&self) -> &'static str;
}
