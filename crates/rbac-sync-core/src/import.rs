//! Import reconciler: documents to store state.
//!
//! # Purpose
//! Converges the store onto what a document declares. For one collection the
//! document names a set of managed roles and a set of managed actions:
//! - records of a managed role whose action is no longer declared are deleted;
//! - every declared (role, action) pair is updated in place or created;
//! - records of roles the document never mentions are left alone.
//!
//! Roles are additive: a role missing from the roles document is kept.
//!
//! # Key invariants
//! - Validation runs on the whole document before the first store call, so a
//!   rejected document leaves the collection untouched.
//! - Every write uses [`WriteOptions::SILENT`]; an import never re-triggers
//!   an export of the document it just read.
//! - A missing document declares nothing and is not an error.
use crate::action::Action;
use crate::codec::{self, PermissionBlock};
use crate::errors::{SyncError, SyncResult};
use crate::layout::{SyncPaths, read_document, validate_collection};
use crate::permission::PermissionRecord;
use crate::role::{Role, RoleRef};
use crate::store::{ActionFilter, PermissionFilter, RbacStore, RoleFilter, WriteOptions};
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Store mutations made by one collection import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub roles: usize,
    pub collections: BTreeMap<String, ImportReport>,
}

enum Upserted {
    Created,
    Updated,
}

#[derive(Debug, Clone)]
pub struct Importer {
    paths: SyncPaths,
}

impl Importer {
    pub fn new(paths: SyncPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &SyncPaths {
        &self.paths
    }

    /// Reconcile the store records of `collection` with its document.
    pub async fn import_permissions(
        &self,
        store: &dyn RbacStore,
        collection: &str,
    ) -> SyncResult<ImportReport> {
        let path = self.paths.permission_file(collection)?;
        let Some(text) = read_document(&path).await? else {
            tracing::debug!(collection, "no permission document; nothing to import");
            return Ok(ImportReport::default());
        };
        let blocks = codec::decode_permissions(&text).map_err(|err| SyncError::codec(&path, err))?;
        let records = expand_blocks(collection, blocks)?;

        let managed_roles: BTreeSet<RoleRef> =
            records.iter().map(|record| record.role.clone()).collect();
        let managed_actions: BTreeSet<Action> = records.iter().map(|record| record.action).collect();

        let mut report = ImportReport::default();
        if !managed_roles.is_empty() {
            let stale = PermissionFilter::collection(collection)
                .with_role(RoleFilter::AnyOf(managed_roles.into_iter().collect()))
                .with_action(ActionFilter::NoneOf(managed_actions.into_iter().collect()));
            report.deleted = store
                .delete_permissions(&stale, WriteOptions::SILENT)
                .await?
                .len();
        }

        // Every upsert runs to completion; the first failure fails the collection.
        let outcomes = join_all(records.into_iter().map(|record| upsert(store, record))).await;
        let mut first_error = None;
        for outcome in outcomes {
            match outcome {
                Ok(Upserted::Created) => report.created += 1,
                Ok(Upserted::Updated) => report.updated += 1,
                Err(err) => {
                    tracing::warn!(collection, error = %err, "permission upsert failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        metrics::counter!("rbac_sync_import_records_total", "op" => "created")
            .increment(report.created as u64);
        metrics::counter!("rbac_sync_import_records_total", "op" => "updated")
            .increment(report.updated as u64);
        metrics::counter!("rbac_sync_import_records_total", "op" => "deleted")
            .increment(report.deleted as u64);
        tracing::debug!(
            collection,
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            "permissions reconciled"
        );
        Ok(report)
    }

    /// Upsert every role of the roles document. Returns how many were written.
    pub async fn import_roles(&self, store: &dyn RbacStore) -> SyncResult<usize> {
        let path = self.paths.roles_file();
        let Some(text) = read_document(&path).await? else {
            tracing::debug!("no roles document; nothing to import");
            return Ok(0);
        };
        let entries = codec::decode_roles(&text).map_err(|err| SyncError::codec(&path, err))?;
        if entries.is_empty() {
            return Ok(0);
        }
        let roles: Vec<Role> = entries.into_iter().map(|entry| entry.into_role()).collect();
        let written = store.upsert_roles(roles, WriteOptions::SILENT).await?;
        metrics::counter!("rbac_sync_import_roles_total").increment(written.len() as u64);
        Ok(written.len())
    }

    /// Import the roles, then every collection that has a document.
    ///
    /// Collections reconcile concurrently and fail independently; the error
    /// names every failed collection once all of them have finished. Caches
    /// are cleared either way.
    pub async fn import_all(&self, store: &dyn RbacStore) -> SyncResult<ImportSummary> {
        tracing::info!("importing roles");
        let roles = self.import_roles(store).await?;

        let collections = self.paths.configured_collections().await?;
        tracing::info!(collections = collections.len(), "importing permissions");
        let results = join_all(collections.iter().map(|collection| async move {
            (collection, self.import_permissions(store, collection).await)
        }))
        .await;

        let mut summary = ImportSummary {
            roles,
            collections: BTreeMap::new(),
        };
        let mut failed = Vec::new();
        for (collection, result) in results {
            match result {
                Ok(report) => {
                    summary.collections.insert(collection.clone(), report);
                }
                Err(err) => {
                    metrics::counter!("rbac_sync_import_failures_total").increment(1);
                    tracing::error!(collection = %collection, error = %err, "permission import failed");
                    failed.push(collection.clone());
                }
            }
        }

        if let Err(err) = store.clear_caches().await {
            tracing::warn!(error = %err, "cache clear after import failed");
            if failed.is_empty() {
                return Err(err.into());
            }
        }
        if !failed.is_empty() {
            return Err(SyncError::CollectionsFailed(failed));
        }
        tracing::info!(roles, collections = summary.collections.len(), "rbac imported");
        Ok(summary)
    }
}

/// Validate a parsed document and flatten it into one record per (block, role).
fn expand_blocks(
    collection: &str,
    blocks: Vec<PermissionBlock>,
) -> SyncResult<Vec<PermissionRecord>> {
    validate_collection(collection)?;
    let mut seen: HashSet<(RoleRef, Action)> = HashSet::new();
    let mut records = Vec::new();
    for block in blocks {
        if block.roles.is_empty() {
            return Err(SyncError::MissingRoles {
                collection: collection.to_string(),
                action: block.action,
            });
        }
        let fields = block.fields.map(|fields| fields.into_vec());
        for role in block.roles {
            if !seen.insert((role.clone(), block.action)) {
                return Err(SyncError::DuplicateRule {
                    collection: collection.to_string(),
                    action: block.action,
                    role,
                });
            }
            records.push(PermissionRecord {
                role,
                collection: collection.to_string(),
                action: block.action,
                permissions: block.permissions.clone(),
                validation: block.validation.clone(),
                presets: block.presets.clone(),
                fields: fields.clone(),
            });
        }
    }
    Ok(records)
}

async fn upsert(store: &dyn RbacStore, record: PermissionRecord) -> SyncResult<Upserted> {
    let existing = store
        .find_permission_ids(&PermissionFilter::slot(&record), Some(1))
        .await?;
    match existing.first() {
        Some(id) => {
            store
                .update_permission(*id, record, WriteOptions::SILENT)
                .await?;
            Ok(Upserted::Updated)
        }
        None => {
            store.create_permission(record, WriteOptions::SILENT).await?;
            Ok(Upserted::Created)
        }
    }
}
