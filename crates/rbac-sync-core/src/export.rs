//! Export pipeline: store state to documents.
//!
//! # Purpose
//! Projects the live store onto the document tree. Each export reads the
//! current records, canonicalizes them and overwrites the document, or
//! removes it when nothing is left to declare.
//!
//! # Key invariants
//! - An empty rule set never produces an empty document; the document is
//!   removed instead, and a missing document is left missing.
//! - Exports only touch the filesystem, never the store.
//!
//! # Errors
//! Export functions return their failures. Trigger-driven callers treat
//! export as best effort and log them (see `hooks`).
use crate::codec::{self, RoleEntry};
use crate::errors::{SyncError, SyncResult};
use crate::grouping::group_permissions;
use crate::layout::{SyncPaths, remove_document, validate_collection, write_document};
use crate::store::{PermissionFilter, RbacStore};
use futures::future::join_all;
use std::collections::BTreeSet;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportOutcome {
    Written,
    Removed,
    /// Nothing to declare and no document to remove.
    Absent,
}

/// Which collections a full export covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportScope {
    pub include_system: bool,
    pub system_prefix: String,
}

impl ExportScope {
    pub fn includes(&self, collection: &str) -> bool {
        self.include_system
            || self.system_prefix.is_empty()
            || !collection.starts_with(&self.system_prefix)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub written: Vec<String>,
    pub removed: Vec<String>,
    pub roles: Option<ExportOutcome>,
}

#[derive(Debug, Clone)]
pub struct Exporter {
    paths: SyncPaths,
}

impl Exporter {
    pub fn new(paths: SyncPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &SyncPaths {
        &self.paths
    }

    /// Rewrite the permission document of `collection` from the store.
    pub async fn export_permissions(
        &self,
        store: &dyn RbacStore,
        collection: &str,
    ) -> SyncResult<ExportOutcome> {
        validate_collection(collection)?;
        let rows = store
            .find_permissions(&PermissionFilter::collection(collection), None)
            .await?;
        let blocks = group_permissions(rows.iter().map(|row| &row.record));
        let path = self.paths.permission_file(collection)?;

        if blocks.is_empty() {
            return remove(&path, "permissions").await;
        }
        let text = codec::encode_permissions(&blocks).map_err(|err| SyncError::codec(&path, err))?;
        write_document(&path, &text).await?;
        metrics::counter!("rbac_sync_documents_written_total", "kind" => "permissions")
            .increment(1);
        tracing::debug!(collection, blocks = blocks.len(), "permission document written");
        Ok(ExportOutcome::Written)
    }

    /// Rewrite the roles document from every stored role.
    pub async fn export_roles(&self, store: &dyn RbacStore) -> SyncResult<ExportOutcome> {
        let roles = store.list_roles().await?;
        let path = self.paths.roles_file();
        if roles.is_empty() {
            return remove(&path, "roles").await;
        }
        let entries: Vec<RoleEntry> = roles.iter().map(RoleEntry::from).collect();
        let text = codec::encode_roles(&entries).map_err(|err| SyncError::codec(&path, err))?;
        write_document(&path, &text).await?;
        metrics::counter!("rbac_sync_documents_written_total", "kind" => "roles").increment(1);
        tracing::debug!(roles = entries.len(), "roles document written");
        Ok(ExportOutcome::Written)
    }

    /// Export every collection in scope, then the roles.
    ///
    /// Covers collections with stored rules and collections that still have a
    /// document, so stale documents are removed. Collections export
    /// concurrently; all of them finish before a failure is reported.
    pub async fn export_all(
        &self,
        store: &dyn RbacStore,
        scope: &ExportScope,
    ) -> SyncResult<ExportSummary> {
        let mut collections: BTreeSet<String> = store.list_collections().await?.into_iter().collect();
        collections.extend(self.paths.configured_collections().await?);
        collections.retain(|collection| scope.includes(collection));

        tracing::info!(collections = collections.len(), "exporting permissions");
        let results = join_all(collections.iter().map(|collection| async move {
            (collection, self.export_permissions(store, collection).await)
        }))
        .await;

        let mut summary = ExportSummary::default();
        let mut failed = Vec::new();
        for (collection, result) in results {
            match result {
                Ok(ExportOutcome::Written) => summary.written.push(collection.clone()),
                Ok(ExportOutcome::Removed) => summary.removed.push(collection.clone()),
                Ok(ExportOutcome::Absent) => {}
                Err(err) => {
                    tracing::error!(collection = %collection, error = %err, "permission export failed");
                    failed.push(collection.clone());
                }
            }
        }
        if !failed.is_empty() {
            return Err(SyncError::CollectionsFailed(failed));
        }

        tracing::info!("exporting roles");
        summary.roles = Some(self.export_roles(store).await?);
        tracing::info!(
            written = summary.written.len(),
            removed = summary.removed.len(),
            "rbac exported"
        );
        Ok(summary)
    }
}

async fn remove(path: &Path, kind: &'static str) -> SyncResult<ExportOutcome> {
    if remove_document(path).await? {
        metrics::counter!("rbac_sync_documents_removed_total", "kind" => kind).increment(1);
        tracing::debug!(path = %path.display(), "empty document removed");
        Ok(ExportOutcome::Removed)
    } else {
        Ok(ExportOutcome::Absent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::permission::PermissionRecord;
    use crate::role::{Role, RoleRef};
    use crate::store::WriteOptions;
    use crate::store::memory::InMemoryStore;

    async fn seed(store: &InMemoryStore, records: Vec<PermissionRecord>) {
        for record in records {
            store
                .create_permission(record, WriteOptions::SILENT)
                .await
                .expect("seed");
        }
    }

    fn setup() -> (tempfile::TempDir, Exporter, InMemoryStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let exporter = Exporter::new(SyncPaths::new(dir.path()));
        (dir, exporter, InMemoryStore::new())
    }

    fn read(path: &Path) -> String {
        std::fs::read_to_string(path).expect("document")
    }

    #[tokio::test]
    async fn groups_shared_rules_into_one_block() {
        let (_dir, exporter, store) = setup();
        seed(
            &store,
            vec![
                PermissionRecord::new(RoleRef::named("A"), "articles", Action::Read)
                    .with_fields(["a", "b"]),
                PermissionRecord::new(RoleRef::named("B"), "articles", Action::Read)
                    .with_fields(["a", "b"]),
                PermissionRecord::new(RoleRef::named("C"), "articles", Action::Read)
                    .with_fields(["c"]),
            ],
        )
        .await;

        let outcome = exporter
            .export_permissions(&store, "articles")
            .await
            .expect("export");
        assert_eq!(outcome, ExportOutcome::Written);
        let path = exporter.paths().permission_file("articles").expect("path");
        assert_eq!(
            read(&path),
            "- action: read\n  fields:\n  - a\n  - b\n  roles:\n  - A\n  - B\n\n- action: read\n  fields: c\n  roles:\n  - C\n"
        );
    }

    #[tokio::test]
    async fn empty_collection_removes_existing_document() {
        let (_dir, exporter, store) = setup();
        let path = exporter.paths().permission_file("articles").expect("path");
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(&path, "- action: read\n  roles:\n  - null\n").expect("write");

        let outcome = exporter
            .export_permissions(&store, "articles")
            .await
            .expect("export");
        assert_eq!(outcome, ExportOutcome::Removed);
        assert!(!path.exists());

        let outcome = exporter
            .export_permissions(&store, "articles")
            .await
            .expect("export");
        assert_eq!(outcome, ExportOutcome::Absent);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn roles_export_drops_falsy_attributes() {
        let (_dir, exporter, store) = setup();
        let mut admin = Role::new("admin", "Administrator");
        admin.icon = "verified".to_string();
        admin.admin_access = true;
        admin.app_access = true;
        admin.ip_allowlist = vec!["10.0.0.1".to_string()];
        store
            .upsert_roles(vec![admin, Role::new("viewer", "Viewer")], WriteOptions::SILENT)
            .await
            .expect("roles");

        assert_eq!(
            exporter.export_roles(&store).await.expect("export"),
            ExportOutcome::Written
        );
        assert_eq!(
            read(&exporter.paths().roles_file()),
            "- id: admin\n  name: Administrator\n  icon: verified\n  ip_allowlist:\n  - 10.0.0.1\n  app_access: true\n  admin_access: true\n\n- id: viewer\n  name: Viewer\n  icon: supervised_user_circle\n"
        );

        store
            .delete_roles(&["admin".to_string(), "viewer".to_string()], WriteOptions::SILENT)
            .await
            .expect("delete");
        assert_eq!(
            exporter.export_roles(&store).await.expect("export"),
            ExportOutcome::Removed
        );
        assert!(!exporter.paths().roles_file().exists());
    }

    #[tokio::test]
    async fn export_all_respects_system_scope_and_removes_stale_documents() {
        let (_dir, exporter, store) = setup();
        seed(
            &store,
            vec![
                PermissionRecord::new(RoleRef::Public, "articles", Action::Read),
                PermissionRecord::new(RoleRef::Public, "system_files", Action::Read),
            ],
        )
        .await;
        let stale = exporter.paths().permission_file("retired").expect("path");
        std::fs::create_dir_all(stale.parent().expect("parent")).expect("mkdir");
        std::fs::write(&stale, "- action: read\n  roles:\n  - editor\n").expect("write");

        let scope = ExportScope {
            include_system: false,
            system_prefix: "system_".to_string(),
        };
        let summary = exporter.export_all(&store, &scope).await.expect("export");
        assert_eq!(summary.written, vec!["articles".to_string()]);
        assert_eq!(summary.removed, vec!["retired".to_string()]);
        assert_eq!(summary.roles, Some(ExportOutcome::Absent));
        assert!(
            !exporter
                .paths()
                .permission_file("system_files")
                .expect("path")
                .exists()
        );

        let scope = ExportScope {
            include_system: true,
            ..scope
        };
        let summary = exporter.export_all(&store, &scope).await.expect("export");
        assert_eq!(
            summary.written,
            vec!["articles".to_string(), "system_files".to_string()]
        );
    }

    #[tokio::test]
    async fn invalid_collection_is_rejected_before_io() {
        let (_dir, exporter, store) = setup();
        let err = exporter
            .export_permissions(&store, "../roles")
            .await
            .expect_err("invalid");
        assert!(matches!(err, SyncError::InvalidCollection(_)));
    }
}
