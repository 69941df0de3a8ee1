//! Manual commands and the long-running service loop.
//!
//! # Purpose
//! Each command takes the loaded configuration and a store handle, runs one
//! reconciliation direction, and returns `Err` on any failure so the binary
//! can map it to a non-zero exit code.
//!
//! # Notes
//! Manual import is refused when the configured mode already imports on
//! start; running both would reconcile the same documents twice.
use crate::config::SyncConfig;
use crate::observability;
use anyhow::{Context, bail};
use metrics_exporter_prometheus::PrometheusHandle;
use rbac_sync_core::{
    ExportScope, ExportSummary, Exporter, ImportSummary, Importer, RbacStore, SyncHooks, SyncPaths,
};
use std::future::Future;
use std::sync::Arc;

pub async fn import(config: &SyncConfig, store: &dyn RbacStore) -> anyhow::Result<ImportSummary> {
    if config.mode.imports_on_start() {
        tracing::warn!(
            mode = %config.mode,
            "import already runs on start; refusing manual import"
        );
        bail!(
            "manual import refused: RBAC_SYNC_MODE={} imports on start",
            config.mode
        );
    }
    import_all(config, store).await
}

pub async fn export(
    config: &SyncConfig,
    store: &dyn RbacStore,
    include_system: bool,
) -> anyhow::Result<ExportSummary> {
    let exporter = Exporter::new(SyncPaths::new(&config.config_path));
    let scope = ExportScope {
        include_system,
        system_prefix: config.system_prefix.clone(),
    };
    exporter
        .export_all(store, &scope)
        .await
        .context("export rbac documents")
}

/// Run until `shutdown` resolves: import on start, keep documents current,
/// and serve metrics, each as enabled by the configuration.
pub async fn run<F>(
    config: &SyncConfig,
    store: Arc<dyn RbacStore>,
    metrics_handle: PrometheusHandle,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if config.mode.imports_on_start() {
        import_all(config, store.as_ref()).await?;
    }
    if config.mode.exports_on_change() {
        let hooks = SyncHooks::new(Exporter::new(SyncPaths::new(&config.config_path)));
        store
            .subscribe(Arc::new(hooks))
            .await
            .context("subscribe export hooks")?;
        tracing::info!("exporting rbac documents on change");
    }

    let metrics_task = config.metrics_bind.map(|addr| {
        tokio::spawn(observability::serve_metrics(
            metrics_handle,
            addr,
            std::future::pending(),
        ))
    });

    tracing::info!(mode = %config.mode, backend = store.backend_name(), "rbac-sync running");
    shutdown.await;
    tracing::info!("rbac-sync stopping");

    if let Some(task) = metrics_task {
        task.abort();
        let _ = task.await;
    }
    Ok(())
}

async fn import_all(config: &SyncConfig, store: &dyn RbacStore) -> anyhow::Result<ImportSummary> {
    let importer = Importer::new(SyncPaths::new(&config.config_path));
    importer
        .import_all(store)
        .await
        .context("import rbac documents")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncMode;
    use rbac_sync_core::{
        Action, InMemoryStore, PermissionFilter, PermissionRecord, RoleRef, WriteOptions,
    };
    use serial_test::serial;
    use std::path::Path;

    fn config_for(root: &Path, mode: SyncMode) -> SyncConfig {
        SyncConfig {
            config_path: root.to_path_buf(),
            mode,
            ..SyncConfig::default()
        }
    }

    fn write(path: &Path, text: &str) {
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, text).expect("write");
    }

    #[tokio::test]
    async fn manual_import_is_refused_when_mode_imports() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = InMemoryStore::new();
        for mode in [SyncMode::Import, SyncMode::Full] {
            let err = import(&config_for(dir.path(), mode), &store)
                .await
                .expect_err("refused");
            assert!(err.to_string().contains("manual import refused"));
        }
    }

    #[tokio::test]
    async fn manual_import_reconciles_documents() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(&dir.path().join("roles.yaml"), "- id: editor\n  name: Editor\n");
        write(
            &dir.path().join("permissions").join("articles.yaml"),
            "- action: read\n  roles:\n  - editor\n  - null\n",
        );
        let store = InMemoryStore::new();

        let summary = import(&config_for(dir.path(), SyncMode::Export), &store)
            .await
            .expect("import");
        assert_eq!(summary.roles, 1);
        assert_eq!(summary.collections["articles"].created, 2);
        assert_eq!(store.cache_generation(), 1);
    }

    #[tokio::test]
    async fn failed_collection_fails_the_command() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(
            &dir.path().join("permissions").join("articles.yaml"),
            "- action: read\n",
        );
        let store = InMemoryStore::new();
        let err = import(&config_for(dir.path(), SyncMode::None), &store)
            .await
            .expect_err("missing roles");
        assert!(format!("{err:#}").contains("articles"));
    }

    #[tokio::test]
    async fn export_skips_system_collections_unless_asked() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = InMemoryStore::new();
        for collection in ["articles", "system_users"] {
            store
                .create_permission(
                    PermissionRecord::new(RoleRef::Public, collection, Action::Read),
                    WriteOptions::SILENT,
                )
                .await
                .expect("seed");
        }
        let config = config_for(dir.path(), SyncMode::None);

        let summary = export(&config, &store, false).await.expect("export");
        assert_eq!(summary.written, vec!["articles".to_string()]);
        assert!(!dir.path().join("permissions/system_users.yaml").exists());

        let summary = export(&config, &store, true).await.expect("export");
        assert_eq!(summary.written.len(), 2);
        assert!(dir.path().join("permissions/system_users.yaml").exists());
    }

    #[tokio::test]
    #[serial]
    async fn run_imports_on_start_and_exports_on_change() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(
            &dir.path().join("permissions").join("articles.yaml"),
            "- action: read\n  roles:\n  - editor\n",
        );
        let config = config_for(dir.path(), SyncMode::Full);
        let store: Arc<dyn RbacStore> = Arc::new(InMemoryStore::new());
        let metrics_handle =
            observability::init_observability("rbac-sync-run-test").expect("metrics");

        run(&config, store.clone(), metrics_handle, async {})
            .await
            .expect("run");

        let imported = store
            .find_permissions(&PermissionFilter::collection("articles"), None)
            .await
            .expect("find");
        assert_eq!(imported.len(), 1);

        store
            .delete_permissions(&PermissionFilter::collection("articles"), WriteOptions::NOTIFY)
            .await
            .expect("delete");
        assert!(!dir.path().join("permissions/articles.yaml").exists());
    }
}
