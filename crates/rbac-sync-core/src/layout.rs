//! On-disk layout of the RBAC documents.
//!
//! ```text
//! <root>/roles.yaml
//! <root>/permissions/<collection>.yaml
//! ```
//!
//! Collection names become file names, so names that could escape the
//! permissions directory are rejected before any path is built.
use crate::errors::{SyncError, SyncResult};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const PERMISSIONS_DIR: &str = "permissions";
pub const ROLES_FILE: &str = "roles.yaml";
pub const DOCUMENT_EXTENSION: &str = "yaml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPaths {
    root: PathBuf,
}

impl SyncPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn permissions_dir(&self) -> PathBuf {
        self.root.join(PERMISSIONS_DIR)
    }

    pub fn roles_file(&self) -> PathBuf {
        self.root.join(ROLES_FILE)
    }

    pub fn permission_file(&self, collection: &str) -> SyncResult<PathBuf> {
        validate_collection(collection)?;
        Ok(self
            .permissions_dir()
            .join(format!("{collection}.{DOCUMENT_EXTENSION}")))
    }

    /// Collections that currently have a permission document, sorted by name.
    ///
    /// A missing permissions directory means no collection is configured.
    pub async fn configured_collections(&self) -> SyncResult<Vec<String>> {
        let dir = self.permissions_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(SyncError::io(dir, err)),
        };

        let mut collections = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| SyncError::io(&dir, err))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(DOCUMENT_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if validate_collection(stem).is_ok() {
                collections.push(stem.to_string());
            }
        }
        collections.sort();
        Ok(collections)
    }
}

pub fn validate_collection(name: &str) -> SyncResult<()> {
    let invalid = name.is_empty()
        || name == "."
        || name.contains("..")
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(SyncError::InvalidCollection(name.to_string()));
    }
    Ok(())
}

/// Document contents, or `None` when the file does not exist.
pub(crate) async fn read_document(path: &Path) -> SyncResult<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(SyncError::io(path, err)),
    }
}

pub(crate) async fn write_document(path: &Path, text: &str) -> SyncResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| SyncError::io(parent, err))?;
    }
    tokio::fs::write(path, text)
        .await
        .map_err(|err| SyncError::io(path, err))
}

/// Removes a document; returns whether one existed.
pub(crate) async fn remove_document(path: &Path) -> SyncResult<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(SyncError::io(path, err)),
    }
}
