use crate::action::Action;
use crate::role::RoleRef;
use crate::store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("permission block {collection}/{action} is missing roles")]
    MissingRoles { collection: String, action: Action },
    #[error("permission {collection}/{action} is declared more than once for role {role}")]
    DuplicateRule {
        collection: String,
        action: Action,
        role: RoleRef,
    },
    #[error("invalid collection name: {0:?}")]
    InvalidCollection(String),
    #[error("io error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed document {}: {source}", .path.display())]
    Codec {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("sync failed for collections: {}", .0.join(", "))]
    CollectionsFailed(Vec<String>),
}

impl SyncError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn codec(path: impl Into<PathBuf>, source: serde_yaml::Error) -> Self {
        SyncError::Codec {
            path: path.into(),
            source,
        }
    }

    /// Configuration errors are never retried; they need a document fix.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SyncError::MissingRoles { .. }
                | SyncError::DuplicateRule { .. }
                | SyncError::InvalidCollection(_)
        )
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_variants() {
        let errors = vec![
            SyncError::MissingRoles {
                collection: "articles".to_string(),
                action: Action::Read,
            },
            SyncError::DuplicateRule {
                collection: "articles".to_string(),
                action: Action::Read,
                role: RoleRef::Public,
            },
            SyncError::InvalidCollection("../etc".to_string()),
            SyncError::io(
                "config/roles.yaml",
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            ),
            SyncError::Store(StoreError::NotFound("permission 4".to_string())),
            SyncError::CollectionsFailed(vec!["a".to_string(), "b".to_string()]),
        ];

        for error in errors {
            let rendered = error.to_string();
            assert!(!rendered.is_empty());
        }
    }

    #[test]
    fn missing_roles_names_block() {
        let err = SyncError::MissingRoles {
            collection: "articles".to_string(),
            action: Action::Update,
        };
        assert_eq!(
            err.to_string(),
            "permission block articles/update is missing roles"
        );
        assert!(err.is_configuration());
    }

    #[test]
    fn store_errors_are_not_configuration() {
        let err = SyncError::Store(StoreError::Conflict("dup".to_string()));
        assert!(!err.is_configuration());
        let err = SyncError::CollectionsFailed(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(err.to_string(), "sync failed for collections: a, b");
    }
}
