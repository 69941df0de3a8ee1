//! Flat permission records as held by the store.
//!
//! # Purpose
//! One record is one rule for one (role, collection, action). Rule payloads
//! (`permissions`, `validation`, `presets`) are opaque JSON values: they are
//! stored and compared, never interpreted.
//!
//! # Key invariants
//! - At most one record exists per (role, collection, action).
//! - `fields: None` means "all fields"; `Some(vec![])` is kept as written.
use crate::action::Action;
use crate::role::RoleRef;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Store-assigned permission key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionId(pub i64);

impl std::fmt::Display for PermissionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionRecord {
    pub role: RoleRef,
    pub collection: String,
    pub action: Action,
    pub permissions: Option<Value>,
    pub validation: Option<Value>,
    pub presets: Option<Value>,
    pub fields: Option<Vec<String>>,
}

impl PermissionRecord {
    /// Unrestricted rule: no filters, no presets, all fields.
    pub fn new(role: RoleRef, collection: impl Into<String>, action: Action) -> Self {
        Self {
            role,
            collection: collection.into(),
            action,
            permissions: None,
            validation: None,
            presets: None,
            fields: None,
        }
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_permissions(mut self, filter: Value) -> Self {
        self.permissions = Some(filter);
        self
    }

    pub fn with_validation(mut self, filter: Value) -> Self {
        self.validation = Some(filter);
        self
    }

    pub fn with_presets(mut self, presets: Value) -> Self {
        self.presets = Some(presets);
        self
    }

    /// True when this record occupies the same uniqueness slot as `other`.
    pub fn same_slot(&self, other: &PermissionRecord) -> bool {
        self.role == other.role
            && self.collection == other.collection
            && self.action == other.action
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPermission {
    pub id: PermissionId,
    #[serde(flatten)]
    pub record: PermissionRecord,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_sets_payloads() {
        let record = PermissionRecord::new(RoleRef::named("editor"), "articles", Action::Update)
            .with_fields(["title", "body"])
            .with_permissions(json!({"author": {"_eq": "$CURRENT_USER"}}))
            .with_validation(json!({"title": {"_nnull": true}}))
            .with_presets(json!({"status": "draft"}));
        assert_eq!(
            record.fields,
            Some(vec!["title".to_string(), "body".to_string()])
        );
        assert!(record.permissions.is_some());
        assert!(record.validation.is_some());
        assert_eq!(record.presets, Some(json!({"status": "draft"})));
    }

    #[test]
    fn slots_distinguish_public_and_named() {
        let public = PermissionRecord::new(RoleRef::Public, "articles", Action::Read);
        let named = PermissionRecord::new(RoleRef::named("null"), "articles", Action::Read);
        let other = PermissionRecord::new(RoleRef::Public, "articles", Action::Read)
            .with_fields(["title"]);
        assert!(!public.same_slot(&named));
        assert!(public.same_slot(&other));
    }

    #[test]
    fn stored_permission_flattens_record() {
        let stored = StoredPermission {
            id: PermissionId(7),
            record: PermissionRecord::new(RoleRef::Public, "articles", Action::Read),
        };
        let value = serde_json::to_value(&stored).expect("json");
        assert_eq!(value["id"], json!(7));
        assert_eq!(value["role"], Value::Null);
        assert_eq!(value["action"], json!("read"));
    }
}
