//! Role identities and role records.
//!
//! # Purpose
//! Defines the role reference carried by every permission rule and the role
//! record owned by the roles document.
//!
//! # Key invariants
//! - [`RoleRef::Public`] is the "no role" identity for unauthenticated access.
//!   It is a value of its own: it equals itself and never equals a named role,
//!   including a role literally named `"null"`.
//! - In documents and in the store the public identity is written as `null`.
//!
//! # Common pitfalls
//! - Filtering by a list of roles that contains [`RoleRef::Public`] needs an
//!   explicit `IS NULL` branch; set membership alone never matches it.
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const DEFAULT_ROLE_ICON: &str = "supervised_user_circle";

/// Role a permission rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RoleRef {
    /// Unauthenticated access (stored as `null`).
    Public,
    /// A role identified by its stable id.
    Named(String),
}

impl RoleRef {
    pub fn named(id: impl Into<String>) -> Self {
        RoleRef::Named(id.into())
    }

    pub fn is_public(&self) -> bool {
        matches!(self, RoleRef::Public)
    }

    /// The role id, or `None` for the public identity.
    pub fn as_id(&self) -> Option<&str> {
        match self {
            RoleRef::Public => None,
            RoleRef::Named(id) => Some(id),
        }
    }
}

impl From<Option<String>> for RoleRef {
    fn from(value: Option<String>) -> Self {
        match value {
            Some(id) => RoleRef::Named(id),
            None => RoleRef::Public,
        }
    }
}

impl From<RoleRef> for Option<String> {
    fn from(value: RoleRef) -> Self {
        match value {
            RoleRef::Public => None,
            RoleRef::Named(id) => Some(id),
        }
    }
}

impl std::fmt::Display for RoleRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoleRef::Public => f.write_str("<public>"),
            RoleRef::Named(id) => f.write_str(id),
        }
    }
}

impl Serialize for RoleRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_id().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RoleRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<String>::deserialize(deserializer).map(RoleRef::from)
    }
}

/// Role record as held by the store.
///
/// `id` is author-assigned and stable across environments, which is what lets
/// the roles document upsert by key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub name: String,
    pub icon: String,
    pub description: String,
    pub enforce_two_factor: bool,
    pub external_id: Option<String>,
    pub ip_allowlist: Vec<String>,
    pub app_access: bool,
    pub admin_access: bool,
}

impl Role {
    /// Role with every optional attribute at its default.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            icon: DEFAULT_ROLE_ICON.to_string(),
            description: String::new(),
            enforce_two_factor: false,
            external_id: None,
            ip_allowlist: Vec::new(),
            app_access: false,
            admin_access: false,
        }
    }
}
