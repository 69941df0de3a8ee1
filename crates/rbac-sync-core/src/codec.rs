//! Text codec for the roles document and the per-collection permission documents.
//!
//! # Purpose
//! Converts between the grouped text model ([`PermissionBlock`], [`RoleEntry`])
//! and YAML. The codec owns no state and performs no I/O.
//!
//! # Key invariants
//! - Permission block keys are written in alphabetical order; nested payload
//!   maps are written with sorted keys as well.
//! - Role entries are written `id`, `name`, `icon` first, then the optional
//!   keys in declaration order, and only when they hold a non-default value.
//! - Every top-level list entry after the first is preceded by a blank line.
//!   Readers ignore it; it only keeps version-control diffs readable.
//!
//! # Common pitfalls
//! - `fields` with a single element is written as a bare string. Use
//!   [`FieldList::into_vec`] instead of matching on the shape.
use crate::action::Action;
use crate::role::{DEFAULT_ROLE_ICON, Role, RoleRef};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Field restriction as written in a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldList {
    One(String),
    Many(Vec<String>),
}

impl FieldList {
    /// Canonical text form of a stored field list.
    ///
    /// Returns `None` for an empty list. Elements are sorted so the output does
    /// not depend on the order the store returned them in; a single element
    /// collapses to [`FieldList::One`].
    pub fn canonical(fields: &[String]) -> Option<Self> {
        match fields {
            [] => None,
            [single] => Some(FieldList::One(single.clone())),
            _ => {
                let mut sorted = fields.to_vec();
                sorted.sort();
                Some(FieldList::Many(sorted))
            }
        }
    }

    pub fn into_vec(self) -> Vec<String> {
        match self {
            FieldList::One(field) => vec![field],
            FieldList::Many(fields) => fields,
        }
    }
}

/// One grouped rule in a permission document.
///
/// Field order below is the alphabetical key order of the written document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionBlock {
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<FieldList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presets: Option<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub roles: Vec<RoleRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<Value>,
}

impl PermissionBlock {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            fields: None,
            permissions: None,
            presets: None,
            roles: Vec::new(),
            validation: None,
        }
    }

    /// Compares the rule itself, ignoring which roles carry it.
    pub fn same_rule(&self, other: &PermissionBlock) -> bool {
        self.action == other.action
            && self.permissions == other.permissions
            && self.validation == other.validation
            && self.presets == other.presets
            && self.fields == other.fields
    }
}

/// One role in the roles document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleEntry {
    pub id: String,
    pub name: String,
    #[serde(default = "default_icon", deserialize_with = "null_as_icon")]
    pub icon: String,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "String::is_empty"
    )]
    pub description: String,
    #[serde(
        default,
        alias = "enforce_2fa",
        deserialize_with = "null_as_default",
        skip_serializing_if = "is_false"
    )]
    pub enforce_two_factor: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(
        default,
        alias = "ip_whitelist",
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub ip_allowlist: Vec<String>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "is_false"
    )]
    pub app_access: bool,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "is_false"
    )]
    pub admin_access: bool,
}

impl RoleEntry {
    /// Store record with documented defaults applied.
    pub fn into_role(self) -> Role {
        Role {
            id: self.id,
            name: self.name,
            icon: self.icon,
            description: self.description,
            enforce_two_factor: self.enforce_two_factor,
            external_id: self.external_id,
            ip_allowlist: self.ip_allowlist,
            app_access: self.app_access,
            admin_access: self.admin_access,
        }
    }
}

impl From<&Role> for RoleEntry {
    fn from(role: &Role) -> Self {
        Self {
            id: role.id.clone(),
            name: role.name.clone(),
            icon: role.icon.clone(),
            description: role.description.clone(),
            enforce_two_factor: role.enforce_two_factor,
            // An empty external id carries no information; drop it like other falsy values.
            external_id: role.external_id.clone().filter(|value| !value.is_empty()),
            ip_allowlist: role.ip_allowlist.clone(),
            app_access: role.app_access,
            admin_access: role.admin_access,
        }
    }
}

fn default_icon() -> String {
    DEFAULT_ROLE_ICON.to_string()
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

fn null_as_icon<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(|icon| icon.unwrap_or_else(default_icon))
}

pub fn encode_permissions(blocks: &[PermissionBlock]) -> Result<String, serde_yaml::Error> {
    serde_yaml::to_string(blocks).map(|yaml| separate_entries(&yaml))
}

pub fn decode_permissions(text: &str) -> Result<Vec<PermissionBlock>, serde_yaml::Error> {
    decode_list(text)
}

pub fn encode_roles(roles: &[RoleEntry]) -> Result<String, serde_yaml::Error> {
    serde_yaml::to_string(roles).map(|yaml| separate_entries(&yaml))
}

pub fn decode_roles(text: &str) -> Result<Vec<RoleEntry>, serde_yaml::Error> {
    decode_list(text)
}

fn decode_list<T>(text: &str) -> Result<Vec<T>, serde_yaml::Error>
where
    T: for<'de> Deserialize<'de>,
{
    // An empty file and an explicit `null` document both declare nothing.
    let parsed: Option<Vec<T>> = if text.trim().is_empty() {
        None
    } else {
        serde_yaml::from_str(text)?
    };
    Ok(parsed.unwrap_or_default())
}

fn separate_entries(yaml: &str) -> String {
    let mut out = String::with_capacity(yaml.len() + yaml.len() / 8);
    for (index, line) in yaml.lines().enumerate() {
        if index > 0 && (line.starts_with("- ") || line == "-") {
            out.push('\n');
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}
