//! Canonical grouping of stored permission records into document blocks.
//!
//! # Purpose
//! Turns the flat per-role records of one collection into the smallest
//! deterministic list of [`PermissionBlock`]s: one block per distinct rule,
//! carrying every role that shares it.
//!
//! # Key invariants
//! - Two records share a block exactly when action, permissions, validation,
//!   presets and the canonical field list are equal.
//! - Empty payloads (`null`, `{}`, `[]`, `""`) and empty field lists are
//!   dropped before comparing, so they group with records that omit them.
//! - Blocks are ordered by action, then by first appearance in the input.
//!   Roles inside a block keep their first-appearance order, without repeats.
//!
//! # Performance
//! Grouping compares each record against the blocks found so far. Payloads
//! are arbitrary JSON values without a hash, and a collection carries a
//! handful of distinct rules, so the linear scan stays cheap.
use crate::codec::{FieldList, PermissionBlock};
use crate::permission::PermissionRecord;
use serde_json::Value;

pub fn group_permissions<'a, I>(records: I) -> Vec<PermissionBlock>
where
    I: IntoIterator<Item = &'a PermissionRecord>,
{
    let mut sorted: Vec<&PermissionRecord> = records.into_iter().collect();
    // Stable sort: ties keep the store's order so role lists stay deterministic.
    sorted.sort_by_key(|record| record.action);

    let mut blocks: Vec<PermissionBlock> = Vec::new();
    for record in sorted {
        let candidate = rule_of(record);
        match blocks.iter_mut().find(|block| block.same_rule(&candidate)) {
            Some(block) => {
                if !block.roles.contains(&record.role) {
                    block.roles.push(record.role.clone());
                }
            }
            None => blocks.push(PermissionBlock {
                roles: vec![record.role.clone()],
                ..candidate
            }),
        }
    }
    blocks
}

fn rule_of(record: &PermissionRecord) -> PermissionBlock {
    PermissionBlock {
        permissions: non_empty(record.permissions.as_ref()),
        validation: non_empty(record.validation.as_ref()),
        presets: non_empty(record.presets.as_ref()),
        fields: record
            .fields
            .as_deref()
            .and_then(FieldList::canonical),
        ..PermissionBlock::new(record.action)
    }
}

fn non_empty(value: Option<&Value>) -> Option<Value> {
    value.filter(|value| !is_empty_value(value)).cloned()
}

pub(crate) fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(text) => text.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::role::RoleRef;
    use serde_json::json;

    fn record(role: RoleRef, action: Action) -> PermissionRecord {
        PermissionRecord::new(role, "articles", action)
    }

    #[test]
    fn groups_roles_sharing_a_rule() {
        let records = vec![
            record(RoleRef::named("A"), Action::Read).with_fields(["a", "b"]),
            record(RoleRef::named("B"), Action::Read).with_fields(["b", "a"]),
            record(RoleRef::named("C"), Action::Read).with_fields(["c"]),
        ];
        let blocks = group_permissions(&records);
        assert_eq!(blocks.len(), 2);

        assert_eq!(blocks[0].action, Action::Read);
        assert_eq!(
            blocks[0].fields,
            Some(FieldList::Many(vec!["a".to_string(), "b".to_string()]))
        );
        assert_eq!(
            blocks[0].roles,
            vec![RoleRef::named("A"), RoleRef::named("B")]
        );

        assert_eq!(blocks[1].fields, Some(FieldList::One("c".to_string())));
        assert_eq!(blocks[1].roles, vec![RoleRef::named("C")]);
    }

    #[test]
    fn grouping_does_not_depend_on_input_order() {
        let filter = json!({"status": {"_eq": "published"}});
        let records = vec![
            record(RoleRef::named("editor"), Action::Update).with_permissions(filter.clone()),
            record(RoleRef::Public, Action::Read).with_permissions(filter.clone()),
            record(RoleRef::named("editor"), Action::Read).with_permissions(filter.clone()),
            record(RoleRef::named("admin"), Action::Update).with_permissions(filter.clone()),
        ];
        let mut reversed = records.clone();
        reversed.reverse();

        for input in [records, reversed] {
            let blocks = group_permissions(&input);
            assert_eq!(blocks.len(), 2);
            assert_eq!(blocks[0].action, Action::Read);
            assert_eq!(blocks[1].action, Action::Update);
            let mut read_roles = blocks[0].roles.clone();
            read_roles.sort();
            assert_eq!(read_roles, vec![RoleRef::Public, RoleRef::named("editor")]);
            let mut update_roles = blocks[1].roles.clone();
            update_roles.sort();
            assert_eq!(
                update_roles,
                vec![RoleRef::named("admin"), RoleRef::named("editor")]
            );
        }
    }

    #[test]
    fn blocks_sorted_by_action_then_first_appearance() {
        let records = vec![
            record(RoleRef::named("a"), Action::Update),
            record(RoleRef::named("a"), Action::Create),
            record(RoleRef::named("b"), Action::Read).with_fields(["x", "y"]),
            record(RoleRef::named("a"), Action::Read),
        ];
        let actions: Vec<_> = group_permissions(&records)
            .into_iter()
            .map(|block| (block.action, block.roles))
            .collect();
        assert_eq!(
            actions,
            vec![
                (Action::Create, vec![RoleRef::named("a")]),
                (Action::Read, vec![RoleRef::named("b")]),
                (Action::Read, vec![RoleRef::named("a")]),
                (Action::Update, vec![RoleRef::named("a")]),
            ]
        );
    }

    #[test]
    fn public_role_is_not_confused_with_literal_null() {
        let records = vec![
            record(RoleRef::Public, Action::Read),
            record(RoleRef::named("null"), Action::Read),
            record(RoleRef::Public, Action::Read),
        ];
        let blocks = group_permissions(&records);
        assert_eq!(blocks.len(), 1);
        assert_eq!(
            blocks[0].roles,
            vec![RoleRef::Public, RoleRef::named("null")]
        );
    }

    #[test]
    fn empty_payloads_are_dropped() {
        let records = vec![
            record(RoleRef::named("a"), Action::Read)
                .with_permissions(json!({}))
                .with_validation(Value::Null)
                .with_presets(json!([])),
            PermissionRecord {
                fields: Some(Vec::new()),
                ..record(RoleRef::named("b"), Action::Read)
            },
            record(RoleRef::named("c"), Action::Read),
        ];
        let blocks = group_permissions(&records);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0], PermissionBlock {
            roles: vec![
                RoleRef::named("a"),
                RoleRef::named("b"),
                RoleRef::named("c")
            ],
            ..PermissionBlock::new(Action::Read)
        });
    }

    #[test]
    fn distinct_payloads_stay_apart() {
        let records = vec![
            record(RoleRef::named("a"), Action::Create).with_presets(json!({"status": "draft"})),
            record(RoleRef::named("b"), Action::Create).with_presets(json!({"status": "review"})),
            record(RoleRef::named("c"), Action::Create).with_validation(json!({"status": "draft"})),
        ];
        assert_eq!(group_permissions(&records).len(), 3);
    }

    #[test]
    fn no_records_no_blocks() {
        assert!(group_permissions(&Vec::new()).is_empty());
    }

    #[test]
    fn scalar_payloads_count_as_present() {
        assert!(!is_empty_value(&json!(false)));
        assert!(!is_empty_value(&json!(0)));
        assert!(is_empty_value(&json!("")));
    }
}
