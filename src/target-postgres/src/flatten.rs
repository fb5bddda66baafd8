// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Flattening of nested schemas and records into flat column sets.
//!
//! Nested object properties never become columns themselves; each of their
//! leaves becomes a column named by [`inflect`]ing its full path. Records are
//! walked with the same rule, so a record flattens onto the columns of its
//! schema.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use serde_json::{Map, Value};

use crate::error::SchemaError;
use crate::inflect::{Identifier, inflect};
use crate::schema::{JsonType, ObjectSchema, PropertyDescriptor, SchemaNode, UnionBranch};

/// The flat columns of a stream, sorted by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlattenedSchema {
    columns: BTreeMap<Identifier, PropertyDescriptor>,
    warnings: Vec<String>,
}

impl FlattenedSchema {
    /// Iterates over the columns in canonical order.
    pub fn columns(&self) -> impl Iterator<Item = (&Identifier, &PropertyDescriptor)> {
        self.columns.iter()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &Identifier> {
        self.columns.keys()
    }

    pub fn get(&self, name: &Identifier) -> Option<&PropertyDescriptor> {
        self.columns.get(name)
    }

    pub fn contains(&self, name: &Identifier) -> bool {
        self.columns.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Properties that were skipped while flattening, and why.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Lays a flattened record out in canonical column order. Columns the
    /// record doesn't have are `None`.
    pub fn project<'a>(&self, record: &'a FlatRecord) -> Vec<Option<&'a Value>> {
        self.columns.keys().map(|name| record.get(name)).collect()
    }
}

/// Flattens a schema tree into its leaf columns.
///
/// Fails if a nullable union isn't exactly one type plus `null`, or if two
/// paths inflect to the same column name.
pub fn flatten_schema(schema: &ObjectSchema) -> Result<FlattenedSchema, SchemaError> {
    let mut flattened = FlattenedSchema {
        columns: BTreeMap::new(),
        warnings: vec![],
    };
    let mut path = vec![];
    flatten_object(schema, &mut path, &mut flattened)?;
    Ok(flattened)
}

fn flatten_object<'a>(
    schema: &'a ObjectSchema,
    path: &mut Vec<&'a str>,
    flattened: &mut FlattenedSchema,
) -> Result<(), SchemaError> {
    for (name, node) in &schema.properties {
        path.push(name);
        let column = inflect(path.as_slice());
        match node {
            SchemaNode::Empty => {
                flattened
                    .warnings
                    .push(format!("Empty definition for {column}."));
            }
            SchemaNode::Object(object) => flatten_object(object, path, flattened)?,
            SchemaNode::Property(descriptor) => {
                insert_column(flattened, column, descriptor.clone())?;
            }
            SchemaNode::NullableUnion(branches) => {
                let descriptor = nullable_branch(name, branches)?;
                insert_column(flattened, column, descriptor)?;
            }
        }
        path.pop();
    }
    Ok(())
}

fn insert_column(
    flattened: &mut FlattenedSchema,
    column: Identifier,
    descriptor: PropertyDescriptor,
) -> Result<(), SchemaError> {
    match flattened.columns.entry(column) {
        Entry::Occupied(entry) => Err(SchemaError::DuplicateColumn {
            column: entry.key().to_string(),
        }),
        Entry::Vacant(entry) => {
            entry.insert(descriptor);
            Ok(())
        }
    }
}

/// Picks the single typed branch of a nullable union and marks it nullable.
fn nullable_branch(
    property: &str,
    branches: &[UnionBranch],
) -> Result<PropertyDescriptor, SchemaError> {
    let unsupported = || SchemaError::UnsupportedAnyOf {
        property: property.to_string(),
    };
    if branches.len() > 2 || !branches.contains(&UnionBranch::Null) {
        return Err(unsupported());
    }
    let mut typed = branches.iter().filter_map(|branch| match branch {
        UnionBranch::Typed(descriptor) => Some(descriptor),
        UnionBranch::Null => None,
    });
    let mut descriptor = typed.next().ok_or_else(unsupported)?.clone();
    if !descriptor.includes(&JsonType::Null) {
        descriptor.types.insert(0, JsonType::Null);
    }
    Ok(descriptor)
}

/// A record flattened to column name and value.
pub type FlatRecord = BTreeMap<Identifier, Value>;

/// Flattens a record onto the columns of its schema.
///
/// Nested objects are walked the way [`flatten_schema`] walks the schema. An
/// object or array whose path is itself a column is stored as its JSON text.
/// No type checking happens here.
pub fn flatten_record(record: &Map<String, Value>, columns: &FlattenedSchema) -> FlatRecord {
    let mut flat = FlatRecord::new();
    let mut path = vec![];
    flatten_record_into(record, columns, &mut path, &mut flat);
    flat
}

fn flatten_record_into<'a>(
    record: &'a Map<String, Value>,
    columns: &FlattenedSchema,
    path: &mut Vec<&'a str>,
    flat: &mut FlatRecord,
) {
    for (key, value) in record {
        path.push(key);
        let column = inflect(path.as_slice());
        match value {
            Value::Object(nested) if !columns.contains(&column) => {
                flatten_record_into(nested, columns, path, flat)
            }
            Value::Object(_) | Value::Array(_) => {
                flat.insert(column, Value::String(value.to_string()));
            }
            _ => {
                flat.insert(column, value.clone());
            }
        }
        path.pop();
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn parse(schema: Value) -> ObjectSchema {
        ObjectSchema::from_json(&schema).unwrap()
    }

    fn names(flattened: &FlattenedSchema) -> Vec<&str> {
        flattened.column_names().map(|c| c.as_str()).collect()
    }

    #[test]
    fn test_flatten_nested_schema() {
        let schema = parse(json!({
            "properties": {
                "id": {"type": "integer"},
                "shippingAddress": {
                    "type": ["null", "object"],
                    "properties": {
                        "zipCode": {"type": "string"},
                        "geo": {
                            "type": "object",
                            "properties": {"lat": {"type": "number"}}
                        }
                    }
                },
                "tags": {"type": "array"}
            }
        }));
        let flattened = flatten_schema(&schema).unwrap();
        assert_eq!(
            names(&flattened),
            vec![
                "id",
                "shipping_address__geo__lat",
                "shipping_address__zip_code",
                "tags"
            ]
        );
        assert!(flattened.warnings().is_empty());
    }

    #[test]
    fn test_flatten_any_of() {
        let schema = parse(json!({
            "properties": {
                "amount": {"anyOf": [{"type": "null"}, {"type": "number"}]}
            }
        }));
        let flattened = flatten_schema(&schema).unwrap();
        let (_, descriptor) = flattened.columns().next().unwrap();
        assert_eq!(descriptor.types, vec![JsonType::Null, JsonType::Number]);
    }

    #[test]
    fn test_flatten_rejects_bad_any_of() {
        let two_types = parse(json!({
            "properties": {
                "v": {"anyOf": [{"type": "null"}, {"type": "number"}, {"type": "string"}]}
            }
        }));
        let no_null = parse(json!({
            "properties": {
                "v": {"anyOf": [{"type": "number"}, {"type": "string"}]}
            }
        }));
        let only_null = parse(json!({
            "properties": {"v": {"anyOf": [{"type": "null"}]}}
        }));
        for schema in [two_types, no_null, only_null] {
            assert_eq!(
                flatten_schema(&schema),
                Err(SchemaError::UnsupportedAnyOf {
                    property: "v".into()
                })
            );
        }
    }

    #[test]
    fn test_flatten_detects_duplicates() {
        let schema = parse(json!({
            "properties": {
                "userName": {"type": "string"},
                "user_name": {"type": "string"}
            }
        }));
        assert_eq!(
            flatten_schema(&schema),
            Err(SchemaError::DuplicateColumn {
                column: "user_name".into()
            })
        );

        let schema = parse(json!({
            "properties": {
                "a": {"type": "object", "properties": {"b": {"type": "string"}}},
                "a__b": {"type": "string"}
            }
        }));
        assert_eq!(
            flatten_schema(&schema),
            Err(SchemaError::DuplicateColumn {
                column: "a__b".into()
            })
        );
    }

    #[test]
    fn test_flatten_skips_empty_definitions() {
        let schema = parse(json!({
            "properties": {
                "id": {"type": "integer"},
                "extra": {}
            }
        }));
        let flattened = flatten_schema(&schema).unwrap();
        assert_eq!(names(&flattened), vec!["id"]);
        assert_eq!(flattened.warnings(), ["Empty definition for extra."]);
    }

    #[test]
    fn test_flatten_record() {
        let record = json!({
            "id": 1,
            "shippingAddress": {"zipCode": "12345", "geo": {"lat": 1.5}},
            "tags": ["a", "b"],
            "note": null
        });
        let schema = parse(json!({
            "properties": {
                "id": {"type": "integer"},
                "shippingAddress": {
                    "type": "object",
                    "properties": {
                        "zipCode": {"type": "string"},
                        "geo": {"type": "object", "properties": {"lat": {"type": "number"}}}
                    }
                },
                "tags": {"type": "array"},
                "note": {"type": ["null", "string"]}
            }
        }));
        let columns = flatten_schema(&schema).unwrap();
        let flat = flatten_record(record.as_object().unwrap(), &columns);
        let expected: FlatRecord = [
            ("id", json!(1)),
            ("note", Value::Null),
            ("shipping_address__geo__lat", json!(1.5)),
            ("shipping_address__zip_code", json!("12345")),
            ("tags", json!(r#"["a","b"]"#)),
        ]
        .into_iter()
        .map(|(k, v)| (inflect(&[k]), v))
        .collect();
        assert_eq!(flat, expected);
    }

    #[test]
    fn test_project_leaves_absent_columns_empty() {
        let schema = parse(json!({
            "properties": {
                "a": {"type": "integer"},
                "b": {"type": "string"}
            }
        }));
        let flattened = flatten_schema(&schema).unwrap();
        let flat = flatten_record(json!({"b": "x"}).as_object().unwrap(), &flattened);
        assert_eq!(flattened.project(&flat), vec![None, Some(&json!("x"))]);
    }

    #[test]
    fn test_flatten_record_keeps_opaque_objects_whole() {
        let schema = parse(json!({
            "properties": {
                "id": {"type": "integer"},
                "payload": {"type": ["null", "object"]},
                "meta": {
                    "type": "object",
                    "properties": {"raw": {"type": "object"}}
                }
            }
        }));
        let columns = flatten_schema(&schema).unwrap();
        assert_eq!(names(&columns), vec!["id", "meta__raw", "payload"]);

        let record = json!({
            "id": 1,
            "payload": {"k": 1, "nested": {"deep": true}},
            "meta": {"raw": {"x": [1, 2]}}
        });
        let flat = flatten_record(record.as_object().unwrap(), &columns);
        assert_eq!(
            flattened_values(&columns, &flat),
            vec![
                json!(1),
                json!(r#"{"x":[1,2]}"#),
                json!(r#"{"k":1,"nested":{"deep":true}}"#),
            ]
        );
    }

    fn flattened_values(columns: &FlattenedSchema, flat: &FlatRecord) -> Vec<Value> {
        columns
            .project(flat)
            .into_iter()
            .map(|value| value.cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// A nested schema together with a record that populates some of its
    /// leaves.
    #[derive(Debug, Clone)]
    enum Tree {
        Leaf(Option<i64>),
        Node(BTreeMap<String, Tree>),
    }

    fn tree() -> impl Strategy<Value = BTreeMap<String, Tree>> {
        let leaf = prop::option::of(any::<i64>()).prop_map(Tree::Leaf);
        let tree = leaf.prop_recursive(3, 24, 4, |inner| {
            prop::collection::btree_map("[a-z]{1,6}", inner, 1..4).prop_map(Tree::Node)
        });
        prop::collection::btree_map("[a-z]{1,6}", tree, 1..5)
    }

    fn to_schema(tree: &BTreeMap<String, Tree>) -> Value {
        let properties: Map<String, Value> = tree
            .iter()
            .map(|(name, node)| {
                let definition = match node {
                    Tree::Leaf(_) => json!({"type": ["null", "integer"]}),
                    Tree::Node(children) => {
                        let mut schema = to_schema(children);
                        schema["type"] = json!("object");
                        schema
                    }
                };
                (name.clone(), definition)
            })
            .collect();
        json!({ "properties": properties })
    }

    fn to_record(tree: &BTreeMap<String, Tree>) -> Map<String, Value> {
        tree.iter()
            .filter_map(|(name, node)| match node {
                Tree::Leaf(None) => None,
                Tree::Leaf(Some(v)) => Some((name.clone(), json!(v))),
                Tree::Node(children) => Some((name.clone(), Value::Object(to_record(children)))),
            })
            .collect()
    }

    fn leaves(
        tree: &BTreeMap<String, Tree>,
        path: &mut Vec<String>,
        out: &mut Vec<(Identifier, Option<i64>)>,
    ) {
        for (name, node) in tree {
            path.push(name.clone());
            match node {
                Tree::Leaf(value) => out.push((inflect(path.as_slice()), *value)),
                Tree::Node(children) => leaves(children, path, out),
            }
            path.pop();
        }
    }

    proptest! {
        #[test]
        fn flattening_is_complete(tree in tree()) {
            let schema = ObjectSchema::from_json(&to_schema(&tree)).unwrap();
            let flattened = flatten_schema(&schema).unwrap();

            let mut expected = vec![];
            leaves(&tree, &mut vec![], &mut expected);
            expected.sort_by(|a, b| a.0.cmp(&b.0));

            let columns: Vec<_> = flattened.column_names().cloned().collect();
            let expected_columns: Vec<_> = expected.iter().map(|(c, _)| c.clone()).collect();
            prop_assert_eq!(columns, expected_columns);
        }

        #[test]
        fn record_round_trips(tree in tree()) {
            let schema = ObjectSchema::from_json(&to_schema(&tree)).unwrap();
            let flattened = flatten_schema(&schema).unwrap();
            let flat = flatten_record(&to_record(&tree), &flattened);

            let mut expected = vec![];
            leaves(&tree, &mut vec![], &mut expected);
            expected.sort_by(|a, b| a.0.cmp(&b.0));

            let projected = flattened.project(&flat);
            let expected: Vec<_> = expected.into_iter().map(|(_, v)| v.map(|v| json!(v))).collect();
            let projected: Vec<_> = projected.into_iter().map(|v| v.cloned()).collect();
            prop_assert_eq!(projected, expected);
        }
    }
}
