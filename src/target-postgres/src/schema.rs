// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Stream schemas as announced by a Singer `SCHEMA` message.
//!
//! The JSON schema is parsed into a tree of [`SchemaNode`]s. Parsing only
//! checks that each property has one of the recognized shapes; whether a
//! nullable union is acceptable is decided when the tree is flattened.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::SchemaError;

/// A JSON schema primitive type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonType {
    Null,
    Object,
    Array,
    Number,
    Integer,
    Boolean,
    String,
    /// A type name we don't recognize. Carried along so that type mapping can
    /// fall back to text rather than fail.
    Other(String),
}

impl JsonType {
    pub fn from_name(name: &str) -> JsonType {
        match name {
            "null" => JsonType::Null,
            "object" => JsonType::Object,
            "array" => JsonType::Array,
            "number" => JsonType::Number,
            "integer" => JsonType::Integer,
            "boolean" => JsonType::Boolean,
            "string" => JsonType::String,
            other => JsonType::Other(other.to_string()),
        }
    }
}

/// A leaf of the schema tree.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PropertyDescriptor {
    pub types: Vec<JsonType>,
    pub format: Option<String>,
}

impl PropertyDescriptor {
    pub fn new(types: Vec<JsonType>, format: Option<&str>) -> Self {
        PropertyDescriptor {
            types,
            format: format.map(str::to_string),
        }
    }

    pub fn includes(&self, ty: &JsonType) -> bool {
        self.types.contains(ty)
    }

    fn is_null_marker(&self) -> bool {
        self.types == [JsonType::Null] && self.format.is_none()
    }
}

/// A branch of an `anyOf` property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnionBranch {
    Null,
    Typed(PropertyDescriptor),
}

/// One property of an object schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaNode {
    /// An empty or falsy definition. Skipped when flattening.
    Empty,
    Property(PropertyDescriptor),
    Object(ObjectSchema),
    /// An `anyOf` property, expected to be one type plus `null`.
    NullableUnion(Vec<UnionBranch>),
}

/// An object schema: named properties in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObjectSchema {
    pub properties: Vec<(String, SchemaNode)>,
}

impl ObjectSchema {
    /// Parses the `properties` of a JSON object schema.
    pub fn from_json(schema: &Value) -> Result<Self, SchemaError> {
        let properties = schema
            .get("properties")
            .and_then(Value::as_object)
            .ok_or_else(|| SchemaError::Malformed("schema has no properties object".into()))?;
        Self::from_properties(properties)
    }

    fn from_properties(properties: &Map<String, Value>) -> Result<Self, SchemaError> {
        let properties = properties
            .iter()
            .map(|(name, value)| Ok((name.clone(), SchemaNode::from_json(name, value)?)))
            .collect::<Result<_, SchemaError>>()?;
        Ok(ObjectSchema { properties })
    }
}

impl SchemaNode {
    fn from_json(name: &str, value: &Value) -> Result<Self, SchemaError> {
        if is_falsy(value) {
            return Ok(SchemaNode::Empty);
        }
        let Some(definition) = value.as_object() else {
            return Err(SchemaError::UnsupportedProperty {
                property: name.to_string(),
            });
        };

        if definition.contains_key("type") {
            let descriptor = parse_descriptor(name, definition)?;
            let nested = definition.get("properties").and_then(Value::as_object);
            match nested {
                Some(properties) if descriptor.includes(&JsonType::Object) => {
                    Ok(SchemaNode::Object(ObjectSchema::from_properties(properties)?))
                }
                _ => Ok(SchemaNode::Property(descriptor)),
            }
        } else if let Some(any_of) = definition.get("anyOf") {
            let branches = any_of.as_array().ok_or_else(|| SchemaError::UnsupportedAnyOf {
                property: name.to_string(),
            })?;
            let branches = branches
                .iter()
                .map(|branch| {
                    let definition =
                        branch
                            .as_object()
                            .ok_or_else(|| SchemaError::UnsupportedAnyOf {
                                property: name.to_string(),
                            })?;
                    let descriptor = parse_descriptor(name, definition)?;
                    Ok(if descriptor.is_null_marker() {
                        UnionBranch::Null
                    } else {
                        UnionBranch::Typed(descriptor)
                    })
                })
                .collect::<Result<_, SchemaError>>()?;
            Ok(SchemaNode::NullableUnion(branches))
        } else {
            Err(SchemaError::UnsupportedProperty {
                property: name.to_string(),
            })
        }
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Object(o) => o.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::String(s) => s.is_empty(),
        Value::Number(_) => false,
    }
}

/// Reads `type` and `format` from a property definition. A missing `type` is
/// tolerated and yields a descriptor that maps to text.
fn parse_descriptor(
    name: &str,
    definition: &Map<String, Value>,
) -> Result<PropertyDescriptor, SchemaError> {
    let types = match definition.get("type") {
        None => vec![],
        Some(Value::String(ty)) => vec![JsonType::from_name(ty)],
        Some(Value::Array(types)) => types
            .iter()
            .map(|ty| {
                ty.as_str().map(JsonType::from_name).ok_or_else(|| {
                    SchemaError::Malformed(format!("non-string type for property {name}"))
                })
            })
            .collect::<Result<_, _>>()?,
        Some(other) => {
            return Err(SchemaError::Malformed(format!(
                "unexpected type {other} for property {name}"
            )));
        }
    };
    let format = definition.get("format").and_then(Value::as_str);
    Ok(PropertyDescriptor::new(types, format))
}

#[derive(Debug, Deserialize)]
struct SchemaMessage {
    stream: String,
    schema: Value,
    #[serde(default)]
    key_properties: Vec<String>,
}

/// A logical data stream and the shape of its records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSchema {
    pub stream: String,
    /// Top-level properties forming the primary key. Empty when the stream has
    /// no natural key.
    pub key_properties: Vec<String>,
    pub schema: ObjectSchema,
}

impl StreamSchema {
    /// Parses a Singer `SCHEMA` message.
    pub fn from_message(message: Value) -> Result<Self, SchemaError> {
        let message: SchemaMessage =
            serde_json::from_value(message).map_err(|e| SchemaError::Malformed(e.to_string()))?;
        Ok(StreamSchema {
            schema: ObjectSchema::from_json(&message.schema)?,
            stream: message.stream,
            key_properties: message.key_properties,
        })
    }

    pub fn from_json(message: &str) -> Result<Self, SchemaError> {
        let message =
            serde_json::from_str(message).map_err(|e| SchemaError::Malformed(e.to_string()))?;
        Self::from_message(message)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_message() {
        let stream = StreamSchema::from_message(json!({
            "type": "SCHEMA",
            "stream": "users",
            "key_properties": ["id"],
            "schema": {
                "properties": {
                    "id": {"type": "integer"},
                    "created_at": {"type": ["null", "string"], "format": "date-time"},
                    "address": {
                        "type": "object",
                        "properties": {"city": {"type": "string"}}
                    },
                    "tags": {"type": "array", "items": {"type": "string"}},
                    "unused": {}
                }
            }
        }))
        .unwrap();

        assert_eq!(stream.stream, "users");
        assert_eq!(stream.key_properties, vec!["id".to_string()]);

        let props: std::collections::BTreeMap<_, _> =
            stream.schema.properties.into_iter().collect();
        assert_eq!(
            props["id"],
            SchemaNode::Property(PropertyDescriptor::new(vec![JsonType::Integer], None))
        );
        assert_eq!(
            props["created_at"],
            SchemaNode::Property(PropertyDescriptor::new(
                vec![JsonType::Null, JsonType::String],
                Some("date-time")
            ))
        );
        assert_eq!(
            props["address"],
            SchemaNode::Object(ObjectSchema {
                properties: vec![(
                    "city".into(),
                    SchemaNode::Property(PropertyDescriptor::new(vec![JsonType::String], None))
                )]
            })
        );
        assert_eq!(
            props["tags"],
            SchemaNode::Property(PropertyDescriptor::new(vec![JsonType::Array], None))
        );
        assert_eq!(props["unused"], SchemaNode::Empty);
    }

    #[test]
    fn test_parse_any_of() {
        let schema = ObjectSchema::from_json(&json!({
            "properties": {
                "amount": {"anyOf": [{"type": "number"}, {"type": "null"}]}
            }
        }))
        .unwrap();
        assert_eq!(
            schema.properties[0].1,
            SchemaNode::NullableUnion(vec![
                UnionBranch::Typed(PropertyDescriptor::new(vec![JsonType::Number], None)),
                UnionBranch::Null,
            ])
        );
    }

    #[test]
    fn test_object_without_properties_is_a_leaf() {
        let schema = ObjectSchema::from_json(&json!({
            "properties": {"payload": {"type": ["null", "object"]}}
        }))
        .unwrap();
        assert_eq!(
            schema.properties[0].1,
            SchemaNode::Property(PropertyDescriptor::new(
                vec![JsonType::Null, JsonType::Object],
                None
            ))
        );
    }

    #[test]
    fn test_unsupported_property() {
        let err = ObjectSchema::from_json(&json!({
            "properties": {"weird": {"oneOf": [{"type": "string"}]}}
        }))
        .unwrap_err();
        assert_eq!(
            err,
            SchemaError::UnsupportedProperty {
                property: "weird".into()
            }
        );
    }

    #[test]
    fn test_missing_properties() {
        let err = StreamSchema::from_json(r#"{"stream": "s", "schema": {"type": "object"}}"#)
            .unwrap_err();
        assert!(matches!(err, SchemaError::Malformed(_)));
    }
}
