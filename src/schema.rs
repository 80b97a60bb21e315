//! JSON Schema model
//!
//! A raw schema document is first rewritten with every local `$ref` replaced
//! by a copy of its target, then classified into the closed [`Schema`] sum
//! type the grammar builder walks. Both steps are pure: the input document
//! is never mutated, and a sub-schema referenced from several places becomes
//! independent copies.

use crate::error::SchemaError;
use crate::grammar::PrimitiveKind;
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::debug;

/// Keywords that carry documentation only
const ANNOTATION_KEYWORDS: &[&str] = &[
    "title",
    "description",
    "default",
    "examples",
    "$schema",
    "$id",
    "$comment",
    "definitions",
    "$defs",
];

/// Keywords holding reference targets rather than schemas in place
const DEFINITION_KEYWORDS: &[&str] = &["definitions", "$defs"];

// =============================================================================
// SCHEMA TYPES
// =============================================================================

/// Object with named properties and optional extra keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSchema {
    /// Properties in declaration order
    pub properties: Vec<(String, Schema)>,
    /// Names that must be present
    pub required: HashSet<String>,
    /// Schema of keys beyond `properties`; `None` means closed
    pub additional: Option<Box<Schema>>,
}

impl ObjectSchema {
    /// Whether the property is required
    pub fn is_required(&self, name: &str) -> bool {
        self.required.contains(name)
    }
}

/// Supported schema shapes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schema {
    /// JSON object
    Object(ObjectSchema),
    /// Homogeneous array
    Array {
        /// Element schema
        item: Box<Schema>,
        /// `minItems`
        min_items: usize,
        /// `maxItems`
        max_items: Option<usize>,
    },
    /// Fixed-length array with one schema per position
    Tuple(Vec<Schema>),
    /// Any one of the alternatives
    Union(Vec<Schema>),
    /// Exactly this value
    Const(Value),
    /// Canonical primitive production
    Primitive(PrimitiveKind),
    /// String matching an anchored regex
    Pattern(String),
}

impl Schema {
    /// Parse, resolve and classify a schema given as JSON text
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidDocument`] when `text` is not JSON, and
    /// any error of [`Schema::from_value`]
    pub fn from_json(text: &str) -> Result<Self, SchemaError> {
        let document: Value = serde_json::from_str(text).map_err(|e| SchemaError::InvalidDocument {
            reason: e.to_string(),
        })?;
        Self::from_value(&document)
    }

    /// Resolve and classify a schema document
    ///
    /// # Errors
    ///
    /// Returns error if a `$ref` can not be resolved or a sub-schema falls
    /// outside the supported subset
    pub fn from_value(document: &Value) -> Result<Self, SchemaError> {
        let resolved = resolve_refs(document)?;
        classify(&resolved)
    }

    /// Short variant name
    pub fn kind(&self) -> &'static str {
        match self {
            Schema::Object(_) => "object",
            Schema::Array { .. } => "array",
            Schema::Tuple(_) => "tuple",
            Schema::Union(_) => "union",
            Schema::Const(_) => "const",
            Schema::Primitive(_) => "primitive",
            Schema::Pattern(_) => "pattern",
        }
    }
}

// =============================================================================
// REFERENCE RESOLUTION
// =============================================================================

/// Copy of `document` with every local `$ref` replaced by its target.
///
/// Only `#` and `#/...` references are supported. Targets are resolved
/// recursively; a chain leading back to a reference being resolved is an
/// error. `definitions` and `$defs` are copied as-is, so an unused recursive
/// definition is harmless.
///
/// # Errors
///
/// Returns [`SchemaError::UnsupportedRef`], [`SchemaError::UnresolvedRef`] or
/// [`SchemaError::RecursiveRef`]
pub fn resolve_refs(document: &Value) -> Result<Value, SchemaError> {
    let mut active = Vec::new();
    resolve_node(document, document, &mut active)
}

fn resolve_node(root: &Value, node: &Value, active: &mut Vec<String>) -> Result<Value, SchemaError> {
    match node {
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_node(root, item, active))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            if let Some(reference) = map.get("$ref") {
                let reference = match reference {
                    Value::String(s) => s.as_str(),
                    other => {
                        return Err(SchemaError::UnsupportedRef {
                            reference: other.to_string(),
                        })
                    },
                };
                if active.iter().any(|r| r == reference) {
                    return Err(SchemaError::RecursiveRef {
                        reference: reference.to_string(),
                    });
                }
                let target = lookup(root, reference)?;
                active.push(reference.to_string());
                let resolved = resolve_node(root, target, active);
                active.pop();
                return resolved;
            }

            let mut out = Map::with_capacity(map.len());
            for (key, value) in map {
                let value = if DEFINITION_KEYWORDS.contains(&key.as_str()) {
                    value.clone()
                } else {
                    resolve_node(root, value, active)?
                };
                out.insert(key.clone(), value);
            }
            Ok(Value::Object(out))
        },
        other => Ok(other.clone()),
    }
}

fn lookup<'a>(root: &'a Value, reference: &str) -> Result<&'a Value, SchemaError> {
    if reference == "#" {
        return Ok(root);
    }
    let Some(path) = reference.strip_prefix("#/") else {
        return Err(SchemaError::UnsupportedRef {
            reference: reference.to_string(),
        });
    };

    let mut target = root;
    for raw in path.split('/') {
        let segment = raw.replace("~1", "/").replace("~0", "~");
        let next = match target {
            Value::Object(map) => map.get(&segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        target = next.ok_or_else(|| SchemaError::UnresolvedRef {
            reference: reference.to_string(),
            segment: segment.clone(),
        })?;
    }
    Ok(target)
}

// =============================================================================
// CLASSIFICATION
// =============================================================================

fn fragment(schema: &Value) -> String {
    serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string())
}

fn unrecognized(schema: &Value) -> SchemaError {
    SchemaError::Unrecognized {
        fragment: fragment(schema),
    }
}

/// Classify an already resolved schema value
///
/// # Errors
///
/// Returns [`SchemaError::Unrecognized`] for shapes outside the supported
/// subset and [`SchemaError::MixedAdditionalProperties`] for objects that
/// combine `properties` with an open `additionalProperties`
pub fn classify(schema: &Value) -> Result<Schema, SchemaError> {
    let map = match schema {
        Value::Object(map) => map,
        Value::Bool(true) => return Ok(Schema::Primitive(PrimitiveKind::Value)),
        _ => return Err(unrecognized(schema)),
    };
    let schema_type = map.get("type");
    let type_name = schema_type.and_then(Value::as_str);
    let untyped_or = |name: &str| schema_type.is_none() || type_name == Some(name);

    let classified = if let Some(alternatives) = map.get("oneOf").or_else(|| map.get("anyOf")) {
        let alternatives = non_empty(alternatives.as_array(), schema)?;
        Schema::Union(alternatives.iter().map(classify).collect::<Result<_, _>>()?)
    } else if let Some(value) = map.get("const") {
        Schema::Const(value.clone())
    } else if let Some(values) = map.get("enum") {
        let values = non_empty(values.as_array(), schema)?;
        Schema::Union(values.iter().cloned().map(Schema::Const).collect())
    } else if let Some(Value::Array(types)) = schema_type {
        let types = non_empty(Some(types), schema)?;
        let mut alternatives = Vec::with_capacity(types.len());
        for member in types {
            let mut single = map.clone();
            single.insert("type".to_string(), member.clone());
            alternatives.push(classify(&Value::Object(single))?);
        }
        Schema::Union(alternatives)
    } else if untyped_or("object") && map.contains_key("properties") {
        classify_properties(schema, map)?
    } else if type_name == Some("object") && map.contains_key("allOf") {
        classify_all_of(schema, map)?
    } else if untyped_or("object") && map.contains_key("additionalProperties") {
        let additional = additional_schema(map.get("additionalProperties"))?;
        Schema::Object(ObjectSchema {
            properties: Vec::new(),
            required: HashSet::new(),
            additional: additional.map(Box::new),
        })
    } else if type_name == Some("array") && map.contains_key("items") {
        classify_items(schema, map)?
    } else if untyped_or("string") && map.contains_key("pattern") {
        match map.get("pattern") {
            Some(Value::String(pattern)) => Schema::Pattern(pattern.clone()),
            _ => return Err(unrecognized(schema)),
        }
    } else if let Some(kind) = type_name.and_then(PrimitiveKind::from_name) {
        Schema::Primitive(kind)
    } else if schema_type.is_none() && map.keys().all(|k| ANNOTATION_KEYWORDS.contains(&k.as_str())) {
        Schema::Primitive(PrimitiveKind::Value)
    } else {
        return Err(unrecognized(schema));
    };

    debug!(variant = classified.kind(), "classified schema");
    Ok(classified)
}

// An empty alternative list admits no value at all
fn non_empty<'v>(values: Option<&'v Vec<Value>>, schema: &Value) -> Result<&'v Vec<Value>, SchemaError> {
    match values {
        Some(values) if !values.is_empty() => Ok(values),
        _ => Err(unrecognized(schema)),
    }
}

fn classify_properties(schema: &Value, map: &Map<String, Value>) -> Result<Schema, SchemaError> {
    let Some(Value::Object(declared)) = map.get("properties") else {
        return Err(unrecognized(schema));
    };
    let properties = declared
        .iter()
        .map(|(name, sub)| Ok((name.clone(), classify(sub)?)))
        .collect::<Result<Vec<_>, SchemaError>>()?;
    let required = map
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).map(String::from).collect())
        .unwrap_or_default();
    let additional = additional_schema(map.get("additionalProperties"))?;
    object(schema, properties, required, additional)
}

fn classify_all_of(schema: &Value, map: &Map<String, Value>) -> Result<Schema, SchemaError> {
    let Some(Value::Array(components)) = map.get("allOf") else {
        return Err(unrecognized(schema));
    };

    let mut properties: Vec<(String, Schema)> = Vec::new();
    let mut required = HashSet::new();
    let mut additional: Vec<Value> = map.get("additionalProperties").into_iter().cloned().collect();

    let mut add_component = |component: &Value, is_required: bool| -> Result<(), SchemaError> {
        let Value::Object(component_map) = component else {
            return Err(unrecognized(component));
        };
        if let Some(Value::Object(declared)) = component_map.get("properties") {
            for (name, sub) in declared {
                let sub = classify(sub)?;
                match properties.iter_mut().find(|(existing, _)| existing == name) {
                    Some(slot) => slot.1 = sub,
                    None => properties.push((name.clone(), sub)),
                }
                if is_required {
                    required.insert(name.clone());
                }
            }
        }
        if let Some(value) = component_map.get("additionalProperties") {
            additional.push(value.clone());
        }
        Ok(())
    };

    for component in components {
        match component.get("anyOf") {
            Some(Value::Array(branches)) => {
                for branch in branches {
                    add_component(branch, false)?;
                }
            },
            _ => add_component(component, true)?,
        }
    }

    let additional = additional_schema(&additional)?;
    object(schema, properties, required, additional)
}

fn classify_items(schema: &Value, map: &Map<String, Value>) -> Result<Schema, SchemaError> {
    match map.get("items") {
        Some(Value::Array(items)) => Ok(Schema::Tuple(items.iter().map(classify).collect::<Result<_, _>>()?)),
        Some(item) => {
            let bound = |key: &str| map.get(key).and_then(Value::as_u64).map(|n| n as usize);
            let min_items = bound("minItems").unwrap_or(0);
            let max_items = bound("maxItems");
            if max_items.is_some_and(|max| max < min_items) {
                return Err(unrecognized(schema));
            }
            Ok(Schema::Array {
                item: Box::new(classify(item)?),
                min_items,
                max_items,
            })
        },
        None => Err(unrecognized(schema)),
    }
}

// `additionalProperties` values: `false` closes, `true` allows any value
fn additional_schema<'a>(values: impl IntoIterator<Item = &'a Value>) -> Result<Option<Schema>, SchemaError> {
    let mut schemas = Vec::new();
    for value in values {
        match value {
            Value::Bool(false) => {},
            Value::Bool(true) => schemas.push(Schema::Primitive(PrimitiveKind::Value)),
            other => schemas.push(classify(other)?),
        }
    }
    Ok(match schemas.len() {
        0 => None,
        1 => schemas.pop(),
        _ => Some(Schema::Union(schemas)),
    })
}

fn object(
    schema: &Value,
    properties: Vec<(String, Schema)>,
    required: HashSet<String>,
    additional: Option<Schema>,
) -> Result<Schema, SchemaError> {
    if !properties.is_empty() && additional.is_some() {
        return Err(SchemaError::MixedAdditionalProperties {
            fragment: fragment(schema),
        });
    }
    Ok(Schema::Object(ObjectSchema {
        properties,
        required,
        additional: additional.map(Box::new),
    }))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(value: Value) -> Schema {
        Schema::from_value(&value).expect("test")
    }

    #[test]
    fn test_resolve_local_ref() {
        let document = json!({
            "definitions": {"point": {"type": "integer"}},
            "type": "array",
            "items": {"$ref": "#/definitions/point"}
        });
        let resolved = resolve_refs(&document).expect("test");
        assert_eq!(resolved["items"], json!({"type": "integer"}));
        // input untouched
        assert_eq!(document["items"], json!({"$ref": "#/definitions/point"}));
    }

    #[test]
    fn test_resolve_pointer_escapes_and_indices() {
        let document = json!({
            "$defs": {"a/b": {"type": "string"}, "m~n": [{"type": "null"}]},
            "anyOf": [{"$ref": "#/$defs/a~1b"}, {"$ref": "#/$defs/m~0n/0"}]
        });
        assert_eq!(
            schema(document),
            Schema::Union(vec![
                Schema::Primitive(PrimitiveKind::String),
                Schema::Primitive(PrimitiveKind::Null),
            ])
        );
    }

    #[test]
    fn test_ref_chain_resolves_transitively() {
        let document = json!({
            "definitions": {"a": {"$ref": "#/definitions/b"}, "b": {"type": "boolean"}},
            "$ref": "#/definitions/a"
        });
        assert_eq!(schema(document), Schema::Primitive(PrimitiveKind::Boolean));
    }

    #[test]
    fn test_unsupported_ref() {
        let err = Schema::from_value(&json!({"$ref": "https://example.com/foo"})).expect_err("remote");
        assert_eq!(
            err,
            SchemaError::UnsupportedRef {
                reference: "https://example.com/foo".to_string()
            }
        );
    }

    #[test]
    fn test_unresolved_ref() {
        let err = Schema::from_value(&json!({"$ref": "#/definitions/missing"})).expect_err("missing");
        assert!(matches!(err, SchemaError::UnresolvedRef { ref segment, .. } if segment == "definitions"));
    }

    #[test]
    fn test_recursive_ref() {
        let document = json!({
            "definitions": {"node": {"type": "object", "properties": {"next": {"$ref": "#/definitions/node"}}}},
            "$ref": "#/definitions/node"
        });
        let err = Schema::from_value(&document).expect_err("recursive");
        assert!(matches!(err, SchemaError::RecursiveRef { .. }));
    }

    #[test]
    fn test_unused_recursive_definition_is_harmless() {
        let document = json!({
            "definitions": {"node": {"properties": {"next": {"$ref": "#/definitions/node"}}}},
            "type": "integer"
        });
        assert_eq!(schema(document), Schema::Primitive(PrimitiveKind::Integer));
    }

    #[test]
    fn test_union_takes_priority_over_const() {
        let classified = schema(json!({"anyOf": [{"type": "integer"}], "const": 1}));
        assert_eq!(classified, Schema::Union(vec![Schema::Primitive(PrimitiveKind::Integer)]));
    }

    #[test]
    fn test_enum_becomes_union_of_const() {
        assert_eq!(
            schema(json!({"enum": ["a", 1]})),
            Schema::Union(vec![Schema::Const(json!("a")), Schema::Const(json!(1))])
        );
    }

    #[test]
    fn test_type_list_keeps_siblings() {
        let classified = schema(json!({"type": ["string", "null"], "pattern": "^a$"}));
        assert_eq!(
            classified,
            Schema::Union(vec![
                Schema::Pattern("^a$".to_string()),
                Schema::Primitive(PrimitiveKind::Null),
            ])
        );
    }

    #[test]
    fn test_object_properties() {
        let classified = schema(json!({
            "type": "object",
            "properties": {"b": {"type": "number"}, "a": {}},
            "required": ["b", "ghost"]
        }));
        let Schema::Object(object) = classified else {
            panic!("expected object");
        };
        let names: Vec<&str> = object.properties.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert!(object.is_required("b"));
        assert!(!object.is_required("a"));
        assert_eq!(object.properties[1].1, Schema::Primitive(PrimitiveKind::Value));
    }

    #[test]
    fn test_all_of_merges_components() {
        let classified = schema(json!({
            "type": "object",
            "allOf": [
                {"properties": {"id": {"type": "integer"}}},
                {"anyOf": [
                    {"properties": {"name": {"type": "string"}}},
                    {"properties": {"email": {"type": "string"}}}
                ]}
            ]
        }));
        let Schema::Object(object) = classified else {
            panic!("expected object");
        };
        assert_eq!(object.properties.len(), 3);
        assert!(object.is_required("id"));
        assert!(!object.is_required("name"));
        assert!(!object.is_required("email"));
    }

    #[test]
    fn test_all_of_additional_properties_conflict() {
        let err = Schema::from_value(&json!({
            "type": "object",
            "allOf": [
                {"properties": {"id": {"type": "integer"}}, "additionalProperties": {"type": "string"}}
            ]
        }))
        .expect_err("mixed");
        assert!(matches!(err, SchemaError::MixedAdditionalProperties { .. }));
    }

    #[test]
    fn test_mixed_additional_properties() {
        let err = Schema::from_value(&json!({
            "type": "object",
            "properties": {"a": {"type": "string"}},
            "additionalProperties": true
        }))
        .expect_err("mixed");
        assert!(matches!(err, SchemaError::MixedAdditionalProperties { .. }));

        let closed = schema(json!({
            "type": "object",
            "properties": {"a": {"type": "string"}},
            "additionalProperties": false
        }));
        assert!(matches!(closed, Schema::Object(ObjectSchema { additional: None, .. })));
    }

    #[test]
    fn test_map_object() {
        let classified = schema(json!({"type": "object", "additionalProperties": {"type": "integer"}}));
        assert_eq!(
            classified,
            Schema::Object(ObjectSchema {
                properties: Vec::new(),
                required: HashSet::new(),
                additional: Some(Box::new(Schema::Primitive(PrimitiveKind::Integer))),
            })
        );
    }

    #[test]
    fn test_array_and_tuple() {
        assert_eq!(
            schema(json!({"type": "array", "items": {"type": "string"}, "minItems": 1, "maxItems": 3})),
            Schema::Array {
                item: Box::new(Schema::Primitive(PrimitiveKind::String)),
                min_items: 1,
                max_items: Some(3),
            }
        );
        assert_eq!(
            schema(json!({"type": "array", "items": [{"type": "string"}, {"type": "number"}]})),
            Schema::Tuple(vec![
                Schema::Primitive(PrimitiveKind::String),
                Schema::Primitive(PrimitiveKind::Number),
            ])
        );
        assert_eq!(schema(json!({"type": "array"})), Schema::Primitive(PrimitiveKind::Array));
    }

    #[test]
    fn test_annotations_reduce_to_value() {
        assert_eq!(
            schema(json!({"title": "Anything", "description": "no constraint"})),
            Schema::Primitive(PrimitiveKind::Value)
        );
        assert_eq!(schema(json!({})), Schema::Primitive(PrimitiveKind::Value));
        assert_eq!(
            schema(json!({"type": "object", "title": "Opaque"})),
            Schema::Primitive(PrimitiveKind::Object)
        );
    }

    #[test]
    fn test_unrecognized_carries_fragment() {
        let err = Schema::from_value(&json!({"not": {"type": "string"}})).expect_err("unsupported");
        match err {
            SchemaError::Unrecognized { fragment } => assert!(fragment.contains("\"not\"")),
            other => panic!("Expected Unrecognized, got {other:?}"),
        }
        assert!(Schema::from_value(&json!({"type": "date"})).is_err());
    }

    #[test]
    fn test_empty_alternatives_rejected() {
        for document in [
            json!({"enum": []}),
            json!({"anyOf": []}),
            json!({"oneOf": []}),
            json!({"type": []}),
            json!({"properties": {"x": {"enum": []}}, "required": ["x"]}),
        ] {
            let err = Schema::from_value(&document).expect_err("empty alternatives");
            assert!(matches!(err, SchemaError::Unrecognized { .. }), "{document}");
        }
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        let err = Schema::from_json("{not json").expect_err("garbage");
        assert!(matches!(err, SchemaError::InvalidDocument { .. }));
    }
}
