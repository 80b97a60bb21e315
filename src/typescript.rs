//! TypeScript rendering of tool signatures
//!
//! Some prompting styles describe tools to the model as TypeScript function
//! types rather than raw JSON Schema:
//!
//! ```text
//! namespace functions {
//! // Get the current weather
//! type get_weather = (_: {
//! location: string,
//! unit?: "c"|"f"
//! }) => any;
//! } // namespace functions
//! ```

use crate::error::Result;
use crate::message::Tool;
use crate::schema::resolve_refs;
use serde_json::Value;

/// Render every tool as a `type name = (_: Args) => any;` line inside
/// `namespace functions`
///
/// # Errors
///
/// Returns error if a tool's parameter schema has unresolvable `$ref`s
pub fn tools_typescript_signatures(tools: &[Tool]) -> Result<String> {
    let mut signatures = Vec::with_capacity(tools.len());
    for tool in tools {
        let parameters = resolve_refs(&tool.function.parameters)?;
        let description = tool.function.description.as_deref().unwrap_or_default();
        signatures.push(format!(
            "// {}\ntype {} = (_: {}) => any;\n",
            description.replace('\n', "\n// "),
            tool.function.name,
            schema_to_typescript(&parameters)
        ));
    }
    Ok(format!("namespace functions {{{}}} // namespace functions", signatures.join("\n")))
}

/// TypeScript type for an already resolved JSON Schema
pub fn schema_to_typescript(schema: &Value) -> String {
    let Value::Object(map) = schema else {
        return "any".to_string();
    };
    let schema_type = map.get("type");
    let type_name = schema_type.and_then(Value::as_str);
    let untyped_or = |name: &str| schema_type.is_none() || type_name == Some(name);

    if let Some(Value::Array(alternatives)) = map.get("oneOf").or_else(|| map.get("anyOf")) {
        return alternatives.iter().map(schema_to_typescript).collect::<Vec<_>>().join("|");
    }
    if let Some(Value::Array(types)) = schema_type {
        return types
            .iter()
            .map(|t| schema_to_typescript(&serde_json::json!({ "type": t })))
            .collect::<Vec<_>>()
            .join("|");
    }
    if let Some(value) = map.get("const") {
        return value.to_string();
    }
    if let Some(Value::Array(values)) = map.get("enum") {
        return values.iter().map(Value::to_string).collect::<Vec<_>>().join("|");
    }
    if untyped_or("object") && (map.contains_key("properties") || map.contains_key("additionalProperties")) {
        return object_type(map);
    }
    if untyped_or("array") {
        match map.get("items") {
            Some(Value::Array(items)) => {
                let items: Vec<String> = items.iter().map(schema_to_typescript).collect();
                return format!("[{}]", items.join(", "));
            },
            Some(item) => return format!("{}[]", schema_to_typescript(item)),
            None => {},
        }
    }
    if untyped_or("string") && map.get("format").and_then(Value::as_str) == Some("date-time") {
        return "Date".to_string();
    }
    match type_name {
        Some("integer") => "number".to_string(),
        Some("object") | None => "any".to_string(),
        Some("array") => "any[]".to_string(),
        Some(other) => other.to_string(),
    }
}

fn desc_comment(schema: &Value) -> String {
    match schema.get("description").and_then(Value::as_str) {
        Some(description) if !description.is_empty() => {
            format!("// {}\n", description.replace('\n', "\n// "))
        },
        _ => String::new(),
    }
}

fn object_type(map: &serde_json::Map<String, Value>) -> String {
    let required: Vec<&str> = map
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut fields = Vec::new();
    if let Some(Value::Object(properties)) = map.get("properties") {
        for (name, prop) in properties {
            let marker = if required.contains(&name.as_str()) { "" } else { "?" };
            fields.push(format!("{}{name}{marker}: {}", desc_comment(prop), schema_to_typescript(prop)));
        }
    }
    match map.get("additionalProperties") {
        Some(Value::Bool(true)) => fields.push("[key: string]: any".to_string()),
        Some(additional @ Value::Object(_)) => fields.push(format!(
            "{}[key: string]: {}",
            desc_comment(additional),
            schema_to_typescript(additional)
        )),
        _ => {},
    }
    format!("{{\n{}\n}}", fields.join(",\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_primitives() {
        assert_eq!(schema_to_typescript(&json!({"type": "integer"})), "number");
        assert_eq!(schema_to_typescript(&json!({"type": "string"})), "string");
        assert_eq!(schema_to_typescript(&json!({"type": "string", "format": "date-time"})), "Date");
        assert_eq!(schema_to_typescript(&json!({})), "any");
        assert_eq!(schema_to_typescript(&json!({"type": ["string", "null"]})), "string|null");
    }

    #[test]
    fn test_enum_and_const() {
        assert_eq!(schema_to_typescript(&json!({"enum": ["c", "f"]})), r#""c"|"f""#);
        assert_eq!(schema_to_typescript(&json!({"const": 3})), "3");
    }

    #[test]
    fn test_arrays() {
        assert_eq!(schema_to_typescript(&json!({"type": "array", "items": {"type": "number"}})), "number[]");
        assert_eq!(
            schema_to_typescript(&json!({"type": "array", "items": [{"type": "string"}, {"type": "boolean"}]})),
            "[string, boolean]"
        );
    }

    #[test]
    fn test_object_fields() {
        let schema = json!({
            "type": "object",
            "properties": {
                "location": {"type": "string", "description": "City name"},
                "unit": {"enum": ["c", "f"]}
            },
            "required": ["location"]
        });
        assert_eq!(
            schema_to_typescript(&schema),
            "{\n// City name\nlocation: string,\nunit?: \"c\"|\"f\"\n}"
        );
    }

    #[test]
    fn test_namespace_wrapping() {
        let tools = vec![Tool::function(
            "ping",
            "Check liveness\nof the service",
            json!({"type": "object", "properties": {}}),
        )];
        assert_eq!(
            tools_typescript_signatures(&tools).expect("test"),
            "namespace functions {// Check liveness\n// of the service\ntype ping = (_: {\n\n}) => any;\n} // namespace functions"
        );
    }
}
