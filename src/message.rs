//! Wire shapes exchanged with the serving layer
//!
//! Tool declarations, chat messages and tool calls, in the OpenAI-compatible
//! layout: `{type: "function", function: {name, description, parameters}}`
//! for tools and `{id, type, function: {name, arguments}}` for calls, where
//! `arguments` is a JSON-encoded string.

use crate::error::{RestringirError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// TOOL DECLARATIONS
// =============================================================================

fn function_type() -> String {
    "function".to_string()
}

fn empty_parameters() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// Function signature offered to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    /// Function name
    pub name: String,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema of the arguments object
    #[serde(default = "empty_parameters")]
    pub parameters: Value,
}

/// Tool declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    /// Always `"function"`
    #[serde(rename = "type", default = "function_type")]
    pub tool_type: String,
    /// The function
    pub function: FunctionDef,
}

impl Tool {
    /// Declare a function tool
    pub fn function(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            tool_type: function_type(),
            function: FunctionDef {
                name: name.into(),
                description: Some(description.into()),
                parameters,
            },
        }
    }

    /// Function name
    pub fn name(&self) -> &str {
        &self.function.name
    }
}

// =============================================================================
// MESSAGES
// =============================================================================

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions
    System,
    /// End user
    User,
    /// Model output
    Assistant,
    /// Tool result
    Tool,
}

impl Role {
    /// Lowercase wire name
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// Function name plus JSON-encoded arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Function name
    pub name: String,
    /// Arguments, JSON-encoded
    pub arguments: String,
}

impl FunctionCall {
    /// Create a call from already encoded arguments
    pub fn new(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Create a call, encoding `arguments` as compact JSON.
    ///
    /// A string argument is taken to be encoded already and kept as-is.
    pub fn from_value(name: impl Into<String>, arguments: &Value) -> Self {
        let arguments = match arguments {
            Value::String(encoded) => encoded.clone(),
            other => other.to_string(),
        };
        Self::new(name, arguments)
    }

    /// Decode the arguments
    ///
    /// # Errors
    ///
    /// Returns [`RestringirError::Parse`] if the arguments are not valid JSON
    pub fn parse_arguments(&self) -> Result<Value> {
        serde_json::from_str(&self.arguments)
            .map_err(|e| RestringirError::parse(format!("Failed to parse tool arguments: {e}"), &self.arguments))
    }
}

/// Tool invocation attached to an assistant message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call id, `call_<n>`
    pub id: String,
    /// Always `"function"`
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    /// The invocation
    pub function: FunctionCall,
}

impl ToolCall {
    /// Wrap a function call with a freshly generated id
    pub fn new(function: FunctionCall) -> Self {
        Self::with_id(generate_call_id(), function)
    }

    /// Wrap a function call with a given id
    pub fn with_id(id: impl Into<String>, function: FunctionCall) -> Self {
        Self {
            id: id.into(),
            call_type: function_type(),
            function,
        }
    }
}

/// `call_<n>` with `n` drawn uniformly from `0..=1_000_000`
pub fn generate_call_id() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..=1_000_000);
    format!("call_{n}")
}

/// Chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Author
    pub role: Role,
    /// Text content
    #[serde(default)]
    pub content: Option<String>,
    /// Tool calls made by the assistant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Call answered by a tool message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Message with text content
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// System message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// User message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Assistant message from parsed model output
    pub fn assistant_parts(content: Option<String>, tool_calls: Option<Vec<ToolCall>>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Tool calls, empty when absent
    pub fn tool_calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or_default()
    }

    /// Content, empty when absent
    pub fn content_str(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}
