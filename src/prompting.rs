//! Prompting style registry
//!
//! Each style pairs a way of describing tools in the system prompt with the
//! textual convention the model uses to call them:
//!
//! | Style | Tools described as | Calls emitted as |
//! |---|---|---|
//! | `TOOLS_SHORT` | JSON | `<tool_call>{...}</tool_call>` |
//! | `TOOLS_LONG` | TypeScript | `<tool_call>{...}</tool_call>` |
//! | `TOOLS_HERMES_2_PRO` | JSON | `<tool_call>{...}</tool_call>` |
//! | `TYPESCRIPT_FUNCTIONARY_V2` | TypeScript | `<\|recipient\|>name\n<\|content\|>{...}` |

use crate::error::{RestringirError, Result};
use crate::message::{Message, Tool};
use crate::typescript::tools_typescript_signatures;
use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;
use tracing::info;

/// Template fragment that marks a Functionary v2 chat template
const FUNCTIONARY_MARKER: &str = "<|recipient|>' + tool_call['function']['name']";

const HERMES_FUNCTION_CALL_SCHEMA: &str = r#"{"properties": {"arguments": {"title": "Arguments", "type": "object"}, "name": {"title": "Name", "type": "string"}}, "required": ["arguments", "name"], "title": "FunctionCall", "type": "object"}"#;

/// Tool-call prompting convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PromptingStyle {
    /// Short prompt with JSON tool schemas and `<tool_call>` tags
    #[serde(rename = "TOOLS_SHORT", alias = "SHORT")]
    ToolsShort,
    /// Longer prompt with TypeScript signatures and `<tool_call>` tags
    #[serde(rename = "TOOLS_LONG", alias = "LONG")]
    ToolsLong,
    /// Hermes 2 Pro function-calling prompt
    #[serde(rename = "TOOLS_HERMES_2_PRO", alias = "HERMES")]
    ToolsHermes2Pro,
    /// Functionary v2 recipient/content markers
    #[serde(rename = "TYPESCRIPT_FUNCTIONARY_V2", alias = "TYPESCRIPT_FUNCTIONARY")]
    TypescriptFunctionaryV2,
}

impl PromptingStyle {
    /// Pick the style a chat template was written for
    pub fn detect(template: &str) -> Self {
        let style = if template.contains(FUNCTIONARY_MARKER) {
            PromptingStyle::TypescriptFunctionaryV2
        } else {
            PromptingStyle::ToolsLong
        };
        info!(style = style.as_str(), "detected prompting style");
        style
    }

    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            PromptingStyle::ToolsShort => "TOOLS_SHORT",
            PromptingStyle::ToolsLong => "TOOLS_LONG",
            PromptingStyle::ToolsHermes2Pro => "TOOLS_HERMES_2_PRO",
            PromptingStyle::TypescriptFunctionaryV2 => "TYPESCRIPT_FUNCTIONARY_V2",
        }
    }

    /// Whether calls are wrapped in `<tool_call>` tags
    pub fn outputs_tool_call_tags(self) -> bool {
        matches!(
            self,
            PromptingStyle::ToolsShort | PromptingStyle::ToolsLong | PromptingStyle::ToolsHermes2Pro
        )
    }

    /// Whether the model may write `_` as `\_` in tags and tool names
    pub fn escapes_underscores(self) -> bool {
        self != PromptingStyle::ToolsHermes2Pro
    }
}

/// Pretty-print `value` with `indent` spaces per level
pub(crate) fn to_json_indented<T: Serialize>(value: &T, indent: usize) -> Result<String> {
    let indent = " ".repeat(indent);
    let mut out = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(indent.as_bytes()));
    value
        .serialize(&mut serializer)
        .map_err(|e| RestringirError::InvalidConfiguration(format!("Failed to serialize tool: {e}")))?;
    String::from_utf8(out).map_err(|e| RestringirError::InvalidConfiguration(format!("Invalid UTF-8 in tool: {e}")))
}

fn tools_json(tools: &[Tool], indent: usize) -> Result<Vec<String>> {
    tools.iter().map(|tool| to_json_indented(tool, indent)).collect()
}

/// System message describing `tools` the way `style` expects
///
/// # Errors
///
/// Returns error if a tool's parameter schema can not be rendered
pub fn make_tools_prompt(style: PromptingStyle, tools: &[Tool], indent: usize) -> Result<Message> {
    let content = match style {
        PromptingStyle::ToolsShort => {
            let mut lines = vec!["Here are the tools available:".to_string(), "<tools>".to_string()];
            lines.extend(tools_json(tools, indent)?);
            lines.push("</tools>".to_string());
            lines.join("\n")
        },
        PromptingStyle::ToolsLong => {
            let signatures = tools_typescript_signatures(tools)?;
            [
                "You may call one or more functions to assist with the user query. Don't make assumptions about what values to plug into functions. Here are the available tools:",
                "<tools>",
                signatures.as_str(),
                "</tools>",
                "",
                "To call each function, give its name and arguments within <tool_call></tool_call> XML tags as follows:",
                "<tool_call>",
                r#"{"name": <function-name>, "arguments": <args-dict>}"#,
                "</tool_call>",
            ]
            .join("\n")
        },
        PromptingStyle::ToolsHermes2Pro => {
            let tools = tools_json(tools, indent)?.join("\n");
            format!(
                "You are a function calling AI model. You are provided with function signatures within <tools></tools> XML tags. \
                 You may call one or more functions to assist with the user query. \
                 Don't make assumptions about what values to plug into functions. \
                 Here are the available tools: <tools>\n{tools}\n</tools> \
                 Use the following pydantic model json schema for each tool call you will make: {HERMES_FUNCTION_CALL_SCHEMA} \
                 For each function call return a json object with function name and arguments within <tool_call></tool_call> XML tags as follows:\n\
                 <tool_call>\n{{\"arguments\": <args-dict>, \"name\": <function-name>}}\n</tool_call>"
            )
        },
        PromptingStyle::TypescriptFunctionaryV2 => format!(
            "// Supported function definitions that should be called when necessary.\n{}",
            tools_typescript_signatures(tools)?
        ),
    };
    Ok(Message::system(content))
}
