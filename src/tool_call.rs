//! Tool-call protocol engine
//!
//! [`build_tool_protocol`] turns a chat format, a tool list and an optional
//! response schema into a [`ChatHandler`]: the grammar that constrains the
//! model's reply plus the parser that turns the raw completion back into an
//! assistant [`Message`].
//!
//! Two reply conventions exist. Tag styles wrap each call in
//! `<tool_call>{"name": ..., "arguments": ...}</tool_call>`; Functionary v2
//! uses `<|from|>assistant\n<|recipient|>name\n<|content|>args` blocks.

use crate::builder::{sub_name, GrammarBuilder};
use crate::chat_template::{discover_framing, ChatFormat, Framing};
use crate::config::ProtocolConfig;
use crate::error::{RestringirError, Result};
use crate::grammar::{primitives, Grammar, RangeItem, Rule};
use crate::message::{FunctionCall, Message, Tool, ToolCall};
use crate::prompting::{make_tools_prompt, PromptingStyle};
use crate::schema::{resolve_refs, Schema};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::{debug, warn};

const TOOL_CALL_OPEN: &str = "<tool_call>";
const TOOL_CALL_CLOSE: &str = "</tool_call>";
const ESCAPED_TOOL_CALL_OPEN: &str = r"<tool\_call>";

const FUNCTIONARY_START: &str = "<|from|>assistant\n<|recipient|>";
const FUNCTIONARY_CONTENT: &str = "\n<|content|>\n";
const FUNCTIONARY_TEXT_RECIPIENT: &str = "all";

static TOOL_CALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<tool_call>(.*?)</tool_call>").expect("tool call regex is valid"));

static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:<\|(?:stop|from)\|>)+ *assistant\n<\|recipient\|>").expect("header regex is valid")
});

static RECIPIENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ *([^ <|>\n]+) *\n<\|content\|>").expect("recipient regex is valid"));

static TRAILING_STOP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<\|stop\|>\s*$").expect("stop regex is valid"));

// =============================================================================
// PARSERS
// =============================================================================

/// Completion parser matching the grammar a handler was built with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseParser {
    /// `<tool_call>` JSON envelopes between free text
    ToolCallTags {
        /// Template suffix stripped before parsing
        suffix: String,
    },
    /// Functionary v2 recipient/content blocks
    RecipientContent {
        /// Template suffix stripped before parsing
        suffix: String,
    },
    /// Plain text reply
    Plain {
        /// Template suffix stripped before parsing
        suffix: String,
    },
}

impl ResponseParser {
    /// Parse a raw completion into an assistant message
    ///
    /// # Errors
    ///
    /// Returns `RestringirError::Parse` if a tool call can not be decoded
    pub fn parse(&self, completion: &str) -> Result<Message> {
        match self {
            ResponseParser::ToolCallTags { suffix } => parse_tool_call_tags(strip_suffix(completion, suffix)),
            ResponseParser::RecipientContent { suffix } => parse_recipient_content(strip_suffix(completion, suffix)),
            ResponseParser::Plain { suffix } => Ok(Message::assistant(strip_suffix(completion, suffix))),
        }
    }

    /// Template suffix this parser strips
    pub fn suffix(&self) -> &str {
        match self {
            ResponseParser::ToolCallTags { suffix }
            | ResponseParser::RecipientContent { suffix }
            | ResponseParser::Plain { suffix } => suffix,
        }
    }
}

fn strip_suffix<'a>(completion: &'a str, suffix: &str) -> &'a str {
    match completion.strip_suffix(suffix) {
        Some(stripped) => stripped,
        None => {
            warn!(suffix, completion, "expected suffix not found");
            completion
        },
    }
}

fn joined_content(parts: &[&str]) -> Option<String> {
    let content = parts.join("\n");
    let content = content.trim();
    (!content.is_empty()).then(|| content.to_string())
}

#[derive(Deserialize)]
struct TaggedCall {
    name: String,
    arguments: Value,
}

// Text between complete envelopes must not hold a dangling tag
fn unframed(segment: &str) -> Result<&str> {
    if let Some(start) = segment.find(TOOL_CALL_OPEN) {
        return Err(RestringirError::parse("Unterminated tool call", &segment[start..]));
    }
    if let Some(end) = segment.find(TOOL_CALL_CLOSE) {
        return Err(RestringirError::parse(
            "Tool call closed without opening",
            &segment[..end + TOOL_CALL_CLOSE.len()],
        ));
    }
    Ok(segment)
}

fn parse_tool_call_tags(text: &str) -> Result<Message> {
    let text = if text.contains(ESCAPED_TOOL_CALL_OPEN) {
        text.replace(r"\_", "_")
    } else {
        text.to_string()
    };

    let mut content = Vec::new();
    let mut tool_calls = Vec::new();
    let mut last = 0;
    for captures in TOOL_CALL_RE.captures_iter(&text) {
        let (Some(whole), Some(body)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        content.push(unframed(&text[last..whole.start()])?);
        last = whole.end();

        let fragment = body.as_str().replace(r"\_", "_");
        let call: TaggedCall = serde_json::from_str(&fragment)
            .map_err(|e| RestringirError::parse(format!("Failed to parse tool call as JSON: {e}"), fragment.as_str()))?;
        tool_calls.push(ToolCall::new(FunctionCall::from_value(call.name, &call.arguments)));
    }

    let tail = unframed(&text[last..])?;
    if tool_calls.is_empty() {
        return Ok(Message::assistant(text));
    }
    content.push(tail);
    Ok(Message::assistant_parts(joined_content(&content), Some(tool_calls)))
}

fn parse_recipient_content(text: &str) -> Result<Message> {
    let pieces: Vec<&str> = HEADER_RE.split(text).collect();
    if pieces.len() == 1 && !RECIPIENT_RE.is_match(text) {
        return Ok(Message::assistant(text));
    }

    let mut content = Vec::new();
    let mut tool_calls = Vec::new();
    let last_index = pieces.len().saturating_sub(1);
    for (i, piece) in pieces.iter().enumerate() {
        if i == 0 && piece.trim().is_empty() {
            continue;
        }
        let piece = if i == last_index {
            TRAILING_STOP_RE.replace(piece, "")
        } else {
            std::borrow::Cow::Borrowed(*piece)
        };
        let Some(captures) = RECIPIENT_RE.captures(&piece) else {
            return Err(RestringirError::parse("Unexpected block without recipient header", piece.as_ref()));
        };
        let (Some(whole), Some(recipient)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let body = &piece[whole.end()..];

        if recipient.as_str() == FUNCTIONARY_TEXT_RECIPIENT {
            content.push(body.to_string());
        } else {
            let arguments: Value = serde_json::from_str(body)
                .map_err(|e| RestringirError::parse(format!("Failed to parse tool call content as JSON: {e}"), body))?;
            tool_calls.push(ToolCall::new(FunctionCall::from_value(recipient.as_str(), &arguments)));
        }
    }

    let content: Vec<&str> = content.iter().map(String::as_str).collect();
    let tool_calls = (!tool_calls.is_empty()).then_some(tool_calls);
    Ok(Message::assistant_parts(joined_content(&content), tool_calls))
}

// =============================================================================
// HANDLER
// =============================================================================

/// Grammar plus parser for one (chat format, tools, schema) combination
#[derive(Debug, Clone)]
pub struct ChatHandler {
    style: PromptingStyle,
    grammar: Option<Grammar>,
    framing: Framing,
    parser: ResponseParser,
    system_prompt: Option<Message>,
}

impl ChatHandler {
    /// Prompting style the handler was built for
    pub fn style(&self) -> PromptingStyle {
        self.style
    }

    /// Rule table constraining the reply; `None` when unconstrained
    pub fn grammar(&self) -> Option<&Grammar> {
        self.grammar.as_ref()
    }

    /// GBNF text of [`ChatHandler::grammar`]
    pub fn grammar_text(&self) -> Option<String> {
        self.grammar.as_ref().map(Grammar::format_grammar)
    }

    /// Assistant framing discovered from the template
    pub fn framing(&self) -> &Framing {
        &self.framing
    }

    /// Completion parser
    pub fn parser(&self) -> &ResponseParser {
        &self.parser
    }

    /// System prompt describing the tools, if any were given
    pub fn system_prompt(&self) -> Option<&Message> {
        self.system_prompt.as_ref()
    }

    /// Conversation with the tool description merged into its system prompt
    pub fn prepare_messages(&self, messages: &[Message]) -> Vec<Message> {
        match &self.system_prompt {
            Some(prompt) => ChatFormat::add_system_prompt(messages, prompt),
            None => messages.to_vec(),
        }
    }

    /// Parse a raw completion
    ///
    /// # Errors
    ///
    /// Returns `RestringirError::Parse` if a tool call can not be decoded
    pub fn parse(&self, completion: &str) -> Result<Message> {
        self.parser.parse(completion)
    }

    /// Grammar matching exactly the literal prefix followed by the suffix
    pub fn framing_grammar(&self) -> String {
        let mut grammar = Grammar::new();
        grammar.add_root(Rule::Sequence(vec![
            Rule::literal(self.framing.prefix.as_str()),
            Rule::literal(self.framing.suffix.as_str()),
        ]));
        grammar.format_grammar()
    }
}

/// Build the grammar and parser for a tool-calling conversation
///
/// With tools, the reply may mix free text and calls in the chosen style.
/// Without tools, a response schema constrains the whole reply; with neither
/// the reply is unconstrained.
///
/// # Errors
///
/// Returns error if the configuration is invalid, the template is
/// incompatible with framing discovery or a schema is unsupported
pub fn build_tool_protocol(
    chat_format: &ChatFormat,
    tools: &[Tool],
    response_schema: Option<&Value>,
    config: &ProtocolConfig,
) -> Result<ChatHandler> {
    config.validate()?;
    let style = config.style.unwrap_or_else(|| chat_format.style());
    debug!(
        style = style.as_str(),
        tools = tools.len(),
        parallel_calls = config.parallel_calls,
        "building chat handler"
    );

    let framing = discover_framing(chat_format, &config.delimiter, &config.sentinel_user_message)?;
    let suffix = framing.suffix.clone();
    let mut builder = GrammarBuilder::new().with_prop_order(config.prop_order.clone());

    let (grammar, parser, system_prompt) = if !tools.is_empty() {
        let parser = if style.outputs_tool_call_tags() {
            tag_style_rules(&mut builder, tools, style.escapes_underscores(), config.parallel_calls)?;
            ResponseParser::ToolCallTags { suffix }
        } else {
            functionary_rules(&mut builder, tools, config.parallel_calls)?;
            ResponseParser::RecipientContent { suffix }
        };
        let prompt = make_tools_prompt(style, tools, config.tools_indent)?;
        (Some(finish(builder)?), parser, Some(prompt))
    } else if let Some(document) = response_schema {
        let response = builder.visit(&Schema::from_value(document)?, "response")?;
        let mut root = vec![response];
        if !suffix.is_empty() {
            root.push(Rule::literal(suffix.as_str()));
        }
        builder.add_root(Rule::Sequence(root));
        (Some(finish(builder)?), ResponseParser::Plain { suffix }, None)
    } else {
        (None, ResponseParser::Plain { suffix }, None)
    };

    Ok(ChatHandler {
        style,
        grammar,
        framing,
        parser,
        system_prompt,
    })
}

fn finish(builder: GrammarBuilder) -> Result<Grammar> {
    let grammar = builder.into_grammar();
    grammar.validate()?;
    Ok(grammar)
}

/// Literal that also accepts `\_` for every `_` when `escapes` is set
fn tag_literal(text: &str, escapes: bool) -> Rule {
    if !escapes {
        return Rule::literal(text);
    }
    let mut parts = Vec::new();
    for (i, piece) in text.split('_').enumerate() {
        if i > 0 {
            parts.push(Rule::optional(Rule::literal("\\")));
            parts.push(Rule::literal("_"));
        }
        parts.push(Rule::literal(piece));
    }
    Rule::Sequence(parts)
}

fn tag_style_rules(builder: &mut GrammarBuilder, tools: &[Tool], escapes: bool, parallel: bool) -> Result<()> {
    let required = HashSet::from(["name".to_string(), "arguments".to_string()]);
    let mut tool_rules = Vec::with_capacity(tools.len());
    for tool in tools {
        let rule_name = format!("{}-tool-call", tool.name());
        // Matched against raw completion text, where `\_` may stand for `_`
        let quoted = Value::String(tool.name().to_string()).to_string();
        let name = builder.add_rule(
            &sub_name(&rule_name, "name"),
            Rule::Sequence(vec![tag_literal(&quoted, escapes), primitives::space()]),
        );
        let parameters = Schema::from_value(&resolve_refs(&tool.function.parameters)?)?;
        let arguments = builder.visit(&parameters, &sub_name(&rule_name, "arguments"))?;
        let properties = [("name".to_string(), name), ("arguments".to_string(), arguments)];
        let object = builder.object_of(&rule_name, &properties, &required);
        tool_rules.push(builder.add_rule(&rule_name, object));
    }

    let tool_call = builder.add_rule(
        "tool_call",
        Rule::Sequence(vec![
            tag_literal(TOOL_CALL_OPEN, escapes),
            primitives::space(),
            Rule::Union(tool_rules),
            primitives::space(),
            tag_literal(TOOL_CALL_CLOSE, escapes),
        ]),
    );

    // Narrower than "anything but <tool_call>": rejects the first three
    // characters of the tag
    let content = builder.add_rule(
        "content",
        Rule::Union(vec![
            Rule::not_range(vec![RangeItem::Char('<')]),
            Rule::Sequence(vec![
                Rule::literal("<"),
                Rule::not_range(vec![RangeItem::Char('t'), RangeItem::Char('<')]),
            ]),
            Rule::Sequence(vec![
                Rule::literal("<t"),
                Rule::not_range(vec![RangeItem::Char('o'), RangeItem::Char('<')]),
            ]),
        ]),
    );

    let root = if parallel {
        Rule::Sequence(vec![
            Rule::star(content.clone()),
            Rule::optional(Rule::Sequence(vec![Rule::plus(tool_call), Rule::star(content)])),
        ])
    } else {
        Rule::Sequence(vec![Rule::star(content), Rule::optional(tool_call)])
    };
    builder.add_root(root);
    Ok(())
}

fn functionary_rules(builder: &mut GrammarBuilder, tools: &[Tool], parallel: bool) -> Result<()> {
    let mut tool_rules = Vec::with_capacity(tools.len());
    for tool in tools {
        let parameters = Schema::from_value(&tool.function.parameters)?;
        let arguments = builder.visit(&parameters, &format!("{}-args", tool.name()))?;
        tool_rules.push(builder.add_rule(
            &format!("{}-call", tool.name()),
            Rule::Sequence(vec![
                Rule::literal(tool.name()),
                Rule::literal(FUNCTIONARY_CONTENT),
                arguments,
                Rule::literal("\n"),
            ]),
        ));
    }

    let not_from = builder.add_rule("not_from", Rule::not_literal("<|from|>"));
    let content_without_start = builder.add_rule(
        "content_without_start",
        Rule::Sequence(vec![Rule::literal("all\n<|content|>"), Rule::star(not_from)]),
    );
    let start = builder.add_rule("start", Rule::literal(FUNCTIONARY_START));
    let content = builder.add_rule(
        "content",
        Rule::Sequence(vec![start.clone(), content_without_start.clone()]),
    );
    let tool_call_without_start = builder.add_rule("tool_call_without_start", Rule::Union(tool_rules));
    let tool_call = builder.add_rule(
        "tool_call",
        Rule::Sequence(vec![start, tool_call_without_start.clone()]),
    );

    let root = if parallel {
        Rule::Union(vec![
            Rule::Sequence(vec![
                content_without_start,
                Rule::star(content.clone()),
                Rule::optional(Rule::Sequence(vec![Rule::plus(tool_call.clone()), Rule::star(content.clone())])),
            ]),
            Rule::Sequence(vec![tool_call_without_start, Rule::star(tool_call), Rule::star(content)]),
        ])
    } else {
        Rule::Union(vec![
            Rule::Sequence(vec![content_without_start, Rule::optional(tool_call)]),
            tool_call_without_start,
        ])
    };
    builder.add_root(root);
    Ok(())
}
