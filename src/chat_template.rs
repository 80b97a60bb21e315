//! Chat template rendering and framing discovery
//!
//! Templates are HuggingFace-style Jinja2 sources rendered with `minijinja`.
//! The protocol engine treats a template as opaque: it only needs to render
//! message lists and to learn the literal text the template wraps around an
//! assistant reply (see [`discover_framing`]).
//!
//! # Example
//!
//! ```
//! use restringir::chat_template::{discover_framing, ChatFormat};
//!
//! let source = "{% for m in messages %}<|im_start|>{{ m['role'] }}\n{{ m['content'] }}<|im_end|>\n{% endfor %}\
//!               {% if add_generation_prompt %}<|im_start|>assistant\n{% endif %}";
//! let format = ChatFormat::from_template(source, "", "").expect("valid template");
//! let framing = discover_framing(&format, "<%$[SAMPLE]$%>", "Hey").expect("compatible template");
//! assert_eq!(framing.prefix, "\n");
//! assert_eq!(framing.suffix, "<|im_end|>");
//! ```

use crate::error::{RestringirError, Result};
use crate::message::{Message, Role};
use crate::prompting::PromptingStyle;
use minijinja::{context, Environment, ErrorKind};
use serde::Deserialize;
use std::collections::HashMap;

// ============================================================================
// Constants - Template Limits
// ============================================================================

/// Maximum recursion depth for templates
pub const MAX_RECURSION_DEPTH: usize = 100;

/// Template fragment that marks a template enforcing user/assistant alternation
const STRICT_ALTERNATION_MARKER: &str =
    "{% if (message['role'] == 'user') != (loop.index0 % 2 == 0) %}{{ raise_exception";

const TEMPLATE_NAME: &str = "chat";

// ============================================================================
// Renderer seam
// ============================================================================

/// Anything that turns a message list into prompt text
pub trait TemplateRenderer {
    /// Render `messages`, optionally opening an assistant turn at the end
    ///
    /// # Errors
    ///
    /// Returns error if the template rejects the conversation
    fn render(&self, messages: &[Message], add_generation_prompt: bool) -> Result<String>;
}

// ============================================================================
// Jinja2 template
// ============================================================================

/// Special token as found in `tokenizer_config.json`: either a bare string or
/// an added-token object
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SpecialToken {
    Text(String),
    Added { content: String },
}

impl SpecialToken {
    fn into_content(self) -> String {
        match self {
            SpecialToken::Text(content) | SpecialToken::Added { content } => content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenizerConfig {
    chat_template: Option<String>,
    bos_token: Option<SpecialToken>,
    eos_token: Option<SpecialToken>,
    #[serde(flatten)]
    #[allow(dead_code)]
    extra: HashMap<String, serde_json::Value>,
}

fn raise_exception(message: String) -> std::result::Result<String, minijinja::Error> {
    Err(minijinja::Error::new(ErrorKind::InvalidOperation, message))
}

/// Jinja2 chat template with its special tokens
pub struct ChatTemplate {
    env: Environment<'static>,
    source: String,
    bos_token: String,
    eos_token: String,
}

impl std::fmt::Debug for ChatTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatTemplate")
            .field("source", &self.source)
            .field("bos_token", &self.bos_token)
            .field("eos_token", &self.eos_token)
            .finish_non_exhaustive()
    }
}

impl ChatTemplate {
    /// Compile a Jinja2 template source
    ///
    /// # Errors
    ///
    /// Returns `RestringirError::InvalidConfiguration` on template syntax errors
    pub fn new(source: impl Into<String>, bos_token: impl Into<String>, eos_token: impl Into<String>) -> Result<Self> {
        let source = source.into();
        let mut env = Environment::new();
        env.set_recursion_limit(MAX_RECURSION_DEPTH);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.add_function("raise_exception", raise_exception);
        env.add_template_owned(TEMPLATE_NAME, source.clone())
            .map_err(|e| RestringirError::InvalidConfiguration(format!("Invalid template syntax: {e}")))?;

        Ok(Self {
            env,
            source,
            bos_token: bos_token.into(),
            eos_token: eos_token.into(),
        })
    }

    /// Create from `tokenizer_config.json` content
    ///
    /// # Errors
    ///
    /// Returns `RestringirError::InvalidConfiguration` if the config is
    /// malformed, lacks `chat_template`, or the template does not compile
    pub fn from_json(json: &str) -> Result<Self> {
        let config: TokenizerConfig = serde_json::from_str(json)
            .map_err(|e| RestringirError::InvalidConfiguration(format!("Invalid tokenizer config: {e}")))?;
        let source = config
            .chat_template
            .ok_or_else(|| RestringirError::InvalidConfiguration("No 'chat_template' found in config".to_string()))?;
        let bos = config.bos_token.map(SpecialToken::into_content).unwrap_or_default();
        let eos = config.eos_token.map(SpecialToken::into_content).unwrap_or_default();
        Self::new(source, bos, eos)
    }

    /// Template source text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Beginning-of-sequence token
    pub fn bos_token(&self) -> &str {
        &self.bos_token
    }

    /// End-of-sequence token
    pub fn eos_token(&self) -> &str {
        &self.eos_token
    }
}

impl TemplateRenderer for ChatTemplate {
    fn render(&self, messages: &[Message], add_generation_prompt: bool) -> Result<String> {
        let template = self
            .env
            .get_template(TEMPLATE_NAME)
            .map_err(|e| RestringirError::TemplateRender {
                reason: format!("Template error: {e}"),
            })?;

        template
            .render(context!(
                messages => messages,
                add_generation_prompt => add_generation_prompt,
                bos_token => self.bos_token.as_str(),
                eos_token => self.eos_token.as_str()
            ))
            .map_err(|e| RestringirError::TemplateRender {
                reason: format!("Render error: {e}"),
            })
    }
}

// ============================================================================
// Chat format
// ============================================================================

/// A chat template plus the conventions inferred from its source
#[derive(Debug)]
pub struct ChatFormat {
    template: ChatTemplate,
    style: PromptingStyle,
    strict_alternation: bool,
}

impl ChatFormat {
    /// Wrap a compiled template, detecting its prompting style and whether
    /// it enforces strict user/assistant alternation
    pub fn new(template: ChatTemplate) -> Self {
        let style = PromptingStyle::detect(template.source());
        let strict_alternation = template.source().contains(STRICT_ALTERNATION_MARKER);
        Self {
            template,
            style,
            strict_alternation,
        }
    }

    /// Compile `source` and wrap it
    ///
    /// # Errors
    ///
    /// Returns error if the template does not compile
    pub fn from_template(
        source: impl Into<String>,
        bos_token: impl Into<String>,
        eos_token: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self::new(ChatTemplate::new(source, bos_token, eos_token)?))
    }

    /// Detected prompting style
    pub fn style(&self) -> PromptingStyle {
        self.style
    }

    /// Whether the template rejects anything but alternating user/assistant
    pub fn strict_alternation(&self) -> bool {
        self.strict_alternation
    }

    /// Underlying template
    pub fn template(&self) -> &ChatTemplate {
        &self.template
    }

    /// Merge `system_prompt` into the first system message, or prepend it
    pub fn add_system_prompt(messages: &[Message], system_prompt: &Message) -> Vec<Message> {
        match messages.iter().position(|m| m.role == Role::System) {
            Some(i) => {
                let merged = format!("{}\n{}", system_prompt.content_str(), messages[i].content_str());
                let mut out = messages.to_vec();
                out[i] = Message::system(merged);
                out
            },
            None => std::iter::once(system_prompt.clone()).chain(messages.iter().cloned()).collect(),
        }
    }

    /// Rewrite a conversation for a strict-alternation template
    ///
    /// System messages are folded into the following user message as
    /// `[SYS]…[/SYS]\n…`; assistant messages with both content and tool calls
    /// become plain content followed by `<tool_call>` lines.
    fn fold_for_strict_alternation(messages: &[Message]) -> Result<Vec<Message>> {
        let mut folded = Vec::with_capacity(messages.len());
        let mut i = 0;
        while i < messages.len() {
            let message = &messages[i];
            match message.role {
                Role::System => {
                    let next = messages.get(i + 1).filter(|m| m.role == Role::User).ok_or_else(|| {
                        RestringirError::TemplateIncompatibility {
                            reason: "System message must be followed by a user message for this template".to_string(),
                        }
                    })?;
                    folded.push(Message::user(format!(
                        "[SYS]{}[/SYS]\n{}",
                        message.content_str(),
                        next.content_str()
                    )));
                    i += 2;
                },
                Role::Assistant if !message.tool_calls().is_empty() && !message.content_str().is_empty() => {
                    let calls = message
                        .tool_calls()
                        .iter()
                        .map(|call| {
                            serde_json::to_string(call)
                                .map(|json| format!("<tool_call>{json}</tool_call>"))
                                .map_err(|e| RestringirError::TemplateRender {
                                    reason: format!("Failed to encode tool call: {e}"),
                                })
                        })
                        .collect::<Result<Vec<_>>>()?;
                    folded.push(Message::assistant(format!("{}\n{}", message.content_str(), calls.join("\n"))));
                    i += 1;
                },
                _ => {
                    folded.push(message.clone());
                    i += 1;
                },
            }
        }
        Ok(folded)
    }
}

impl TemplateRenderer for ChatFormat {
    fn render(&self, messages: &[Message], add_generation_prompt: bool) -> Result<String> {
        let needs_folding =
            self.strict_alternation && messages.iter().any(|m| !matches!(m.role, Role::User | Role::Assistant));
        if needs_folding {
            let folded = Self::fold_for_strict_alternation(messages)?;
            self.template.render(&folded, add_generation_prompt)
        } else {
            self.template.render(messages, add_generation_prompt)
        }
    }
}

// ============================================================================
// Framing discovery
// ============================================================================

/// Literal text a template places around assistant content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Framing {
    /// Text between the generation prompt and the reply
    pub prefix: String,
    /// Text closing the reply
    pub suffix: String,
}

/// Recover the assistant framing by rendering a sentinel conversation with
/// and without a planted assistant reply
///
/// # Errors
///
/// Returns `RestringirError::TemplateIncompatibility` if the planted
/// rendering does not extend the plain one or loses the delimiter
pub fn discover_framing(renderer: &dyn TemplateRenderer, delimiter: &str, sentinel_user_message: &str) -> Result<Framing> {
    let user = Message::user(sentinel_user_message);
    let empty_prompt = renderer.render(std::slice::from_ref(&user), true)?;
    let planted_prompt = renderer.render(&[user, Message::assistant(delimiter)], false)?;
    let empty_prompt = empty_prompt.trim();
    let planted_prompt = planted_prompt.trim();

    let rest = planted_prompt
        .strip_prefix(empty_prompt)
        .ok_or_else(|| RestringirError::TemplateIncompatibility {
            reason: format!("Rendered prompt with an assistant reply does not start with the bare prompt: {planted_prompt:?}"),
        })?;
    let (prefix, suffix) = rest
        .split_once(delimiter)
        .ok_or_else(|| RestringirError::TemplateIncompatibility {
            reason: format!("Delimiter {delimiter:?} not found in rendered assistant reply: {rest:?}"),
        })?;

    Ok(Framing {
        prefix: prefix.to_string(),
        suffix: suffix.to_string(),
    })
}
