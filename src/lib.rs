//! # Restringir
//!
//! JSON Schema to GBNF grammar compiler and tool-call protocol engine for
//! constrained LLM generation.
//!
//! Restringir (Spanish: "to restrict") turns a JSON Schema into a context-free
//! grammar that a sampler can use to force a model's output to be a valid
//! document, and builds the grammar plus parser pair that lets a chat model
//! call tools through its own template conventions.
//!
//! ## Features
//!
//! - **Schema compiler**: objects, arrays, tuples, unions, consts, enums,
//!   regex patterns, local `$ref`s and `allOf` merging
//! - **Deterministic output**: identical sub-schemas share one rule; name
//!   clashes get numeric suffixes
//! - **Tool calling**: `<tool_call>` tag styles and Functionary v2
//!   recipient blocks, with prompts, grammars and parsers for each
//! - **Template aware**: discovers the literal framing of any Jinja2 chat
//!   template by rendering it
//!
//! ## Example
//!
//! ```rust
//! use restringir::compile_schema;
//! use serde_json::json;
//!
//! let schema = json!({
//!     "type": "object",
//!     "properties": {"success": {"type": "boolean"}},
//!     "required": ["success"]
//! });
//! let grammar = compile_schema(&schema).expect("supported schema");
//! assert!(grammar.contains(r#"root ::= "{" space success-kv "}" space"#));
//! ```
//!
//! ## Architecture
//!
//! - [`schema`] classifies raw JSON into a [`Schema`] tree
//! - [`builder`] walks the tree into a [`Grammar`] rule table
//! - [`tool_call`] wraps tool schemas into per-style protocols

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
// Clippy allows (MUST come after deny/warn to override them)
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)] // Not all methods need #[must_use]
#![allow(clippy::doc_markdown)] // Allow technical terms without backticks
#![allow(clippy::uninlined_format_args)] // Prefer explicit format args
#![allow(clippy::single_match_else)] // Sometimes clearer than if-let
#![allow(clippy::missing_panics_doc)] // Allow missing Panics doc sections
#![allow(clippy::if_not_else)] // Allow if !condition { } else { }

/// Schema to grammar builder
pub mod builder;
/// Chat template rendering and framing discovery
pub mod chat_template;
/// Protocol configuration
pub mod config;
pub mod error;
pub mod grammar;
/// Tool, message and tool-call wire shapes
pub mod message;
pub mod pattern;
/// Prompting styles and tool system prompts
pub mod prompting;
pub mod schema;
/// Tool-call protocol engine
pub mod tool_call;
/// TypeScript rendering of tool signatures
pub mod typescript;

pub use builder::{compile_schema, compile_schema_with_order, GrammarBuilder};
pub use chat_template::{discover_framing, ChatFormat, ChatTemplate, Framing, TemplateRenderer};
pub use config::ProtocolConfig;
pub use error::{PatternError, RestringirError, Result, SchemaError};
pub use grammar::{Grammar, GrammarMatcher, PrimitiveKind, Rule};
pub use message::{FunctionCall, FunctionDef, Message, Role, Tool, ToolCall};
pub use prompting::{make_tools_prompt, PromptingStyle};
pub use schema::Schema;
pub use tool_call::{build_tool_protocol, ChatHandler, ResponseParser};
