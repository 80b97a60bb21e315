//! Protocol configuration
//!
//! Knobs for building a chat handler. Every field has a default, so an empty
//! JSON object is a valid configuration.

use crate::error::{RestringirError, Result};
use crate::prompting::PromptingStyle;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Sentinel planted in an assistant message to recover template framing
pub const DEFAULT_DELIMITER: &str = "<%$[SAMPLE]$%>";

/// User message rendered during framing discovery
pub const DEFAULT_SENTINEL_USER_MESSAGE: &str = "Hey";

/// Configuration for [`crate::tool_call::build_tool_protocol`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Prompting style; detected from the chat template when `None`
    pub style: Option<PromptingStyle>,
    /// Allow several tool calls in one completion
    pub parallel_calls: bool,
    /// Property priority for objects; lower sorts first
    pub prop_order: HashMap<String, usize>,
    /// Framing discovery sentinel
    pub delimiter: String,
    /// User message used during framing discovery
    pub sentinel_user_message: String,
    /// Indentation of JSON tool listings in system prompts
    pub tools_indent: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            style: None,
            parallel_calls: false,
            prop_order: HashMap::new(),
            delimiter: DEFAULT_DELIMITER.to_string(),
            sentinel_user_message: DEFAULT_SENTINEL_USER_MESSAGE.to_string(),
            tools_indent: 2,
        }
    }
}

impl ProtocolConfig {
    /// Default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from JSON text
    ///
    /// # Errors
    ///
    /// Returns `RestringirError::InvalidConfiguration` if the text is not a
    /// valid configuration
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| RestringirError::InvalidConfiguration(format!("Invalid protocol config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check field constraints
    ///
    /// # Errors
    ///
    /// Returns `RestringirError::InvalidConfiguration` if the delimiter is empty
    pub fn validate(&self) -> Result<()> {
        if self.delimiter.is_empty() {
            return Err(RestringirError::InvalidConfiguration(
                "Framing delimiter must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Force a prompting style
    #[must_use]
    pub fn with_style(mut self, style: PromptingStyle) -> Self {
        self.style = Some(style);
        self
    }

    /// Allow or forbid parallel tool calls
    #[must_use]
    pub fn with_parallel_calls(mut self, parallel_calls: bool) -> Self {
        self.parallel_calls = parallel_calls;
        self
    }

    /// Set the property priority map
    #[must_use]
    pub fn with_prop_order(mut self, prop_order: HashMap<String, usize>) -> Self {
        self.prop_order = prop_order;
        self
    }

    /// Set the framing discovery sentinel
    #[must_use]
    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    /// Set the user message used during framing discovery
    #[must_use]
    pub fn with_sentinel_user_message(mut self, message: impl Into<String>) -> Self {
        self.sentinel_user_message = message.into();
        self
    }

    /// Set the JSON indentation of tool listings
    #[must_use]
    pub fn with_tools_indent(mut self, indent: usize) -> Self {
        self.tools_indent = indent;
        self
    }
}
