//! Error types for schema compilation and the tool-call protocol
//!
//! Every failure is fatal to the operation that raised it. Nothing here is
//! coerced into a permissive default: a grammar that silently accepts more
//! than the schema allows defeats constrained decoding.

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, RestringirError>;

/// Failure while turning a JSON Schema document into a [`crate::schema::Schema`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// Schema shape outside the supported subset
    #[error("Unrecognized schema: {fragment}")]
    Unrecognized {
        /// Pretty-printed offending fragment
        fragment: String,
    },

    /// `$ref` that does not point inside the same document
    #[error("Unsupported ref {reference}")]
    UnsupportedRef {
        /// The `$ref` value
        reference: String,
    },

    /// Local `$ref` whose path does not exist in the document
    #[error("Error resolving ref {reference}: {segment} not found")]
    UnresolvedRef {
        /// The `$ref` value
        reference: String,
        /// First path segment that could not be followed
        segment: String,
    },

    /// `$ref` chain that leads back to itself
    #[error("Recursive ref {reference} is not supported")]
    RecursiveRef {
        /// The `$ref` value
        reference: String,
    },

    /// `properties` declared together with an open `additionalProperties`
    #[error("Object declares both properties and additionalProperties: {fragment}")]
    MixedAdditionalProperties {
        /// Pretty-printed offending fragment
        fragment: String,
    },

    /// Input that is not a JSON document at all
    #[error("Invalid schema document: {reason}")]
    InvalidDocument {
        /// Decoder message
        reason: String,
    },
}

/// Failure while compiling a `pattern` into a grammar rule
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    /// Pattern missing the leading `^` or trailing `$`
    #[error("Pattern must start with \"^\" and end with \"$\": {pattern}")]
    Unanchored {
        /// Offending pattern
        pattern: String,
    },

    /// Construct that can not be expressed as a grammar rule
    #[error("Unsupported pattern construct {construct:?} in {pattern}")]
    Unsupported {
        /// Offending pattern
        pattern: String,
        /// The construct, as written
        construct: String,
    },

    /// Malformed regular expression
    #[error("Error processing pattern {pattern} at {position}: {reason}")]
    Syntax {
        /// Offending pattern
        pattern: String,
        /// Character offset inside the pattern body
        position: usize,
        /// What went wrong
        reason: String,
    },
}

/// Crate-wide error
#[derive(Debug, Error)]
pub enum RestringirError {
    /// Schema could not be modelled
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Pattern could not be compiled
    #[error(transparent)]
    Pattern(#[from] PatternError),

    /// Chat template framing could not be recovered
    #[error("Incompatible chat template: {reason}")]
    TemplateIncompatibility {
        /// Why discovery failed
        reason: String,
    },

    /// Chat template failed to compile or render
    #[error("Template render error: {reason}")]
    TemplateRender {
        /// Engine message
        reason: String,
    },

    /// Model completion did not follow the expected envelope
    #[error("Failed to parse completion: {reason}\nFragment: {fragment}")]
    Parse {
        /// What went wrong
        reason: String,
        /// Raw offending substring
        fragment: String,
    },

    /// Bad configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl RestringirError {
    /// Build a [`RestringirError::Parse`] from a reason and the raw fragment
    pub fn parse(reason: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self::Parse {
            reason: reason.into(),
            fragment: fragment.into(),
        }
    }
}
