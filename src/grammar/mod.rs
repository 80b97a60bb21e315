//! GBNF grammar construction
//!
//! A [`Grammar`] is an insertion-ordered table of named [`Rule`]s that
//! renders as one `name ::= expr` line per rule. Rules are optimised on
//! insertion and deduplicated by (requested name, rule): asking for the same
//! production under the same name twice yields the same reference, while a
//! different production under a taken name gets a numeric suffix.
//!
//! Reference: llama.cpp grammar implementation
//! - GBNF format: Backus-Naur Form with extensions
//! - Rule names: `[a-zA-Z0-9-]+`

pub mod matcher;
pub mod primitives;
pub mod rule;

pub use matcher::GrammarMatcher;
pub use primitives::PrimitiveKind;
pub use rule::{format_literal, RangeItem, Rule};

use crate::error::{RestringirError, Result};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::debug;

/// Name of the start rule
pub const ROOT_RULE_NAME: &str = "root";

// =============================================================================
// RULE TABLE
// =============================================================================

/// Ordered table of named grammar rules
#[derive(Debug, Clone)]
pub struct Grammar {
    rules: Vec<(String, Rule)>,
    positions: HashMap<String, usize>,
    assigned: HashMap<(String, Rule), String>,
    primitives: HashSet<PrimitiveKind>,
}

impl Default for Grammar {
    fn default() -> Self {
        Self::new()
    }
}

impl Grammar {
    /// Create a table holding only the `space` rule
    pub fn new() -> Self {
        let mut grammar = Self {
            rules: Vec::new(),
            positions: HashMap::new(),
            assigned: HashMap::new(),
            primitives: HashSet::new(),
        };
        grammar.insert(primitives::SPACE.to_string(), primitives::space_rule());
        grammar
    }

    /// Register `rule` under a name derived from `name`.
    ///
    /// The name is sanitised first. If this exact (name, rule) pair was
    /// registered before, the earlier reference is returned. Otherwise the
    /// first free name among `name`, `name1`, `name2`, ... is taken. Reserved
    /// primitive names and `root` always count as taken; the start rule is
    /// defined through [`Grammar::add_root`].
    ///
    /// Returns a [`Rule::Named`] reference to the stored rule.
    pub fn add_rule(&mut self, name: &str, rule: Rule) -> Rule {
        let rule = rule.optimize();
        let base = sanitize_rule_name(name);
        let key = (base, rule);

        if let Some(existing) = self.assigned.get(&key) {
            debug!(rule = %existing, "reusing identical rule");
            return Rule::named(existing.clone());
        }

        let (base, rule) = key;
        let mut assigned = base.clone();
        let mut suffix = 1usize;
        while self.is_taken(&assigned) {
            assigned = format!("{base}{suffix}");
            suffix += 1;
        }
        if assigned != base {
            debug!(requested = %base, assigned = %assigned, "disambiguated rule name");
        }

        self.assigned.insert((base, rule.clone()), assigned.clone());
        self.insert(assigned.clone(), rule);
        Rule::named(assigned)
    }

    /// Define the start rule, replacing any earlier definition
    pub fn add_root(&mut self, rule: Rule) -> Rule {
        let rule = rule.optimize();
        match self.positions.get(ROOT_RULE_NAME) {
            Some(&i) => self.rules[i].1 = rule,
            None => self.insert(ROOT_RULE_NAME.to_string(), rule),
        }
        Rule::named(ROOT_RULE_NAME)
    }

    /// Make sure the canonical production for `kind` and everything it
    /// references is defined; returns a reference to it
    pub fn ensure_primitive(&mut self, kind: PrimitiveKind) -> Rule {
        if self.primitives.insert(kind) {
            for dep in kind.dependencies() {
                self.ensure_primitive(*dep);
            }
            self.insert(kind.name().to_string(), kind.production().optimize());
        }
        Rule::named(kind.name())
    }

    fn insert(&mut self, name: String, rule: Rule) {
        self.positions.insert(name.clone(), self.rules.len());
        self.rules.push((name, rule));
    }

    fn is_taken(&self, name: &str) -> bool {
        self.positions.contains_key(name)
            || name == ROOT_RULE_NAME
            || name == primitives::SPACE
            || PrimitiveKind::from_name(name).is_some()
    }

    /// Look up a rule by its assigned name
    pub fn get_rule(&self, name: &str) -> Option<&Rule> {
        self.positions.get(name).map(|&i| &self.rules[i].1)
    }

    /// Whether a rule with this name is defined
    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    /// Rules in insertion order
    pub fn rules(&self) -> impl Iterator<Item = (&str, &Rule)> {
        self.rules.iter().map(|(name, rule)| (name.as_str(), rule))
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Validate grammar structure
    ///
    /// # Errors
    ///
    /// Returns error if the root rule is missing or a rule references an
    /// undefined rule
    pub fn validate(&self) -> Result<()> {
        if !self.contains(ROOT_RULE_NAME) {
            return Err(RestringirError::InvalidConfiguration(format!(
                "Root rule '{ROOT_RULE_NAME}' not found in grammar"
            )));
        }

        for (name, rule) in self.rules() {
            for reference in rule.references() {
                if !self.contains(reference) {
                    return Err(RestringirError::InvalidConfiguration(format!(
                        "Rule '{name}' references undefined rule '{reference}'"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Render the table as GBNF text, one rule per line
    pub fn format_grammar(&self) -> String {
        self.rules
            .iter()
            .map(|(name, rule)| format!("{name} ::= {rule}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Recogniser over this table
    pub fn matcher(&self) -> GrammarMatcher<'_> {
        GrammarMatcher::new(self)
    }
}

impl fmt::Display for Grammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_grammar())
    }
}

/// Replace every run of characters outside `[a-zA-Z0-9-]` with a single `-`
pub fn sanitize_rule_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_run = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '-' {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('-');
            in_run = true;
        }
    }
    out
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_grammar_has_space() {
        let grammar = Grammar::new();
        assert_eq!(grammar.len(), 1);
        assert_eq!(grammar.format_grammar(), r#"space ::= " "?"#);
    }

    #[test]
    fn test_sanitize_rule_name() {
        assert_eq!(sanitize_rule_name("get_weather"), "get-weather");
        assert_eq!(sanitize_rule_name("a  b__c"), "a-b-c");
        assert_eq!(sanitize_rule_name("kebab-case-1"), "kebab-case-1");
        assert_eq!(sanitize_rule_name("ünï"), "-n-");
    }

    #[test]
    fn test_add_rule_dedups_identical() {
        let mut grammar = Grammar::new();
        let a = grammar.add_rule("x", Rule::literal("a"));
        let b = grammar.add_rule("x", Rule::literal("a"));
        assert_eq!(a, b);
        assert_eq!(grammar.len(), 2);
    }

    #[test]
    fn test_add_rule_suffixes_conflicts() {
        let mut grammar = Grammar::new();
        assert_eq!(grammar.add_rule("x", Rule::literal("a")), Rule::named("x"));
        assert_eq!(grammar.add_rule("x", Rule::literal("b")), Rule::named("x1"));
        assert_eq!(grammar.add_rule("x", Rule::literal("c")), Rule::named("x2"));
        assert_eq!(grammar.add_rule("x", Rule::literal("b")), Rule::named("x1"));
    }

    #[test]
    fn test_add_rule_dedup_is_name_keyed() {
        let mut grammar = Grammar::new();
        grammar.add_rule("x", Rule::literal("a"));
        assert_eq!(grammar.add_rule("y", Rule::literal("a")), Rule::named("y"));
    }

    #[test]
    fn test_reserved_names_are_taken() {
        let mut grammar = Grammar::new();
        assert_eq!(grammar.add_rule("string", Rule::literal("s")), Rule::named("string1"));
        assert_eq!(grammar.add_rule("space", Rule::literal("s")), Rule::named("space1"));
        assert_eq!(grammar.add_rule("root", Rule::literal("s")), Rule::named("root1"));
    }

    #[test]
    fn test_add_root_keeps_start_rule_name() {
        let mut grammar = Grammar::new();
        assert_eq!(grammar.add_rule("root", Rule::literal("1")), Rule::named("root1"));
        assert_eq!(grammar.add_root(Rule::named("root1")), Rule::named("root"));
        assert_eq!(grammar.add_root(Rule::literal("2")), Rule::named("root"));
        assert_eq!(grammar.get_rule("root"), Some(&Rule::literal("2")));
        assert_eq!(grammar.rules().filter(|(name, _)| *name == "root").count(), 1);
    }

    #[test]
    fn test_add_rule_optimizes() {
        let mut grammar = Grammar::new();
        grammar.add_root(Rule::Sequence(vec![Rule::literal("a"), Rule::literal("b")]));
        assert_eq!(grammar.get_rule("root"), Some(&Rule::literal("ab")));
    }

    #[test]
    fn test_ensure_primitive_closure() {
        let mut grammar = Grammar::new();
        grammar.ensure_primitive(PrimitiveKind::Object);
        for name in ["space", "object", "array", "string", "number", "boolean", "null", "value"] {
            assert!(grammar.contains(name), "missing {name}");
        }
        let len = grammar.len();
        grammar.ensure_primitive(PrimitiveKind::Value);
        assert_eq!(grammar.len(), len);
    }

    #[test]
    fn test_validate_missing_root() {
        let grammar = Grammar::new();
        let err = grammar.validate().expect_err("no root");
        assert!(err.to_string().contains("Root rule"));
    }

    #[test]
    fn test_validate_undefined_reference() {
        let mut grammar = Grammar::new();
        grammar.add_root(Rule::named("ghost"));
        let err = grammar.validate().expect_err("undefined ref");
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_validate_ok() {
        let mut grammar = Grammar::new();
        let b = grammar.ensure_primitive(PrimitiveKind::Boolean);
        grammar.add_root(b);
        grammar.validate().expect("test");
    }

    #[test]
    fn test_format_one_line_per_rule() {
        let mut grammar = Grammar::new();
        grammar.add_root(Rule::Sequence(vec![Rule::literal("x"), primitives::space()]));
        assert_eq!(
            grammar.to_string(),
            "space ::= \" \"?\nroot ::= \"x\" space"
        );
    }
}
