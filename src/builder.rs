//! Schema to grammar builder
//!
//! [`GrammarBuilder::visit`] walks a [`Schema`] tree and registers one named
//! rule per node in a [`Grammar`]. Names follow the `parent-key` path of the
//! node in the document, so the emitted grammar reads like the schema it was
//! built from.
//!
//! Objects are the interesting case. Required properties are emitted in a
//! fixed order. Optional properties may each be present or absent but are
//! never reordered; instead of enumerating every subset, each optional
//! property gets a `<name>-rest` rule accepting any valid tail after it.

use crate::error::Result;
use crate::grammar::{primitives, Grammar, PrimitiveKind, RangeItem, Rule};
use crate::pattern::compile_pattern;
use crate::schema::{ObjectSchema, Schema};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Rule name of a child node: `key` at the top level, `parent-key` below
pub fn sub_name(name: &str, key: &str) -> String {
    if name.is_empty() {
        key.to_string()
    } else {
        format!("{name}-{key}")
    }
}

fn lit_space(text: &str) -> [Rule; 2] {
    [Rule::literal(text), primitives::space()]
}

const JSON_ESCAPED: [(char, &str); 2] = [('"', "\\\""), ('\\', "\\\\")];

/// Rewrite a rule over decoded string characters into one over their JSON
/// encoding: `"` and `\` only ever appear escaped
fn json_string_body(rule: &Rule) -> Rule {
    match rule {
        Rule::Literal(text) => {
            let mut out = String::with_capacity(text.len());
            for c in text.chars() {
                match JSON_ESCAPED.iter().find(|(raw, _)| *raw == c) {
                    Some((_, escaped)) => out.push_str(escaped),
                    None => out.push(c),
                }
            }
            Rule::Literal(out)
        },
        Rule::CharRange { negated: true, items } => {
            let mut excluded = items.clone();
            let mut alternatives = Vec::new();
            for (raw, escaped) in JSON_ESCAPED {
                if !items.iter().any(|item| item.contains(raw)) {
                    excluded.push(RangeItem::Char(raw));
                    alternatives.push(Rule::literal(escaped));
                }
            }
            if alternatives.is_empty() {
                return rule.clone();
            }
            alternatives.insert(0, Rule::not_range(excluded));
            Rule::Union(alternatives)
        },
        Rule::CharRange { negated: false, items } => {
            let present: Vec<&str> = JSON_ESCAPED
                .iter()
                .filter(|(raw, _)| items.iter().any(|item| item.contains(*raw)))
                .map(|(_, escaped)| *escaped)
                .collect();
            if present.is_empty() {
                return rule.clone();
            }
            let mut remaining = items.clone();
            for (raw, _) in JSON_ESCAPED {
                remaining = remaining.into_iter().flat_map(|item| carve(item, raw)).collect();
            }
            let mut alternatives = Vec::with_capacity(present.len() + 1);
            if !remaining.is_empty() {
                alternatives.push(Rule::range(remaining));
            }
            alternatives.extend(present.into_iter().map(Rule::literal));
            Rule::Union(alternatives)
        },
        Rule::Union(rules) => Rule::Union(rules.iter().map(json_string_body).collect()),
        Rule::Sequence(rules) => Rule::Sequence(rules.iter().map(json_string_body).collect()),
        Rule::Repeat { inner, min, max } => Rule::repeat(json_string_body(inner), *min, *max),
        Rule::Group(inner) => Rule::group(json_string_body(inner)),
        Rule::Named(_) => rule.clone(),
    }
}

// `item` without `c`, split around it when `c` falls inside a span
fn carve(item: RangeItem, c: char) -> Vec<RangeItem> {
    match item {
        RangeItem::Char(x) if x == c => Vec::new(),
        RangeItem::Span(lo, hi) if lo <= c && c <= hi => {
            let mut out = Vec::with_capacity(2);
            if let Some(below) = char::from_u32(u32::from(c) - 1).filter(|_| lo < c) {
                out.push(if lo == below { RangeItem::Char(lo) } else { RangeItem::Span(lo, below) });
            }
            if let Some(above) = char::from_u32(u32::from(c) + 1).filter(|_| c < hi) {
                out.push(if above == hi { RangeItem::Char(hi) } else { RangeItem::Span(above, hi) });
            }
            out
        },
        other => vec![other],
    }
}

/// Walks schemas into a rule table
#[derive(Debug, Clone, Default)]
pub struct GrammarBuilder {
    grammar: Grammar,
    prop_order: HashMap<String, usize>,
}

impl GrammarBuilder {
    /// Create a builder with an empty rule table
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the property priority map; unlisted properties sort last
    #[must_use]
    pub fn with_prop_order(mut self, prop_order: HashMap<String, usize>) -> Self {
        self.prop_order = prop_order;
        self
    }

    /// Register a rule directly
    pub fn add_rule(&mut self, name: &str, rule: Rule) -> Rule {
        self.grammar.add_rule(name, rule)
    }

    /// Define the start rule
    pub fn add_root(&mut self, rule: Rule) -> Rule {
        self.grammar.add_root(rule)
    }

    // Empty `name` is the document root
    fn register(&mut self, name: &str, rule: Rule) -> Rule {
        if name.is_empty() {
            self.add_root(rule)
        } else {
            self.add_rule(name, rule)
        }
    }

    /// Reference to a primitive production, defining it on first use
    pub fn primitive(&mut self, kind: PrimitiveKind) -> Rule {
        self.grammar.ensure_primitive(kind)
    }

    /// Rule table built so far
    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    /// Consume the builder, returning its rule table
    pub fn into_grammar(self) -> Grammar {
        self.grammar
    }

    /// Render the rule table as GBNF text
    pub fn format_grammar(&self) -> String {
        self.grammar.format_grammar()
    }

    /// Register rules for `schema` under `name` and return a reference.
    ///
    /// An empty `name` denotes the document root and registers `root`.
    ///
    /// # Errors
    ///
    /// Returns error if a `pattern` can not be compiled
    pub fn visit(&mut self, schema: &Schema, name: &str) -> Result<Rule> {
        match schema {
            Schema::Union(alternatives) => {
                let mut rules = Vec::with_capacity(alternatives.len());
                for (i, alternative) in alternatives.iter().enumerate() {
                    let alt_name = if name.is_empty() {
                        format!("alternative-{i}")
                    } else {
                        format!("{name}-{i}")
                    };
                    rules.push(self.visit(alternative, &alt_name)?);
                }
                Ok(self.register(name, Rule::Union(rules)))
            },
            Schema::Const(value) => {
                let rule = Rule::Sequence(lit_space(&value.to_string()).to_vec());
                Ok(self.register(name, rule))
            },
            Schema::Object(object) => {
                let rule = if object.properties.is_empty() {
                    self.map_object_rule(object, name)?
                } else {
                    self.object_rule(object, name)?
                };
                Ok(self.register(name, rule))
            },
            Schema::Tuple(items) => {
                let mut parts = lit_space("[").to_vec();
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        parts.extend(lit_space(","));
                    }
                    parts.push(self.visit(item, &sub_name(name, &i.to_string()))?);
                }
                parts.extend(lit_space("]"));
                Ok(self.register(name, Rule::Sequence(parts)))
            },
            Schema::Array {
                item,
                min_items,
                max_items,
            } => {
                let item = self.visit(item, &sub_name(name, "item"))?;
                let mut parts = lit_space("[").to_vec();
                if *max_items != Some(0) {
                    let list = Rule::Sequence(vec![
                        item.clone(),
                        Rule::repeat(
                            Rule::Sequence(vec![Rule::literal(","), primitives::space(), item]),
                            min_items.saturating_sub(1),
                            max_items.map(|max| max - 1),
                        ),
                    ]);
                    parts.push(if *min_items == 0 { Rule::optional(list) } else { list });
                }
                parts.extend(lit_space("]"));
                Ok(self.register(name, Rule::Sequence(parts)))
            },
            Schema::Pattern(pattern) => {
                let body = json_string_body(&compile_pattern(pattern)?);
                let rule = Rule::Sequence(vec![
                    Rule::literal("\""),
                    body,
                    Rule::literal("\""),
                    primitives::space(),
                ]);
                Ok(self.register(name, rule))
            },
            Schema::Primitive(kind) => {
                let reference = self.primitive(*kind);
                if name.is_empty() {
                    Ok(self.add_root(reference))
                } else {
                    Ok(reference)
                }
            },
        }
    }

    fn sorted_properties<'p, T>(&self, properties: &'p [(String, T)]) -> Vec<&'p (String, T)> {
        let mut sorted: Vec<(usize, &(String, T))> = properties.iter().enumerate().collect();
        sorted.sort_by_key(|(index, (prop, _))| {
            (self.prop_order.get(prop).copied().unwrap_or(usize::MAX), *index)
        });
        sorted.into_iter().map(|(_, entry)| entry).collect()
    }

    fn object_rule(&mut self, object: &ObjectSchema, name: &str) -> Result<Rule> {
        let mut values = Vec::with_capacity(object.properties.len());
        for (prop, prop_schema) in &object.properties {
            values.push((prop.clone(), self.visit(prop_schema, &sub_name(name, prop))?));
        }
        Ok(self.object_of(name, &values, &object.required))
    }

    /// Object rule over property values that are already rules, given in
    /// declaration order. Key-value rules are registered under `name`; the
    /// object rule itself is returned unregistered.
    pub fn object_of(&mut self, name: &str, properties: &[(String, Rule)], required: &HashSet<String>) -> Rule {
        let mut kv_rules = HashMap::with_capacity(properties.len());
        for (prop, value) in properties {
            let mut parts = lit_space(&Value::String(prop.clone()).to_string()).to_vec();
            parts.extend(lit_space(":"));
            parts.push(value.clone());
            let kv = self.add_rule(&sub_name(name, &format!("{prop}-kv")), Rule::Sequence(parts));
            kv_rules.insert(prop.as_str(), kv);
        }

        let mut leading = Vec::new();
        let mut optional = Vec::new();
        for (prop, _) in self.sorted_properties(properties) {
            let kv = kv_rules[prop.as_str()].clone();
            if required.contains(prop) {
                leading.push(kv);
            } else {
                optional.push((prop.clone(), kv));
            }
        }

        let mut parts = lit_space("{").to_vec();
        for (i, kv) in leading.iter().enumerate() {
            if i > 0 {
                parts.extend(lit_space(","));
            }
            parts.push(kv.clone());
        }

        if !optional.is_empty() {
            let combinations = Rule::Union(
                (0..optional.len())
                    .map(|i| self.optional_tail(name, &optional[i..], false))
                    .collect(),
            );
            let sub = if leading.is_empty() {
                combinations
            } else {
                let mut sub = lit_space(",").to_vec();
                sub.push(combinations);
                Rule::Sequence(sub)
            };
            parts.push(Rule::optional(sub));
        }

        parts.extend(lit_space("}"));
        Rule::Sequence(parts)
    }

    // Accepts `props[0]` (comma-led when `first_is_optional`) followed by any
    // in-order subset of the remaining properties
    fn optional_tail(&mut self, name: &str, props: &[(String, Rule)], first_is_optional: bool) -> Rule {
        let Some(((prop, kv), rest)) = props.split_first() else {
            return Rule::Sequence(Vec::new());
        };
        let head = if first_is_optional {
            let mut sub = lit_space(",").to_vec();
            sub.push(kv.clone());
            Rule::optional(Rule::Sequence(sub))
        } else {
            kv.clone()
        };
        if rest.is_empty() {
            return head;
        }
        let tail = self.optional_tail(name, rest, true);
        let tail = self.add_rule(&sub_name(name, &format!("{prop}-rest")), tail);
        Rule::Sequence(vec![head, tail])
    }

    fn map_object_rule(&mut self, object: &ObjectSchema, name: &str) -> Result<Rule> {
        let mut parts = lit_space("{").to_vec();
        if let Some(additional) = &object.additional {
            let value = self.visit(additional, &sub_name(name, "additional-value"))?;
            let key = self.primitive(PrimitiveKind::String);
            let mut kv = vec![key];
            kv.extend(lit_space(":"));
            kv.push(value);
            let kv = self.add_rule(&sub_name(name, "additional-kv"), Rule::Sequence(kv));
            let mut more = lit_space(",").to_vec();
            more.push(kv.clone());
            parts.push(Rule::optional(Rule::Sequence(vec![
                kv,
                Rule::star(Rule::Sequence(more)),
            ])));
        }
        parts.extend(lit_space("}"));
        Ok(Rule::Sequence(parts))
    }
}

/// Compile a schema document to GBNF text
///
/// # Errors
///
/// Returns error if the document falls outside the supported subset
pub fn compile_schema(document: &Value) -> Result<String> {
    compile_schema_with_order(document, HashMap::new())
}

/// Compile a schema document to GBNF text with a property priority map
///
/// # Errors
///
/// Returns error if the document falls outside the supported subset
pub fn compile_schema_with_order(document: &Value, prop_order: HashMap<String, usize>) -> Result<String> {
    let schema = Schema::from_value(document)?;
    let mut builder = GrammarBuilder::new().with_prop_order(prop_order);
    builder.visit(&schema, "")?;
    builder.grammar().validate()?;
    Ok(builder.format_grammar())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule_line<'g>(grammar: &'g str, name: &str) -> &'g str {
        let prefix = format!("{name} ::= ");
        grammar
            .lines()
            .find_map(|line| line.strip_prefix(prefix.as_str()))
            .unwrap_or_else(|| panic!("no rule {name} in\n{grammar}"))
    }

    fn compile(document: Value) -> String {
        compile_schema(&document).expect("test")
    }

    #[test]
    fn test_required_const_property() {
        let grammar = compile(json!({
            "type": "object",
            "properties": {"success": {"type": "boolean", "const": true}},
            "required": ["success"]
        }));
        assert_eq!(rule_line(&grammar, "success"), r#""true" space"#);
        assert_eq!(rule_line(&grammar, "success-kv"), r#""\"success\"" space ":" space success"#);
        assert_eq!(rule_line(&grammar, "root"), r#""{" space success-kv "}" space"#);
    }

    #[test]
    fn test_prop_order() {
        let document = json!({
            "type": "object",
            "properties": {"a": {"type": "string"}, "b": {"type": "string"}, "c": {"type": "string"}},
            "required": ["a", "b", "c"]
        });
        let order = HashMap::from([("b".to_string(), 0), ("a".to_string(), 1)]);
        let grammar = compile_schema_with_order(&document, order).expect("test");
        assert_eq!(
            rule_line(&grammar, "root"),
            r#""{" space b-kv "," space a-kv "," space c-kv "}" space"#
        );
    }

    #[test]
    fn test_sparse_prop_order_puts_unlisted_last() {
        let document = json!({
            "type": "object",
            "properties": {"a": {"type": "string"}, "b": {"type": "string"}, "c": {"type": "string"}},
            "required": ["a", "b", "c"]
        });
        let order = HashMap::from([("c".to_string(), 40), ("a".to_string(), 5)]);
        let grammar = compile_schema_with_order(&document, order).expect("test");
        assert_eq!(
            rule_line(&grammar, "root"),
            r#""{" space a-kv "," space c-kv "," space b-kv "}" space"#
        );
    }

    #[test]
    fn test_property_named_root() {
        let schema = Schema::from_value(&json!({
            "type": "object",
            "properties": {"root": {"const": 1}},
            "required": ["root"]
        }))
        .expect("test");
        let mut builder = GrammarBuilder::new();
        assert_eq!(builder.visit(&schema, "").expect("test"), Rule::named("root"));
        let grammar = builder.format_grammar();
        assert_eq!(rule_line(&grammar, "root1"), r#""1" space"#);
        assert_eq!(rule_line(&grammar, "root"), r#""{" space root-kv "}" space"#);
        let matcher = builder.grammar().matcher();
        assert!(matcher.accepts(r#"{"root": 1}"#));
        assert!(!matcher.accepts("1"));
    }

    #[test]
    fn test_optional_combinations() {
        let grammar = compile(json!({
            "type": "object",
            "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}, "c": {"type": "integer"}}
        }));
        assert_eq!(rule_line(&grammar, "b-rest"), r#"("," space c-kv)?"#);
        assert_eq!(rule_line(&grammar, "a-rest"), r#"("," space b-kv)? b-rest"#);
        assert_eq!(rule_line(&grammar, "root"), r#""{" space (a-kv a-rest | b-kv b-rest | c-kv)? "}" space"#);
    }

    #[test]
    fn test_required_then_optional() {
        let grammar = compile(json!({
            "type": "object",
            "properties": {"id": {"type": "integer"}, "note": {"type": "string"}},
            "required": ["id"]
        }));
        assert_eq!(rule_line(&grammar, "root"), r#""{" space id-kv ("," space note-kv)? "}" space"#);
    }

    #[test]
    fn test_nested_names() {
        let grammar = compile(json!({
            "type": "object",
            "properties": {"location": {
                "type": "object",
                "properties": {"city": {"enum": ["Paris", "Rome"]}},
                "required": ["city"]
            }},
            "required": ["location"]
        }));
        assert_eq!(rule_line(&grammar, "location-city-0"), r#""\"Paris\"" space"#);
        assert_eq!(rule_line(&grammar, "location-city"), "location-city-0 | location-city-1");
        assert!(grammar.contains("location-city-kv ::= "));
        assert!(grammar.contains("location-kv ::= "));
    }

    #[test]
    fn test_array_rule() {
        let grammar = compile(json!({"type": "array", "items": {"type": "number"}, "minItems": 1, "maxItems": 3}));
        assert_eq!(
            rule_line(&grammar, "root"),
            r#""[" space number ("," space number)? ("," space number)? "]" space"#
        );

        let grammar = compile(json!({"type": "array", "items": {"type": "string"}}));
        assert_eq!(rule_line(&grammar, "root"), r#""[" space (string ("," space string)*)? "]" space"#);
    }

    #[test]
    fn test_tuple_rule() {
        let grammar = compile(json!({"type": "array", "items": [{"type": "string"}, {"const": 1}]}));
        assert_eq!(rule_line(&grammar, "1"), r#""1" space"#);
        assert_eq!(rule_line(&grammar, "root"), r#""[" space string "," space 1 "]" space"#);
    }

    #[test]
    fn test_pattern_rule() {
        let grammar = compile(json!({"type": "string", "pattern": "^[A-Z]{2}$"}));
        assert_eq!(rule_line(&grammar, "root"), r#""\"" [A-Z] [A-Z] "\"" space"#);
    }

    #[test]
    fn test_pattern_body_is_json_escaped() {
        let grammar = compile(json!({"type": "string", "pattern": "^[^x]+$"}));
        assert_eq!(rule_line(&grammar, "root"), r#""\"" ([^x"\\] | "\\\"" | "\\\\")+ "\"" space"#);

        let schema = Schema::from_value(&json!({"type": "string", "pattern": "^[^x]+$"})).expect("test");
        let mut builder = GrammarBuilder::new();
        builder.visit(&schema, "").expect("test");
        let matcher = builder.grammar().matcher();
        assert!(matcher.accepts(r#""ab""#));
        assert!(matcher.accepts(r#""a\"b\\""#));
        assert!(!matcher.accepts(r#""a"b""#));
        assert!(!matcher.accepts(r#""axb""#));

        let grammar = compile(json!({"type": "string", "pattern": "^a\"[ -$]$"}));
        assert_eq!(rule_line(&grammar, "root"), r#""\"a\\\"" ([ -!#-$] | "\\\"") "\"" space"#);
    }

    #[test]
    fn test_unanchored_pattern_fails() {
        let err = compile_schema(&json!({"type": "string", "pattern": "abc"})).expect_err("unanchored");
        assert!(matches!(
            err,
            crate::error::RestringirError::Pattern(crate::error::PatternError::Unanchored { .. })
        ));
    }

    #[test]
    fn test_primitive_root_alias() {
        let grammar = compile(json!({"type": "string"}));
        assert_eq!(rule_line(&grammar, "root"), "string");
        assert!(grammar.starts_with("space ::= "));
    }

    #[test]
    fn test_map_object_rule() {
        let grammar = compile(json!({"type": "object", "additionalProperties": {"type": "integer"}}));
        assert_eq!(rule_line(&grammar, "additional-kv"), r#"string ":" space integer"#);
        assert_eq!(
            rule_line(&grammar, "root"),
            r#""{" space (additional-kv ("," space additional-kv)*)? "}" space"#
        );
    }

    #[test]
    fn test_same_fragment_is_deduplicated() {
        let mut builder = GrammarBuilder::new();
        let schema = Schema::from_value(&json!({"const": "x"})).expect("test");
        let first = builder.visit(&schema, "item").expect("test");
        let second = builder.visit(&schema, "item").expect("test");
        assert_eq!(first, second);

        let other = Schema::from_value(&json!({"const": "y"})).expect("test");
        assert_eq!(builder.visit(&other, "item").expect("test"), Rule::named("item1"));
    }
}
