//! Property-based tests using proptest
//!
//! Tests invariants of the rule algebra, the rule table and the compiler:
//! - `optimize()` is a fixed point
//! - Rule-table dedup and name disambiguation
//! - Property ordering independent of declaration order
//! - Generated documents match the grammar compiled from their schema
//! - Tool-call envelopes parse back to the calls they encode

use proptest::prelude::*;
use restringir::grammar::{sanitize_rule_name, Grammar, RangeItem, Rule};
use restringir::pattern::compile_pattern;
use restringir::{compile_schema_with_order, GrammarBuilder, ResponseParser, Schema};
use serde_json::{json, Value};
use std::collections::HashMap;

// ============================================================================
// STRATEGIES
// ============================================================================

fn leaf_rule() -> impl Strategy<Value = Rule> {
    prop_oneof![
        "[a-c]{0,3}".prop_map(Rule::literal),
        prop::sample::select(vec!["space", "string", "x-y"]).prop_map(Rule::named),
        (any::<bool>(), prop::collection::vec(prop::char::range('a', 'e'), 1..3)).prop_map(|(negated, chars)| {
            let items = chars.into_iter().map(RangeItem::Char).collect();
            if negated {
                Rule::not_range(items)
            } else {
                Rule::range(items)
            }
        }),
    ]
}

fn rule_tree() -> impl Strategy<Value = Rule> {
    leaf_rule().prop_recursive(4, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Rule::Union),
            prop::collection::vec(inner.clone(), 0..4).prop_map(Rule::Sequence),
            (inner.clone(), 0usize..3, prop::option::of(0usize..3))
                .prop_map(|(rule, min, extra)| Rule::repeat(rule, min, extra.map(|e| min + e))),
            inner.prop_map(Rule::group),
        ]
    })
}

fn word() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ]{0,12}"
}

// ============================================================================
// RULE ALGEBRA
// ============================================================================

proptest! {
    /// Optimising an optimised rule changes nothing
    #[test]
    fn prop_optimize_is_idempotent(rule in rule_tree()) {
        let once = rule.optimize();
        prop_assert_eq!(once.optimize(), once);
    }

    /// Sanitised names only use the GBNF name alphabet and are stable
    #[test]
    fn prop_sanitize_rule_name(name in "\\PC{0,16}") {
        let sanitized = sanitize_rule_name(&name);
        prop_assert!(sanitized.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
        prop_assert_eq!(sanitize_rule_name(&sanitized), sanitized.clone());
    }

    /// Identical (name, rule) pairs share one entry; different rules under
    /// the same name get distinct suffixed names
    #[test]
    fn prop_rule_table_dedup(name in "[a-z]{1,8}", a in "[a-z]{1,4}", b in "[0-9]{1,4}") {
        let mut grammar = Grammar::new();
        let first = grammar.add_rule(&name, Rule::literal(a.as_str()));
        let again = grammar.add_rule(&name, Rule::literal(a.as_str()));
        let other = grammar.add_rule(&name, Rule::literal(b.as_str()));
        prop_assert_eq!(&first, &again);
        prop_assert_ne!(&first, &other);
        prop_assert_eq!(grammar.len(), 3);
    }
}

// ============================================================================
// SCHEMA COMPILATION
// ============================================================================

proptest! {
    /// Declaration order of properties does not affect the emitted sequence
    /// when every property has a priority
    #[test]
    fn prop_prop_order_independent_of_declaration(
        names in Just(vec!["alpha", "beta", "gamma", "delta"]).prop_shuffle()
    ) {
        let properties: serde_json::Map<String, Value> =
            names.iter().map(|n| ((*n).to_string(), json!({"type": "integer"}))).collect();
        let schema = json!({"type": "object", "properties": properties, "required": names});
        let order = HashMap::from([
            ("delta".to_string(), 0),
            ("beta".to_string(), 1),
            ("alpha".to_string(), 2),
            ("gamma".to_string(), 3),
        ]);
        let grammar = compile_schema_with_order(&schema, order).expect("compiles");
        let root = grammar.lines().find(|l| l.starts_with("root ::= ")).expect("root");
        prop_assert_eq!(
            root,
            r#"root ::= "{" space delta-kv "," space beta-kv "," space alpha-kv "," space gamma-kv "}" space"#
        );
    }

    /// Listed properties sort by priority and declaration index; unlisted
    /// ones follow in declaration order, whatever the priority values
    #[test]
    fn prop_sparse_prop_order(
        priorities in prop::collection::vec(prop::option::of(0usize..1_000_000), 4)
    ) {
        let names = ["alpha", "beta", "gamma", "delta"];
        let properties: serde_json::Map<String, Value> =
            names.iter().map(|n| ((*n).to_string(), json!({"type": "integer"}))).collect();
        let schema = json!({"type": "object", "properties": properties, "required": names});
        let order: HashMap<String, usize> = names
            .iter()
            .zip(&priorities)
            .filter_map(|(name, priority)| priority.map(|p| ((*name).to_string(), p)))
            .collect();

        let mut expected: Vec<(usize, usize, &str)> = names
            .iter()
            .zip(&priorities)
            .enumerate()
            .map(|(index, (name, priority))| (priority.unwrap_or(usize::MAX), index, *name))
            .collect();
        expected.sort_unstable();
        let body = expected
            .iter()
            .map(|(_, _, name)| format!("{name}-kv"))
            .collect::<Vec<_>>()
            .join(" \",\" space ");

        let grammar = compile_schema_with_order(&schema, order).expect("compiles");
        let root = grammar.lines().find(|l| l.starts_with("root ::= ")).expect("root");
        prop_assert_eq!(root.to_string(), format!("root ::= \"{{\" space {body} \"}}\" space"));
    }

    /// Documents valid for a mixed schema match its grammar
    #[test]
    fn prop_valid_documents_match(
        name in word(),
        age in any::<i32>(),
        score in prop::option::of(-1.0e6f64..1.0e6),
        tags in prop::collection::vec(prop::sample::select(vec!["red", "green", "blue"]), 0..4),
        pretty in any::<bool>(),
    ) {
        let schema = json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "age": {"type": "integer"},
                "score": {"type": "number"},
                "tags": {"type": "array", "items": {"enum": ["red", "green", "blue"]}}
            },
            "required": ["name", "age", "tags"]
        });
        let mut document = serde_json::Map::new();
        document.insert("name".to_string(), json!(name));
        document.insert("age".to_string(), json!(age));
        document.insert("tags".to_string(), json!(tags));
        // optional properties follow the required ones
        if let Some(score) = score {
            document.insert("score".to_string(), json!(score));
        }
        let text = if pretty {
            // single spaces after separators only
            serde_json::to_string(&document).expect("json").replace(",\"", ", \"").replace("\":", "\": ")
        } else {
            serde_json::to_string(&document).expect("json")
        };

        let mut builder = GrammarBuilder::new();
        builder.visit(&Schema::from_value(&schema).expect("schema"), "").expect("visit");
        let grammar = builder.into_grammar();
        prop_assert!(grammar.matcher().accepts(&text), "{} not accepted by\n{}", text, grammar);
    }

    /// Strings matching an anchored pattern match its compiled rule
    #[test]
    fn prop_pattern_accepts_matching_strings(text in "[a-z]{2,4}-[0-9]{1,5}(x|yz)?") {
        let mut grammar = Grammar::new();
        let rule = compile_pattern(r"^[a-z]{2,4}-\d+(?:x|yz)?$").expect("pattern");
        grammar.add_root(rule);
        prop_assert!(grammar.matcher().accepts(&text));
    }
}

// ============================================================================
// TOOL-CALL PARSING
// ============================================================================

proptest! {
    /// Text and tag-wrapped calls parse back to their parts
    #[test]
    fn prop_tool_call_tags_round_trip(
        before in "[a-zA-Z ]{0,20}",
        name in "[a-z]{1,6}(_[a-z]{1,6})?",
        location in word(),
    ) {
        let call = json!({"name": name, "arguments": {"location": location}});
        let completion = format!("{before}<tool_call>{call}</tool_call>");
        let parser = ResponseParser::ToolCallTags { suffix: String::new() };
        let message = parser.parse(&completion).expect("parses");

        let expected_content = before.trim();
        prop_assert_eq!(message.content.as_deref(), (!expected_content.is_empty()).then_some(expected_content));
        prop_assert_eq!(message.tool_calls().len(), 1);
        prop_assert_eq!(&message.tool_calls()[0].function.name, &name);
        prop_assert_eq!(
            message.tool_calls()[0].function.parse_arguments().expect("json"),
            json!({"location": location})
        );
    }
}
