//! Rule algebra
//!
//! A [`Rule`] is the expression on the right-hand side of a `name ::= ...`
//! grammar line. Trees are built once, passed through [`Rule::optimize`] and
//! rendered with [`std::fmt::Display`] into GBNF text.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Write};

// =============================================================================
// RULE TYPES
// =============================================================================

/// Item of a character class
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RangeItem {
    /// Single character
    Char(char),
    /// Inclusive span `a-z`
    Span(char, char),
}

impl RangeItem {
    /// Whether `c` falls inside this item
    pub fn contains(&self, c: char) -> bool {
        match *self {
            RangeItem::Char(x) => x == c,
            RangeItem::Span(lo, hi) => lo <= c && c <= hi,
        }
    }
}

/// Grammar expression
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rule {
    /// Quoted literal text
    Literal(String),
    /// Character class `[...]` or `[^...]`
    CharRange {
        /// `[^...]` when true
        negated: bool,
        /// Ordered class items
        items: Vec<RangeItem>,
    },
    /// Alternation `a | b`
    Union(Vec<Rule>),
    /// Juxtaposition `a b`
    Sequence(Vec<Rule>),
    /// Bounded or unbounded repetition
    Repeat {
        /// Repeated expression
        inner: Box<Rule>,
        /// Minimum number of occurrences
        min: usize,
        /// Maximum number of occurrences, unbounded when `None`
        max: Option<usize>,
    },
    /// Reference to another rule of the table
    Named(String),
    /// Parenthesised expression
    Group(Box<Rule>),
}

impl Rule {
    /// Literal rule
    pub fn literal(text: impl Into<String>) -> Self {
        Rule::Literal(text.into())
    }

    /// Reference to a named rule
    pub fn named(name: impl Into<String>) -> Self {
        Rule::Named(name.into())
    }

    /// Positive character class
    pub fn range(items: Vec<RangeItem>) -> Self {
        Rule::CharRange {
            negated: false,
            items,
        }
    }

    /// Negated character class
    pub fn not_range(items: Vec<RangeItem>) -> Self {
        Rule::CharRange {
            negated: true,
            items,
        }
    }

    /// `inner{min,max}`
    pub fn repeat(inner: Rule, min: usize, max: Option<usize>) -> Self {
        Rule::Repeat {
            inner: Box::new(inner),
            min,
            max,
        }
    }

    /// `inner?`
    pub fn optional(inner: Rule) -> Self {
        Self::repeat(inner, 0, Some(1))
    }

    /// `inner*`
    pub fn star(inner: Rule) -> Self {
        Self::repeat(inner, 0, None)
    }

    /// `inner+`
    pub fn plus(inner: Rule) -> Self {
        Self::repeat(inner, 1, None)
    }

    /// `(inner)`
    pub fn group(inner: Rule) -> Self {
        Rule::Group(Box::new(inner))
    }

    /// Rule matching one chunk of text that does not begin the given literal.
    ///
    /// Each level excludes the next literal character and the first one, so
    /// repeated with `*` it rejects any text containing `literal`. Text ending
    /// in a proper prefix of `literal` is rejected too.
    /// `"abc"` yields `([^a] | "a" ([^ba] | "b" [^ca]))`.
    pub fn not_literal(literal: &str) -> Self {
        fn chunk(first: char, chars: &[char]) -> Rule {
            let mut excluded = vec![RangeItem::Char(chars[0])];
            if chars[0] != first {
                excluded.push(RangeItem::Char(first));
            }
            let head = Rule::not_range(excluded);
            if chars.len() == 1 {
                return head;
            }
            Rule::Union(vec![
                head,
                Rule::Sequence(vec![Rule::Literal(chars[0].to_string()), chunk(first, &chars[1..])]),
            ])
        }

        let chars: Vec<char> = literal.chars().collect();
        let Some(&first) = chars.first() else {
            return Rule::Literal(String::new());
        };
        Rule::group(chunk(first, &chars))
    }

    /// Peephole-optimised copy of this rule.
    ///
    /// Unions gather single characters and positive classes into one class and
    /// negated classes into one negated class, ahead of the remaining
    /// alternatives. Sequences splice nested sequences and concatenate adjacent
    /// literals. Single-element unions and sequences degenerate to the
    /// element. The result is a fixed point: optimising it again is a no-op.
    #[must_use]
    pub fn optimize(&self) -> Rule {
        match self {
            Rule::Literal(_) | Rule::CharRange { .. } | Rule::Named(_) => self.clone(),
            Rule::Union(alternatives) => optimize_union(alternatives),
            Rule::Sequence(parts) => optimize_sequence(parts),
            Rule::Repeat { inner, min, max } => {
                let inner = inner.optimize();
                if *min == 1 && *max == Some(1) {
                    inner
                } else {
                    Rule::repeat(inner, *min, *max)
                }
            },
            Rule::Group(inner) => match inner.optimize() {
                group @ Rule::Group(_) => group,
                other => Rule::group(other),
            },
        }
    }

    /// Names of every rule referenced from this tree, in order of appearance
    pub fn references(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Rule::Named(name) => out.push(name),
            Rule::Union(rules) | Rule::Sequence(rules) => {
                for rule in rules {
                    rule.collect_references(out);
                }
            },
            Rule::Repeat { inner, .. } | Rule::Group(inner) => inner.collect_references(out),
            Rule::Literal(_) | Rule::CharRange { .. } => {},
        }
    }
}

fn optimize_union(alternatives: &[Rule]) -> Rule {
    let mut positive = Vec::new();
    let mut negative = Vec::new();
    let mut others = Vec::new();

    let mut classify = |rule: Rule| match rule {
        Rule::Literal(ref text) if text.chars().count() == 1 => {
            if let Some(c) = text.chars().next() {
                positive.push(RangeItem::Char(c));
            }
        },
        Rule::CharRange {
            negated: false,
            items,
        } => positive.extend(items),
        Rule::CharRange {
            negated: true,
            items,
        } => negative.extend(items),
        other => others.push(other),
    };

    for alternative in alternatives {
        match alternative.optimize() {
            Rule::Union(nested) => nested.into_iter().for_each(&mut classify),
            rule => classify(rule),
        }
    }

    let mut out = Vec::with_capacity(others.len() + 2);
    if !positive.is_empty() {
        out.push(Rule::range(positive));
    }
    if !negative.is_empty() {
        out.push(Rule::not_range(negative));
    }
    out.extend(others);

    if out.len() == 1 {
        out.remove(0)
    } else {
        Rule::Union(out)
    }
}

fn optimize_sequence(parts: &[Rule]) -> Rule {
    fn push(out: &mut Vec<Rule>, rule: Rule) {
        if let (Some(Rule::Literal(prev)), Rule::Literal(text)) = (out.last_mut(), &rule) {
            prev.push_str(text);
            return;
        }
        out.push(rule);
    }

    let mut out = Vec::with_capacity(parts.len());
    for part in parts {
        match part.optimize() {
            Rule::Sequence(nested) => {
                for rule in nested {
                    push(&mut out, rule);
                }
            },
            rule => push(&mut out, rule),
        }
    }

    if out.len() == 1 {
        out.remove(0)
    } else {
        Rule::Sequence(out)
    }
}

// =============================================================================
// RENDERING
// =============================================================================

/// Class excluding every code point; an empty union matches nothing
const EMPTY_UNION: &str = "[^\\x00-\\U0010FFFF]";

/// Quote a literal for GBNF
pub fn format_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\x{:02X}", c as u32);
            },
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn format_range_char(c: char, out: &mut String) {
    match c {
        '-' | ']' | '\\' => {
            out.push('\\');
            out.push(c);
        },
        '\n' => out.push_str("\\n"),
        '\r' => out.push_str("\\r"),
        '\t' => out.push_str("\\t"),
        c => out.push(c),
    }
}

impl fmt::Display for RangeItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        match *self {
            RangeItem::Char(c) => format_range_char(c, &mut out),
            RangeItem::Span(lo, hi) => {
                format_range_char(lo, &mut out);
                out.push('-');
                format_range_char(hi, &mut out);
            },
        }
        f.write_str(&out)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::Literal(text) => f.write_str(&format_literal(text)),
            Rule::CharRange { negated, items } => {
                f.write_char('[')?;
                if *negated {
                    f.write_char('^')?;
                }
                for item in items {
                    write!(f, "{item}")?;
                }
                f.write_char(']')
            },
            Rule::Union(alternatives) => {
                if alternatives.is_empty() {
                    return f.write_str(EMPTY_UNION);
                }
                for (i, alternative) in alternatives.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    if matches!(alternative, Rule::Union(_)) {
                        write!(f, "({alternative})")?;
                    } else {
                        write!(f, "{alternative}")?;
                    }
                }
                Ok(())
            },
            Rule::Sequence(parts) => {
                if parts.is_empty() {
                    return f.write_str("\"\"");
                }
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_char(' ')?;
                    }
                    if matches!(part, Rule::Union(_)) {
                        write!(f, "({part})")?;
                    } else {
                        write!(f, "{part}")?;
                    }
                }
                Ok(())
            },
            Rule::Repeat { inner, min, max } => {
                let sub = match inner.as_ref() {
                    Rule::Sequence(_) | Rule::Union(_) | Rule::Repeat { .. } => format!("({inner})"),
                    _ => inner.to_string(),
                };
                match (*min, *max) {
                    (0, None) => write!(f, "{sub}*"),
                    (0, Some(0)) => f.write_str("\"\""),
                    (0, Some(1)) => write!(f, "{sub}?"),
                    (1, None) => write!(f, "{sub}+"),
                    (min, max) => {
                        let mut pieces: Vec<String> = vec![sub.clone(); min];
                        match max {
                            Some(max) => {
                                pieces.extend(std::iter::repeat(format!("{sub}?")).take(max.saturating_sub(min)));
                            },
                            None => pieces.push(format!("{sub}*")),
                        }
                        f.write_str(&pieces.join(" "))
                    },
                }
            },
            Rule::Named(name) => f.write_str(name),
            Rule::Group(inner) => write!(f, "({inner})"),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(s: &str) -> Rule {
        Rule::literal(s)
    }

    #[test]
    fn test_literal_rendering_escapes() {
        assert_eq!(lit("a\"b").to_string(), r#""a\"b""#);
        assert_eq!(lit("line\n").to_string(), r#""line\n""#);
        assert_eq!(lit("back\\slash").to_string(), r#""back\\slash""#);
        assert_eq!(lit("\u{1}").to_string(), r#""\x01""#);
    }

    #[test]
    fn test_char_range_rendering_escapes() {
        let rule = Rule::range(vec![
            RangeItem::Char('-'),
            RangeItem::Char(']'),
            RangeItem::Char('\\'),
            RangeItem::Char('\n'),
            RangeItem::Span('a', 'z'),
        ]);
        assert_eq!(rule.to_string(), r"[\-\]\\\na-z]");
        let negated = Rule::not_range(vec![RangeItem::Char('"'), RangeItem::Char('\t')]);
        assert_eq!(negated.to_string(), r#"[^"\t]"#);
    }

    #[test]
    fn test_union_collapses_ranges() {
        let rule = Rule::Union(vec![
            lit("a"),
            Rule::named("x"),
            Rule::range(vec![RangeItem::Span('0', '9')]),
            Rule::not_range(vec![RangeItem::Char('<')]),
            lit("bc"),
            Rule::not_range(vec![RangeItem::Char('>')]),
        ])
        .optimize();
        assert_eq!(rule.to_string(), r#"[a0-9] | [^<>] | x | "bc""#);
    }

    #[test]
    fn test_union_single_alternative_degenerates() {
        let rule = Rule::Union(vec![lit("a"), lit("b")]).optimize();
        assert_eq!(rule, Rule::range(vec![RangeItem::Char('a'), RangeItem::Char('b')]));
    }

    #[test]
    fn test_empty_union_matches_nothing() {
        let empty = Rule::Union(Vec::new());
        assert_eq!(empty.optimize(), empty);
        assert_eq!(empty.to_string(), r"[^\x00-\U0010FFFF]");
        assert_eq!(Rule::Sequence(vec![lit("a"), empty]).to_string(), r#""a" ([^\x00-\U0010FFFF])"#);
    }

    #[test]
    fn test_sequence_merges_literals() {
        let rule = Rule::Sequence(vec![
            lit("{"),
            lit("\"a\""),
            Rule::named("space"),
            lit(":"),
            lit(" "),
        ])
        .optimize();
        assert_eq!(rule.to_string(), r#""{\"a\"" space ": ""#);
    }

    #[test]
    fn test_sequence_single_element_degenerates() {
        let rule = Rule::Sequence(vec![Rule::Sequence(vec![lit("a")]), lit("b")]).optimize();
        assert_eq!(rule, lit("ab"));
    }

    #[test]
    fn test_group_collapses_nested() {
        let rule = Rule::group(Rule::group(Rule::named("x"))).optimize();
        assert_eq!(rule, Rule::group(Rule::named("x")));
    }

    #[test]
    fn test_repeat_rendering() {
        let x = Rule::named("x");
        assert_eq!(Rule::star(x.clone()).to_string(), "x*");
        assert_eq!(Rule::plus(x.clone()).to_string(), "x+");
        assert_eq!(Rule::optional(x.clone()).to_string(), "x?");
        assert_eq!(Rule::repeat(x.clone(), 2, Some(4)).to_string(), "x x x? x?");
        assert_eq!(Rule::repeat(x.clone(), 2, None).to_string(), "x x x*");
        assert_eq!(Rule::repeat(x.clone(), 0, Some(0)).to_string(), "\"\"");
        let seq = Rule::Sequence(vec![lit(","), x]);
        assert_eq!(Rule::star(seq).to_string(), r#"("," x)*"#);
    }

    #[test]
    fn test_repeat_once_unwraps() {
        assert_eq!(Rule::repeat(lit("a"), 1, Some(1)).optimize(), lit("a"));
    }

    #[test]
    fn test_union_inside_sequence_is_parenthesised() {
        let rule = Rule::Sequence(vec![
            Rule::Union(vec![lit("true"), lit("false")]),
            Rule::named("space"),
        ]);
        assert_eq!(rule.to_string(), r#"("true" | "false") space"#);
    }

    #[test]
    fn test_not_literal_shape() {
        let rule = Rule::not_literal("abc").optimize();
        assert_eq!(rule.to_string(), r#"([^a] | "a" ([^ba] | "b" [^ca]))"#);
        assert_eq!(Rule::not_literal(""), lit(""));
    }

    #[test]
    fn test_optimize_idempotent_examples() {
        let rules = vec![
            Rule::not_literal("<|from|>"),
            Rule::Sequence(vec![
                Rule::Sequence(vec![Rule::group(Rule::Sequence(vec![Rule::group(lit("x"))]))]),
                lit("y"),
            ]),
            Rule::Union(vec![
                Rule::Union(vec![lit("a"), Rule::named("b")]),
                Rule::Sequence(vec![lit("c")]),
            ]),
        ];
        for rule in rules {
            let once = rule.optimize();
            assert_eq!(once, once.optimize(), "not a fixed point: {rule}");
        }
    }

    #[test]
    fn test_references_in_order() {
        let rule = Rule::Sequence(vec![
            Rule::named("a"),
            Rule::star(Rule::Union(vec![Rule::named("b"), lit("x")])),
            Rule::group(Rule::named("c")),
        ]);
        assert_eq!(rule.references(), vec!["a", "b", "c"]);
    }
}
