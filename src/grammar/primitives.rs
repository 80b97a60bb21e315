//! Canonical productions for JSON primitives
//!
//! These are the fixed `boolean`, `number`, `integer`, `string`, `null`,
//! `object`, `array` and `value` rules, plus the `space` rule every structural
//! token is followed by. Whitespace is a single optional space: never an
//! unbounded run, so the sampler cannot wander off into blank output.

use super::rule::{RangeItem, Rule};
use serde::{Deserialize, Serialize};

/// Name of the shared whitespace rule
pub const SPACE: &str = "space";

/// Primitive JSON kinds with a canonical rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveKind {
    /// `true` / `false`
    Boolean,
    /// JSON number
    Number,
    /// JSON number without fraction or exponent
    Integer,
    /// JSON string
    String,
    /// `null`
    Null,
    /// Any JSON object
    Object,
    /// Any JSON array
    Array,
    /// Any JSON value
    Value,
}

impl PrimitiveKind {
    /// Every kind, in the order the rules are documented
    pub const ALL: [PrimitiveKind; 8] = [
        PrimitiveKind::Boolean,
        PrimitiveKind::Number,
        PrimitiveKind::Integer,
        PrimitiveKind::String,
        PrimitiveKind::Null,
        PrimitiveKind::Object,
        PrimitiveKind::Array,
        PrimitiveKind::Value,
    ];

    /// Rule name used in grammar text
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveKind::Boolean => "boolean",
            PrimitiveKind::Number => "number",
            PrimitiveKind::Integer => "integer",
            PrimitiveKind::String => "string",
            PrimitiveKind::Null => "null",
            PrimitiveKind::Object => "object",
            PrimitiveKind::Array => "array",
            PrimitiveKind::Value => "value",
        }
    }

    /// Kind for a JSON Schema `type` name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Other primitives this production references
    pub fn dependencies(self) -> &'static [PrimitiveKind] {
        match self {
            PrimitiveKind::Value => &[
                PrimitiveKind::Object,
                PrimitiveKind::Array,
                PrimitiveKind::String,
                PrimitiveKind::Number,
                PrimitiveKind::Boolean,
                PrimitiveKind::Null,
            ],
            PrimitiveKind::Object => &[PrimitiveKind::String, PrimitiveKind::Value],
            PrimitiveKind::Array => &[PrimitiveKind::Value],
            _ => &[],
        }
    }

    /// The canonical production
    pub fn production(self) -> Rule {
        match self {
            PrimitiveKind::Boolean => Rule::Sequence(vec![
                Rule::Union(vec![Rule::literal("true"), Rule::literal("false")]),
                space(),
            ]),
            PrimitiveKind::Number => Rule::Sequence(vec![
                integral_part(),
                Rule::optional(Rule::Sequence(vec![Rule::literal("."), Rule::plus(digit())])),
                Rule::optional(Rule::Sequence(vec![
                    Rule::range(vec![RangeItem::Char('e'), RangeItem::Char('E')]),
                    Rule::optional(Rule::range(vec![RangeItem::Char('-'), RangeItem::Char('+')])),
                    Rule::plus(digit()),
                ])),
                space(),
            ]),
            PrimitiveKind::Integer => Rule::Sequence(vec![integral_part(), space()]),
            PrimitiveKind::String => {
                let hex = Rule::range(vec![
                    RangeItem::Span('0', '9'),
                    RangeItem::Span('a', 'f'),
                    RangeItem::Span('A', 'F'),
                ]);
                let escape = Rule::Sequence(vec![
                    Rule::literal("\\"),
                    Rule::Union(vec![
                        Rule::range("\"\\/bfnrt".chars().map(RangeItem::Char).collect()),
                        Rule::Sequence(vec![
                            Rule::literal("u"),
                            hex.clone(),
                            hex.clone(),
                            hex.clone(),
                            hex,
                        ]),
                    ]),
                ]);
                Rule::Sequence(vec![
                    Rule::literal("\""),
                    Rule::star(Rule::Union(vec![
                        Rule::not_range(vec![RangeItem::Char('"'), RangeItem::Char('\\')]),
                        escape,
                    ])),
                    Rule::literal("\""),
                    space(),
                ])
            },
            PrimitiveKind::Null => Rule::Sequence(vec![Rule::literal("null"), space()]),
            PrimitiveKind::Object => {
                let member = || {
                    Rule::Sequence(vec![
                        Rule::named("string"),
                        Rule::literal(":"),
                        space(),
                        Rule::named("value"),
                    ])
                };
                Rule::Sequence(vec![
                    Rule::literal("{"),
                    space(),
                    Rule::optional(Rule::Sequence(vec![
                        member(),
                        Rule::star(Rule::Sequence(vec![Rule::literal(","), space(), member()])),
                    ])),
                    Rule::literal("}"),
                    space(),
                ])
            },
            PrimitiveKind::Array => Rule::Sequence(vec![
                Rule::literal("["),
                space(),
                Rule::optional(Rule::Sequence(vec![
                    Rule::named("value"),
                    Rule::star(Rule::Sequence(vec![
                        Rule::literal(","),
                        space(),
                        Rule::named("value"),
                    ])),
                ])),
                Rule::literal("]"),
                space(),
            ]),
            PrimitiveKind::Value => Rule::Union(
                Self::Value
                    .dependencies()
                    .iter()
                    .map(|kind| Rule::named(kind.name()))
                    .collect(),
            ),
        }
    }
}

/// `space ::= " "?`
pub fn space_rule() -> Rule {
    Rule::optional(Rule::literal(" "))
}

/// Reference to the shared whitespace rule
pub fn space() -> Rule {
    Rule::named(SPACE)
}

fn digit() -> Rule {
    Rule::range(vec![RangeItem::Span('0', '9')])
}

// ("-"? ([0-9] | [1-9] [0-9]*))
fn integral_part() -> Rule {
    Rule::group(Rule::Sequence(vec![
        Rule::optional(Rule::literal("-")),
        Rule::Union(vec![
            digit(),
            Rule::Sequence(vec![Rule::range(vec![RangeItem::Span('1', '9')]), Rule::star(digit())]),
        ]),
    ]))
}
