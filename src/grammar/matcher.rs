//! Grammar recogniser
//!
//! Decides whether a complete text is in the language of a [`Grammar`]. Each
//! rule is evaluated to the set of end offsets it can reach from a start
//! offset, memoised per (rule, offset). Used to check that compiled grammars
//! accept what the schema allows and reject what it does not.
//!
//! Left-recursive rules are cut at the recursive call; no compiled grammar
//! produces them.

use super::rule::Rule;
use super::{Grammar, ROOT_RULE_NAME};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Whole-input recogniser over a rule table
#[derive(Debug, Clone, Copy)]
pub struct GrammarMatcher<'g> {
    grammar: &'g Grammar,
}

impl<'g> GrammarMatcher<'g> {
    /// Create a recogniser
    pub fn new(grammar: &'g Grammar) -> Self {
        Self { grammar }
    }

    /// Whether `root` derives exactly `text`
    pub fn accepts(&self, text: &str) -> bool {
        self.accepts_rule(ROOT_RULE_NAME, text)
    }

    /// Whether the named rule derives exactly `text`; false for unknown rules
    pub fn accepts_rule(&self, name: &str, text: &str) -> bool {
        let Some(rule) = self.grammar.get_rule(name) else {
            return false;
        };
        let mut run = Run {
            grammar: self.grammar,
            input: text.chars().collect(),
            memo: HashMap::new(),
            active: HashSet::new(),
        };
        let len = run.input.len();
        run.ends(rule, 0).contains(&len)
    }
}

struct Run<'g> {
    grammar: &'g Grammar,
    input: Vec<char>,
    memo: HashMap<(&'g str, usize), BTreeSet<usize>>,
    active: HashSet<(&'g str, usize)>,
}

impl<'g> Run<'g> {
    fn ends(&mut self, rule: &'g Rule, start: usize) -> BTreeSet<usize> {
        match rule {
            Rule::Literal(text) => {
                let mut pos = start;
                for c in text.chars() {
                    if self.input.get(pos) != Some(&c) {
                        return BTreeSet::new();
                    }
                    pos += 1;
                }
                BTreeSet::from([pos])
            },
            Rule::CharRange { negated, items } => match self.input.get(start) {
                Some(&c) if items.iter().any(|item| item.contains(c)) != *negated => {
                    BTreeSet::from([start + 1])
                },
                _ => BTreeSet::new(),
            },
            Rule::Union(alternatives) => {
                let mut out = BTreeSet::new();
                for alternative in alternatives {
                    out.extend(self.ends(alternative, start));
                }
                out
            },
            Rule::Sequence(parts) => {
                let mut frontier = BTreeSet::from([start]);
                for part in parts {
                    frontier = self.step(part, &frontier);
                    if frontier.is_empty() {
                        break;
                    }
                }
                frontier
            },
            Rule::Repeat { inner, min, max } => {
                let mut frontier = BTreeSet::from([start]);
                for _ in 0..*min {
                    frontier = self.step(inner, &frontier);
                    if frontier.is_empty() {
                        return frontier;
                    }
                }
                // Past the minimum a revisited offset adds nothing new
                let mut reached = frontier.clone();
                let mut count = *min;
                while !frontier.is_empty() && max.map_or(true, |max| count < max) {
                    let next: BTreeSet<usize> = self
                        .step(inner, &frontier)
                        .into_iter()
                        .filter(|pos| !reached.contains(pos))
                        .collect();
                    reached.extend(next.iter().copied());
                    frontier = next;
                    count += 1;
                }
                reached
            },
            Rule::Named(name) => {
                let key = (name.as_str(), start);
                if let Some(cached) = self.memo.get(&key) {
                    return cached.clone();
                }
                let Some(target) = self.grammar.get_rule(name) else {
                    return BTreeSet::new();
                };
                if !self.active.insert(key) {
                    return BTreeSet::new();
                }
                let out = self.ends(target, start);
                self.active.remove(&key);
                self.memo.insert(key, out.clone());
                out
            },
            Rule::Group(inner) => self.ends(inner, start),
        }
    }

    fn step(&mut self, rule: &'g Rule, frontier: &BTreeSet<usize>) -> BTreeSet<usize> {
        let mut out = BTreeSet::new();
        for &pos in frontier {
            out.extend(self.ends(rule, pos));
        }
        out
    }
}
