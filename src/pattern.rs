//! Anchored regular expression to grammar rule compiler
//!
//! Handles the subset of regex syntax that maps one-to-one onto grammar
//! constructs: literal characters, character classes, alternation, groups and
//! greedy repetition. Anything whose meaning depends on matcher state (`.`,
//! lazy quantifiers, look-arounds, back references, inner anchors) is rejected
//! rather than approximated.

use crate::error::PatternError;
use crate::grammar::{RangeItem, Rule};

/// Largest count accepted in `{n}`, `{n,}` and `{n,m}`
pub const MAX_REPEAT_COUNT: usize = 1000;

/// Compile `^body$` into a rule matching exactly `body`.
///
/// The returned rule is the pattern body only; quoting it as a JSON string is
/// the caller's concern.
///
/// # Errors
///
/// Returns [`PatternError::Unanchored`] when the anchors are missing,
/// [`PatternError::Unsupported`] for constructs outside the subset and
/// [`PatternError::Syntax`] for malformed input.
pub fn compile_pattern(pattern: &str) -> Result<Rule, PatternError> {
    if pattern.len() < 2 || !pattern.starts_with('^') || !pattern.ends_with('$') {
        return Err(PatternError::Unanchored {
            pattern: pattern.to_string(),
        });
    }
    let body = &pattern[1..pattern.len() - 1];
    let mut parser = PatternParser {
        pattern,
        chars: body.chars().collect(),
        pos: 0,
    };
    let rule = parser.parse_alternation()?;
    if let Some(c) = parser.peek() {
        // Only a stray ')' can stop the top-level alternation early
        return Err(parser.syntax(format!("unbalanced {c:?}")));
    }
    Ok(rule)
}

struct PatternParser<'a> {
    pattern: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl PatternParser<'_> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn syntax(&self, reason: impl Into<String>) -> PatternError {
        PatternError::Syntax {
            pattern: self.pattern.to_string(),
            position: self.pos,
            reason: reason.into(),
        }
    }

    fn unsupported(&self, construct: impl Into<String>) -> PatternError {
        PatternError::Unsupported {
            pattern: self.pattern.to_string(),
            construct: construct.into(),
        }
    }

    fn parse_alternation(&mut self) -> Result<Rule, PatternError> {
        let mut alternatives = vec![self.parse_sequence()?];
        while self.eat('|') {
            alternatives.push(self.parse_sequence()?);
        }
        if alternatives.len() == 1 {
            Ok(alternatives.remove(0))
        } else {
            Ok(Rule::Union(alternatives))
        }
    }

    fn parse_sequence(&mut self) -> Result<Rule, PatternError> {
        let mut parts = Vec::new();
        while let Some(c) = self.peek() {
            if c == '|' || c == ')' {
                break;
            }
            let atom = self.parse_atom()?;
            parts.push(self.parse_quantifier(atom)?);
        }
        Ok(Rule::Sequence(parts))
    }

    fn parse_atom(&mut self) -> Result<Rule, PatternError> {
        let Some(c) = self.next() else {
            return Err(self.syntax("unexpected end of pattern"));
        };
        match c {
            '(' => self.parse_group(),
            '[' => self.parse_class(),
            '\\' => self.parse_escape(),
            '.' => Err(self.unsupported(".")),
            '^' | '$' => Err(self.unsupported(c.to_string())),
            '*' | '+' | '?' => Err(self.syntax("nothing to repeat")),
            '{' if self.looks_like_quantifier() => Err(self.syntax("nothing to repeat")),
            c => Ok(Rule::Literal(c.to_string())),
        }
    }

    fn parse_group(&mut self) -> Result<Rule, PatternError> {
        if self.eat('?') {
            match self.next() {
                Some(':') => {},
                Some('P') if self.peek() == Some('<') => {
                    self.pos += 1;
                    self.skip_group_name()?;
                },
                Some('<') if !matches!(self.peek(), Some('=' | '!')) => self.skip_group_name()?,
                Some('<') => {
                    let kind = self.peek().map(String::from).unwrap_or_default();
                    return Err(self.unsupported(format!("(?<{kind}")));
                },
                Some(other) => return Err(self.unsupported(format!("(?{other}"))),
                None => return Err(self.syntax("unterminated group")),
            }
        }
        let inner = self.parse_alternation()?;
        if !self.eat(')') {
            return Err(self.syntax("missing ')'"));
        }
        Ok(Rule::group(inner))
    }

    fn skip_group_name(&mut self) -> Result<(), PatternError> {
        let start = self.pos;
        while let Some(c) = self.next() {
            if c == '>' {
                if self.pos - 1 == start {
                    return Err(self.syntax("empty group name"));
                }
                return Ok(());
            }
            if !(c.is_alphanumeric() || c == '_') {
                return Err(self.syntax(format!("bad character {c:?} in group name")));
            }
        }
        Err(self.syntax("unterminated group name"))
    }

    fn parse_class(&mut self) -> Result<Rule, PatternError> {
        let negated = self.eat('^');
        let mut items = Vec::new();
        let mut first = true;
        loop {
            let Some(c) = self.next() else {
                return Err(self.syntax("unterminated character set"));
            };
            if c == ']' && !first {
                break;
            }
            first = false;

            let lo = if c == '\\' {
                match self.class_escape()? {
                    ClassEscape::Char(c) => c,
                    ClassEscape::Items(set) => {
                        items.extend(set);
                        continue;
                    },
                }
            } else {
                c
            };

            let is_span = self.peek() == Some('-') && !matches!(self.chars.get(self.pos + 1), Some(']') | None);
            if !is_span {
                items.push(RangeItem::Char(lo));
                continue;
            }
            self.pos += 1;
            let hi = match self.next() {
                Some('\\') => match self.class_escape()? {
                    ClassEscape::Char(c) => c,
                    ClassEscape::Items(_) => return Err(self.syntax("bad character range")),
                },
                Some(c) => c,
                None => return Err(self.syntax("unterminated character set")),
            };
            if hi < lo {
                return Err(self.syntax(format!("bad character range {lo}-{hi}")));
            }
            items.push(RangeItem::Span(lo, hi));
        }
        Ok(Rule::CharRange { negated, items })
    }

    fn class_escape(&mut self) -> Result<ClassEscape, PatternError> {
        let Some(c) = self.next() else {
            return Err(self.syntax("trailing backslash"));
        };
        match c {
            'd' | 'w' | 's' => Ok(ClassEscape::Items(shorthand_items(c))),
            'D' | 'W' | 'S' => Err(self.unsupported(format!("\\{c} inside a character set"))),
            'b' => Ok(ClassEscape::Char('\u{8}')),
            c => self.simple_escape(c).map(ClassEscape::Char),
        }
    }

    fn parse_escape(&mut self) -> Result<Rule, PatternError> {
        let Some(c) = self.next() else {
            return Err(self.syntax("trailing backslash"));
        };
        match c {
            'd' | 'w' | 's' => Ok(Rule::range(shorthand_items(c))),
            'D' | 'W' | 'S' => Ok(Rule::not_range(shorthand_items(c.to_ascii_lowercase()))),
            'b' | 'B' | 'A' | 'Z' | 'z' => Err(self.unsupported(format!("\\{c}"))),
            '1'..='9' => Err(self.unsupported(format!("\\{c}"))),
            c => self.simple_escape(c).map(|c| Rule::Literal(c.to_string())),
        }
    }

    // Escapes that stand for exactly one character
    fn simple_escape(&mut self, c: char) -> Result<char, PatternError> {
        match c {
            'n' => Ok('\n'),
            'r' => Ok('\r'),
            't' => Ok('\t'),
            'f' => Ok('\u{c}'),
            'v' => Ok('\u{b}'),
            '0' => Ok('\0'),
            'x' => self.hex_escape(2),
            'u' => self.hex_escape(4),
            c if c.is_ascii_alphanumeric() => Err(self.syntax(format!("bad escape \\{c}"))),
            c => Ok(c),
        }
    }

    fn hex_escape(&mut self, digits: usize) -> Result<char, PatternError> {
        let mut value = 0u32;
        for _ in 0..digits {
            let digit = self
                .next()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| self.syntax("incomplete hex escape"))?;
            value = value * 16 + digit;
        }
        char::from_u32(value).ok_or_else(|| self.syntax(format!("invalid code point {value:#x}")))
    }

    fn looks_like_quantifier(&self) -> bool {
        let mut i = self.pos;
        let mut saw_digit = false;
        while let Some(&c) = self.chars.get(i) {
            match c {
                '0'..='9' => saw_digit = true,
                ',' => {},
                '}' => return saw_digit,
                _ => return false,
            }
            i += 1;
        }
        false
    }

    fn parse_quantifier(&mut self, atom: Rule) -> Result<Rule, PatternError> {
        let (min, max) = match self.peek() {
            Some('*') => {
                self.pos += 1;
                (0, None)
            },
            Some('+') => {
                self.pos += 1;
                (1, None)
            },
            Some('?') => {
                self.pos += 1;
                (0, Some(1))
            },
            Some('{') => {
                self.pos += 1;
                if !self.looks_like_quantifier() {
                    // Not a counted repetition: '{' stands for itself
                    self.pos -= 1;
                    return Ok(atom);
                }
                self.parse_bounds()?
            },
            _ => return Ok(atom),
        };
        if self.eat('?') {
            return Err(self.unsupported("lazy quantifier"));
        }
        if self.eat('+') {
            return Err(self.unsupported("possessive quantifier"));
        }
        if matches!(self.peek(), Some('*' | '?')) {
            return Err(self.syntax("multiple repeat"));
        }
        Ok(Rule::repeat(atom, min, max))
    }

    fn parse_bounds(&mut self) -> Result<(usize, Option<usize>), PatternError> {
        let min = self.parse_number()?;
        let max = if self.eat(',') {
            self.parse_number()?
        } else {
            Some(min.unwrap_or(0))
        };
        if !self.eat('}') {
            return Err(self.syntax("unterminated repetition bounds"));
        }
        let min = min.unwrap_or(0);
        if let Some(max) = max {
            if max < min {
                return Err(self.syntax(format!("min repeat {min} greater than max repeat {max}")));
            }
        }
        Ok((min, max))
    }

    fn parse_number(&mut self) -> Result<Option<usize>, PatternError> {
        let start = self.pos;
        while matches!(self.peek(), Some('0'..='9')) {
            self.pos += 1;
        }
        if start == self.pos {
            return Ok(None);
        }
        let digits: String = self.chars[start..self.pos].iter().collect();
        let count: usize = digits
            .parse()
            .map_err(|_| self.syntax(format!("repeat count {digits} out of range")))?;
        if count > MAX_REPEAT_COUNT {
            return Err(self.syntax(format!("repeat count {count} exceeds {MAX_REPEAT_COUNT}")));
        }
        Ok(Some(count))
    }
}

enum ClassEscape {
    Char(char),
    Items(Vec<RangeItem>),
}

fn shorthand_items(c: char) -> Vec<RangeItem> {
    match c {
        'd' => vec![RangeItem::Span('0', '9')],
        'w' => vec![
            RangeItem::Span('a', 'z'),
            RangeItem::Span('A', 'Z'),
            RangeItem::Span('0', '9'),
            RangeItem::Char('_'),
        ],
        _ => vec![
            RangeItem::Char(' '),
            RangeItem::Char('\t'),
            RangeItem::Char('\n'),
            RangeItem::Char('\r'),
            RangeItem::Char('\u{c}'),
            RangeItem::Char('\u{b}'),
        ],
    }
}
