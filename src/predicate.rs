//! Predicates over accounting records.
//!
//! Leaves compare one field against a literal ([`Comparison`]), a shell glob
//! ([`Glob`]) or a regular expression ([`RegexMatch`]). Aggregators combine
//! children with `and`, `or` and `not`.
//!
//! `not` inverts each child on its own and hands the inverted outcomes to
//! the enclosing group, so inside an `and`, `(not a b)` means "neither a nor
//! b" and inside an `or` it means "not a, or not b".

use std::cmp::Ordering;
use std::fmt;

use regex::{Regex, RegexBuilder};
use tracing::trace;

use crate::error::Result;
use crate::record::Record;

/// Comparison operator of a [`Comparison`] leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn token(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    /// Whether the operator accepts an ordering. `None` (unordered) only
    /// satisfies `!=`.
    pub fn holds(self, ordering: Option<Ordering>) -> bool {
        match ordering {
            None => self == CompareOp::Ne,
            Some(ord) => match self {
                CompareOp::Eq => ord == Ordering::Equal,
                CompareOp::Ne => ord != Ordering::Equal,
                CompareOp::Lt => ord == Ordering::Less,
                CompareOp::Le => ord != Ordering::Greater,
                CompareOp::Gt => ord == Ordering::Greater,
                CompareOp::Ge => ord != Ordering::Less,
            },
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// `field <op> literal`. The literal is coerced to the field value's kind
/// on every evaluation.
#[derive(Debug, Clone)]
pub struct Comparison {
    op: CompareOp,
    field: String,
    literal: String,
}

impl Comparison {
    pub fn new(op: CompareOp, field: impl Into<String>, literal: impl Into<String>) -> Self {
        Comparison {
            op,
            field: field.into(),
            literal: literal.into(),
        }
    }

    pub fn op(&self) -> CompareOp {
        self.op
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn literal(&self) -> &str {
        &self.literal
    }

    pub fn evaluate(&self, record: &Record) -> Result<bool> {
        let value = record.get(self.field.as_str())?;
        let rhs = value.coerce_literal(&self.field, &self.literal)?;
        Ok(self.op.holds(value.compare(&rhs)))
    }
}

/// Case-insensitive shell glob, matched against the whole field text.
#[derive(Debug, Clone)]
pub struct Glob {
    field: String,
    pattern: String,
    matcher: Regex,
}

impl Glob {
    pub fn new(
        field: impl Into<String>,
        pattern: impl Into<String>,
    ) -> std::result::Result<Self, regex::Error> {
        let pattern = pattern.into();
        let matcher = RegexBuilder::new(&format!(r"\A(?:{})\z", translate_glob(&pattern)))
            .case_insensitive(true)
            .dot_matches_new_line(true)
            .build()?;
        Ok(Glob {
            field: field.into(),
            pattern,
            matcher,
        })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn evaluate(&self, record: &Record) -> Result<bool> {
        let text = record.get(self.field.as_str())?.to_string();
        Ok(self.matcher.is_match(&text))
    }
}

/// Translate a shell glob into regex syntax: `*`, `?`, `[...]` and `[!...]`.
/// An unterminated `[` is a literal bracket.
pub fn translate_glob(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        i += 1;
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                let mut j = i;
                if j < chars.len() && chars[j] == '!' {
                    j += 1;
                }
                if j < chars.len() && chars[j] == ']' {
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }
                if j >= chars.len() {
                    out.push_str(r"\[");
                    continue;
                }
                let mut class = String::from("[");
                let mut k = i;
                if chars[k] == '!' {
                    class.push('^');
                    k += 1;
                } else if chars[k] == '^' {
                    class.push_str(r"\^");
                    k += 1;
                }
                for &member in &chars[k..j] {
                    if matches!(member, '\\' | '[' | '&' | '~') {
                        class.push('\\');
                    }
                    class.push(member);
                }
                class.push(']');
                out.push_str(&class);
                i = j + 1;
            }
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    out
}

/// Single-letter regex flags accepted after the closing delimiter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegexFlags {
    pub ignore_case: bool,
    pub multi_line: bool,
    pub dot_all: bool,
    pub locale: bool,
    pub unicode: bool,
    pub verbose: bool,
}

impl RegexFlags {
    /// Turn on the flag named by `letter`; false if the letter is not a flag.
    pub fn set(&mut self, letter: char) -> bool {
        match letter {
            'I' => self.ignore_case = true,
            'M' => self.multi_line = true,
            'S' => self.dot_all = true,
            'L' => self.locale = true,
            'U' => self.unicode = true,
            'X' => self.verbose = true,
            _ => return false,
        }
        true
    }

    // Matching is always Unicode-aware; L and U are accepted and kept for
    // display only.
    fn apply(&self, builder: &mut RegexBuilder) {
        builder
            .case_insensitive(self.ignore_case)
            .multi_line(self.multi_line)
            .dot_matches_new_line(self.dot_all)
            .ignore_whitespace(self.verbose);
    }
}

impl fmt::Display for RegexFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let letters = [
            (self.ignore_case, 'I'),
            (self.locale, 'L'),
            (self.multi_line, 'M'),
            (self.dot_all, 'S'),
            (self.unicode, 'U'),
            (self.verbose, 'X'),
        ];
        for (on, letter) in letters {
            if on {
                write!(f, "{letter}")?;
            }
        }
        Ok(())
    }
}

/// Regex matched at the start of the field text (a prefix match).
#[derive(Debug, Clone)]
pub struct RegexMatch {
    field: String,
    pattern: String,
    flags: RegexFlags,
    matcher: Regex,
}

impl RegexMatch {
    pub fn new(
        field: impl Into<String>,
        pattern: impl Into<String>,
        flags: RegexFlags,
    ) -> std::result::Result<Self, regex::Error> {
        let pattern = pattern.into();
        // A verbose-mode comment must not swallow the closing paren.
        let anchored = if flags.verbose {
            format!("\\A(?:{pattern}\n)")
        } else {
            format!(r"\A(?:{pattern})")
        };
        let mut builder = RegexBuilder::new(&anchored);
        flags.apply(&mut builder);
        let matcher = builder.build()?;
        Ok(RegexMatch {
            field: field.into(),
            pattern,
            flags,
            matcher,
        })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn flags(&self) -> RegexFlags {
        self.flags
    }

    pub fn evaluate(&self, record: &Record) -> Result<bool> {
        let text = record.get(self.field.as_str())?.to_string();
        Ok(self.matcher.is_match(&text))
    }

    /// A delimiter that does not occur in the pattern, preferring `/`.
    fn delimiter(&self) -> char {
        const PREFERRED: &[char] = &['/', '#', '|', '!', '%', '@', ',', ';', '^', '`', '"', '\''];
        PREFERRED
            .iter()
            .copied()
            .chain((0xA1u32..0x2FFF).filter_map(char::from_u32))
            .find(|c| !self.pattern.contains(*c))
            .unwrap_or('/')
    }
}

/// A node of a compiled filter tree.
#[derive(Debug, Clone)]
pub enum Predicate {
    Compare(Comparison),
    Glob(Glob),
    Regex(RegexMatch),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Vec<Predicate>),
}

/// Outcome of one node: a single truth value, or for `not` one inverted
/// value per child.
enum Verdict {
    One(bool),
    Each(Vec<bool>),
}

impl Verdict {
    fn outcomes(self) -> Vec<bool> {
        match self {
            Verdict::One(b) => vec![b],
            Verdict::Each(all) => all,
        }
    }
}

impl Predicate {
    /// Evaluate this node on its own. A bare `not` holds when every child
    /// is false.
    pub fn matches(&self, record: &Record) -> Result<bool> {
        Ok(match self.verdict(record)? {
            Verdict::One(b) => b,
            Verdict::Each(all) => all.iter().all(|b| *b),
        })
    }

    fn verdict(&self, record: &Record) -> Result<Verdict> {
        let verdict = match self {
            Predicate::Compare(c) => Verdict::One(c.evaluate(record)?),
            Predicate::Glob(g) => Verdict::One(g.evaluate(record)?),
            Predicate::Regex(r) => Verdict::One(r.evaluate(record)?),
            Predicate::And(children) => Verdict::One(all_hold(children, record)?),
            Predicate::Or(children) => {
                let mut any = false;
                'children: for child in children {
                    for outcome in child.verdict(record)?.outcomes() {
                        if outcome {
                            any = true;
                            break 'children;
                        }
                    }
                }
                Verdict::One(any)
            }
            Predicate::Not(children) => {
                let mut inverted = Vec::with_capacity(children.len());
                for child in children {
                    inverted.extend(child.verdict(record)?.outcomes().into_iter().map(|b| !b));
                }
                Verdict::Each(inverted)
            }
        };
        Ok(verdict)
    }

    /// The field a leaf reads; `None` for aggregators.
    pub fn field(&self) -> Option<&str> {
        match self {
            Predicate::Compare(c) => Some(c.field()),
            Predicate::Glob(g) => Some(g.field()),
            Predicate::Regex(r) => Some(r.field()),
            _ => None,
        }
    }
}

fn all_hold(children: &[Predicate], record: &Record) -> Result<bool> {
    for child in children {
        if child.verdict(record)?.outcomes().contains(&false) {
            return Ok(false);
        }
    }
    Ok(true)
}

fn write_group(f: &mut fmt::Formatter, keyword: &str, children: &[Predicate]) -> fmt::Result {
    write!(f, "({keyword}")?;
    for child in children {
        write!(f, " {child}")?;
    }
    f.write_str(")")
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Predicate::Compare(c) => write!(f, "({} {} {})", c.field, c.op, c.literal),
            Predicate::Glob(g) => write!(f, "({} *= {})", g.field, g.pattern),
            Predicate::Regex(r) => {
                let d = r.delimiter();
                write!(f, "({} ~= {d}{}{d}{})", r.field, r.pattern, r.flags)
            }
            Predicate::And(children) => write_group(f, "and", children),
            Predicate::Or(children) => write_group(f, "or", children),
            Predicate::Not(children) => write_group(f, "not", children),
        }
    }
}

/// A sealed filter: an implicit conjunction of its root predicates.
///
/// Built by the expression parser or the option surface; nothing can be
/// added once it exists.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    root: Vec<Predicate>,
}

impl Filter {
    pub fn new(root: Vec<Predicate>) -> Self {
        Filter { root }
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.root
    }

    /// An empty filter matches every record.
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    pub fn matches(&self, record: &Record) -> Result<bool> {
        let matched = all_hold(&self.root, record)?;
        trace!(matched, "evaluated record");
        Ok(matched)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.root.as_slice() {
            [single] => write!(f, "{single}"),
            all => write_group(f, "and", all),
        }
    }
}
