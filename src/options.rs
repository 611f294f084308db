//! Building filters from command-line style options.
//!
//! Each option adds one leaf to the innermost open group. `--and`, `--or`
//! and `--not` open a group and `--ge` ends it, so
//!
//! ```text
//! --owner 'j*' --or --queue short.q --slots 1..4 --ge
//! ```
//!
//! is the same filter as
//! `(and (owner *= j*) (or (qname *= short.q) (or (slots >= 1) ...)))`.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::builder::{FilterStack, Group, GroupKind};
use crate::error::{AcctError, Result};
use crate::predicate::{CompareOp, Comparison, Filter, Glob, Predicate};
use crate::value::parse_timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterOption {
    Open(GroupKind),
    End,
    Glob(&'static str),
    Before(&'static str),
    After(&'static str),
    Range(&'static str),
}

const OPTIONS: &[(&str, FilterOption)] = &[
    ("--and", FilterOption::Open(GroupKind::And)),
    ("--or", FilterOption::Open(GroupKind::Or)),
    ("--not", FilterOption::Open(GroupKind::Not)),
    ("--ge", FilterOption::End),
    ("--queue", FilterOption::Glob("qname")),
    ("--host", FilterOption::Glob("hostname")),
    ("--group", FilterOption::Glob("group")),
    ("--owner", FilterOption::Glob("owner")),
    ("--job", FilterOption::Glob("job_name")),
    ("--granted-pe", FilterOption::Glob("granted_pe")),
    ("--submitted-before", FilterOption::Before("submission_time")),
    ("--submitted-after", FilterOption::After("submission_time")),
    ("--started-before", FilterOption::Before("start_time")),
    ("--started-after", FilterOption::After("start_time")),
    ("--ended-before", FilterOption::Before("end_time")),
    ("--ended-after", FilterOption::After("end_time")),
    ("--job-number", FilterOption::Range("job_number")),
    ("--exit-status", FilterOption::Range("exit_status")),
    ("--slots", FilterOption::Range("slots")),
];

/// Option names with the field each one filters (empty for grouping).
pub fn option_help() -> impl Iterator<Item = (&'static str, &'static str)> {
    OPTIONS.iter().map(|(name, option)| {
        let field = match option {
            FilterOption::Open(_) | FilterOption::End => "",
            FilterOption::Glob(f)
            | FilterOption::Before(f)
            | FilterOption::After(f)
            | FilterOption::Range(f) => *f,
        };
        (*name, field)
    })
}

static RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \s*
        (?:
            (?:(?P<begin>[0-9]+)\s*[.]{2}\s*(?P<end>[0-9]+))
            |
            (?:(?P<min>[0-9]+)\s*[.]{2})
            |
            (?:[.]{2}\s*(?P<max>[0-9]+))
            |
            (?P<val>[0-9]+)
        )
        \s*,?",
    )
    .expect("range pattern is valid")
});

fn leaf(op: CompareOp, field: &str, literal: &str) -> Predicate {
    Predicate::Compare(Comparison::new(op, field, literal))
}

/// Read a range list such as `1,4..8 20..` into an `or` of comparisons.
fn parse_ranges(field: &str, text: &str, index: usize) -> Result<Predicate> {
    let text = text.trim();
    let mut alternatives = Vec::new();
    let mut consumed = 0;
    for caps in RANGE.captures_iter(text) {
        let whole = caps.get(0).map_or(0..0, |m| m.range());
        if whole.start != consumed {
            break;
        }
        consumed = whole.end;
        let alternative = if let Some(val) = caps.name("val") {
            leaf(CompareOp::Eq, field, val.as_str())
        } else if let Some(min) = caps.name("min") {
            leaf(CompareOp::Ge, field, min.as_str())
        } else if let Some(max) = caps.name("max") {
            leaf(CompareOp::Le, field, max.as_str())
        } else {
            match (caps.name("begin"), caps.name("end")) {
                (Some(begin), Some(end)) => Predicate::And(vec![
                    leaf(CompareOp::Ge, field, begin.as_str()),
                    leaf(CompareOp::Le, field, end.as_str()),
                ]),
                _ => break,
            }
        };
        alternatives.push(alternative);
    }
    if alternatives.is_empty() || consumed != text.len() {
        return Err(AcctError::parse(index, format!("invalid range list '{text}' for {field}")));
    }
    Ok(Predicate::Or(alternatives))
}

// `-5` is a value, `-x` and `--x` are the next option.
fn is_option(arg: &str) -> bool {
    if arg.starts_with("--") && arg.len() > 2 {
        return true;
    }
    arg.starts_with('-') && arg.len() > 1 && arg.parse::<f64>().is_err()
}

/// Build a filter from option arguments.
///
/// Values may follow the option or be attached with `=`. Groups left open
/// at the end are closed.
pub fn parse_options<S: AsRef<str>>(args: &[S]) -> Result<Filter> {
    let mut stack = FilterStack::new();
    let mut i = 0;
    while i < args.len() {
        let index = i;
        let arg = args[i].as_ref();
        i += 1;
        let (name, inline) = match arg.split_once('=') {
            Some((name, value)) if name.starts_with("--") => (name, Some(value)),
            _ => (arg, None),
        };
        let option = OPTIONS
            .iter()
            .find(|(known, _)| *known == name)
            .map(|(_, option)| *option)
            .ok_or_else(|| AcctError::parse(index, format!("unknown filter option '{arg}'")))?;

        match option {
            FilterOption::Open(kind) => stack.push(Group::new(kind)),
            FilterOption::End => {
                if stack.pop().is_none() {
                    return Err(AcctError::parse(index, "--ge without an open group"));
                }
            }
            FilterOption::Glob(field) => {
                let pattern = take_value(args, &mut i, inline, name, index)?;
                let glob = Glob::new(field, pattern)
                    .map_err(|e| AcctError::parse(index, format!("invalid glob for {name}: {e}")))?;
                stack.add_filter(Predicate::Glob(glob));
            }
            FilterOption::Before(field) | FilterOption::After(field) => {
                let value = take_value(args, &mut i, inline, name, index)?;
                let time = parse_timestamp(value).ok_or_else(|| {
                    AcctError::parse(index, format!("invalid time '{value}' for {name}"))
                })?;
                let op = if matches!(option, FilterOption::Before(_)) {
                    CompareOp::Le
                } else {
                    CompareOp::Ge
                };
                let literal = time.format("%Y-%m-%d %H:%M:%S").to_string();
                stack.add_filter(leaf(op, field, &literal));
            }
            FilterOption::Range(field) => {
                let mut values: Vec<&str> = inline.into_iter().collect();
                while i < args.len() && !is_option(args[i].as_ref()) {
                    values.push(args[i].as_ref());
                    i += 1;
                }
                stack.add_filter(parse_ranges(field, &values.join(" "), index)?);
            }
        }
    }
    let filter = stack.finish();
    debug!(%filter, "compiled option filter");
    Ok(filter)
}

fn take_value<'a, S: AsRef<str>>(
    args: &'a [S],
    i: &mut usize,
    inline: Option<&'a str>,
    name: &str,
    index: usize,
) -> Result<&'a str> {
    if let Some(value) = inline {
        return Ok(value);
    }
    let value = args
        .get(*i)
        .map(|arg| arg.as_ref())
        .ok_or_else(|| AcctError::parse(index, format!("{name} requires a value")))?;
    *i += 1;
    Ok(value)
}
