//! Recursive-descent parser for filter expressions.
//!
//! ```text
//! expr       := '(and' expr* ')' | '(or' expr* ')' | '(not' expr* ')' | comparison
//! comparison := '(' field op value ')'
//! field      := [a-z_.]+
//! op         := '<=' | '>=' | '!=' | '*=' | '~=' | '=' | '<' | '>'
//! value      := text up to ')'                      (comparisons and '*=')
//!             | D pattern D flags                   ('~=', D is any character)
//! ```
//!
//! Field names are checked against the schema while parsing, so a typo
//! fails before any record is read. Literals are kept as text and coerced
//! per record.

use tracing::debug;

use crate::builder::{FilterStack, Group, GroupKind};
use crate::error::{AcctError, Result};
use crate::predicate::{CompareOp, Comparison, Filter, Glob, Predicate, RegexFlags, RegexMatch};
use crate::schema::Schema;

const GROUP_TOKENS: [(&str, GroupKind); 3] = [
    ("(and", GroupKind::And),
    ("(or", GroupKind::Or),
    ("(not", GroupKind::Not),
];

#[derive(Debug, Clone, Copy)]
enum Operator {
    Compare(CompareOp),
    Glob,
    Regex,
}

// Two-character tokens come first so `<=` is never read as `<`.
const OPERATOR_TOKENS: [(&str, Operator); 8] = [
    ("<=", Operator::Compare(CompareOp::Le)),
    (">=", Operator::Compare(CompareOp::Ge)),
    ("!=", Operator::Compare(CompareOp::Ne)),
    ("*=", Operator::Glob),
    ("~=", Operator::Regex),
    ("=", Operator::Compare(CompareOp::Eq)),
    ("<", Operator::Compare(CompareOp::Lt)),
    (">", Operator::Compare(CompareOp::Gt)),
];

fn is_field_char(c: char) -> bool {
    c.is_ascii_lowercase() || c == '_' || c == '.'
}

/// Source text plus a byte cursor.
struct Context<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Context<'a> {
    fn new(text: &'a str) -> Self {
        Context { text, pos: 0 }
    }

    fn current(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn done(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn lstrip(&mut self) {
        let rest = self.current();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn advance(&mut self, bytes: usize) {
        self.pos = (self.pos + bytes).min(self.text.len());
    }

    fn error(&self, message: impl Into<String>) -> AcctError {
        AcctError::parse(self.pos, message)
    }
}

/// Parses filter expressions against one schema.
#[derive(Debug, Clone, Copy)]
pub struct Parser<'s> {
    schema: &'s Schema,
}

impl<'s> Parser<'s> {
    pub fn new(schema: &'s Schema) -> Self {
        Parser { schema }
    }

    /// Parse one complete expression into a sealed [`Filter`].
    pub fn parse(&self, text: &str) -> Result<Filter> {
        let mut context = Context::new(text);
        let mut stack = FilterStack::new();
        self.expr(&mut context, &mut stack)?;
        context.lstrip();
        if !context.done() {
            return Err(context.error("unexpected text after expression"));
        }
        let filter = stack.finish();
        debug!(%filter, schema = self.schema.name(), "compiled filter");
        Ok(filter)
    }

    fn expr(&self, context: &mut Context, stack: &mut FilterStack) -> Result<()> {
        context.lstrip();
        if let Some((token, kind)) = group_token(context.current()) {
            context.advance(token.len());
            stack.push(Group::new(kind));
            self.group_body(context, stack, kind)
        } else if context.current().starts_with('(') {
            let predicate = self.comparison(context)?;
            stack.add_filter(predicate);
            Ok(())
        } else {
            Err(context.error("expected '('"))
        }
    }

    fn group_body(&self, context: &mut Context, stack: &mut FilterStack, kind: GroupKind) -> Result<()> {
        loop {
            context.lstrip();
            let rest = context.current();
            if rest.starts_with('(') {
                self.expr(context, stack)?;
            } else if rest.starts_with(')') {
                context.advance(1);
                stack.pop();
                return Ok(());
            } else {
                return Err(context.error(format!("expected ')' to close '{}'", kind.keyword())));
            }
        }
    }

    fn comparison(&self, context: &mut Context) -> Result<Predicate> {
        context.advance(1);
        context.lstrip();

        let rest = context.current();
        let len = rest.find(|c: char| !is_field_char(c)).unwrap_or(rest.len());
        if len == 0 {
            return Err(context.error("expected a field name"));
        }
        let field = &rest[..len];
        self.schema.resolve_kind(field)?;
        context.advance(len);
        context.lstrip();

        let (token, operator) = OPERATOR_TOKENS
            .iter()
            .find(|(token, _)| context.current().starts_with(token))
            .copied()
            .ok_or_else(|| context.error("expected a relational operator"))?;
        context.advance(token.len());

        let value_start = context.pos;
        let predicate = match operator {
            Operator::Compare(op) => {
                let literal = simple_value(context)?;
                Predicate::Compare(Comparison::new(op, field, literal))
            }
            Operator::Glob => {
                let pattern = simple_value(context)?;
                let glob = Glob::new(field, pattern)
                    .map_err(|e| AcctError::parse(value_start, format!("invalid glob: {e}")))?;
                Predicate::Glob(glob)
            }
            Operator::Regex => {
                let (pattern, flags) = regex_value(context)?;
                let regex = RegexMatch::new(field, pattern, flags)
                    .map_err(|e| AcctError::parse(value_start, format!("invalid regex: {e}")))?;
                Predicate::Regex(regex)
            }
        };

        context.lstrip();
        if !context.current().starts_with(')') {
            return Err(context.error("expected ')' to close comparison"));
        }
        context.advance(1);
        Ok(predicate)
    }
}

fn group_token(rest: &str) -> Option<(&'static str, GroupKind)> {
    GROUP_TOKENS.iter().copied().find(|(token, _)| {
        rest.starts_with(token) && !rest[token.len()..].starts_with(is_field_char)
    })
}

/// Everything up to the next `)`, trimmed.
fn simple_value(context: &mut Context) -> Result<String> {
    let rest = context.current();
    match rest.find(')') {
        Some(end) => {
            context.advance(end);
            Ok(rest[..end].trim().to_string())
        }
        None => {
            context.advance(rest.len());
            Err(context.error("expected ')' to close comparison"))
        }
    }
}

/// `D pattern D flags`: the first non-blank character is the delimiter and
/// the pattern runs to its next occurrence.
fn regex_value(context: &mut Context) -> Result<(String, RegexFlags)> {
    context.lstrip();
    let rest = context.current();
    let delim = rest
        .chars()
        .next()
        .ok_or_else(|| context.error("expected a regex delimiter"))?;
    let body = &rest[delim.len_utf8()..];
    let end = body
        .find(delim)
        .ok_or_else(|| context.error(format!("missing closing regex delimiter '{delim}'")))?;
    let pattern = body[..end].to_string();
    context.advance(2 * delim.len_utf8() + end);

    let mut flags = RegexFlags::default();
    while let Some(letter) = context.current().chars().next() {
        if letter.is_whitespace() || letter == ')' {
            break;
        }
        if !flags.set(letter) {
            return Err(context.error(format!("unknown regex flag '{letter}'")));
        }
        context.advance(letter.len_utf8());
    }
    Ok((pattern, flags))
}

/// Parse `text` against `schema`.
pub fn parse_filter(text: &str, schema: &Schema) -> Result<Filter> {
    Parser::new(schema).parse(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use crate::schema::FieldDescriptor;
    use crate::value::{parse_timestamp, Value, ValueKind};
    use std::sync::Arc;

    fn text(raw: &str) -> std::result::Result<Value, String> {
        Ok(Value::Str(raw.to_string()))
    }

    fn int(raw: &str) -> std::result::Result<Value, String> {
        raw.parse().map(Value::Int).map_err(|e| format!("{e}"))
    }

    fn float(raw: &str) -> std::result::Result<Value, String> {
        raw.parse().map(Value::Float).map_err(|e| format!("{e}"))
    }

    fn time(raw: &str) -> std::result::Result<Value, String> {
        parse_timestamp(raw)
            .map(Value::Time)
            .ok_or_else(|| "bad time".to_string())
    }

    fn schema() -> Arc<Schema> {
        let mut schema = Schema::new("test");
        schema
            .register(FieldDescriptor::stored("owner", 0, ValueKind::Str, text))
            .unwrap();
        schema
            .register(FieldDescriptor::stored("qname", 1, ValueKind::Str, text))
            .unwrap();
        schema
            .register(FieldDescriptor::stored("slots", 2, ValueKind::Int, int))
            .unwrap();
        schema
            .register(FieldDescriptor::stored("ru_wallclock", 3, ValueKind::Float, float))
            .unwrap();
        schema
            .register(FieldDescriptor::stored("end_time", 4, ValueKind::Time, time))
            .unwrap();
        Arc::new(schema)
    }

    fn record(owner: &str, qname: &str, slots: &str, wallclock: &str) -> Record {
        let raw = [owner, qname, slots, wallclock, "2014-03-01 09:30:00"];
        Record::new(schema(), raw.iter().map(|s| s.to_string()).collect())
    }

    fn parse(text: &str) -> Result<Filter> {
        parse_filter(text, &schema())
    }

    fn parse_error_at(text: &str) -> usize {
        match parse(text) {
            Err(AcctError::Parse { position, .. }) => position,
            other => panic!("Expected parse error for {text:?}, got {other:?}"),
        }
    }

    #[test]
    fn test_two_char_operator_wins() {
        let filter = parse("(slots <= 4)").unwrap();
        match filter.predicates() {
            [Predicate::Compare(c)] => {
                assert_eq!(c.op(), CompareOp::Le);
                assert_eq!(c.literal(), "4");
            }
            other => panic!("Expected one comparison, got {other:?}"),
        }
        assert!(filter.matches(&record("bob", "all.q", "4", "1.0")).unwrap());
        assert!(!filter.matches(&record("bob", "all.q", "5", "1.0")).unwrap());
    }

    #[test]
    fn test_all_operators() {
        for (text, op) in [
            ("(slots = 1)", CompareOp::Eq),
            ("(slots != 1)", CompareOp::Ne),
            ("(slots < 1)", CompareOp::Lt),
            ("(slots <= 1)", CompareOp::Le),
            ("(slots > 1)", CompareOp::Gt),
            ("(slots >= 1)", CompareOp::Ge),
        ] {
            match parse(text).unwrap().predicates() {
                [Predicate::Compare(c)] => assert_eq!(c.op(), op, "{text}"),
                other => panic!("Expected a comparison for {text}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_numeric_coercion() {
        let filter = parse("(ru_wallclock > 100)").unwrap();
        assert!(filter.matches(&record("bob", "all.q", "1", "150.0")).unwrap());
        assert!(!filter.matches(&record("bob", "all.q", "1", "50.0")).unwrap());
    }

    #[test]
    fn test_regex_custom_delimiter_and_flag() {
        let r = record("John Smith", "all.q", "1", "1.0");
        assert!(parse("(owner ~= #j.*smith#I)").unwrap().matches(&r).unwrap());
        assert!(!parse("(owner ~= #j.*smith#)").unwrap().matches(&r).unwrap());
        assert!(parse("(owner ~= |John / Sm|)").is_ok());
    }

    #[test]
    fn test_glob_and_regex_anchoring() {
        let r = record("abcdef", "main.q", "1", "1.0");
        assert!(parse("(owner ~= /abc/)").unwrap().matches(&r).unwrap());
        assert!(!parse("(owner *= abc)").unwrap().matches(&r).unwrap());
        assert!(parse("(qname *= *.Q)").unwrap().matches(&r).unwrap());
    }

    #[test]
    fn test_groups() {
        let r = record("bob", "all.q", "4", "150.0");
        let cases = [
            ("(and (owner = bob) (slots >= 4))", true),
            ("(and (owner = bob) (slots > 4))", false),
            ("(or (owner = alice) (slots > 2))", true),
            ("(or (owner = alice) (slots > 4))", false),
            ("(not (owner = alice))", true),
            ("(not (owner = bob))", false),
            ("(and (not (owner = alice) (qname = x.q)) (slots = 4))", true),
            // Each not inverts its children, so two cancel out
            ("(not (not (owner = bob)))", true),
            ("(not (not (owner = alice)))", false),
            ("(and(owner=bob)(or(slots=1)(slots=4)))", true),
            ("(and)", true),
        ];
        for (text, expected) in cases {
            let filter = parse(text).unwrap();
            assert_eq!(filter.matches(&r).unwrap(), expected, "{text}");
        }
    }

    #[test]
    fn test_missing_close_paren() {
        assert_eq!(parse_error_at("(and (owner = bob)"), 18);
        assert!(parse("(owner = bob").is_err());
        assert!(parse("(or (owner = bob) x)").is_err());
    }

    #[test]
    fn test_missing_operator_and_open_paren() {
        assert_eq!(parse_error_at("(owner ? bob)"), 7);
        assert_eq!(parse_error_at("owner = bob"), 0);
        assert_eq!(parse_error_at(""), 0);
        assert_eq!(parse_error_at("( = bob)"), 2);
    }

    #[test]
    fn test_regex_errors() {
        // Unknown flag is reported where it appears
        assert_eq!(parse_error_at("(owner ~= /x/Q)"), 13);
        // Unterminated pattern stops at the end of input
        assert!(matches!(
            parse("(owner ~= /abc)"),
            Err(AcctError::Parse { .. })
        ));
        assert!(parse("(owner ~= ").is_err());
        assert!(parse("(owner ~= /(/)").is_err());
    }

    #[test]
    fn test_unknown_field_at_parse_time() {
        assert!(matches!(
            parse("(not_a_field = 1)"),
            Err(AcctError::UnknownField { name }) if name == "not_a_field"
        ));
        assert!(matches!(
            parse("(end_time.fortnight = 1)"),
            Err(AcctError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_dotted_attribute() {
        let r = record("bob", "all.q", "1", "1.0");
        assert!(parse("(end_time.hour = 9)").unwrap().matches(&r).unwrap());
        assert!(parse("(end_time > 2014-03-01)").unwrap().matches(&r).unwrap());
    }

    #[test]
    fn test_trailing_text() {
        assert_eq!(parse_error_at("(owner = bob) (slots = 1)"), 14);
        assert!(parse("  (owner = bob)  ").is_ok());
    }

    #[test]
    fn test_display_reparses() {
        let text = "(and (owner ~= #a/b#I) (or (qname *= *.q) (not (slots < 2))))";
        let filter = parse(text).unwrap();
        assert_eq!(filter.to_string(), text);
        assert_eq!(parse(&filter.to_string()).unwrap().to_string(), text);
    }
}
