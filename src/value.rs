//! Semantic values carried by accounting record fields.
//!
//! Every field converter produces a [`Value`]. Filters compare values by
//! first coercing their textual literal into the field value's own kind,
//! so `(ru_wallclock > 100)` compares floats while `(owner > m)` compares
//! strings.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeDelta, Timelike};

use crate::error::{AcctError, Result};

/// The runtime type of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Str,
    Int,
    Float,
    Decimal,
    Time,
    Duration,
    Failed,
}

impl ValueKind {
    /// Human-readable type name used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Str => "string",
            ValueKind::Int => "integer",
            ValueKind::Float => "float",
            ValueKind::Decimal => "decimal",
            ValueKind::Time => "timestamp",
            ValueKind::Duration => "duration",
            ValueKind::Failed => "failure code",
        }
    }

    /// Kind of the named attribute, if values of this kind expose it.
    pub fn attribute_kind(self, attribute: &str) -> Option<ValueKind> {
        match (self, attribute) {
            (
                ValueKind::Time,
                "year" | "month" | "day" | "hour" | "minute" | "second" | "weekday" | "timestamp",
            ) => Some(ValueKind::Int),
            (ValueKind::Duration, "days" | "seconds") => Some(ValueKind::Int),
            (ValueKind::Duration, "total_seconds") => Some(ValueKind::Float),
            (ValueKind::Failed, "code") => Some(ValueKind::Int),
            (ValueKind::Failed, "message" | "full") => Some(ValueKind::Str),
            _ => None,
        }
    }
}

/// A converted field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Decimal(BigDecimal),
    Time(NaiveDateTime),
    Duration(TimeDelta),
    Failed(FailedCode),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Str(_) => ValueKind::Str,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Decimal(_) => ValueKind::Decimal,
            Value::Time(_) => ValueKind::Time,
            Value::Duration(_) => ValueKind::Duration,
            Value::Failed(_) => ValueKind::Failed,
        }
    }

    /// Read `literal` as a value of the same kind as `self`.
    ///
    /// Strings are taken verbatim, timestamps go through
    /// [`parse_timestamp`], durations are read as a number of seconds and
    /// everything else is a numeric parse. `field` only labels the error.
    pub fn coerce_literal(&self, field: &str, literal: &str) -> Result<Value> {
        let kind = self.kind();
        let text = literal.trim();
        let coerced = match kind {
            ValueKind::Str => Some(Value::Str(literal.to_string())),
            ValueKind::Int => text.parse().ok().map(Value::Int),
            ValueKind::Float => text.parse().ok().map(Value::Float),
            ValueKind::Decimal => BigDecimal::from_str(text).ok().map(Value::Decimal),
            ValueKind::Time => parse_timestamp(text).map(Value::Time),
            ValueKind::Duration => parse_seconds(text).map(Value::Duration),
            ValueKind::Failed => text.parse().ok().map(|code| Value::Failed(FailedCode(code))),
        };
        coerced.ok_or_else(|| AcctError::LiteralCoercion {
            field: field.to_string(),
            literal: literal.to_string(),
            target: kind.name(),
        })
    }

    /// Order two values of the same kind. Mixed kinds and NaN are unordered.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Decimal(a), Value::Decimal(b)) => Some(a.cmp(b)),
            (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
            (Value::Duration(a), Value::Duration(b)) => Some(a.cmp(b)),
            (Value::Failed(a), Value::Failed(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Look up a dotted attribute such as `hour` on a timestamp.
    pub fn attribute(&self, name: &str) -> Option<Value> {
        let value = match (self, name) {
            (Value::Time(t), "year") => Value::Int(i64::from(t.year())),
            (Value::Time(t), "month") => Value::Int(i64::from(t.month())),
            (Value::Time(t), "day") => Value::Int(i64::from(t.day())),
            (Value::Time(t), "hour") => Value::Int(i64::from(t.hour())),
            (Value::Time(t), "minute") => Value::Int(i64::from(t.minute())),
            (Value::Time(t), "second") => Value::Int(i64::from(t.second())),
            (Value::Time(t), "weekday") => {
                Value::Int(i64::from(t.weekday().num_days_from_monday()))
            }
            (Value::Time(t), "timestamp") => Value::Int(t.and_utc().timestamp()),
            (Value::Duration(d), "days") => Value::Int(d.num_days()),
            (Value::Duration(d), "seconds") => Value::Int(d.num_seconds() - d.num_days() * 86_400),
            (Value::Duration(d), "total_seconds") => Value::Float(seconds_of(d)),
            (Value::Failed(f), "code") => Value::Int(f.code()),
            (Value::Failed(f), "message") => Value::Str(f.message().to_string()),
            (Value::Failed(f), "full") => Value::Str(f.full()),
            _ => return None,
        };
        Some(value)
    }

    /// Numeric view used by human-readable (SI prefixed) rendering.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Decimal(d) => d.to_string().parse().ok(),
            Value::Duration(d) => Some(seconds_of(d)),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Time(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_duration(&self) -> Option<TimeDelta> {
        match self {
            Value::Duration(d) => Some(*d),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => {
                if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e16 {
                    write!(f, "{x:.1}")
                } else {
                    write!(f, "{x}")
                }
            }
            Value::Decimal(d) => write!(f, "{d}"),
            Value::Time(t) => {
                if t.nanosecond() == 0 {
                    write!(f, "{}", t.format("%Y-%m-%d %H:%M:%S"))
                } else {
                    write!(f, "{}", t.format("%Y-%m-%d %H:%M:%S%.6f"))
                }
            }
            Value::Duration(d) => write_duration(f, d),
            Value::Failed(code) => write!(f, "{code}"),
        }
    }
}

fn seconds_of(d: &TimeDelta) -> f64 {
    d.num_milliseconds() as f64 / 1000.0
}

// H:MM:SS with an optional "N day(s), " prefix and microsecond suffix.
fn write_duration(f: &mut fmt::Formatter, d: &TimeDelta) -> fmt::Result {
    let days = d.num_days();
    let rest = *d - TimeDelta::days(days);
    let secs = rest.num_seconds();
    let micros = (rest - TimeDelta::seconds(secs))
        .num_microseconds()
        .unwrap_or(0);
    match days {
        0 => {}
        1 | -1 => write!(f, "{days} day, ")?,
        _ => write!(f, "{days} days, ")?,
    }
    write!(f, "{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)?;
    if micros != 0 {
        write!(f, ".{micros:06}")?;
    }
    Ok(())
}

/// Job failure status code from the accounting `failed` column.
///
/// Ordering and equality only look at the integer code; the message is a
/// rendering concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FailedCode(i64);

impl FailedCode {
    pub fn new(code: i64) -> Self {
        FailedCode(code)
    }

    pub fn code(self) -> i64 {
        self.0
    }

    pub fn message(self) -> &'static str {
        match self.0 {
            0 => "Successful",
            1 => "assumedly before job: Failed early in execd",
            3 => "Before writing config: failed before execd set up local spool",
            4 => "Before writing PID: shepherd failed to record its pid",
            5 => "On reading config file",
            6 => "Setting processor set",
            7 => "Before prolog",
            8 => "In prolog",
            9 => "Before pestart: Failed before starting parallel environment",
            10 => "In pestart: Failed while starting parallel environment",
            11 => "Before Job: failed in shepherd before starting job",
            12 => "Before pestop: ran, but failed before calling PE stop",
            13 => "In pestop",
            14 => "Before epilog: ran, but failed before calling epilog script",
            15 => "In epilog: ran, but failed in epilog script",
            16 => "Releasing processor set: ran, but processor set could not be released",
            17 => "Through signal: Job killed by signal (possibly qdel)",
            18 => "Shepherd returned error",
            19 => "Shepherd failed while writing reports",
            20 => "Shepherd encountered a problem",
            21 => "qmaster asked about an unknown job",
            24 => "Migrating: job ran, will be migrated",
            25 => "Rescheduling: job ran, will be rescheduled",
            26 => "Opening output file: Failed to open stderr or stdout file",
            27 => "Failed to find requested shell",
            28 => "Failed changing to working directory",
            29 => "Failed setting up AFS Security",
            36 => "Failed because of configured remote startup daemon",
            37 => "Ran but stopped due to exceeding run time limit (h_rt, h_cpu, or h_vmem)",
            38 => "Failed adding supplementary gid to job",
            100 => "Assumedly after job",
            _ => "Unknown error code",
        }
    }

    /// Code followed by its message; success renders as the bare code.
    pub fn full(self) -> String {
        if self.0 == 0 {
            self.0.to_string()
        } else {
            format!("{} : {}", self.0, self.message())
        }
    }
}

impl fmt::Display for FailedCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

/// Permissive timestamp parser for filter literals and time options.
///
/// Accepts RFC 3339, the common ISO-ish layouts with or without seconds,
/// bare dates (midnight) and `@<epoch seconds>`. Results are UTC.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Some(epoch) = text.strip_prefix('@') {
        let secs = epoch.trim().parse().ok()?;
        return DateTime::from_timestamp(secs, 0).map(|t| t.naive_utc());
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(text) {
        return Some(t.naive_utc());
    }
    for format in DATETIME_FORMATS {
        if let Ok(t) = NaiveDateTime::parse_from_str(text, format) {
            return Some(t);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(text, format) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

fn parse_seconds(text: &str) -> Option<TimeDelta> {
    let secs: f64 = text.parse().ok()?;
    if !secs.is_finite() {
        return None;
    }
    TimeDelta::try_milliseconds((secs * 1000.0).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time(text: &str) -> NaiveDateTime {
        parse_timestamp(text).unwrap()
    }

    #[test]
    fn test_coerce_float_literal() {
        let v = Value::Float(150.0);
        assert_eq!(v.coerce_literal("ru_wallclock", " 100 ").unwrap(), Value::Float(100.0));
    }

    #[test]
    fn test_coerce_string_is_verbatim() {
        let v = Value::Str("bob".to_string());
        assert_eq!(
            v.coerce_literal("owner", "b o b").unwrap(),
            Value::Str("b o b".to_string())
        );
    }

    #[test]
    fn test_coerce_failure_names_target() {
        let v = Value::Int(4);
        match v.coerce_literal("slots", "four") {
            Err(AcctError::LiteralCoercion {
                field,
                literal,
                target,
            }) => {
                assert_eq!(field, "slots");
                assert_eq!(literal, "four");
                assert_eq!(target, "integer");
            }
            other => panic!("Expected LiteralCoercion, got {other:?}"),
        }
    }

    #[test]
    fn test_coerce_timestamp_literal() {
        let v = Value::Time(time("2014-03-01 12:00:00"));
        let rhs = v.coerce_literal("end_time", "2014-03-01").unwrap();
        assert_eq!(v.compare(&rhs), Some(Ordering::Greater));
    }

    #[test]
    fn test_coerce_duration_as_seconds() {
        let v = Value::Duration(TimeDelta::seconds(90));
        let rhs = v.coerce_literal("waiting_time", "60").unwrap();
        assert_eq!(rhs, Value::Duration(TimeDelta::seconds(60)));
    }

    #[test]
    fn test_failed_code_orders_by_code() {
        let v = Value::Failed(FailedCode::new(37));
        let rhs = v.coerce_literal("failed", "0").unwrap();
        assert_eq!(v.compare(&rhs), Some(Ordering::Greater));
        assert_eq!(v.compare(&Value::Failed(FailedCode::new(37))), Some(Ordering::Equal));
    }

    #[test]
    fn test_failed_code_full() {
        assert_eq!(FailedCode::new(0).full(), "0");
        assert_eq!(FailedCode::new(21).full(), "21 : qmaster asked about an unknown job");
        assert_eq!(FailedCode::new(99).message(), "Unknown error code");
    }

    #[test]
    fn test_mixed_kinds_are_unordered() {
        assert_eq!(Value::Int(1).compare(&Value::Float(1.0)), None);
        assert_eq!(Value::Float(f64::NAN).compare(&Value::Float(1.0)), None);
    }

    #[test]
    fn test_parse_timestamp_layouts() {
        let expected = NaiveDate::from_ymd_opt(2014, 3, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        assert_eq!(parse_timestamp("2014-03-01 09:30"), Some(expected));
        assert_eq!(parse_timestamp("2014-03-01T09:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2014/03/01 09:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2014-03-01T09:30:00Z"), Some(expected));
        assert_eq!(parse_timestamp("@1393666200"), Some(expected));
        assert_eq!(
            parse_timestamp("03/01/2014"),
            NaiveDate::from_ymd_opt(2014, 3, 1).unwrap().and_hms_opt(0, 0, 0)
        );
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_display_formats() {
        assert_eq!(Value::Float(150.0).to_string(), "150.0");
        assert_eq!(Value::Float(0.25).to_string(), "0.25");
        assert_eq!(Value::Time(time("2014-03-01 09:30:05")).to_string(), "2014-03-01 09:30:05");
        assert_eq!(Value::Duration(TimeDelta::seconds(3725)).to_string(), "1:02:05");
        assert_eq!(
            Value::Duration(TimeDelta::seconds(2 * 86_400 + 61)).to_string(),
            "2 days, 0:01:01"
        );
    }

    #[test]
    fn test_attributes() {
        let v = Value::Time(time("2014-03-01 09:30:05"));
        assert_eq!(v.attribute("hour"), Some(Value::Int(9)));
        // 2014-03-01 was a Saturday
        assert_eq!(v.attribute("weekday"), Some(Value::Int(5)));
        assert_eq!(v.attribute("nope"), None);

        let d = Value::Duration(TimeDelta::seconds(86_400 + 30));
        assert_eq!(d.attribute("days"), Some(Value::Int(1)));
        assert_eq!(d.attribute("seconds"), Some(Value::Int(30)));
        assert_eq!(d.attribute("total_seconds"), Some(Value::Float(86_430.0)));

        assert_eq!(ValueKind::Time.attribute_kind("minute"), Some(ValueKind::Int));
        assert_eq!(ValueKind::Failed.attribute_kind("full"), Some(ValueKind::Str));
        assert_eq!(ValueKind::Str.attribute_kind("full"), None);
    }
}
