//! Rendering records through `{field}` templates.
//!
//! A template is text with `{name}` placeholders. A placeholder may add
//! `!h` to print numbers with an SI prefix (`{maxvmem!h}` gives `12.4K`) or
//! a strftime spec for timestamps (`{end_time:%Y-%m-%d}`). Dotted
//! attributes work as in filters. `{{` and `}}` are literal braces.

use std::fmt::Write;

use chrono::NaiveDateTime;
use chrono::format::{Fixed, Item, StrftimeItems};

use crate::error::{AcctError, Result};
use crate::record::Record;
use crate::schema::Schema;
use crate::value::{Value, ValueKind};

/// Template used when none is given.
pub const DEFAULT_TEMPLATE: &str = "\
==============================================================
qname           {qname}
hostname        {hostname}
group           {group}
owner           {owner}
project         {project}
department      {department}
jobname         {job_name}
jobnumber       {job_number}
taskid          {task_number}
pe_taskid       {pe_taskid}
account         {account}
priority        {priority}
qsub_time       {submission_time:%x %X}
start_time      {start_time:%x %X}
end_time        {end_time:%x %X}
waiting_time    {waiting_time}
aggregate_time  {aggregate_time}
granted_pe      {granted_pe}
slots           {slots}
failed          {failed.full}
exit_status     {exit_status}
ru_wallclock    {ru_wallclock}
ru_utime        {ru_utime}
ru_stime        {ru_stime}
ru_maxrss       {ru_maxrss!h}
ru_ixrss        {ru_ixrss!h}
ru_ismrss       {ru_ismrss!h}
ru_idrss        {ru_idrss!h}
ru_isrss        {ru_isrss!h}
ru_minflt       {ru_minflt}
ru_majflt       {ru_majflt}
ru_nswap        {ru_nswap}
ru_inblock      {ru_inblock}
ru_oublock      {ru_oublock}
ru_msgsnd       {ru_msgsnd}
ru_msgrcv       {ru_msgrcv}
ru_nsignals     {ru_nsignals}
ru_nvcsw        {ru_nvcsw}
ru_nivcsw       {ru_nivcsw}
cpu             {cpu}
mem             {mem}
io              {io}
iow             {iow}
maxvmem         {maxvmem!h}b
arid            {arid}";

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Field {
        path: String,
        human: bool,
        time_format: Option<String>,
    },
}

/// A parsed template, checked against a schema.
#[derive(Debug, Clone)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(text: &str, schema: &Schema) -> Result<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = text.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            match c {
                '{' if chars.peek().map(|(_, next)| *next) == Some('{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek().map(|(_, next)| *next) == Some('}') => {
                    chars.next();
                    literal.push('}');
                }
                '}' => return Err(AcctError::parse(pos, "single '}' in template")),
                '{' => {
                    let body_start = pos + 1;
                    let body_len = text[body_start..]
                        .find('}')
                        .ok_or_else(|| AcctError::parse(pos, "unclosed '{' in template"))?;
                    let body = &text[body_start..body_start + body_len];
                    for _ in body.chars() {
                        chars.next();
                    }
                    chars.next();

                    if !literal.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut literal)));
                    }
                    segments.push(field_segment(body, body_start, schema)?);
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Text(literal));
        }
        Ok(Template {
            source: text.to_string(),
            segments,
        })
    }

    /// The template text as given.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn render(&self, record: &Record) -> Result<String> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Field {
                    path,
                    human,
                    time_format,
                } => {
                    let value = record.get(path)?;
                    match (&value, time_format, human) {
                        (Value::Time(t), Some(spec), _) => {
                            write!(out, "{}", t.format(spec)).map_err(|_| {
                                AcctError::FieldConversion {
                                    field: path.clone(),
                                    raw_value: t.to_string(),
                                    cause: format!("cannot format with '{spec}'"),
                                }
                            })?
                        }
                        (_, _, true) => match value.as_f64() {
                            Some(number) => out.push_str(&si_format(number)),
                            None => out.push_str(&value.to_string()),
                        },
                        _ => out.push_str(&value.to_string()),
                    }
                }
            }
        }
        Ok(out)
    }
}

fn field_segment(body: &str, start: usize, schema: &Schema) -> Result<Segment> {
    let (head, time_format) = match body.split_once(':') {
        Some((head, spec)) => (head, Some(spec)),
        None => (body, None),
    };
    let (path, conversion) = match head.split_once('!') {
        Some((path, conversion)) => (path, Some(conversion)),
        None => (head, None),
    };
    let path = path.trim();
    if path.is_empty() {
        return Err(AcctError::parse(start, "empty field name in template"));
    }
    let human = match conversion {
        None => false,
        Some("h") => true,
        Some(other) => {
            return Err(AcctError::parse(
                start,
                format!("unknown conversion '!{other}' for {path}"),
            ));
        }
    };

    let kind = schema.resolve_kind(path)?;
    if let Some(spec) = time_format {
        if kind != ValueKind::Time {
            return Err(AcctError::parse(
                start,
                format!("format spec '{spec}' given for non-timestamp field {path}"),
            ));
        }
        if !renders_naive_time(spec) {
            return Err(AcctError::parse(start, format!("invalid time format '{spec}'")));
        }
    }
    Ok(Segment::Field {
        path: path.to_string(),
        human,
        time_format: time_format.map(str::to_string),
    })
}

/// Whether `spec` can format a timestamp that carries no UTC offset.
fn renders_naive_time(spec: &str) -> bool {
    let needs_offset = StrftimeItems::new(spec).any(|item| {
        matches!(
            item,
            Item::Error
                | Item::Fixed(
                    Fixed::TimezoneName
                        | Fixed::TimezoneOffset
                        | Fixed::TimezoneOffsetZ
                        | Fixed::TimezoneOffsetColon
                        | Fixed::TimezoneOffsetColonZ
                        | Fixed::TimezoneOffsetDoubleColon
                        | Fixed::TimezoneOffsetTripleColon
                )
        )
    });
    // Internal items such as %#z are parse-only; a trial render catches them.
    let sample = NaiveDateTime::default();
    !needs_offset && write!(String::new(), "{}", sample.format(spec)).is_ok()
}

const BIG_PREFIXES: [&str; 9] = ["", "K", "M", "G", "T", "P", "E", "Z", "Y"];
const SMALL_PREFIXES: [&str; 8] = ["m", "u", "n", "p", "f", "a", "z", "y"];

/// Scale by powers of 1000 and print four significant digits with an SI
/// prefix: `12400.0` gives `12.4K`, `0.0025` gives `2.5m`.
pub fn si_format(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    let sign = if value < 0.0 { "-" } else { "" };
    let largest = BIG_PREFIXES.len() as i32 - 1;
    let mut scaled = value.abs();
    // Powers of 1000: positive picks a big prefix, negative a small one.
    let mut group: i32 = 0;
    if scaled >= 1000.0 {
        while scaled >= 1000.0 && group < largest {
            scaled /= 1000.0;
            group += 1;
        }
    } else if scaled != 0.0 && scaled < 0.01 {
        while scaled < 1.0 && -group < SMALL_PREFIXES.len() as i32 {
            scaled *= 1000.0;
            group -= 1;
        }
    }
    let mut digits = four_significant(scaled);
    // Rounding can carry into the next prefix: 999_999 is 1M, not 1000K.
    if digits == "1000" && group < largest {
        digits = "1".to_string();
        group += 1;
    }
    let prefix = if group >= 0 {
        BIG_PREFIXES[group as usize]
    } else {
        SMALL_PREFIXES[(-group - 1) as usize]
    };
    format!("{sign}{digits}{prefix}")
}

fn four_significant(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    let magnitude = value.log10().floor() as i32;
    let decimals = (3 - magnitude).clamp(0, 20) as usize;
    let text = format!("{value:.decimals$}");
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text
    }
}
