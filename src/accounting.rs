//! Grid Engine accounting file layout.
//!
//! The scheduler appends one colon-separated line per finished job.
//! Classic SGE writes 45 columns with epoch-second timestamps; Univa (UGE)
//! writes millisecond timestamps and appends `cwd` and `submit_cmd`.
//!
//! ```
//! use jobacct_rs::accounting::{AccountingFile, Schemas};
//! use jobacct_rs::Value;
//!
//! let line = "all.q:node1:staff:alice:sim:42:sge:0:1388534400:1388534460:\
//!             1388538000:0:0:3540.0:3000.0:12.5:1024:0:0:0:0:10:0:0:0.0:0:0:0:\
//!             0:0:0:NONE:defaultdepartment:NONE:4:0:3012.5:1.5:0.25:-u alice:\
//!             0.0:NONE:2048.0:0:0\n";
//! let schemas = Schemas::new().unwrap();
//! let mut file = AccountingFile::new(line.as_bytes(), schemas);
//! let record = file.next().unwrap().unwrap();
//! assert_eq!(record.get("owner").unwrap(), Value::Str("alice".to_string()));
//! assert_eq!(record.get("waiting_time_sec").unwrap(), Value::Float(60.0));
//! ```

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDateTime, TimeDelta};
use tracing::{debug, trace};

use crate::error::{AcctError, Result};
use crate::record::Record;
use crate::schema::{FieldDescriptor, Schema, StoredConverter};
use crate::value::{FailedCode, Value, ValueKind};

/// Rows wider than this use the extended (UGE) schema.
pub const BASE_WIDTH: usize = 45;

/// Column separator in the accounting file.
pub const DELIMITER: char = ':';

fn to_str(raw: &str) -> std::result::Result<Value, String> {
    Ok(Value::Str(raw.to_string()))
}

fn to_int(raw: &str) -> std::result::Result<Value, String> {
    raw.trim()
        .parse()
        .map(Value::Int)
        .map_err(|e| format!("not an integer: {e}"))
}

fn to_float(raw: &str) -> std::result::Result<Value, String> {
    raw.trim()
        .parse()
        .map(Value::Float)
        .map_err(|e| format!("not a float: {e}"))
}

fn to_decimal(raw: &str) -> std::result::Result<Value, String> {
    BigDecimal::from_str(raw.trim())
        .map(Value::Decimal)
        .map_err(|e| format!("not a decimal: {e}"))
}

fn to_failed(raw: &str) -> std::result::Result<Value, String> {
    raw.trim()
        .parse()
        .map(|code| Value::Failed(FailedCode::new(code)))
        .map_err(|e| format!("not a failure code: {e}"))
}

fn epoch_seconds(raw: &str) -> std::result::Result<Value, String> {
    let secs: i64 = raw
        .trim()
        .parse()
        .map_err(|e| format!("not an epoch timestamp: {e}"))?;
    DateTime::from_timestamp(secs, 0)
        .map(|t| Value::Time(t.naive_utc()))
        .ok_or_else(|| "timestamp out of range".to_string())
}

fn epoch_millis(raw: &str) -> std::result::Result<Value, String> {
    let millis: i64 = raw
        .trim()
        .parse()
        .map_err(|e| format!("not an epoch timestamp: {e}"))?;
    DateTime::from_timestamp_millis(millis)
        .map(|t| Value::Time(t.naive_utc()))
        .ok_or_else(|| "timestamp out of range".to_string())
}

// UGE escapes ':' inside these columns as 0xFF.
fn unescape_colons(raw: &str) -> std::result::Result<Value, String> {
    Ok(Value::Str(raw.replace('\u{FF}', ":")))
}

/// Stored columns shared by both layouts. `None` marks a timestamp column,
/// whose converter depends on the layout.
const COLUMNS: &[(&str, ValueKind, Option<StoredConverter>)] = &[
    ("qname", ValueKind::Str, Some(to_str)),
    ("hostname", ValueKind::Str, Some(to_str)),
    ("group", ValueKind::Str, Some(to_str)),
    ("owner", ValueKind::Str, Some(to_str)),
    ("job_name", ValueKind::Str, Some(to_str)),
    ("job_number", ValueKind::Int, Some(to_int)),
    ("account", ValueKind::Str, Some(to_str)),
    ("priority", ValueKind::Int, Some(to_int)),
    ("submission_time", ValueKind::Time, None),
    ("start_time", ValueKind::Time, None),
    ("end_time", ValueKind::Time, None),
    ("failed", ValueKind::Failed, Some(to_failed)),
    ("exit_status", ValueKind::Int, Some(to_int)),
    ("ru_wallclock", ValueKind::Float, Some(to_float)),
    ("ru_utime", ValueKind::Float, Some(to_float)),
    ("ru_stime", ValueKind::Float, Some(to_float)),
    ("ru_maxrss", ValueKind::Decimal, Some(to_decimal)),
    ("ru_ixrss", ValueKind::Int, Some(to_int)),
    ("ru_ismrss", ValueKind::Int, Some(to_int)),
    ("ru_idrss", ValueKind::Int, Some(to_int)),
    ("ru_isrss", ValueKind::Int, Some(to_int)),
    ("ru_minflt", ValueKind::Int, Some(to_int)),
    ("ru_majflt", ValueKind::Int, Some(to_int)),
    ("ru_nswap", ValueKind::Int, Some(to_int)),
    ("ru_inblock", ValueKind::Float, Some(to_float)),
    ("ru_oublock", ValueKind::Int, Some(to_int)),
    ("ru_msgsnd", ValueKind::Int, Some(to_int)),
    ("ru_msgrcv", ValueKind::Int, Some(to_int)),
    ("ru_nsignals", ValueKind::Int, Some(to_int)),
    ("ru_nvcsw", ValueKind::Int, Some(to_int)),
    ("ru_nivcsw", ValueKind::Int, Some(to_int)),
    ("project", ValueKind::Str, Some(to_str)),
    ("department", ValueKind::Str, Some(to_str)),
    ("granted_pe", ValueKind::Str, Some(to_str)),
    ("slots", ValueKind::Int, Some(to_int)),
    ("task_number", ValueKind::Int, Some(to_int)),
    ("cpu", ValueKind::Float, Some(to_float)),
    ("mem", ValueKind::Decimal, Some(to_decimal)),
    ("io", ValueKind::Decimal, Some(to_decimal)),
    ("category", ValueKind::Str, Some(to_str)),
    ("iow", ValueKind::Float, Some(to_float)),
    ("pe_taskid", ValueKind::Str, Some(to_str)),
    ("maxvmem", ValueKind::Float, Some(to_float)),
    ("arid", ValueKind::Int, Some(to_int)),
    ("ar_submission_time", ValueKind::Time, None),
];

fn time_of(record: &Record, name: &str) -> Result<NaiveDateTime> {
    let value = record.get(name)?;
    value.as_time().ok_or_else(|| AcctError::FieldConversion {
        field: name.to_string(),
        raw_value: value.to_string(),
        cause: "expected a timestamp".to_string(),
    })
}

fn duration_of(record: &Record, name: &str) -> Result<TimeDelta> {
    let value = record.get(name)?;
    value.as_duration().ok_or_else(|| AcctError::FieldConversion {
        field: name.to_string(),
        raw_value: value.to_string(),
        cause: "expected a duration".to_string(),
    })
}

/// Time from submission until `until`, zero if `until` is not later.
fn elapsed_since_submission(record: &Record, until: &str) -> Result<Value> {
    let submitted = time_of(record, "submission_time")?;
    let later = time_of(record, until)?;
    let elapsed = if submitted < later {
        later - submitted
    } else {
        TimeDelta::zero()
    };
    Ok(Value::Duration(elapsed))
}

fn in_seconds(record: &Record, name: &str) -> Result<Value> {
    let elapsed = duration_of(record, name)?;
    Ok(Value::Float(elapsed.num_milliseconds() as f64 / 1000.0))
}

fn build_schema(name: &'static str, timestamp: StoredConverter, extended: bool) -> Result<Schema> {
    let mut schema = Schema::new(name);
    for (position, (field, kind, convert)) in COLUMNS.iter().enumerate() {
        let convert = convert.unwrap_or(timestamp);
        schema.register(FieldDescriptor::stored(*field, position, *kind, convert))?;
    }
    if extended {
        schema.register(FieldDescriptor::stored(
            "cwd",
            BASE_WIDTH,
            ValueKind::Str,
            unescape_colons,
        ))?;
        schema.register(FieldDescriptor::stored(
            "submit_cmd",
            BASE_WIDTH + 1,
            ValueKind::Str,
            unescape_colons,
        ))?;
    }

    schema.register(FieldDescriptor::derived(
        "waiting_time",
        ValueKind::Duration,
        |r| elapsed_since_submission(r, "start_time"),
    ))?;
    schema.register(FieldDescriptor::derived(
        "waiting_time_sec",
        ValueKind::Float,
        |r| in_seconds(r, "waiting_time"),
    ))?;
    schema.register(FieldDescriptor::derived(
        "aggregate_time",
        ValueKind::Duration,
        |r| elapsed_since_submission(r, "end_time"),
    ))?;
    schema.register(FieldDescriptor::derived(
        "aggregate_time_sec",
        ValueKind::Float,
        |r| in_seconds(r, "aggregate_time"),
    ))?;
    Ok(schema)
}

/// The two accounting layouts, built once and shared by every record.
#[derive(Debug, Clone)]
pub struct Schemas {
    base: Arc<Schema>,
    extended: Arc<Schema>,
}

impl Schemas {
    pub fn new() -> Result<Self> {
        Ok(Schemas {
            base: Arc::new(build_schema("sge", epoch_seconds, false)?),
            extended: Arc::new(build_schema("uge", epoch_millis, true)?),
        })
    }

    /// Classic SGE layout.
    pub fn base(&self) -> &Arc<Schema> {
        &self.base
    }

    /// UGE layout; a superset of the base field names.
    pub fn extended(&self) -> &Arc<Schema> {
        &self.extended
    }

    /// Pick the layout for a row with `width` raw columns.
    pub fn for_width(&self, width: usize) -> &Arc<Schema> {
        if width > BASE_WIDTH {
            &self.extended
        } else {
            &self.base
        }
    }
}

/// Split one accounting line into raw columns. There is no quoting.
pub fn split_row(line: &str) -> Vec<String> {
    line.trim_end_matches(['\n', '\r'])
        .split(DELIMITER)
        .map(str::to_string)
        .collect()
}

// Accounting files are mostly ASCII; UGE's 0xFF escapes are not valid
// UTF-8, so fall back to reading the line byte-per-char.
fn decode_line(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(line) => line,
        Err(e) => e.into_bytes().into_iter().map(char::from).collect(),
    }
}

/// Iterator of records read from an accounting file.
///
/// Comment lines (`#`) and blank lines are skipped.
pub struct AccountingFile<R> {
    reader: R,
    schemas: Schemas,
    line_number: usize,
}

impl AccountingFile<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>, schemas: Schemas) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "opening accounting file");
        let file = File::open(path)?;
        Ok(AccountingFile::new(BufReader::new(file), schemas))
    }
}

impl<R: BufRead> AccountingFile<R> {
    pub fn new(reader: R, schemas: Schemas) -> Self {
        AccountingFile {
            reader,
            schemas,
            line_number: 0,
        }
    }

    /// 1-based number of the last line read.
    pub fn line_number(&self) -> usize {
        self.line_number
    }

    fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            let mut bytes = Vec::new();
            if self.reader.read_until(b'\n', &mut bytes)? == 0 {
                return Ok(None);
            }
            self.line_number += 1;
            let line = decode_line(bytes);
            if line.starts_with('#') || line.trim().is_empty() {
                continue;
            }
            return Ok(Some(line));
        }
    }
}

impl<R: BufRead> Iterator for AccountingFile<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_line() {
            Ok(Some(line)) => {
                let raw = split_row(&line);
                let schema = self.schemas.for_width(raw.len());
                trace!(
                    line = self.line_number,
                    width = raw.len(),
                    schema = schema.name(),
                    "read record"
                );
                Some(Ok(Record::new(Arc::clone(schema), raw)))
            }
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const SGE_LINE: &str = "all.q:node1:staff:alice:sim:42:sge:0:1388534400:1388534460:\
1388538000:0:0:3540.0:3000.0:12.5:1024:0:0:0:0:10:0:0:0.0:0:0:0:0:0:0:NONE:\
defaultdepartment:NONE:4:0:3012.5:1.5:0.25:-u alice:0.0:NONE:2048.0:0:0";

    fn uge_line() -> String {
        let sge: Vec<&str> = SGE_LINE.split(':').collect();
        let mut cols: Vec<String> = sge.iter().map(|s| s.to_string()).collect();
        cols[8] = "1388534400000".to_string();
        cols[9] = "1388534460500".to_string();
        cols[10] = "1388538000000".to_string();
        cols[44] = "0".to_string();
        cols.push("/home/alice\u{FF}work".to_string());
        cols.push("qsub run.sh".to_string());
        cols.join(":")
    }

    #[test]
    fn test_schema_field_lists() {
        let schemas = Schemas::new().unwrap();
        assert_eq!(schemas.base().len(), 49);
        assert_eq!(schemas.extended().len(), 51);
        assert!(schemas.extended().contains("cwd"));
        assert!(!schemas.base().contains("cwd"));
        let fields = schemas.base().fields();
        assert_eq!(fields.first(), Some(&"account"));
        assert!(fields.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_split_row() {
        assert_eq!(split_row("a:b::c\n"), vec!["a", "b", "", "c"]);
        assert_eq!(split_row(SGE_LINE).len(), BASE_WIDTH);
    }

    #[test]
    fn test_read_sge_record() {
        let input = format!("# header comment\n\n{SGE_LINE}\n");
        let mut file = AccountingFile::new(input.as_bytes(), Schemas::new().unwrap());
        let record = file.next().unwrap().unwrap();
        assert_eq!(file.line_number(), 3);
        assert_eq!(record.schema().name(), "sge");
        assert_eq!(record.get("job_number").unwrap(), Value::Int(42));
        assert_eq!(record.get("ru_wallclock").unwrap(), Value::Float(3540.0));
        assert_eq!(
            record.get("start_time").unwrap(),
            Value::Time(
                NaiveDate::from_ymd_opt(2014, 1, 1)
                    .unwrap()
                    .and_hms_opt(0, 1, 0)
                    .unwrap()
            )
        );
        assert_eq!(
            record.get("failed").unwrap(),
            Value::Failed(FailedCode::new(0))
        );
        assert_eq!(record.get("category").unwrap().to_string(), "-u alice");
        assert_eq!(
            record.get("waiting_time").unwrap(),
            Value::Duration(TimeDelta::seconds(60))
        );
        assert_eq!(
            record.get("aggregate_time_sec").unwrap(),
            Value::Float(3600.0)
        );
        assert!(file.next().is_none());
    }

    #[test]
    fn test_read_uge_record() {
        let input = uge_line();
        let mut file = AccountingFile::new(input.as_bytes(), Schemas::new().unwrap());
        let record = file.next().unwrap().unwrap();
        assert_eq!(record.schema().name(), "uge");
        assert_eq!(
            record.get("cwd").unwrap(),
            Value::Str("/home/alice:work".to_string())
        );
        assert_eq!(record.get("waiting_time_sec").unwrap(), Value::Float(60.5));
    }

    #[test]
    fn test_latin1_fallback() {
        let mut bytes = b"a:b".to_vec();
        bytes.push(0xFF);
        bytes.push(b'c');
        assert_eq!(decode_line(bytes), "a:b\u{FF}c");
    }

    #[test]
    fn test_waiting_time_clamps() {
        let line = SGE_LINE.replacen(":1388534400:1388534460:", ":1388534460:1388534400:", 1);
        let mut file = AccountingFile::new(line.as_bytes(), Schemas::new().unwrap());
        let record = file.next().unwrap().unwrap();
        assert_eq!(
            record.get("waiting_time").unwrap(),
            Value::Duration(TimeDelta::zero())
        );
    }

    #[test]
    fn test_bad_column_is_typed_error() {
        let line = SGE_LINE.replacen(":42:", ":forty-two:", 1);
        let mut file = AccountingFile::new(line.as_bytes(), Schemas::new().unwrap());
        let record = file.next().unwrap().unwrap();
        assert!(matches!(
            record.get("job_number"),
            Err(AcctError::FieldConversion { field, raw_value, .. })
                if field == "job_number" && raw_value == "forty-two"
        ));
    }
}
