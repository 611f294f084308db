//! # jobacct-rs
//!
//! Select and inspect Grid Engine job accounting records.
//!
//! The scheduler writes one colon-separated line per finished job. This
//! library reads those lines into lazily converted [`Record`]s and filters
//! them with a small prefix-notation expression language:
//!
//! ```text
//! (and (owner = alice) (or (qname *= *.short) (slots <= 4)))
//! ```
//!
//! - `=`, `!=`, `<`, `<=`, `>`, `>=` compare after reading the literal as
//!   the field's type (number, decimal, timestamp, duration or text)
//! - `*=` is a case-insensitive shell glob over the whole value
//! - `~=` is a regex matched at the start of the value, written between
//!   any delimiter character and followed by flags: `#j.*smith#I`
//! - `(and ...)`, `(or ...)`, `(not ...)` group expressions
//!
//! ## Example
//!
//! ```
//! use jobacct_rs::{AccountingFile, Parser, Schemas};
//!
//! let log = "all.q:node1:staff:alice:sim:42:sge:0:1388534400:1388534460:\
//!            1388538000:0:0:3540.0:3000.0:12.5:1024:0:0:0:0:10:0:0:0.0:0:0:0:\
//!            0:0:0:NONE:defaultdepartment:NONE:4:0:3012.5:1.5:0.25:-u alice:\
//!            0.0:NONE:2048.0:0:0\n";
//!
//! let schemas = Schemas::new().unwrap();
//! let filter = Parser::new(schemas.extended())
//!     .parse("(and (owner ~= /al/) (ru_wallclock > 3600))")
//!     .unwrap();
//!
//! let matched = AccountingFile::new(log.as_bytes(), schemas)
//!     .filter(|r| filter.matches(r.as_ref().unwrap()).unwrap())
//!     .count();
//! assert_eq!(matched, 0);
//! ```

pub mod accounting;
pub mod builder;
pub mod config;
pub mod error;
pub mod format;
pub mod options;
pub mod parser;
pub mod predicate;
pub mod record;
pub mod schema;
pub mod value;

pub use accounting::{AccountingFile, Schemas};
pub use builder::{FilterStack, Group, GroupKind};
pub use error::{AcctError, Result};
pub use format::{DEFAULT_TEMPLATE, Template};
pub use options::parse_options;
pub use parser::{Parser, parse_filter};
pub use predicate::{CompareOp, Comparison, Filter, Glob, Predicate, RegexFlags, RegexMatch};
pub use record::{FieldKey, Record};
pub use schema::{FieldDescriptor, Schema, Source};
pub use value::{FailedCode, Value, ValueKind, parse_timestamp};
