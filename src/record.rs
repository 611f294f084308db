//! Lazily converted accounting records.
//!
//! A [`Record`] owns one raw row and resolves field names through its
//! [`Schema`]. Each field is converted at most once per record; later reads
//! return the memoized value. Derived fields may read other fields, which
//! are converted (and memoized) on demand.

use std::cell::OnceCell;
use std::sync::Arc;

use crate::error::{AcctError, Result};
use crate::schema::{Schema, Source};
use crate::value::Value;

/// How a caller addresses a record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKey<'a> {
    /// A schema field, optionally followed by dotted attributes.
    Name(&'a str),
    /// A raw column, returned unconverted as a string.
    Position(usize),
}

impl<'a> From<&'a str> for FieldKey<'a> {
    fn from(name: &'a str) -> Self {
        FieldKey::Name(name)
    }
}

impl<'a> From<&'a String> for FieldKey<'a> {
    fn from(name: &'a String) -> Self {
        FieldKey::Name(name)
    }
}

impl From<usize> for FieldKey<'_> {
    fn from(position: usize) -> Self {
        FieldKey::Position(position)
    }
}

/// One accounting row plus its schema.
#[derive(Debug)]
pub struct Record {
    schema: Arc<Schema>,
    raw: Vec<String>,
    memo: Vec<OnceCell<Value>>,
}

impl Record {
    pub fn new(schema: Arc<Schema>, raw: Vec<String>) -> Self {
        let memo = (0..schema.len()).map(|_| OnceCell::new()).collect();
        Record { schema, raw, memo }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Resolve a field by name (`"owner"`, `"end_time.hour"`) or raw position.
    pub fn get<'a>(&self, key: impl Into<FieldKey<'a>>) -> Result<Value> {
        match key.into() {
            FieldKey::Name(path) => self.resolve(path),
            FieldKey::Position(position) => self
                .raw
                .get(position)
                .map(|raw| Value::Str(raw.clone()))
                .ok_or_else(|| AcctError::MissingColumn {
                    field: format!("#{position}"),
                    position,
                }),
        }
    }

    fn resolve(&self, path: &str) -> Result<Value> {
        let mut parts = path.split('.');
        let base = parts.next().unwrap_or_default();
        let mut value = self.field(base)?;
        for attribute in parts {
            value = value
                .attribute(attribute)
                .ok_or_else(|| AcctError::unknown_field(path))?;
        }
        Ok(value)
    }

    fn field(&self, name: &str) -> Result<Value> {
        let slot = self
            .schema
            .slot(name)
            .ok_or_else(|| AcctError::unknown_field(name))?;
        if let Some(value) = self.memo[slot].get() {
            return Ok(value.clone());
        }

        let descriptor = self.schema.descriptor_at(slot);
        let value = match descriptor.source() {
            Source::Stored { position, convert } => {
                let raw = self
                    .raw
                    .get(*position)
                    .ok_or_else(|| AcctError::MissingColumn {
                        field: name.to_string(),
                        position: *position,
                    })?;
                convert(raw).map_err(|cause| AcctError::FieldConversion {
                    field: name.to_string(),
                    raw_value: raw.clone(),
                    cause,
                })?
            }
            Source::Derived(compute) => compute(self)?,
        };

        // A derived converter may already have filled the slot re-entrantly.
        Ok(self.memo[slot].get_or_init(|| value).clone())
    }

    /// Field names in schema registration order.
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.schema.names()
    }

    /// Field names in ASCII lexical order.
    pub fn fields(&self) -> Vec<&str> {
        self.schema.fields()
    }

    /// Number of schema fields, not raw columns.
    pub fn len(&self) -> usize {
        self.schema.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schema.is_empty()
    }

    /// Number of raw columns in the underlying row.
    pub fn width(&self) -> usize {
        self.raw.len()
    }
}
