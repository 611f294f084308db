//! Field schemas: which named, typed values a record exposes.
//!
//! A [`Schema`] is an ordered table of [`FieldDescriptor`]s. A descriptor is
//! either *stored*, reading one raw column through a converter, or
//! *derived*, computing its value from other fields of the same record.
//! Schemas are built once at startup and shared behind an `Arc`, which
//! freezes them.

use std::collections::HashMap;
use std::fmt;

use crate::error::{AcctError, Result};
use crate::record::Record;
use crate::value::{Value, ValueKind};

/// Converts one raw column; the error string becomes the conversion cause.
pub type StoredConverter = fn(&str) -> std::result::Result<Value, String>;

/// Computes a derived field from the rest of the record.
pub type DerivedConverter = Box<dyn Fn(&Record) -> Result<Value> + Send + Sync>;

/// Where a field's value comes from.
pub enum Source {
    Stored {
        position: usize,
        convert: StoredConverter,
    },
    Derived(DerivedConverter),
}

/// One named field of a schema.
pub struct FieldDescriptor {
    name: String,
    kind: ValueKind,
    source: Source,
}

impl FieldDescriptor {
    /// A field read from `raw[position]`.
    pub fn stored(
        name: impl Into<String>,
        position: usize,
        kind: ValueKind,
        convert: StoredConverter,
    ) -> Self {
        FieldDescriptor {
            name: name.into(),
            kind,
            source: Source::Stored { position, convert },
        }
    }

    /// A field computed from other fields of the record.
    pub fn derived<F>(name: impl Into<String>, kind: ValueKind, compute: F) -> Self
    where
        F: Fn(&Record) -> Result<Value> + Send + Sync + 'static,
    {
        FieldDescriptor {
            name: name.into(),
            kind,
            source: Source::Derived(Box::new(compute)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared kind of the converted value.
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    /// Raw column position, `None` for derived fields.
    pub fn position(&self) -> Option<usize> {
        match self.source {
            Source::Stored { position, .. } => Some(position),
            Source::Derived(_) => None,
        }
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("position", &self.position())
            .finish()
    }
}

/// An ordered, name-unique set of field descriptors.
#[derive(Debug)]
pub struct Schema {
    name: &'static str,
    fields: Vec<FieldDescriptor>,
    index: HashMap<String, usize>,
}

impl Schema {
    pub fn new(name: &'static str) -> Self {
        Schema {
            name,
            fields: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Add a field. Names must be unique within the schema.
    pub fn register(&mut self, field: FieldDescriptor) -> Result<()> {
        if self.index.contains_key(field.name()) {
            return Err(AcctError::DuplicateField {
                name: field.name().to_string(),
            });
        }
        self.index.insert(field.name().to_string(), self.fields.len());
        self.fields.push(field);
        Ok(())
    }

    /// Registration slot of a field, used as the record memo index.
    pub fn slot(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn descriptor(&self, name: &str) -> Option<&FieldDescriptor> {
        self.slot(name).map(|i| &self.fields[i])
    }

    pub(crate) fn descriptor_at(&self, slot: usize) -> &FieldDescriptor {
        &self.fields[slot]
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Field names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.fields.iter().map(|f| f.name())
    }

    /// Field names in ASCII lexical order.
    pub fn fields(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Resolve a possibly dotted field path (`start_time.hour`) to the kind
    /// of value it yields.
    pub fn resolve_kind(&self, path: &str) -> Result<ValueKind> {
        let mut parts = path.split('.');
        let base = parts.next().unwrap_or_default();
        let mut kind = self
            .descriptor(base)
            .map(|f| f.kind())
            .ok_or_else(|| AcctError::unknown_field(path))?;
        for attribute in parts {
            kind = kind
                .attribute_kind(attribute)
                .ok_or_else(|| AcctError::unknown_field(path))?;
        }
        Ok(kind)
    }
}
