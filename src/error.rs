//! Error types for filter compilation and record evaluation.

use thiserror::Error;

/// Errors raised while compiling filters or reading accounting records.
///
/// None of these are swallowed inside the library; the caller decides
/// whether a per-record failure aborts the run or skips the record.
#[derive(Debug, Error)]
pub enum AcctError {
    /// Malformed filter expression or template text.
    #[error("parse error at position {position}: {message}")]
    Parse { position: usize, message: String },

    /// A name that is not part of the record schema.
    #[error("unknown field '{name}'")]
    UnknownField { name: String },

    /// An expression literal could not be read as the field's type.
    #[error("cannot compare {field} with '{literal}': not a valid {target}")]
    LiteralCoercion {
        field: String,
        literal: String,
        target: &'static str,
    },

    /// A raw accounting column could not be converted to its declared type.
    #[error("field {field}: cannot convert '{raw_value}': {cause}")]
    FieldConversion {
        field: String,
        raw_value: String,
        cause: String,
    },

    /// The raw row is too short for a stored field.
    #[error("field {field}: row has no column {position}")]
    MissingColumn { field: String, position: usize },

    /// Two schema fields registered under one name.
    #[error("field '{name}' is already registered")]
    DuplicateField { name: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl AcctError {
    pub(crate) fn parse(position: usize, message: impl Into<String>) -> Self {
        AcctError::Parse {
            position,
            message: message.into(),
        }
    }

    pub(crate) fn unknown_field(name: impl Into<String>) -> Self {
        AcctError::UnknownField { name: name.into() }
    }
}

pub type Result<T> = std::result::Result<T, AcctError>;
