//! Configuration error type, grounded on `codegraph-ir`'s `config/error.rs`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for field '{field}': {value} not in {min}..={max}. {hint}")]
    Range {
        field: String,
        value: String,
        min: String,
        max: String,
        hint: String,
    },

    #[error("unknown alias mode '{0}'. valid values: under, over, combined")]
    UnknownAliasMode(String),

    #[error("{0}")]
    Custom(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

impl ConfigError {
    pub fn range_with_hint(
        field: impl Into<String>,
        value: impl ToString,
        min: impl ToString,
        max: impl ToString,
        hint: impl Into<String>,
    ) -> Self {
        Self::Range {
            field: field.into(),
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
            hint: hint.into(),
        }
    }
}
