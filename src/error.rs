use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Failed to read source file '{path}': {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Malformed record at line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },

    #[error("Invalid customer name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("Conflicting {table} data for '{key}': {reason}")]
    Conflict {
        table: &'static str,
        key: String,
        reason: String,
    },

    #[error("No {table} row found for key {key}")]
    UnknownKey { table: &'static str, key: String },

    #[error("Unknown query: {0}")]
    UnknownQuery(String),

    #[error("Query '{query}' requires parameter: {param}")]
    MissingParameter {
        query: &'static str,
        param: &'static str,
    },
}

impl EtlError {
    pub fn malformed(line: usize, reason: impl Into<String>) -> Self {
        EtlError::MalformedRecord {
            line,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
