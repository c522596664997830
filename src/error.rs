use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::processing::taxonomy::TaxonId;

#[derive(Error, Debug)]
pub enum MapperError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON deserialization failed for '{path}': {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("CSV output failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A mapping, vocabulary or sanitization table is structurally valid JSON
    /// but breaks one of the table rules.
    #[error("Invalid table '{path}' at key '{key}': {reason}")]
    Table {
        path: PathBuf,
        key: String,
        reason: String,
    },

    /// Malformed taxonomy dump. `line` is 1-based; 0 means the whole file.
    #[error("Malformed taxonomy dump '{path}' line {line}: {reason}")]
    Taxdump {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// Malformed taxon → reference dataset TSV row
    #[error("Malformed reference dataset file '{path}' line {line}: {reason}")]
    ReferenceDatasets {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// A line of a JSON Lines input that is not a JSON object
    #[error("Malformed record in '{path}' line {line}: {reason}")]
    Record {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Taxon {0} not found in taxonomy")]
    TaxonNotFound(TaxonId),

    #[error("Taxonomy cache error: {0}")]
    Cache(#[from] rusqlite::Error),
}

impl MapperError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MapperError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        MapperError::Json {
            path: path.into(),
            source,
        }
    }

    pub fn table(path: impl Into<PathBuf>, key: impl Into<String>, reason: impl Into<String>) -> Self {
        MapperError::Table {
            path: path.into(),
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn taxdump(path: impl Into<PathBuf>, line: usize, reason: impl Into<String>) -> Self {
        MapperError::Taxdump {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }

    pub fn reference_datasets(path: impl Into<PathBuf>, line: usize, reason: impl Into<String>) -> Self {
        MapperError::ReferenceDatasets {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MapperError>;
