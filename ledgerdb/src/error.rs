use crate::validation::FieldErrors;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerDbError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Unknown model class: {0}")]
    UnknownModel(String),

    #[error("Validation failed: {0}")]
    Validation(FieldErrors),

    #[error("Record not found: {model}/{id}")]
    NotFound { model: String, id: String },

    #[error("Record is referenced by other records: {model}/{id}")]
    InUse { model: String, id: String },

    #[error("Atomic step '{step}' failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: Box<LedgerDbError>,
    },

    #[error("Failed to load {}: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: Box<LedgerDbError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl LedgerDbError {
    /// Short machine-readable kind, as reported in serialized outcomes.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerDbError::Schema(_) => "schema",
            LedgerDbError::UnknownModel(_) => "unknownModel",
            LedgerDbError::Validation(_) => "validation",
            LedgerDbError::NotFound { .. } => "notFound",
            LedgerDbError::InUse { .. } => "isUsed",
            LedgerDbError::StepFailed { source, .. } => source.kind(),
            LedgerDbError::Load { .. } => "load",
            LedgerDbError::Io(_) => "io",
            LedgerDbError::Yaml(_) => "yaml",
            LedgerDbError::Json(_) => "json",
            LedgerDbError::Other(_) => "other",
        }
    }

    /// Field errors carried by this error, looking through atomic step failures.
    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            LedgerDbError::Validation(errors) => Some(errors),
            LedgerDbError::StepFailed { source, .. } => source.field_errors(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerDbError>;
