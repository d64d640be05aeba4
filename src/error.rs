use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum GenomeError {
    #[error("duplicate id {id} in {owner}")]
    DuplicateId { owner: String, id: String },

    #[error("{kind} {id} not found in {owner}")]
    MissingEntity {
        owner: String,
        kind: &'static str,
        id: String,
    },

    #[error("operation {operation} is not supported on {variant}")]
    UnsupportedOnVariant {
        operation: &'static str,
        variant: String,
    },

    #[error("malformed region list for gene {gene}: {reason}")]
    MalformedRegions { gene: String, reason: String },

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("precondition violated: {0}")]
    Precondition(String),

    #[error("transient link holder region {0} cannot be persisted")]
    TransientRegionPersisted(String),

    #[error("malformed {attribute} in <{context}>: {value:?}")]
    #[diagnostic(help("the file was written by an incompatible tool or edited by hand"))]
    Malformed {
        context: String,
        attribute: String,
        value: String,
    },

    #[error("failed to parse XML: {0}")]
    Xml(String),

    #[error("failed to parse CSV: {0}")]
    Csv(String),

    #[error("i/o error on {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("operation rejected: {0}")]
    #[diagnostic(help("the request cannot be satisfied with the current model contents"))]
    Infeasible(String),
}

/// Coarse classes used by callers deciding whether to report or abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Fatal,
    DataFormat,
    Infeasible,
}

impl GenomeError {
    pub fn class(&self) -> ErrorClass {
        match self {
            GenomeError::DuplicateId { .. }
            | GenomeError::MissingEntity { .. }
            | GenomeError::UnsupportedOnVariant { .. }
            | GenomeError::MalformedRegions { .. }
            | GenomeError::InvalidKey(_)
            | GenomeError::Precondition(_)
            | GenomeError::TransientRegionPersisted(_) => ErrorClass::Fatal,
            GenomeError::Malformed { .. }
            | GenomeError::Xml(_)
            | GenomeError::Csv(_)
            | GenomeError::Io { .. }
            | GenomeError::ConfigRead(_)
            | GenomeError::ConfigParse(_) => ErrorClass::DataFormat,
            GenomeError::Infeasible(_) => ErrorClass::Infeasible,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }

    pub(crate) fn missing(owner: &str, kind: &'static str, id: &str) -> Self {
        GenomeError::MissingEntity {
            owner: owner.to_string(),
            kind,
            id: id.to_string(),
        }
    }

    pub(crate) fn duplicate(owner: &str, id: &str) -> Self {
        GenomeError::DuplicateId {
            owner: owner.to_string(),
            id: id.to_string(),
        }
    }
}
