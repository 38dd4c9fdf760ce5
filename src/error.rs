//! Typed failures of the view-generation pipeline.
//!
//! Configuration and schema errors are programming or configuration defects
//! and are never retried. Engine errors carry a transient/permanent
//! classification that the retry layer consults. A dry-run rejection is not an
//! error at all; it travels as a [`crate::engine::ValidationResult`].

use thiserror::Error;

use crate::mapping::Year;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Unknown section '{0}'")]
    UnknownSection(String),
    #[error("Section '{section}' has no mappings for year {year}")]
    MissingYear { section: String, year: Year },
    #[error("Section '{section}' year {year}: field '{field}' has no mapping entry (use null to mark it absent)")]
    UnmappedField {
        section: String,
        year: Year,
        field: String,
    },
    #[error("Section '{section}' year {year}: mapping for '{field}' does not name a canonical field")]
    UnknownField {
        section: String,
        year: Year,
        field: String,
    },
    #[error("Section '{section}' year {year}: mapping for '{field}' is an empty expression")]
    EmptyExpression {
        section: String,
        year: Year,
        field: String,
    },
    #[error("Section '{section}' lists field '{field}' more than once")]
    DuplicateField { section: String, field: String },
    #[error("Section '{section}' does not list any years")]
    NoYears { section: String },
    #[error("Section '{section}' lists year {year} more than once")]
    DuplicateYear { section: String, year: Year },
    #[error("Section '{section}' has no fragment for year {year}")]
    MissingFragment { section: String, year: Year },
    #[error("Section '{section}' received a fragment for year {year} that is not in the year order")]
    UnexpectedFragment { section: String, year: Year },
    #[error("Section '{section}' has no source table for year {year}")]
    MissingSourceTable { section: String, year: Year },
    #[error("Section '{section}': composite key '{key}' collides with a canonical field")]
    KeyCollision { section: String, key: String },
    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Schema mismatch in section '{section}' for year {year}: {detail}")]
pub struct SchemaMismatchError {
    pub section: String,
    pub year: Year,
    pub detail: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// Network failures, throttling and server-side errors.
    #[error("Transient engine failure: {0}")]
    Transient(String),
    /// Authentication, permission and malformed-request failures.
    #[error("Engine failure: {0}")]
    Permanent(String),
}

impl EngineError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            EngineError::Transient(message) | EngineError::Permanent(message) => message,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeploymentError {
    #[error("Refusing to deploy '{view}': the validation result covers different query text")]
    ValidationMismatch { view: String },
    #[error("Deploying '{view}' failed after {attempts} attempt(s): {diagnostic}")]
    Exhausted {
        view: String,
        attempts: u32,
        diagnostic: String,
    },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    SchemaMismatch(#[from] SchemaMismatchError),
    #[error("Validation could not reach the query engine after {attempts} attempt(s): {source}")]
    Validation {
        attempts: u32,
        #[source]
        source: EngineError,
    },
    #[error(transparent)]
    Deployment(#[from] DeploymentError),
    #[error("Writing generated SQL to {path:?}")]
    Output {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}
