//! Query engine boundary and the validation gate.
//!
//! The pipeline talks to the engine through [`QueryEngine::dry_run`] and
//! [`QueryEngine::replace_view`] only. A [`ValidationResult`] can only be
//! produced by [`validate`], and it remembers the digest of the text it
//! checked so that deployment can refuse any other text.

pub mod bigquery;
pub mod memory;

use log::{info, warn};
use crate::{
    compose::query_digest,
    error::{EngineError, PipelineError},
    retry::RetryPolicy,
};

/// Outcome of a plan-only submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DryRun {
    pub ok: bool,
    /// Engine diagnostic, verbatim. Empty when `ok`.
    pub diagnostic: String,
}

impl DryRun {
    pub fn accepted() -> Self {
        DryRun {
            ok: true,
            diagnostic: String::new(),
        }
    }

    pub fn rejected(diagnostic: impl Into<String>) -> Self {
        DryRun {
            ok: false,
            diagnostic: diagnostic.into(),
        }
    }
}

pub trait QueryEngine {
    /// Checks syntax and schema resolution without scanning any rows.
    fn dry_run(&self, sql: &str) -> Result<DryRun, EngineError>;

    /// Replaces the whole definition of `view` in one update.
    fn replace_view(&self, view: &str, sql: &str) -> Result<(), EngineError>;

    /// Current definition of `view`, if it exists.
    fn view_definition(&self, view: &str) -> Result<Option<String>, EngineError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    accepted: bool,
    diagnostic: String,
    digest: String,
}

impl ValidationResult {
    pub fn accepted(&self) -> bool {
        self.accepted
    }

    pub fn diagnostic(&self) -> &str {
        &self.diagnostic
    }

    /// True when this result was produced for exactly `sql`.
    pub fn covers(&self, sql: &str) -> bool {
        self.digest == query_digest(sql)
    }
}

pub fn validate(
    engine: &dyn QueryEngine,
    sql: &str,
    retry: &RetryPolicy,
) -> Result<ValidationResult, PipelineError> {
    let outcome = retry
        .run("Dry run", || engine.dry_run(sql))
        .map_err(|exhausted| PipelineError::Validation {
            attempts: exhausted.attempts,
            source: exhausted.last_error,
        })?;
    if outcome.ok {
        info!("Dry run accepted the query");
    } else {
        warn!("Dry run rejected the query: {}", outcome.diagnostic);
    }
    Ok(ValidationResult {
        accepted: outcome.ok,
        diagnostic: if outcome.ok {
            String::new()
        } else {
            outcome.diagnostic
        },
        digest: query_digest(sql),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::MemoryEngine;

    #[test]
    fn rejection_keeps_the_engine_diagnostic_verbatim() {
        let diagnostic = "Syntax error: Unexpected identifier \"A1x\" at [4:7]";
        let engine = MemoryEngine::new().reject_when_contains("A1x", diagnostic);
        let result = validate(&engine, "SELECT A1x", &RetryPolicy::immediate(1)).expect("validate");
        assert!(!result.accepted());
        assert_eq!(result.diagnostic(), diagnostic);
        assert!(result.covers("SELECT A1x"));
        assert!(!result.covers("SELECT A1y"));
    }

    #[test]
    fn transient_dry_run_failures_are_retried() {
        let engine = MemoryEngine::new().fail_dry_runs(2);
        let result = validate(&engine, "SELECT 1", &RetryPolicy::immediate(3)).expect("validate");
        assert!(result.accepted());
        assert_eq!(engine.dry_run_count(), 3);
    }

    #[test]
    fn exhausted_dry_run_is_an_error_not_a_rejection() {
        let engine = MemoryEngine::new().fail_dry_runs(5);
        let err = validate(&engine, "SELECT 1", &RetryPolicy::immediate(2)).unwrap_err();
        assert!(matches!(err, PipelineError::Validation { attempts: 2, .. }));
    }
}
