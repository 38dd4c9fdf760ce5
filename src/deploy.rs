//! Deployment step: swap a view definition only behind an accepted dry run.

use log::{error, info, warn};

use crate::{
    engine::{QueryEngine, ValidationResult},
    error::DeploymentError,
    retry::RetryPolicy,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOutcome {
    pub deployed: bool,
    /// Engine diagnostic when the dry run rejected the query, else empty.
    pub diagnostic: String,
}

pub fn deploy(
    engine: &dyn QueryEngine,
    view: &str,
    sql: &str,
    validation: &ValidationResult,
    retry: &RetryPolicy,
) -> Result<DeployOutcome, DeploymentError> {
    if !validation.covers(sql) {
        return Err(DeploymentError::ValidationMismatch {
            view: view.to_string(),
        });
    }
    if !validation.accepted() {
        warn!("Leaving '{view}' unchanged: validation rejected the query");
        return Ok(DeployOutcome {
            deployed: false,
            diagnostic: validation.diagnostic().to_string(),
        });
    }

    retry
        .run(&format!("Replacing view '{view}'"), || {
            engine.replace_view(view, sql)
        })
        .map_err(|exhausted| {
            error!(
                "Replacing '{view}' failed after {} attempt(s)",
                exhausted.attempts
            );
            DeploymentError::Exhausted {
                view: view.to_string(),
                attempts: exhausted.attempts,
                diagnostic: exhausted.last_error.message().to_string(),
            }
        })?;
    info!("Replaced definition of '{view}'");
    Ok(DeployOutcome {
        deployed: true,
        diagnostic: String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{memory::MemoryEngine, validate};

    const VIEW: &str = "p.analytics.reg_union";

    #[test]
    fn rejected_validation_leaves_the_view_byte_identical() {
        let before = "SELECT 1 AS fips";
        let engine = MemoryEngine::new()
            .with_view(VIEW, before)
            .reject_when_contains("A1x", "Unrecognized name: A1x");
        let sql = "SELECT A1x AS total_reg";
        let validation = validate(&engine, sql, &RetryPolicy::immediate(1)).expect("validate");

        let outcome =
            deploy(&engine, VIEW, sql, &validation, &RetryPolicy::immediate(1)).expect("deploy");
        assert!(!outcome.deployed);
        assert_eq!(outcome.diagnostic, "Unrecognized name: A1x");
        assert_eq!(engine.view(VIEW).as_deref(), Some(before));
        assert_eq!(engine.replace_count(), 0);
    }

    #[test]
    fn validation_for_other_text_cannot_authorize_a_deploy() {
        let engine = MemoryEngine::new().with_view(VIEW, "SELECT 1");
        let validation =
            validate(&engine, "SELECT 2", &RetryPolicy::immediate(1)).expect("validate");
        let err = deploy(&engine, VIEW, "SELECT 3", &validation, &RetryPolicy::immediate(1))
            .unwrap_err();
        assert!(matches!(err, DeploymentError::ValidationMismatch { .. }));
        assert_eq!(engine.view(VIEW).as_deref(), Some("SELECT 1"));
    }

    #[test]
    fn transient_replace_failures_are_retried() {
        let engine = MemoryEngine::new().fail_replacements(2);
        let sql = "SELECT 2";
        let validation = validate(&engine, sql, &RetryPolicy::immediate(1)).expect("validate");
        let outcome =
            deploy(&engine, VIEW, sql, &validation, &RetryPolicy::immediate(3)).expect("deploy");
        assert!(outcome.deployed);
        assert_eq!(engine.view(VIEW).as_deref(), Some(sql));
        assert_eq!(engine.replace_count(), 3);
    }

    #[test]
    fn exhausted_retries_leave_the_view_unchanged() {
        let engine = MemoryEngine::new()
            .with_view(VIEW, "SELECT 1")
            .fail_replacements(10);
        let sql = "SELECT 2";
        let validation = validate(&engine, sql, &RetryPolicy::immediate(1)).expect("validate");
        let err = deploy(&engine, VIEW, sql, &validation, &RetryPolicy::immediate(3)).unwrap_err();
        assert_eq!(
            err,
            DeploymentError::Exhausted {
                view: VIEW.to_string(),
                attempts: 3,
                diagnostic: "503 backend error".to_string(),
            }
        );
        assert_eq!(engine.view(VIEW).as_deref(), Some("SELECT 1"));
    }

    #[test]
    fn redeploying_identical_text_is_a_no_op_in_effect() {
        let engine = MemoryEngine::new();
        let sql = "SELECT 2";
        let policy = RetryPolicy::immediate(1);
        let validation = validate(&engine, sql, &policy).expect("validate");
        deploy(&engine, VIEW, sql, &validation, &policy).expect("first");
        deploy(&engine, VIEW, sql, &validation, &policy).expect("second");
        assert_eq!(engine.view(VIEW).as_deref(), Some(sql));
        assert_eq!(engine.versions(VIEW), 2);
    }
}
