//! In-process engine that records every call.
//!
//! Views live in a map; rejections are driven by substring rules so tests can
//! make the dry run fail on a specific malformed identifier.

use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
};

use crate::{
    engine::{DryRun, QueryEngine},
    error::EngineError,
};

#[derive(Debug, Default)]
struct State {
    views: BTreeMap<String, String>,
    versions: BTreeMap<String, usize>,
    dry_runs: usize,
    replacements: usize,
    pending_dry_run_failures: u32,
    pending_replace_failures: u32,
    denied: Option<String>,
}

#[derive(Debug, Default)]
pub struct MemoryEngine {
    rejections: Vec<(String, String)>,
    state: Mutex<State>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_view(self, view: &str, sql: &str) -> Self {
        self.lock().views.insert(view.to_string(), sql.to_string());
        self
    }

    /// Dry runs of text containing `pattern` are rejected with `diagnostic`.
    pub fn reject_when_contains(mut self, pattern: &str, diagnostic: &str) -> Self {
        self.rejections
            .push((pattern.to_string(), diagnostic.to_string()));
        self
    }

    /// The next `count` dry runs fail with a transient error.
    pub fn fail_dry_runs(self, count: u32) -> Self {
        self.lock().pending_dry_run_failures = count;
        self
    }

    /// The next `count` replacements fail with a transient error.
    pub fn fail_replacements(self, count: u32) -> Self {
        self.lock().pending_replace_failures = count;
        self
    }

    /// Every replacement fails with a permanent error.
    pub fn deny_replacements(self, message: &str) -> Self {
        self.lock().denied = Some(message.to_string());
        self
    }

    pub fn view(&self, view: &str) -> Option<String> {
        self.lock().views.get(view).cloned()
    }

    /// Number of successful replacements recorded for `view`.
    pub fn versions(&self, view: &str) -> usize {
        self.lock().versions.get(view).copied().unwrap_or(0)
    }

    pub fn dry_run_count(&self) -> usize {
        self.lock().dry_runs
    }

    /// Replacement attempts, successful or not.
    pub fn replace_count(&self) -> usize {
        self.lock().replacements
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl QueryEngine for MemoryEngine {
    fn dry_run(&self, sql: &str) -> Result<DryRun, EngineError> {
        let mut state = self.lock();
        state.dry_runs += 1;
        if state.pending_dry_run_failures > 0 {
            state.pending_dry_run_failures -= 1;
            return Err(EngineError::Transient(
                "connection reset by peer".to_string(),
            ));
        }
        for (pattern, diagnostic) in &self.rejections {
            if sql.contains(pattern.as_str()) {
                return Ok(DryRun::rejected(diagnostic.clone()));
            }
        }
        Ok(DryRun::accepted())
    }

    fn replace_view(&self, view: &str, sql: &str) -> Result<(), EngineError> {
        let mut state = self.lock();
        state.replacements += 1;
        if let Some(message) = &state.denied {
            return Err(EngineError::Permanent(message.clone()));
        }
        if state.pending_replace_failures > 0 {
            state.pending_replace_failures -= 1;
            return Err(EngineError::Transient("503 backend error".to_string()));
        }
        state.views.insert(view.to_string(), sql.to_string());
        *state.versions.entry(view.to_string()).or_insert(0) += 1;
        Ok(())
    }

    fn view_definition(&self, view: &str) -> Result<Option<String>, EngineError> {
        Ok(self.lock().views.get(view).cloned())
    }
}
