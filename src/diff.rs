//! Compare a deployed view definition with the freshly composed query.

use itertools::Itertools;
use similar::TextDiff;

use crate::{engine::QueryEngine, error::EngineError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewDiff {
    /// The view does not exist yet.
    Missing,
    /// Same text once trailing whitespace is ignored.
    Unchanged,
    /// Unified diff from the deployed text to the generated text.
    Changed(String),
}

pub fn view_diff(
    engine: &dyn QueryEngine,
    view: &str,
    generated: &str,
    context: usize,
) -> Result<ViewDiff, EngineError> {
    let Some(deployed) = engine.view_definition(view)? else {
        return Ok(ViewDiff::Missing);
    };
    let current = normalize(&deployed);
    let generated = normalize(generated);
    if current == generated {
        return Ok(ViewDiff::Unchanged);
    }
    let rendered = TextDiff::from_lines(&current, &generated)
        .unified_diff()
        .context_radius(context)
        .header("deployed", "generated")
        .to_string();
    Ok(ViewDiff::Changed(rendered))
}

fn normalize(sql: &str) -> String {
    let mut text = sql.lines().map(str::trim_end).join("\n").trim_end().to_string();
    text.push('\n');
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::MemoryEngine;

    const VIEW: &str = "p.analytics.reg_union";

    #[test]
    fn missing_view_is_reported() {
        let engine = MemoryEngine::new();
        assert_eq!(
            view_diff(&engine, VIEW, "SELECT 1", 3).expect("diff"),
            ViewDiff::Missing
        );
    }

    #[test]
    fn trailing_whitespace_is_not_a_change() {
        let engine = MemoryEngine::new().with_view(VIEW, "SELECT\n  a   \nFROM t  \n\n");
        assert_eq!(
            view_diff(&engine, VIEW, "SELECT\n  a\nFROM t\n", 3).expect("diff"),
            ViewDiff::Unchanged
        );
    }

    #[test]
    fn changed_lines_are_rendered_as_a_unified_diff() {
        let engine = MemoryEngine::new().with_view(VIEW, "SELECT\n  A1a AS total_reg\nFROM t");
        let diff = view_diff(&engine, VIEW, "SELECT\n  A1b AS total_reg\nFROM t", 3).expect("diff");
        let text = match diff {
            ViewDiff::Changed(text) => text,
            other => panic!("expected a change, got {other:?}"),
        };
        assert!(text.starts_with("--- deployed\n+++ generated\n"));
        assert!(text.contains("-  A1a AS total_reg\n"));
        assert!(text.contains("+  A1b AS total_reg\n"));
        assert!(text.contains(" FROM t\n"));
    }
}
