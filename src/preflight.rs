//! Preflight: compare one year's bare column references with the header of
//! the raw CSV before it is uploaded.
//!
//! Computed expressions are skipped; only the engine's dry run can judge
//! them. Column matching is case-insensitive, as it is in the query engine.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::{
    error::ConfigurationError,
    mapping::{MappingStore, SourceExpr, Year},
    registry::CanonicalSchema,
};

/// Word families used when guessing a replacement column.
const SIMILAR_TERMS: &[(&str, &[&str])] = &[
    ("total", &["total", "tot"]),
    ("reject", &["reject", "denied", "invalid"]),
    ("count", &["count", "cnt", "total"]),
    ("mail", &["mail", "absentee", "post"]),
    ("uocava", &["uocava", "military", "overseas"]),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ColumnCheck {
    Found { column: String },
    Missing { column: String, suggestion: Option<String> },
    Computed { expression: String },
    Absent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldCheck {
    pub field: String,
    #[serde(flatten)]
    pub check: ColumnCheck,
}

pub fn read_headers(path: &Path, delimiter: u8) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .from_path(path)
        .with_context(|| format!("Opening CSV file {path:?}"))?;
    let headers = reader
        .headers()
        .with_context(|| format!("Reading header row of {path:?}"))?;
    Ok(headers
        .iter()
        .map(|header| header.trim().trim_start_matches('\u{feff}').to_string())
        .collect())
}

pub fn check_headers(
    schema: &CanonicalSchema,
    mappings: &MappingStore,
    year: Year,
    headers: &[String],
) -> Result<Vec<FieldCheck>, ConfigurationError> {
    let mapping = mappings.year(schema.section(), year)?;
    let mut checks = Vec::with_capacity(schema.specific_fields().len());
    for field in schema.specific_fields() {
        let entry = mapping
            .get(field)
            .ok_or_else(|| ConfigurationError::UnmappedField {
                section: schema.section().to_string(),
                year,
                field: field.clone(),
            })?;
        let check = match (entry, entry.bare_column()) {
            (SourceExpr::Absent, _) => ColumnCheck::Absent,
            (_, Some(column)) => {
                if headers
                    .iter()
                    .any(|header| header.eq_ignore_ascii_case(column))
                {
                    ColumnCheck::Found {
                        column: column.to_string(),
                    }
                } else {
                    ColumnCheck::Missing {
                        column: column.to_string(),
                        suggestion: suggest_column(column, headers),
                    }
                }
            }
            (SourceExpr::Expression(expression), None) => ColumnCheck::Computed {
                expression: expression.clone(),
            },
        };
        checks.push(FieldCheck {
            field: field.clone(),
            check,
        });
    }
    Ok(checks)
}

/// Best-effort guess for a column that is not in the header.
pub fn suggest_column(target: &str, headers: &[String]) -> Option<String> {
    let lowered = target.to_ascii_lowercase();
    if let Some(header) = headers
        .iter()
        .find(|header| header.to_ascii_lowercase() == lowered)
    {
        return Some(header.clone());
    }
    if let Some(header) = headers.iter().find(|header| {
        let candidate = header.to_ascii_lowercase();
        !candidate.is_empty() && (candidate.contains(&lowered) || lowered.contains(&candidate))
    }) {
        return Some(header.clone());
    }
    for (term, alternatives) in SIMILAR_TERMS {
        if !lowered.contains(term) {
            continue;
        }
        for alternative in alternatives.iter() {
            if let Some(header) = headers
                .iter()
                .find(|header| header.to_ascii_lowercase().contains(alternative))
            {
                return Some(header.clone());
            }
        }
    }
    None
}
