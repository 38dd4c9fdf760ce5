//! Union composer: one combining query per section.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;

use log::debug;
use sha2::{Digest, Sha256};

use crate::{
    error::{ConfigurationError, PipelineError, SchemaMismatchError},
    fragment::YearFragment,
    mapping::Year,
    registry::{COUNTY_CODE_FIELD, CanonicalSchema, STATE_CODE_FIELD},
};

const UNIONED_NAME: &str = "unioned";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedQuery {
    section: String,
    years: Vec<Year>,
    columns: Vec<String>,
    sql: String,
}

impl ComposedQuery {
    pub fn section(&self) -> &str {
        &self.section
    }

    pub fn years(&self) -> &[Year] {
        &self.years
    }

    /// Output columns, including the composite key when one was requested.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn digest(&self) -> String {
        query_digest(&self.sql)
    }
}

pub fn query_digest(sql: &str) -> String {
    format!("{:x}", Sha256::digest(sql.as_bytes()))
}

/// Expression that synthesizes the five-digit jurisdiction code from the
/// numeric state and county codes.
pub fn composite_key_expression() -> String {
    format!(
        "CONCAT(LPAD(CAST({STATE_CODE_FIELD} AS STRING), 2, '0'), LPAD(CAST({COUNTY_CODE_FIELD} AS STRING), 3, '0'))"
    )
}

pub fn compose(
    schema: &CanonicalSchema,
    fragments: &[YearFragment],
    year_order: &[Year],
    composite_key: Option<&str>,
) -> Result<ComposedQuery, PipelineError> {
    let section = schema.section();
    if year_order.is_empty() {
        return Err(ConfigurationError::NoYears {
            section: section.to_string(),
        }
        .into());
    }
    let mut ordered = HashSet::new();
    for year in year_order {
        if !ordered.insert(*year) {
            return Err(ConfigurationError::DuplicateYear {
                section: section.to_string(),
                year: *year,
            }
            .into());
        }
    }

    let expected = schema.field_names();
    let mut by_year: BTreeMap<Year, &YearFragment> = BTreeMap::new();
    for fragment in fragments {
        check_fragment(schema, &expected, fragment)?;
        if !ordered.contains(&fragment.year) {
            return Err(ConfigurationError::UnexpectedFragment {
                section: section.to_string(),
                year: fragment.year,
            }
            .into());
        }
        if by_year.insert(fragment.year, fragment).is_some() {
            return Err(ConfigurationError::DuplicateYear {
                section: section.to_string(),
                year: fragment.year,
            }
            .into());
        }
    }

    let mut selected = Vec::with_capacity(year_order.len());
    for year in year_order {
        let fragment = by_year
            .get(year)
            .ok_or_else(|| ConfigurationError::MissingFragment {
                section: section.to_string(),
                year: *year,
            })?;
        selected.push(*fragment);
    }

    let mut columns = expected;
    if let Some(key) = composite_key {
        let key = key.trim();
        if key.is_empty() || schema.contains(key) {
            return Err(ConfigurationError::KeyCollision {
                section: section.to_string(),
                key: key.to_string(),
            }
            .into());
        }
        columns.push(key.to_string());
    }

    let sql = render(&selected, composite_key.map(str::trim));
    debug!(
        "Composed section '{section}' from {} fragment(s) into {} byte(s) of SQL",
        selected.len(),
        sql.len()
    );

    Ok(ComposedQuery {
        section: section.to_string(),
        years: year_order.to_vec(),
        columns,
        sql,
    })
}

fn check_fragment(
    schema: &CanonicalSchema,
    expected: &[String],
    fragment: &YearFragment,
) -> Result<(), SchemaMismatchError> {
    let mismatch = |detail: String| SchemaMismatchError {
        section: schema.section().to_string(),
        year: fragment.year,
        detail,
    };
    if fragment.section != schema.section() {
        return Err(mismatch(format!(
            "fragment belongs to section '{}'",
            fragment.section
        )));
    }
    if fragment.columns.len() != expected.len() {
        return Err(mismatch(format!(
            "fragment emits {} column(s) but the canonical schema has {}",
            fragment.columns.len(),
            expected.len()
        )));
    }
    for (idx, (found, wanted)) in fragment.columns.iter().zip(expected).enumerate() {
        if found != wanted {
            return Err(mismatch(format!(
                "column {} is '{found}' but the canonical schema expects '{wanted}'",
                idx + 1
            )));
        }
    }
    Ok(())
}

fn render(fragments: &[&YearFragment], composite_key: Option<&str>) -> String {
    let mut sql = String::from("WITH\n");
    let named = fragments
        .iter()
        .map(|fragment| fragment.to_named_query())
        .collect::<Vec<_>>();
    sql.push_str(&named.join(",\n"));

    let selects = fragments
        .iter()
        .map(|fragment| format!("SELECT * FROM {}", fragment.name))
        .collect::<Vec<_>>();

    match composite_key {
        None => {
            sql.push('\n');
            sql.push_str(&selects.join("\nUNION ALL\n"));
        }
        Some(key) => {
            let _ = write!(sql, ",\n  {UNIONED_NAME} AS (\n");
            let indented = selects
                .iter()
                .map(|select| format!("    {select}"))
                .collect::<Vec<_>>();
            sql.push_str(&indented.join("\n    UNION ALL\n"));
            let _ = write!(
                sql,
                "\n  )\nSELECT\n  *,\n  {} AS {key}\nFROM {UNIONED_NAME}",
                composite_key_expression()
            );
        }
    }
    sql
}
