//! Per-year fragment builder.
//!
//! A fragment is one named sub-query that projects a section's canonical
//! schema from one year's raw table. The output column list depends only on
//! the schema: base fields come straight from the source identifier columns
//! (the year tag is a literal), section fields come from the year's mapping
//! entries. Only the expressions in front of `AS` differ between years.

use std::fmt::Write as _;

use log::{debug, warn};

use crate::{
    error::ConfigurationError,
    mapping::{MappingStore, SourceExpr, Year},
    registry::{CanonicalSchema, ELECTION_YEAR_FIELD, is_base_field},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YearFragment {
    pub(crate) section: String,
    pub(crate) year: Year,
    pub(crate) name: String,
    pub(crate) columns: Vec<String>,
    pub(crate) body: String,
}

impl YearFragment {
    pub fn section(&self) -> &str {
        &self.section
    }

    pub fn year(&self) -> Year {
        self.year
    }

    /// Sub-query name, e.g. `registration_2016`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// The `SELECT ... FROM ...` body of the sub-query.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// The fragment rendered as a named sub-query (`name AS (...)`).
    pub fn to_named_query(&self) -> String {
        format!("  {} AS (\n{}\n  )", self.name, self.body)
    }
}

pub fn fragment_name(section: &str, year: Year) -> String {
    let mut name = section
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect::<String>();
    if name.starts_with(|ch: char| ch.is_ascii_digit()) {
        name.insert(0, '_');
    }
    format!("{name}_{year}")
}

pub fn quote_table(reference: &str) -> String {
    let trimmed = reference.trim().trim_matches('`');
    format!("`{trimmed}`")
}

pub fn build_fragment(
    schema: &CanonicalSchema,
    year: Year,
    mappings: &MappingStore,
    source_table: &str,
) -> Result<YearFragment, ConfigurationError> {
    let section = schema.section();
    let year_mapping = mappings.year(section, year)?;

    for field in year_mapping.fields() {
        if is_base_field(field) {
            warn!(
                "Section '{section}' year {year}: mapping for base field '{field}' is ignored; base fields come from the source identifier columns"
            );
        } else if !schema.is_specific_field(field) {
            return Err(ConfigurationError::UnknownField {
                section: section.to_string(),
                year,
                field: field.to_string(),
            });
        }
    }

    let mut projections: Vec<(String, &str)> = Vec::with_capacity(schema.width());
    for base in schema.base_fields().iter().copied() {
        if base == ELECTION_YEAR_FIELD {
            projections.push((format!("'{year}'"), base));
        } else {
            projections.push((base.to_string(), base));
        }
    }

    for field in schema.specific_fields() {
        let entry = year_mapping
            .get(field)
            .ok_or_else(|| ConfigurationError::UnmappedField {
                section: section.to_string(),
                year,
                field: field.clone(),
            })?;
        let expression = match entry {
            SourceExpr::Expression(text) if text.trim().is_empty() => {
                return Err(ConfigurationError::EmptyExpression {
                    section: section.to_string(),
                    year,
                    field: field.clone(),
                });
            }
            SourceExpr::Expression(text) => text.trim().to_string(),
            SourceExpr::Absent => "NULL".to_string(),
        };
        projections.push((expression, field.as_str()));
    }

    let mut body = String::from("    SELECT\n");
    let last = projections.len().saturating_sub(1);
    for (idx, (expression, column)) in projections.iter().enumerate() {
        let separator = if idx == last { "" } else { "," };
        if expression == column {
            let _ = writeln!(body, "      {column}{separator}");
        } else {
            let _ = writeln!(body, "      {expression} AS {column}{separator}");
        }
    }
    let _ = write!(body, "    FROM\n      {}", quote_table(source_table));

    let columns = projections
        .iter()
        .map(|(_, column)| column.to_string())
        .collect::<Vec<_>>();
    debug!(
        "Built fragment for section '{section}' year {year} with {} column(s) from {source_table}",
        columns.len()
    );

    Ok(YearFragment {
        section: section.to_string(),
        year,
        name: fragment_name(section, year),
        columns,
        body,
    })
}
