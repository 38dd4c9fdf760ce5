//! Canonical schemas per section.
//!
//! Every schema starts with the same base identifier fields in the same order,
//! followed by the section's own fields. Base field names are stripped from a
//! section's field list when the schema is built, so they can never be emitted
//! twice.

use std::collections::{BTreeMap, HashSet};

use log::debug;

use crate::error::ConfigurationError;

/// Identifier fields shared by every section, in output order.
pub const BASE_FIELDS: [&str; 6] = [
    "fips",
    "election_year",
    "state",
    "county",
    "state_abbr",
    "county_name",
];

/// Base field that carries the literal year tag instead of a source column.
pub const ELECTION_YEAR_FIELD: &str = "election_year";
pub const STATE_CODE_FIELD: &str = "state";
pub const COUNTY_CODE_FIELD: &str = "county";

pub fn is_base_field(name: &str) -> bool {
    BASE_FIELDS.contains(&name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalSchema {
    section: String,
    specific: Vec<String>,
}

impl CanonicalSchema {
    pub fn new<I, S>(section: &str, fields: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut specific = Vec::new();
        for field in fields {
            let field = field.as_ref().trim();
            if field.is_empty() {
                return Err(ConfigurationError::InvalidValue {
                    field: format!("sections.{section}.standard_fields"),
                    reason: "field names cannot be empty".to_string(),
                });
            }
            if is_base_field(field) {
                debug!("Section '{section}': base field '{field}' is implied and dropped from the section list");
                continue;
            }
            if !seen.insert(field.to_string()) {
                return Err(ConfigurationError::DuplicateField {
                    section: section.to_string(),
                    field: field.to_string(),
                });
            }
            specific.push(field.to_string());
        }
        Ok(CanonicalSchema {
            section: section.to_string(),
            specific,
        })
    }

    pub fn section(&self) -> &str {
        &self.section
    }

    pub fn base_fields(&self) -> &'static [&'static str] {
        &BASE_FIELDS
    }

    pub fn specific_fields(&self) -> &[String] {
        &self.specific
    }

    /// Full output column list: base fields, then section fields.
    pub fn field_names(&self) -> Vec<String> {
        BASE_FIELDS
            .iter()
            .map(|name| name.to_string())
            .chain(self.specific.iter().cloned())
            .collect()
    }

    pub fn width(&self) -> usize {
        BASE_FIELDS.len() + self.specific.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        is_base_field(name) || self.specific.iter().any(|field| field == name)
    }

    pub fn is_specific_field(&self, name: &str) -> bool {
        self.specific.iter().any(|field| field == name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, CanonicalSchema>,
}

impl SchemaRegistry {
    pub fn from_schemas<I>(schemas: I) -> Self
    where
        I: IntoIterator<Item = CanonicalSchema>,
    {
        SchemaRegistry {
            schemas: schemas
                .into_iter()
                .map(|schema| (schema.section.clone(), schema))
                .collect(),
        }
    }

    pub fn schema_for(&self, section: &str) -> Result<&CanonicalSchema, ConfigurationError> {
        self.schemas
            .get(section)
            .ok_or_else(|| ConfigurationError::UnknownSection(section.to_string()))
    }

    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(|name| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
