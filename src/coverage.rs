//! Mapping coverage: which canonical fields each configured year maps,
//! marks absent, forgets, or names wrongly.
//!
//! Unlike fragment building, which stops at the first problem, this walks
//! every section and year so an operator sees all gaps at once.

use serde::Serialize;

use crate::{
    config::Config,
    error::ConfigurationError,
    mapping::{SourceExpr, Year},
    registry::is_base_field,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct YearCoverage {
    pub section: String,
    pub year: Year,
    pub mapped: usize,
    pub absent: usize,
    /// Canonical fields with no entry at all.
    pub unmapped: Vec<String>,
    /// Entries whose name is not a canonical field.
    pub unknown: Vec<String>,
    /// Entries for base fields, which are never read.
    pub ignored: Vec<String>,
    /// True when the year is listed but has no mapping block.
    pub missing_year: bool,
}

impl YearCoverage {
    pub fn is_complete(&self) -> bool {
        !self.missing_year && self.unmapped.is_empty() && self.unknown.is_empty()
    }
}

pub fn section_coverage(
    config: &Config,
    section: &str,
) -> Result<Vec<YearCoverage>, ConfigurationError> {
    let plan = config.plan(section)?;
    let schema = config.registry().schema_for(section)?;
    let mut rows = Vec::with_capacity(plan.years.len());
    for year in &plan.years {
        let mut row = YearCoverage {
            section: section.to_string(),
            year: *year,
            mapped: 0,
            absent: 0,
            unmapped: Vec::new(),
            unknown: Vec::new(),
            ignored: Vec::new(),
            missing_year: false,
        };
        let mapping = match config.mappings().year(section, *year) {
            Ok(mapping) => mapping,
            Err(_) => {
                row.missing_year = true;
                row.unmapped = schema.specific_fields().to_vec();
                rows.push(row);
                continue;
            }
        };
        for field in schema.specific_fields() {
            match mapping.get(field) {
                Some(SourceExpr::Expression(_)) => row.mapped += 1,
                Some(SourceExpr::Absent) => row.absent += 1,
                None => row.unmapped.push(field.clone()),
            }
        }
        for field in mapping.fields() {
            if is_base_field(field) {
                row.ignored.push(field.to_string());
            } else if !schema.is_specific_field(field) {
                row.unknown.push(field.to_string());
            }
        }
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
global:
  project_id: p
  analytics_dataset: a
sections:
  registration:
    section_code: a_reg
    view: reg_union
    years: [2016, 2018, 2020]
    standard_fields: [total_reg, active_reg, inactive_reg]
    mappings:
      2016: { fips: FIPSCode, total_reg: A1a, active_reg: A1b, inactive_reg: null }
      2018: { total_reg: A1a, actve_reg: A1b }
"#;

    #[test]
    fn coverage_reports_every_gap() {
        let config = Config::from_yaml_str(CONFIG).expect("config");
        let rows = section_coverage(&config, "registration").expect("coverage");
        assert_eq!(rows.len(), 3);

        assert!(rows[0].is_complete());
        assert_eq!((rows[0].mapped, rows[0].absent), (2, 1));
        assert_eq!(rows[0].ignored, vec!["fips"]);

        assert!(!rows[1].is_complete());
        assert_eq!(rows[1].unmapped, vec!["active_reg", "inactive_reg"]);
        assert_eq!(rows[1].unknown, vec!["actve_reg"]);

        assert!(rows[2].missing_year);
        assert_eq!(rows[2].unmapped.len(), 3);
    }

    #[test]
    fn unknown_section_is_an_error() {
        let config = Config::from_yaml_str(CONFIG).expect("config");
        assert!(section_coverage(&config, "mail").is_err());
    }
}
