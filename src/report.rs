//! Console summaries and the machine-readable run report.

use std::{borrow::Cow, fmt::Write as _, fs, path::Path};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use itertools::Itertools;
use log::info;
use serde::Serialize;

use crate::{
    coverage::YearCoverage,
    pipeline::SectionReport,
    preflight::{ColumnCheck, FieldCheck},
};

const MAX_DIAGNOSTIC_WIDTH: usize = 80;

#[derive(Debug, Serialize)]
pub struct RunReport<'a> {
    pub generated_at: String,
    pub command: &'a str,
    pub config_version: &'a str,
    pub config_sha256: &'a str,
    pub sections: &'a [SectionReport],
}

impl<'a> RunReport<'a> {
    pub fn new(
        command: &'a str,
        config_version: &'a str,
        config_sha256: &'a str,
        sections: &'a [SectionReport],
    ) -> Self {
        RunReport {
            generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            command,
            config_version,
            config_sha256,
            sections,
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Serializing run report")?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Creating report directory {parent:?}"))?;
        }
        fs::write(path, json).with_context(|| format!("Writing run report to {path:?}"))?;
        info!("Run report written to {path:?}");
        Ok(())
    }
}

pub fn render_sections(reports: &[SectionReport]) -> String {
    let headers = ["section", "view", "status", "deployed", "years", "diagnostic"];
    let rows = reports
        .iter()
        .map(|report| {
            vec![
                report.section.clone(),
                report.view.clone(),
                report.status.as_str().to_string(),
                if report.deployed { "yes" } else { "no" }.to_string(),
                report.years.iter().join(","),
                truncate(&report.diagnostic, MAX_DIAGNOSTIC_WIDTH),
            ]
        })
        .collect::<Vec<_>>();
    render_table(&owned(&headers), &rows)
}

pub fn render_coverage(rows: &[YearCoverage]) -> String {
    let headers = ["section", "year", "mapped", "absent", "unmapped", "unknown"];
    let rows = rows
        .iter()
        .map(|row| {
            let unmapped = if row.missing_year {
                "(no mappings for year)".to_string()
            } else {
                row.unmapped.join(",")
            };
            vec![
                row.section.clone(),
                row.year.to_string(),
                row.mapped.to_string(),
                row.absent.to_string(),
                unmapped,
                row.unknown.join(","),
            ]
        })
        .collect::<Vec<_>>();
    render_table(&owned(&headers), &rows)
}

pub fn render_preflight(checks: &[FieldCheck]) -> String {
    let headers = ["field", "status", "column", "suggestion"];
    let rows = checks
        .iter()
        .map(|check| match &check.check {
            ColumnCheck::Found { column } => {
                vec![check.field.clone(), "found".into(), column.clone(), String::new()]
            }
            ColumnCheck::Missing { column, suggestion } => vec![
                check.field.clone(),
                "missing".into(),
                column.clone(),
                suggestion.clone().unwrap_or_default(),
            ],
            ColumnCheck::Computed { expression } => vec![
                check.field.clone(),
                "computed".into(),
                truncate(expression, MAX_DIAGNOSTIC_WIDTH),
                String::new(),
            ],
            ColumnCheck::Absent => {
                vec![check.field.clone(), "absent".into(), String::new(), String::new()]
            }
        })
        .collect::<Vec<_>>();
    render_table(&owned(&headers), &rows)
}

pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut widths = headers.iter().map(|h| display_width(h)).collect::<Vec<_>>();
    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(widths.len()) {
            widths[idx] = widths[idx].max(display_width(cell));
        }
    }
    for width in &mut widths {
        *width = (*width).max(3);
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(headers, &widths));
    let separator = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&separator, &widths));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

fn format_row(values: &[String], widths: &[usize]) -> String {
    let mut line = values
        .iter()
        .zip(widths)
        .map(|(value, width)| {
            let cell = sanitize_cell(value);
            let padding = width.saturating_sub(display_width(&cell));
            format!("{cell}{}", " ".repeat(padding))
        })
        .join("  ");
    while line.ends_with(' ') {
        line.pop();
    }
    line
}

fn display_width(value: &str) -> usize {
    value.chars().count()
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}

fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        value.to_string()
    } else {
        let mut cut = value.chars().take(max.saturating_sub(3)).collect::<String>();
        cut.push_str("...");
        cut
    }
}

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}
