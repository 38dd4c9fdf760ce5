//! Per-section pipeline: build fragments, compose, then review, validate, or
//! validate and deploy.
//!
//! Each section runs independently. Any error stops only that section and is
//! recorded in its [`SectionReport`].

use std::{
    error::Error as StdError,
    fs,
    path::{Path, PathBuf},
};

use itertools::Itertools;
use log::{error, info};
use serde::Serialize;

use crate::{
    compose::{ComposedQuery, compose},
    config::{Config, SectionPlan},
    deploy::deploy,
    engine::{QueryEngine, validate},
    error::PipelineError,
    fragment::{YearFragment, build_fragment, quote_table},
    mapping::Year,
    registry::CanonicalSchema,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    Generated,
    Validated,
    Rejected,
    Deployed,
    Failed,
}

impl SectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SectionStatus::Generated => "generated",
            SectionStatus::Validated => "validated",
            SectionStatus::Rejected => "rejected",
            SectionStatus::Deployed => "deployed",
            SectionStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SectionReport {
    pub section: String,
    pub view: String,
    pub status: SectionStatus,
    pub deployed: bool,
    /// Engine or configuration diagnostic, verbatim. Empty on success.
    pub diagnostic: String,
    pub years: Vec<Year>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_file: Option<PathBuf>,
    #[serde(skip)]
    pub view_sql: Option<String>,
}

impl SectionReport {
    pub fn is_success(&self) -> bool {
        !matches!(
            self.status,
            SectionStatus::Rejected | SectionStatus::Failed
        )
    }
}

/// What happens after a section's query is composed.
#[derive(Clone, Copy)]
pub enum Terminal<'a> {
    /// Emit text only.
    Review,
    /// Dry-run the composed query, never deploy.
    Validate(&'a dyn QueryEngine),
    /// Dry-run, then replace the view when accepted.
    Deploy(&'a dyn QueryEngine),
}

pub struct Pipeline<'a> {
    config: &'a Config,
    terminal: Terminal<'a>,
    output_dir: Option<PathBuf>,
}

struct Progress {
    status: SectionStatus,
    deployed: bool,
    diagnostic: String,
    sql_file: Option<PathBuf>,
    view_sql: String,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config, terminal: Terminal<'a>) -> Self {
        Pipeline {
            config,
            terminal,
            output_dir: None,
        }
    }

    /// Also write one `CREATE OR REPLACE VIEW` file per section into `dir`.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn run(&self, sections: &[String]) -> Vec<SectionReport> {
        sections
            .iter()
            .map(|section| self.run_section(section))
            .collect()
    }

    pub fn run_section(&self, section: &str) -> SectionReport {
        info!("Processing section '{section}'");
        let view = self
            .config
            .plan(section)
            .map(|plan| plan.view.clone())
            .unwrap_or_default();
        let years = self
            .config
            .plan(section)
            .map(|plan| plan.years.clone())
            .unwrap_or_default();

        let result = self.prepare(section).and_then(|(plan, schema, fragments)| {
            self.finish(plan, schema, &fragments)
        });
        match result {
            Ok(progress) => SectionReport {
                section: section.to_string(),
                view,
                status: progress.status,
                deployed: progress.deployed,
                diagnostic: progress.diagnostic,
                years,
                sql_file: progress.sql_file,
                view_sql: Some(progress.view_sql),
            },
            Err(err) => {
                error!("Section '{section}' failed: {err}");
                SectionReport {
                    section: section.to_string(),
                    view,
                    status: SectionStatus::Failed,
                    deployed: false,
                    diagnostic: error_chain(&err),
                    years,
                    sql_file: None,
                    view_sql: None,
                }
            }
        }
    }

    /// Builds and composes a section without touching the engine.
    pub fn compose_section(&self, section: &str) -> Result<ComposedQuery, PipelineError> {
        let (plan, schema, fragments) = self.prepare(section)?;
        compose(
            schema,
            &fragments,
            &plan.years,
            plan.composite_key.as_deref(),
        )
    }

    fn prepare(
        &self,
        section: &str,
    ) -> Result<(&'a SectionPlan, &'a CanonicalSchema, Vec<YearFragment>), PipelineError> {
        let plan = self.config.plan(section)?;
        let schema = self.config.registry().schema_for(section)?;
        let fragments = plan
            .years
            .iter()
            .map(|year| {
                let table = plan.source_table(self.config.global(), *year);
                build_fragment(schema, *year, self.config.mappings(), &table)
            })
            .collect::<Result<Vec<_>, _>>()?;
        info!(
            "Built {} fragment(s) for '{section}' ({})",
            fragments.len(),
            plan.years.iter().join(", ")
        );
        Ok((plan, schema, fragments))
    }

    fn finish(
        &self,
        plan: &SectionPlan,
        schema: &CanonicalSchema,
        fragments: &[YearFragment],
    ) -> Result<Progress, PipelineError> {
        let query = compose(
            schema,
            fragments,
            &plan.years,
            plan.composite_key.as_deref(),
        )?;
        let view_sql = render_view_file(self.config, plan, &query);
        let sql_file = match &self.output_dir {
            Some(dir) => Some(write_view_file(dir, &plan.output_file, &view_sql)?),
            None => None,
        };

        let (status, deployed, diagnostic) = match self.terminal {
            Terminal::Review => (SectionStatus::Generated, false, String::new()),
            Terminal::Validate(engine) => {
                let validation = validate(engine, query.sql(), self.config.retry())?;
                if validation.accepted() {
                    (SectionStatus::Validated, false, String::new())
                } else {
                    (
                        SectionStatus::Rejected,
                        false,
                        validation.diagnostic().to_string(),
                    )
                }
            }
            Terminal::Deploy(engine) => {
                let validation = validate(engine, query.sql(), self.config.retry())?;
                let outcome = deploy(
                    engine,
                    &plan.view,
                    query.sql(),
                    &validation,
                    self.config.retry(),
                )?;
                if outcome.deployed {
                    (SectionStatus::Deployed, true, String::new())
                } else {
                    (SectionStatus::Rejected, false, outcome.diagnostic)
                }
            }
        };

        Ok(Progress {
            status,
            deployed,
            diagnostic,
            sql_file,
            view_sql,
        })
    }
}

fn error_chain(err: &PipelineError) -> String {
    let mut message = err.to_string();
    let mut source = StdError::source(err);
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

/// Text for manual review or console deployment of one section.
pub fn render_view_file(config: &Config, plan: &SectionPlan, query: &ComposedQuery) -> String {
    let fingerprint = config.fingerprint().get(..12).unwrap_or(config.fingerprint());
    format!(
        "-- {view} union view\n\
         -- Generated by union-views from configuration {version} (sha256 {fingerprint})\n\
         -- Years: {years}\n\
         -- Regenerate from the field mappings instead of editing this file.\n\
         \n\
         CREATE OR REPLACE VIEW {quoted} AS\n\
         {sql};\n",
        view = plan.view,
        version = config.version(),
        years = query.years().iter().join(", "),
        quoted = quote_table(&plan.view),
        sql = query.sql(),
    )
}

pub fn write_view_file(dir: &Path, file_name: &str, contents: &str) -> Result<PathBuf, PipelineError> {
    let path = dir.join(file_name);
    let io_error = |source| PipelineError::Output {
        path: path.clone(),
        source,
    };
    fs::create_dir_all(dir).map_err(io_error)?;
    fs::write(&path, contents).map_err(io_error)?;
    info!("Wrote {path:?}");
    Ok(path)
}
