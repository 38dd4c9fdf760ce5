pub mod cli;
pub mod compose;
pub mod config;
pub mod coverage;
pub mod deploy;
pub mod diff;
pub mod engine;
pub mod error;
pub mod fragment;
pub mod mapping;
pub mod pipeline;
pub mod preflight;
pub mod registry;
pub mod report;
pub mod retry;

use std::{env, sync::OnceLock, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use log::{LevelFilter, debug, info, warn};

use crate::{
    cli::{Cli, Commands, EngineArgs},
    config::Config,
    diff::ViewDiff,
    engine::bigquery::{ACCESS_TOKEN_ENV, BigQueryEngine},
    fragment::quote_table,
    pipeline::{Pipeline, SectionReport, Terminal, render_view_file},
    report::RunReport,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("union_views", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Generate(args) => handle_generate(&args),
        Commands::Validate(args) => handle_validate(&args),
        Commands::Deploy(args) => handle_deploy(&args),
        Commands::Check(args) => handle_check(&args),
        Commands::Preflight(args) => handle_preflight(&args),
        Commands::Diff(args) => handle_diff(&args),
    }
}

fn handle_generate(args: &cli::GenerateArgs) -> Result<()> {
    let config = Config::load(&args.config)?;
    let sections = config.select_sections(&args.sections);
    info!(
        "Generating {} section(s) from configuration {}",
        sections.len(),
        config.version()
    );
    let reports = Pipeline::new(&config, Terminal::Review)
        .with_output_dir(&args.output)
        .run(&sections);
    summarize(&reports)
}

fn handle_validate(args: &cli::ValidateArgs) -> Result<()> {
    let config = Config::load(&args.config)?;
    let engine = connect(&config, &args.engine)?;
    let sections = config.select_sections(&args.sections);
    let mut pipeline = Pipeline::new(&config, Terminal::Validate(&engine));
    if let Some(dir) = &args.output {
        pipeline = pipeline.with_output_dir(dir);
    }
    let reports = pipeline.run(&sections);
    if let Some(path) = &args.report {
        RunReport::new("validate", config.version(), config.fingerprint(), &reports)
            .write(path)?;
    }
    summarize(&reports)
}

fn handle_deploy(args: &cli::DeployArgs) -> Result<()> {
    let config = Config::load(&args.config)?;
    let engine = connect(&config, &args.engine)?;
    let sections = config.select_sections(&args.sections);
    info!(
        "Deploying {} section(s) to project {}",
        sections.len(),
        config.global().project_id
    );
    let mut pipeline = Pipeline::new(&config, Terminal::Deploy(&engine));
    if let Some(dir) = &args.output {
        pipeline = pipeline.with_output_dir(dir);
    }
    let reports = pipeline.run(&sections);
    if let Some(path) = &args.report {
        RunReport::new("deploy", config.version(), config.fingerprint(), &reports).write(path)?;
    }
    summarize(&reports)
}

fn handle_check(args: &cli::CheckArgs) -> Result<()> {
    let config = Config::load(&args.config)?;
    let mut rows = Vec::new();
    let mut failures = Vec::new();
    for section in config.select_sections(&args.sections) {
        match coverage::section_coverage(&config, &section) {
            Ok(section_rows) => rows.extend(section_rows),
            Err(err) => failures.push(format!("{section}: {err}")),
        }
    }
    print!("{}", report::render_coverage(&rows));
    for failure in &failures {
        warn!("{failure}");
    }
    let incomplete = rows.iter().filter(|row| !row.is_complete()).count();
    if incomplete > 0 || !failures.is_empty() {
        bail!(
            "{incomplete} year(s) with incomplete mappings and {} misconfigured section(s)",
            failures.len()
        );
    }
    info!("All {} section-year mapping(s) are complete", rows.len());
    Ok(())
}

fn handle_preflight(args: &cli::PreflightArgs) -> Result<()> {
    let config = Config::load(&args.config)?;
    let schema = config.registry().schema_for(&args.section)?;
    let headers = preflight::read_headers(&args.input, args.delimiter)?;
    debug!("Header of {:?}: {:?}", args.input, headers);
    let checks = preflight::check_headers(schema, config.mappings(), args.year, &headers)?;
    print!("{}", report::render_preflight(&checks));
    let missing = checks
        .iter()
        .filter(|check| matches!(check.check, preflight::ColumnCheck::Missing { .. }))
        .count();
    if missing > 0 {
        bail!(
            "{missing} mapped column(s) for {} {} are not in {:?}",
            args.section,
            args.year,
            args.input
        );
    }
    info!(
        "All bare columns for {} {} are present in {:?}",
        args.section, args.year, args.input
    );
    Ok(())
}

fn handle_diff(args: &cli::DiffArgs) -> Result<()> {
    let config = Config::load(&args.config)?;
    let engine = connect(&config, &args.engine)?;
    let plan = config.plan(&args.section)?;
    let query = Pipeline::new(&config, Terminal::Review).compose_section(&args.section)?;
    let outcome = diff::view_diff(&engine, &plan.view, query.sql(), args.context)
        .with_context(|| format!("Fetching definition of {}", quote_table(&plan.view)))?;
    match outcome {
        ViewDiff::Missing => {
            info!("View {} does not exist yet", quote_table(&plan.view));
            print!("{}", render_view_file(&config, plan, &query));
        }
        ViewDiff::Unchanged => {
            info!("{} matches the generated query", quote_table(&plan.view));
        }
        ViewDiff::Changed(rendered) => print!("{rendered}"),
    }
    Ok(())
}

fn connect(config: &Config, args: &EngineArgs) -> Result<BigQueryEngine> {
    let token = match &args.access_token {
        Some(token) => token.clone(),
        None => env::var(ACCESS_TOKEN_ENV).map_err(|_| {
            anyhow!("No access token: pass --access-token or set {ACCESS_TOKEN_ENV}")
        })?,
    };
    let engine = BigQueryEngine::new(
        &config.global().project_id,
        &token,
        args.api_base.as_deref(),
        Duration::from_secs(args.timeout),
    )?;
    Ok(engine)
}

fn summarize(reports: &[SectionReport]) -> Result<()> {
    print!("{}", report::render_sections(reports));
    let failed = reports.iter().filter(|report| !report.is_success()).count();
    if failed > 0 {
        bail!("{failed} of {} section(s) did not succeed", reports.len());
    }
    Ok(())
}
