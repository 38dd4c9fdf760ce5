use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::mapping::Year;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Generate, validate and deploy multi-year union views from field mappings",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Write one CREATE OR REPLACE VIEW file per section without contacting the engine
    Generate(GenerateArgs),
    /// Dry-run each section's composed query and report the engine's verdict
    Validate(ValidateArgs),
    /// Validate each section and replace its view when the dry run accepts it
    Deploy(DeployArgs),
    /// Report mapping coverage for every configured section and year
    Check(CheckArgs),
    /// Compare one year's mapped columns with the header of a raw CSV file
    Preflight(PreflightArgs),
    /// Show how the generated view differs from the deployed definition
    Diff(DiffArgs),
}

#[derive(Debug, Args)]
pub struct GenerateArgs {
    /// Mapping configuration file (YAML)
    #[arg(short, long)]
    pub config: PathBuf,
    /// Directory receiving the generated .sql files
    #[arg(short, long)]
    pub output: PathBuf,
    /// Restrict the run to these sections (repeatable or comma-separated)
    #[arg(short, long = "section", action = clap::ArgAction::Append)]
    pub sections: Vec<String>,
}

#[derive(Debug, Args)]
pub struct EngineArgs {
    /// OAuth access token (falls back to BIGQUERY_ACCESS_TOKEN)
    #[arg(long = "access-token")]
    pub access_token: Option<String>,
    /// Override the BigQuery REST endpoint
    #[arg(long = "api-base")]
    pub api_base: Option<String>,
    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Mapping configuration file (YAML)
    #[arg(short, long)]
    pub config: PathBuf,
    /// Restrict the run to these sections (repeatable or comma-separated)
    #[arg(short, long = "section", action = clap::ArgAction::Append)]
    pub sections: Vec<String>,
    /// Also write the generated .sql files into this directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Write a JSON run report to this path
    #[arg(long)]
    pub report: Option<PathBuf>,
    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Debug, Args)]
pub struct DeployArgs {
    /// Mapping configuration file (YAML)
    #[arg(short, long)]
    pub config: PathBuf,
    /// Restrict the run to these sections (repeatable or comma-separated)
    #[arg(short, long = "section", action = clap::ArgAction::Append)]
    pub sections: Vec<String>,
    /// Also write the generated .sql files into this directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Write a JSON run report to this path
    #[arg(long)]
    pub report: Option<PathBuf>,
    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Mapping configuration file (YAML)
    #[arg(short, long)]
    pub config: PathBuf,
    /// Restrict the check to these sections (repeatable or comma-separated)
    #[arg(short, long = "section", action = clap::ArgAction::Append)]
    pub sections: Vec<String>,
}

#[derive(Debug, Args)]
pub struct PreflightArgs {
    /// Mapping configuration file (YAML)
    #[arg(short, long)]
    pub config: PathBuf,
    /// Section whose mappings are checked
    #[arg(short, long)]
    pub section: String,
    /// Year whose mappings are checked
    #[arg(short, long, value_parser = parse_year)]
    pub year: Year,
    /// Raw CSV file whose header row is compared
    #[arg(short, long)]
    pub input: PathBuf,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter, default_value = ",")]
    pub delimiter: u8,
}

#[derive(Debug, Args)]
pub struct DiffArgs {
    /// Mapping configuration file (YAML)
    #[arg(short, long)]
    pub config: PathBuf,
    /// Section whose view is compared
    #[arg(short, long)]
    pub section: String,
    /// Lines of context around each change
    #[arg(long, default_value_t = 3)]
    pub context: usize,
    #[command(flatten)]
    pub engine: EngineArgs,
}

pub fn parse_year(value: &str) -> Result<Year, String> {
    value.trim().parse::<Year>().map_err(|err| err.to_string())
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
