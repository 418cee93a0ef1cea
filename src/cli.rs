//! CLI argument parsing for the pipeline runner and report generator.
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "etlflow",
    version,
    about = "Run a dbt pipeline with retries and summarize its test results",
    after_help = "Commands:\n  run      deps -> seed -> run -> test, with retries and a cached deps step\n  report   Write reports/quality_report.{md,json} from target/ artifacts\n\nExamples:\n  etlflow run --project-dir ./warehouse --target dev --threads 8\n  etlflow run --full-refresh\n  etlflow report",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Run(RunArgs),
    Report(ReportArgs),
}

/// Pipeline inputs; mirrors the parameters shared by every step.
#[derive(Parser, Debug)]
#[command(about = "Run deps, seed, run, and test in order")]
pub struct RunArgs {
    /// dbt project root (where dbt_project.yml lives)
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub project_dir: PathBuf,

    /// dbt target from profiles.yml
    #[arg(long)]
    pub target: Option<String>,

    /// dbt worker threads
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u32).range(1..))]
    pub threads: u32,

    /// Rebuild incremental models from scratch
    #[arg(long)]
    pub full_refresh: bool,

    /// Optional flow config JSON (tool, extra PATH entries, env, cache dir)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

/// The report reads fixed relative paths and takes no arguments.
#[derive(Parser, Debug)]
#[command(about = "Summarize dbt results into a data quality report")]
pub struct ReportArgs {}
