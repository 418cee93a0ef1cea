use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod pipeline;
mod report;
mod runner;
mod util;

use cli::{Command, RootArgs, RunArgs};
use pipeline::{Pipeline, PipelineParameters, StepFailed, StepRun};
use runner::ProcessRunner;

fn main() -> Result<()> {
    let args = RootArgs::parse();
    match args.command {
        Command::Run(args) => {
            init_tracing("info");
            cmd_run(args)
        }
        Command::Report(_) => {
            init_tracing("warn");
            cmd_report()
        }
    }
}

fn init_tracing(default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn cmd_run(args: RunArgs) -> Result<()> {
    let flow_config = config::load_config_optional(args.config.as_deref())?;
    let params = PipelineParameters {
        project_dir: args.project_dir,
        target: args.target,
        threads: args.threads,
        full_refresh: args.full_refresh,
    };
    let profiles_dir = std::env::var_os(config::PROFILES_DIR_ENV).map(PathBuf::from);
    let cache_root = flow_config.cache_root(&params.project_dir);

    let runner = ProcessRunner::from_env(flow_config.extra_path.clone());
    let pipeline = Pipeline::new(&runner, flow_config.tool.clone())
        .with_env(flow_config.env.clone())
        .with_cache_root(cache_root)
        .with_profiles_dir(profiles_dir);
    let summary = pipeline.run(&params).inspect_err(|err| {
        if let Some(failed) = err.downcast_ref::<StepFailed>() {
            tracing::error!(
                step = %failed.step,
                attempts = failed.attempts,
                "pipeline halted; later steps were not run"
            );
        }
    })?;

    for report in &summary.steps {
        match report.run {
            StepRun::Executed { attempts } => {
                println!("{}: ok ({attempts} attempt(s))", report.step)
            }
            StepRun::Cached => println!("{}: ok (cached)", report.step),
        }
    }
    println!("Flow finished OK");
    Ok(())
}

fn cmd_report() -> Result<()> {
    let artifacts_dir = Path::new(report::ARTIFACTS_DIR);
    let reports_dir = Path::new(report::REPORTS_DIR);
    match report::generate_report(artifacts_dir, reports_dir) {
        Ok(paths) => {
            println!(
                "OK: wrote {} and {}",
                util::display_path(&paths.markdown, None),
                util::display_path(&paths.json, None)
            );
            Ok(())
        }
        Err(err) => {
            eprintln!("[quality_report] ERROR: {err:#}");
            std::process::exit(1);
        }
    }
}
