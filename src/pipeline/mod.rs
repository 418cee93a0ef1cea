//! Fixed four-step dbt pipeline: deps, seed, run, test.
//!
//! Steps run strictly in order and the first step that exhausts its retries
//! ends the run. Nothing is rolled back; artifacts from earlier steps stay on
//! disk.
mod cache;
mod step;

pub use cache::{CacheConfig, StepCache};
pub use step::{RetryPolicy, StepExecutor, StepFailed, StepRun};

use crate::runner::{CommandRunner, StepInvocation};
use crate::util::resolve_dir;
use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    Deps,
    Seed,
    Run,
    Test,
}

impl StepKind {
    /// Execution order.
    pub const ALL: [StepKind; 4] = [
        StepKind::Deps,
        StepKind::Seed,
        StepKind::Run,
        StepKind::Test,
    ];

    /// Tool subcommand for the step.
    pub fn name(self) -> &'static str {
        match self {
            StepKind::Deps => "deps",
            StepKind::Seed => "seed",
            StepKind::Run => "run",
            StepKind::Test => "test",
        }
    }

    fn label(self) -> &'static str {
        match self {
            StepKind::Deps => "install-dependencies",
            StepKind::Seed => "load-seed-data",
            StepKind::Run => "build-models",
            StepKind::Test => "run-tests",
        }
    }

    fn announcement(self) -> &'static str {
        match self {
            StepKind::Deps => "Installing packages",
            StepKind::Seed => "Loading seeds",
            StepKind::Run => "Executing models",
            StepKind::Test => "Running tests",
        }
    }

    pub fn cache_eligible(self) -> bool {
        matches!(self, StepKind::Deps)
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Inputs shared by every step of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineParameters {
    pub project_dir: PathBuf,
    pub target: Option<String>,
    pub threads: u32,
    pub full_refresh: bool,
}

impl Default for PipelineParameters {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("."),
            target: None,
            threads: 4,
            full_refresh: false,
        }
    }
}

/// Retry policy per step plus the deps cache lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepPolicies {
    pub deps: RetryPolicy,
    pub seed: RetryPolicy,
    pub run: RetryPolicy,
    pub test: RetryPolicy,
    pub deps_cache_ttl: Duration,
}

pub const DEFAULT_POLICIES: StepPolicies = StepPolicies {
    deps: RetryPolicy::with_retries(2, 10),
    seed: RetryPolicy::with_retries(2, 10),
    run: RetryPolicy::with_retries(2, 30),
    test: RetryPolicy::with_retries(2, 10),
    deps_cache_ttl: Duration::from_secs(10 * 60),
};

impl Default for StepPolicies {
    fn default() -> Self {
        DEFAULT_POLICIES
    }
}

impl StepPolicies {
    pub fn for_step(&self, kind: StepKind) -> &RetryPolicy {
        match kind {
            StepKind::Deps => &self.deps,
            StepKind::Seed => &self.seed,
            StepKind::Run => &self.run,
            StepKind::Test => &self.test,
        }
    }
}

/// Build the invocation for `kind` from the run parameters.
pub fn step_invocation(
    kind: StepKind,
    tool: &str,
    params: &PipelineParameters,
    env: &BTreeMap<String, String>,
) -> StepInvocation {
    let mut command = vec![tool.to_string(), kind.name().to_string()];
    if matches!(kind, StepKind::Run | StepKind::Test) {
        command.push("--threads".to_string());
        command.push(params.threads.to_string());
        if let Some(target) = params.target.as_deref().filter(|t| !t.is_empty()) {
            command.push("--target".to_string());
            command.push(target.to_string());
        }
        if kind == StepKind::Run && params.full_refresh {
            command.push("--full-refresh".to_string());
        }
    }
    let mut invocation = StepInvocation::new(command, params.project_dir.clone());
    invocation.environment_overrides = env.clone();
    invocation
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub step: StepKind,
    pub run: StepRun,
}

/// What a successful run did, step by step.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PipelineSummary {
    pub steps: Vec<StepReport>,
}

pub struct Pipeline<'a> {
    runner: &'a dyn CommandRunner,
    tool: String,
    env: BTreeMap<String, String>,
    policies: StepPolicies,
    cache_root: Option<PathBuf>,
    profiles_dir: Option<PathBuf>,
}

impl<'a> Pipeline<'a> {
    pub fn new(runner: &'a dyn CommandRunner, tool: impl Into<String>) -> Self {
        Self {
            runner,
            tool: tool.into(),
            env: BTreeMap::new(),
            policies: DEFAULT_POLICIES,
            cache_root: None,
            profiles_dir: None,
        }
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    #[cfg(test)]
    pub fn with_policies(mut self, policies: StepPolicies) -> Self {
        self.policies = policies;
        self
    }

    /// Enable the deps cache under `root`.
    pub fn with_cache_root(mut self, root: PathBuf) -> Self {
        self.cache_root = Some(root);
        self
    }

    /// Profile directory to report in logs; never passed to the tool.
    pub fn with_profiles_dir(mut self, profiles_dir: Option<PathBuf>) -> Self {
        self.profiles_dir = profiles_dir;
        self
    }

    /// Run all four steps, stopping at the first `StepFailed`.
    ///
    /// The project directory is resolved to an absolute path first so cache
    /// keys name the directory the tool actually runs in.
    pub fn run(&self, params: &PipelineParameters) -> Result<PipelineSummary> {
        if params.threads == 0 {
            return Err(anyhow!("threads must be at least 1"));
        }
        let params = &PipelineParameters {
            project_dir: resolve_dir(&params.project_dir)?,
            ..params.clone()
        };
        tracing::info!(
            project_dir = %params.project_dir.display(),
            target = params.target.as_deref().unwrap_or("<default>"),
            threads = params.threads,
            full_refresh = params.full_refresh,
            "Starting flow"
        );
        match &self.profiles_dir {
            Some(dir) => tracing::info!(profiles_dir = %dir.display(), "using tool profiles"),
            None => tracing::info!("tool profiles directory not set"),
        }

        let cache = self.cache_root.as_ref().map(|root| {
            StepCache::new(CacheConfig {
                root: root.clone(),
                ttl: self.policies.deps_cache_ttl,
            })
        });
        let executor = StepExecutor::new(self.runner);
        let mut summary = PipelineSummary::default();

        for kind in StepKind::ALL {
            let invocation = || step_invocation(kind, &self.tool, params, &self.env);
            tracing::info!(step = %kind, "{} ({} {})", kind.announcement(), self.tool, kind.name());
            let step_cache = cache.as_ref().filter(|_| kind.cache_eligible());
            let run = executor.run_step(kind, invocation, self.policies.for_step(kind), step_cache)?;
            summary.steps.push(StepReport { step: kind, run });
        }

        tracing::info!("Flow finished OK");
        Ok(summary)
    }
}
