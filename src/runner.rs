//! External process execution for pipeline steps.
//!
//! The runner only spawns and waits. Children inherit stdout/stderr so tool
//! output reaches the terminal as it is produced, and any artifacts are the
//! child's business.
use std::collections::BTreeMap;
use std::env;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

/// One fully resolved command for a pipeline step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepInvocation {
    pub command: Vec<String>,
    pub working_directory: PathBuf,
    pub environment_overrides: BTreeMap<String, String>,
}

impl StepInvocation {
    pub fn new(command: Vec<String>, working_directory: impl Into<PathBuf>) -> Self {
        Self {
            command,
            working_directory: working_directory.into(),
            environment_overrides: BTreeMap::new(),
        }
    }

    /// Shell-quoted command line for logs and error messages.
    pub fn command_line(&self) -> String {
        shell_words::join(&self.command)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOutcome {
    pub exit_status: i32,
    pub succeeded: bool,
}

/// The child exited non-zero, died on a signal, or never started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailed {
    pub command: Vec<String>,
    /// `None` when no exit code exists (spawn failure or signal).
    pub exit_status: Option<i32>,
    pub detail: Option<String>,
}

impl CommandFailed {
    fn without_status(invocation: &StepInvocation, detail: impl Into<String>) -> Self {
        Self {
            command: invocation.command.clone(),
            exit_status: None,
            detail: Some(detail.into()),
        }
    }
}

impl fmt::Display for CommandFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let command = shell_words::join(&self.command);
        match (self.exit_status, self.detail.as_deref()) {
            (Some(code), _) => write!(f, "command `{command}` failed with exit status {code}"),
            (None, Some(detail)) => write!(f, "command `{command}` failed: {detail}"),
            (None, None) => write!(f, "command `{command}` failed"),
        }
    }
}

impl std::error::Error for CommandFailed {}

/// Seam between step execution and real processes.
pub trait CommandRunner {
    fn execute(&self, invocation: &StepInvocation) -> Result<StepOutcome, CommandFailed>;
}

/// Runs invocations as child processes of the current one.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    base_path: Option<OsString>,
    extra_path: Vec<PathBuf>,
}

impl ProcessRunner {
    /// Build a runner that extends the caller's current `PATH`.
    pub fn from_env(extra_path: Vec<PathBuf>) -> Self {
        Self {
            base_path: env::var_os("PATH"),
            extra_path,
        }
    }

    fn effective_path(&self, env_overrides: &BTreeMap<String, String>) -> Option<OsString> {
        let current = env_overrides
            .get("PATH")
            .map(OsString::from)
            .or_else(|| self.base_path.clone());
        if self.extra_path.is_empty() {
            return current;
        }
        match prepend_path(current.as_deref(), &self.extra_path) {
            Ok(joined) => Some(joined),
            Err(err) => {
                tracing::warn!(error = %err, "ignoring extra PATH entries");
                current
            }
        }
    }
}

impl CommandRunner for ProcessRunner {
    fn execute(&self, invocation: &StepInvocation) -> Result<StepOutcome, CommandFailed> {
        let Some((program, args)) = invocation.command.split_first() else {
            return Err(CommandFailed::without_status(invocation, "empty command"));
        };
        let env_overrides = &invocation.environment_overrides;
        let path_value = self.effective_path(env_overrides);
        let program = resolve_program(program, path_value.as_deref(), &invocation.working_directory);

        let command_line = invocation.command_line();
        tracing::info!("Running: {command_line}");

        let mut cmd = Command::new(&program);
        cmd.args(args);
        cmd.current_dir(&invocation.working_directory);
        for (key, value) in env_overrides {
            cmd.env(key, value);
        }
        if let Some(path_value) = &path_value {
            cmd.env("PATH", path_value);
        }
        let status = cmd
            .status()
            .map_err(|err| CommandFailed::without_status(invocation, format!("spawn: {err}")))?;

        match status.code() {
            Some(0) => {
                tracing::info!("Command finished: {command_line}");
                Ok(StepOutcome {
                    exit_status: 0,
                    succeeded: true,
                })
            }
            Some(code) => Err(CommandFailed {
                command: invocation.command.clone(),
                exit_status: Some(code),
                detail: None,
            }),
            None => Err(CommandFailed::without_status(
                invocation,
                "terminated by signal",
            )),
        }
    }
}

fn resolve_program(program: &str, path_value: Option<&OsStr>, cwd: &Path) -> PathBuf {
    match which::which_in(program, path_value, cwd) {
        Ok(resolved) => {
            tracing::debug!(program, resolved = %resolved.display(), "resolved tool");
            resolved
        }
        Err(err) => {
            tracing::debug!(program, error = %err, "tool not found on PATH");
            PathBuf::from(program)
        }
    }
}

/// Put `extra` ahead of `current`, skipping directories already listed.
pub(crate) fn prepend_path(
    current: Option<&OsStr>,
    extra: &[PathBuf],
) -> Result<OsString, env::JoinPathsError> {
    let existing: Vec<PathBuf> = current
        .map(|value| env::split_paths(value).collect())
        .unwrap_or_default();
    let mut entries: Vec<PathBuf> = Vec::with_capacity(existing.len() + extra.len());
    for dir in extra {
        let seen = existing
            .iter()
            .chain(entries.iter())
            .any(|entry| same_path_entry(entry, dir));
        if !seen {
            entries.push(dir.clone());
        }
    }
    entries.extend(existing);
    env::join_paths(entries)
}

#[cfg(windows)]
fn same_path_entry(a: &Path, b: &Path) -> bool {
    a.to_string_lossy().to_lowercase() == b.to_string_lossy().to_lowercase()
}

#[cfg(not(windows))]
fn same_path_entry(a: &Path, b: &Path) -> bool {
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str, cwd: &Path) -> StepInvocation {
        StepInvocation::new(
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            cwd,
        )
    }

    #[test]
    fn prepend_path_skips_existing_entries() {
        let current = env::join_paths(["/usr/bin", "/bin"]).expect("join");
        let joined = prepend_path(
            Some(current.as_os_str()),
            &[PathBuf::from("/opt/venv/bin"), PathBuf::from("/bin")],
        )
        .expect("prepend");
        let parts: Vec<PathBuf> = env::split_paths(&joined).collect();
        assert_eq!(
            parts,
            vec![
                PathBuf::from("/opt/venv/bin"),
                PathBuf::from("/usr/bin"),
                PathBuf::from("/bin"),
            ]
        );
    }

    #[test]
    fn prepend_path_without_current_value() {
        let joined = prepend_path(None, &[PathBuf::from("/opt/tool")]).expect("prepend");
        assert_eq!(joined, OsString::from("/opt/tool"));
    }

    #[test]
    fn empty_command_is_a_failure() {
        let runner = ProcessRunner::default();
        let err = runner
            .execute(&StepInvocation::new(Vec::new(), "."))
            .expect_err("empty command");
        assert_eq!(err.exit_status, None);
        assert_eq!(err.detail.as_deref(), Some("empty command"));
    }

    #[test]
    fn display_names_command_and_status() {
        let err = CommandFailed {
            command: ["dbt", "run", "--target", "my dev"]
                .iter()
                .map(|token| token.to_string())
                .collect(),
            exit_status: Some(2),
            detail: None,
        };
        assert_eq!(
            err.to_string(),
            "command `dbt run --target 'my dev'` failed with exit status 2"
        );
    }

    #[cfg(unix)]
    #[test]
    fn zero_exit_succeeds() {
        let dir = tempfile::tempdir().expect("temp dir");
        let runner = ProcessRunner::from_env(Vec::new());
        let outcome = runner.execute(&sh("exit 0", dir.path())).expect("success");
        assert_eq!(
            outcome,
            StepOutcome {
                exit_status: 0,
                succeeded: true
            }
        );
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_carries_status() {
        let dir = tempfile::tempdir().expect("temp dir");
        let runner = ProcessRunner::from_env(Vec::new());
        let err = runner.execute(&sh("exit 3", dir.path())).expect_err("failure");
        assert_eq!(err.exit_status, Some(3));
        assert_eq!(err.command[0], "sh");
    }

    #[cfg(unix)]
    #[test]
    fn overrides_reach_the_child_and_win_over_inherited_values() {
        let dir = tempfile::tempdir().expect("temp dir");
        let runner = ProcessRunner::from_env(Vec::new());
        let mut invocation = sh(
            "test \"$FLOW_RUNNER_VAR\" = yes && test \"$HOME\" = /flow-home",
            dir.path(),
        );
        invocation
            .environment_overrides
            .insert("FLOW_RUNNER_VAR".to_string(), "yes".to_string());
        invocation
            .environment_overrides
            .insert("HOME".to_string(), "/flow-home".to_string());
        runner.execute(&invocation).expect("overrides visible to child");
    }

    #[cfg(unix)]
    #[test]
    fn extra_path_makes_tools_resolvable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("temp dir");
        let bin_dir = dir.path().join("venv-bin");
        std::fs::create_dir_all(&bin_dir).expect("create bin dir");
        let tool = bin_dir.join("etl-flow-fake-tool");
        std::fs::write(&tool, "#!/bin/sh\nexit 0\n").expect("write tool");
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755))
            .expect("chmod tool");

        let invocation =
            StepInvocation::new(vec!["etl-flow-fake-tool".to_string()], dir.path());
        let runner = ProcessRunner::from_env(vec![bin_dir]);
        runner.execute(&invocation).expect("tool found via extra path");
    }

    #[cfg(unix)]
    #[test]
    fn runs_in_working_directory() {
        let dir = tempfile::tempdir().expect("temp dir");
        let runner = ProcessRunner::from_env(Vec::new());
        runner
            .execute(&sh("touch marker.txt", dir.path()))
            .expect("touch");
        assert!(dir.path().join("marker.txt").is_file());
    }

    #[test]
    fn missing_program_has_no_exit_status() {
        let dir = tempfile::tempdir().expect("temp dir");
        let runner = ProcessRunner::from_env(Vec::new());
        let invocation = StepInvocation::new(
            vec!["etl-flow-definitely-missing-tool".to_string()],
            dir.path(),
        );
        let err = runner.execute(&invocation).expect_err("spawn failure");
        assert_eq!(err.exit_status, None);
        assert!(err.detail.as_deref().is_some_and(|d| d.starts_with("spawn:")));
    }
}
