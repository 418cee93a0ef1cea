//! Retry and cache wrapping for a single pipeline step.
use super::cache::{cache_key, StepCache};
use super::StepKind;
use crate::runner::{CommandFailed, CommandRunner, StepInvocation};
use crate::util::now_epoch_ms;
use std::fmt;
use std::time::Duration;

/// Fixed-delay retry policy; `max_attempts` counts the first try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn with_retries(retries: u32, delay_seconds: u64) -> Self {
        Self {
            max_attempts: retries + 1,
            delay: Duration::from_secs(delay_seconds),
        }
    }
}

/// How a successful step was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepRun {
    Executed { attempts: u32 },
    Cached,
}

/// A step ran out of attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailed {
    pub step: StepKind,
    pub exit_status: Option<i32>,
    pub attempts: u32,
    pub last_error: CommandFailed,
}

impl fmt::Display for StepFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.exit_status {
            Some(code) => code.to_string(),
            None => "none".to_string(),
        };
        write!(
            f,
            "step {} failed after {} attempt(s) (exit status {status})",
            self.step, self.attempts
        )
    }
}

impl std::error::Error for StepFailed {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.last_error)
    }
}

pub struct StepExecutor<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> StepExecutor<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// Run one step, consulting `cache` first when given.
    pub fn run_step(
        &self,
        kind: StepKind,
        build_invocation: impl FnOnce() -> StepInvocation,
        policy: &RetryPolicy,
        cache: Option<&StepCache>,
    ) -> Result<StepRun, StepFailed> {
        let invocation = build_invocation();
        let key = cache.map(|_| cache_key(kind, &invocation));

        if let (Some(cache), Some(key)) = (cache, key.as_deref()) {
            match now_epoch_ms() {
                Ok(now) => {
                    if let Some(entry) = cache.lookup(key, now) {
                        tracing::info!(
                            step = %kind,
                            computed_at_epoch_ms = %entry.computed_at_epoch_ms,
                            "step cache hit; skipping"
                        );
                        return Ok(StepRun::Cached);
                    }
                }
                Err(err) => tracing::warn!(error = %err, "clock unavailable; skipping cache"),
            }
        }

        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.runner.execute(&invocation) {
                Ok(outcome) => {
                    tracing::debug!(
                        step = %kind,
                        attempt,
                        exit_status = outcome.exit_status,
                        succeeded = outcome.succeeded,
                        "step attempt finished"
                    );
                    break;
                }
                Err(err) if attempt < max_attempts => {
                    tracing::warn!(
                        step = %kind,
                        attempt,
                        max_attempts,
                        delay_secs = policy.delay.as_secs_f64(),
                        "{err}; retrying"
                    );
                    std::thread::sleep(policy.delay);
                    attempt += 1;
                }
                Err(err) => {
                    return Err(StepFailed {
                        step: kind,
                        exit_status: err.exit_status,
                        attempts: attempt,
                        last_error: err,
                    });
                }
            }
        }

        if let (Some(cache), Some(key)) = (cache, key.as_deref()) {
            let recorded = now_epoch_ms().and_then(|now| cache.record(key, now));
            if let Err(err) = recorded {
                tracing::warn!(step = %kind, error = %err, "failed to record step cache entry");
            }
        }
        Ok(StepRun::Executed { attempts: attempt })
    }
}
