//! Content-addressed result cache for cache-eligible steps.
//!
//! One JSON file per key under the cache root. The key already encodes every
//! input, so a file is only ever replaced by an entry for identical inputs.
use super::StepKind;
use crate::runner::StepInvocation;
use crate::util::{sha256_hex, write_json_atomic};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Where cache entries live and how long they stay valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub root: PathBuf,
    pub ttl: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub computed_at_epoch_ms: u128,
    pub ttl_ms: u128,
}

impl CacheEntry {
    /// Fresh strictly before `computed_at + ttl`.
    pub fn is_fresh(&self, now_epoch_ms: u128) -> bool {
        now_epoch_ms
            .checked_sub(self.computed_at_epoch_ms)
            .is_some_and(|age| age < self.ttl_ms)
    }
}

/// Hash the inputs that decide what a step invocation does.
pub fn cache_key(kind: StepKind, invocation: &StepInvocation) -> String {
    let mut material = Vec::new();
    material.extend_from_slice(b"step:");
    material.extend_from_slice(kind.name().as_bytes());
    for token in &invocation.command {
        material.extend_from_slice(b"\0arg:");
        material.extend_from_slice(token.as_bytes());
    }
    material.extend_from_slice(b"\0cwd:");
    material.extend_from_slice(invocation.working_directory.to_string_lossy().as_bytes());
    for (key, value) in &invocation.environment_overrides {
        material.extend_from_slice(b"\0env:");
        material.extend_from_slice(key.as_bytes());
        material.push(b'=');
        material.extend_from_slice(value.as_bytes());
    }
    sha256_hex(&material)
}

#[derive(Debug, Clone)]
pub struct StepCache {
    config: CacheConfig,
}

impl StepCache {
    pub fn new(config: CacheConfig) -> Self {
        Self { config }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.config.root.join(format!("{key}.json"))
    }

    /// Return the entry for `key` if one exists and is still fresh.
    pub fn lookup(&self, key: &str, now_epoch_ms: u128) -> Option<CacheEntry> {
        let path = self.entry_path(key);
        let content = fs::read_to_string(&path).ok()?;
        let entry: CacheEntry = match serde_json::from_str(&content) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "ignoring unreadable cache entry");
                return None;
            }
        };
        if entry.key != key {
            tracing::debug!(path = %path.display(), "cache entry key mismatch");
            return None;
        }
        if entry.is_fresh(now_epoch_ms) {
            Some(entry)
        } else {
            tracing::debug!(key, "cache entry expired");
            None
        }
    }

    /// Store a fresh entry for `key` computed at `now_epoch_ms`.
    pub fn record(&self, key: &str, now_epoch_ms: u128) -> Result<CacheEntry> {
        let entry = CacheEntry {
            key: key.to_string(),
            computed_at_epoch_ms: now_epoch_ms,
            ttl_ms: self.config.ttl.as_millis(),
        };
        let path = self.entry_path(key);
        write_json_atomic(&path, &entry)
            .with_context(|| format!("write cache entry {}", path.display()))?;
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn cache(root: &Path) -> StepCache {
        StepCache::new(CacheConfig {
            root: root.to_path_buf(),
            ttl: Duration::from_secs(600),
        })
    }

    fn deps_invocation(dir: &str) -> StepInvocation {
        StepInvocation::new(vec!["dbt".to_string(), "deps".to_string()], dir)
    }

    #[test]
    fn key_depends_on_every_input() {
        let base = deps_invocation("/proj");
        let key = cache_key(StepKind::Deps, &base);
        assert_eq!(key, cache_key(StepKind::Deps, &deps_invocation("/proj")));

        assert_ne!(key, cache_key(StepKind::Deps, &deps_invocation("/other")));
        assert_ne!(key, cache_key(StepKind::Seed, &base));

        let mut with_env = base.clone();
        with_env
            .environment_overrides
            .insert("DBT_TARGET".to_string(), "prod".to_string());
        assert_ne!(key, cache_key(StepKind::Deps, &with_env));

        let mut with_arg = base.clone();
        with_arg.command.push("--quiet".to_string());
        assert_ne!(key, cache_key(StepKind::Deps, &with_arg));
    }

    #[test]
    fn token_boundaries_are_part_of_the_key() {
        let joined = StepInvocation::new(vec!["ab".to_string()], "/proj");
        let split = StepInvocation::new(vec!["a".to_string(), "b".to_string()], "/proj");
        assert_ne!(
            cache_key(StepKind::Deps, &joined),
            cache_key(StepKind::Deps, &split)
        );
    }

    #[test]
    fn recorded_entry_is_a_hit_until_ttl_elapses() {
        let dir = tempfile::tempdir().expect("temp dir");
        let cache = cache(dir.path());
        cache.record("abc", 1_000).expect("record");

        assert!(cache.lookup("abc", 1_000).is_some());
        assert!(cache.lookup("abc", 600_999).is_some());
        assert!(cache.lookup("abc", 601_000).is_none());
        assert!(cache.lookup("other", 1_000).is_none());
    }

    #[test]
    fn entry_from_the_future_is_not_fresh() {
        let entry = CacheEntry {
            key: "k".to_string(),
            computed_at_epoch_ms: 5_000,
            ttl_ms: 1_000,
        };
        assert!(!entry.is_fresh(4_000));
        assert!(entry.is_fresh(5_500));
    }

    #[test]
    fn corrupt_or_mismatched_entries_are_misses() {
        let dir = tempfile::tempdir().expect("temp dir");
        let cache = cache(dir.path());
        fs::write(dir.path().join("bad.json"), "{not json").expect("write");
        assert!(cache.lookup("bad", 0).is_none());

        let foreign = CacheEntry {
            key: "someone-else".to_string(),
            computed_at_epoch_ms: 0,
            ttl_ms: u128::MAX,
        };
        write_json_atomic(&dir.path().join("mine.json"), &foreign).expect("write");
        assert!(cache.lookup("mine", 1).is_none());
    }
}
