//! Flow configuration helpers.
//!
//! The config file only describes how to reach the external tool. Retry
//! policies and cache lifetimes stay compiled in so a run cannot be tuned
//! into a different pipeline by accident.
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Default external tool invoked for every step.
pub const DEFAULT_TOOL: &str = "dbt";

/// Environment variable pointing the tool at its profiles directory.
pub const PROFILES_DIR_ENV: &str = "DBT_PROFILES_DIR";

/// Optional, user-supplied settings for a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlowConfig {
    pub schema_version: u32,
    /// Program name or path of the data-build tool.
    #[serde(default = "default_tool")]
    pub tool: String,
    /// Directories prepended to the child `PATH` so the tool resolves.
    #[serde(default)]
    pub extra_path: Vec<PathBuf>,
    /// Environment overrides applied to every step.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Root directory for step cache entries.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

fn default_tool() -> String {
    DEFAULT_TOOL.to_string()
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            schema_version: CONFIG_SCHEMA_VERSION,
            tool: default_tool(),
            extra_path: Vec::new(),
            env: BTreeMap::new(),
            cache_dir: None,
        }
    }
}

impl FlowConfig {
    /// Cache root for this run, falling back to a directory inside the project.
    pub fn cache_root(&self, project_dir: &Path) -> PathBuf {
        if let Some(dir) = &self.cache_dir {
            return dir.clone();
        }
        match dirs::cache_dir() {
            Some(base) => base.join("etl-flow").join("tasks"),
            None => project_dir.join(".etl-flow-cache"),
        }
    }
}

/// Load and validate a config file.
pub fn load_config(path: &Path) -> Result<FlowConfig> {
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let config: FlowConfig = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse config JSON {}", path.display()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Load the config named on the command line, or defaults when none is given.
pub fn load_config_optional(path: Option<&Path>) -> Result<FlowConfig> {
    match path {
        Some(path) => load_config(path),
        None => Ok(FlowConfig::default()),
    }
}

pub fn validate_config(config: &FlowConfig) -> Result<()> {
    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported config schema_version {}",
            config.schema_version
        ));
    }
    if config.tool.trim().is_empty() {
        return Err(anyhow!("tool must be non-empty"));
    }
    for key in config.env.keys() {
        if key.is_empty() || key.contains('=') {
            return Err(anyhow!("invalid env key {key:?}"));
        }
    }
    Ok(())
}
