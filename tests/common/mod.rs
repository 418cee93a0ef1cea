//! Shared test infrastructure for integration tests.

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// Command for the built `etlflow` binary.
pub fn etlflow() -> Command {
    Command::new(env!("CARGO_BIN_EXE_etlflow"))
}

/// Run `etlflow report` from `cwd`.
#[allow(dead_code)]
pub fn run_report(cwd: &Path) -> Output {
    etlflow()
        .arg("report")
        .current_dir(cwd)
        .output()
        .expect("run etlflow report")
}

/// Write a dbt artifact under `<project>/target/`.
#[allow(dead_code)]
pub fn write_artifact(project: &Path, name: &str, value: &Value) {
    let target = project.join("target");
    fs::create_dir_all(&target).expect("create target dir");
    let text = serde_json::to_string_pretty(value).expect("serialize artifact");
    fs::write(target.join(name), text).expect("write artifact");
}

pub fn read_json(path: &Path) -> Value {
    let text = fs::read_to_string(path)
        .unwrap_or_else(|err| panic!("read {}: {err}", path.display()));
    serde_json::from_str(&text).expect("parse json")
}

/// Install a fake `dbt` that appends `<cwd>|<args>` to `$FAKE_DBT_LOG`,
/// exits with `$FAKE_DBT_FAIL_<SUBCOMMAND>` when set, and writes
/// `target/run_results.json` on `test`.
#[cfg(unix)]
#[allow(dead_code)]
pub fn write_fake_tool(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-dbt");
    let script = r#"#!/bin/sh
echo "$(pwd)|$*" >> "$FAKE_DBT_LOG"
sub="$1"
eval "code=\${FAKE_DBT_FAIL_$(echo "$sub" | tr '[:lower:]' '[:upper:]'):-0}"
if [ "$code" != "0" ]; then
  exit "$code"
fi
if [ "$sub" = "test" ]; then
  mkdir -p target
  cat > target/run_results.json <<'EOF'
{"results": [
  {"status": "pass", "unique_id": "test.shop.not_null_orders_id"},
  {"status": "fail", "unique_id": "test.shop.unique_orders_id", "failures": 2, "message": "Got 2 results"}
]}
EOF
fi
exit 0
"#;
    fs::write(&path, script).expect("write fake tool");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod fake tool");
    path
}

/// Write a flow config pointing at `tool`, logging to `log`, caching in `cache_dir`.
#[allow(dead_code)]
pub fn write_flow_config(dir: &Path, tool: &Path, log: &Path, cache_dir: &Path) -> PathBuf {
    let config = serde_json::json!({
        "schema_version": 1,
        "tool": tool,
        "env": { "FAKE_DBT_LOG": log },
        "cache_dir": cache_dir,
    });
    let path = dir.join("flow.json");
    fs::write(&path, serde_json::to_string_pretty(&config).expect("serialize config"))
        .expect("write config");
    path
}

/// Logged `(cwd, args)` pairs, one per tool invocation.
#[allow(dead_code)]
pub fn logged_calls(log: &Path) -> Vec<(String, String)> {
    if !log.exists() {
        return Vec::new();
    }
    fs::read_to_string(log)
        .expect("read tool log")
        .lines()
        .filter_map(|line| line.split_once('|'))
        .map(|(cwd, args)| (cwd.to_string(), args.to_string()))
        .collect()
}
