//! Runs one playbook through the external runner and classifies the result.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tokio::process::Command;

use super::models::{FailureKind, JobFailure, JobOutcome, RunRequest};
use super::playbooks::{playbook_file_name, playbook_path};
use crate::config::ControlConfig;
use crate::errors::JobError;

/// Decode the runner's JSON-lines output.
///
/// Each line is one event; the last line that decodes as a JSON object or
/// array is the run summary. Other lines (banners, warnings, bare scalars)
/// are skipped. Output without any such line decodes to `{}`.
pub fn decode_summary(stdout: &str) -> Value {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .find(|value| value.is_object() || value.is_array())
        .unwrap_or_else(|| Value::Object(Map::new()))
}

/// Temp files backing a run's inventory and extra vars. Dropping this
/// removes both files.
struct RunInputs {
    inventory: Option<NamedTempFile>,
    extra_vars: Option<NamedTempFile>,
}

impl RunInputs {
    fn prepare(request: &RunRequest) -> Result<Self, JobError> {
        let inventory = match &request.inventory {
            Some(text) => Some(write_temp(".ini", text.as_bytes())?),
            None => None,
        };
        let extra_vars = match &request.extra_vars {
            Some(vars) if !vars.is_empty() => {
                let body = serde_json::to_vec(vars)
                    .map_err(|e| JobError::RunInput(std::io::Error::other(e)))?;
                Some(write_temp(".json", &body)?)
            }
            _ => None,
        };
        Ok(Self {
            inventory,
            extra_vars,
        })
    }
}

fn write_temp(suffix: &str, body: &[u8]) -> Result<NamedTempFile, JobError> {
    let mut file = tempfile::Builder::new()
        .prefix("playctl-")
        .suffix(suffix)
        .tempfile()
        .map_err(JobError::RunInput)?;
    file.write_all(body).map_err(JobError::RunInput)?;
    file.flush().map_err(JobError::RunInput)?;
    Ok(file)
}

#[derive(Debug, Clone)]
pub struct PlaybookExecutor {
    playbook_dir: PathBuf,
    runner_cmd: String,
    runner_args: Vec<String>,
}

impl PlaybookExecutor {
    pub fn new(playbook_dir: impl Into<PathBuf>, runner_cmd: impl Into<String>) -> Self {
        Self {
            playbook_dir: playbook_dir.into(),
            runner_cmd: runner_cmd.into(),
            runner_args: Vec::new(),
        }
    }

    pub fn from_config(config: &ControlConfig) -> Self {
        Self::new(&config.paths.playbook_dir, &config.tools.runner_cmd)
            .with_runner_args(config.tools.runner_args.clone())
    }

    /// Arguments placed before the generated `run ...` arguments.
    pub fn with_runner_args(mut self, args: Vec<String>) -> Self {
        self.runner_args = args;
        self
    }

    pub fn playbook_dir(&self) -> &Path {
        &self.playbook_dir
    }

    /// Execute `request` to completion. Never fails: every problem becomes
    /// an error outcome.
    pub async fn execute(&self, request: &RunRequest) -> JobOutcome {
        let name = request.playbook.as_str();
        let is_file = tokio::fs::metadata(playbook_path(&self.playbook_dir, name))
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false);
        if !is_file {
            let err = JobError::PlaybookNotFound {
                name: name.to_string(),
            };
            tracing::warn!(playbook = %name, "Playbook not found");
            return JobOutcome::Error(JobFailure::new(FailureKind::NotFound, err.to_string()));
        }

        let inputs = match RunInputs::prepare(request) {
            Ok(inputs) => inputs,
            Err(e) => {
                tracing::error!(playbook = %name, error = %e, "Failed to prepare run inputs");
                return JobOutcome::Error(JobFailure::new(FailureKind::Internal, e.to_string()));
            }
        };

        // `inputs` lives until the end of this function, so the temp files
        // outlast the child on every path.
        self.spawn_runner(name, &inputs).await
    }

    fn runner_args(&self, name: &str, dir: &Path, inputs: &RunInputs) -> Vec<String> {
        let mut args = self.runner_args.clone();
        args.extend([
            "run".to_string(),
            dir.to_string_lossy().into_owned(),
            "--playbook".to_string(),
            playbook_file_name(name),
            "-j".to_string(),
        ]);
        if let Some(inventory) = &inputs.inventory {
            args.push("--inventory".to_string());
            args.push(inventory.path().to_string_lossy().into_owned());
        }
        if let Some(vars) = &inputs.extra_vars {
            args.push("--cmdline".to_string());
            args.push(format!("-e @{}", vars.path().display()));
        }
        args
    }

    async fn spawn_runner(&self, name: &str, inputs: &RunInputs) -> JobOutcome {
        let dir = std::path::absolute(&self.playbook_dir)
            .unwrap_or_else(|_| self.playbook_dir.clone());
        let args = self.runner_args(name, &dir, inputs);
        tracing::debug!(playbook = %name, runner = %self.runner_cmd, ?args, "Spawning runner");

        let child = Command::new(&self.runner_cmd)
            .args(&args)
            .current_dir(&dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::error!(runner = %self.runner_cmd, "Runner binary not found");
                return JobOutcome::Error(JobFailure::new(
                    FailureKind::EnvironmentUnavailable,
                    format!(
                        "Automation runner '{}' is not installed or not in PATH",
                        self.runner_cmd
                    ),
                ));
            }
            Err(e) => {
                tracing::error!(runner = %self.runner_cmd, error = %e, "Failed to spawn runner");
                return JobOutcome::Error(JobFailure::new(
                    FailureKind::Internal,
                    format!("Failed to spawn runner '{}': {}", self.runner_cmd, e),
                ));
            }
        };

        let output = match child.wait_with_output().await {
            Ok(output) => output,
            Err(e) => {
                return JobOutcome::Error(JobFailure::new(
                    FailureKind::Internal,
                    format!("Failed to wait for runner: {}", e),
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            tracing::info!(playbook = %name, "Playbook run succeeded");
            return JobOutcome::Success(decode_summary(&stdout));
        }

        let returncode = output.status.code().unwrap_or(-1);
        tracing::warn!(playbook = %name, exit_code = returncode, "Playbook run failed");
        JobOutcome::Error(JobFailure {
            kind: FailureKind::ExternalTool,
            message: String::from_utf8_lossy(&output.stderr).into_owned(),
            stdout: Some(stdout),
            returncode: Some(returncode),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{create_test_script, write_playbook};
    use serde_json::json;
    use tempfile::TempDir;

    /// Runner that records its inputs into `dir` and then runs `body`.
    fn recording_runner(dir: &Path, body: &str) -> PathBuf {
        let d = dir.display();
        let script = format!(
            r#"#!/bin/sh
echo "$@" > "{d}/args.seen"
pwd > "{d}/cwd.seen"
while [ $# -gt 0 ]; do
  case "$1" in
    --inventory) cp "$2" "{d}/inventory.seen"; echo "$2" > "{d}/inventory.path"; shift ;;
    --cmdline) f="${{2#-e @}}"; cp "$f" "{d}/vars.seen"; echo "$f" > "{d}/vars.path"; shift ;;
  esac
  shift
done
{body}
"#
        );
        create_test_script(dir, "runner.sh", &script)
    }

    fn setup(body: &str) -> (TempDir, PlaybookExecutor) {
        let dir = TempDir::new().unwrap();
        let playbooks = dir.path().join("ansible");
        write_playbook(&playbooks, "site");
        let runner = recording_runner(dir.path(), body);
        let executor = PlaybookExecutor::new(&playbooks, runner.to_string_lossy());
        (dir, executor)
    }

    fn read(dir: &TempDir, name: &str) -> String {
        std::fs::read_to_string(dir.path().join(name)).unwrap()
    }

    #[test]
    fn test_decode_summary_takes_last_object() {
        let out = "banner\n{\"event\": \"start\"}\n{\"status\": \"successful\", \"rc\": 0}\nTrailing text\n";
        assert_eq!(decode_summary(out), json!({"status": "successful", "rc": 0}));
    }

    #[test]
    fn test_decode_summary_skips_scalar_json() {
        let out = "{\"a\": 1}\n42\n\"str\"\ntrue\n";
        assert_eq!(decode_summary(out), json!({"a": 1}));
    }

    #[test]
    fn test_decode_summary_accepts_trailing_array() {
        let out = "{\"a\": 1}\n[{\"host\": \"web1\"}, {\"host\": \"web2\"}]\n42\n";
        assert_eq!(
            decode_summary(out),
            json!([{"host": "web1"}, {"host": "web2"}])
        );
    }

    #[test]
    fn test_decode_summary_without_objects_is_empty() {
        assert_eq!(decode_summary(""), json!({}));
        assert_eq!(decode_summary("PLAY RECAP\nok=1\n"), json!({}));
    }

    #[tokio::test]
    async fn test_missing_playbook_never_spawns() {
        let (dir, executor) = setup("exit 0");
        let outcome = executor.execute(&RunRequest::new("missing-playbook")).await;

        match outcome {
            JobOutcome::Error(failure) => {
                assert_eq!(failure.kind, FailureKind::NotFound);
                assert!(failure.message.contains("missing-playbook.yml"));
            }
            other => panic!("Expected error outcome, got {:?}", other),
        }
        assert!(!dir.path().join("args.seen").exists());
    }

    #[tokio::test]
    async fn test_success_returns_decoded_summary() {
        let (dir, executor) = setup(
            r#"echo "not json"
echo '{"event": "playbook_on_start"}'
echo '{"event": "playbook_on_stats", "ok": {"localhost": 1}}'
exit 0"#,
        );
        let outcome = executor.execute(&RunRequest::new("site")).await;
        assert_eq!(
            outcome,
            JobOutcome::Success(json!({"event": "playbook_on_stats", "ok": {"localhost": 1}}))
        );

        let args = read(&dir, "args.seen");
        assert!(args.contains("run "));
        assert!(args.contains("--playbook site.yml -j"));
        let cwd = read(&dir, "cwd.seen");
        assert!(cwd.trim_end().ends_with("ansible"));
    }

    #[tokio::test]
    async fn test_success_without_structured_output_is_empty_object() {
        let (_dir, executor) = setup("echo 'PLAY RECAP'\nexit 0");
        let outcome = executor.execute(&RunRequest::new("site")).await;
        assert_eq!(outcome, JobOutcome::Success(json!({})));
    }

    #[tokio::test]
    async fn test_nonzero_exit_captures_streams_and_code() {
        let (_dir, executor) = setup("echo 'partial output'\necho 'task failed' >&2\nexit 3");
        let outcome = executor.execute(&RunRequest::new("site")).await;
        match outcome {
            JobOutcome::Error(failure) => {
                assert_eq!(failure.kind, FailureKind::ExternalTool);
                assert_eq!(failure.message.trim(), "task failed");
                assert_eq!(failure.stdout.as_deref().map(str::trim), Some("partial output"));
                assert_eq!(failure.returncode, Some(3));
            }
            other => panic!("Expected error outcome, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_absent_runner_is_environment_unavailable() {
        let dir = TempDir::new().unwrap();
        write_playbook(dir.path(), "site");
        let executor = PlaybookExecutor::new(dir.path(), "/nonexistent/ansible-runner");
        match executor.execute(&RunRequest::new("site")).await {
            JobOutcome::Error(failure) => {
                assert_eq!(failure.kind, FailureKind::EnvironmentUnavailable);
                assert!(failure.message.contains("not installed"));
            }
            other => panic!("Expected error outcome, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_inventory_and_vars_are_passed_then_removed() {
        let (dir, executor) = setup("exit 0");
        let mut vars = Map::new();
        vars.insert("app_version".into(), json!("1.2.3"));
        let request = RunRequest {
            playbook: "site".into(),
            inventory: Some("[web]\nhost1\n".into()),
            extra_vars: Some(vars),
        };

        let outcome = executor.execute(&request).await;
        assert!(matches!(outcome, JobOutcome::Success(_)));

        assert_eq!(read(&dir, "inventory.seen"), "[web]\nhost1\n");
        let seen_vars: Value = serde_json::from_str(&read(&dir, "vars.seen")).unwrap();
        assert_eq!(seen_vars, json!({"app_version": "1.2.3"}));

        let inventory_path = read(&dir, "inventory.path");
        let vars_path = read(&dir, "vars.path");
        assert!(!Path::new(inventory_path.trim()).exists());
        assert!(!Path::new(vars_path.trim()).exists());
    }

    #[tokio::test]
    async fn test_inventory_removed_after_failed_run() {
        let (dir, executor) = setup("exit 1");
        let request = RunRequest {
            playbook: "site".into(),
            inventory: Some("localhost\n".into()),
            extra_vars: None,
        };
        let outcome = executor.execute(&request).await;
        assert!(matches!(outcome, JobOutcome::Error(_)));
        let inventory_path = read(&dir, "inventory.path");
        assert!(!Path::new(inventory_path.trim()).exists());
    }

    #[tokio::test]
    async fn test_runner_args_prefix_is_applied() {
        let (dir, executor) = setup("exit 0");
        let executor = executor.with_runner_args(vec!["--quiet".into()]);
        executor.execute(&RunRequest::new("site")).await;
        assert!(read(&dir, "args.seen").starts_with("--quiet run "));
    }
}
