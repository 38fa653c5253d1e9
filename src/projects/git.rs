//! Clone-or-pull of a project's working copy using the git binary.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use super::models::SyncAction;
use crate::config::ControlConfig;

/// What a sync attempt produced. The engine never touches project status;
/// the tracker turns this into one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub success: bool,
    pub message: String,
    pub action: SyncAction,
}

impl SyncOutcome {
    fn ok(action: SyncAction, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            action,
        }
    }

    fn failed(action: SyncAction, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            action,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GitSync {
    git_cmd: String,
    clone_timeout: Duration,
    pull_timeout: Duration,
}

impl GitSync {
    pub fn new(git_cmd: impl Into<String>) -> Self {
        Self {
            git_cmd: git_cmd.into(),
            clone_timeout: Duration::from_secs(120),
            pull_timeout: Duration::from_secs(60),
        }
    }

    pub fn from_config(config: &ControlConfig) -> Self {
        Self::new(&config.tools.git_cmd)
            .with_timeouts(config.sync.clone_timeout(), config.sync.pull_timeout())
    }

    pub fn with_timeouts(mut self, clone_timeout: Duration, pull_timeout: Duration) -> Self {
        self.clone_timeout = clone_timeout;
        self.pull_timeout = pull_timeout;
        self
    }

    /// A working copy that already holds a repository is pulled; anything
    /// else is cloned.
    pub async fn planned_action(workdir: &Path) -> SyncAction {
        match tokio::fs::try_exists(workdir.join(".git")).await {
            Ok(true) => SyncAction::Pull,
            _ => SyncAction::Clone,
        }
    }

    pub async fn sync(&self, repo_url: &str, branch: &str, workdir: &Path) -> SyncOutcome {
        match Self::planned_action(workdir).await {
            SyncAction::Clone => self.clone_repo(repo_url, branch, workdir).await,
            SyncAction::Pull => self.pull_repo(branch, workdir).await,
        }
    }

    /// A failed clone removes whatever it left in `workdir`, so the next
    /// attempt clones again instead of pulling a partial repository.
    async fn clone_repo(&self, repo_url: &str, branch: &str, workdir: &Path) -> SyncOutcome {
        let action = SyncAction::Clone;
        let parent = match workdir.parent() {
            Some(parent) => parent,
            None => {
                return SyncOutcome::failed(
                    action,
                    format!("Invalid working directory {}", workdir.display()),
                );
            }
        };
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            return SyncOutcome::failed(
                action,
                format!("Failed to create {}: {}", parent.display(), e),
            );
        }

        let target = workdir.to_string_lossy();
        let args = [
            "clone",
            "--branch",
            branch,
            "--single-branch",
            "--",
            repo_url,
            &*target,
        ];
        let outcome = self
            .run_git(action, &args, parent, self.clone_timeout, "Repository cloned successfully")
            .await;
        if !outcome.success {
            discard_partial_clone(workdir).await;
        }
        outcome
    }

    async fn pull_repo(&self, branch: &str, workdir: &Path) -> SyncOutcome {
        let args = ["pull", "origin", branch];
        self.run_git(
            SyncAction::Pull,
            &args,
            workdir,
            self.pull_timeout,
            "Repository updated successfully",
        )
        .await
    }

    async fn run_git(
        &self,
        action: SyncAction,
        args: &[&str],
        cwd: &Path,
        limit: Duration,
        success_message: &str,
    ) -> SyncOutcome {
        tracing::debug!(git = %self.git_cmd, ?args, cwd = %cwd.display(), "Running git");
        let child = Command::new(&self.git_cmd)
            .args(args)
            .current_dir(cwd)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return SyncOutcome::failed(
                    action,
                    format!("Git executable '{}' is not installed or not in PATH", self.git_cmd),
                );
            }
            Err(e) => {
                return SyncOutcome::failed(
                    action,
                    format!("Git {} failed to start: {}", action.as_str(), e),
                );
            }
        };

        // Dropping the wait future on timeout kills the child.
        let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return SyncOutcome::failed(
                    action,
                    format!("Git {} failed: {}", action.as_str(), e),
                );
            }
            Err(_) => {
                tracing::warn!(action = action.as_str(), "Git operation timed out");
                return SyncOutcome::failed(
                    action,
                    format!("Git {} timed out after {}", action.as_str(), describe(limit)),
                );
            }
        };

        if output.status.success() {
            return SyncOutcome::ok(action, success_message);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!(
                "Git {} exited with code {}",
                action.as_str(),
                output.status.code().unwrap_or(-1)
            )
        } else {
            stderr
        };
        SyncOutcome::failed(action, message)
    }
}

async fn discard_partial_clone(workdir: &Path) {
    match tokio::fs::remove_dir_all(workdir).await {
        Ok(()) => tracing::debug!(path = %workdir.display(), "Removed partial clone"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            path = %workdir.display(),
            error = %e,
            "Failed to remove partial clone"
        ),
    }
}

fn describe(limit: Duration) -> String {
    if limit.subsec_millis() == 0 {
        format!("{} seconds", limit.as_secs())
    } else {
        format!("{} ms", limit.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::create_test_script;
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// Fake git: logs its invocation, and on clone creates `<target>/.git`.
    fn fake_git(dir: &Path, extra: &str) -> PathBuf {
        let log = dir.join("git.log");
        let script = format!(
            r#"#!/bin/sh
echo "$(pwd)|$*" >> "{log}"
{extra}
if [ "$1" = "clone" ]; then
  for a; do last="$a"; done
  mkdir -p "$last/.git"
fi
exit 0
"#,
            log = log.display(),
        );
        create_test_script(dir, "git.sh", &script)
    }

    fn log_lines(dir: &TempDir) -> Vec<String> {
        std::fs::read_to_string(dir.path().join("git.log"))
            .unwrap_or_default()
            .lines()
            .map(String::from)
            .collect()
    }

    #[tokio::test]
    async fn test_missing_workdir_is_cloned() {
        let dir = TempDir::new().unwrap();
        let git = GitSync::new(fake_git(dir.path(), "").to_string_lossy());
        let workdir = dir.path().join("projects").join("7");

        let outcome = git.sync("https://example.com/r.git", "main", &workdir).await;
        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(outcome.action, SyncAction::Clone);
        assert_eq!(outcome.message, "Repository cloned successfully");

        let lines = log_lines(&dir);
        assert_eq!(lines.len(), 1);
        let expected = format!(
            "clone --branch main --single-branch -- https://example.com/r.git {}",
            workdir.display()
        );
        assert!(lines[0].ends_with(&expected), "{}", lines[0]);
        assert!(workdir.join(".git").exists());
    }

    #[tokio::test]
    async fn test_existing_repository_is_pulled() {
        let dir = TempDir::new().unwrap();
        let git = GitSync::new(fake_git(dir.path(), "").to_string_lossy());
        let workdir = dir.path().join("work");
        std::fs::create_dir_all(workdir.join(".git")).unwrap();

        let outcome = git.sync("https://example.com/r.git", "develop", &workdir).await;
        assert!(outcome.success);
        assert_eq!(outcome.action, SyncAction::Pull);
        assert_eq!(outcome.message, "Repository updated successfully");

        let lines = log_lines(&dir);
        let (cwd, args) = lines[0].split_once('|').unwrap();
        assert_eq!(args, "pull origin develop");
        assert!(cwd.ends_with("work"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_reports_stderr() {
        let dir = TempDir::new().unwrap();
        let git = GitSync::new(
            fake_git(
                dir.path(),
                "echo \"fatal: repository 'x' not found\" >&2\nexit 128",
            )
            .to_string_lossy(),
        );
        let outcome = git
            .sync("https://invalid.example/x.git", "main", &dir.path().join("w"))
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.message, "fatal: repository 'x' not found");
    }

    #[tokio::test]
    async fn test_silent_failure_reports_exit_code() {
        let dir = TempDir::new().unwrap();
        let git = GitSync::new(fake_git(dir.path(), "exit 2").to_string_lossy());
        let outcome = git.sync("u", "main", &dir.path().join("w")).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("exited with code 2"));
    }

    #[tokio::test]
    async fn test_timeout_is_a_failed_outcome() {
        let dir = TempDir::new().unwrap();
        let git = GitSync::new(fake_git(dir.path(), "sleep 5").to_string_lossy())
            .with_timeouts(Duration::from_millis(200), Duration::from_millis(200));
        let started = std::time::Instant::now();
        let outcome = git.sync("u", "main", &dir.path().join("w")).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("timed out"), "{}", outcome.message);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_timed_out_clone_is_retried_as_clone() {
        let dir = TempDir::new().unwrap();
        let extra = r#"if [ "$1" = "clone" ] && [ ! -f "$(dirname "$0")/cloned-once" ]; then
  touch "$(dirname "$0")/cloned-once"
  for a; do last="$a"; done
  mkdir -p "$last/.git"
  sleep 5
fi"#;
        let git = GitSync::new(fake_git(dir.path(), extra).to_string_lossy())
            .with_timeouts(Duration::from_millis(300), Duration::from_millis(300));
        let workdir = dir.path().join("projects").join("3");

        let first = git.sync("u", "main", &workdir).await;
        assert!(!first.success);
        assert_eq!(first.action, SyncAction::Clone);
        assert!(!workdir.exists());

        let second = git.sync("u", "main", &workdir).await;
        assert!(second.success, "{}", second.message);
        assert_eq!(second.action, SyncAction::Clone);
        assert!(workdir.join(".git").exists());
    }

    #[tokio::test]
    async fn test_failed_clone_leaves_no_working_copy() {
        let dir = TempDir::new().unwrap();
        let extra = r#"for a; do last="$a"; done
mkdir -p "$last/.git"
echo "fatal: early EOF" >&2
exit 128"#;
        let git = GitSync::new(fake_git(dir.path(), extra).to_string_lossy());
        let workdir = dir.path().join("w");

        let outcome = git.sync("u", "main", &workdir).await;
        assert!(!outcome.success);
        assert_eq!(outcome.message, "fatal: early EOF");
        assert!(!workdir.exists());
        assert_eq!(GitSync::planned_action(&workdir).await, SyncAction::Clone);
    }

    #[tokio::test]
    async fn test_missing_git_binary() {
        let dir = TempDir::new().unwrap();
        let git = GitSync::new("/nonexistent/git");
        let outcome = git.sync("u", "main", &dir.path().join("w")).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("not installed"));
    }

    #[test]
    fn test_describe_timeout() {
        assert_eq!(describe(Duration::from_secs(120)), "120 seconds");
        assert_eq!(describe(Duration::from_millis(250)), "250 ms");
    }
}
