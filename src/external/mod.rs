// bucketrestore/src/external/mod.rs
//! Invocation of the host process's command-line tools (integrity check,
//! per-bucket rebuild, restart). Exit status and captured output are the
//! whole contract.
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::timeout;

use crate::config::CommandSpec;

#[derive(Debug, Clone)]
pub struct CommandReport {
    pub success: bool,
    pub status: String,
    pub stdout: String,
    pub stderr: String,
}

impl CommandReport {
    /// stdout and stderr joined, for pattern matching and diagnostics.
    pub fn combined_output(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
            (false, true) => self.stdout.trim_end().to_string(),
            (true, false) => self.stderr.trim_end().to_string(),
            (true, true) => String::new(),
        }
    }
}

/// Why a collaborator did not produce a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandFailure {
    Spawn(String),
    TimedOut(u64),
}

impl std::fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandFailure::Spawn(reason) => write!(f, "failed to start: {}", reason),
            CommandFailure::TimedOut(secs) => write!(f, "timed out after {}s", secs),
        }
    }
}

/// Substitutes `{bucket}` and `{name}` in every argument.
pub fn render_args(spec: &CommandSpec, bucket_path: Option<&Path>, name: Option<&str>) -> Vec<String> {
    spec.args
        .iter()
        .map(|arg| {
            let mut arg = arg.clone();
            if let Some(path) = bucket_path {
                arg = arg.replace("{bucket}", &path.to_string_lossy());
            }
            if let Some(name) = name {
                arg = arg.replace("{name}", name);
            }
            arg
        })
        .collect()
}

/// Runs the command under its timeout. A timed-out child is killed.
pub async fn run(spec: &CommandSpec, args: &[String]) -> Result<CommandReport, CommandFailure> {
    tracing::debug!(program = %spec.program.display(), ?args, "Running external command");

    let child = Command::new(&spec.program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| CommandFailure::Spawn(format!("{}: {}", spec.program.display(), e)))?;

    let output = match timeout(spec.timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| CommandFailure::Spawn(format!("{}: {}", spec.program.display(), e)))?,
        Err(_) => {
            tracing::warn!(
                program = %spec.program.display(),
                timeout_secs = spec.timeout.as_secs(),
                "External command timed out"
            );
            return Err(CommandFailure::TimedOut(spec.timeout.as_secs()));
        }
    };

    Ok(CommandReport {
        success: output.status.success(),
        status: output.status.to_string(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    fn sh(script: &str, timeout_secs: u64) -> CommandSpec {
        CommandSpec {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), script.to_string()],
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    #[tokio::test]
    async fn captures_status_and_output() {
        let spec = sh("echo out; echo err >&2; exit 3", 10);
        let report = run(&spec, &spec.args).await.unwrap();
        assert!(!report.success);
        assert_eq!(report.stdout.trim(), "out");
        assert_eq!(report.stderr.trim(), "err");
        assert_eq!(report.combined_output(), "out\nerr");
    }

    #[tokio::test]
    async fn zero_exit_is_success() {
        let spec = sh("true", 10);
        let report = run(&spec, &spec.args).await.unwrap();
        assert!(report.success);
        assert_eq!(report.combined_output(), "");
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let spec = sh("sleep 30", 1);
        let started = Instant::now();
        let failure = run(&spec, &spec.args).await.unwrap_err();
        assert_eq!(failure, CommandFailure::TimedOut(1));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_failure() {
        let spec = CommandSpec {
            program: PathBuf::from("/definitely/not/here"),
            args: vec![],
            timeout: Duration::from_secs(1),
        };
        assert!(matches!(run(&spec, &[]).await, Err(CommandFailure::Spawn(_))));
    }

    #[test]
    fn renders_placeholders() {
        let spec = CommandSpec {
            program: PathBuf::from("splunk"),
            args: vec!["rebuild".into(), "{bucket}".into(), "--name={name}".into()],
            timeout: Duration::from_secs(1),
        };
        let args = render_args(&spec, Some(Path::new("/thawed/db_1_2_3")), Some("db_1_2_3"));
        assert_eq!(args, vec!["rebuild", "/thawed/db_1_2_3", "--name=db_1_2_3"]);
    }
}
