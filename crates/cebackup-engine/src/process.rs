//! Bounded-time execution of external programs.
//!
//! Every external tool (tar, the compressor, gpg, hooks) runs through
//! [`run_with_timeout`]. A timed-out child is killed when its future is
//! dropped.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Captured output of a successful command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Why an external command did not succeed.
#[derive(Error, Debug)]
pub enum CommandError {
    /// The program could not be started
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program did not finish in time
    #[error("{program} timed out after {timeout:?}")]
    TimedOut { program: String, timeout: Duration },

    /// The program exited unsuccessfully
    #[error("{program} failed ({status}): {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stdout: String,
        stderr: String,
    },
}

/// Render a command line for logging.
pub fn describe(cmd: &Command) -> String {
    let std_cmd = cmd.as_std();
    let mut parts = vec![std_cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(std_cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

/// Run `cmd` to completion, capturing stdout and stderr, within `timeout`.
pub async fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
) -> Result<CommandOutput, CommandError> {
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    tracing::debug!("Run {}", describe(&cmd));

    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    let child = cmd.spawn().map_err(|source| CommandError::Spawn {
        program: program.clone(),
        source,
    })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => return Err(CommandError::Spawn { program, source }),
        Err(_) => return Err(CommandError::TimedOut { program, timeout }),
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if output.status.success() {
        Ok(CommandOutput { stdout, stderr })
    } else {
        Err(CommandError::Failed {
            program,
            status: output.status,
            stdout,
            stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_stdout() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo hello; echo oops >&2"]);
        let out = run_with_timeout(cmd, Duration::from_secs(5)).await.unwrap();
        assert_eq!(out.stdout, "hello\n");
        assert_eq!(out.stderr, "oops\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo bad >&2; exit 3"]);
        match run_with_timeout(cmd, Duration::from_secs(5)).await {
            Err(CommandError::Failed { status, stderr, .. }) => {
                assert_eq!(status.code(), Some(3));
                assert_eq!(stderr, "bad\n");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let err = run_with_timeout(cmd, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let cmd = Command::new("/nonexistent/cebackup-test-program");
        let err = run_with_timeout(cmd, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }

    #[test]
    fn test_describe() {
        let mut cmd = Command::new("tar");
        cmd.args(["--create", "--file", "/tmp/a.tar"]);
        assert_eq!(describe(&cmd), "tar --create --file /tmp/a.tar");
    }
}
