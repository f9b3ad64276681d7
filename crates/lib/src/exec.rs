//! Execution layer for the external toolchain (latex, dvipng).
//! No shell is used; arguments are passed as a list to avoid injection.
//! Processes run through `tokio::process` so a slow render only suspends its own task.

use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to start {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
}

/// Captured result of a finished process.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub success: bool,
    /// Exit code; None when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    /// stdout and stderr joined, for logging failures.
    pub fn combined(&self) -> String {
        let mut msg = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !msg.is_empty() {
                msg.push('\n');
            }
            msg.push_str(&self.stderr);
        }
        msg
    }
}

/// Run `binary args...` in `cwd` with stdin closed and `envs` added to the inherited
/// environment. Waits for exit and captures output.
/// A non-zero exit is not an error here; callers inspect `success`.
pub async fn run(
    binary: &str,
    args: &[String],
    cwd: &Path,
    envs: &[(&str, &str)],
) -> Result<ExecOutput, ExecError> {
    log::debug!("exec: {} {:?} (cwd {})", binary, args, cwd.display());
    let output = Command::new(binary)
        .args(args)
        .envs(envs.iter().copied())
        .current_dir(cwd)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ExecError::Spawn {
            binary: binary.to_string(),
            source,
        })?;
    Ok(ExecOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let err = run("texbot-no-such-binary", &[], &std::env::temp_dir(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
        assert!(err.to_string().contains("texbot-no-such-binary"));
    }

    #[tokio::test]
    async fn captures_exit_status_and_output() {
        let out = run(
            "sh",
            &["-c".to_string(), "echo out; echo err >&2; exit 3".to_string()],
            &std::env::temp_dir(),
            &[],
        )
        .await
        .unwrap();
        assert!(!out.success);
        assert_eq!(out.code, Some(3));
        assert_eq!(out.combined(), "out\n\nerr\n");
    }

    #[tokio::test]
    async fn extra_environment_reaches_the_child() {
        let out = run(
            "sh",
            &["-c".to_string(), "printf '%s' \"$TEXBOT_EXEC_TEST\"".to_string()],
            &std::env::temp_dir(),
            &[("TEXBOT_EXEC_TEST", "paranoid")],
        )
        .await
        .unwrap();
        assert!(out.success);
        assert_eq!(out.stdout, "paranoid");
    }
}
