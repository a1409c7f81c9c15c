//! External step execution.
//!
//! Every update, verify, and VM lifecycle step is an external program. The
//! [`CommandRunner`] trait abstracts how those programs run so backends can be
//! tested with a scripted runner instead of real tools.
//!
//! Two modes exist:
//! - streamed: stdout/stderr are inherited so the operator sees progress live;
//!   a non-zero exit is reported as [`BackendError::NonZeroExit`].
//! - captured: stdout/stderr are collected and returned with the exit code;
//!   only a spawn failure is an error.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tracing::debug;

use crate::error::BackendError;

/// A program invocation: path plus arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandSpec {
    /// Creates a spec for `program` with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends an argument only when `cond` holds.
    pub fn arg_if(self, cond: bool, arg: impl Into<String>) -> Self {
        if cond { self.arg(arg) } else { self }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Whether any argument equals `arg` exactly.
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// Program file name, used for log fields.
    pub fn name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Result of a captured run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code. `-1` when the process was killed by a signal.
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Runs external steps.
pub trait CommandRunner: Send + Sync + 'static {
    /// Runs `cmd` with inherited stdio.
    ///
    /// # Errors
    ///
    /// - `BackendError::Exec` if the program cannot be spawned
    /// - `BackendError::NonZeroExit` if it exits non-zero
    fn run_streamed(
        &self,
        cmd: &CommandSpec,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Runs `cmd` and collects its output. Non-zero exit is not an error.
    ///
    /// # Errors
    ///
    /// `BackendError::Exec` if the program cannot be spawned.
    fn run_captured(
        &self,
        cmd: &CommandSpec,
    ) -> impl Future<Output = Result<CommandOutput, BackendError>> + Send;
}

/// [`CommandRunner`] backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    fn command(cmd: &CommandSpec) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(cmd.program());
        command.args(cmd.args()).stdin(Stdio::null()).kill_on_drop(true);
        command
    }

    fn spawn_error(cmd: &CommandSpec, err: std::io::Error) -> BackendError {
        BackendError::Exec {
            program: cmd.program().display().to_string(),
            reason: err.to_string(),
        }
    }
}

impl CommandRunner for ProcessRunner {
    async fn run_streamed(&self, cmd: &CommandSpec) -> Result<(), BackendError> {
        debug!(command = %cmd, "running step (streamed)");
        let status = Self::command(cmd)
            .status()
            .await
            .map_err(|e| Self::spawn_error(cmd, e))?;
        if status.success() {
            Ok(())
        } else {
            Err(BackendError::NonZeroExit {
                program: cmd.program().display().to_string(),
                code: status.code().unwrap_or(-1),
            })
        }
    }

    async fn run_captured(&self, cmd: &CommandSpec) -> Result<CommandOutput, BackendError> {
        debug!(command = %cmd, "running step (captured)");
        let output = Self::command(cmd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| Self::spawn_error(cmd, e))?;
        Ok(CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Scripted runner for tests.
///
/// Records every call and replies per program file name.
#[cfg(test)]
pub(crate) mod mock {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone)]
    pub(crate) enum Reply {
        Output(CommandOutput),
        SpawnError,
    }

    impl Reply {
        pub(crate) fn exit(code: i32, stdout: &str) -> Self {
            Self::Output(CommandOutput {
                code,
                stdout: stdout.to_owned(),
                stderr: String::new(),
            })
        }
    }

    #[derive(Default)]
    pub(crate) struct ScriptedRunner {
        replies: Mutex<HashMap<String, VecDeque<Reply>>>,
        calls: Mutex<Vec<(CommandSpec, bool)>>,
    }

    impl ScriptedRunner {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        /// Queues the next reply for `program`. Unscripted calls exit 0.
        pub(crate) fn reply(&self, program: &str, reply: Reply) {
            self.replies
                .lock()
                .unwrap()
                .entry(program.to_owned())
                .or_default()
                .push_back(reply);
        }

        /// Recorded calls as (command, streamed).
        pub(crate) fn calls(&self) -> Vec<(CommandSpec, bool)> {
            self.calls.lock().unwrap().clone()
        }

        fn next(&self, cmd: &CommandSpec, streamed: bool) -> Reply {
            self.calls.lock().unwrap().push((cmd.clone(), streamed));
            self.replies
                .lock()
                .unwrap()
                .get_mut(&cmd.name())
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| Reply::exit(0, ""))
        }
    }

    impl CommandRunner for ScriptedRunner {
        async fn run_streamed(&self, cmd: &CommandSpec) -> Result<(), BackendError> {
            match self.next(cmd, true) {
                Reply::Output(out) if out.success() => Ok(()),
                Reply::Output(out) => Err(BackendError::NonZeroExit {
                    program: cmd.program().display().to_string(),
                    code: out.code,
                }),
                Reply::SpawnError => Err(BackendError::Exec {
                    program: cmd.program().display().to_string(),
                    reason: "scripted spawn failure".to_owned(),
                }),
            }
        }

        async fn run_captured(&self, cmd: &CommandSpec) -> Result<CommandOutput, BackendError> {
            match self.next(cmd, false) {
                Reply::Output(out) => Ok(out),
                Reply::SpawnError => Err(BackendError::Exec {
                    program: cmd.program().display().to_string(),
                    reason: "scripted spawn failure".to_owned(),
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_display_and_name() {
        let cmd = CommandSpec::new("/scripts/image_to_live.sh")
            .arg("--image=/img/a.bin")
            .arg_if(false, "--proxy_port=8082")
            .arg("--verify");
        assert_eq!(
            cmd.to_string(),
            "/scripts/image_to_live.sh --image=/img/a.bin --verify"
        );
        assert_eq!(cmd.name(), "image_to_live.sh");
        assert!(cmd.has_arg("--verify"));
        assert!(!cmd.has_arg("--proxy_port=8082"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captured_run_returns_exit_code_and_stdout() {
        let cmd = CommandSpec::new("sh").arg("-c").arg("echo hello; exit 3");
        let out = ProcessRunner.run_captured(&cmd).await.unwrap();
        assert_eq!(out.code, 3);
        assert_eq!(out.stdout.trim(), "hello");
        assert!(!out.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streamed_run_reports_non_zero_exit() {
        let cmd = CommandSpec::new("sh").arg("-c").arg("exit 4");
        let err = ProcessRunner.run_streamed(&cmd).await.unwrap_err();
        assert!(matches!(err, BackendError::NonZeroExit { code: 4, .. }));
    }

    #[tokio::test]
    async fn missing_program_is_exec_error() {
        let cmd = CommandSpec::new("/nonexistent/autest-tool");
        let err = ProcessRunner.run_captured(&cmd).await.unwrap_err();
        assert!(matches!(err, BackendError::Exec { .. }));
        let err = ProcessRunner.run_streamed(&cmd).await.unwrap_err();
        assert!(matches!(err, BackendError::Exec { .. }));
    }
}
