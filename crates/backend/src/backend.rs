//! The [`Backend`] capability set.
//!
//! A backend stages, updates, and verifies a running image on one kind of
//! execution target. The scenario runner is generic over this trait.

use std::future::Future;

use autest_core::StatefulChange;
use tracing::{debug, info};

use crate::error::BackendError;
use crate::exec::{CommandRunner, CommandSpec};
use crate::report::{assert_enough_passed, parse_report};

/// Image staging, update, and verification on one target.
///
/// Methods take `&mut self` because a backend may cache state between calls
/// (the VM backend remembers its disk artifact). Calls are never concurrent.
pub trait Backend: Send {
    /// Brings the target to a known running state at `image_path`.
    ///
    /// # Errors
    ///
    /// Propagates update or VM lifecycle failures.
    fn prepare_base(
        &mut self,
        image_path: &str,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Updates the target to `image_path`.
    ///
    /// An empty `src_image_path` requests a full update; anything else a delta
    /// from that image. `proxy_port` routes the update client through a relay.
    ///
    /// # Errors
    ///
    /// `BackendError::UpdateFailure` if the update step fails.
    fn update_image(
        &mut self,
        image_path: &str,
        src_image_path: &str,
        stateful: StatefulChange,
        proxy_port: Option<u16>,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Updates the target from a pre-built payload bundle.
    ///
    /// # Errors
    ///
    /// `BackendError::UpdateFailure` if the update step fails.
    fn update_using_payload(
        &mut self,
        payload_path: &str,
        stateful: StatefulChange,
        proxy_port: Option<u16>,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Runs the verification suite and returns the pass percentage.
    ///
    /// # Errors
    ///
    /// `BackendError::VerificationFailure` if fewer than `required_percent`
    /// cases passed.
    fn verify_image(
        &mut self,
        required_percent: u8,
    ) -> impl Future<Output = Result<u8, BackendError>> + Send;

    /// Releases anything the backend owns at the end of a run.
    fn teardown(&mut self) -> impl Future<Output = Result<(), BackendError>> + Send {
        async { Ok(()) }
    }
}

/// Runs an update step and maps its outcome to [`BackendError::UpdateFailure`].
///
/// Verbose mode streams output live; any execution error becomes an
/// `UpdateFailure` with exit code 1 and the error message as output. Captured
/// mode inspects the exit code and keeps stdout; a spawn failure stays an
/// execution error.
pub(crate) async fn run_update_step<R: CommandRunner>(
    runner: &R,
    cmd: &CommandSpec,
    verbose: bool,
) -> Result<(), BackendError> {
    info!(step = %cmd.name(), "running update step");
    if verbose {
        return runner
            .run_streamed(cmd)
            .await
            .map_err(|e| BackendError::UpdateFailure {
                code: 1,
                output: e.to_string(),
            });
    }

    let out = runner.run_captured(cmd).await?;
    if out.success() {
        Ok(())
    } else {
        Err(BackendError::UpdateFailure {
            code: out.code,
            output: out.stdout,
        })
    }
}

/// Runs a verification step, logs its output, and checks the pass percentage.
///
/// The step's own exit code is ignored.
pub(crate) async fn run_verify_step<R: CommandRunner>(
    runner: &R,
    cmd: &CommandSpec,
    required_percent: u8,
) -> Result<u8, BackendError> {
    info!(step = %cmd.name(), required = required_percent, "running verification");
    let out = runner.run_captured(cmd).await?;
    debug!(exit_code = out.code, "verification step finished");
    info!(output = %out.stdout, "verification output");

    let result = parse_report(&out.stdout);
    info!(percent_passed = result.percent_passed, "verification parsed");
    assert_enough_passed(&result, required_percent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::mock::{Reply, ScriptedRunner};

    fn cmd() -> CommandSpec {
        CommandSpec::new("/scripts/image_to_live.sh").arg("--image=/a.bin")
    }

    #[tokio::test]
    async fn captured_failure_keeps_exit_code_and_stdout() {
        let runner = ScriptedRunner::new();
        runner.reply("image_to_live.sh", Reply::exit(5, "hash mismatch"));

        let err = run_update_step(&runner, &cmd(), false).await.unwrap_err();
        match err {
            BackendError::UpdateFailure { code, output } => {
                assert_eq!(code, 5);
                assert_eq!(output, "hash mismatch");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(!runner.calls()[0].1);
    }

    #[tokio::test]
    async fn captured_spawn_failure_is_exec_error() {
        let runner = ScriptedRunner::new();
        runner.reply("image_to_live.sh", Reply::SpawnError);
        let err = run_update_step(&runner, &cmd(), false).await.unwrap_err();
        assert!(matches!(err, BackendError::Exec { .. }));
    }

    #[tokio::test]
    async fn verbose_failure_uses_code_one_and_error_message() {
        let runner = ScriptedRunner::new();
        runner.reply("image_to_live.sh", Reply::exit(9, "ignored stdout"));

        let err = run_update_step(&runner, &cmd(), true).await.unwrap_err();
        match err {
            BackendError::UpdateFailure { code, output } => {
                assert_eq!(code, 1);
                assert!(output.contains("exited with code 9"));
                assert!(!output.contains("ignored stdout"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(runner.calls()[0].1);
    }

    #[tokio::test]
    async fn verbose_spawn_failure_is_update_failure() {
        let runner = ScriptedRunner::new();
        runner.reply("image_to_live.sh", Reply::SpawnError);
        let err = run_update_step(&runner, &cmd(), true).await.unwrap_err();
        assert!(matches!(err, BackendError::UpdateFailure { code: 1, .. }));
    }

    #[tokio::test]
    async fn verify_ignores_exit_code() {
        let runner = ScriptedRunner::new();
        runner.reply("run_remote_tests.sh", Reply::exit(1, "Total PASS: 10/10 (100%)"));
        let verify = CommandSpec::new("/scripts/run_remote_tests.sh");
        assert_eq!(run_verify_step(&runner, &verify, 100).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn verify_below_threshold_fails() {
        let runner = ScriptedRunner::new();
        runner.reply("run_remote_tests.sh", Reply::exit(0, "Total PASS: 99/100 (99%)"));
        let verify = CommandSpec::new("/scripts/run_remote_tests.sh");
        let err = run_verify_step(&runner, &verify, 100).await.unwrap_err();
        assert!(matches!(
            err,
            BackendError::VerificationFailure { actual: 99, required: 100 }
        ));
    }
}
