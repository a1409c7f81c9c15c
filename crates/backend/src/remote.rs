//! Remote-device backend.
//!
//! Drives an already-provisioned physical machine over the network. There is
//! no process lifecycle to manage: preparing a base image is simply a full
//! update to that image.

use std::path::PathBuf;

use autest_core::StatefulChange;
use autest_core::SuiteMode;
use autest_core::config::BackendConfig;
use tracing::info;

use crate::backend::{Backend, run_update_step, run_verify_step};
use crate::error::BackendError;
use crate::exec::{CommandRunner, CommandSpec, ProcessRunner};

const UPDATE_TOOL: &str = "image_to_live.sh";
const VERIFY_TOOL: &str = "run_remote_tests.sh";

/// Backend for a physical device reachable at `remote`.
pub struct RemoteBackend<R = ProcessRunner> {
    runner: R,
    scripts_dir: PathBuf,
    remote: String,
    suite: SuiteMode,
    verbose: bool,
}

impl RemoteBackend<ProcessRunner> {
    /// Creates a backend that runs the real tools.
    pub fn from_config(config: &BackendConfig) -> Self {
        Self::with_runner(config, ProcessRunner)
    }
}

impl<R: CommandRunner> RemoteBackend<R> {
    pub fn with_runner(config: &BackendConfig, runner: R) -> Self {
        Self {
            runner,
            scripts_dir: PathBuf::from(&config.scripts_dir),
            remote: config.remote.clone(),
            suite: config.suite,
            verbose: config.verbose,
        }
    }

    /// Remote address of the device.
    pub fn remote(&self) -> &str {
        &self.remote
    }

    fn update_command(&self) -> CommandSpec {
        CommandSpec::new(self.scripts_dir.join(UPDATE_TOOL))
    }
}

impl<R: CommandRunner> Backend for RemoteBackend<R> {
    async fn prepare_base(&mut self, image_path: &str) -> Result<(), BackendError> {
        info!(image = image_path, remote = %self.remote, "preparing base image");
        self.update_image(image_path, "", StatefulChange::Preserve, None)
            .await
    }

    async fn update_image(
        &mut self,
        image_path: &str,
        src_image_path: &str,
        stateful: StatefulChange,
        proxy_port: Option<u16>,
    ) -> Result<(), BackendError> {
        let cmd = self
            .update_command()
            .arg(format!("--image={image_path}"))
            .arg(format!("--remote={}", self.remote))
            .arg(stateful.as_flag())
            .arg("--verify")
            .arg(format!("--src_image={src_image_path}"));
        let cmd = with_proxy_port(cmd, proxy_port);
        run_update_step(&self.runner, &cmd, self.verbose).await
    }

    async fn update_using_payload(
        &mut self,
        payload_path: &str,
        stateful: StatefulChange,
        proxy_port: Option<u16>,
    ) -> Result<(), BackendError> {
        let cmd = self
            .update_command()
            .arg(format!("--payload={payload_path}"))
            .arg(format!("--remote={}", self.remote))
            .arg(stateful.as_flag())
            .arg("--verify");
        let cmd = with_proxy_port(cmd, proxy_port);
        run_update_step(&self.runner, &cmd, self.verbose).await
    }

    async fn verify_image(&mut self, required_percent: u8) -> Result<u8, BackendError> {
        let cmd = CommandSpec::new(self.scripts_dir.join(VERIFY_TOOL))
            .arg(format!("--remote={}", self.remote))
            .arg(self.suite.suite_name());
        run_verify_step(&self.runner, &cmd, required_percent).await
    }
}

/// Appends `--proxy_port=<p>` for a non-zero relay port.
pub(crate) fn with_proxy_port(cmd: CommandSpec, proxy_port: Option<u16>) -> CommandSpec {
    match proxy_port {
        Some(port) if port != 0 => cmd.arg(format!("--proxy_port={port}")),
        _ => cmd,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::mock::{Reply, ScriptedRunner};

    fn config() -> BackendConfig {
        BackendConfig {
            remote: "192.168.1.10".to_owned(),
            scripts_dir: "/scripts".to_owned(),
            verbose: false,
            ..BackendConfig::default()
        }
    }

    #[tokio::test]
    async fn update_builds_image_to_live_command() {
        let mut backend = RemoteBackend::with_runner(&config(), ScriptedRunner::new());
        backend
            .update_image("/img/b.bin", "/img/a.bin", StatefulChange::Wipe, Some(8082))
            .await
            .unwrap();

        let calls = backend.runner.calls();
        let (cmd, streamed) = &calls[0];
        assert!(!streamed);
        assert_eq!(cmd.program(), PathBuf::from("/scripts/image_to_live.sh"));
        assert_eq!(
            cmd.args(),
            [
                "--image=/img/b.bin",
                "--remote=192.168.1.10",
                "--stateful_update_flag=clean",
                "--verify",
                "--src_image=/img/a.bin",
                "--proxy_port=8082",
            ]
        );
    }

    #[tokio::test]
    async fn prepare_base_is_full_update() {
        let mut backend = RemoteBackend::with_runner(&config(), ScriptedRunner::new());
        backend.prepare_base("/img/a.bin").await.unwrap();

        let (cmd, _) = &backend.runner.calls()[0];
        assert!(cmd.has_arg("--image=/img/a.bin"));
        assert!(cmd.has_arg("--src_image="));
        assert!(cmd.has_arg("--stateful_update_flag=old"));
        assert!(!cmd.args().iter().any(|a| a.starts_with("--proxy_port")));
    }

    #[tokio::test]
    async fn payload_update_uses_payload_flag() {
        let mut backend = RemoteBackend::with_runner(&config(), ScriptedRunner::new());
        backend
            .update_using_payload("/payloads/truncated.gz", StatefulChange::Preserve, None)
            .await
            .unwrap();

        let (cmd, _) = &backend.runner.calls()[0];
        assert!(cmd.has_arg("--payload=/payloads/truncated.gz"));
        assert!(!cmd.args().iter().any(|a| a.starts_with("--image=")));
        assert!(!cmd.args().iter().any(|a| a.starts_with("--src_image=")));
    }

    #[tokio::test]
    async fn zero_proxy_port_is_omitted() {
        let mut backend = RemoteBackend::with_runner(&config(), ScriptedRunner::new());
        backend
            .update_image("/img/b.bin", "", StatefulChange::Preserve, Some(0))
            .await
            .unwrap();
        let (cmd, _) = &backend.runner.calls()[0];
        assert!(!cmd.args().iter().any(|a| a.starts_with("--proxy_port")));
    }

    #[tokio::test]
    async fn verify_runs_configured_suite() {
        let runner = ScriptedRunner::new();
        runner.reply(VERIFY_TOOL, Reply::exit(0, "Total PASS: 21/25 (84%)"));
        let mut backend = RemoteBackend::with_runner(
            &BackendConfig {
                suite: SuiteMode::Quick,
                ..config()
            },
            runner,
        );

        assert_eq!(backend.verify_image(10).await.unwrap(), 84);
        let (cmd, _) = &backend.runner.calls()[0];
        assert_eq!(
            cmd.args(),
            ["--remote=192.168.1.10", "build_RootFilesystemSize"]
        );
    }

    #[tokio::test]
    async fn failed_update_surfaces_captured_output() {
        let runner = ScriptedRunner::new();
        runner.reply(
            UPDATE_TOOL,
            Reply::exit(1, "download_hash_data == update_check_response_hash failed"),
        );
        let mut backend = RemoteBackend::with_runner(&config(), runner);
        let err = backend
            .update_using_payload("/p.gz", StatefulChange::Preserve, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BackendError::UpdateFailure { ref output, .. } if output.contains("update_check_response_hash")
        ));
    }
}
