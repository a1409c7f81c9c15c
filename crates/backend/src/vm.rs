//! Virtual-machine backend.
//!
//! Runs updates against a local emulated machine. Before first use the base OS
//! image is converted into a VM disk artifact placed next to it; the artifact
//! is reused when it already exists. Every update and verify call runs with
//! `--snapshot --persist` so the VM started by one step survives into the
//! next step of the same scenario.

use std::path::{Path, PathBuf};

use autest_core::config::BackendConfig;
use autest_core::{StatefulChange, SuiteMode};
use tracing::info;

use crate::backend::{Backend, run_update_step, run_verify_step};
use crate::error::BackendError;
use crate::exec::{CommandRunner, CommandSpec, ProcessRunner};
use crate::remote::with_proxy_port;
use crate::vm_process::VmProcessGuard;

/// VM disk size passed to the conversion tool (MiB).
pub const FULL_VDISK_SIZE: u32 = 6072;
/// Stateful partition size passed to the conversion tool (MiB).
pub const FULL_STATEFULFS_SIZE: u32 = 3074;

const CONVERT_TOOL: &str = "image_to_vm.sh";
const UPDATE_TOOL: &str = "cros_run_vm_update";
const VERIFY_TOOL: &str = "cros_run_vm_test";

/// Backend for a local emulated machine.
pub struct VmBackend<R = ProcessRunner> {
    runner: R,
    guard: VmProcessGuard,
    scripts_dir: PathBuf,
    bin_dir: PathBuf,
    board: String,
    base_image: String,
    vm_image_name: String,
    suite: SuiteMode,
    no_graphics: bool,
    verbose: bool,
    vm_image_path: Option<PathBuf>,
}

impl VmBackend<ProcessRunner> {
    /// Creates a backend that runs the real tools.
    pub fn from_config(config: &BackendConfig) -> Self {
        Self::with_runner(config, ProcessRunner)
    }
}

impl<R: CommandRunner> VmBackend<R> {
    pub fn with_runner(config: &BackendConfig, runner: R) -> Self {
        Self {
            runner,
            guard: VmProcessGuard::new(&config.pid_file, &config.bin_dir),
            scripts_dir: PathBuf::from(&config.scripts_dir),
            bin_dir: PathBuf::from(&config.bin_dir),
            board: config.board.clone(),
            base_image: config.base_image.clone(),
            vm_image_name: config.vm_image_name.clone(),
            suite: config.suite,
            no_graphics: config.no_graphics,
            verbose: config.verbose,
            vm_image_path: None,
        }
    }

    /// VM disk artifact, once [`prepare_base`](Backend::prepare_base) has run.
    pub fn vm_image_path(&self) -> Option<&Path> {
        self.vm_image_path.as_deref()
    }

    fn require_vm_image(&self) -> Result<String, BackendError> {
        self.vm_image_path
            .as_ref()
            .map(|p| p.display().to_string())
            .ok_or_else(|| BackendError::NotPrepared("vm image has not been created".to_owned()))
    }

    fn pid_flag(&self) -> String {
        format!("--kvm_pid={}", self.guard.pid_file().display())
    }

    /// Update command shared by image and payload updates.
    fn update_command(&self, vm_image: &str, source_args: Vec<String>) -> CommandSpec {
        let mut cmd = CommandSpec::new(self.bin_dir.join(UPDATE_TOOL));
        for arg in source_args {
            cmd = cmd.arg(arg);
        }
        cmd.arg(format!("--vm_image_path={vm_image}"))
            .arg("--snapshot")
            .arg_if(self.no_graphics, "--no_graphics")
            .arg("--persist")
            .arg(self.pid_flag())
    }
}

/// Location of the VM disk artifact for `image_path`.
fn vm_image_for(image_path: &str, vm_image_name: &str) -> PathBuf {
    Path::new(image_path)
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(vm_image_name)
}

impl<R: CommandRunner> Backend for VmBackend<R> {
    async fn prepare_base(&mut self, image_path: &str) -> Result<(), BackendError> {
        self.guard.acquire(&self.runner).await?;

        let vm_image = vm_image_for(image_path, &self.vm_image_name);
        info!(vm_image = %vm_image.display(), "preparing vm image");

        if vm_image.exists() {
            info!(vm_image = %vm_image.display(), "using existing vm image");
        } else {
            let image_dir = vm_image
                .parent()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| ".".to_owned());
            info!(vm_image = %vm_image.display(), "vm image not found, creating one");
            let cmd = CommandSpec::new(self.scripts_dir.join(CONVERT_TOOL))
                .arg("--full")
                .arg(format!("--from={image_dir}"))
                .arg(format!("--vdisk_size={FULL_VDISK_SIZE}"))
                .arg(format!("--statefulfs_size={FULL_STATEFULFS_SIZE}"))
                .arg(format!("--board={}", self.board))
                .arg("--test_image");
            self.runner.run_streamed(&cmd).await?;
        }

        if !vm_image.exists() {
            return Err(BackendError::VmImageMissing {
                path: vm_image.display().to_string(),
            });
        }
        self.vm_image_path = Some(vm_image);
        Ok(())
    }

    async fn update_image(
        &mut self,
        image_path: &str,
        src_image_path: &str,
        stateful: StatefulChange,
        proxy_port: Option<u16>,
    ) -> Result<(), BackendError> {
        let vm_image = self.require_vm_image()?;
        // The base image only exists as the VM disk once converted
        let src = if !src_image_path.is_empty() && src_image_path == self.base_image {
            vm_image.as_str()
        } else {
            src_image_path
        };

        let cmd = self
            .update_command(&vm_image, vec![format!("--update_image_path={image_path}")])
            .arg(stateful.as_flag())
            .arg(format!("--src_image={src}"));
        let cmd = with_proxy_port(cmd, proxy_port);
        run_update_step(&self.runner, &cmd, self.verbose).await
    }

    async fn update_using_payload(
        &mut self,
        payload_path: &str,
        stateful: StatefulChange,
        proxy_port: Option<u16>,
    ) -> Result<(), BackendError> {
        let vm_image = self.require_vm_image()?;
        let cmd = self
            .update_command(&vm_image, vec![format!("--payload={payload_path}")])
            .arg(stateful.as_flag());
        let cmd = with_proxy_port(cmd, proxy_port);
        run_update_step(&self.runner, &cmd, self.verbose).await
    }

    async fn verify_image(&mut self, required_percent: u8) -> Result<u8, BackendError> {
        let vm_image = self.require_vm_image()?;
        let cmd = CommandSpec::new(self.bin_dir.join(VERIFY_TOOL))
            .arg(format!("--image_path={vm_image}"))
            .arg("--snapshot")
            .arg("--persist")
            .arg(self.pid_flag())
            .arg(self.suite.suite_name())
            .arg_if(self.no_graphics, "--no_graphics");
        run_verify_step(&self.runner, &cmd, required_percent).await
    }

    async fn teardown(&mut self) -> Result<(), BackendError> {
        self.guard.release(&self.runner).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::mock::{Reply, ScriptedRunner};

    struct Fixture {
        _dir: tempfile::TempDir,
        base: String,
        target: String,
        vm_image: PathBuf,
        config: BackendConfig,
    }

    fn fixture(with_vm_image: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base").join("chromiumos_test_image.bin");
        let target = dir.path().join("target").join("chromiumos_test_image.bin");
        std::fs::create_dir_all(base.parent().unwrap()).unwrap();
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(&base, b"base").unwrap();
        std::fs::write(&target, b"target").unwrap();

        let vm_image = base.parent().unwrap().join("chromiumos_qemu_image.bin");
        if with_vm_image {
            std::fs::write(&vm_image, b"vm").unwrap();
        }

        let config = BackendConfig {
            base_image: base.display().to_string(),
            target_image: target.display().to_string(),
            board: "x86-generic".to_owned(),
            scripts_dir: "/scripts".to_owned(),
            bin_dir: "/bin-dir".to_owned(),
            pid_file: dir.path().join("harness_pid").display().to_string(),
            verbose: false,
            ..BackendConfig::default()
        };
        Fixture {
            base: base.display().to_string(),
            target: target.display().to_string(),
            vm_image,
            config,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn prepare_base_reuses_existing_vm_image() {
        let fx = fixture(true);
        let mut backend = VmBackend::with_runner(&fx.config, ScriptedRunner::new());

        backend.prepare_base(&fx.base).await.unwrap();

        assert!(backend.runner.calls().is_empty());
        assert_eq!(backend.vm_image_path(), Some(fx.vm_image.as_path()));
    }

    #[tokio::test]
    async fn prepare_base_fails_when_conversion_produces_nothing() {
        let fx = fixture(false);
        let mut backend = VmBackend::with_runner(&fx.config, ScriptedRunner::new());

        let err = backend.prepare_base(&fx.base).await.unwrap_err();

        assert!(matches!(err, BackendError::VmImageMissing { .. }));
        let (cmd, streamed) = &backend.runner.calls()[0];
        assert!(streamed);
        assert_eq!(cmd.name(), CONVERT_TOOL);
        assert!(cmd.has_arg("--vdisk_size=6072"));
        assert!(cmd.has_arg("--statefulfs_size=3074"));
        assert!(cmd.has_arg("--board=x86-generic"));
        assert!(cmd.has_arg("--test_image"));
    }

    #[tokio::test]
    async fn update_from_base_uses_vm_image_as_source() {
        let fx = fixture(true);
        let mut backend = VmBackend::with_runner(&fx.config, ScriptedRunner::new());
        backend.prepare_base(&fx.base).await.unwrap();

        backend
            .update_image(&fx.target, &fx.base, StatefulChange::Preserve, Some(8083))
            .await
            .unwrap();

        let (cmd, _) = &backend.runner.calls()[0];
        let vm = fx.vm_image.display().to_string();
        assert_eq!(cmd.program(), Path::new("/bin-dir/cros_run_vm_update"));
        assert_eq!(
            cmd.args(),
            [
                format!("--update_image_path={}", fx.target),
                format!("--vm_image_path={vm}"),
                "--snapshot".to_owned(),
                "--persist".to_owned(),
                format!("--kvm_pid={}", fx.config.pid_file),
                "--stateful_update_flag=old".to_owned(),
                format!("--src_image={vm}"),
                "--proxy_port=8083".to_owned(),
            ]
        );
    }

    #[tokio::test]
    async fn update_from_target_keeps_source_path() {
        let fx = fixture(true);
        let mut backend = VmBackend::with_runner(
            &BackendConfig {
                no_graphics: true,
                ..fx.config.clone()
            },
            ScriptedRunner::new(),
        );
        backend.prepare_base(&fx.base).await.unwrap();

        backend
            .update_image(&fx.base, &fx.target, StatefulChange::Wipe, None)
            .await
            .unwrap();

        let (cmd, _) = &backend.runner.calls()[0];
        assert!(cmd.has_arg(&format!("--src_image={}", fx.target)));
        assert!(cmd.has_arg("--no_graphics"));
        assert!(cmd.has_arg("--stateful_update_flag=clean"));
    }

    #[tokio::test]
    async fn update_before_prepare_is_rejected() {
        let fx = fixture(true);
        let mut backend = VmBackend::with_runner(&fx.config, ScriptedRunner::new());
        let err = backend
            .update_using_payload("/p.gz", StatefulChange::Preserve, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::NotPrepared(_)));
    }

    #[tokio::test]
    async fn verify_passes_suite_and_graphics_flag() {
        let fx = fixture(true);
        let runner = ScriptedRunner::new();
        runner.reply(VERIFY_TOOL, Reply::exit(0, "Total PASS: 5/5 (100%)"));
        let mut backend = VmBackend::with_runner(
            &BackendConfig {
                no_graphics: true,
                ..fx.config.clone()
            },
            runner,
        );
        backend.prepare_base(&fx.base).await.unwrap();

        assert_eq!(backend.verify_image(100).await.unwrap(), 100);
        let (cmd, _) = &backend.runner.calls()[0];
        assert_eq!(cmd.args().last().map(String::as_str), Some("--no_graphics"));
        assert!(cmd.has_arg("suite_Smoke"));
        assert!(cmd.has_arg("--snapshot"));
        assert!(cmd.has_arg("--persist"));
    }

    #[tokio::test]
    async fn stale_marker_is_cleared_before_prepare() {
        let fx = fixture(true);
        std::fs::write(&fx.config.pid_file, "0").unwrap();
        let mut backend = VmBackend::with_runner(&fx.config, ScriptedRunner::new());

        backend.prepare_base(&fx.base).await.unwrap();

        assert!(!Path::new(&fx.config.pid_file).exists());
        assert_eq!(backend.runner.calls()[0].0.name(), "cros_stop_vm");
    }

    #[tokio::test]
    async fn teardown_without_marker_is_noop() {
        let fx = fixture(true);
        let mut backend = VmBackend::with_runner(&fx.config, ScriptedRunner::new());
        backend.teardown().await.unwrap();
        assert!(backend.runner.calls().is_empty());
    }
}
