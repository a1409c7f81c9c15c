//! Harness start-up: configuration, backend selection, and the run itself.

use autest_backend::{Backend, RemoteBackend, VmBackend};
use autest_core::BackendKind;
use autest_core::config::{AutestConfig, IgnoredEnvVar};
use tracing::{info, warn};

use crate::cli::HarnessCli;
use crate::error::HarnessError;
use crate::logging::init_tracing;
use crate::output::OutputWriter;
use crate::runner::{HarnessSummary, ScenarioRunner};
use crate::scenario::{Scenario, ScenarioList, select};

/// Effective configuration plus the environment values that could not be
/// applied. Those are reported once logging is up.
#[derive(Debug)]
pub struct LoadedConfig {
    pub config: AutestConfig,
    pub ignored_env: Vec<IgnoredEnvVar>,
}

/// Builds the effective configuration.
///
/// Precedence: CLI flags > environment > file > defaults. Validation runs
/// once, after every layer is applied, so a flag can repair a file value.
pub async fn load_config(cli: &HarnessCli) -> Result<LoadedConfig, HarnessError> {
    let mut config = match &cli.config {
        Some(path) => AutestConfig::from_file(path).await?,
        None => AutestConfig::default(),
    };
    let ignored_env = config.apply_env_overrides();
    cli.apply_overrides(&mut config);
    config.validate()?;
    Ok(LoadedConfig {
        config,
        ignored_env,
    })
}

/// Runs the harness and returns the process exit code.
pub async fn execute(cli: HarnessCli) -> Result<i32, HarnessError> {
    let writer = OutputWriter::new(cli.output);
    if cli.list {
        writer.render(&ScenarioList::all())?;
        return Ok(0);
    }

    let LoadedConfig {
        config,
        ignored_env,
    } = load_config(&cli).await?;
    init_tracing(&config.general).map_err(|e| HarnessError::Logging(e.to_string()))?;
    for var in &ignored_env {
        warn!(env_key = %var.key, value = %var.value, "failed to parse env var, ignoring");
    }
    config.validate_for_run()?;

    let scenarios = select(cli.test_filter.as_deref());
    info!(
        backend = %config.backend.kind,
        scenarios = scenarios.len(),
        "autest starting"
    );

    let summary = match config.backend.kind {
        BackendKind::Real => {
            let backend = RemoteBackend::from_config(&config.backend);
            run_with(backend, config, &scenarios).await
        }
        BackendKind::Vm => {
            let backend = VmBackend::from_config(&config.backend);
            run_with(backend, config, &scenarios).await
        }
    };

    writer.render(&summary)?;
    Ok(summary.exit_code())
}

/// Runs `scenarios` against `backend`.
pub async fn run_with<B: Backend>(
    backend: B,
    config: AutestConfig,
    scenarios: &[Scenario],
) -> HarnessSummary {
    let mut runner = ScenarioRunner::new(backend, config);
    let summary = runner.run(scenarios).await;
    info!(
        passed = summary.passed(),
        failed = summary.failed(),
        skipped = summary.skipped(),
        "autest finished"
    );
    summary
}
