//! Scenario runner.
//!
//! [`ScenarioRunner`] composes a [`Backend`] (and, for fault scenarios, a
//! [`Relay`]) into the fixed scenarios of [`Scenario`]. Scenarios run one at a
//! time in order; every step is awaited before the next starts. A scenario is
//! wholly passed or wholly failed, and nothing is retried.

use std::io::Write;
use std::time::{Duration, Instant};

use metrics::counter;
use serde::Serialize;
use tracing::{Instrument, error, info, info_span, warn};

use autest_backend::{Backend, BackendError};
use autest_core::StatefulChange;
use autest_core::error::AutestError;
use autest_core::config::AutestConfig;
use autest_core::metrics as m;
use autest_relay::{DelayFilter, Filter, InterruptFilter, Relay, RelaySettings};

use crate::output::Render;
use crate::scenario::Scenario;

/// Pass percentage required of the base image before any update.
const BASELINE_PERCENT: u8 = 10;
/// Pass percentage required of a freshly updated image.
const FULL_PASS_PERCENT: u8 = 100;

/// Outcome of one scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ScenarioOutcome {
    Passed,
    Failed { reason: String },
    Skipped { reason: String },
}

impl ScenarioOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed { .. } => "failed",
            Self::Skipped { .. } => "skipped",
        }
    }
}

/// Result of one scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: &'static str,
    #[serde(flatten)]
    pub outcome: ScenarioOutcome,
    pub duration_ms: u64,
}

/// Result of a whole harness run.
#[derive(Debug, Clone, Serialize)]
pub struct HarnessSummary {
    pub run_id: String,
    pub backend: String,
    pub scenarios: Vec<ScenarioReport>,
}

impl HarnessSummary {
    pub fn passed(&self) -> usize {
        self.count(|o| matches!(o, ScenarioOutcome::Passed))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ScenarioOutcome::Failed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ScenarioOutcome::Skipped { .. }))
    }

    /// Process exit code: 0 if nothing failed, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.failed() == 0 { 0 } else { 1 }
    }

    fn count(&self, pred: impl Fn(&ScenarioOutcome) -> bool) -> usize {
        self.scenarios.iter().filter(|r| pred(&r.outcome)).count()
    }
}

impl Render for HarnessSummary {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(
            w,
            "Run {} ({} backend)",
            self.run_id.bold(),
            self.backend.bold()
        )?;
        writeln!(w)?;
        writeln!(w, "  {:<6} {:<22} {:>9}  DETAIL", "STATUS", "SCENARIO", "TIME")?;
        for report in &self.scenarios {
            let (status, detail) = match &report.outcome {
                ScenarioOutcome::Passed => ("PASS".green().bold(), String::new()),
                ScenarioOutcome::Failed { reason } => ("FAIL".red().bold(), reason.clone()),
                ScenarioOutcome::Skipped { reason } => ("SKIP".yellow().bold(), reason.clone()),
            };
            let secs = Duration::from_millis(report.duration_ms).as_secs_f64();
            writeln!(
                w,
                "  {:<6} {:<22} {:>8.1}s  {}",
                status, report.name, secs, detail
            )?;
        }
        writeln!(w)?;

        let totals = format!(
            "{} passed, {} failed, {} skipped",
            self.passed(),
            self.failed(),
            self.skipped()
        );
        if self.failed() == 0 {
            writeln!(w, "{}", totals.green())?;
        } else {
            writeln!(w, "{}", totals.red())?;
        }
        Ok(())
    }
}

/// Runs scenarios against one backend.
pub struct ScenarioRunner<B> {
    backend: B,
    config: AutestConfig,
}

impl<B: Backend> ScenarioRunner<B> {
    pub fn new(backend: B, config: AutestConfig) -> Self {
        Self { backend, config }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Runs `scenarios` in order, then tears the backend down.
    pub async fn run(&mut self, scenarios: &[Scenario]) -> HarnessSummary {
        let run_id = uuid::Uuid::new_v4().to_string();
        let backend = self.config.backend.kind.to_string();
        let span = info_span!("run", run_id = %run_id, backend = %backend);

        let reports = async {
            info!(count = scenarios.len(), "starting harness run");
            let mut reports = Vec::with_capacity(scenarios.len());
            for scenario in scenarios {
                reports.push(self.run_scenario(*scenario).await);
            }
            if let Err(e) = self.backend.teardown().await {
                warn!(error = %e, "backend teardown failed");
            }
            reports
        }
        .instrument(span)
        .await;

        HarnessSummary {
            run_id,
            backend,
            scenarios: reports,
        }
    }

    /// Runs one scenario and records its outcome.
    pub async fn run_scenario(&mut self, scenario: Scenario) -> ScenarioReport {
        let span = info_span!("scenario", name = scenario.name());
        let started = Instant::now();

        let outcome = async {
            info!("scenario started");
            let outcome = self.execute(scenario).await;
            match &outcome {
                ScenarioOutcome::Passed => info!("scenario passed"),
                ScenarioOutcome::Failed { reason } => error!(%reason, "scenario failed"),
                ScenarioOutcome::Skipped { reason } => info!(%reason, "scenario skipped"),
            }
            outcome
        }
        .instrument(span)
        .await;

        counter!(m::SCENARIO_RUNS_TOTAL, m::LABEL_RESULT => outcome.label()).increment(1);

        ScenarioReport {
            name: scenario.name(),
            outcome,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }

    async fn execute(&mut self, scenario: Scenario) -> ScenarioOutcome {
        let result = match scenario {
            Scenario::UpdateKeepStateful => self.update_round_trip(StatefulChange::Preserve).await,
            Scenario::UpdateWipeStateful => self.update_round_trip(StatefulChange::Wipe).await,
            Scenario::InterruptedUpdate => {
                let fault = &self.config.faults.interrupt;
                let filter = InterruptFilter::new(fault.threshold_bytes, fault.max_closures);
                let port = fault.port;
                self.update_through_relay(port, filter).await
            }
            Scenario::DelayedUpdate => {
                let fault = &self.config.faults.delay;
                let filter = DelayFilter::new(
                    fault.threshold_bytes,
                    Duration::from_secs(fault.delay_secs),
                    fault.max_delays,
                );
                let port = fault.port;
                self.update_through_relay(port, filter).await
            }
            Scenario::PartialUpdate => {
                let payload = self.config.payloads.truncated.clone();
                let expected = self.config.payloads.truncated_expected.clone();
                return self.expect_payload_failure(&payload, &expected).await;
            }
            Scenario::CorruptedUpdate => {
                let payload = self.config.payloads.corrupted.clone();
                let expected = self.config.payloads.corrupted_expected.clone();
                return self.expect_payload_failure(&payload, &expected).await;
            }
            Scenario::SimpleUpdate => self.simple_update().await,
        };

        match result {
            Ok(()) => ScenarioOutcome::Passed,
            Err(e) => ScenarioOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }

    /// base -> target -> base with verification after each hop.
    ///
    /// The final verification must match the pass rate the base image had
    /// before any update.
    async fn update_round_trip(&mut self, stateful: StatefulChange) -> Result<(), AutestError> {
        let base = self.config.backend.base_image.clone();
        let target = self.config.backend.target_image.clone();

        self.backend.prepare_base(&base).await?;
        let percent_before = self.backend.verify_image(BASELINE_PERCENT).await?;
        info!(percent_before, "base image verified");

        self.perform_update(&target, &base, stateful, None).await?;
        self.backend.verify_image(FULL_PASS_PERCENT).await?;

        self.perform_update(&base, &target, stateful, None).await?;
        self.backend.verify_image(percent_before).await?;
        Ok(())
    }

    /// Updates base -> target through a relay running `filter`.
    ///
    /// The relay is stopped whether or not the update succeeded.
    async fn update_through_relay<F: Filter>(
        &mut self,
        port: u16,
        filter: F,
    ) -> Result<(), AutestError> {
        let base = self.config.backend.base_image.clone();
        let target = self.config.backend.target_image.clone();
        let stateful = self.config.backend.stateful_change;

        self.backend.prepare_base(&target).await?;

        let settings = RelaySettings::from_core(&self.config.relay, port);
        let relay = Relay::start(settings, filter).await?;
        let proxy_port = relay.local_addr().port();

        let result = self
            .perform_update(&target, &base, stateful, Some(proxy_port))
            .await;

        relay.stop().await;
        info!(
            upstream = relay.upstream_addr(),
            connections = relay.stats().connections(),
            terminated = relay.stats().terminated(),
            accept_errors = relay.stats().accept_errors(),
            "relay stopped"
        );

        result.map_err(AutestError::from)
    }

    /// Updates from a payload that must be rejected with `expected` in the
    /// update output.
    ///
    /// Streamed (verbose) updates keep no output to match against, so the
    /// scenario is skipped in that mode.
    async fn expect_payload_failure(&mut self, payload: &str, expected: &str) -> ScenarioOutcome {
        if payload.is_empty() {
            return ScenarioOutcome::Skipped {
                reason: "payload path not configured".to_owned(),
            };
        }
        if self.config.backend.verbose {
            return ScenarioOutcome::Skipped {
                reason: "needs captured output, run with --no-verbose".to_owned(),
            };
        }

        let target = self.config.backend.target_image.clone();
        let stateful = self.config.backend.stateful_change;

        if let Err(e) = self.backend.prepare_base(&target).await {
            return ScenarioOutcome::Failed {
                reason: e.to_string(),
            };
        }

        match self.perform_payload_update(payload, stateful).await {
            Err(BackendError::UpdateFailure { output, .. }) if output.contains(expected) => {
                info!(expected, "update failed as expected");
                ScenarioOutcome::Passed
            }
            Err(BackendError::UpdateFailure { code, .. }) => ScenarioOutcome::Failed {
                reason: format!(
                    "update failed with exit code {code} but output did not contain '{expected}'"
                ),
            },
            Err(e) => ScenarioOutcome::Failed {
                reason: e.to_string(),
            },
            Ok(()) => ScenarioOutcome::Failed {
                reason: "update succeeded but was expected to fail".to_owned(),
            },
        }
    }

    async fn simple_update(&mut self) -> Result<(), AutestError> {
        let base = self.config.backend.base_image.clone();
        let target = self.config.backend.target_image.clone();

        self.backend.prepare_base(&base).await?;
        self.perform_update(&target, &base, StatefulChange::Preserve, None)
            .await?;
        self.backend.verify_image(FULL_PASS_PERCENT).await?;
        Ok(())
    }

    /// Runs an image update, honouring the delta setting.
    ///
    /// With delta updates disabled the source is dropped so a full update
    /// runs. Update failure output is logged before it propagates.
    async fn perform_update(
        &mut self,
        image: &str,
        src_image: &str,
        stateful: StatefulChange,
        proxy_port: Option<u16>,
    ) -> Result<(), BackendError> {
        let src_image = if self.config.backend.delta { src_image } else { "" };
        info!(image, src_image, %stateful, ?proxy_port, "updating image");

        let result = self
            .backend
            .update_image(image, src_image, stateful, proxy_port)
            .await;
        log_update_failure(&result);
        result
    }

    async fn perform_payload_update(
        &mut self,
        payload: &str,
        stateful: StatefulChange,
    ) -> Result<(), BackendError> {
        info!(payload, %stateful, "updating from payload");
        let result = self
            .backend
            .update_using_payload(payload, stateful, None)
            .await;
        log_update_failure(&result);
        result
    }
}

fn log_update_failure(result: &Result<(), BackendError>) {
    if let Err(BackendError::UpdateFailure { code, output }) = result {
        warn!(exit_code = code, %output, "update failed");
    }
}
