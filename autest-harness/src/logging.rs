//! Logging set-up for the `autest` binary.
//!
//! Logs always go to stderr; stdout carries only the run summary, so
//! `--output json` stays pipeable. `AUTEST_LOG` accepts a full `EnvFilter`
//! directive (e.g. `autest_relay=debug,info`) and wins over
//! `general.log_level`.

use anyhow::{Context, Result, bail};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use autest_core::config::GeneralConfig;

/// Environment variable holding filter directives.
pub const LOG_ENV: &str = "AUTEST_LOG";

/// Installs the global subscriber. Call once, before the first event.
///
/// `json` emits one object per line with the current span (run id, scenario
/// name) attached; `pretty` is a compact single-line format for terminals.
pub fn init_tracing(config: &GeneralConfig) -> Result<()> {
    let filter = level_filter(config)?;
    let fmt = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let installed = match config.log_format.as_str() {
        "json" => tracing_subscriber::registry()
            .with(filter)
            .with(fmt.json().with_current_span(true))
            .try_init(),
        "pretty" => tracing_subscriber::registry()
            .with(filter)
            .with(fmt.compact().with_target(false))
            .try_init(),
        other => bail!("unknown log format '{other}', expected 'json' or 'pretty'"),
    };
    installed.context("tracing subscriber was already installed")
}

fn level_filter(config: &GeneralConfig) -> Result<EnvFilter> {
    match std::env::var(LOG_ENV) {
        Ok(directives) => EnvFilter::try_new(&directives)
            .with_context(|| format!("invalid {LOG_ENV} value '{directives}'")),
        Err(_) => EnvFilter::try_new(&config.log_level)
            .with_context(|| format!("invalid log level '{}'", config.log_level)),
    }
}
