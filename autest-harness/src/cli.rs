//! CLI argument definitions for `autest`.
//!
//! Uses `clap` v4 derive macros. Every flag is optional and, when given,
//! overrides the configuration file and environment.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use autest_core::config::AutestConfig;
use autest_core::{BackendKind, SuiteMode};

/// Auto-update resilience harness.
///
/// Drives update/verify scenarios against a VM or a real device, optionally
/// routing the update through a fault-injecting relay.
#[derive(Parser, Debug)]
#[command(name = "autest")]
#[command(version, about, long_about = None)]
pub struct HarnessCli {
    /// Target type to test against (vm, real).
    #[arg(long = "type", value_name = "TYPE")]
    pub kind: Option<BackendKind>,

    /// Path to the base image.
    #[arg(short = 'b', long)]
    pub base_image: Option<String>,

    /// Path to the target image.
    #[arg(short = 't', long)]
    pub target_image: Option<String>,

    /// Remote address for real tests.
    #[arg(short = 'm', long)]
    pub remote: Option<String>,

    /// Board for the images (required for vm tests).
    #[arg(short = 'r', long)]
    pub board: Option<String>,

    /// Disable delta updates.
    #[arg(long)]
    pub no_delta: bool,

    /// Disable graphics for the vm test.
    #[arg(long)]
    pub no_graphics: bool,

    /// Use a basic test to verify images.
    #[arg(short = 'q', long)]
    pub quick_test: bool,

    /// Only run scenarios whose name starts with this prefix.
    #[arg(long)]
    pub test_filter: Option<String>,

    /// Stream tool output live instead of capturing it.
    #[arg(long)]
    pub verbose: bool,

    /// Capture tool output instead of streaming it. The partial and
    /// corrupted payload scenarios need this to inspect the failure output.
    #[arg(long, conflicts_with = "verbose")]
    pub no_verbose: bool,

    /// Path to autest.toml configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    #[arg(long)]
    pub log_format: Option<String>,

    /// Summary output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,

    /// Print scenario names and exit.
    #[arg(long)]
    pub list: bool,
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table.
    Text,
    /// Machine-readable JSON.
    Json,
}

impl HarnessCli {
    /// Applies every flag that was given on top of `config`.
    pub fn apply_overrides(&self, config: &mut AutestConfig) {
        if let Some(kind) = self.kind {
            config.backend.kind = kind;
        }
        if let Some(ref path) = self.base_image {
            config.backend.base_image = path.clone();
        }
        if let Some(ref path) = self.target_image {
            config.backend.target_image = path.clone();
        }
        if let Some(ref remote) = self.remote {
            config.backend.remote = remote.clone();
        }
        if let Some(ref board) = self.board {
            config.backend.board = board.clone();
        }
        if self.no_delta {
            config.backend.delta = false;
        }
        if self.no_graphics {
            config.backend.no_graphics = true;
        }
        if self.quick_test {
            config.backend.suite = SuiteMode::Quick;
        }
        if self.verbose {
            config.backend.verbose = true;
        }
        if self.no_verbose {
            config.backend.verbose = false;
        }
        if let Some(ref level) = self.log_level {
            config.general.log_level = level.clone();
        }
        if let Some(ref format) = self.log_format {
            config.general.log_format = format.clone();
        }
    }
}
