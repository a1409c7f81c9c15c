//! autest harness library.
//!
//! Exposes the harness internals for integration testing. In production
//! `autest` is used as a binary (main.rs).

pub mod app;
pub mod cli;
pub mod error;
pub mod logging;
pub mod output;
pub mod runner;
pub mod scenario;

pub use error::HarnessError;
pub use runner::{HarnessSummary, ScenarioOutcome, ScenarioReport, ScenarioRunner};
pub use scenario::Scenario;
