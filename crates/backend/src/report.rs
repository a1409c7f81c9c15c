//! Verification output parsing.
//!
//! The verification suite ends with a summary line such as
//! `Total PASS: 42/50 (84%)`. The fourth whitespace-separated token carries the
//! pass percentage.

use autest_core::VerificationResult;
use tracing::warn;

use crate::error::BackendError;

const SUMMARY_PREFIX: &str = "Total PASS:";

/// Parses the pass percentage out of verification output.
///
/// Only the first line starting with `Total PASS:` is considered; indented
/// occurrences inside test logs are not summaries. A missing line yields 0,
/// and so does a malformed percentage token (logged at `warn`).
pub fn parse_report(output: &str) -> VerificationResult {
    let Some(line) = output
        .lines()
        .find(|line| line.starts_with(SUMMARY_PREFIX))
    else {
        return VerificationResult::new(0, output);
    };

    let percent = line
        .split_whitespace()
        .nth(3)
        .map(|token| token.trim_matches(|c| matches!(c, '(' | ')' | '%')))
        .and_then(|token| token.parse::<i64>().ok());

    match percent {
        Some(p) => VerificationResult::new(p, output),
        None => {
            warn!(line = %line.trim(), "could not parse pass percentage");
            VerificationResult::new(0, output)
        }
    }
}

/// Returns the pass percentage if it meets `required`.
///
/// # Errors
///
/// `BackendError::VerificationFailure` carrying the actual percentage.
pub fn assert_enough_passed(result: &VerificationResult, required: u8) -> Result<u8, BackendError> {
    if result.percent_passed < required {
        return Err(BackendError::VerificationFailure {
            actual: result.percent_passed,
            required,
        });
    }
    Ok(result.percent_passed)
}
