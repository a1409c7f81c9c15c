//! Harness error types and exit code mapping

use autest_core::error::AutestError;

/// Harness error type.
///
/// Scenario step failures are reported in the summary, not raised; these are
/// start-up and output failures. `exit_code()` maps each to a process exit code.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Wrapped domain error from autest-core (configuration, backend, relay).
    #[error("{0}")]
    Core(#[from] AutestError),

    /// Logging could not be initialized.
    #[error("logging error: {0}")]
    Logging(String),

    /// JSON serialisation failed during output rendering.
    #[error("json output error: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    /// IO error (stdout write, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning                        |
    /// |------|--------------------------------|
    /// | 0    | All scenarios passed           |
    /// | 1    | A scenario or step failed      |
    /// | 2    | Configuration error            |
    /// | 10   | IO error                       |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Core(AutestError::Config(_)) | Self::Logging(_) => 2,
            Self::Io(_) | Self::Core(AutestError::Io(_)) => 10,
            Self::Core(AutestError::Backend(_) | AutestError::Relay(_))
            | Self::JsonSerialize(_) => 1,
        }
    }
}
