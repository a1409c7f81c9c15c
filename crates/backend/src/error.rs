//! Backend error types.
//!
//! [`BackendError`] covers every failure a backend can raise while staging,
//! updating, or verifying an image. `From<BackendError> for AutestError` lets
//! callers propagate it with `?`.

use autest_core::error::{AutestError, BackendFailure};

/// Backend domain error.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// An update step exited non-zero, or raised while streaming its output.
    ///
    /// `output` holds the captured stdout in captured mode, or the execution
    /// error message in verbose mode.
    #[error("update failed with exit code {code}")]
    UpdateFailure {
        /// Exit code of the update step (1 when the step raised).
        code: i32,
        /// Captured output.
        output: String,
    },

    /// The verification suite passed fewer cases than required.
    #[error("verification failed: {actual}% passed, {required}% required")]
    VerificationFailure {
        /// Parsed pass percentage.
        actual: u8,
        /// Required pass percentage.
        required: u8,
    },

    /// An external step could not be spawned.
    #[error("failed to execute '{program}': {reason}")]
    Exec {
        /// Program path.
        program: String,
        /// Underlying reason.
        reason: String,
    },

    /// A streamed step exited non-zero.
    #[error("'{program}' exited with code {code}")]
    NonZeroExit {
        /// Program path.
        program: String,
        /// Exit code.
        code: i32,
    },

    /// The VM PID marker could not be cleared.
    #[error("stale vm pid marker could not be cleared: {path}")]
    StaleMarker {
        /// Marker path.
        path: String,
    },

    /// The VM disk artifact was not produced.
    #[error("vm image missing after conversion: {path}")]
    VmImageMissing {
        /// Expected artifact path.
        path: String,
    },

    /// A step was requested before the backend was prepared.
    #[error("backend not prepared: {0}")]
    NotPrepared(String),
}

impl From<BackendError> for AutestError {
    fn from(err: BackendError) -> Self {
        let failure = match err {
            BackendError::UpdateFailure { code, output } => BackendFailure::Update { code, output },
            BackendError::VerificationFailure { actual, required } => {
                BackendFailure::Verification { actual, required }
            }
            BackendError::Exec { .. } | BackendError::NonZeroExit { .. } => {
                BackendFailure::Execution(err.to_string())
            }
            BackendError::StaleMarker { .. }
            | BackendError::VmImageMissing { .. }
            | BackendError::NotPrepared(_) => BackendFailure::Vm(err.to_string()),
        };
        AutestError::Backend(failure)
    }
}
