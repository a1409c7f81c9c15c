//! 릴레이 에러 타입
//!
//! [`RelayError`]는 릴레이 내부에서 발생하는 모든 에러를 표현합니다.
//! `From<RelayError> for AutestError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 전파할 수 있습니다.
//!
//! 필터가 연결을 끊거나 지연시키는 것은 에러가 아닙니다.

use autest_core::error::{AutestError, RelayFailure};

/// 릴레이 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// 리스너 바인드 실패
    #[error("failed to bind relay to {addr}: {reason}")]
    Bind {
        /// 바인드 주소
        addr: String,
        /// 실패 사유
        reason: String,
    },

    /// 연결 수락 실패
    #[error("accept error: {0}")]
    Accept(String),

    /// 업스트림 연결 실패
    #[error("failed to connect upstream {addr}: {reason}")]
    Upstream {
        /// 업스트림 주소
        addr: String,
        /// 실패 사유
        reason: String,
    },

    /// 중계 중 I/O 에러
    #[error("relay io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RelayError> for AutestError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Bind { addr, reason } => {
                AutestError::Relay(RelayFailure::Bind { addr, reason })
            }
            RelayError::Accept(reason) => AutestError::Relay(RelayFailure::Accept(reason)),
            RelayError::Upstream { .. } => {
                AutestError::Relay(RelayFailure::Accept(err.to_string()))
            }
            RelayError::Io(e) => AutestError::Io(e),
        }
    }
}
