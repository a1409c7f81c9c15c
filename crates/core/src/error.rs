//! 에러 타입: 도메인별 에러 정의

/// autest 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum AutestError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 백엔드(업데이트/검증) 에러
    #[error("backend error: {0}")]
    Backend(#[from] BackendFailure),

    /// 릴레이 에러
    #[error("relay error: {0}")]
    Relay(#[from] RelayFailure),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 백엔드 실행 실패
#[derive(Debug, thiserror::Error)]
pub enum BackendFailure {
    /// 업데이트 단계가 0이 아닌 코드로 종료됨
    #[error("update failed with exit code {code}")]
    Update { code: i32, output: String },

    /// 통과율이 요구치에 미달
    #[error("verification failed: {actual}% passed, {required}% required")]
    Verification { actual: u8, required: u8 },

    /// 외부 단계 실행 자체가 실패
    #[error("execution failed: {0}")]
    Execution(String),

    /// 가상 머신 수명 주기 에러
    #[error("vm error: {0}")]
    Vm(String),
}

/// 릴레이 에러
#[derive(Debug, thiserror::Error)]
pub enum RelayFailure {
    /// 리스너 바인드 실패
    #[error("bind to {addr} failed: {reason}")]
    Bind { addr: String, reason: String },

    /// 연결 수락 실패
    #[error("accept failed: {0}")]
    Accept(String),
}
