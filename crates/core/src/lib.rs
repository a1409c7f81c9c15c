//! autest 공통 크레이트
//!
//! 업데이트 회복성 하네스의 모든 크레이트가 공유하는 설정, 에러, 도메인 타입,
//! 메트릭 이름을 정의합니다.
//!
//! - [`config`]: `autest.toml` 파싱 및 환경변수 오버라이드
//! - [`error`]: 도메인별 에러 정의
//! - [`types`]: 상태 보존 모드, 검증 결과 등 공통 타입
//! - [`metrics`]: 메트릭 이름 상수

pub mod config;
pub mod error;
pub mod metrics;
pub mod types;

// --- 주요 타입 re-export ---

// 에러
pub use error::{AutestError, BackendFailure, ConfigError, RelayFailure};

// 설정
pub use config::AutestConfig;

// 도메인 타입
pub use types::{BackendKind, StatefulChange, SuiteMode, VerificationResult};
