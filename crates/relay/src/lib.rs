//! autest 장애 주입 릴레이
//!
//! 로컬 포트에서 TCP 연결을 받아 고정된 업스트림(업데이트 서버)으로 중계하면서,
//! 클라이언트 → 업스트림 방향의 모든 청크를 주입된 [`Filter`]에 통과시킵니다.
//!
//! # 모듈 구성
//! - [`error`]: 릴레이 도메인 에러 (`RelayError`)
//! - [`config`]: 바인드/업스트림 주소 설정 (`RelaySettings`)
//! - [`filter`]: 필터 trait와 구현체 (통과, 연결 끊기, 지연)
//! - [`relay`]: 수락 루프와 양방향 복사 (`Relay`)
//!
//! # 아키텍처
//!
//! ```text
//! client ──▶ [Relay] ──Filter::on_outbound──▶ upstream
//! client ◀──────────── (필터 없음) ◀──────── upstream
//! ```

pub mod config;
pub mod error;
pub mod filter;
pub mod relay;

pub use config::RelaySettings;
pub use error::RelayError;
pub use filter::{DelayFilter, Filter, InterruptFilter, Outbound, PassThrough};
pub use relay::{Relay, RelayStats};
