//! 메트릭 이름 상수
//!
//! 모든 메트릭의 이름을 중앙에서 정의합니다. 각 크레이트는 이 상수를 사용하여
//! `metrics::counter!()` 매크로를 호출합니다. 레코더가 설치되지 않으면
//! 기록은 no-op입니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `autest_`
//! - 모듈명: `relay_`, `scenario_`
//! - 접미어: `_total` (counter)

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 방향 레이블 키 (outbound, inbound)
pub const LABEL_DIRECTION: &str = "direction";

/// 결과 레이블 키 (passed, failed, skipped)
pub const LABEL_RESULT: &str = "result";

// ─── Relay 메트릭 ──────────────────────────────────────────────────

/// Relay: 수락된 연결 수 (counter)
pub const RELAY_CONNECTIONS_TOTAL: &str = "autest_relay_connections_total";

/// Relay: 필터가 강제 종료한 연결 수 (counter)
pub const RELAY_TERMINATED_TOTAL: &str = "autest_relay_terminated_total";

/// Relay: 전달된 바이트 수 (counter, label: direction)
pub const RELAY_BYTES_TOTAL: &str = "autest_relay_bytes_total";

// ─── Scenario 메트릭 ───────────────────────────────────────────────

/// Scenario: 실행된 시나리오 수 (counter, label: result)
pub const SCENARIO_RUNS_TOTAL: &str = "autest_scenario_runs_total";
