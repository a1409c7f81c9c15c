//! 릴레이 설정
//!
//! [`RelaySettings`]는 core의 [`RelayConfig`](autest_core::config::RelayConfig)와
//! 시나리오별 바인드 포트로부터 만들어집니다.

/// 릴레이 실행 설정
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    /// 바인드 주소 (예: "127.0.0.1:8082")
    pub bind_addr: String,
    /// 업스트림 주소 (예: "127.0.0.1:8080")
    pub upstream_addr: String,
    /// 방향별 읽기 버퍼 크기 (바이트)
    pub buffer_size: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_owned(),
            upstream_addr: "127.0.0.1:8080".to_owned(),
            buffer_size: 64 * 1024, // 64KB
        }
    }
}

impl RelaySettings {
    /// core 설정과 바인드 포트로 릴레이 설정을 생성합니다.
    ///
    /// 업데이트 클라이언트는 같은 호스트에서 접속하므로 루프백에 바인드합니다.
    pub fn from_core(core: &autest_core::config::RelayConfig, bind_port: u16) -> Self {
        Self {
            bind_addr: format!("127.0.0.1:{bind_port}"),
            upstream_addr: format!("{}:{}", core.upstream_host, core.upstream_port),
            buffer_size: core.buffer_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autest_core::config::RelayConfig;

    #[test]
    fn from_core_builds_addresses() {
        let settings = RelaySettings::from_core(&RelayConfig::default(), 8082);
        assert_eq!(settings.bind_addr, "127.0.0.1:8082");
        assert_eq!(settings.upstream_addr, "127.0.0.1:8080");
        assert_eq!(settings.buffer_size, 64 * 1024);
    }
}
