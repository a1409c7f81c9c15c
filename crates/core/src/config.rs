//! 설정 관리: autest.toml 파싱 및 런타임 설정
//!
//! [`AutestConfig`]는 하네스 전체 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`AUTEST_BACKEND_REMOTE=10.0.0.2` 형식)
//! 3. 설정 파일 (`autest.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), autest_core::error::AutestError> {
//! use autest_core::config::AutestConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = AutestConfig::load("autest.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = AutestConfig::parse("[backend]\nkind = \"real\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{AutestError, ConfigError};
use crate::types::{BackendKind, StatefulChange, SuiteMode};

/// autest 통합 설정
///
/// `autest.toml` 파일의 최상위 구조를 나타냅니다.
/// 실행 중에는 변경되지 않습니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutestConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 백엔드 설정
    #[serde(default)]
    pub backend: BackendConfig,
    /// 릴레이 설정
    #[serde(default)]
    pub relay: RelayConfig,
    /// 장애 주입 시나리오 설정
    #[serde(default)]
    pub faults: FaultsConfig,
    /// 실패 기대 시나리오용 페이로드
    #[serde(default)]
    pub payloads: PayloadsConfig,
}

impl AutestConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용한 뒤 검증합니다.
    ///
    /// 파싱에 실패해 무시된 환경변수는 `warn`으로 기록합니다. 검증 전에 다른
    /// 오버라이드(CLI 등)를 얹어야 하면 [`from_file`](Self::from_file)과
    /// [`apply_env_overrides`](Self::apply_env_overrides)를 직접 사용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, AutestError> {
        let mut config = Self::from_file(path).await?;
        for ignored in config.apply_env_overrides() {
            warn!(
                env_key = ignored.key.as_str(),
                value = ignored.value.as_str(),
                "failed to parse env var, ignoring"
            );
        }
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일을 읽어 파싱합니다 (환경변수 오버라이드와 검증 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, AutestError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AutestError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                AutestError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, AutestError> {
        toml::from_str(toml_str).map_err(|e| {
            AutestError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `AUTEST_{SECTION}_{FIELD}` (`[faults.delay]`는
    /// `AUTEST_FAULTS_DELAY_{FIELD}`). 값을 파싱할 수 없는 변수는 적용하지 않고
    /// 반환합니다. 로깅 초기화 전에 호출될 수 있으므로 여기서 기록하지 않습니다.
    pub fn apply_env_overrides(&mut self) -> Vec<IgnoredEnvVar> {
        let mut ignored = Vec::new();
        let ig = &mut ignored;

        // General
        override_string(&mut self.general.log_level, "AUTEST_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "AUTEST_GENERAL_LOG_FORMAT");

        // Backend
        let backend = &mut self.backend;
        override_parse(&mut backend.kind, "AUTEST_BACKEND_KIND", ig);
        override_string(&mut backend.base_image, "AUTEST_BACKEND_BASE_IMAGE");
        override_string(&mut backend.target_image, "AUTEST_BACKEND_TARGET_IMAGE");
        override_string(&mut backend.remote, "AUTEST_BACKEND_REMOTE");
        override_string(&mut backend.board, "AUTEST_BACKEND_BOARD");
        override_parse(&mut backend.delta, "AUTEST_BACKEND_DELTA", ig);
        override_parse(&mut backend.verbose, "AUTEST_BACKEND_VERBOSE", ig);
        override_parse(&mut backend.no_graphics, "AUTEST_BACKEND_NO_GRAPHICS", ig);
        override_parse(&mut backend.suite, "AUTEST_BACKEND_SUITE", ig);
        override_parse(
            &mut backend.stateful_change,
            "AUTEST_BACKEND_STATEFUL_CHANGE",
            ig,
        );
        override_string(&mut backend.scripts_dir, "AUTEST_BACKEND_SCRIPTS_DIR");
        override_string(&mut backend.bin_dir, "AUTEST_BACKEND_BIN_DIR");
        override_string(&mut backend.pid_file, "AUTEST_BACKEND_PID_FILE");
        override_string(&mut backend.vm_image_name, "AUTEST_BACKEND_VM_IMAGE_NAME");

        // Relay
        override_string(&mut self.relay.upstream_host, "AUTEST_RELAY_UPSTREAM_HOST");
        override_parse(&mut self.relay.upstream_port, "AUTEST_RELAY_UPSTREAM_PORT", ig);
        override_parse(&mut self.relay.buffer_size, "AUTEST_RELAY_BUFFER_SIZE", ig);

        // Faults
        let interrupt = &mut self.faults.interrupt;
        override_parse(&mut interrupt.port, "AUTEST_FAULTS_INTERRUPT_PORT", ig);
        override_parse(
            &mut interrupt.threshold_bytes,
            "AUTEST_FAULTS_INTERRUPT_THRESHOLD_BYTES",
            ig,
        );
        override_parse(
            &mut interrupt.max_closures,
            "AUTEST_FAULTS_INTERRUPT_MAX_CLOSURES",
            ig,
        );
        let delay = &mut self.faults.delay;
        override_parse(&mut delay.port, "AUTEST_FAULTS_DELAY_PORT", ig);
        override_parse(
            &mut delay.threshold_bytes,
            "AUTEST_FAULTS_DELAY_THRESHOLD_BYTES",
            ig,
        );
        override_parse(&mut delay.delay_secs, "AUTEST_FAULTS_DELAY_DELAY_SECS", ig);
        override_parse(&mut delay.max_delays, "AUTEST_FAULTS_DELAY_MAX_DELAYS", ig);

        // Payloads
        let payloads = &mut self.payloads;
        override_string(&mut payloads.truncated, "AUTEST_PAYLOADS_TRUNCATED");
        override_string(
            &mut payloads.truncated_expected,
            "AUTEST_PAYLOADS_TRUNCATED_EXPECTED",
        );
        override_string(&mut payloads.corrupted, "AUTEST_PAYLOADS_CORRUPTED");
        override_string(
            &mut payloads.corrupted_expected,
            "AUTEST_PAYLOADS_CORRUPTED_EXPECTED",
        );

        ignored
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), AutestError> {
        // log_level 검증
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        // log_format 검증
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.backend.scripts_dir.is_empty() {
            return Err(invalid("backend.scripts_dir", "must not be empty"));
        }
        if self.backend.bin_dir.is_empty() {
            return Err(invalid("backend.bin_dir", "must not be empty"));
        }
        if self.backend.kind == BackendKind::Vm {
            if self.backend.pid_file.is_empty() {
                return Err(invalid("backend.pid_file", "must not be empty for vm backend"));
            }
            if self.backend.vm_image_name.is_empty() {
                return Err(invalid(
                    "backend.vm_image_name",
                    "must not be empty for vm backend",
                ));
            }
        }

        if self.relay.upstream_port == 0 {
            return Err(invalid("relay.upstream_port", "must be greater than 0"));
        }
        if self.relay.buffer_size == 0 {
            return Err(invalid("relay.buffer_size", "must be greater than 0"));
        }

        // 0은 임시 포트 바인드를 의미하므로 충돌 검사에서 제외
        let (interrupt_port, delay_port) = (self.faults.interrupt.port, self.faults.delay.port);
        if interrupt_port != 0 && interrupt_port == delay_port {
            return Err(invalid(
                "faults.delay.port",
                format!("must differ from faults.interrupt.port ({interrupt_port})"),
            ));
        }
        if self.faults.delay.delay_secs == 0 {
            return Err(invalid("faults.delay.delay_secs", "must be greater than 0"));
        }

        Ok(())
    }

    /// 실행 직전 필수 값(이미지 경로, 원격 주소, 보드)을 검사합니다.
    ///
    /// 파일 로드 시점에는 이미지 경로가 CLI로 주어질 수 있으므로
    /// [`validate`](Self::validate)와 분리되어 있습니다.
    pub fn validate_for_run(&self) -> Result<(), AutestError> {
        check_image("backend.base_image", &self.backend.base_image)?;
        check_image("backend.target_image", &self.backend.target_image)?;

        match self.backend.kind {
            BackendKind::Real if self.backend.remote.is_empty() => Err(invalid(
                "backend.remote",
                "a remote address is required for real tests",
            )),
            BackendKind::Vm if self.backend.board.is_empty() => Err(invalid(
                "backend.board",
                "a board is required to convert the base image to a vm",
            )),
            _ => Ok(()),
        }
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> AutestError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.into(),
    }
    .into()
}

fn check_image(field: &str, path: &str) -> Result<(), AutestError> {
    if path.is_empty() {
        return Err(invalid(field, "path must be given"));
    }
    if !Path::new(path).exists() {
        return Err(invalid(field, format!("{path} does not exist")));
    }
    Ok(())
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "pretty".to_owned(),
        }
    }
}

/// 백엔드 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// 백엔드 종류 (vm, real)
    pub kind: BackendKind,
    /// 베이스 이미지 경로
    pub base_image: String,
    /// 타깃 이미지 경로
    pub target_image: String,
    /// 원격 장치 주소 (real 전용)
    pub remote: String,
    /// 보드 이름 (vm 전용)
    pub board: String,
    /// 델타 업데이트 사용 여부
    pub delta: bool,
    /// 출력을 캡처하지 않고 실시간으로 출력
    pub verbose: bool,
    /// VM 그래픽 비활성화
    pub no_graphics: bool,
    /// 검증 스위트 선택 (quick, full)
    pub suite: SuiteMode,
    /// 페이로드/장애 업데이트의 기본 stateful 처리 방식
    pub stateful_change: StatefulChange,
    /// 이미지 도구 스크립트 디렉토리
    pub scripts_dir: String,
    /// VM 제어 도구 디렉토리
    pub bin_dir: String,
    /// VM 프로세스 PID 마커 경로
    pub pid_file: String,
    /// 베이스 이미지 옆에 생성할 VM 디스크 파일 이름
    pub vm_image_name: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Vm,
            base_image: String::new(),
            target_image: String::new(),
            remote: String::new(),
            board: String::new(),
            delta: true,
            verbose: true,
            no_graphics: false,
            suite: SuiteMode::Full,
            stateful_change: StatefulChange::Preserve,
            scripts_dir: "..".to_owned(),
            bin_dir: ".".to_owned(),
            pid_file: "/tmp/harness_pid".to_owned(),
            vm_image_name: "chromiumos_qemu_image.bin".to_owned(),
        }
    }
}

/// 릴레이 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// 업스트림(업데이트 서버) 호스트
    pub upstream_host: String,
    /// 업스트림 포트
    pub upstream_port: u16,
    /// 방향별 읽기 버퍼 크기 (바이트)
    pub buffer_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            upstream_host: "127.0.0.1".to_owned(),
            upstream_port: 8080,
            buffer_size: 64 * 1024, // 64KB
        }
    }
}

/// 장애 주입 시나리오 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultsConfig {
    /// 연결 끊기 시나리오
    pub interrupt: InterruptFaultConfig,
    /// 지연 시나리오
    pub delay: DelayFaultConfig,
}

/// 연결 끊기 장애 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterruptFaultConfig {
    /// 릴레이 바인드 포트 (0이면 임시 포트)
    pub port: u16,
    /// 이 바이트 수를 초과하면 끊기 대상
    pub threshold_bytes: u64,
    /// 릴레이 수명 동안 끊을 최대 연결 수
    pub max_closures: u32,
}

impl Default for InterruptFaultConfig {
    fn default() -> Self {
        Self {
            port: 8082,
            threshold_bytes: 2 * 1024 * 1024, // 2MB
            max_closures: 3,
        }
    }
}

/// 지연 장애 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayFaultConfig {
    /// 릴레이 바인드 포트 (0이면 임시 포트)
    pub port: u16,
    /// 이 바이트 수를 초과하면 지연 대상
    pub threshold_bytes: u64,
    /// 지연 시간 (초)
    pub delay_secs: u64,
    /// 릴레이 수명 동안 최대 지연 횟수
    pub max_delays: u32,
}

impl Default for DelayFaultConfig {
    fn default() -> Self {
        Self {
            port: 8083,
            threshold_bytes: 2 * 1024 * 1024, // 2MB
            delay_secs: 20,
            max_delays: 3,
        }
    }
}

/// 실패 기대 시나리오용 페이로드 설정
///
/// 경로가 비어 있으면 해당 시나리오는 건너뜁니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PayloadsConfig {
    /// 잘린 페이로드 경로
    pub truncated: String,
    /// 잘린 페이로드 업데이트 시 기대하는 출력
    pub truncated_expected: String,
    /// 손상된 페이로드 경로
    pub corrupted: String,
    /// 손상된 페이로드 업데이트 시 기대하는 출력
    pub corrupted_expected: String,
}

impl Default for PayloadsConfig {
    fn default() -> Self {
        Self {
            truncated: String::new(),
            truncated_expected: "download_hash_data == update_check_response_hash failed"
                .to_owned(),
            corrupted: String::new(),
            corrupted_expected: "zlib inflate() error:-3".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

/// 값을 파싱할 수 없어 적용하지 않은 환경변수
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoredEnvVar {
    /// 환경변수 이름
    pub key: String,
    /// 설정되어 있던 값
    pub value: String,
}

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_parse<T: std::str::FromStr>(
    target: &mut T,
    env_key: &str,
    ignored: &mut Vec<IgnoredEnvVar>,
) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => ignored.push(IgnoredEnvVar {
                key: env_key.to_owned(),
                value: val,
            }),
        }
    }
}
