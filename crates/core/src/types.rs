//! 도메인 타입: 시스템 전역에서 사용되는 공통 타입

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 업데이트 시 stateful 파티션 처리 방식
///
/// 업데이트 호출마다 고정됩니다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatefulChange {
    /// stateful 파티션을 유지한 채 업데이트 (기본값)
    #[default]
    Preserve,
    /// clobber-state로 stateful 파티션을 초기화
    Wipe,
}

impl StatefulChange {
    /// 업데이트 도구에 전달하는 플래그 값
    pub fn flag_value(self) -> &'static str {
        match self {
            Self::Preserve => "old",
            Self::Wipe => "clean",
        }
    }

    /// `--stateful_update_flag=<값>` 형식의 인자
    pub fn as_flag(self) -> String {
        format!("--stateful_update_flag={}", self.flag_value())
    }
}

impl fmt::Display for StatefulChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preserve => write!(f, "preserve"),
            Self::Wipe => write!(f, "wipe"),
        }
    }
}

impl FromStr for StatefulChange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "preserve" => Ok(Self::Preserve),
            "wipe" => Ok(Self::Wipe),
            other => Err(format!(
                "unknown stateful change '{other}', expected 'preserve' or 'wipe'"
            )),
        }
    }
}

/// 실행 백엔드 종류
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// 에뮬레이트된 가상 머신 (기본값)
    #[default]
    Vm,
    /// 원격 실제 장치
    Real,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vm => write!(f, "vm"),
            Self::Real => write!(f, "real"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vm" => Ok(Self::Vm),
            "real" => Ok(Self::Real),
            other => Err(format!("unknown backend type '{other}', expected 'vm' or 'real'")),
        }
    }
}

/// 검증 스위트 선택
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuiteMode {
    /// 루트 파일시스템 크기만 확인하는 빠른 검증
    Quick,
    /// 스모크 스위트 전체 (기본값)
    #[default]
    Full,
}

impl SuiteMode {
    /// 실행할 검증 스위트 이름
    pub fn suite_name(self) -> &'static str {
        match self {
            Self::Quick => "build_RootFilesystemSize",
            Self::Full => "suite_Smoke",
        }
    }
}

impl FromStr for SuiteMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "quick" => Ok(Self::Quick),
            "full" => Ok(Self::Full),
            other => Err(format!("unknown suite '{other}', expected 'quick' or 'full'")),
        }
    }
}

/// 검증 스위트 실행 결과
///
/// `percent_passed`는 항상 0..=100 범위로 보정됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// 통과율 (%)
    pub percent_passed: u8,
    /// 검증 스위트의 원본 출력
    pub output: String,
}

impl VerificationResult {
    /// 통과율을 0..=100으로 보정해서 생성합니다.
    pub fn new(percent_passed: i64, output: impl Into<String>) -> Self {
        Self {
            percent_passed: percent_passed.clamp(0, 100) as u8,
            output: output.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stateful_change_flags() {
        assert_eq!(
            StatefulChange::Preserve.as_flag(),
            "--stateful_update_flag=old"
        );
        assert_eq!(StatefulChange::Wipe.as_flag(), "--stateful_update_flag=clean");
        assert_eq!(StatefulChange::default(), StatefulChange::Preserve);
    }

    #[test]
    fn backend_kind_from_str() {
        assert_eq!("vm".parse::<BackendKind>().unwrap(), BackendKind::Vm);
        assert_eq!("REAL".parse::<BackendKind>().unwrap(), BackendKind::Real);
        assert!("cloud".parse::<BackendKind>().is_err());
    }

    #[test]
    fn env_style_values_parse() {
        assert_eq!("wipe".parse::<StatefulChange>().unwrap(), StatefulChange::Wipe);
        assert_eq!("Quick".parse::<SuiteMode>().unwrap(), SuiteMode::Quick);
        assert!("clean".parse::<StatefulChange>().is_err());
        assert!("smoke".parse::<SuiteMode>().is_err());
    }

    #[test]
    fn suite_mode_names() {
        assert_eq!(SuiteMode::Quick.suite_name(), "build_RootFilesystemSize");
        assert_eq!(SuiteMode::Full.suite_name(), "suite_Smoke");
    }

    #[test]
    fn verification_result_is_clamped() {
        assert_eq!(VerificationResult::new(140, "").percent_passed, 100);
        assert_eq!(VerificationResult::new(-5, "").percent_passed, 0);
        assert_eq!(VerificationResult::new(84, "x").percent_passed, 84);
    }
}
