//! 애플리케이션 설정 구조체.
//!
//! 템플릿/시나리오/로그 경로, 캡처 주기, 엔진 폴링 정책 등 런타임 설정을 정의한다.
//! `ConfigManager`를 통해 JSON 파일에서 로드/저장한다.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::CoreError;

/// 최상위 애플리케이션 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 데이터 경로 설정
    #[serde(default)]
    pub paths: PathsConfig,
    /// 캡처 설정
    #[serde(default)]
    pub capture: CaptureConfig,
    /// 엔진 설정
    #[serde(default)]
    pub engine: EngineConfig,
    /// 로그 필터 (trace, debug, info, warn, error 또는 EnvFilter 지시문)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// 기본 설정
    pub fn default_config() -> Self {
        Self {
            paths: PathsConfig::default(),
            capture: CaptureConfig::default(),
            engine: EngineConfig::default(),
            log_level: default_log_level(),
        }
    }

    /// 템플릿/시나리오/로그 디렉토리 생성
    pub fn ensure_directories(&self) -> Result<(), CoreError> {
        for dir in [
            &self.paths.templates_dir,
            &self.paths.scenarios_dir,
            &self.paths.logs_dir,
        ] {
            std::fs::create_dir_all(dir).map_err(|e| {
                CoreError::Config(format!("디렉토리 생성 실패: {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

// ============================================================
// 경로 설정
// ============================================================

/// 데이터 디렉토리 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// 템플릿 이미지 디렉토리
    pub templates_dir: PathBuf,
    /// 시나리오 JSON 디렉토리
    pub scenarios_dir: PathBuf,
    /// 로그 디렉토리
    pub logs_dir: PathBuf,
}

impl PathsConfig {
    /// 데이터 루트 아래 표준 레이아웃
    pub fn under(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            templates_dir: root.join("Templates"),
            scenarios_dir: root.join("Scenarios"),
            logs_dir: root.join("logs"),
        }
    }

    /// 플랫폼별 데이터 루트
    ///
    /// - macOS: `~/Library/Application Support/com.fcz.autodebugger/`
    /// - Windows: `%APPDATA%\fcz\autodebugger\data\`
    /// - Linux: `~/.local/share/autodebugger/`
    pub fn data_root() -> PathBuf {
        ProjectDirs::from("com", "fcz", "autodebugger")
            .map(|p| p.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("./fcz"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self::under(Self::data_root())
    }
}

// ============================================================
// 캡처 설정
// ============================================================

/// 캡처 루프 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// 틱 간격 (밀리초, 33 ≈ 30Hz)
    pub interval_ms: u64,
    /// 중지 시 워커 종료 대기 한도 (밀리초)
    pub stop_timeout_ms: u64,
}

impl CaptureConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interval_ms: 33,
            stop_timeout_ms: 1_000,
        }
    }
}

// ============================================================
// 엔진 설정
// ============================================================

/// 스텝 인터프리터 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 이미지 대기 폴링 간격 (밀리초)
    pub poll_interval_ms: u64,
    /// 입력 영역 클릭 후 포커스 안정화 대기 (밀리초)
    pub focus_settle_ms: u64,
    /// 입력 필드 비우기 백스페이스 횟수
    pub clear_backspace_count: u32,
    /// 키 입력 간 지연 (밀리초)
    pub key_interval_ms: u64,
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn focus_settle(&self) -> Duration {
        Duration::from_millis(self.focus_settle_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            focus_settle_ms: 100,
            clear_backspace_count: 16,
            key_interval_ms: 10,
        }
    }
}
