//! # fcz-app
//!
//! FCZ 시나리오 실행기 바이너리 진입점.
//! 설정 로드, 로깅 초기화, 캡처/엔진 와이어링.

mod lifecycle;
mod runner;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use fcz_core::config::AppConfig;
use fcz_core::config_manager::ConfigManager;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::runner::RunOptions;

/// FCZ 화면 자동화 실행기
///
/// 대상 창을 캡처하고 템플릿 매칭 결과에 따라 시나리오 스텝을 실행한다.
#[derive(Parser, Debug)]
#[command(name = "fcz")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 설정 파일 경로 (기본: 플랫폼 설정 디렉토리의 config.json)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// 템플릿 디렉토리 (설정값 대신 사용)
    #[arg(long, short = 't', global = true)]
    templates: Option<PathBuf>,

    /// 로그 레벨 (trace, debug, info, warn, error 또는 EnvFilter 지시문)
    #[arg(long, short = 'l', global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 시나리오 파일 실행
    Run {
        /// 시나리오 JSON 경로
        scenario: PathBuf,

        /// 대상 프로세스 이름 (시나리오의 targetProcess 대신 사용)
        #[arg(long, short = 'p')]
        process: Option<String>,

        /// 입력을 보내지 않고 로그만 남김
        #[arg(long)]
        dry_run: bool,
    },
    /// 시나리오 디렉토리의 시나리오 목록
    List,
}

fn load_config(args: &Args) -> Result<(AppConfig, PathBuf)> {
    let manager = match &args.config {
        Some(path) => ConfigManager::with_path(path.clone())?,
        None => ConfigManager::new()?,
    };
    let mut config = manager.get();
    if let Some(templates) = &args.templates {
        config.paths.templates_dir = templates.clone();
    }
    Ok((config, manager.config_path().to_path_buf()))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // 로깅보다 설정을 먼저 읽어야 설정 파일의 log_level을 쓸 수 있다.
    let loaded = load_config(&args);
    let log_filter = args
        .log_level
        .clone()
        .or_else(|| loaded.as_ref().ok().map(|(c, _)| c.log_level.clone()))
        .unwrap_or_else(|| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)),
        )
        .init();

    let (config, config_path) = match loaded {
        Ok(loaded) => loaded,
        Err(e) => {
            warn!("설정 로드 실패, 기본 설정 사용: {e:#}");
            (AppConfig::default_config(), PathBuf::new())
        }
    };
    info!("설정 파일: {}", config_path.display());

    if let Err(e) = config.ensure_directories() {
        warn!("데이터 디렉토리 준비 실패: {e}");
    }

    match args.command {
        Command::Run {
            scenario,
            process,
            dry_run,
        } => {
            let result = runner::run(
                &config,
                RunOptions {
                    scenario_path: &scenario,
                    process: process.as_deref(),
                    dry_run,
                },
            )
            .await?;
            Ok(if result.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::List => {
            for scenario in runner::list(&config) {
                println!(
                    "{:<24} {:<32} {} steps",
                    scenario.id,
                    scenario.name,
                    scenario.total_step_count()
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
