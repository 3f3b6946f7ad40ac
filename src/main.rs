mod check;
mod clock;
mod commands;
mod config;
mod generate;
mod remote;
mod session;
mod simulate;
mod storage;
#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use chrono::Local;
use log::{error, info, warn};
use std::process::ExitCode;

use crate::commands::{AppCommand, USAGE};
use crate::config::AppConfig;
use crate::storage::repository::QueueRepository;

fn init_logging(config: &AppConfig) -> Result<()> {
    let mut builder = env_logger::Builder::from_default_env();
    builder
        .filter_level(log::LevelFilter::Warn)
        .filter_module("alphamill", log::LevelFilter::Info)
        .filter_module("sqlx", log::LevelFilter::Error)
        .filter_module("sea_orm", log::LevelFilter::Error);

    if let Some(dir) = &config.log_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("无法创建日志目录 {}", dir.display()))?;
        let ts = Local::now().format("%Y%m%d-%H%M%S").to_string();
        let log_path = dir.join(format!("app-{}.log", ts));
        let log_file = std::fs::File::create(&log_path)
            .with_context(|| format!("无法创建日志文件 {}", log_path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    builder.init();
    Ok(())
}

async fn run(cmd: AppCommand, config: AppConfig) -> Result<()> {
    let db = storage::establish_connection(&config.database_url)
        .await
        .with_context(|| format!("无法连接数据库 {}", config.database_url))?;
    info!("✓ 数据库连接成功");

    // 上次异常退出时遗留的认领
    let recovered = QueueRepository::recover(&db).await.context("恢复队列认领失败")?;
    if recovered > 0 {
        warn!("⚠ 已释放 {} 条遗留的队列认领", recovered);
    }

    commands::dispatch(cmd, &config, db).await
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match dotenv::dotenv() {
        Ok(path) => eprintln!("✓ 已加载 {}", path.display()),
        Err(_) => eprintln!("⚠ 未找到 .env 文件，从系统环境变量读取"),
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cmd = match args.join(" ").parse::<AppCommand>() {
        Ok(cmd) => cmd,
        Err(msg) => {
            eprintln!("✗ {}\n\n{}", msg, USAGE);
            return ExitCode::from(2);
        }
    };

    let config = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("✗ 配置错误: {}", e);
            return ExitCode::from(2);
        }
    };
    if let Err(e) = init_logging(&config) {
        eprintln!("✗ {:#}", e);
        return ExitCode::FAILURE;
    }

    match run(cmd, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("✗ {:#}", e);
            eprintln!("✗ {:#}", e);
            ExitCode::FAILURE
        }
    }
}
