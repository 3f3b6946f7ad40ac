use crate::check::RetentionPolicy;
use crate::remote::RetryPolicy;
use crate::simulate::model::SimulationSettings;
use log::{info, warn};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("missing env {0}")]
    MissingEnv(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
    #[error("failed to read settings file {path}: {message}")]
    SettingsFile { path: PathBuf, message: String },
}

/// 运行时配置（全部来自环境变量，`.env` 由 main 预先加载）
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub email: Option<String>,
    pub password: Option<String>,
    pub template_dir: PathBuf,
    pub settings_file: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub parallelism: usize,
    pub batch_size: u64,
    pub session_ttl: Duration,
    pub rate_limit_backoff: Duration,
    pub poll_interval: Duration,
    pub check_base_wait: Duration,
    pub idle_wait: Duration,
    pub check_window: usize,
    pub sharpe_low: f64,
    pub fitness_low: f64,
    pub drop_invalid: bool,
    pub claim_lease: Duration,
    pub retry_jitter: f64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://alphas.db?mode=rwc".to_string(),
            email: None,
            password: None,
            template_dir: PathBuf::from("templates"),
            settings_file: PathBuf::from("config/default_settings.json"),
            log_dir: None,
            parallelism: 3,
            batch_size: 100,
            session_ttl: Duration::from_secs(3600),
            rate_limit_backoff: Duration::from_secs(30),
            poll_interval: Duration::from_secs(10),
            check_base_wait: Duration::from_secs(30),
            idle_wait: Duration::from_secs(60),
            check_window: 2,
            sharpe_low: 1.0,
            fitness_low: 0.5,
            drop_invalid: true,
            claim_lease: Duration::from_secs(7200),
            retry_jitter: 0.0,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 从任意 key -> value 查找函数构建配置，空字符串视为未设置
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let d = Self::default();

        Ok(Self {
            database_url: get("DATABASE_URL").unwrap_or(d.database_url),
            email: get("WQB_EMAIL"),
            password: get("WQB_PASSWORD"),
            template_dir: get("ALPHAMILL_TEMPLATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.template_dir),
            settings_file: get("ALPHAMILL_SETTINGS_FILE")
                .map(PathBuf::from)
                .unwrap_or(d.settings_file),
            log_dir: get("ALPHAMILL_LOG_DIR").map(PathBuf::from),
            parallelism: parse_or(get("ALPHAMILL_PARALLELISM"), "ALPHAMILL_PARALLELISM", d.parallelism)?
                .max(1),
            batch_size: parse_or(get("ALPHAMILL_BATCH_SIZE"), "ALPHAMILL_BATCH_SIZE", d.batch_size)?
                .max(1),
            session_ttl: secs_or(get("ALPHAMILL_SESSION_TTL_SECS"), "ALPHAMILL_SESSION_TTL_SECS", d.session_ttl)?,
            rate_limit_backoff: secs_or(
                get("ALPHAMILL_RATE_LIMIT_BACKOFF_SECS"),
                "ALPHAMILL_RATE_LIMIT_BACKOFF_SECS",
                d.rate_limit_backoff,
            )?,
            poll_interval: secs_or(get("ALPHAMILL_POLL_INTERVAL_SECS"), "ALPHAMILL_POLL_INTERVAL_SECS", d.poll_interval)?,
            check_base_wait: secs_or(
                get("ALPHAMILL_CHECK_BASE_WAIT_SECS"),
                "ALPHAMILL_CHECK_BASE_WAIT_SECS",
                d.check_base_wait,
            )?,
            idle_wait: secs_or(get("ALPHAMILL_IDLE_WAIT_SECS"), "ALPHAMILL_IDLE_WAIT_SECS", d.idle_wait)?,
            check_window: parse_or(get("ALPHAMILL_CHECK_WINDOW"), "ALPHAMILL_CHECK_WINDOW", d.check_window)?
                .max(1),
            sharpe_low: parse_or(get("ALPHAMILL_SHARPE_LOW"), "ALPHAMILL_SHARPE_LOW", d.sharpe_low)?,
            fitness_low: parse_or(get("ALPHAMILL_FITNESS_LOW"), "ALPHAMILL_FITNESS_LOW", d.fitness_low)?,
            drop_invalid: parse_or(get("ALPHAMILL_DROP_INVALID"), "ALPHAMILL_DROP_INVALID", d.drop_invalid)?,
            claim_lease: secs_or(get("ALPHAMILL_CLAIM_LEASE_SECS"), "ALPHAMILL_CLAIM_LEASE_SECS", d.claim_lease)?,
            retry_jitter: jitter_or(get("ALPHAMILL_RETRY_JITTER"), d.retry_jitter)?,
        })
    }

    pub fn credentials(&self) -> Result<(String, String), ConfigError> {
        let email = self.email.clone().ok_or(ConfigError::MissingEnv("WQB_EMAIL"))?;
        let password = self
            .password
            .clone()
            .ok_or(ConfigError::MissingEnv("WQB_PASSWORD"))?;
        Ok((email, password))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            rate_limit_backoff: self.rate_limit_backoff,
            jitter: self.retry_jitter,
            ..RetryPolicy::default()
        }
    }

    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy::new(self.sharpe_low, self.fitness_low)
    }

    /// 默认回测参数：文件存在则读取，否则使用内置默认值
    pub fn default_settings(&self) -> Result<SimulationSettings, ConfigError> {
        if !self.settings_file.exists() {
            warn!(
                "未找到默认设置文件 {}，使用内置默认值",
                self.settings_file.display()
            );
            return Ok(SimulationSettings::default());
        }
        let content = std::fs::read_to_string(&self.settings_file).map_err(|e| {
            ConfigError::SettingsFile {
                path: self.settings_file.clone(),
                message: e.to_string(),
            }
        })?;
        let overrides: SimulationSettings =
            serde_json::from_str(&content).map_err(|e| ConfigError::SettingsFile {
                path: self.settings_file.clone(),
                message: e.to_string(),
            })?;
        info!("已加载默认设置 {}", self.settings_file.display());
        Ok(SimulationSettings::default().merged_with(&overrides))
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &'static str, default: T) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(v) => v
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { key, value: v }),
    }
}

fn secs_or(raw: Option<String>, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match raw {
        None => Ok(default),
        Some(v) => v
            .parse::<f64>()
            .ok()
            .and_then(|s| Duration::try_from_secs_f64(s).ok())
            .ok_or(ConfigError::Invalid { key, value: v }),
    }
}

/// 抖动比例限制在 [0, 1]，NaN/无穷视为非法
fn jitter_or(raw: Option<String>, default: f64) -> Result<f64, ConfigError> {
    const KEY: &str = "ALPHAMILL_RETRY_JITTER";
    let value = parse_or::<f64>(raw.clone(), KEY, default)?;
    if !value.is_finite() {
        return Err(ConfigError::Invalid {
            key: KEY,
            value: raw.unwrap_or_default(),
        });
    }
    Ok(value.clamp(0.0, 1.0))
}
