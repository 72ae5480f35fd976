//! Workitem Core 配置模块
//!
//! 该模块提供应用程序配置管理功能，包括：
//! - TOML 配置文件加载和解析
//! - 环境变量覆盖
//! - 句柄 / 限流 / 重试 / 后端 / 日志各节的类型化配置

use std::env;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

/// 全局应用配置实例，使用 OnceLock 确保只初始化一次
static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// 查询句柄配置
#[derive(Debug, Clone, Deserialize)]
pub struct HandleConfig {
    /// 句柄默认存活时间（秒）
    #[serde(default = "default_handle_ttl_seconds")]
    pub ttl_seconds: u64,
    /// 过期句柄后台清理间隔（秒）
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

fn default_handle_ttl_seconds() -> u64 {
    3600
}

fn default_sweep_interval_seconds() -> u64 {
    60
}

impl Default for HandleConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_handle_ttl_seconds(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
        }
    }
}

/// 限流配置（令牌桶）
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// 桶容量（最大突发量）
    #[serde(default = "default_rate_limit_capacity")]
    pub capacity: f64,
    /// 令牌填充速率（每秒）
    #[serde(default = "default_rate_limit_refill")]
    pub refill_rate_per_second: f64,
}

fn default_rate_limit_capacity() -> f64 {
    10.0
}

fn default_rate_limit_refill() -> f64 {
    5.0
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: default_rate_limit_capacity(),
            refill_rate_per_second: default_rate_limit_refill(),
        }
    }
}

/// 重试配置（指数退避）
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// 最大尝试次数（含首次）
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    /// 初始延迟（毫秒）
    #[serde(default = "default_retry_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// 最大延迟（毫秒）
    #[serde(default = "default_retry_max_delay_ms")]
    pub max_delay_ms: u64,
    /// 退避倍数
    #[serde(default = "default_retry_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_initial_delay_ms() -> u64 {
    200
}

fn default_retry_max_delay_ms() -> u64 {
    10_000
}

fn default_retry_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            initial_delay_ms: default_retry_initial_delay_ms(),
            max_delay_ms: default_retry_max_delay_ms(),
            backoff_multiplier: default_retry_backoff_multiplier(),
        }
    }
}

/// 后端客户端配置
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// 后端 API 基础 URL
    #[serde(default)]
    pub base_url: String,
    /// 单次请求超时（秒）
    #[serde(default = "default_backend_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

fn default_backend_timeout_seconds() -> u64 {
    30
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            request_timeout_seconds: default_backend_timeout_seconds(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别（trace / debug / info / warn / error）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 是否显示日志来源 target
    #[serde(default = "default_true")]
    pub with_target: bool,
    /// 是否显示线程 ID
    #[serde(default)]
    pub with_thread_ids: bool,
    /// 是否显示文件名
    #[serde(default)]
    pub with_file: bool,
    /// 是否显示行号
    #[serde(default)]
    pub with_line_number: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            with_target: default_true(),
            with_thread_ids: false,
            with_file: false,
            with_line_number: false,
        }
    }
}

/// 应用配置（聚合各节）
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub handle: HandleConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// 应用环境变量覆盖
    ///
    /// 支持的变量：
    /// - `WORKITEM_HANDLE_TTL_SECONDS`
    /// - `WORKITEM_SWEEP_INTERVAL_SECONDS`
    /// - `WORKITEM_RATE_LIMIT_CAPACITY` / `WORKITEM_RATE_LIMIT_REFILL`
    /// - `WORKITEM_RETRY_MAX_ATTEMPTS`
    /// - `WORKITEM_BACKEND_BASE_URL` / `WORKITEM_BACKEND_TIMEOUT_SECONDS`
    /// - `WORKITEM_LOG_LEVEL`
    fn apply_env_overrides(mut self) -> Self {
        if let Some(v) = parse_env("WORKITEM_HANDLE_TTL_SECONDS") {
            self.handle.ttl_seconds = v;
        }
        if let Some(v) = parse_env("WORKITEM_SWEEP_INTERVAL_SECONDS") {
            self.handle.sweep_interval_seconds = v;
        }
        if let Some(v) = parse_env("WORKITEM_RATE_LIMIT_CAPACITY") {
            self.rate_limit.capacity = v;
        }
        if let Some(v) = parse_env("WORKITEM_RATE_LIMIT_REFILL") {
            self.rate_limit.refill_rate_per_second = v;
        }
        if let Some(v) = parse_env("WORKITEM_RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = v;
        }
        if let Ok(v) = env::var("WORKITEM_BACKEND_BASE_URL") {
            self.backend.base_url = v;
        }
        if let Some(v) = parse_env("WORKITEM_BACKEND_TIMEOUT_SECONDS") {
            self.backend.request_timeout_seconds = v;
        }
        if let Ok(v) = env::var("WORKITEM_LOG_LEVEL") {
            self.logging.level = v;
        }
        self
    }
}

/// 解析环境变量为指定类型，解析失败时告警并忽略
fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    match env::var(key) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(key = %key, value = %raw, "Ignoring unparsable env override");
                None
            }
        },
        Err(_) => None,
    }
}

/// 从 TOML 文件加载配置（附带环境变量覆盖）
pub fn load_config(path: impl AsRef<Path>) -> Result<AppConfig> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config: AppConfig = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    Ok(config.apply_env_overrides())
}

/// 初始化全局配置
///
/// 如果 `path` 为 None 则使用默认配置（仍应用环境变量覆盖）。
/// 重复调用返回首次初始化的实例。
pub fn init_app_config(path: Option<&Path>) -> Result<&'static AppConfig> {
    if let Some(existing) = APP_CONFIG.get() {
        return Ok(existing);
    }
    let config = match path {
        Some(p) => load_config(p)?,
        None => AppConfig::default().apply_env_overrides(),
    };
    Ok(APP_CONFIG.get_or_init(|| config))
}

/// 获取全局配置（未初始化时返回默认配置实例）
pub fn app_config() -> &'static AppConfig {
    APP_CONFIG.get_or_init(AppConfig::default)
}
