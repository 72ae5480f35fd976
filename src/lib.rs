//! Workitem Core 公共库
//!
//! 提供批量操作引擎共用的错误类型、配置加载、日志初始化和指标收集。

pub mod config;
pub mod error;
pub mod metrics;
pub mod tracing;

pub use config::{
    AppConfig, BackendConfig, HandleConfig, LoggingConfig, RateLimitConfig, RetryConfig,
    app_config, init_app_config, load_config,
};
pub use error::{Result, WorkItemError};
pub use metrics::BulkEngineMetrics;
