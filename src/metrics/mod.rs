//! # Prometheus 指标收集模块
//!
//! 为批量操作引擎提供统一的 Prometheus 指标收集能力。

use once_cell::sync::Lazy;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};

/// 全局指标注册表
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// 批量操作引擎指标
pub struct BulkEngineMetrics {
    /// 按操作类型 / 结果统计的条目处理总数
    pub bulk_items_total: IntCounterVec,
    /// 单次批量操作耗时（秒）
    pub bulk_operation_duration_seconds: Histogram,
    /// 重试次数总计
    pub retry_attempts_total: IntCounter,
    /// 限流等待耗时（秒）
    pub rate_limit_wait_seconds: Histogram,
    /// 当前活跃句柄数
    pub handles_active: IntGauge,
    /// 已清理的过期句柄总数
    pub handles_swept_total: IntCounter,
}

impl BulkEngineMetrics {
    pub fn new() -> Self {
        let bulk_items_total = IntCounterVec::new(
            Opts::new(
                "bulk_items_total",
                "Total number of work items processed by bulk operations",
            ),
            &["operation", "outcome"],
        )
        .expect("Failed to create bulk_items_total metric");

        let bulk_operation_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "bulk_operation_duration_seconds",
                "Bulk operation duration in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0]),
        )
        .expect("Failed to create bulk_operation_duration_seconds metric");

        let retry_attempts_total = IntCounter::new(
            "retry_attempts_total",
            "Total number of retry attempts against the backend",
        )
        .expect("Failed to create retry_attempts_total metric");

        let rate_limit_wait_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "rate_limit_wait_seconds",
                "Time spent waiting on the rate limiter in seconds",
            )
            .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )
        .expect("Failed to create rate_limit_wait_seconds metric");

        let handles_active = IntGauge::new(
            "handles_active",
            "Number of live query handles",
        )
        .expect("Failed to create handles_active metric");

        let handles_swept_total = IntCounter::new(
            "handles_swept_total",
            "Total number of expired query handles removed by the sweeper",
        )
        .expect("Failed to create handles_swept_total metric");

        Self {
            bulk_items_total,
            bulk_operation_duration_seconds,
            retry_attempts_total,
            rate_limit_wait_seconds,
            handles_active,
            handles_swept_total,
        }
    }

    /// 注册所有指标到全局注册表
    pub fn register(&self) -> prometheus::Result<()> {
        REGISTRY.register(Box::new(self.bulk_items_total.clone()))?;
        REGISTRY.register(Box::new(self.bulk_operation_duration_seconds.clone()))?;
        REGISTRY.register(Box::new(self.retry_attempts_total.clone()))?;
        REGISTRY.register(Box::new(self.rate_limit_wait_seconds.clone()))?;
        REGISTRY.register(Box::new(self.handles_active.clone()))?;
        REGISTRY.register(Box::new(self.handles_swept_total.clone()))?;
        Ok(())
    }
}

impl Default for BulkEngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_record() {
        let metrics = BulkEngineMetrics::new();
        metrics
            .bulk_items_total
            .with_label_values(&["update", "success"])
            .inc();
        metrics
            .bulk_items_total
            .with_label_values(&["update", "failure"])
            .inc_by(2);
        metrics.handles_active.set(3);
        metrics.handles_swept_total.inc();

        assert_eq!(
            metrics
                .bulk_items_total
                .with_label_values(&["update", "failure"])
                .get(),
            2
        );
        assert_eq!(metrics.handles_active.get(), 3);
    }
}
