//! # 限流器
//!
//! 基于令牌桶算法的按 key 限流，key 由调用方决定（通常为
//! organization:project 或全局 key）。与网关中间件式的"超限即拒绝"
//! 不同，批量执行场景下 `throttle` 在桶空时协作式等待补充，
//! 不自旋、不丢请求。
//!
//! 补充是惰性的：每次消费前按 `elapsed * refill_rate` 补充（上限为
//! capacity），空闲时不占用任何计时器。

use std::collections::HashMap;

use tokio::sync::Mutex;
use tokio::time::{Duration, Instant, sleep};
use tracing::debug;

use workitem_core::config::RateLimitConfig;

/// 令牌桶
#[derive(Debug)]
struct TokenBucket {
    /// 当前令牌数
    tokens: f64,
    /// 最大令牌数
    capacity: f64,
    /// 令牌填充速率（每秒）
    refill_rate: f64,
    /// 上次补充时间
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            tokens: capacity,
            capacity,
            refill_rate,
            last_update: Instant::now(),
        }
    }

    /// 惰性补充令牌
    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_update = now;
    }

    /// 尝试消费一个令牌；失败时返回距至少一个令牌可用的等待时长
    fn try_consume(&mut self) -> Option<Duration> {
        self.refill(Instant::now());
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            None
        } else {
            let deficit = 1.0 - self.tokens;
            Some(Duration::from_secs_f64(deficit / self.refill_rate))
        }
    }
}

/// 限流器统计信息
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimiterStats {
    pub tokens: f64,
    pub capacity: f64,
}

/// 按 key 的令牌桶限流器
///
/// 桶在 key 首次被使用时创建（满桶起步），不预先初始化。
/// 同一 key 上的"检查-扣减"在互斥锁内完成，并发调用不会超发；
/// 等待发生在锁外。
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, TokenBucket>>,
    capacity: f64,
    refill_rate: f64,
}

impl RateLimiter {
    /// 创建限流器
    ///
    /// capacity 与 refill_rate 必须为正值；非法配置回落到 1.0 并告警。
    pub fn new(config: &RateLimitConfig) -> Self {
        let mut capacity = config.capacity;
        let mut refill_rate = config.refill_rate_per_second;
        if capacity < 1.0 {
            tracing::warn!(capacity, "Rate limiter capacity below 1, clamping to 1");
            capacity = 1.0;
        }
        if refill_rate <= 0.0 {
            tracing::warn!(refill_rate, "Rate limiter refill rate not positive, clamping to 1");
            refill_rate = 1.0;
        }
        Self {
            buckets: Mutex::new(HashMap::new()),
            capacity,
            refill_rate,
        }
    }

    /// 消费一个令牌，桶空时等待补充
    pub async fn throttle(&self, key: &str) {
        loop {
            let wait = {
                let mut buckets = self.buckets.lock().await;
                let bucket = buckets
                    .entry(key.to_string())
                    .or_insert_with(|| TokenBucket::new(self.capacity, self.refill_rate));
                bucket.try_consume()
            };

            match wait {
                None => return,
                Some(duration) => {
                    debug!(
                        key = %key,
                        wait_ms = duration.as_millis() as u64,
                        "Rate limit reached, waiting for refill"
                    );
                    // 锁已释放，等待期间其他 key 不受影响
                    sleep(duration).await;
                }
            }
        }
    }

    /// 查询某个 key 的桶状态（从未使用过的 key 返回 None）
    pub async fn get_stats(&self, key: &str) -> Option<RateLimiterStats> {
        let mut buckets = self.buckets.lock().await;
        buckets.get_mut(key).map(|bucket| {
            bucket.refill(Instant::now());
            RateLimiterStats {
                tokens: bucket.tokens,
                capacity: bucket.capacity,
            }
        })
    }

    /// 重置一个或全部桶
    pub async fn reset(&self, key: Option<&str>) {
        let mut buckets = self.buckets.lock().await;
        match key {
            Some(key) => {
                buckets.remove(key);
            }
            None => buckets.clear(),
        }
    }
}
