//! 查询句柄服务
//!
//! 维护"句柄令牌 -> 查询结果快照"的内存映射，是整个引擎唯一的
//! 可变共享状态之一。核心约束：
//!
//! - 句柄在一次查询执行后创建一次，之后只允许追加操作历史
//! - 查找不续期；过期句柄在查找时惰性剔除，后台清理任务兜底
//! - 所有查找类调用对缺失 / 过期句柄返回类型化错误而非 panic，
//!   调用方可以直接转成"请重新执行查询"的提示

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

use workitem_core::config::HandleConfig;
use workitem_core::error::{Result, WorkItemError};
use workitem_core::metrics::BulkEngineMetrics;

use crate::domain::clock::{Clock, SystemClock};
use crate::domain::model::{
    HandleMetadata, ItemContext, ItemId, OperationRecord, QueryHandleData,
};
use crate::domain::selector::{ItemSelector, resolve};

/// 查询句柄服务
pub struct QueryHandleService {
    /// 句柄令牌 -> 快照
    handles: RwLock<HashMap<String, QueryHandleData>>,
    clock: Arc<dyn Clock>,
    default_ttl: ChronoDuration,
    metrics: Arc<BulkEngineMetrics>,
}

impl QueryHandleService {
    pub fn new(config: &HandleConfig, metrics: Arc<BulkEngineMetrics>) -> Arc<Self> {
        Self::with_clock(config, metrics, Arc::new(SystemClock))
    }

    /// 注入时钟的构造（测试用手动时钟控制过期）
    pub fn with_clock(
        config: &HandleConfig,
        metrics: Arc<BulkEngineMetrics>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            handles: RwLock::new(HashMap::new()),
            clock,
            default_ttl: ChronoDuration::seconds(config.ttl_seconds as i64),
            metrics,
        })
    }

    /// 物化一次查询结果，返回新句柄令牌
    ///
    /// 输入做防御性拷贝；缺失上下文的条目补空快照，保证
    /// `item_ids` 与 `item_context` 的键一致。
    pub async fn create(
        &self,
        item_ids: Vec<ItemId>,
        mut item_context: HashMap<ItemId, ItemContext>,
        metadata: HandleMetadata,
        ttl: Option<ChronoDuration>,
    ) -> String {
        let id = format!("qh-{}", Uuid::new_v4());
        let now = self.clock.now();
        let ttl = ttl.unwrap_or(self.default_ttl);

        // 每个 ID 都要有上下文条目（允许为空快照）
        for item_id in &item_ids {
            item_context.entry(*item_id).or_default();
        }
        item_context.retain(|id, _| item_ids.contains(id));

        if metadata.truncated(item_ids.len()) {
            warn!(
                handle = %id,
                stored = item_ids.len(),
                total = metadata.total_count,
                "Backend truncated the query result, handle covers a subset"
            );
        }

        let data = QueryHandleData {
            id: id.clone(),
            created_at: now,
            expires_at: now + ttl,
            item_ids,
            item_context,
            metadata,
            operation_history: Vec::new(),
        };

        let mut handles = self.handles.write().await;
        debug!(
            handle = %id,
            items = data.item_ids.len(),
            expires_at = %data.expires_at,
            "Created query handle"
        );
        handles.insert(id.clone(), data);
        self.metrics.handles_active.set(handles.len() as i64);
        id
    }

    /// 查找句柄（不存在或已过期返回 `HandleNotFound`；过期条目惰性剔除）
    pub async fn get(&self, handle: &str) -> Result<QueryHandleData> {
        let now = self.clock.now();
        {
            let handles = self.handles.read().await;
            match handles.get(handle) {
                Some(data) if now < data.expires_at => return Ok(data.clone()),
                Some(_) => {}
                None => {
                    return Err(WorkItemError::HandleNotFound {
                        handle: handle.to_string(),
                    });
                }
            }
        }

        // 已过期：惰性剔除
        let mut handles = self.handles.write().await;
        if handles
            .get(handle)
            .map(|data| now >= data.expires_at)
            .unwrap_or(false)
        {
            handles.remove(handle);
            self.metrics.handles_active.set(handles.len() as i64);
            debug!(handle = %handle, "Evicted expired handle on lookup");
        }
        Err(WorkItemError::HandleNotFound {
            handle: handle.to_string(),
        })
    }

    /// 对句柄缓存的条目集合解析选择器（纯内存操作，不触达后端）
    pub async fn resolve_selector(
        &self,
        handle: &str,
        selector: &ItemSelector,
    ) -> Result<Vec<ItemId>> {
        let data = self.get(handle).await?;
        let resolved = resolve(&data.item_ids, &data.item_context, selector);
        if resolved.is_empty() {
            warn!(
                handle = %handle,
                total = data.item_ids.len(),
                "Selector matched zero items"
            );
        }
        Ok(resolved)
    }

    /// 追加一条操作记录
    ///
    /// 句柄缺失 / 过期时静默跳过（仅告警）：后端写已经完成，
    /// 记账失败不应该让一次成功的批量操作报错。
    /// 追加在单个写锁临界区内完成，两个并发批量操作的历史
    /// 记录不会交错。
    pub async fn record_operation(&self, handle: &str, record: OperationRecord) {
        let now = self.clock.now();
        let mut handles = self.handles.write().await;
        match handles.get_mut(handle) {
            Some(data) if now < data.expires_at => {
                debug!(
                    handle = %handle,
                    kind = record.kind.as_str(),
                    items = record.items.len(),
                    reversible = record.reversible,
                    "Recorded operation on handle"
                );
                data.operation_history.push(record);
            }
            _ => {
                warn!(
                    handle = %handle,
                    kind = record.kind.as_str(),
                    "Handle missing or expired, skipping operation bookkeeping"
                );
            }
        }
    }

    /// 读取最近一次操作记录
    pub async fn get_last_operation(&self, handle: &str) -> Result<Option<OperationRecord>> {
        let data = self.get(handle).await?;
        Ok(data.operation_history.last().cloned())
    }

    /// 清理所有过期句柄，返回清理数量
    pub async fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut handles = self.handles.write().await;
        let before = handles.len();
        handles.retain(|_, data| now < data.expires_at);
        let removed = before - handles.len();
        if removed > 0 {
            info!(removed, remaining = handles.len(), "Swept expired query handles");
            self.metrics.handles_swept_total.inc_by(removed as u64);
        }
        self.metrics.handles_active.set(handles.len() as i64);
        removed
    }

    /// 启动后台清理任务
    pub fn start_sweeper(self: &Arc<Self>, period: std::time::Duration) -> tokio::task::JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                service.sweep().await;
            }
        })
    }

    /// 清空全部句柄（测试 / 运维用）
    pub async fn clear_all(&self) {
        let mut handles = self.handles.write().await;
        handles.clear();
        self.metrics.handles_active.set(0);
    }

    /// 当前存活句柄数量
    pub async fn handle_count(&self) -> usize {
        self.handles.read().await.len()
    }
}
