//! 批量操作执行器
//!
//! 对选择器解析出的条目集合逐项执行变更：每次后端调用先过限流器
//! 再进重试执行器。条目之间并发执行且互相隔离，单个条目的致命错误
//! 不会中断整批。执行结束后只把成功条目的前后差异写入句柄历史，
//! 失败条目没有可撤销的内容。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures_util::future;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use workitem_core::error::{Result, WorkItemError};
use workitem_core::metrics::BulkEngineMetrics;

use crate::application::handle_service::QueryHandleService;
use crate::domain::clock::{Clock, SystemClock};
use crate::domain::model::{
    AffectedItem, FieldChange, ItemEffect, ItemId, OperationKind, OperationRecord,
    STATE_FIELD, WorkItemMutation,
};
use crate::domain::selector::ItemSelector;
use crate::infrastructure::backend::{BackendClient, BackendRequest};
use crate::infrastructure::rate_limit::RateLimiter;
use crate::infrastructure::retry::{RetryPolicy, execute_with_retry};

/// 单条目执行结果
#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub item_id: ItemId,
    pub success: bool,
    pub error: Option<String>,
}

/// 批量操作结果
///
/// 部分失败不是异常：`items` 中逐条列出成功 / 失败，调用方可以
/// 只对失败子集重试。
#[derive(Debug, Clone)]
pub struct BulkOperationResult {
    /// 全部成功时为 true
    pub success: bool,
    pub success_count: usize,
    pub failure_count: usize,
    pub items: Vec<ItemOutcome>,
}

impl BulkOperationResult {
    fn from_outcomes(items: Vec<ItemOutcome>) -> Self {
        let success_count = items.iter().filter(|item| item.success).count();
        let failure_count = items.len() - success_count;
        Self {
            success: failure_count == 0,
            success_count,
            failure_count,
            items,
        }
    }

    fn empty() -> Self {
        Self {
            success: true,
            success_count: 0,
            failure_count: 0,
            items: Vec::new(),
        }
    }
}

/// 批量操作执行器
pub struct BulkOperationExecutor {
    handles: Arc<QueryHandleService>,
    backend: Arc<dyn BackendClient>,
    limiter: Arc<RateLimiter>,
    retry_policy: RetryPolicy,
    metrics: Arc<BulkEngineMetrics>,
    clock: Arc<dyn Clock>,
}

impl BulkOperationExecutor {
    pub fn new(
        handles: Arc<QueryHandleService>,
        backend: Arc<dyn BackendClient>,
        limiter: Arc<RateLimiter>,
        retry_policy: RetryPolicy,
        metrics: Arc<BulkEngineMetrics>,
    ) -> Self {
        Self {
            handles,
            backend,
            limiter,
            retry_policy,
            metrics,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 对句柄 + 选择器命中的条目集合执行一次批量变更
    ///
    /// `scope_key` 是限流维度（通常为 organization:project）。
    pub async fn execute(
        &self,
        handle: &str,
        selector: &ItemSelector,
        mutation: &WorkItemMutation,
        scope_key: &str,
    ) -> Result<BulkOperationResult> {
        let item_ids = self.handles.resolve_selector(handle, selector).await?;
        if item_ids.is_empty() {
            // 零命中按无操作处理，不触达后端
            warn!(handle = %handle, "Bulk operation matched zero items, nothing to do");
            return Ok(BulkOperationResult::empty());
        }

        let kind = mutation.kind();
        let started = Instant::now();
        info!(
            handle = %handle,
            operation = kind.as_str(),
            items = item_ids.len(),
            scope = %scope_key,
            "Executing bulk operation"
        );

        let applications = item_ids
            .iter()
            .map(|&item_id| self.apply_one(item_id, mutation, scope_key));
        let applied = future::join_all(applications).await;

        let mut outcomes = Vec::with_capacity(applied.len());
        let mut affected = Vec::new();
        for (item_id, result) in item_ids.iter().copied().zip(applied) {
            match result {
                Ok(item) => {
                    self.metrics
                        .bulk_items_total
                        .with_label_values(&[kind.as_str(), "success"])
                        .inc();
                    affected.push(item);
                    outcomes.push(ItemOutcome {
                        item_id,
                        success: true,
                        error: None,
                    });
                }
                Err(error) => {
                    self.metrics
                        .bulk_items_total
                        .with_label_values(&[kind.as_str(), "failure"])
                        .inc();
                    warn!(
                        item_id,
                        operation = kind.as_str(),
                        error = %error,
                        "Bulk item failed"
                    );
                    outcomes.push(ItemOutcome {
                        item_id,
                        success: false,
                        error: Some(error.to_string()),
                    });
                }
            }
        }

        // 只有成功条目进入操作历史；全部失败时没有可撤销内容，不记录
        if !affected.is_empty() {
            let record = OperationRecord::new(kind, self.clock.now(), affected);
            self.handles.record_operation(handle, record).await;
        }

        self.metrics
            .bulk_operation_duration_seconds
            .observe(started.elapsed().as_secs_f64());

        let result = BulkOperationResult::from_outcomes(outcomes);
        info!(
            handle = %handle,
            operation = kind.as_str(),
            success_count = result.success_count,
            failure_count = result.failure_count,
            "Bulk operation finished"
        );
        Ok(result)
    }

    /// 撤销句柄上最近一次操作
    ///
    /// 不可撤销的操作类型（评论 / 关联 / 删除）显式报告
    /// `NotUndoable`，绝不静默跳过。
    pub async fn undo(&self, handle: &str, scope_key: &str) -> Result<BulkOperationResult> {
        let last = self
            .handles
            .get_last_operation(handle)
            .await?
            .ok_or_else(|| WorkItemError::NoOperationHistory {
                handle: handle.to_string(),
            })?;

        if !last.reversible {
            return Err(WorkItemError::NotUndoable {
                kind: last.kind.as_str().to_string(),
            });
        }

        info!(
            handle = %handle,
            kind = last.kind.as_str(),
            items = last.items.len(),
            "Undoing last bulk operation"
        );

        let inversions = last.items.iter().map(|item| async move {
            let ItemEffect::FieldDiff { changes } = &item.effect else {
                // reversible 记录只含字段差异，走不到这里
                return (
                    item.item_id,
                    Err(WorkItemError::NotUndoable {
                        kind: last.kind.as_str().to_string(),
                    }),
                );
            };
            // 逆变更：old <- new
            let fields: HashMap<String, Value> = changes
                .iter()
                .map(|(path, change)| (path.clone(), change.old.clone()))
                .collect();
            let result = self
                .patch_fields(item.item_id, &fields, None, scope_key, "undo")
                .await;
            (item.item_id, result)
        });
        let inverted = future::join_all(inversions).await;

        let mut outcomes = Vec::with_capacity(inverted.len());
        let mut affected = Vec::new();
        for (item_id, result) in inverted {
            match result {
                Ok(changes) => {
                    self.metrics
                        .bulk_items_total
                        .with_label_values(&["undo", "success"])
                        .inc();
                    affected.push(AffectedItem {
                        item_id,
                        effect: ItemEffect::FieldDiff { changes },
                    });
                    outcomes.push(ItemOutcome {
                        item_id,
                        success: true,
                        error: None,
                    });
                }
                Err(error) => {
                    self.metrics
                        .bulk_items_total
                        .with_label_values(&["undo", "failure"])
                        .inc();
                    warn!(item_id, error = %error, "Undo failed for item");
                    outcomes.push(ItemOutcome {
                        item_id,
                        success: false,
                        error: Some(error.to_string()),
                    });
                }
            }
        }

        if !affected.is_empty() {
            let record = OperationRecord::new(OperationKind::Update, self.clock.now(), affected);
            self.handles.record_operation(handle, record).await;
        }

        Ok(BulkOperationResult::from_outcomes(outcomes))
    }

    /// 对单个条目执行变更，返回记入历史的效果
    async fn apply_one(
        &self,
        item_id: ItemId,
        mutation: &WorkItemMutation,
        scope_key: &str,
    ) -> Result<AffectedItem> {
        match mutation {
            WorkItemMutation::Update { fields } => {
                let changes = self
                    .patch_fields(item_id, fields, None, scope_key, "update")
                    .await?;
                Ok(AffectedItem {
                    item_id,
                    effect: ItemEffect::FieldDiff { changes },
                })
            }
            WorkItemMutation::Transition { state, comment } => {
                let fields: HashMap<String, Value> =
                    [(STATE_FIELD.to_string(), json!(state))].into_iter().collect();
                let changes = self
                    .patch_fields(item_id, &fields, comment.as_deref(), scope_key, "transition")
                    .await?;
                Ok(AffectedItem {
                    item_id,
                    effect: ItemEffect::FieldDiff { changes },
                })
            }
            WorkItemMutation::Comment { text } => {
                let payload = json!({ "text": text });
                self.send(
                    BackendRequest::post(format!("items/{item_id}/comments"), payload.clone()),
                    scope_key,
                    "comment",
                )
                .await?;
                Ok(AffectedItem {
                    item_id,
                    effect: ItemEffect::Opaque { payload },
                })
            }
            WorkItemMutation::Link { target_id, link_type } => {
                let payload = json!({ "target_id": target_id, "link_type": link_type });
                self.send(
                    BackendRequest::post(format!("items/{item_id}/links"), payload.clone()),
                    scope_key,
                    "link",
                )
                .await?;
                Ok(AffectedItem {
                    item_id,
                    effect: ItemEffect::Opaque { payload },
                })
            }
            WorkItemMutation::Remove => {
                self.send(
                    BackendRequest::delete(format!("items/{item_id}")),
                    scope_key,
                    "remove",
                )
                .await?;
                Ok(AffectedItem {
                    item_id,
                    effect: ItemEffect::Opaque { payload: json!({ "removed": true }) },
                })
            }
        }
    }

    /// 字段写路径：先读当前值构造 `{old, new}` 差异，再提交 PATCH
    async fn patch_fields(
        &self,
        item_id: ItemId,
        fields: &HashMap<String, Value>,
        comment: Option<&str>,
        scope_key: &str,
        operation_name: &str,
    ) -> Result<HashMap<String, FieldChange>> {
        // 读当前字段值，撤销依赖真实的旧值而不是调用方的猜测
        let current = self
            .send(
                BackendRequest::get(format!("items/{item_id}")),
                scope_key,
                operation_name,
            )
            .await?;
        let current_fields = current.data.get("fields").cloned().unwrap_or(Value::Null);

        let mut body = json!({ "fields": fields });
        if let Some(comment) = comment {
            body["comment"] = json!(comment);
        }
        self.send(
            BackendRequest::patch(format!("items/{item_id}"), body),
            scope_key,
            operation_name,
        )
        .await?;

        let changes = fields
            .iter()
            .map(|(path, new)| {
                let old = current_fields.get(path).cloned().unwrap_or(Value::Null);
                (
                    path.clone(),
                    FieldChange {
                        old,
                        new: new.clone(),
                    },
                )
            })
            .collect();
        Ok(changes)
    }

    /// 单次后端调用：限流 -> 重试包装
    async fn send(
        &self,
        request: BackendRequest,
        scope_key: &str,
        operation_name: &str,
    ) -> Result<crate::infrastructure::backend::BackendResponse> {
        let wait_started = Instant::now();
        self.limiter.throttle(scope_key).await;
        self.metrics
            .rate_limit_wait_seconds
            .observe(wait_started.elapsed().as_secs_f64());

        let mut first = true;
        execute_with_retry(&self.retry_policy, operation_name, || {
            if !first {
                self.metrics.retry_attempts_total.inc();
            }
            first = false;
            let request = request.clone();
            debug!(
                method = request.method.as_str(),
                path = %request.path,
                operation = %operation_name,
                "Dispatching backend request"
            );
            self.backend.execute(request)
        })
        .await
    }
}
