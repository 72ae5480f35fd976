//! 查询句柄领域模型
//!
//! 句柄是一次查询结果的不可变快照：后续所有批量变更都必须通过句柄
//! 引用条目，调用方永远不直接提交条目 ID。句柄创建后只允许追加操作
//! 历史，`item_ids` 与 `item_context` 不会被原地更新，也不会自动重查。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 后端条目 ID
pub type ItemId = u64;

/// 状态转移使用的通用字段路径
pub const STATE_FIELD: &str = "state";

/// 条目上下文快照（查询时捕获，仅用于条件选择，不会自动刷新）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemContext {
    /// 当前状态（如 "Active"）
    #[serde(default)]
    pub state: Option<String>,
    /// 条目类型（如 "Bug" / "Task"）
    #[serde(default)]
    pub item_type: Option<String>,
    /// 标题
    #[serde(default)]
    pub title: Option<String>,
    /// 负责人
    #[serde(default)]
    pub assigned_to: Option<String>,
    /// 标签
    #[serde(default)]
    pub tags: Vec<String>,
    /// 优先级
    #[serde(default)]
    pub priority: Option<i32>,
    /// 预估工作量
    #[serde(default)]
    pub effort: Option<f64>,
    /// 距最近一次实质性变更的天数
    #[serde(default)]
    pub days_inactive: Option<u32>,
    /// 其他后端特定属性（本核心不解释其语义）
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, Value>,
}

/// 句柄元数据：记录查询来源与截断情况
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandleMetadata {
    /// 原始查询文本
    pub query: String,
    /// 后端组织
    #[serde(default)]
    pub organization: String,
    /// 后端项目
    #[serde(default)]
    pub project: String,
    /// 后端报告的结果总数（可能大于实际物化的条目数）
    pub total_count: usize,
}

impl HandleMetadata {
    /// 后端是否截断了结果集（必须向调用方透出，不能隐藏）
    pub fn truncated(&self, stored: usize) -> bool {
        self.total_count > stored
    }
}

/// 单字段变更（旧值 -> 新值）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldChange {
    pub old: Value,
    pub new: Value,
}

/// 批量操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// 字段更新
    Update,
    /// 追加评论
    Comment,
    /// 状态转移
    Transition,
    /// 建立关联
    Link,
    /// 移除条目
    Remove,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Update => "update",
            OperationKind::Comment => "comment",
            OperationKind::Transition => "transition",
            OperationKind::Link => "link",
            OperationKind::Remove => "remove",
        }
    }

    /// 该操作类型的效果是否可表示为字段差异（从而可撤销）
    ///
    /// 评论没有字段逆变更；关联与删除同样无法用 `{old, new}` 模型回滚。
    pub fn reversible(&self) -> bool {
        matches!(self, OperationKind::Update | OperationKind::Transition)
    }
}

/// 单个条目上记录的操作效果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemEffect {
    /// 字段差异（field path -> {old, new}），可逆
    FieldDiff { changes: HashMap<String, FieldChange> },
    /// 不可逆操作的原始载荷（仅供诊断展示）
    Opaque { payload: Value },
}

/// 操作影响的单个条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffectedItem {
    pub item_id: ItemId,
    pub effect: ItemEffect,
}

/// 操作记录：一次批量变更在句柄历史中的一条记录
///
/// 只收录成功条目；失败条目没有可撤销的内容。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub timestamp: DateTime<Utc>,
    pub items: Vec<AffectedItem>,
    /// 是否可通过逆变更撤销
    pub reversible: bool,
}

impl OperationRecord {
    pub fn new(kind: OperationKind, timestamp: DateTime<Utc>, items: Vec<AffectedItem>) -> Self {
        // 只要有任何一个条目的效果不是字段差异，整条记录即不可撤销
        let reversible = kind.reversible()
            && items
                .iter()
                .all(|item| matches!(item.effect, ItemEffect::FieldDiff { .. }));
        Self {
            kind,
            timestamp,
            items,
            reversible,
        }
    }
}

/// 查询句柄数据（服务内部存储的完整条目）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryHandleData {
    /// 句柄令牌（qh-<uuid>，创建后不复用）
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// 查询结果条目 ID（保持查询返回顺序，索引选择器依赖该顺序）
    pub item_ids: Vec<ItemId>,
    /// 条目 ID -> 上下文快照（与 item_ids 一一对应，允许为空快照）
    pub item_context: HashMap<ItemId, ItemContext>,
    pub metadata: HandleMetadata,
    /// 操作历史（按时间追加）
    pub operation_history: Vec<OperationRecord>,
}

/// 批量变更请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum WorkItemMutation {
    /// 更新若干字段（field path -> 新值）
    Update { fields: HashMap<String, Value> },
    /// 状态转移（可附带评论）
    Transition {
        state: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
    },
    /// 追加评论
    Comment { text: String },
    /// 建立关联
    Link { target_id: ItemId, link_type: String },
    /// 移除条目
    Remove,
}

impl WorkItemMutation {
    pub fn kind(&self) -> OperationKind {
        match self {
            WorkItemMutation::Update { .. } => OperationKind::Update,
            WorkItemMutation::Transition { .. } => OperationKind::Transition,
            WorkItemMutation::Comment { .. } => OperationKind::Comment,
            WorkItemMutation::Link { .. } => OperationKind::Link,
            WorkItemMutation::Remove => OperationKind::Remove,
        }
    }
}
