//! # Workitem Bulk Engine
//!
//! 面向 LLM 代理的安全批量操作引擎。代理常会臆造或敲错数字 ID，
//! 直接把调用方给的 ID 交给破坏性的批量操作是不安全的。本引擎把
//! 每次查询结果物化为一个短生命周期的不透明**句柄**，所有批量变更
//! 都必须通过句柄 + 选择器（全部 / 位置下标 / 条件谓词）解析目标
//! 集合，选择结果永远是原始物化结果的子集。
//!
//! ## 架构设计
//!
//! - **domain层**：句柄模型、选择引擎（纯函数）、时钟抽象
//! - **application层**：句柄生命周期服务、批量操作编排与撤销
//! - **infrastructure层**：令牌桶限流、分类重试、后端客户端适配

pub mod application;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use application::{BulkOperationExecutor, BulkOperationResult, ItemOutcome, QueryHandleService};
pub use domain::{
    AffectedItem, FieldChange, HandleMetadata, ItemContext, ItemEffect, ItemId, ItemSelector,
    OperationKind, OperationRecord, QueryHandleData, SelectionCriteria, WorkItemMutation,
};
pub use infrastructure::{
    BackendClient, BackendRequest, BackendResponse, HttpBackendClient, RateLimiter,
    RateLimiterStats, RetryPolicy, execute_with_retry,
};
