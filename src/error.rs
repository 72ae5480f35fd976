//! Workitem Core 错误模块
//!
//! - 定义全仓库统一的错误类型 `WorkItemError`
//! - 为重试执行器提供错误分类（可重试 / 不可重试）
//! - 提供 HTTP 状态码到错误类型的映射工具

use thiserror::Error;

/// 统一结果类型
pub type Result<T> = std::result::Result<T, WorkItemError>;

/// 工作项批量操作核心错误类型
///
/// 分类约定：
/// - 网络类 / 超时 / 429 / 5xx：可重试
/// - 令牌过期（可静默刷新）：可重试
/// - 认证失败、权限不足、参数校验、句柄或条目不存在：不可重试
#[derive(Debug, Error)]
pub enum WorkItemError {
    /// 查询句柄不存在或已过期（调用方应重新执行查询）
    #[error("query handle not found or expired: {handle}")]
    HandleNotFound { handle: String },

    /// 选择器或变更请求参数非法
    #[error("validation error: {message}")]
    Validation { message: String },

    /// 后端临时性故障（429 / 5xx），可重试
    #[error("transient backend error (status {status}): {message}")]
    TransientBackend { status: u16, message: String },

    /// 网络层故障（连接被拒绝 / 重置 / DNS 失败等），可重试
    #[error("network error: {message}")]
    Network { message: String },

    /// 单次请求超时，可重试
    #[error("request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// 访问令牌过期但可静默刷新，可重试
    #[error("auth token expired (refreshable)")]
    AuthTokenExpired,

    /// 致命认证失败（未登录 / 凭据无效），需要用户介入，不可重试
    #[error("authentication failed: {message}")]
    FatalAuth { message: String },

    /// 权限不足，不可重试
    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    /// 后端条目不存在，不可重试
    #[error("work item not found: {item_id}")]
    ItemNotFound { item_id: u64 },

    /// 句柄上没有任何操作历史，无法撤销
    #[error("no operation history for handle: {handle}")]
    NoOperationHistory { handle: String },

    /// 最近一次操作不可撤销（例如评论类操作没有字段逆变更）
    #[error("last operation is not undoable: {kind}")]
    NotUndoable { kind: String },

    /// 其他后端错误（非 2xx 且未归入上述类别），不可重试
    #[error("backend error (status {status}): {message}")]
    Backend { status: u16, message: String },

    /// 配置加载或解析错误
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl WorkItemError {
    /// 判断错误是否可重试
    ///
    /// 重试执行器只依赖该方法做分类，不解析错误字符串。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WorkItemError::TransientBackend { .. }
                | WorkItemError::Network { .. }
                | WorkItemError::Timeout { .. }
                | WorkItemError::AuthTokenExpired
        )
    }

    /// 返回关联的 HTTP 状态码（如果有）
    pub fn status(&self) -> Option<u16> {
        match self {
            WorkItemError::TransientBackend { status, .. } => Some(*status),
            WorkItemError::Backend { status, .. } => Some(*status),
            WorkItemError::FatalAuth { .. } => Some(401),
            WorkItemError::PermissionDenied { .. } => Some(403),
            WorkItemError::ItemNotFound { .. } => Some(404),
            _ => None,
        }
    }

    /// 将后端返回的非 2xx 状态码映射为错误类型
    ///
    /// - 429 / 500 / 502 / 503 / 504 -> `TransientBackend`（可重试）
    /// - 401 -> `FatalAuth`（适配层无法判断令牌是否可刷新，由上层令牌管理
    ///   自行构造 `AuthTokenExpired`）
    /// - 403 -> `PermissionDenied`
    /// - 其余 -> `Backend`
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 | 500 | 502 | 503 | 504 => WorkItemError::TransientBackend { status, message },
            401 => WorkItemError::FatalAuth { message },
            403 => WorkItemError::PermissionDenied { message },
            _ => WorkItemError::Backend { status, message },
        }
    }

    /// 便捷构造：参数校验错误
    pub fn validation(message: impl Into<String>) -> Self {
        WorkItemError::Validation {
            message: message.into(),
        }
    }
}
