//! 应用层：句柄生命周期管理与批量操作编排

pub mod bulk_executor;
pub mod handle_service;

#[cfg(test)]
mod bulk_executor_test;

pub use bulk_executor::{BulkOperationExecutor, BulkOperationResult, ItemOutcome};
pub use handle_service::QueryHandleService;
