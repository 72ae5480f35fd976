//! 领域层：查询句柄模型、选择引擎、时钟抽象

pub mod clock;
pub mod model;
pub mod selector;

pub use clock::{Clock, SystemClock};
pub use model::{
    AffectedItem, FieldChange, HandleMetadata, ItemContext, ItemEffect, ItemId, OperationKind,
    OperationRecord, QueryHandleData, WorkItemMutation, STATE_FIELD,
};
pub use selector::{ItemSelector, SelectionCriteria, resolve};
