//! 批量操作执行器集成测试（内存后端）

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Mutex;

use workitem_core::config::{HandleConfig, RateLimitConfig};
use workitem_core::error::{Result, WorkItemError};
use workitem_core::metrics::BulkEngineMetrics;

use crate::application::bulk_executor::BulkOperationExecutor;
use crate::application::handle_service::QueryHandleService;
use crate::domain::model::{
    HandleMetadata, ItemContext, ItemEffect, ItemId, OperationKind, WorkItemMutation,
};
use crate::domain::selector::{ItemSelector, SelectionCriteria};
use crate::infrastructure::backend::{
    BackendClient, BackendRequest, BackendResponse, HttpMethod,
};
use crate::infrastructure::rate_limit::RateLimiter;
use crate::infrastructure::retry::RetryPolicy;

/// 内存后端：维护条目字段表，可按条目 ID 注入写失败
struct MockBackend {
    items: Mutex<HashMap<ItemId, HashMap<String, Value>>>,
    fail_writes_for: HashSet<ItemId>,
    requests: Mutex<Vec<(HttpMethod, String)>>,
}

impl MockBackend {
    fn new(items: Vec<(ItemId, HashMap<String, Value>)>) -> Self {
        Self {
            items: Mutex::new(items.into_iter().collect()),
            fail_writes_for: HashSet::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn failing_for(mut self, ids: impl IntoIterator<Item = ItemId>) -> Self {
        self.fail_writes_for = ids.into_iter().collect();
        self
    }

    async fn field(&self, item_id: ItemId, path: &str) -> Option<Value> {
        self.items
            .lock()
            .await
            .get(&item_id)
            .and_then(|fields| fields.get(path).cloned())
    }

    fn parse_item_id(path: &str) -> Option<ItemId> {
        path.strip_prefix("items/")?
            .split('/')
            .next()?
            .parse()
            .ok()
    }
}

#[async_trait]
impl BackendClient for MockBackend {
    async fn execute(&self, request: BackendRequest) -> Result<BackendResponse> {
        self.requests
            .lock()
            .await
            .push((request.method, request.path.clone()));

        let item_id = Self::parse_item_id(&request.path).ok_or_else(|| {
            WorkItemError::validation(format!("bad path: {}", request.path))
        })?;

        match request.method {
            HttpMethod::Get => {
                let items = self.items.lock().await;
                let fields = items
                    .get(&item_id)
                    .ok_or(WorkItemError::ItemNotFound { item_id })?;
                Ok(BackendResponse {
                    status: 200,
                    data: json!({ "fields": fields }),
                })
            }
            HttpMethod::Patch => {
                if self.fail_writes_for.contains(&item_id) {
                    return Err(WorkItemError::from_status(400, "field rule violation"));
                }
                let mut items = self.items.lock().await;
                let fields = items
                    .get_mut(&item_id)
                    .ok_or(WorkItemError::ItemNotFound { item_id })?;
                if let Some(patch) = request
                    .body
                    .as_ref()
                    .and_then(|body| body.get("fields"))
                    .and_then(Value::as_object)
                {
                    for (path, value) in patch {
                        fields.insert(path.clone(), value.clone());
                    }
                }
                Ok(BackendResponse {
                    status: 200,
                    data: Value::Null,
                })
            }
            HttpMethod::Post | HttpMethod::Delete => {
                if self.fail_writes_for.contains(&item_id) {
                    return Err(WorkItemError::from_status(400, "rejected"));
                }
                Ok(BackendResponse {
                    status: 200,
                    data: Value::Null,
                })
            }
        }
    }
}

struct Fixture {
    handles: Arc<QueryHandleService>,
    backend: Arc<MockBackend>,
    executor: BulkOperationExecutor,
}

fn fixture(backend: MockBackend) -> Fixture {
    let metrics = Arc::new(BulkEngineMetrics::new());
    let handles = QueryHandleService::new(
        &HandleConfig {
            ttl_seconds: 3600,
            sweep_interval_seconds: 60,
        },
        Arc::clone(&metrics),
    );
    let backend = Arc::new(backend);
    let limiter = Arc::new(RateLimiter::new(&RateLimitConfig {
        capacity: 1000.0,
        refill_rate_per_second: 1000.0,
    }));
    let executor = BulkOperationExecutor::new(
        Arc::clone(&handles),
        Arc::clone(&backend) as Arc<dyn BackendClient>,
        limiter,
        RetryPolicy {
            max_attempts: 2,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
        },
        metrics,
    );
    Fixture {
        handles,
        backend,
        executor,
    }
}

fn item_fields(state: &str) -> HashMap<String, Value> {
    [
        ("state".to_string(), json!(state)),
        ("priority".to_string(), json!(2)),
    ]
    .into_iter()
    .collect()
}

fn scenario_backend() -> MockBackend {
    MockBackend::new(vec![
        (10, item_fields("New")),
        (11, item_fields("Active")),
        (12, item_fields("New")),
        (13, item_fields("Active")),
        (14, item_fields("New")),
    ])
}

fn scenario_context() -> HashMap<ItemId, ItemContext> {
    let with_state = |state: &str| ItemContext {
        state: Some(state.to_string()),
        ..Default::default()
    };
    [
        (10, with_state("New")),
        (11, with_state("Active")),
        (12, with_state("New")),
        (13, with_state("Active")),
        (14, with_state("New")),
    ]
    .into_iter()
    .collect()
}

async fn scenario_handle(handles: &QueryHandleService) -> String {
    handles
        .create(
            vec![10, 11, 12, 13, 14],
            scenario_context(),
            HandleMetadata {
                query: "all open items".into(),
                organization: "contoso".into(),
                project: "platform".into(),
                total_count: 5,
            },
            None,
        )
        .await
}

#[tokio::test]
async fn test_update_all_items() {
    let fx = fixture(scenario_backend());
    let handle = scenario_handle(&fx.handles).await;

    let mutation = WorkItemMutation::Update {
        fields: [("priority".to_string(), json!(1))].into_iter().collect(),
    };
    let result = fx
        .executor
        .execute(&handle, &ItemSelector::All, &mutation, "contoso:platform")
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.success_count, 5);
    assert_eq!(result.failure_count, 0);
    for id in [10u64, 11, 12, 13, 14] {
        assert_eq!(fx.backend.field(id, "priority").await, Some(json!(1)));
    }

    // 历史记录包含真实旧值
    let record = fx.handles.get_last_operation(&handle).await.unwrap().unwrap();
    assert_eq!(record.kind, OperationKind::Update);
    assert!(record.reversible);
    let first = &record.items[0];
    match &first.effect {
        ItemEffect::FieldDiff { changes } => {
            assert_eq!(changes["priority"].old, json!(2));
            assert_eq!(changes["priority"].new, json!(1));
        }
        other => panic!("unexpected effect: {other:?}"),
    }
}

#[tokio::test]
async fn test_partial_failure_reports_per_item() {
    // 5 个条目，criteria 命中 11/13，indices [0,4,9] 命中 10/14，
    // 对 11/12/13 执行变更时 12 模拟失败
    let fx = fixture(scenario_backend().failing_for([12]));
    let handle = scenario_handle(&fx.handles).await;

    let selector = ItemSelector::Criteria(SelectionCriteria {
        states: Some(vec!["Active".into()]),
        ..Default::default()
    });
    let resolved = fx.handles.resolve_selector(&handle, &selector).await.unwrap();
    assert_eq!(resolved, vec![11, 13]);

    let resolved = fx
        .handles
        .resolve_selector(&handle, &ItemSelector::Indices(vec![0, 4, 9]))
        .await
        .unwrap();
    assert_eq!(resolved, vec![10, 14]);

    let mutation = WorkItemMutation::Transition {
        state: "Closed".into(),
        comment: None,
    };
    let result = fx
        .executor
        .execute(
            &handle,
            &ItemSelector::Indices(vec![1, 2, 3]),
            &mutation,
            "contoso:platform",
        )
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.success_count, 2);
    assert_eq!(result.failure_count, 1);
    let failed: Vec<ItemId> = result
        .items
        .iter()
        .filter(|item| !item.success)
        .map(|item| item.item_id)
        .collect();
    assert_eq!(failed, vec![12]);
    assert!(result.items.iter().any(|item| item.item_id == 12
        && item.error.as_deref().unwrap_or("").contains("field rule violation")));

    // 历史只收录成功条目 11 和 13
    let record = fx.handles.get_last_operation(&handle).await.unwrap().unwrap();
    let recorded: Vec<ItemId> = record.items.iter().map(|item| item.item_id).collect();
    assert_eq!(recorded, vec![11, 13]);

    // 失败条目的状态未被改动
    assert_eq!(fx.backend.field(12, "state").await, Some(json!("New")));
    assert_eq!(fx.backend.field(11, "state").await, Some(json!("Closed")));
}

#[tokio::test]
async fn test_empty_selection_is_noop_success() {
    let fx = fixture(scenario_backend());
    let handle = scenario_handle(&fx.handles).await;

    let selector = ItemSelector::Criteria(SelectionCriteria {
        states: Some(vec!["Removed".into()]),
        ..Default::default()
    });
    let result = fx
        .executor
        .execute(
            &handle,
            &selector,
            &WorkItemMutation::Remove,
            "contoso:platform",
        )
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.success_count, 0);
    assert!(result.items.is_empty());
    // 后端完全未被触达
    assert!(fx.backend.requests.lock().await.is_empty());
    // 也没有历史记录
    assert!(fx.handles.get_last_operation(&handle).await.unwrap().is_none());
}

#[tokio::test]
async fn test_unknown_handle_rejected() {
    let fx = fixture(scenario_backend());
    let err = fx
        .executor
        .execute(
            "qh-bogus",
            &ItemSelector::All,
            &WorkItemMutation::Remove,
            "contoso:platform",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, WorkItemError::HandleNotFound { .. }));
    assert!(fx.backend.requests.lock().await.is_empty());
}

#[tokio::test]
async fn test_undo_round_trip() {
    let fx = fixture(scenario_backend());
    let handle = scenario_handle(&fx.handles).await;

    let mutation = WorkItemMutation::Update {
        fields: [("priority".to_string(), json!(1))].into_iter().collect(),
    };
    fx.executor
        .execute(
            &handle,
            &ItemSelector::Indices(vec![1, 3]),
            &mutation,
            "contoso:platform",
        )
        .await
        .unwrap();
    assert_eq!(fx.backend.field(11, "priority").await, Some(json!(1)));

    // 撤销后读到旧值
    let result = fx.executor.undo(&handle, "contoso:platform").await.unwrap();
    assert!(result.success);
    assert_eq!(result.success_count, 2);
    assert_eq!(fx.backend.field(11, "priority").await, Some(json!(2)));
    assert_eq!(fx.backend.field(13, "priority").await, Some(json!(2)));

    // 撤销本身作为新记录入历史（差异方向翻转）
    let record = fx.handles.get_last_operation(&handle).await.unwrap().unwrap();
    match &record.items[0].effect {
        ItemEffect::FieldDiff { changes } => {
            assert_eq!(changes["priority"].old, json!(1));
            assert_eq!(changes["priority"].new, json!(2));
        }
        other => panic!("unexpected effect: {other:?}"),
    }
}

#[tokio::test]
async fn test_undo_without_history() {
    let fx = fixture(scenario_backend());
    let handle = scenario_handle(&fx.handles).await;

    let err = fx
        .executor
        .undo(&handle, "contoso:platform")
        .await
        .unwrap_err();
    assert!(matches!(err, WorkItemError::NoOperationHistory { .. }));
}

#[tokio::test]
async fn test_comment_is_not_undoable() {
    let fx = fixture(scenario_backend());
    let handle = scenario_handle(&fx.handles).await;

    fx.executor
        .execute(
            &handle,
            &ItemSelector::Indices(vec![0]),
            &WorkItemMutation::Comment {
                text: "triaged by bot".into(),
            },
            "contoso:platform",
        )
        .await
        .unwrap();

    let err = fx
        .executor
        .undo(&handle, "contoso:platform")
        .await
        .unwrap_err();
    match err {
        WorkItemError::NotUndoable { kind } => assert_eq!(kind, "comment"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_failed_items_retryable_subset() {
    // 部分失败后，调用方可以只对失败子集（按下标）重试
    let fx = fixture(scenario_backend().failing_for([10, 14]));
    let handle = scenario_handle(&fx.handles).await;

    let mutation = WorkItemMutation::Update {
        fields: [("priority".to_string(), json!(0))].into_iter().collect(),
    };
    let result = fx
        .executor
        .execute(&handle, &ItemSelector::All, &mutation, "contoso:platform")
        .await
        .unwrap();
    assert_eq!(result.failure_count, 2);

    let failed_ids: Vec<ItemId> = result
        .items
        .iter()
        .filter(|item| !item.success)
        .map(|item| item.item_id)
        .collect();
    assert_eq!(failed_ids, vec![10, 14]);
}
