use std::{sync::Arc, time::Duration};

use tempfile::TempDir;

use blocksync::{
    block::{BlockPatch, CreateData},
    op::Operation,
    runtime::handle::{SyncConfig, spawn_block_sync},
    transport::{BatchSyncRequest, CreateItem, sqlite::SqliteBatchBackend},
    types::{BlockId, OpKind},
};

fn create_data(content: &str, parent: Option<&BlockId>) -> CreateData {
    CreateData {
        page_id: "page-1".to_string(),
        block_type: "text".to_string(),
        content: Some(content.to_string()),
        parent_block_id: parent.cloned(),
        ..CreateData::default()
    }
}

fn fast_config() -> SyncConfig {
    SyncConfig {
        sync_interval_ms: 10,
        base_retry_delay_ms: 10,
        max_retry_delay_ms: 50,
        ..SyncConfig::default()
    }
}

#[tokio::test]
async fn nested_creates_and_edits_reach_the_database() {
    let _ = env_logger::builder().is_test(true).try_init();
    let tmp = TempDir::new().expect("tmp");
    let backend = Arc::new(SqliteBatchBackend::open(tmp.path().join("blocks.db")).expect("open"));
    let handle = spawn_block_sync(Arc::clone(&backend), fast_config());

    let parent = BlockId::temporary();
    let child = BlockId::temporary();
    handle
        .enqueue(Operation::create(parent.clone(), create_data("draft", None)))
        .await
        .expect("parent");
    handle
        .enqueue(Operation::create(child.clone(), create_data("child", Some(&parent))))
        .await
        .expect("child");
    handle
        .enqueue(Operation::update(
            parent.clone(),
            BlockPatch {
                content: Some("final".to_string()),
                ..BlockPatch::default()
            },
        ))
        .await
        .expect("edit");

    let report = handle.force_sync().await.expect("force");
    assert_eq!(report.synced.len(), 2);
    assert!(report.dropped.is_empty());
    assert_eq!(report.remapped.len(), 2);

    let real_parent = report
        .remapped
        .iter()
        .find(|(temp, _)| *temp == parent)
        .map(|(_, real)| real.clone())
        .expect("parent remapped");
    let blocks = backend.page_blocks("page-1").expect("blocks");
    assert_eq!(blocks.len(), 2);
    let stored_parent = backend.get_block(&real_parent).expect("get").expect("parent row");
    assert_eq!(stored_parent.content.as_deref(), Some("final"));
    let stored_child = blocks
        .iter()
        .find(|b| b.id != real_parent)
        .expect("child row");
    assert_eq!(stored_child.parent_block_id.as_ref(), Some(&real_parent));

    handle
        .enqueue(Operation::delete(stored_child.id.clone()))
        .await
        .expect("delete");
    let report = handle.force_sync().await.expect("force");
    assert_eq!(report.synced.len(), 1);
    assert_eq!(backend.page_blocks("page-1").expect("blocks").len(), 1);
    assert!(handle.is_empty().await.expect("is_empty"));
}

#[tokio::test]
async fn outage_is_retried_until_backend_returns() {
    let _ = env_logger::builder().is_test(true).try_init();
    let backend = Arc::new(SqliteBatchBackend::open_in_memory().expect("open"));
    let handle = spawn_block_sync(Arc::clone(&backend), fast_config());

    let id = BlockId::temporary();
    backend.set_unavailable(true);
    handle
        .enqueue(Operation::create(id.clone(), create_data("offline", None)))
        .await
        .expect("create");
    let report = handle.force_sync().await.expect("force");
    assert_eq!(report.retried.len(), 1);
    assert!(report.synced.is_empty());

    backend.set_unavailable(false);
    let mut synced = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if handle.is_empty().await.expect("is_empty") {
            synced = true;
            break;
        }
    }
    assert!(synced, "retry never reached the backend");
    let blocks = backend.page_blocks("page-1").expect("blocks");
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].content.as_deref(), Some("offline"));
}

#[test]
fn replayed_create_returns_the_same_block() {
    let backend = SqliteBatchBackend::open_in_memory().expect("open");
    let request = BatchSyncRequest {
        creates: vec![CreateItem {
            page_id: "page-1".to_string(),
            block_type: "text".to_string(),
            content: Some("A".to_string()),
            position: 0,
            parent_block_id: None,
            block_config: None,
            temp_id: BlockId::from("temp-1"),
        }],
        ..BatchSyncRequest::default()
    };

    let first = backend.apply(&request).expect("first");
    let second = backend.apply(&request).expect("replay");
    assert_eq!(first.creates[0].block.id, second.creates[0].block.id);
    assert_eq!(backend.page_blocks("page-1").expect("blocks").len(), 1);
}

#[test]
fn invalid_items_are_reported_per_operation() {
    let backend = SqliteBatchBackend::open_in_memory().expect("open");
    let request = BatchSyncRequest {
        creates: vec![CreateItem {
            page_id: "page-1".to_string(),
            block_type: "text".to_string(),
            content: None,
            position: 0,
            parent_block_id: Some(BlockId::from("missing-parent")),
            block_config: None,
            temp_id: BlockId::from("temp-1"),
        }],
        updates: vec![],
        deletes: vec![BlockId::from("missing")],
    };

    let resp = backend.apply(&request).expect("apply");
    assert!(resp.creates.is_empty());
    assert!(resp.deletes.is_empty());
    assert_eq!(resp.errors.len(), 2);
    assert_eq!(resp.errors[0].kind, OpKind::Create);
    assert_eq!(resp.errors[0].operation_id, "temp-1");
    assert_eq!(resp.errors[1].kind, OpKind::Delete);
}
