//! SQLite-backed batch-apply endpoint for local development and end-to-end tests.
//!
//! Mirrors the server contract: creates are keyed by their temp id so a replayed
//! create returns the block it already made, re-deleting a deleted block is a
//! no-op, and per-item validation failures land in `errors[]` without failing
//! the rest of the batch.

use std::path::Path;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use rusqlite::{Connection, OptionalExtension, params};

use crate::{
    block::{BlockConfig, ServerBlock},
    op::now_ms,
    types::{BlockId, OpKind},
};

use super::{
    BatchError, BatchSyncRequest, BatchSyncResponse, BatchTransport, CreateItem, CreateResult,
    TransportError, TransportResult, UpdateItem, UpdateResult,
};

const BLOCK_COLUMNS: &str =
    "id, page_id, block_type, content, position, parent_block_id, block_config, created_at, updated_at";

/// In-process [`BatchTransport`] that applies batches to a `blocks` table.
#[derive(Clone)]
pub struct SqliteBatchBackend {
    conn: Arc<Mutex<Connection>>,
    unavailable: Arc<AtomicBool>,
}

impl SqliteBatchBackend {
    /// Opens or creates a database at `path`.
    pub fn open(path: impl AsRef<Path>) -> TransportResult<Self> {
        let conn = Connection::open(path).map_err(backend_error)?;
        Self::init_connection(conn)
    }

    /// Fresh private in-memory database.
    pub fn open_in_memory() -> TransportResult<Self> {
        let conn = Connection::open_in_memory().map_err(backend_error)?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> TransportResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))
            .map_err(backend_error)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            unavailable: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Simulates an outage: while set, every batch fails with a network error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Live (not deleted) block by id.
    pub fn get_block(&self, id: &BlockId) -> TransportResult<Option<ServerBlock>> {
        let conn = self.lock()?;
        read_block(&conn, id.as_str()).map_err(backend_error)
    }

    /// Live blocks of a page ordered by position.
    pub fn page_blocks(&self, page_id: &str) -> TransportResult<Vec<ServerBlock>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {BLOCK_COLUMNS} FROM blocks WHERE page_id = ?1 AND deleted_at IS NULL ORDER BY position ASC, created_at ASC"
            ))
            .map_err(backend_error)?;
        let rows = stmt
            .query_map(params![page_id], row_to_block)
            .map_err(backend_error)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(backend_error)?);
        }
        Ok(out)
    }

    /// Applies `request` synchronously in one transaction.
    pub fn apply(&self, request: &BatchSyncRequest) -> TransportResult<BatchSyncResponse> {
        let mut conn = self.lock()?;
        apply_batch(&mut conn, request).map_err(backend_error)
    }

    fn lock(&self) -> TransportResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| TransportError::Backend("connection lock poisoned".to_string()))
    }
}

impl BatchTransport for SqliteBatchBackend {
    async fn send_batch(&self, request: BatchSyncRequest) -> TransportResult<BatchSyncResponse> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TransportError::Network("backend unavailable".to_string()));
        }
        let backend = self.clone();
        tokio::task::spawn_blocking(move || backend.apply(&request))
            .await
            .map_err(|e| TransportError::Backend(format!("join error: {e}")))?
    }
}

fn apply_batch(conn: &mut Connection, req: &BatchSyncRequest) -> rusqlite::Result<BatchSyncResponse> {
    let now = now_ms() as i64;
    let tx = conn.transaction()?;
    let mut resp = BatchSyncResponse::default();

    for item in &req.creates {
        match create_block(&tx, item, now)? {
            Ok(block) => resp.creates.push(CreateResult {
                temp_id: item.temp_id.clone(),
                block,
            }),
            Err(error) => resp.errors.push(BatchError {
                operation_id: item.temp_id.to_string(),
                kind: OpKind::Create,
                error,
            }),
        }
    }

    for item in &req.updates {
        match update_block(&tx, item, now)? {
            Ok(block) => resp.updates.push(UpdateResult {
                id: item.id.clone(),
                block,
            }),
            Err(error) => resp.errors.push(BatchError {
                operation_id: item.id.to_string(),
                kind: OpKind::Update,
                error,
            }),
        }
    }

    for id in &req.deletes {
        match delete_block(&tx, id, now)? {
            Ok(()) => resp.deletes.push(id.clone()),
            Err(error) => resp.errors.push(BatchError {
                operation_id: id.to_string(),
                kind: OpKind::Delete,
                error,
            }),
        }
    }

    tx.commit()?;
    Ok(resp)
}

fn create_block(
    conn: &Connection,
    item: &CreateItem,
    now: i64,
) -> rusqlite::Result<Result<ServerBlock, String>> {
    if item.page_id.trim().is_empty() {
        return Ok(Err("invalid page ID: empty".to_string()));
    }
    if item.block_type.trim().is_empty() {
        return Ok(Err("invalid block type: empty".to_string()));
    }

    let replayed: Option<String> = conn
        .query_row(
            "SELECT id FROM blocks WHERE temp_id = ?1",
            params![item.temp_id.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = replayed {
        return Ok(read_block(conn, &id)?.ok_or_else(|| format!("block {id} was deleted")));
    }

    if let Some(parent) = &item.parent_block_id {
        if read_block(conn, parent.as_str())?.is_none() {
            return Ok(Err(format!("invalid parent block ID: {parent}")));
        }
    }

    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO blocks(id, temp_id, page_id, block_type, content, position, parent_block_id, block_config, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
        params![
            id,
            item.temp_id.as_str(),
            item.page_id,
            item.block_type,
            item.content,
            item.position,
            item.parent_block_id.as_ref().map(BlockId::as_str),
            encode_config(item.block_config.as_ref()),
            now,
        ],
    )?;
    Ok(read_block(conn, &id)?.ok_or_else(|| format!("block {id} missing after insert")))
}

fn update_block(
    conn: &Connection,
    item: &UpdateItem,
    now: i64,
) -> rusqlite::Result<Result<ServerBlock, String>> {
    let Some(mut block) = read_block(conn, item.id.as_str())? else {
        return Ok(Err(format!("block not found: {}", item.id)));
    };

    if let Some(parent) = &item.parent_block_id {
        if parent == &item.id || read_block(conn, parent.as_str())?.is_none() {
            return Ok(Err(format!("invalid parent block ID: {parent}")));
        }
        block.parent_block_id = Some(parent.clone());
    }
    if let Some(v) = &item.content {
        block.content = Some(v.clone());
    }
    if let Some(v) = &item.block_type {
        block.block_type = v.clone();
    }
    if let Some(v) = item.position {
        block.position = v;
    }
    if let Some(v) = &item.block_config {
        block.block_config = Some(v.clone());
    }

    conn.execute(
        "UPDATE blocks SET block_type = ?2, content = ?3, position = ?4, parent_block_id = ?5, block_config = ?6, updated_at = ?7
         WHERE id = ?1",
        params![
            item.id.as_str(),
            block.block_type,
            block.content,
            block.position,
            block.parent_block_id.as_ref().map(BlockId::as_str),
            encode_config(block.block_config.as_ref()),
            now,
        ],
    )?;
    Ok(read_block(conn, item.id.as_str())?.ok_or_else(|| format!("block not found: {}", item.id)))
}

fn delete_block(conn: &Connection, id: &BlockId, now: i64) -> rusqlite::Result<Result<(), String>> {
    let deleted_at: Option<Option<i64>> = conn
        .query_row(
            "SELECT deleted_at FROM blocks WHERE id = ?1",
            params![id.as_str()],
            |row| row.get(0),
        )
        .optional()?;

    match deleted_at {
        None => Ok(Err(format!("block not found: {id}"))),
        Some(Some(_)) => Ok(Ok(())),
        Some(None) => {
            conn.execute(
                "UPDATE blocks SET deleted_at = ?2, updated_at = ?2 WHERE id = ?1",
                params![id.as_str(), now],
            )?;
            Ok(Ok(()))
        }
    }
}

fn read_block(conn: &Connection, id: &str) -> rusqlite::Result<Option<ServerBlock>> {
    conn.query_row(
        &format!("SELECT {BLOCK_COLUMNS} FROM blocks WHERE id = ?1 AND deleted_at IS NULL"),
        params![id],
        row_to_block,
    )
    .optional()
}

fn row_to_block(row: &rusqlite::Row<'_>) -> rusqlite::Result<ServerBlock> {
    let id: String = row.get(0)?;
    let parent: Option<String> = row.get(5)?;
    let config: Option<String> = row.get(6)?;
    let created_at: i64 = row.get(7)?;
    let updated_at: i64 = row.get(8)?;
    Ok(ServerBlock {
        id: BlockId::new(id),
        page_id: row.get(1)?,
        block_type: row.get(2)?,
        content: row.get(3)?,
        position: row.get(4)?,
        parent_block_id: parent.map(BlockId::new),
        block_config: config.and_then(|raw| serde_json::from_str::<BlockConfig>(&raw).ok()),
        created_at: Some(created_at.to_string()),
        updated_at: Some(updated_at.to_string()),
    })
}

fn encode_config(config: Option<&BlockConfig>) -> Option<String> {
    config.and_then(|c| serde_json::to_string(c).ok())
}

fn backend_error(err: rusqlite::Error) -> TransportError {
    TransportError::Backend(err.to_string())
}
