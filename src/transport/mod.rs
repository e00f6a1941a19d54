//! Wire format of the batch-sync call and the transport seam behind it.

/// HTTP client for the backend's batch-sync route.
pub mod http;
/// SQLite reference backend that applies batches in-process.
pub mod sqlite;

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::{
    block::{BlockConfig, ServerBlock},
    types::{BlockId, OpKind},
};

/// Create entry of a batch-sync request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateItem {
    /// Owning page.
    #[serde(rename = "pageId")]
    pub page_id: String,
    /// Block type, e.g. `text` or `heading`.
    #[serde(rename = "type")]
    pub block_type: String,
    /// Initial content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Sort position within the parent.
    pub position: i64,
    /// Parent block, if nested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_block_id: Option<BlockId>,
    /// Free-form type-specific settings.
    #[serde(rename = "blockConfig", default, skip_serializing_if = "Option::is_none")]
    pub block_config: Option<BlockConfig>,
    /// Client-side id the server echoes back with the real block.
    #[serde(rename = "tempId")]
    pub temp_id: BlockId,
}

/// Update entry of a batch-sync request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateItem {
    /// Server id of the block being changed.
    pub id: BlockId,
    /// New content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// New block type.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub block_type: Option<String>,
    /// New sort position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
    /// New parent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_block_id: Option<BlockId>,
    /// Replacement settings map.
    #[serde(rename = "blockConfig", default, skip_serializing_if = "Option::is_none")]
    pub block_config: Option<BlockConfig>,
}

/// Body of one batch-sync call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BatchSyncRequest {
    /// New blocks, keyed by temp id.
    #[serde(default)]
    pub creates: Vec<CreateItem>,
    /// Sparse field updates.
    #[serde(default)]
    pub updates: Vec<UpdateItem>,
    /// Ids to soft-delete.
    #[serde(default)]
    pub deletes: Vec<BlockId>,
}

impl BatchSyncRequest {
    /// Number of operations across all three lists.
    pub fn len(&self) -> usize {
        self.creates.len() + self.updates.len() + self.deletes.len()
    }

    /// No operations at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Acknowledged create, keyed by the client's temp id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateResult {
    /// Temp id sent in the request.
    #[serde(rename = "tempId")]
    pub temp_id: BlockId,
    /// Block as stored, carrying its real id.
    pub block: ServerBlock,
}

/// Acknowledged update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateResult {
    /// Updated block id.
    pub id: BlockId,
    /// Block after the update.
    pub block: ServerBlock,
}

/// Per-operation application failure reported inside a successful response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchError {
    /// Operation id, temp id (creates), or block id (updates/deletes).
    #[serde(rename = "operationId")]
    pub operation_id: String,
    /// Kind of the failed operation.
    #[serde(rename = "type")]
    pub kind: OpKind,
    /// Server-side reason.
    pub error: String,
}

/// Structured batch-sync response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BatchSyncResponse {
    /// Applied creates.
    #[serde(default)]
    pub creates: Vec<CreateResult>,
    /// Applied updates.
    #[serde(default)]
    pub updates: Vec<UpdateResult>,
    /// Applied deletes.
    #[serde(default)]
    pub deletes: Vec<BlockId>,
    /// Operations the server could not apply.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<BatchError>,
}

/// Failure of the batch call as a whole.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request never reached the server.
    #[error("network error: {0}")]
    Network(String),
    /// The request or response exceeded the client timeout.
    #[error("request timed out")]
    Timeout,
    /// Non-2xx response.
    #[error("server returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error code and message from the envelope, or the raw body.
        message: String,
    },
    /// 2xx response whose envelope reports `success: false`.
    #[error("server rejected batch: {0}")]
    Rejected(String),
    /// 2xx response that could not be decoded.
    #[error("response decode failed: {0}")]
    Decode(String),
    /// Failure inside an in-process backend.
    #[error("backend error: {0}")]
    Backend(String),
}

impl TransportError {
    /// Whether the batch goes through the bounded retry path.
    ///
    /// Every status, auth failures included, is retried; only an undecodable
    /// success body is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_)
            | Self::Timeout
            | Self::Backend(_)
            | Self::Status { .. }
            | Self::Rejected(_) => true,
            Self::Decode(_) => false,
        }
    }
}

/// Result of a transport call.
pub type TransportResult<T> = Result<T, TransportError>;

/// The batch-apply endpoint the queue talks to.
pub trait BatchTransport: Send + Sync + 'static {
    /// Sends one batch and returns the structured response.
    fn send_batch(
        &self,
        request: BatchSyncRequest,
    ) -> impl Future<Output = TransportResult<BatchSyncResponse>> + Send;
}
