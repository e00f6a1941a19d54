//! Block payloads carried by pending operations and returned by the server.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::BlockId;

/// Type-specific block configuration (kanban columns, toggle state, ...).
pub type BlockConfig = Map<String, Value>;

/// Full payload needed to create a block server-side.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CreateData {
    /// Page the block belongs to.
    pub page_id: String,
    /// Block type name (`text`, `heading`, `toggle`, ...).
    pub block_type: String,
    /// Initial content.
    pub content: Option<String>,
    /// Rank within the parent.
    pub position: i64,
    /// Parent block for nested blocks.
    pub parent_block_id: Option<BlockId>,
    /// Type-specific configuration.
    pub block_config: Option<BlockConfig>,
}

/// Sparse field set where each `Some` field overwrites the block value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BlockPatch {
    /// Optional replacement content.
    pub content: Option<String>,
    /// Optional replacement block type.
    pub block_type: Option<String>,
    /// Optional replacement rank.
    pub position: Option<i64>,
    /// Optional replacement parent.
    pub parent_block_id: Option<BlockId>,
    /// Optional replacement configuration.
    pub block_config: Option<BlockConfig>,
}

impl BlockPatch {
    /// Returns true when no fields are set.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Layers `newer` on top of `self`; fields set in `newer` win.
    pub fn merge_from(&mut self, newer: &BlockPatch) {
        if let Some(v) = &newer.content {
            self.content = Some(v.clone());
        }
        if let Some(v) = &newer.block_type {
            self.block_type = Some(v.clone());
        }
        if let Some(v) = newer.position {
            self.position = Some(v);
        }
        if let Some(v) = &newer.parent_block_id {
            self.parent_block_id = Some(v.clone());
        }
        if let Some(v) = &newer.block_config {
            self.block_config = Some(v.clone());
        }
    }

    /// Applies this patch in place to a create payload.
    pub fn apply_to(&self, data: &mut CreateData) {
        if let Some(v) = &self.content {
            data.content = Some(v.clone());
        }
        if let Some(v) = &self.block_type {
            data.block_type = v.clone();
        }
        if let Some(v) = self.position {
            data.position = v;
        }
        if let Some(v) = &self.parent_block_id {
            data.parent_block_id = Some(v.clone());
        }
        if let Some(v) = &self.block_config {
            data.block_config = Some(v.clone());
        }
    }
}

/// Block as echoed back by the batch-sync endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerBlock {
    /// Permanent server id.
    pub id: BlockId,
    /// Owning page.
    #[serde(rename = "pageId", default)]
    pub page_id: String,
    /// Block type name.
    #[serde(rename = "type", default)]
    pub block_type: String,
    /// Current content.
    #[serde(default)]
    pub content: Option<String>,
    /// Current rank.
    #[serde(default)]
    pub position: i64,
    /// Parent block, if nested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_block_id: Option<BlockId>,
    /// Type-specific configuration.
    #[serde(rename = "blockConfig", default, skip_serializing_if = "Option::is_none")]
    pub block_config: Option<BlockConfig>,
    /// Creation time as reported by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Last update time as reported by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_is_last_write_wins_per_field() {
        let mut older = BlockPatch {
            content: Some("A".into()),
            position: Some(1),
            ..BlockPatch::default()
        };
        older.merge_from(&BlockPatch {
            content: Some("B".into()),
            block_type: Some("heading".into()),
            ..BlockPatch::default()
        });
        assert_eq!(older.content.as_deref(), Some("B"));
        assert_eq!(older.position, Some(1));
        assert_eq!(older.block_type.as_deref(), Some("heading"));
    }

    #[test]
    fn patch_applies_onto_create_payload() {
        let mut data = CreateData {
            page_id: "page-1".into(),
            block_type: "text".into(),
            content: Some("draft".into()),
            position: 0,
            ..CreateData::default()
        };
        BlockPatch {
            content: Some("final".into()),
            position: Some(3),
            ..BlockPatch::default()
        }
        .apply_to(&mut data);
        assert_eq!(data.content.as_deref(), Some("final"));
        assert_eq!(data.position, 3);
        assert_eq!(data.block_type, "text");
    }
}
