//! Batch partitioning and response parsing for the batch-sync endpoint.

use hashbrown::HashMap;

use crate::{
    block::ServerBlock,
    op::{OpData, Operation},
    transport::{BatchError, BatchSyncRequest, BatchSyncResponse, CreateItem, UpdateItem},
    types::{BlockId, OpKind},
};

use super::retry::OpOutcome;

/// What the server did with one operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    /// Created; carries the block with its permanent id.
    Created(ServerBlock),
    /// Updated; carries the block after the write.
    Updated(ServerBlock),
    /// Deleted.
    Deleted,
}

/// Operations sent together in one network call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Batch {
    /// Drained records in send order.
    pub ops: Vec<Operation>,
}

impl Batch {
    /// Wraps drained records.
    pub fn new(ops: Vec<Operation>) -> Self {
        Self { ops }
    }

    /// Number of operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// No operations.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Splits the batch into the endpoint's `creates`/`updates`/`deletes` arrays.
    ///
    /// Each create's `tempId` is its (temporary) block id.
    pub fn to_request(&self) -> BatchSyncRequest {
        let mut req = BatchSyncRequest::default();
        for op in &self.ops {
            match &op.data {
                OpData::Create(data) => req.creates.push(CreateItem {
                    page_id: data.page_id.clone(),
                    block_type: data.block_type.clone(),
                    content: data.content.clone(),
                    position: data.position,
                    parent_block_id: data.parent_block_id.clone(),
                    block_config: data.block_config.clone(),
                    temp_id: op.block_id.clone(),
                }),
                OpData::Update(patch) => req.updates.push(UpdateItem {
                    id: op.block_id.clone(),
                    content: patch.content.clone(),
                    block_type: patch.block_type.clone(),
                    position: patch.position,
                    parent_block_id: patch.parent_block_id.clone(),
                    block_config: patch.block_config.clone(),
                }),
                OpData::Delete => req.deletes.push(op.block_id.clone()),
            }
        }
        req
    }

    /// Pairs every operation with its outcome in `response`.
    ///
    /// An operation with neither a result nor an error entry is retryable.
    pub fn resolve(self, response: &BatchSyncResponse) -> Vec<(Operation, OpOutcome<Applied>)> {
        let created: HashMap<&BlockId, &ServerBlock> = response
            .creates
            .iter()
            .map(|c| (&c.temp_id, &c.block))
            .collect();
        let updated: HashMap<&BlockId, &ServerBlock> = response
            .updates
            .iter()
            .map(|u| (&u.id, &u.block))
            .collect();

        self.ops
            .into_iter()
            .map(|op| {
                let applied = match op.kind() {
                    OpKind::Create => created.get(&op.block_id).map(|b| Applied::Created((*b).clone())),
                    OpKind::Update => updated.get(&op.block_id).map(|b| Applied::Updated((*b).clone())),
                    OpKind::Delete => response
                        .deletes
                        .contains(&op.block_id)
                        .then_some(Applied::Deleted),
                };

                let outcome = match (applied, find_error(&response.errors, &op)) {
                    (_, Some(err)) => OpOutcome::Retryable(err.error.clone()),
                    (Some(applied), None) => OpOutcome::Success(applied),
                    (None, None) => OpOutcome::Retryable(format!(
                        "no result for {} of block {}",
                        op.kind(),
                        op.block_id
                    )),
                };
                (op, outcome)
            })
            .collect()
    }
}

fn find_error<'a>(errors: &'a [BatchError], op: &Operation) -> Option<&'a BatchError> {
    errors.iter().find(|err| {
        err.kind == op.kind()
            && (err.operation_id == op.id.as_str() || err.operation_id == op.block_id.as_str())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        block::{BlockPatch, CreateData},
        transport::CreateResult,
    };

    fn server_block(id: &str, content: &str) -> ServerBlock {
        ServerBlock {
            id: BlockId::from(id),
            page_id: "page-1".into(),
            block_type: "text".into(),
            content: Some(content.into()),
            position: 0,
            parent_block_id: None,
            block_config: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn partitions_by_kind() {
        let batch = Batch::new(vec![
            Operation::create(
                BlockId::from("temp-1"),
                CreateData {
                    page_id: "page-1".into(),
                    block_type: "text".into(),
                    ..CreateData::default()
                },
            ),
            Operation::update(
                BlockId::from("real-2"),
                BlockPatch {
                    content: Some("B".into()),
                    ..BlockPatch::default()
                },
            ),
            Operation::delete(BlockId::from("real-3")),
        ]);
        let req = batch.to_request();
        assert_eq!(req.creates[0].temp_id, BlockId::from("temp-1"));
        assert_eq!(req.updates[0].id, BlockId::from("real-2"));
        assert_eq!(req.updates[0].content.as_deref(), Some("B"));
        assert_eq!(req.deletes, vec![BlockId::from("real-3")]);
    }

    #[test]
    fn partial_failure_and_missing_results_are_retryable() {
        let batch = Batch::new(vec![
            Operation::create(BlockId::from("temp-1"), CreateData::default()),
            Operation::update(BlockId::from("real-2"), BlockPatch::default()),
            Operation::delete(BlockId::from("real-3")),
        ]);
        let response = BatchSyncResponse {
            creates: vec![CreateResult {
                temp_id: BlockId::from("temp-1"),
                block: server_block("real-1", ""),
            }],
            updates: vec![],
            deletes: vec![],
            errors: vec![BatchError {
                operation_id: "real-2".into(),
                kind: OpKind::Update,
                error: "permission denied".into(),
            }],
        };

        let outcomes = batch.resolve(&response);
        assert!(matches!(outcomes[0].1, OpOutcome::Success(Applied::Created(ref b)) if b.id == BlockId::from("real-1")));
        assert_eq!(outcomes[1].1, OpOutcome::Retryable("permission denied".into()));
        assert!(matches!(outcomes[2].1, OpOutcome::Retryable(_)));
    }
}
