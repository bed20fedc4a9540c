use super::{OperationStats, OperationStore};
use crate::crosschain::{CrossChainOperation, OperationState};
use crate::error::{ExchangeError, ExchangeResult};

use alloy_primitives::B256;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

#[derive(Default)]
pub struct MemoryOperationStore {
    operations: DashMap<B256, CrossChainOperation>,
}

impl MemoryOperationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OperationStore for MemoryOperationStore {
    async fn insert(&self, operation: &CrossChainOperation) -> ExchangeResult<()> {
        match self.operations.entry(operation.operation_id) {
            Entry::Occupied(_) => Err(ExchangeError::DuplicateOperation(operation.operation_id)),
            Entry::Vacant(slot) => {
                slot.insert(operation.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, id: B256) -> ExchangeResult<Option<CrossChainOperation>> {
        Ok(self.operations.get(&id).map(|op| op.clone()))
    }

    async fn update(&self, operation: &CrossChainOperation) -> ExchangeResult<()> {
        let mut existing = self
            .operations
            .get_mut(&operation.operation_id)
            .ok_or(ExchangeError::OperationNotFound(operation.operation_id))?;
        *existing = operation.clone();
        Ok(())
    }

    async fn list_by_state(&self, state: OperationState) -> ExchangeResult<Vec<CrossChainOperation>> {
        let mut operations: Vec<_> = self
            .operations
            .iter()
            .filter(|op| op.state == state)
            .map(|op| op.clone())
            .collect();
        operations.sort_by_key(|op| op.created_at);
        Ok(operations)
    }

    async fn stats(&self) -> ExchangeResult<OperationStats> {
        let mut stats = OperationStats::default();
        for op in self.operations.iter() {
            match op.state {
                OperationState::Pending => stats.pending += 1,
                OperationState::Completed => stats.completed += 1,
                OperationState::Failed => stats.failed += 1,
                OperationState::Recovered => stats.recovered += 1,
            }
        }
        Ok(stats)
    }

    async fn health_check(&self) -> ExchangeResult<()> {
        Ok(())
    }
}
