//! Operation persistence
//!
//! Cross-chain operations are never deleted, only transitioned. The
//! coordinator reads and writes them through [`OperationStore`]; the
//! in-memory store serves tests and database-less deployments, the
//! PostgreSQL store survives restarts.

mod memory;
mod postgres;

pub use memory::MemoryOperationStore;
pub use postgres::PgOperationStore;

use crate::crosschain::{CrossChainOperation, OperationState};
use crate::error::ExchangeResult;

use alloy_primitives::B256;
use async_trait::async_trait;
use serde::Serialize;

#[async_trait]
pub trait OperationStore: Send + Sync {
    /// Record a new operation, `DuplicateOperation` if the id exists
    async fn insert(&self, operation: &CrossChainOperation) -> ExchangeResult<()>;

    async fn get(&self, id: B256) -> ExchangeResult<Option<CrossChainOperation>>;

    /// Overwrite an existing operation, `OperationNotFound` otherwise
    async fn update(&self, operation: &CrossChainOperation) -> ExchangeResult<()>;

    async fn list_by_state(&self, state: OperationState) -> ExchangeResult<Vec<CrossChainOperation>>;

    async fn stats(&self) -> ExchangeResult<OperationStats>;

    async fn health_check(&self) -> ExchangeResult<()>;
}

/// Operation counts by state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OperationStats {
    pub pending: u64,
    pub completed: u64,
    pub failed: u64,
    pub recovered: u64,
}

impl OperationStats {
    pub fn total(&self) -> u64 {
        self.pending + self.completed + self.failed + self.recovered
    }
}
