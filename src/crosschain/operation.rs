//! Cross-chain operation record and its lifecycle

use crate::error::{ExchangeError, ExchangeResult};

use alloy_primitives::{keccak256, Address, B256, U256};
use alloy_sol_types::SolValue;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Pending,
    Completed,
    Failed,
    Recovered,
}

impl OperationState {
    pub const ALL: [OperationState; 4] = [
        OperationState::Pending,
        OperationState::Completed,
        OperationState::Failed,
        OperationState::Recovered,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::Pending => "pending",
            OperationState::Completed => "completed",
            OperationState::Failed => "failed",
            OperationState::Recovered => "recovered",
        }
    }

    /// Whether the user may reclaim the escrowed input
    pub fn is_recoverable(&self) -> bool {
        matches!(self, OperationState::Pending | OperationState::Failed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationState::Completed | OperationState::Recovered)
    }

    pub fn can_transition_to(&self, next: OperationState) -> bool {
        use OperationState::*;
        matches!(
            (self, next),
            (Pending, Completed) | (Pending, Failed) | (Pending, Recovered) | (Failed, Recovered)
        )
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationState {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OperationState::Pending),
            "completed" => Ok(OperationState::Completed),
            "failed" => Ok(OperationState::Failed),
            "recovered" => Ok(OperationState::Recovered),
            other => Err(ExchangeError::Internal(format!(
                "unknown operation state '{}'",
                other
            ))),
        }
    }
}

/// keccak256(abi.encode(user, token_in, token_out, amount, timestamp))
pub fn operation_id(
    user: Address,
    token_in: Address,
    token_out: Address,
    amount: U256,
    timestamp: u64,
) -> B256 {
    keccak256((user, token_in, token_out, amount, U256::from(timestamp)).abi_encode())
}

/// Funds escrowed on this chain for settlement on another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossChainOperation {
    pub operation_id: B256,
    pub user: Address,
    /// Token held in custody on this chain
    pub token_in: Address,
    pub token_out: Address,
    pub amount: U256,
    pub src_chain: u64,
    pub dst_chain: u64,
    pub recipient: Address,
    pub state: OperationState,
    pub failure_reason: Option<String>,
    pub provider: Option<String>,
    pub message_id: Option<B256>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl CrossChainOperation {
    #[allow(clippy::too_many_arguments)]
    pub fn pending(
        user: Address,
        token_in: Address,
        token_out: Address,
        amount: U256,
        src_chain: u64,
        dst_chain: u64,
        recipient: Address,
        timestamp: u64,
    ) -> Self {
        Self {
            operation_id: operation_id(user, token_in, token_out, amount, timestamp),
            user,
            token_in,
            token_out,
            amount,
            src_chain,
            dst_chain,
            recipient,
            state: OperationState::Pending,
            failure_reason: None,
            provider: None,
            message_id: None,
            created_at: timestamp,
            updated_at: timestamp,
        }
    }

    /// Move to `next`, rejecting edges the lifecycle does not have
    pub fn transition(&mut self, next: OperationState, at: u64) -> ExchangeResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(ExchangeError::InvalidStateTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        self.updated_at = at;
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>, at: u64) -> ExchangeResult<()> {
        self.transition(OperationState::Failed, at)?;
        self.failure_reason = Some(reason.into());
        Ok(())
    }
}
