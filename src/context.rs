//! Call context passed to every mutating entry point

use alloy_primitives::{Address, U256};

/// Who is calling, on whose behalf, with how much native value and when
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    /// Immediate caller
    pub sender: Address,
    /// Account that initiated the outer transaction
    pub origin: Address,
    /// Native value attached to the call
    pub value: U256,
    /// Unix timestamp the call executes at
    pub timestamp: u64,
}

impl CallContext {
    /// Context for a call made directly by an end user at the current time
    pub fn user(account: Address) -> Self {
        Self {
            sender: account,
            origin: account,
            value: U256::ZERO,
            timestamp: chrono::Utc::now().timestamp().max(0) as u64,
        }
    }

    /// Attach native value
    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    /// Pin the execution timestamp
    pub fn at(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Context for a nested call made by `program` within this call
    pub fn forwarded_by(&self, program: Address) -> Self {
        Self {
            sender: program,
            origin: self.origin,
            value: U256::ZERO,
            timestamp: self.timestamp,
        }
    }

    /// Whether the immediate caller is the transaction originator
    pub fn is_end_user(&self) -> bool {
        self.sender == self.origin
    }
}
