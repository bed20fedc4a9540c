//! Token-transfer boundary
//!
//! The engine never holds balances itself. Every pull and push goes through a
//! [`TokenLedger`], and any failed transfer is fatal to the enclosing call.

mod memory;

pub use memory::InMemoryToken;

use crate::error::{ExchangeError, ExchangeResult};

use alloy_primitives::{address, Address, U256};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// Ledger key for the chain's native currency
pub const NATIVE_TOKEN: Address = address!("EeeeeEeeeEeEeeEeEeEeeEEEeeeeEeeeeeeeEEeE");

/// Balance ledger for one token
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenLedger: Send + Sync {
    async fn balance_of(&self, account: Address) -> ExchangeResult<U256>;

    /// Move `amount` from `from` to `to` on behalf of the engine
    async fn transfer(&self, from: Address, to: Address, amount: U256) -> ExchangeResult<()>;

    /// Move `amount` from `from` to `to` using `spender`'s allowance
    async fn transfer_from(
        &self,
        spender: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> ExchangeResult<()>;

    async fn approve(&self, owner: Address, spender: Address, amount: U256) -> ExchangeResult<()>;

    async fn allowance(&self, owner: Address, spender: Address) -> ExchangeResult<U256>;
}

/// Ledgers keyed by token address
#[derive(Default)]
pub struct TokenRegistry {
    ledgers: DashMap<Address, Arc<dyn TokenLedger>>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, token: Address, ledger: Arc<dyn TokenLedger>) {
        self.ledgers.insert(token, ledger);
    }

    pub fn get(&self, token: Address) -> ExchangeResult<Arc<dyn TokenLedger>> {
        self.ledgers
            .get(&token)
            .map(|entry| entry.value().clone())
            .ok_or(ExchangeError::TokenNotFound(token))
    }

    pub fn native(&self) -> ExchangeResult<Arc<dyn TokenLedger>> {
        self.get(NATIVE_TOKEN)
    }

    pub fn contains(&self, token: Address) -> bool {
        self.ledgers.contains_key(&token)
    }

    pub fn tokens(&self) -> Vec<Address> {
        self.ledgers.iter().map(|entry| *entry.key()).collect()
    }
}
