//! AMM pools and the pool registry
//!
//! Two pool flavours share one key space:
//! - constant product (`x*y=k`, fungible LP shares)
//! - concentrated liquidity (tick-ranged positions, Q64.96 prices)

pub mod concentrated;
pub mod constant_product;
pub mod hooks;
mod key;
mod manager;

pub use concentrated::ConcentratedPool;
pub use constant_product::ConstantProductPool;
pub use hooks::{LiquidityChange, PoolHooks, SwapLimitHook, SwapParams};
pub use key::{sort_tokens, PoolKey};
pub use manager::PoolManager;

use crate::error::ExchangeResult;

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidityDirection {
    Add,
    Remove,
}

/// Token amounts moved by a liquidity change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDelta {
    pub amount0: U256,
    pub amount1: U256,
    pub liquidity: U256,
    pub direction: LiquidityDirection,
}

/// Which invariant a new pool uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PoolKind {
    ConstantProduct,
    /// Concentrated liquidity starting at `tick`
    Concentrated { tick: i32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolState {
    ConstantProduct(ConstantProductPool),
    Concentrated(ConcentratedPool),
}

/// A registered pool and its state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pool {
    pub key: PoolKey,
    pub id: B256,
    pub pool_ref: Address,
    pub state: PoolState,
}

impl Pool {
    pub fn kind_label(&self) -> &'static str {
        match self.state {
            PoolState::ConstantProduct(_) => "constant_product",
            PoolState::Concentrated(_) => "concentrated",
        }
    }

    pub fn quote(&self, token_in: Address, amount_in: U256, fee: u32) -> ExchangeResult<U256> {
        let zero_for_one = self.key.zero_for_one(token_in)?;
        match &self.state {
            PoolState::ConstantProduct(pool) => pool.quote(zero_for_one, amount_in, fee),
            PoolState::Concentrated(pool) => pool.quote(zero_for_one, amount_in, fee),
        }
    }

    fn swap(&mut self, zero_for_one: bool, amount_in: U256, fee: u32) -> ExchangeResult<U256> {
        match &mut self.state {
            PoolState::ConstantProduct(pool) => pool.swap(zero_for_one, amount_in, fee),
            PoolState::Concentrated(pool) => pool.swap(zero_for_one, amount_in, fee),
        }
    }

    pub fn summary(&self) -> PoolSummary {
        let (reserve0, reserve1, liquidity, sqrt_price_x96, tick) = match &self.state {
            PoolState::ConstantProduct(pool) => (
                Some(pool.reserve0),
                Some(pool.reserve1),
                pool.total_supply,
                None,
                None,
            ),
            PoolState::Concentrated(pool) => (
                None,
                None,
                U256::from(pool.liquidity),
                Some(pool.sqrt_price_x96),
                Some(pool.tick),
            ),
        };
        PoolSummary {
            pool_id: self.id,
            pool_ref: self.pool_ref,
            key: self.key,
            kind: self.kind_label(),
            reserve0,
            reserve1,
            liquidity,
            sqrt_price_x96,
            tick,
        }
    }
}

/// Read-only view of a pool for the API
#[derive(Debug, Clone, Serialize)]
pub struct PoolSummary {
    pub pool_id: B256,
    pub pool_ref: Address,
    pub key: PoolKey,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reserve0: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reserve1: Option<U256>,
    pub liquidity: U256,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sqrt_price_x96: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tick: Option<i32>,
}
