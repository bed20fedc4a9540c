//! Synchronous extension points around pool mutations

use super::{BalanceDelta, PoolKey};
use crate::error::{ExchangeError, ExchangeResult};

use alloy_primitives::{Address, U256};
use std::sync::atomic::{AtomicU64, Ordering};

/// Requested liquidity change, as seen by hooks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiquidityChange {
    /// Constant-product deposit
    Deposit {
        amount0_desired: U256,
        amount1_desired: U256,
    },
    /// Constant-product withdrawal of LP shares
    Withdraw { liquidity: U256 },
    /// Concentrated range position change
    Position {
        tick_lower: i32,
        tick_upper: i32,
        liquidity_delta: i128,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapParams {
    pub sender: Address,
    pub zero_for_one: bool,
    pub amount_in: U256,
}

/// Observer invoked by the pool manager
///
/// A `before_*` error aborts the operation before any state changes.
pub trait PoolHooks: Send + Sync {
    fn before_modify_liquidity(
        &self,
        _key: &PoolKey,
        _owner: Address,
        _change: &LiquidityChange,
    ) -> ExchangeResult<()> {
        Ok(())
    }

    fn after_modify_liquidity(
        &self,
        _key: &PoolKey,
        _owner: Address,
        _change: &LiquidityChange,
        _delta: &BalanceDelta,
    ) {
    }

    fn before_swap(&self, _key: &PoolKey, _params: &SwapParams) -> ExchangeResult<()> {
        Ok(())
    }

    fn after_swap(&self, _key: &PoolKey, _params: &SwapParams, _amount_out: U256) {}
}

/// Caps the input size of a single swap and counts completed swaps
pub struct SwapLimitHook {
    max_amount_in: U256,
    swaps: AtomicU64,
}

impl SwapLimitHook {
    pub fn new(max_amount_in: U256) -> Self {
        Self {
            max_amount_in,
            swaps: AtomicU64::new(0),
        }
    }

    pub fn swap_count(&self) -> u64 {
        self.swaps.load(Ordering::Relaxed)
    }
}

impl PoolHooks for SwapLimitHook {
    fn before_swap(&self, _key: &PoolKey, params: &SwapParams) -> ExchangeResult<()> {
        if params.amount_in > self.max_amount_in {
            return Err(ExchangeError::HookRejected(format!(
                "swap of {} exceeds limit {}",
                params.amount_in, self.max_amount_in
            )));
        }
        Ok(())
    }

    fn after_swap(&self, _key: &PoolKey, _params: &SwapParams, _amount_out: U256) {
        self.swaps.fetch_add(1, Ordering::Relaxed);
    }
}
