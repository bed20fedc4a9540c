//! x*y=k pool with proportional LP shares

use crate::error::{ExchangeError, ExchangeResult};
use crate::math::{full_math::mul_div_rounding_up, mul_div, sqrt, FEE_DENOMINATOR};

use alloy_primitives::{Address, U256};
use std::collections::HashMap;

/// Input remaining after the fee, floored
pub fn amount_in_with_fee(amount_in: U256, fee: u32) -> ExchangeResult<U256> {
    if fee >= FEE_DENOMINATOR {
        return Err(ExchangeError::InvalidFeeConfiguration {
            fee,
            tick_spacing: 0,
        });
    }
    mul_div(
        amount_in,
        U256::from(FEE_DENOMINATOR - fee),
        U256::from(FEE_DENOMINATOR),
    )
}

/// Output for an exact input against reserves
///
/// `out = reserve_out * in_with_fee / (reserve_in + in_with_fee)`, floored.
pub fn get_amount_out(
    amount_in: U256,
    reserve_in: U256,
    reserve_out: U256,
    fee: u32,
) -> ExchangeResult<U256> {
    if amount_in.is_zero() {
        return Err(ExchangeError::InvalidAmount(amount_in));
    }
    if reserve_in.is_zero() || reserve_out.is_zero() {
        return Err(ExchangeError::InsufficientLiquidity);
    }

    let with_fee = amount_in_with_fee(amount_in, fee)?;
    let denominator = reserve_in
        .checked_add(with_fee)
        .ok_or(ExchangeError::Overflow)?;
    let amount_out = mul_div(reserve_out, with_fee, denominator)?;

    if amount_out.is_zero() {
        return Err(ExchangeError::InsufficientOutputAmount {
            actual: U256::ZERO,
            min: U256::from(1),
        });
    }
    Ok(amount_out)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstantProductPool {
    pub reserve0: U256,
    pub reserve1: U256,
    pub total_supply: U256,
    shares: HashMap<Address, U256>,
}

impl ConstantProductPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shares_of(&self, owner: Address) -> U256 {
        self.shares.get(&owner).copied().unwrap_or_default()
    }

    /// Deposit up to the desired amounts, returning (amount0, amount1, liquidity)
    ///
    /// The first deposit sets the price. Later deposits are matched to the
    /// current ratio and the surplus side is not taken.
    pub fn mint(
        &mut self,
        recipient: Address,
        amount0_desired: U256,
        amount1_desired: U256,
    ) -> ExchangeResult<(U256, U256, U256)> {
        let (amount0, amount1, liquidity) = if self.total_supply.is_zero() {
            let product = amount0_desired
                .checked_mul(amount1_desired)
                .ok_or(ExchangeError::Overflow)?;
            (amount0_desired, amount1_desired, sqrt(product))
        } else {
            if self.reserve0.is_zero() || self.reserve1.is_zero() {
                return Err(ExchangeError::InsufficientLiquidity);
            }
            let liquidity0 = mul_div(amount0_desired, self.total_supply, self.reserve0)?;
            let liquidity1 = mul_div(amount1_desired, self.total_supply, self.reserve1)?;

            if liquidity0 <= liquidity1 {
                let amount1 = mul_div_rounding_up(amount0_desired, self.reserve1, self.reserve0)?
                    .min(amount1_desired);
                (amount0_desired, amount1, liquidity0)
            } else {
                let amount0 = mul_div_rounding_up(amount1_desired, self.reserve0, self.reserve1)?
                    .min(amount0_desired);
                (amount0, amount1_desired, liquidity1)
            }
        };

        if liquidity.is_zero() {
            return Err(ExchangeError::LiquidityDeltaZero);
        }

        self.reserve0 = self
            .reserve0
            .checked_add(amount0)
            .ok_or(ExchangeError::Overflow)?;
        self.reserve1 = self
            .reserve1
            .checked_add(amount1)
            .ok_or(ExchangeError::Overflow)?;
        self.total_supply += liquidity;
        *self.shares.entry(recipient).or_default() += liquidity;

        Ok((amount0, amount1, liquidity))
    }

    /// Redeem `liquidity` shares for the proportional reserves
    pub fn burn(&mut self, owner: Address, liquidity: U256) -> ExchangeResult<(U256, U256)> {
        if liquidity.is_zero() {
            return Err(ExchangeError::LiquidityDeltaZero);
        }
        let available = self.shares_of(owner);
        if liquidity > available {
            return Err(ExchangeError::InsufficientLiquidityBurned {
                requested: liquidity,
                available,
            });
        }

        let amount0 = mul_div(liquidity, self.reserve0, self.total_supply)?;
        let amount1 = mul_div(liquidity, self.reserve1, self.total_supply)?;

        self.reserve0 -= amount0;
        self.reserve1 -= amount1;
        self.total_supply -= liquidity;
        if available == liquidity {
            self.shares.remove(&owner);
        } else {
            self.shares.insert(owner, available - liquidity);
        }

        Ok((amount0, amount1))
    }

    pub fn quote(&self, zero_for_one: bool, amount_in: U256, fee: u32) -> ExchangeResult<U256> {
        let (reserve_in, reserve_out) = self.oriented(zero_for_one);
        get_amount_out(amount_in, reserve_in, reserve_out, fee)
    }

    pub fn swap(&mut self, zero_for_one: bool, amount_in: U256, fee: u32) -> ExchangeResult<U256> {
        let amount_out = self.quote(zero_for_one, amount_in, fee)?;
        let (reserve_in, reserve_out) = self.oriented(zero_for_one);
        let reserve_in = reserve_in
            .checked_add(amount_in)
            .ok_or(ExchangeError::Overflow)?;
        let reserve_out = reserve_out - amount_out;

        if zero_for_one {
            self.reserve0 = reserve_in;
            self.reserve1 = reserve_out;
        } else {
            self.reserve1 = reserve_in;
            self.reserve0 = reserve_out;
        }
        Ok(amount_out)
    }

    fn oriented(&self, zero_for_one: bool) -> (U256, U256) {
        if zero_for_one {
            (self.reserve0, self.reserve1)
        } else {
            (self.reserve1, self.reserve0)
        }
    }
}
