//! Tick-ranged liquidity pool
//!
//! Liquidity is provided over `[tick_lower, tick_upper)` ranges. Each
//! initialized tick stores the gross liquidity referencing it and the net
//! liquidity change applied when the price crosses it left to right.
//!
//! Exact-input swaps walk initialized ticks in price order:
//!
//! 1. Find the next initialized tick in the swap direction (a `BTreeMap`
//!    range query), or the price bound if there is none.
//! 2. Run one swap step against the active liquidity towards that price.
//! 3. If the step reached the tick, cross it: apply `liquidity_net`
//!    (negated when moving down) and continue from the far side.
//! 4. Otherwise the input is exhausted and the tick is recomputed from the
//!    final price.
//!
//! Reaching the price bound with input left fails the swap with
//! `InsufficientLiquidity`; nothing is committed in that case.

use super::{BalanceDelta, LiquidityDirection};
use crate::error::{ExchangeError, ExchangeResult};
use crate::math::sqrt_price_math::{get_amount0_delta, get_amount1_delta};
use crate::math::swap_math::compute_swap_step;
use crate::math::tick_math::{
    get_sqrt_ratio_at_tick, get_tick_at_sqrt_ratio, MAX_SQRT_RATIO, MIN_SQRT_RATIO,
};
use crate::math::{MAX_TICK, MIN_TICK};

use alloy_primitives::{Address, U256};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickInfo {
    pub liquidity_gross: u128,
    pub liquidity_net: i128,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PositionKey {
    pub owner: Address,
    pub tick_lower: i32,
    pub tick_upper: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcentratedPool {
    pub sqrt_price_x96: U256,
    pub tick: i32,
    /// Liquidity active at the current tick
    pub liquidity: u128,
    pub tick_spacing: i32,
    ticks: BTreeMap<i32, TickInfo>,
    positions: HashMap<PositionKey, u128>,
}

fn apply_delta(liquidity: u128, delta: i128) -> ExchangeResult<u128> {
    if delta < 0 {
        liquidity
            .checked_sub(delta.unsigned_abs())
            .ok_or(ExchangeError::Underflow)
    } else {
        liquidity
            .checked_add(delta as u128)
            .ok_or(ExchangeError::Overflow)
    }
}

struct SwapOutcome {
    amount_out: U256,
    sqrt_price_x96: U256,
    tick: i32,
    liquidity: u128,
}

impl ConcentratedPool {
    /// New pool priced at `tick`
    pub fn new(tick: i32, tick_spacing: i32) -> ExchangeResult<Self> {
        if tick_spacing <= 0 {
            return Err(ExchangeError::InvalidFeeConfiguration {
                fee: 0,
                tick_spacing,
            });
        }
        Ok(Self {
            sqrt_price_x96: get_sqrt_ratio_at_tick(tick)?,
            tick,
            liquidity: 0,
            tick_spacing,
            ticks: BTreeMap::new(),
            positions: HashMap::new(),
        })
    }

    pub fn tick_info(&self, tick: i32) -> Option<TickInfo> {
        self.ticks.get(&tick).copied()
    }

    pub fn position(&self, owner: Address, tick_lower: i32, tick_upper: i32) -> u128 {
        self.positions
            .get(&PositionKey {
                owner,
                tick_lower,
                tick_upper,
            })
            .copied()
            .unwrap_or_default()
    }

    fn check_ticks(&self, tick_lower: i32, tick_upper: i32) -> ExchangeResult<()> {
        let invalid = ExchangeError::InvalidTickRange {
            lower: tick_lower,
            upper: tick_upper,
        };
        if tick_lower >= tick_upper
            || tick_lower < MIN_TICK
            || tick_upper > MAX_TICK
            || tick_lower % self.tick_spacing != 0
            || tick_upper % self.tick_spacing != 0
        {
            return Err(invalid);
        }
        Ok(())
    }

    fn update_tick(&mut self, tick: i32, delta: i128, upper: bool) -> ExchangeResult<()> {
        let info = self.ticks.entry(tick).or_default();
        info.liquidity_gross = apply_delta(info.liquidity_gross, delta)?;
        info.liquidity_net = if upper {
            info.liquidity_net.checked_sub(delta)
        } else {
            info.liquidity_net.checked_add(delta)
        }
        .ok_or(ExchangeError::Overflow)?;

        if info.liquidity_gross == 0 {
            self.ticks.remove(&tick);
        }
        Ok(())
    }

    /// Add (positive delta) or remove (negative delta) range liquidity
    ///
    /// Amounts owed to the pool round up; amounts paid out round down.
    pub fn modify_position(
        &mut self,
        owner: Address,
        tick_lower: i32,
        tick_upper: i32,
        liquidity_delta: i128,
    ) -> ExchangeResult<BalanceDelta> {
        if liquidity_delta == 0 {
            return Err(ExchangeError::LiquidityDeltaZero);
        }
        self.check_ticks(tick_lower, tick_upper)?;

        let key = PositionKey {
            owner,
            tick_lower,
            tick_upper,
        };
        let current = self.positions.get(&key).copied().unwrap_or_default();
        let updated = apply_delta(current, liquidity_delta).map_err(|_| {
            ExchangeError::InsufficientLiquidityBurned {
                requested: U256::from(liquidity_delta.unsigned_abs()),
                available: U256::from(current),
            }
        })?;

        let adding = liquidity_delta > 0;
        let magnitude = liquidity_delta.unsigned_abs();
        let sqrt_lower = get_sqrt_ratio_at_tick(tick_lower)?;
        let sqrt_upper = get_sqrt_ratio_at_tick(tick_upper)?;

        let (amount0, amount1) = if self.tick < tick_lower {
            (
                get_amount0_delta(sqrt_lower, sqrt_upper, magnitude, adding)?,
                U256::ZERO,
            )
        } else if self.tick < tick_upper {
            (
                get_amount0_delta(self.sqrt_price_x96, sqrt_upper, magnitude, adding)?,
                get_amount1_delta(sqrt_lower, self.sqrt_price_x96, magnitude, adding)?,
            )
        } else {
            (
                U256::ZERO,
                get_amount1_delta(sqrt_lower, sqrt_upper, magnitude, adding)?,
            )
        };

        // Validate everything before the first write
        let active = if self.tick >= tick_lower && self.tick < tick_upper {
            Some(apply_delta(self.liquidity, liquidity_delta)?)
        } else {
            None
        };

        self.update_tick(tick_lower, liquidity_delta, false)?;
        self.update_tick(tick_upper, liquidity_delta, true)?;
        if let Some(active) = active {
            self.liquidity = active;
        }
        if updated == 0 {
            self.positions.remove(&key);
        } else {
            self.positions.insert(key, updated);
        }

        Ok(BalanceDelta {
            amount0,
            amount1,
            liquidity: U256::from(magnitude),
            direction: if adding {
                LiquidityDirection::Add
            } else {
                LiquidityDirection::Remove
            },
        })
    }

    fn next_initialized_tick(&self, tick: i32, zero_for_one: bool) -> Option<(i32, TickInfo)> {
        if zero_for_one {
            self.ticks
                .range(..=tick)
                .next_back()
                .map(|(t, info)| (*t, *info))
        } else {
            self.ticks
                .range(tick.saturating_add(1)..)
                .next()
                .map(|(t, info)| (*t, *info))
        }
    }

    fn simulate(&self, zero_for_one: bool, amount_in: U256, fee: u32) -> ExchangeResult<SwapOutcome> {
        if amount_in.is_zero() {
            return Err(ExchangeError::InvalidAmount(amount_in));
        }

        let price_limit = if zero_for_one {
            MIN_SQRT_RATIO + U256::from(1)
        } else {
            MAX_SQRT_RATIO - U256::from(1)
        };

        let mut remaining = amount_in;
        let mut amount_out = U256::ZERO;
        let mut sqrt_price = self.sqrt_price_x96;
        let mut tick = self.tick;
        let mut liquidity = self.liquidity;

        while !remaining.is_zero() && sqrt_price != price_limit {
            let next = self.next_initialized_tick(tick, zero_for_one);
            let target = match next {
                Some((t, _)) => get_sqrt_ratio_at_tick(t)?,
                None => price_limit,
            };

            if liquidity > 0 {
                let step = compute_swap_step(sqrt_price, target, liquidity, remaining, fee)?;
                remaining = remaining
                    .checked_sub(step.amount_in + step.fee_amount)
                    .ok_or(ExchangeError::InvariantViolated)?;
                amount_out += step.amount_out;
                sqrt_price = step.sqrt_ratio_next_x96;
            } else {
                // Empty range: jump straight to the next boundary
                sqrt_price = target;
            }

            if sqrt_price == target {
                match next {
                    Some((t, info)) => {
                        let net = if zero_for_one {
                            info.liquidity_net
                                .checked_neg()
                                .ok_or(ExchangeError::Overflow)?
                        } else {
                            info.liquidity_net
                        };
                        liquidity = apply_delta(liquidity, net)?;
                        tick = if zero_for_one { t - 1 } else { t };
                    }
                    None => break,
                }
            } else {
                tick = get_tick_at_sqrt_ratio(sqrt_price)?;
            }
        }

        if !remaining.is_zero() {
            return Err(ExchangeError::InsufficientLiquidity);
        }
        if amount_out.is_zero() {
            return Err(ExchangeError::InsufficientOutputAmount {
                actual: U256::ZERO,
                min: U256::from(1),
            });
        }

        Ok(SwapOutcome {
            amount_out,
            sqrt_price_x96: sqrt_price,
            tick,
            liquidity,
        })
    }

    pub fn quote(&self, zero_for_one: bool, amount_in: U256, fee: u32) -> ExchangeResult<U256> {
        Ok(self.simulate(zero_for_one, amount_in, fee)?.amount_out)
    }

    pub fn swap(&mut self, zero_for_one: bool, amount_in: U256, fee: u32) -> ExchangeResult<U256> {
        let outcome = self.simulate(zero_for_one, amount_in, fee)?;
        self.sqrt_price_x96 = outcome.sqrt_price_x96;
        self.tick = outcome.tick;
        self.liquidity = outcome.liquidity;
        Ok(outcome.amount_out)
    }
}
