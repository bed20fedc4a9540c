//! Fixed-point AMM math on 256-bit integers
//!
//! - `full_math`: mul/div with 512-bit intermediates, integer sqrt
//! - `tick_math`: tick <-> Q64.96 price
//! - `sqrt_price_math`: token deltas for price moves
//! - `swap_math`: one concentrated-liquidity swap step

pub mod full_math;
pub mod sqrt_price_math;
pub mod swap_math;
pub mod tick_math;

use alloy_primitives::U256;

/// 2^96, the unit of Q64.96 prices
pub const Q96: U256 = U256::from_limbs([0, 1 << 32, 0, 0]);

/// Fees are expressed in pips: 1_000_000 = 100%, 500 = 0.05%
pub const FEE_DENOMINATOR: u32 = 1_000_000;

pub use full_math::{mul_div, sqrt};
pub use tick_math::{MAX_TICK, MIN_TICK};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_q96() {
        assert_eq!(Q96, U256::from(1u128 << 96));
    }
}
