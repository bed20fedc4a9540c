use super::full_math::{mul_div, mul_div_rounding_up};
use super::sqrt_price_math::{get_amount0_delta, get_amount1_delta, get_next_sqrt_price_from_input};
use super::FEE_DENOMINATOR;
use crate::error::ExchangeResult;

use alloy_primitives::U256;

/// Result of swapping within one initialized-tick interval
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwapStep {
    /// Price after this step
    pub sqrt_ratio_next_x96: U256,
    /// Input consumed, excluding the fee
    pub amount_in: U256,
    pub amount_out: U256,
    pub fee_amount: U256,
}

/// Exact-input swap step from the current price towards `sqrt_ratio_target_x96`
///
/// Stops at the target when the remaining input is enough to reach it,
/// otherwise consumes all of `amount_remaining` and lands in between.
pub fn compute_swap_step(
    sqrt_ratio_current_x96: U256,
    sqrt_ratio_target_x96: U256,
    liquidity: u128,
    amount_remaining: U256,
    fee_pips: u32,
) -> ExchangeResult<SwapStep> {
    let zero_for_one = sqrt_ratio_current_x96 >= sqrt_ratio_target_x96;
    let fee = U256::from(fee_pips);
    let denominator = U256::from(FEE_DENOMINATOR);

    let amount_remaining_less_fee = mul_div(amount_remaining, denominator - fee, denominator)?;

    let max_in = if zero_for_one {
        get_amount0_delta(sqrt_ratio_target_x96, sqrt_ratio_current_x96, liquidity, true)?
    } else {
        get_amount1_delta(sqrt_ratio_current_x96, sqrt_ratio_target_x96, liquidity, true)?
    };

    let sqrt_ratio_next_x96 = if amount_remaining_less_fee >= max_in {
        sqrt_ratio_target_x96
    } else {
        get_next_sqrt_price_from_input(
            sqrt_ratio_current_x96,
            liquidity,
            amount_remaining_less_fee,
            zero_for_one,
        )?
    };

    let reached_target = sqrt_ratio_next_x96 == sqrt_ratio_target_x96;

    let (amount_in, amount_out) = if zero_for_one {
        let amount_in = if reached_target {
            max_in
        } else {
            get_amount0_delta(sqrt_ratio_next_x96, sqrt_ratio_current_x96, liquidity, true)?
        };
        let amount_out =
            get_amount1_delta(sqrt_ratio_next_x96, sqrt_ratio_current_x96, liquidity, false)?;
        (amount_in, amount_out)
    } else {
        let amount_in = if reached_target {
            max_in
        } else {
            get_amount1_delta(sqrt_ratio_current_x96, sqrt_ratio_next_x96, liquidity, true)?
        };
        let amount_out =
            get_amount0_delta(sqrt_ratio_current_x96, sqrt_ratio_next_x96, liquidity, false)?;
        (amount_in, amount_out)
    };

    let fee_amount = if !reached_target {
        // Whatever input was not converted is the fee
        amount_remaining.saturating_sub(amount_in)
    } else {
        mul_div_rounding_up(amount_in, fee, denominator - fee)?
    };

    Ok(SwapStep {
        sqrt_ratio_next_x96,
        amount_in,
        amount_out,
        fee_amount,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Q96;

    const L: u128 = 1_000_000_000_000_000_000;

    #[test]
    fn test_partial_step_consumes_all_input() {
        let target = Q96 * U256::from(2);
        let amount = U256::from(1_000_000_000u64);
        let step = compute_swap_step(Q96, target, L, amount, 3000).unwrap();

        assert!(step.sqrt_ratio_next_x96 < target);
        assert!(step.sqrt_ratio_next_x96 > Q96);
        assert_eq!(step.amount_in + step.fee_amount, amount);
        // Price ~1, so output is close to input less fee
        assert!(step.amount_out < amount);
        assert!(step.amount_out > amount * U256::from(99) / U256::from(100));
    }

    #[test]
    fn test_step_stops_at_target() {
        let target = Q96 * U256::from(101) / U256::from(100);
        let amount = U256::from(L) * U256::from(10);
        let step = compute_swap_step(Q96, target, L, amount, 500).unwrap();

        assert_eq!(step.sqrt_ratio_next_x96, target);
        assert!(step.amount_in + step.fee_amount < amount);
    }

    #[test]
    fn test_zero_for_one_moves_price_down() {
        let target = Q96 / U256::from(2);
        let step = compute_swap_step(Q96, target, L, U256::from(1_000_000u64), 500).unwrap();
        assert!(step.sqrt_ratio_next_x96 < Q96);
        assert!(step.sqrt_ratio_next_x96 > target);
        assert!(step.amount_out > U256::ZERO);
    }

    #[test]
    fn test_fee_scales_with_tier() {
        let target = Q96 * U256::from(2);
        let amount = U256::from(10_000_000u64);
        let low = compute_swap_step(Q96, target, L, amount, 500).unwrap();
        let high = compute_swap_step(Q96, target, L, amount, 10_000).unwrap();
        assert!(high.fee_amount > low.fee_amount);
        assert!(high.amount_out < low.amount_out);
    }
}
