use super::full_math::{div_rounding_up, mul_div, mul_div_rounding_up};
use super::Q96;
use crate::error::{ExchangeError, ExchangeResult};

use alloy_primitives::U256;

fn ordered(a: U256, b: U256) -> (U256, U256) {
    if a > b {
        (b, a)
    } else {
        (a, b)
    }
}

/// Token0 needed to move between two prices at constant liquidity
/// delta_x = L * (sqrt_upper - sqrt_lower) / (sqrt_upper * sqrt_lower)
pub fn get_amount0_delta(
    sqrt_ratio_a_x96: U256,
    sqrt_ratio_b_x96: U256,
    liquidity: u128,
    round_up: bool,
) -> ExchangeResult<U256> {
    let (lower, upper) = ordered(sqrt_ratio_a_x96, sqrt_ratio_b_x96);
    if lower.is_zero() {
        return Err(ExchangeError::DivisionByZero);
    }

    let numerator1: U256 = U256::from(liquidity) << 96usize;
    let numerator2 = upper - lower;

    if round_up {
        div_rounding_up(mul_div_rounding_up(numerator1, numerator2, upper)?, lower)
    } else {
        Ok(mul_div(numerator1, numerator2, upper)? / lower)
    }
}

/// Token1 needed to move between two prices at constant liquidity
/// delta_y = L * (sqrt_upper - sqrt_lower)
pub fn get_amount1_delta(
    sqrt_ratio_a_x96: U256,
    sqrt_ratio_b_x96: U256,
    liquidity: u128,
    round_up: bool,
) -> ExchangeResult<U256> {
    let (lower, upper) = ordered(sqrt_ratio_a_x96, sqrt_ratio_b_x96);
    if round_up {
        mul_div_rounding_up(U256::from(liquidity), upper - lower, Q96)
    } else {
        mul_div(U256::from(liquidity), upper - lower, Q96)
    }
}

/// Price after adding `amount_in` of the input token
pub fn get_next_sqrt_price_from_input(
    sqrt_price_x96: U256,
    liquidity: u128,
    amount_in: U256,
    zero_for_one: bool,
) -> ExchangeResult<U256> {
    if sqrt_price_x96.is_zero() || liquidity == 0 {
        return Err(ExchangeError::InsufficientLiquidity);
    }
    if zero_for_one {
        next_price_from_amount0_rounding_up(sqrt_price_x96, liquidity, amount_in, true)
    } else {
        next_price_from_amount1_rounding_down(sqrt_price_x96, liquidity, amount_in, true)
    }
}

/// Price after removing `amount_out` of the output token
pub fn get_next_sqrt_price_from_output(
    sqrt_price_x96: U256,
    liquidity: u128,
    amount_out: U256,
    zero_for_one: bool,
) -> ExchangeResult<U256> {
    if sqrt_price_x96.is_zero() || liquidity == 0 {
        return Err(ExchangeError::InsufficientLiquidity);
    }
    if zero_for_one {
        next_price_from_amount1_rounding_down(sqrt_price_x96, liquidity, amount_out, false)
    } else {
        next_price_from_amount0_rounding_up(sqrt_price_x96, liquidity, amount_out, false)
    }
}

// sqrt_next = L * sqrt / (L +- amount * sqrt)
fn next_price_from_amount0_rounding_up(
    sqrt_price_x96: U256,
    liquidity: u128,
    amount: U256,
    add: bool,
) -> ExchangeResult<U256> {
    if amount.is_zero() {
        return Ok(sqrt_price_x96);
    }
    let numerator1: U256 = U256::from(liquidity) << 96usize;
    let product = amount
        .checked_mul(sqrt_price_x96)
        .ok_or(ExchangeError::Overflow)?;

    let denominator = if add {
        numerator1
            .checked_add(product)
            .ok_or(ExchangeError::Overflow)?
    } else {
        if numerator1 <= product {
            return Err(ExchangeError::InsufficientLiquidity);
        }
        numerator1 - product
    };

    mul_div_rounding_up(numerator1, sqrt_price_x96, denominator)
}

// sqrt_next = sqrt +- amount / L
fn next_price_from_amount1_rounding_down(
    sqrt_price_x96: U256,
    liquidity: u128,
    amount: U256,
    add: bool,
) -> ExchangeResult<U256> {
    let liquidity = U256::from(liquidity);
    if add {
        let quotient = mul_div(amount, Q96, liquidity)?;
        sqrt_price_x96
            .checked_add(quotient)
            .ok_or(ExchangeError::Overflow)
    } else {
        let quotient = mul_div_rounding_up(amount, Q96, liquidity)?;
        if sqrt_price_x96 <= quotient {
            return Err(ExchangeError::InsufficientLiquidity);
        }
        Ok(sqrt_price_x96 - quotient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const L: u128 = 1_000_000_000_000_000_000;

    #[test]
    fn test_amount_deltas_are_order_independent() {
        let a = Q96;
        let b = Q96 * U256::from(11) / U256::from(10);
        assert_eq!(
            get_amount0_delta(a, b, L, true).unwrap(),
            get_amount0_delta(b, a, L, true).unwrap()
        );
        assert_eq!(
            get_amount1_delta(a, b, L, false).unwrap(),
            get_amount1_delta(b, a, L, false).unwrap()
        );
    }

    #[test]
    fn test_amount1_delta_unit_move() {
        // Price 1 -> 4 means sqrt 1 -> 2: delta_y = L * 1
        let d = get_amount1_delta(Q96, Q96 * U256::from(2), L, false).unwrap();
        assert_eq!(d, U256::from(L));
        // delta_x = L * (2 - 1) / (2 * 1) = L / 2
        let d = get_amount0_delta(Q96, Q96 * U256::from(2), L, false).unwrap();
        assert_eq!(d, U256::from(L / 2));
    }

    #[test]
    fn test_rounding_up_never_below_down() {
        let a = Q96;
        let b = Q96 * U256::from(1001) / U256::from(1000);
        let up = get_amount0_delta(a, b, 12_345_678, true).unwrap();
        let down = get_amount0_delta(a, b, 12_345_678, false).unwrap();
        assert!(up >= down);
        assert!(up - down <= U256::from(1));
    }

    #[test]
    fn test_next_price_direction() {
        let amount = U256::from(1_000_000_000_000_000u64);
        let down = get_next_sqrt_price_from_input(Q96, L, amount, true).unwrap();
        let up = get_next_sqrt_price_from_input(Q96, L, amount, false).unwrap();
        assert!(down < Q96);
        assert!(up > Q96);
        assert_eq!(get_next_sqrt_price_from_input(Q96, L, U256::ZERO, true).unwrap(), Q96);
        // Adding L of token0 at price 1 halves the sqrt price
        assert_eq!(
            get_next_sqrt_price_from_input(Q96, L, U256::from(L), true).unwrap(),
            Q96 / U256::from(2)
        );
    }

    #[test]
    fn test_output_exceeding_reserves_fails() {
        // Removing more token1 than the range holds underflows the price
        let too_much = U256::from(L) * U256::from(2);
        assert!(get_next_sqrt_price_from_output(Q96, L, too_much, true).is_err());
        assert!(matches!(
            get_next_sqrt_price_from_input(Q96, 0, U256::from(1), true),
            Err(ExchangeError::InsufficientLiquidity)
        ));
    }
}
