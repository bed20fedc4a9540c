//! 256-bit multiply/divide helpers with 512-bit intermediates

use crate::error::{ExchangeError, ExchangeResult};

use alloy_primitives::{U256, U512};

fn widen(x: U256) -> U512 {
    let l = x.as_limbs();
    U512::from_limbs([l[0], l[1], l[2], l[3], 0, 0, 0, 0])
}

fn narrow(x: U512) -> ExchangeResult<U256> {
    let l = x.as_limbs();
    if l[4..].iter().any(|limb| *limb != 0) {
        return Err(ExchangeError::Overflow);
    }
    Ok(U256::from_limbs([l[0], l[1], l[2], l[3]]))
}

/// floor(a * b / denominator) without intermediate overflow
pub fn mul_div(a: U256, b: U256, denominator: U256) -> ExchangeResult<U256> {
    if denominator.is_zero() {
        return Err(ExchangeError::DivisionByZero);
    }
    let product = widen(a)
        .checked_mul(widen(b))
        .ok_or(ExchangeError::Overflow)?;
    narrow(product / widen(denominator))
}

/// ceil(a * b / denominator) without intermediate overflow
pub fn mul_div_rounding_up(a: U256, b: U256, denominator: U256) -> ExchangeResult<U256> {
    if denominator.is_zero() {
        return Err(ExchangeError::DivisionByZero);
    }
    let product = widen(a)
        .checked_mul(widen(b))
        .ok_or(ExchangeError::Overflow)?;
    let d = widen(denominator);
    let quotient = narrow(product / d)?;
    if (product % d).is_zero() {
        Ok(quotient)
    } else {
        quotient.checked_add(U256::from(1)).ok_or(ExchangeError::Overflow)
    }
}

/// ceil(a / b)
pub fn div_rounding_up(a: U256, b: U256) -> ExchangeResult<U256> {
    if b.is_zero() {
        return Err(ExchangeError::DivisionByZero);
    }
    let quotient = a / b;
    if (a % b).is_zero() {
        Ok(quotient)
    } else {
        Ok(quotient + U256::from(1))
    }
}

/// Integer square root (Babylonian method), floor
pub fn sqrt(y: U256) -> U256 {
    if y > U256::from(3) {
        let mut z = y;
        let mut x = y / U256::from(2) + U256::from(1);
        while x < z {
            z = x;
            x = (y / x + x) / U256::from(2);
        }
        z
    } else if !y.is_zero() {
        U256::from(1)
    } else {
        U256::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mul_div_basic() {
        let r = mul_div(U256::from(100), U256::from(200), U256::from(50)).unwrap();
        assert_eq!(r, U256::from(400));
    }

    #[test]
    fn test_mul_div_wide_intermediate() {
        // MAX * MAX / MAX needs the full 512-bit product
        let r = mul_div(U256::MAX, U256::MAX, U256::MAX).unwrap();
        assert_eq!(r, U256::MAX);

        let half = U256::MAX / U256::from(2);
        let r = mul_div(half, U256::from(4), U256::from(8)).unwrap();
        assert_eq!(r, half / U256::from(2));
    }

    #[test]
    fn test_mul_div_overflow_and_zero() {
        assert!(matches!(
            mul_div(U256::MAX, U256::from(2), U256::from(1)),
            Err(ExchangeError::Overflow)
        ));
        assert!(matches!(
            mul_div(U256::from(1), U256::from(1), U256::ZERO),
            Err(ExchangeError::DivisionByZero)
        ));
    }

    #[test]
    fn test_rounding_up() {
        assert_eq!(
            mul_div_rounding_up(U256::from(10), U256::from(10), U256::from(3)).unwrap(),
            U256::from(34)
        );
        assert_eq!(
            mul_div_rounding_up(U256::from(10), U256::from(9), U256::from(3)).unwrap(),
            U256::from(30)
        );
        assert_eq!(div_rounding_up(U256::from(7), U256::from(2)).unwrap(), U256::from(4));
        assert_eq!(div_rounding_up(U256::from(8), U256::from(2)).unwrap(), U256::from(4));
    }

    #[test]
    fn test_sqrt() {
        assert_eq!(sqrt(U256::ZERO), U256::ZERO);
        assert_eq!(sqrt(U256::from(1)), U256::from(1));
        assert_eq!(sqrt(U256::from(3)), U256::from(1));
        assert_eq!(sqrt(U256::from(4)), U256::from(2));
        assert_eq!(sqrt(U256::from(99)), U256::from(9));

        let e18 = U256::from(10u64).pow(U256::from(18));
        // sqrt(1000e18 * 10000e18) = 100e18 * sqrt(1000) floored at 1e18 scale
        let root = sqrt(U256::from(1000) * e18 * U256::from(10000) * e18);
        assert!(root * root <= U256::from(10_000_000) * e18 * e18);
        let next = root + U256::from(1);
        assert!(next * next > U256::from(10_000_000) * e18 * e18);
    }
}
