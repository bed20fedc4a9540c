use crate::error::{ExchangeError, ExchangeResult};

use alloy_primitives::{keccak256, Address, B256};
use alloy_sol_types::SolValue;
use serde::{Deserialize, Serialize};

/// Identity of a pool: sorted pair, fee tier, tick spacing and hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolKey {
    pub currency0: Address,
    pub currency1: Address,
    pub fee: u32,
    pub tick_spacing: i32,
    pub hooks: Address,
}

impl PoolKey {
    /// Build a canonical key, ordering the pair by address bytes
    pub fn new(
        token_a: Address,
        token_b: Address,
        fee: u32,
        tick_spacing: i32,
        hooks: Address,
    ) -> ExchangeResult<Self> {
        let (currency0, currency1) = sort_tokens(token_a, token_b)?;
        Ok(Self {
            currency0,
            currency1,
            fee,
            tick_spacing,
            hooks,
        })
    }

    /// keccak256(abi.encode(currency0, currency1, fee, tickSpacing, hooks))
    pub fn id(&self) -> B256 {
        let encoded = (
            self.currency0,
            self.currency1,
            self.fee,
            self.tick_spacing,
            self.hooks,
        )
            .abi_encode();
        keccak256(encoded)
    }

    /// Custody address of the pool, the low 20 bytes of its id
    pub fn pool_ref(&self) -> Address {
        Address::from_word(self.id())
    }

    pub fn contains(&self, token: Address) -> bool {
        token == self.currency0 || token == self.currency1
    }

    /// Swap direction for `token_in`
    pub fn zero_for_one(&self, token_in: Address) -> ExchangeResult<bool> {
        if token_in == self.currency0 {
            Ok(true)
        } else if token_in == self.currency1 {
            Ok(false)
        } else {
            Err(ExchangeError::InvalidInputToken(token_in))
        }
    }

    /// The other side of the pair
    pub fn counterpart(&self, token: Address) -> ExchangeResult<Address> {
        Ok(if self.zero_for_one(token)? {
            self.currency1
        } else {
            self.currency0
        })
    }
}

/// Order two distinct non-zero tokens by address
pub fn sort_tokens(token_a: Address, token_b: Address) -> ExchangeResult<(Address, Address)> {
    if token_a == Address::ZERO {
        return Err(ExchangeError::InvalidTokenAddress(token_a));
    }
    if token_b == Address::ZERO || token_a == token_b {
        return Err(ExchangeError::InvalidTokenAddress(token_b));
    }
    Ok(if token_a < token_b {
        (token_a, token_b)
    } else {
        (token_b, token_a)
    })
}
