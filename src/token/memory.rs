use super::TokenLedger;
use crate::error::{ExchangeError, ExchangeResult};

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Default)]
struct Balances {
    balances: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address), U256>,
    total_supply: U256,
}

impl Balances {
    fn debit(&mut self, account: Address, amount: U256) -> ExchangeResult<()> {
        let have = self.balances.get(&account).copied().unwrap_or_default();
        if have < amount {
            return Err(ExchangeError::InsufficientBalance { have, need: amount });
        }
        self.balances.insert(account, have - amount);
        Ok(())
    }

    fn credit(&mut self, account: Address, amount: U256) -> ExchangeResult<()> {
        let entry = self.balances.entry(account).or_default();
        *entry = entry.checked_add(amount).ok_or(ExchangeError::Overflow)?;
        Ok(())
    }
}

/// In-process token ledger
pub struct InMemoryToken {
    address: Address,
    symbol: String,
    state: Mutex<Balances>,
}

impl InMemoryToken {
    pub fn new(address: Address, symbol: impl Into<String>) -> Self {
        Self {
            address,
            symbol: symbol.into(),
            state: Mutex::new(Balances::default()),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Create new units out of thin air
    pub async fn mint(&self, to: Address, amount: U256) -> ExchangeResult<()> {
        let mut state = self.state.lock().await;
        state.credit(to, amount)?;
        state.total_supply = state
            .total_supply
            .checked_add(amount)
            .ok_or(ExchangeError::Overflow)?;
        debug!("{}: minted {} to {}", self.symbol, amount, to);
        Ok(())
    }

    pub async fn total_supply(&self) -> U256 {
        self.state.lock().await.total_supply
    }
}

#[async_trait]
impl TokenLedger for InMemoryToken {
    async fn balance_of(&self, account: Address) -> ExchangeResult<U256> {
        Ok(self
            .state
            .lock()
            .await
            .balances
            .get(&account)
            .copied()
            .unwrap_or_default())
    }

    async fn transfer(&self, from: Address, to: Address, amount: U256) -> ExchangeResult<()> {
        let mut state = self.state.lock().await;
        state.debit(from, amount)?;
        state.credit(to, amount)?;
        Ok(())
    }

    async fn transfer_from(
        &self,
        spender: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> ExchangeResult<()> {
        let mut state = self.state.lock().await;

        // Nothing is written until every check has passed
        let remaining = if spender == from {
            None
        } else {
            let allowed = state
                .allowances
                .get(&(from, spender))
                .copied()
                .unwrap_or_default();
            if allowed < amount {
                return Err(ExchangeError::TransferFailed {
                    token: self.address,
                    reason: format!(
                        "{}: allowance {} below {} for spender {}",
                        self.symbol, allowed, amount, spender
                    ),
                });
            }
            (allowed != U256::MAX).then(|| allowed - amount)
        };
        let have = state.balances.get(&from).copied().unwrap_or_default();
        if have < amount {
            return Err(ExchangeError::InsufficientBalance { have, need: amount });
        }

        state.debit(from, amount)?;
        state.credit(to, amount)?;
        if let Some(remaining) = remaining {
            state.allowances.insert((from, spender), remaining);
        }
        Ok(())
    }

    async fn approve(&self, owner: Address, spender: Address, amount: U256) -> ExchangeResult<()> {
        self.state
            .lock()
            .await
            .allowances
            .insert((owner, spender), amount);
        Ok(())
    }

    async fn allowance(&self, owner: Address, spender: Address) -> ExchangeResult<U256> {
        Ok(self
            .state
            .lock()
            .await
            .allowances
            .get(&(owner, spender))
            .copied()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Address {
        Address::repeat_byte(0xa1)
    }

    fn bob() -> Address {
        Address::repeat_byte(0xb0)
    }

    #[tokio::test]
    async fn test_mint_and_transfer() {
        let token = InMemoryToken::new(Address::repeat_byte(0x70), "TKN");
        token.mint(alice(), U256::from(100)).await.unwrap();

        token.transfer(alice(), bob(), U256::from(40)).await.unwrap();
        assert_eq!(token.balance_of(alice()).await.unwrap(), U256::from(60));
        assert_eq!(token.balance_of(bob()).await.unwrap(), U256::from(40));
        assert_eq!(token.total_supply().await, U256::from(100));

        let err = token
            .transfer(bob(), alice(), U256::from(41))
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::InsufficientBalance { .. }));
    }

    #[tokio::test]
    async fn test_transfer_from_consumes_allowance() {
        let token = InMemoryToken::new(Address::repeat_byte(0x70), "TKN");
        let spender = Address::repeat_byte(0x5e);
        token.mint(alice(), U256::from(100)).await.unwrap();

        assert!(token
            .transfer_from(spender, alice(), bob(), U256::from(10))
            .await
            .is_err());

        token.approve(alice(), spender, U256::from(30)).await.unwrap();
        token
            .transfer_from(spender, alice(), bob(), U256::from(25))
            .await
            .unwrap();
        assert_eq!(token.allowance(alice(), spender).await.unwrap(), U256::from(5));
        assert_eq!(token.balance_of(bob()).await.unwrap(), U256::from(25));
    }

    #[tokio::test]
    async fn test_unlimited_allowance_is_not_decremented() {
        let token = InMemoryToken::new(Address::repeat_byte(0x70), "TKN");
        let spender = Address::repeat_byte(0x5e);
        token.mint(alice(), U256::from(100)).await.unwrap();
        token.approve(alice(), spender, U256::MAX).await.unwrap();

        token
            .transfer_from(spender, alice(), bob(), U256::from(50))
            .await
            .unwrap();
        assert_eq!(token.allowance(alice(), spender).await.unwrap(), U256::MAX);
    }

    #[tokio::test]
    async fn test_failed_pull_keeps_allowance() {
        let token = InMemoryToken::new(Address::repeat_byte(0x70), "TKN");
        let spender = Address::repeat_byte(0x5e);
        token.mint(alice(), U256::from(100)).await.unwrap();
        token.approve(alice(), spender, U256::from(500)).await.unwrap();

        let err = token
            .transfer_from(spender, alice(), bob(), U256::from(300))
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::InsufficientBalance { .. }));
        assert_eq!(token.allowance(alice(), spender).await.unwrap(), U256::from(500));
        assert_eq!(token.balance_of(alice()).await.unwrap(), U256::from(100));
        assert_eq!(token.balance_of(bob()).await.unwrap(), U256::ZERO);
    }
}
