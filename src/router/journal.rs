//! Per-call undo log
//!
//! Every token movement and the first mutation of each pool in a call are
//! recorded. On failure the entries are undone newest first: transfers are
//! compensated with the reverse transfer, pulls also hand the consumed
//! allowance back to the spender, pools are restored from their snapshot.

use crate::error::ExchangeResult;
use crate::pool::{Pool, PoolManager};
use crate::token::{TokenLedger, TokenRegistry};

use alloy_primitives::{Address, B256, U256};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error};

enum JournalEntry {
    Transfer {
        ledger: Arc<dyn TokenLedger>,
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
        /// Set for pulls made against an allowance
        spender: Option<Address>,
    },
    Pool(Box<Pool>),
}

#[derive(Default)]
pub struct Journal {
    entries: Vec<JournalEntry>,
    snapshotted: HashSet<B256>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Engine-initiated transfer
    pub async fn transfer(
        &mut self,
        tokens: &TokenRegistry,
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> ExchangeResult<()> {
        if amount.is_zero() || from == to {
            return Ok(());
        }
        let ledger = tokens.get(token)?;
        ledger.transfer(from, to, amount).await?;
        self.entries.push(JournalEntry::Transfer {
            ledger,
            token,
            from,
            to,
            amount,
            spender: None,
        });
        Ok(())
    }

    /// Pull from a user against the spender's allowance
    pub async fn transfer_from(
        &mut self,
        tokens: &TokenRegistry,
        token: Address,
        spender: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> ExchangeResult<()> {
        if amount.is_zero() {
            return Ok(());
        }
        let ledger = tokens.get(token)?;
        ledger.transfer_from(spender, from, to, amount).await?;
        self.entries.push(JournalEntry::Transfer {
            ledger,
            token,
            from,
            to,
            amount,
            spender: (spender != from).then_some(spender),
        });
        Ok(())
    }

    /// Record a pool's state before the call first touches it
    pub fn snapshot_pool(&mut self, pools: &PoolManager, pool_id: B256) -> ExchangeResult<()> {
        if self.snapshotted.insert(pool_id) {
            let snapshot = pools.snapshot(pool_id)?;
            self.entries.push(JournalEntry::Pool(Box::new(snapshot)));
        }
        Ok(())
    }

    /// Keep every effect
    pub fn commit(self) {
        debug!("Committed {} journal entries", self.entries.len());
    }

    /// Undo every recorded effect, newest first
    pub async fn rollback(self, pools: &PoolManager) {
        debug!("Rolling back {} journal entries", self.entries.len());
        for entry in self.entries.into_iter().rev() {
            match entry {
                JournalEntry::Transfer {
                    ledger,
                    token,
                    from,
                    to,
                    amount,
                    spender,
                } => {
                    if let Err(e) = ledger.transfer(to, from, amount).await {
                        error!(
                            "Failed to compensate transfer of {} {} from {} to {}: {}",
                            amount, token, from, to, e
                        );
                    }
                    if let Some(spender) = spender {
                        if let Err(e) = restore_allowance(ledger.as_ref(), from, spender, amount).await {
                            error!(
                                "Failed to restore allowance of {} on {} for {}: {}",
                                spender, token, from, e
                            );
                        }
                    }
                }
                JournalEntry::Pool(snapshot) => pools.restore(*snapshot),
            }
        }
    }
}

/// Give back allowance consumed by a reverted pull; unlimited approvals were never spent
async fn restore_allowance(
    ledger: &dyn TokenLedger,
    owner: Address,
    spender: Address,
    amount: U256,
) -> ExchangeResult<()> {
    let current = ledger.allowance(owner, spender).await?;
    if current == U256::MAX {
        return Ok(());
    }
    ledger
        .approve(owner, spender, current.saturating_add(amount))
        .await
}
