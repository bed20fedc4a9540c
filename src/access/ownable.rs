//! Single-owner authorization

use crate::context::CallContext;
use crate::error::{ExchangeError, ExchangeResult};
use crate::events::{EventBus, ExchangeEvent};

use alloy_primitives::Address;
use std::sync::{PoisonError, RwLock};
use tracing::info;

/// Holds the owner account and checks owner-only calls
pub struct Ownership {
    owner: RwLock<Address>,
}

impl Ownership {
    pub fn new(owner: Address) -> Self {
        Self {
            owner: RwLock::new(owner),
        }
    }

    /// Current owner
    pub fn owner(&self) -> Address {
        *self.owner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reject unless the immediate caller is the owner
    pub fn only_owner(&self, ctx: &CallContext) -> ExchangeResult<()> {
        if ctx.sender != self.owner() {
            return Err(ExchangeError::NotOwner(ctx.sender));
        }
        Ok(())
    }

    /// Hand ownership to a new non-zero account
    pub fn transfer_ownership(
        &self,
        ctx: &CallContext,
        new_owner: Address,
        events: &EventBus,
    ) -> ExchangeResult<()> {
        self.only_owner(ctx)?;
        if new_owner == Address::ZERO {
            return Err(ExchangeError::InvalidRecipient(new_owner));
        }

        let previous_owner = {
            let mut owner = self.owner.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *owner, new_owner)
        };

        info!("Ownership transferred from {} to {}", previous_owner, new_owner);
        events.emit(ExchangeEvent::OwnershipTransferred {
            previous_owner,
            new_owner,
        });
        Ok(())
    }
}
