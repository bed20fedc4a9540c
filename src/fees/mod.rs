//! Fee tiers and per-pool dynamic fees
//!
//! Static tiers map a fee (in pips) to the tick spacing pools created with
//! that fee use. Pools registered as dynamic carry their own current fee,
//! which a designated updater moves up with observed volume.

use crate::access::Ownership;
use crate::context::CallContext;
use crate::error::{ExchangeError, ExchangeResult};
use crate::events::{EventBus, ExchangeEvent};
use crate::pool::PoolKey;

use alloy_primitives::{Address, B256, U256};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

pub use crate::math::FEE_DENOMINATOR;

/// Highest fee any pool may charge, 10%
pub const MAX_FEE: u32 = 100_000;

/// Volume-to-fee adjustment parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicFeeParams {
    /// Volume that counts as one multiplier step
    pub volume_unit: U256,
    /// Fee increase per multiplier step, in pips
    pub increment_unit: u32,
    /// Cap on the increase applied by a single update, in pips
    pub max_adjustment: u32,
}

impl Default for DynamicFeeParams {
    fn default() -> Self {
        Self {
            volume_unit: U256::from(10u64).pow(U256::from(18)),
            increment_unit: 100,
            max_adjustment: 1_000,
        }
    }
}

impl DynamicFeeParams {
    /// Fee increase for a swap volume, before the MAX_FEE clamp
    pub fn adjustment(&self, swap_volume: U256) -> u32 {
        if self.volume_unit.is_zero() {
            return 0;
        }
        let multiplier = swap_volume / self.volume_unit;
        let raw = multiplier.saturating_mul(U256::from(self.increment_unit));
        let capped = raw.min(U256::from(self.max_adjustment));
        // capped <= max_adjustment, a u32
        capped.as_limbs()[0] as u32
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DynamicFeeState {
    pub pool_id: B256,
    pub current_fee: u32,
    pub updater: Address,
}

pub struct FeeRegistry {
    ownership: Arc<Ownership>,
    events: EventBus,
    params: DynamicFeeParams,
    /// fee -> tick spacing
    tiers: DashMap<u32, i32>,
    dynamic: DashMap<B256, DynamicFeeState>,
}

impl FeeRegistry {
    pub fn new(ownership: Arc<Ownership>, events: EventBus, params: DynamicFeeParams) -> Self {
        Self {
            ownership,
            events,
            params,
            tiers: DashMap::new(),
            dynamic: DashMap::new(),
        }
    }

    pub fn params(&self) -> DynamicFeeParams {
        self.params
    }

    /// Register a static fee tier
    pub fn add_fee_configuration(
        &self,
        ctx: &CallContext,
        fee: u32,
        tick_spacing: i32,
    ) -> ExchangeResult<()> {
        self.ownership.only_owner(ctx)?;
        if fee == 0 || fee > MAX_FEE || tick_spacing <= 0 {
            return Err(ExchangeError::InvalidFeeConfiguration { fee, tick_spacing });
        }

        match self.tiers.entry(fee) {
            Entry::Occupied(_) => return Err(ExchangeError::FeeAlreadyExists(fee)),
            Entry::Vacant(slot) => {
                slot.insert(tick_spacing);
            }
        }

        info!("Fee tier added: fee={} tick_spacing={}", fee, tick_spacing);
        self.events
            .emit(ExchangeEvent::FeeConfigurationAdded { fee, tick_spacing });
        Ok(())
    }

    pub fn is_supported_fee_tier(&self, fee: u32) -> bool {
        self.tiers.contains_key(&fee)
    }

    pub fn get_tick_spacing(&self, fee: u32) -> ExchangeResult<i32> {
        self.tiers
            .get(&fee)
            .map(|spacing| *spacing)
            .ok_or(ExchangeError::FeeTierNotSupported(fee))
    }

    /// All static tiers, ordered by fee
    pub fn fee_configurations(&self) -> Vec<(u32, i32)> {
        let mut tiers: Vec<(u32, i32)> = self
            .tiers
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        tiers.sort_unstable();
        tiers
    }

    /// Active fee for a pool
    ///
    /// Dynamic pools return their current fee. Static pools return the
    /// lowest fee registered under the key's tick spacing, whatever the
    /// key's own fee is.
    // TODO: confirm whether static pools should charge key.fee instead of the
    // lowest fee sharing its spacing; callers depend on the current rule.
    pub fn get_fee(&self, key: &PoolKey) -> ExchangeResult<u32> {
        if let Some(state) = self.dynamic.get(&key.id()) {
            return Ok(state.current_fee);
        }

        self.tiers
            .iter()
            .filter(|entry| *entry.value() == key.tick_spacing)
            .map(|entry| *entry.key())
            .min()
            .ok_or(ExchangeError::FeeTierNotSupported(key.fee))
    }

    pub fn dynamic_fee_state(&self, key: &PoolKey) -> Option<DynamicFeeState> {
        self.dynamic.get(&key.id()).map(|state| state.clone())
    }

    /// Switch a pool to dynamic fees
    pub fn register_dynamic_fee_pool(
        &self,
        ctx: &CallContext,
        key: &PoolKey,
        initial_fee: u32,
        updater: Address,
    ) -> ExchangeResult<()> {
        self.ownership.only_owner(ctx)?;
        if updater == Address::ZERO || initial_fee == 0 || initial_fee > MAX_FEE {
            return Err(ExchangeError::InvalidInitialFeeOrUpdater);
        }

        let pool_id = key.id();
        match self.dynamic.entry(pool_id) {
            Entry::Occupied(_) => return Err(ExchangeError::PoolAlreadyRegistered(pool_id)),
            Entry::Vacant(slot) => {
                slot.insert(DynamicFeeState {
                    pool_id,
                    current_fee: initial_fee,
                    updater,
                });
            }
        }

        info!(
            "Dynamic fee pool registered: {} fee={} updater={}",
            pool_id, initial_fee, updater
        );
        self.events.emit(ExchangeEvent::DynamicFeePoolRegistered {
            pool_id_hash: pool_id,
            initial_fee,
            updater,
        });
        Ok(())
    }

    /// Raise a dynamic fee in proportion to observed volume, clamped at MAX_FEE
    pub fn update_fee(
        &self,
        ctx: &CallContext,
        key: &PoolKey,
        swap_volume: U256,
    ) -> ExchangeResult<u32> {
        let adjustment = self.params.adjustment(swap_volume);
        self.write_fee(ctx, key, |current| {
            Ok(current.saturating_add(adjustment).min(MAX_FEE))
        })
    }

    /// Set a dynamic fee explicitly; values above MAX_FEE are rejected
    pub fn set_dynamic_fee(&self, ctx: &CallContext, key: &PoolKey, fee: u32) -> ExchangeResult<u32> {
        self.write_fee(ctx, key, |_| {
            if fee > MAX_FEE {
                Err(ExchangeError::InvalidDynamicFee(fee))
            } else {
                Ok(fee)
            }
        })
    }

    fn write_fee<F>(&self, ctx: &CallContext, key: &PoolKey, next: F) -> ExchangeResult<u32>
    where
        F: FnOnce(u32) -> ExchangeResult<u32>,
    {
        let pool_id = key.id();
        let new_fee = {
            let mut state = self
                .dynamic
                .get_mut(&pool_id)
                .ok_or(ExchangeError::PoolNotRegistered(pool_id))?;
            if state.updater != ctx.sender {
                return Err(ExchangeError::UnauthorizedUpdater(ctx.sender));
            }
            let new_fee = next(state.current_fee)?;
            state.current_fee = new_fee;
            new_fee
        };

        debug!("Dynamic fee for {} set to {}", pool_id, new_fee);
        self.events.emit(ExchangeEvent::DynamicFeeUpdated {
            pool_id_hash: pool_id,
            updater: ctx.sender,
            new_fee,
        });
        Ok(new_fee)
    }

    /// Replace the updater of a dynamic pool
    pub fn set_fee_updater(
        &self,
        ctx: &CallContext,
        key: &PoolKey,
        new_updater: Address,
    ) -> ExchangeResult<()> {
        self.ownership.only_owner(ctx)?;
        let pool_id = key.id();
        if new_updater == Address::ZERO {
            return Err(ExchangeError::InvalidNewUpdater(new_updater));
        }

        let old = {
            let mut state = self
                .dynamic
                .get_mut(&pool_id)
                .ok_or(ExchangeError::PoolNotRegistered(pool_id))?;
            std::mem::replace(&mut state.updater, new_updater)
        };

        info!("Fee updater for {} changed {} -> {}", pool_id, old, new_updater);
        self.events.emit(ExchangeEvent::FeeUpdaterSet {
            pool_id_hash: pool_id,
            old,
            new: new_updater,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> Address {
        Address::repeat_byte(0x01)
    }

    fn updater() -> Address {
        Address::repeat_byte(0x0f)
    }

    fn registry() -> FeeRegistry {
        FeeRegistry::new(
            Arc::new(Ownership::new(owner())),
            EventBus::default(),
            DynamicFeeParams::default(),
        )
    }

    fn key(fee: u32, tick_spacing: i32) -> PoolKey {
        PoolKey::new(
            Address::repeat_byte(0xa0),
            Address::repeat_byte(0xb0),
            fee,
            tick_spacing,
            Address::ZERO,
        )
        .unwrap()
    }

    fn as_owner() -> CallContext {
        CallContext::user(owner())
    }

    fn e18(n: u64) -> U256 {
        U256::from(n) * U256::from(10u64).pow(U256::from(18))
    }

    #[test]
    fn test_add_fee_configuration() {
        let fees = registry();
        fees.add_fee_configuration(&as_owner(), 500, 10).unwrap();

        assert!(fees.is_supported_fee_tier(500));
        assert!(!fees.is_supported_fee_tier(3000));
        assert_eq!(fees.get_tick_spacing(500).unwrap(), 10);
        assert!(matches!(
            fees.get_tick_spacing(3000),
            Err(ExchangeError::FeeTierNotSupported(3000))
        ));
        assert!(matches!(
            fees.add_fee_configuration(&as_owner(), 500, 60),
            Err(ExchangeError::FeeAlreadyExists(500))
        ));
    }

    #[test]
    fn test_fee_configuration_validation() {
        let fees = registry();
        for (fee, spacing) in [(0, 10), (MAX_FEE + 1, 10), (500, 0), (500, -1)] {
            assert!(matches!(
                fees.add_fee_configuration(&as_owner(), fee, spacing),
                Err(ExchangeError::InvalidFeeConfiguration { .. })
            ));
        }
        assert!(matches!(
            fees.add_fee_configuration(&CallContext::user(updater()), 500, 10),
            Err(ExchangeError::NotOwner(_))
        ));
    }

    #[test]
    fn test_static_fee_is_lowest_for_spacing() {
        let fees = registry();
        fees.add_fee_configuration(&as_owner(), 500, 10).unwrap();
        fees.add_fee_configuration(&as_owner(), 400, 10).unwrap();
        fees.add_fee_configuration(&as_owner(), 3000, 60).unwrap();

        assert_eq!(fees.get_fee(&key(500, 10)).unwrap(), 400);
        assert_eq!(fees.get_fee(&key(400, 10)).unwrap(), 400);
        assert_eq!(fees.get_fee(&key(3000, 60)).unwrap(), 3000);
        assert!(matches!(
            fees.get_fee(&key(10_000, 200)),
            Err(ExchangeError::FeeTierNotSupported(10_000))
        ));
        assert_eq!(
            fees.fee_configurations(),
            vec![(400, 10), (500, 10), (3000, 60)]
        );
    }

    #[test]
    fn test_register_dynamic_pool_once() {
        let fees = registry();
        let events = fees.events.clone();
        let mut rx = events.subscribe();
        let k = key(3000, 60);

        fees.register_dynamic_fee_pool(&as_owner(), &k, 3000, updater())
            .unwrap();
        assert_eq!(fees.get_fee(&k).unwrap(), 3000);
        assert_eq!(
            rx.try_recv().unwrap(),
            ExchangeEvent::DynamicFeePoolRegistered {
                pool_id_hash: k.id(),
                initial_fee: 3000,
                updater: updater(),
            }
        );

        assert!(matches!(
            fees.register_dynamic_fee_pool(&as_owner(), &k, 3000, updater()),
            Err(ExchangeError::PoolAlreadyRegistered(id)) if id == k.id()
        ));
    }

    #[test]
    fn test_register_dynamic_pool_validation() {
        let fees = registry();
        let k = key(3000, 60);
        for (fee, who) in [(3000, Address::ZERO), (0, updater()), (MAX_FEE + 1, updater())] {
            assert!(matches!(
                fees.register_dynamic_fee_pool(&as_owner(), &k, fee, who),
                Err(ExchangeError::InvalidInitialFeeOrUpdater)
            ));
        }
    }

    #[test]
    fn test_update_fee_by_volume() {
        let fees = registry();
        let k = key(3000, 60);
        fees.register_dynamic_fee_pool(&as_owner(), &k, 3000, updater())
            .unwrap();
        let ctx = CallContext::user(updater());

        // 5 units of volume -> +500 pips
        assert_eq!(fees.update_fee(&ctx, &k, e18(5)).unwrap(), 3500);
        // Large volume is capped by max_adjustment
        assert_eq!(fees.update_fee(&ctx, &k, e18(1_000)).unwrap(), 4500);
        // Sub-unit volume does nothing
        assert_eq!(fees.update_fee(&ctx, &k, e18(1) - U256::from(1)).unwrap(), 4500);
    }

    #[test]
    fn test_update_fee_clamps_at_max() {
        let fees = registry();
        let k = key(3000, 60);
        fees.register_dynamic_fee_pool(&as_owner(), &k, MAX_FEE - 10, updater())
            .unwrap();

        let fee = fees
            .update_fee(&CallContext::user(updater()), &k, e18(100))
            .unwrap();
        assert_eq!(fee, MAX_FEE);
    }

    #[test]
    fn test_update_fee_authorization() {
        let fees = registry();
        let k = key(3000, 60);
        let stranger = CallContext::user(Address::repeat_byte(0x99));

        assert!(matches!(
            fees.update_fee(&stranger, &k, e18(1)),
            Err(ExchangeError::PoolNotRegistered(_))
        ));

        fees.register_dynamic_fee_pool(&as_owner(), &k, 3000, updater())
            .unwrap();
        assert!(matches!(
            fees.update_fee(&stranger, &k, e18(1)),
            Err(ExchangeError::UnauthorizedUpdater(a)) if a == stranger.sender
        ));
        assert_eq!(fees.get_fee(&k).unwrap(), 3000);
    }

    #[test]
    fn test_set_dynamic_fee_rejects_above_max() {
        let fees = registry();
        let k = key(3000, 60);
        fees.register_dynamic_fee_pool(&as_owner(), &k, 3000, updater())
            .unwrap();
        let ctx = CallContext::user(updater());

        assert_eq!(fees.set_dynamic_fee(&ctx, &k, 1200).unwrap(), 1200);
        assert!(matches!(
            fees.set_dynamic_fee(&ctx, &k, MAX_FEE + 1),
            Err(ExchangeError::InvalidDynamicFee(_))
        ));
        assert_eq!(fees.get_fee(&k).unwrap(), 1200);
    }

    #[test]
    fn test_set_fee_updater() {
        let fees = registry();
        let k = key(3000, 60);
        let next = Address::repeat_byte(0x0e);

        assert!(matches!(
            fees.set_fee_updater(&as_owner(), &k, next),
            Err(ExchangeError::PoolNotRegistered(_))
        ));

        fees.register_dynamic_fee_pool(&as_owner(), &k, 3000, updater())
            .unwrap();
        assert!(matches!(
            fees.set_fee_updater(&as_owner(), &k, Address::ZERO),
            Err(ExchangeError::InvalidNewUpdater(_))
        ));
        fees.set_fee_updater(&as_owner(), &k, next).unwrap();

        assert!(fees
            .update_fee(&CallContext::user(updater()), &k, e18(1))
            .is_err());
        assert!(fees.update_fee(&CallContext::user(next), &k, e18(1)).is_ok());
        assert_eq!(fees.dynamic_fee_state(&k).unwrap().updater, next);
    }
}
