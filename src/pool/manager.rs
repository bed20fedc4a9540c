use super::{
    BalanceDelta, ConcentratedPool, ConstantProductPool, LiquidityChange, LiquidityDirection,
    Pool, PoolHooks, PoolKey, PoolKind, PoolState, SwapParams,
};
use crate::access::Ownership;
use crate::context::CallContext;
use crate::error::{ExchangeError, ExchangeResult};
use crate::events::{EventBus, ExchangeEvent};
use crate::fees::FeeRegistry;

use alloy_primitives::{Address, B256, U256};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Pool registry and factory
///
/// Owns every pool's state. Mutations on one pool hold that pool's map
/// shard for the duration of the state change only; hooks run outside it.
pub struct PoolManager {
    pools: DashMap<B256, Pool>,
    /// (currency0, currency1, fee) -> pool id
    by_pair: DashMap<(Address, Address, u32), B256>,
    hooks: DashMap<Address, Arc<dyn PoolHooks>>,
    fees: Arc<FeeRegistry>,
    ownership: Arc<Ownership>,
    events: EventBus,
}

impl PoolManager {
    pub fn new(fees: Arc<FeeRegistry>, ownership: Arc<Ownership>, events: EventBus) -> Self {
        Self {
            pools: DashMap::new(),
            by_pair: DashMap::new(),
            hooks: DashMap::new(),
            fees,
            ownership,
            events,
        }
    }

    pub fn fees(&self) -> &Arc<FeeRegistry> {
        &self.fees
    }

    /// Make a hooks implementation referencable from pool keys
    pub fn register_hooks(
        &self,
        ctx: &CallContext,
        address: Address,
        hooks: Arc<dyn PoolHooks>,
    ) -> ExchangeResult<()> {
        self.ownership.only_owner(ctx)?;
        if address == Address::ZERO {
            return Err(ExchangeError::HooksNotRegistered(address));
        }
        self.hooks.insert(address, hooks);
        info!("Hooks registered at {}", address);
        Ok(())
    }

    /// Create a pool for a supported fee tier
    pub fn create_pool(
        &self,
        ctx: &CallContext,
        token_a: Address,
        token_b: Address,
        fee: u32,
        hooks: Address,
        kind: PoolKind,
    ) -> ExchangeResult<PoolKey> {
        self.ownership.only_owner(ctx)?;
        let tick_spacing = self.fees.get_tick_spacing(fee)?;
        if hooks != Address::ZERO && !self.hooks.contains_key(&hooks) {
            return Err(ExchangeError::HooksNotRegistered(hooks));
        }

        let key = PoolKey::new(token_a, token_b, fee, tick_spacing, hooks)?;
        let id = key.id();
        let pair = (key.currency0, key.currency1, fee);

        let state = match kind {
            PoolKind::ConstantProduct => PoolState::ConstantProduct(ConstantProductPool::new()),
            PoolKind::Concentrated { tick } => {
                PoolState::Concentrated(ConcentratedPool::new(tick, tick_spacing)?)
            }
        };
        let pool = Pool {
            key,
            id,
            pool_ref: key.pool_ref(),
            state,
        };

        match self.by_pair.entry(pair) {
            Entry::Occupied(_) => return Err(ExchangeError::PoolAlreadyExists(id)),
            Entry::Vacant(slot) => {
                self.pools.insert(id, pool);
                slot.insert(id);
            }
        }

        info!(
            "Pool created: {} ({}/{} fee={} kind={:?})",
            id, key.currency0, key.currency1, fee, kind
        );
        self.events.emit(ExchangeEvent::PoolCreated {
            pool_id: id,
            pool_ref: key.pool_ref(),
            key,
        });
        Ok(key)
    }

    /// Custody address of a pool
    pub fn lookup(&self, pool_id: B256) -> ExchangeResult<Address> {
        self.pools
            .get(&pool_id)
            .map(|pool| pool.pool_ref)
            .ok_or(ExchangeError::PoolNotFound(pool_id))
    }

    pub fn key(&self, pool_id: B256) -> ExchangeResult<PoolKey> {
        self.pools
            .get(&pool_id)
            .map(|pool| pool.key)
            .ok_or(ExchangeError::PoolNotFound(pool_id))
    }

    /// Pool for an unordered pair and fee
    pub fn pool_for(&self, token_a: Address, token_b: Address, fee: u32) -> ExchangeResult<PoolKey> {
        let (currency0, currency1) = super::sort_tokens(token_a, token_b)?;
        match self.by_pair.get(&(currency0, currency1, fee)) {
            Some(id) => self.key(*id),
            None => {
                let spacing = self.fees.get_tick_spacing(fee).unwrap_or_default();
                let missing = PoolKey::new(currency0, currency1, fee, spacing, Address::ZERO)?;
                Err(ExchangeError::PoolNotFound(missing.id()))
            }
        }
    }

    /// Every pool trading the pair, one per fee tier
    pub fn pools_for_pair(&self, token_a: Address, token_b: Address) -> Vec<PoolKey> {
        let Ok((currency0, currency1)) = super::sort_tokens(token_a, token_b) else {
            return Vec::new();
        };
        let mut keys: Vec<PoolKey> = self
            .by_pair
            .iter()
            .filter(|entry| entry.key().0 == currency0 && entry.key().1 == currency1)
            .filter_map(|entry| self.pools.get(entry.value()).map(|pool| pool.key))
            .collect();
        keys.sort_by_key(|key| key.fee);
        keys
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    pub fn all_pools(&self) -> Vec<Pool> {
        self.pools.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Copy of a pool's full state for later `restore`
    pub fn snapshot(&self, pool_id: B256) -> ExchangeResult<Pool> {
        self.pools
            .get(&pool_id)
            .map(|pool| pool.clone())
            .ok_or(ExchangeError::PoolNotFound(pool_id))
    }

    /// Put back a snapshot taken earlier in the same call
    pub fn restore(&self, snapshot: Pool) {
        debug!("Restoring pool {}", snapshot.id);
        self.pools.insert(snapshot.id, snapshot);
    }

    fn hooks_for(&self, key: &PoolKey) -> ExchangeResult<Option<Arc<dyn PoolHooks>>> {
        if key.hooks == Address::ZERO {
            return Ok(None);
        }
        self.hooks
            .get(&key.hooks)
            .map(|hooks| Some(hooks.value().clone()))
            .ok_or(ExchangeError::HooksNotRegistered(key.hooks))
    }

    /// Output for an exact input, without mutating the pool
    pub fn quote(
        &self,
        pool_id: B256,
        token_in: Address,
        amount_in: U256,
        fee: u32,
    ) -> ExchangeResult<U256> {
        self.pools
            .get(&pool_id)
            .ok_or(ExchangeError::PoolNotFound(pool_id))?
            .quote(token_in, amount_in, fee)
    }

    /// Swap an exact input against the pool's invariant
    pub fn swap(
        &self,
        pool_id: B256,
        sender: Address,
        token_in: Address,
        amount_in: U256,
        fee: u32,
    ) -> ExchangeResult<U256> {
        let key = self.key(pool_id)?;
        let hooks = self.hooks_for(&key)?;
        let params = SwapParams {
            sender,
            zero_for_one: key.zero_for_one(token_in)?,
            amount_in,
        };

        if let Some(hooks) = &hooks {
            hooks.before_swap(&key, &params)?;
        }

        let amount_out = self
            .pools
            .get_mut(&pool_id)
            .ok_or(ExchangeError::PoolNotFound(pool_id))?
            .swap(params.zero_for_one, amount_in, fee)?;

        debug!(
            "Swap on {}: {} of {} -> {}",
            pool_id, amount_in, token_in, amount_out
        );
        if let Some(hooks) = &hooks {
            hooks.after_swap(&key, &params, amount_out);
        }
        Ok(amount_out)
    }

    /// Deposit into a constant-product pool
    pub fn mint(
        &self,
        pool_id: B256,
        owner: Address,
        amount0_desired: U256,
        amount1_desired: U256,
    ) -> ExchangeResult<BalanceDelta> {
        let change = LiquidityChange::Deposit {
            amount0_desired,
            amount1_desired,
        };
        self.modify_liquidity(pool_id, owner, change, |pool| match &mut pool.state {
            PoolState::ConstantProduct(cp) => {
                let (amount0, amount1, liquidity) =
                    cp.mint(owner, amount0_desired, amount1_desired)?;
                Ok(BalanceDelta {
                    amount0,
                    amount1,
                    liquidity,
                    direction: LiquidityDirection::Add,
                })
            }
            PoolState::Concentrated(_) => Err(ExchangeError::UnsupportedPoolOperation(pool.id)),
        })
    }

    /// Withdraw LP shares from a constant-product pool
    pub fn burn(&self, pool_id: B256, owner: Address, liquidity: U256) -> ExchangeResult<BalanceDelta> {
        let change = LiquidityChange::Withdraw { liquidity };
        self.modify_liquidity(pool_id, owner, change, |pool| match &mut pool.state {
            PoolState::ConstantProduct(cp) => {
                let (amount0, amount1) = cp.burn(owner, liquidity)?;
                Ok(BalanceDelta {
                    amount0,
                    amount1,
                    liquidity,
                    direction: LiquidityDirection::Remove,
                })
            }
            PoolState::Concentrated(_) => Err(ExchangeError::UnsupportedPoolOperation(pool.id)),
        })
    }

    /// Change a range position in a concentrated pool
    pub fn modify_position(
        &self,
        pool_id: B256,
        owner: Address,
        tick_lower: i32,
        tick_upper: i32,
        liquidity_delta: i128,
    ) -> ExchangeResult<BalanceDelta> {
        let change = LiquidityChange::Position {
            tick_lower,
            tick_upper,
            liquidity_delta,
        };
        self.modify_liquidity(pool_id, owner, change, |pool| match &mut pool.state {
            PoolState::Concentrated(cl) => {
                cl.modify_position(owner, tick_lower, tick_upper, liquidity_delta)
            }
            PoolState::ConstantProduct(_) => Err(ExchangeError::UnsupportedPoolOperation(pool.id)),
        })
    }

    fn modify_liquidity<F>(
        &self,
        pool_id: B256,
        owner: Address,
        change: LiquidityChange,
        apply: F,
    ) -> ExchangeResult<BalanceDelta>
    where
        F: FnOnce(&mut Pool) -> ExchangeResult<BalanceDelta>,
    {
        let key = self.key(pool_id)?;
        let hooks = self.hooks_for(&key)?;
        if let Some(hooks) = &hooks {
            hooks.before_modify_liquidity(&key, owner, &change)?;
        }

        let delta = {
            let mut pool = self
                .pools
                .get_mut(&pool_id)
                .ok_or(ExchangeError::PoolNotFound(pool_id))?;
            apply(pool.value_mut())?
        };

        if let Some(hooks) = &hooks {
            hooks.after_modify_liquidity(&key, owner, &change, &delta);
        }
        Ok(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fees::DynamicFeeParams;
    use crate::pool::SwapLimitHook;

    fn owner() -> Address {
        Address::repeat_byte(0x01)
    }

    fn token_a() -> Address {
        Address::repeat_byte(0xa0)
    }

    fn token_b() -> Address {
        Address::repeat_byte(0xb0)
    }

    fn manager() -> PoolManager {
        let ownership = Arc::new(Ownership::new(owner()));
        let events = EventBus::default();
        let fees = Arc::new(FeeRegistry::new(
            ownership.clone(),
            events.clone(),
            DynamicFeeParams::default(),
        ));
        let ctx = CallContext::user(owner());
        fees.add_fee_configuration(&ctx, 500, 10).unwrap();
        fees.add_fee_configuration(&ctx, 3000, 60).unwrap();
        PoolManager::new(fees, ownership, events)
    }

    #[test]
    fn test_create_and_lookup() {
        let pools = manager();
        let mut rx = pools.events.subscribe();
        let ctx = CallContext::user(owner());

        let key = pools
            .create_pool(&ctx, token_b(), token_a(), 500, Address::ZERO, PoolKind::ConstantProduct)
            .unwrap();
        assert_eq!(key.currency0, token_a());
        assert_eq!(key.tick_spacing, 10);
        assert_eq!(pools.lookup(key.id()).unwrap(), key.pool_ref());
        assert_eq!(pools.pool_for(token_a(), token_b(), 500).unwrap(), key);

        match rx.try_recv().unwrap() {
            ExchangeEvent::PoolCreated { pool_id, pool_ref, key: k } => {
                assert_eq!(pool_id, key.id());
                assert_eq!(pool_ref, key.pool_ref());
                assert_eq!(k, key);
            }
            other => panic!("unexpected event {other:?}"),
        }

        assert!(matches!(
            pools.create_pool(&ctx, token_a(), token_b(), 500, Address::ZERO, PoolKind::ConstantProduct),
            Err(ExchangeError::PoolAlreadyExists(_))
        ));
    }

    #[test]
    fn test_create_pool_checks() {
        let pools = manager();
        let ctx = CallContext::user(owner());

        assert!(matches!(
            pools.create_pool(&ctx, token_a(), token_b(), 10_000, Address::ZERO, PoolKind::ConstantProduct),
            Err(ExchangeError::FeeTierNotSupported(10_000))
        ));
        assert!(matches!(
            pools.create_pool(
                &CallContext::user(token_a()),
                token_a(),
                token_b(),
                500,
                Address::ZERO,
                PoolKind::ConstantProduct
            ),
            Err(ExchangeError::NotOwner(_))
        ));
        assert!(matches!(
            pools.create_pool(&ctx, token_a(), token_b(), 500, Address::repeat_byte(0x77), PoolKind::ConstantProduct),
            Err(ExchangeError::HooksNotRegistered(_))
        ));
        assert!(matches!(
            pools.lookup(B256::repeat_byte(0x42)),
            Err(ExchangeError::PoolNotFound(_))
        ));
    }

    #[test]
    fn test_one_pool_per_fee_tier() {
        let pools = manager();
        let ctx = CallContext::user(owner());
        pools
            .create_pool(&ctx, token_a(), token_b(), 3000, Address::ZERO, PoolKind::Concentrated { tick: 0 })
            .unwrap();
        pools
            .create_pool(&ctx, token_a(), token_b(), 500, Address::ZERO, PoolKind::ConstantProduct)
            .unwrap();

        let fees: Vec<u32> = pools
            .pools_for_pair(token_b(), token_a())
            .iter()
            .map(|key| key.fee)
            .collect();
        assert_eq!(fees, vec![500, 3000]);
        assert_eq!(pools.pool_count(), 2);
    }

    #[test]
    fn test_snapshot_restore() {
        let pools = manager();
        let ctx = CallContext::user(owner());
        let key = pools
            .create_pool(&ctx, token_a(), token_b(), 500, Address::ZERO, PoolKind::ConstantProduct)
            .unwrap();
        pools
            .mint(key.id(), owner(), U256::from(1_000_000), U256::from(1_000_000))
            .unwrap();

        let snapshot = pools.snapshot(key.id()).unwrap();
        pools
            .swap(key.id(), owner(), token_a(), U256::from(10_000), 500)
            .unwrap();
        assert_ne!(pools.snapshot(key.id()).unwrap(), snapshot);

        pools.restore(snapshot.clone());
        assert_eq!(pools.snapshot(key.id()).unwrap(), snapshot);
    }

    #[test]
    fn test_operation_kind_mismatch() {
        let pools = manager();
        let ctx = CallContext::user(owner());
        let key = pools
            .create_pool(&ctx, token_a(), token_b(), 3000, Address::ZERO, PoolKind::Concentrated { tick: 0 })
            .unwrap();

        assert!(matches!(
            pools.mint(key.id(), owner(), U256::from(1), U256::from(1)),
            Err(ExchangeError::UnsupportedPoolOperation(_))
        ));
        let delta = pools
            .modify_position(key.id(), owner(), -600, 600, 1_000_000_000)
            .unwrap();
        assert_eq!(delta.direction, LiquidityDirection::Add);
    }

    #[test]
    fn test_hooks_gate_swaps() {
        let pools = manager();
        let ctx = CallContext::user(owner());
        let hook_address = Address::repeat_byte(0x44);
        let hook = Arc::new(SwapLimitHook::new(U256::from(5_000)));
        pools.register_hooks(&ctx, hook_address, hook.clone()).unwrap();

        let key = pools
            .create_pool(&ctx, token_a(), token_b(), 500, hook_address, PoolKind::ConstantProduct)
            .unwrap();
        assert_eq!(key.hooks, hook_address);
        pools
            .mint(key.id(), owner(), U256::from(1_000_000), U256::from(1_000_000))
            .unwrap();

        let before = pools.snapshot(key.id()).unwrap();
        assert!(matches!(
            pools.swap(key.id(), owner(), token_a(), U256::from(6_000), 500),
            Err(ExchangeError::HookRejected(_))
        ));
        assert_eq!(pools.snapshot(key.id()).unwrap(), before);
        assert_eq!(hook.swap_count(), 0);

        pools
            .swap(key.id(), owner(), token_a(), U256::from(4_000), 500)
            .unwrap();
        assert_eq!(hook.swap_count(), 1);
    }
}
