//! Single-chain swap router
//!
//! Every mutating entry point follows the same shape: capability checks
//! (pause, caller class, owner), argument validation, then the body runs
//! under the shared reentrancy guard with a [`Journal`] that is rolled back
//! if any later step fails.

mod journal;
mod route;

pub use journal::Journal;
pub use route::{decode_hop, encode_hop, Route, RouteHop};

use crate::access::{Ownership, PauseState, ReentrancyGuard};
use crate::context::CallContext;
use crate::error::{ExchangeError, ExchangeResult};
use crate::events::{EventBus, ExchangeEvent};
use crate::fees::FeeRegistry;
use crate::pool::{BalanceDelta, PoolKey, PoolManager};
use crate::token::TokenRegistry;

use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Exact-input swap through one pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRequest {
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
    pub amount_out_min: U256,
    pub fee: u32,
    pub deadline: u64,
}

/// Static router settings
#[derive(Debug, Clone)]
pub struct RouterSettings {
    /// Chain this engine executes on
    pub chain_id: u64,
    /// Custody account of the router
    pub address: Address,
    /// Receiver of distributed protocol fees
    pub treasury: Address,
    /// Intermediate tokens tried for two-hop routes
    pub base_tokens: Vec<Address>,
    pub test_mode: bool,
}

pub struct Router {
    settings: RouterSettings,
    pools: Arc<PoolManager>,
    fees: Arc<FeeRegistry>,
    tokens: Arc<TokenRegistry>,
    ownership: Arc<Ownership>,
    pause: PauseState,
    guard: Arc<ReentrancyGuard>,
    test_mode: AtomicBool,
    treasury: RwLock<Address>,
    events: EventBus,
}

impl Router {
    pub fn new(
        settings: RouterSettings,
        pools: Arc<PoolManager>,
        tokens: Arc<TokenRegistry>,
        ownership: Arc<Ownership>,
        guard: Arc<ReentrancyGuard>,
        events: EventBus,
    ) -> Self {
        Self {
            test_mode: AtomicBool::new(settings.test_mode),
            treasury: RwLock::new(settings.treasury),
            fees: pools.fees().clone(),
            settings,
            pools,
            tokens,
            ownership,
            pause: PauseState::new(),
            guard,
            events,
        }
    }

    pub fn address(&self) -> Address {
        self.settings.address
    }

    pub fn chain_id(&self) -> u64 {
        self.settings.chain_id
    }

    pub fn pools(&self) -> &Arc<PoolManager> {
        &self.pools
    }

    pub fn fees(&self) -> &Arc<FeeRegistry> {
        &self.fees
    }

    pub fn tokens(&self) -> &Arc<TokenRegistry> {
        &self.tokens
    }

    pub fn ownership(&self) -> &Arc<Ownership> {
        &self.ownership
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_paused()
    }

    pub fn test_mode(&self) -> bool {
        self.test_mode.load(Ordering::SeqCst)
    }

    pub fn treasury(&self) -> Address {
        *self.treasury.read().unwrap_or_else(PoisonError::into_inner)
    }

    // ---------------------------------------------------------------------
    // Checks shared with the cross-chain coordinator
    // ---------------------------------------------------------------------

    /// Pause and caller-class checks
    pub(crate) fn check_entry(&self, ctx: &CallContext) -> ExchangeResult<()> {
        self.pause.when_not_paused()?;
        if !ctx.is_end_user() && !self.test_mode() {
            return Err(ExchangeError::EoaOnly);
        }
        Ok(())
    }

    /// Token, amount and deadline checks
    pub(crate) fn validate_swap(
        &self,
        ctx: &CallContext,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        deadline: u64,
    ) -> ExchangeResult<()> {
        if token_in == Address::ZERO {
            return Err(ExchangeError::InvalidTokenAddress(token_in));
        }
        if token_out == Address::ZERO || token_out == token_in {
            return Err(ExchangeError::InvalidTokenAddress(token_out));
        }
        if amount_in.is_zero() {
            return Err(ExchangeError::InvalidAmount(amount_in));
        }
        if deadline < ctx.timestamp {
            return Err(ExchangeError::DeadlineExpired {
                deadline,
                now: ctx.timestamp,
            });
        }
        Ok(())
    }

    /// Commit the journal on success, roll it back on failure
    pub(crate) async fn settle<T>(
        &self,
        journal: Journal,
        result: ExchangeResult<T>,
    ) -> ExchangeResult<T> {
        match result {
            Ok(value) => {
                journal.commit();
                Ok(value)
            }
            Err(e) => {
                journal.rollback(&self.pools).await;
                Err(e)
            }
        }
    }

    pub(crate) fn guard(&self) -> &ReentrancyGuard {
        &self.guard
    }

    /// Swap `amount_in` already held by the router through one pool
    ///
    /// Moves the input into the pool's custody and the output back to the
    /// router, journaling the pool state and both transfers.
    pub(crate) async fn swap_leg(
        &self,
        journal: &mut Journal,
        key: &PoolKey,
        token_in: Address,
        amount_in: U256,
    ) -> ExchangeResult<U256> {
        let pool_id = key.id();
        let pool_ref = self.pools.lookup(pool_id)?;
        let token_out = key.counterpart(token_in)?;
        let fee = self.fees.get_fee(key)?;

        journal.snapshot_pool(&self.pools, pool_id)?;
        let amount_out = self
            .pools
            .swap(pool_id, self.address(), token_in, amount_in, fee)?;

        journal
            .transfer(&self.tokens, token_in, self.address(), pool_ref, amount_in)
            .await?;
        journal
            .transfer(&self.tokens, token_out, pool_ref, self.address(), amount_out)
            .await?;

        let kind = self
            .pools
            .snapshot(pool_id)
            .map(|pool| pool.kind_label())
            .unwrap_or("unknown");
        crate::metrics::record_swap(kind);
        debug!(
            "Leg {} -> {} via {} (fee {}): {} -> {}",
            token_in, token_out, pool_id, fee, amount_in, amount_out
        );
        Ok(amount_out)
    }

    fn reject<T>(&self, operation: &str, result: ExchangeResult<T>) -> ExchangeResult<T> {
        if let Err(e) = &result {
            warn!("{} rejected: {}", operation, e);
            crate::metrics::record_rejection(e);
        }
        result
    }

    // ---------------------------------------------------------------------
    // Quotes
    // ---------------------------------------------------------------------

    fn quote_hop(&self, key: &PoolKey, token_in: Address, amount_in: U256) -> ExchangeResult<RouteHop> {
        let pool_id = key.id();
        let fee = self.fees.get_fee(key)?;
        let amount_out = self.pools.quote(pool_id, token_in, amount_in, fee)?;
        Ok(RouteHop {
            pool_ref: self.pools.lookup(pool_id)?,
            pool_id,
            token_in,
            token_out: key.counterpart(token_in)?,
            fee,
            amount_in,
            amount_out,
            data: Bytes::new(),
        })
    }

    /// Best route for an exact input
    ///
    /// Considers every pool for the pair directly and every two-hop path
    /// through a configured base token.
    pub fn get_optimal_route(
        &self,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        chain_id: u64,
    ) -> ExchangeResult<(U256, Route)> {
        if token_in == Address::ZERO {
            return Err(ExchangeError::InvalidTokenAddress(token_in));
        }
        if token_out == Address::ZERO || token_out == token_in {
            return Err(ExchangeError::InvalidTokenAddress(token_out));
        }
        if chain_id == 0 || chain_id != self.chain_id() {
            return Err(ExchangeError::InvalidChainId(chain_id));
        }
        if amount_in.is_zero() {
            return Err(ExchangeError::InvalidAmount(amount_in));
        }

        let mut best: Option<Route> = None;
        let mut consider = |route: Route| {
            if best
                .as_ref()
                .map_or(true, |current| route.amount_out() > current.amount_out())
            {
                best = Some(route);
            }
        };

        for key in self.pools.pools_for_pair(token_in, token_out) {
            if let Ok(hop) = self.quote_hop(&key, token_in, amount_in) {
                consider(Route::single(hop));
            }
        }

        for base in &self.settings.base_tokens {
            let base = *base;
            if base == token_in || base == token_out {
                continue;
            }
            for first_key in self.pools.pools_for_pair(token_in, base) {
                let Ok(first) = self.quote_hop(&first_key, token_in, amount_in) else {
                    continue;
                };
                for second_key in self.pools.pools_for_pair(base, token_out) {
                    if let Ok(second) = self.quote_hop(&second_key, base, first.amount_out) {
                        consider(Route {
                            hops: vec![first.clone(), second],
                        });
                    }
                }
            }
        }

        let route = best.ok_or(ExchangeError::InsufficientLiquidity)?;
        Ok((route.amount_out(), route))
    }

    // ---------------------------------------------------------------------
    // Swaps
    // ---------------------------------------------------------------------

    /// Execute an exact-input swap through the pool for `req.fee`
    pub async fn execute_route(&self, ctx: &CallContext, req: &SwapRequest) -> ExchangeResult<U256> {
        let result = self.execute_route_checked(ctx, req).await;
        self.reject("execute_route", result)
    }

    async fn execute_route_checked(&self, ctx: &CallContext, req: &SwapRequest) -> ExchangeResult<U256> {
        self.check_entry(ctx)?;
        self.validate_swap(ctx, req.token_in, req.token_out, req.amount_in, req.deadline)?;

        let (amount_out, route) = self
            .guard
            .run(async {
                let mut journal = Journal::new();
                let result = self.execute_route_inner(ctx, req, &mut journal).await;
                self.settle(journal, result).await
            })
            .await?;

        info!(
            "Route executed for {}: {} {} -> {} {}",
            ctx.sender, req.amount_in, req.token_in, amount_out, req.token_out
        );
        self.events.emit(ExchangeEvent::RouteExecuted {
            user: ctx.sender,
            token_in: req.token_in,
            token_out: req.token_out,
            amount_in: req.amount_in,
            amount_out,
            chain_id: self.chain_id(),
            route_hash: route.hash(),
        });
        Ok(amount_out)
    }

    async fn execute_route_inner(
        &self,
        ctx: &CallContext,
        req: &SwapRequest,
        journal: &mut Journal,
    ) -> ExchangeResult<(U256, Route)> {
        let key = self.pools.pool_for(req.token_in, req.token_out, req.fee)?;

        journal
            .transfer_from(
                &self.tokens,
                req.token_in,
                self.address(),
                ctx.sender,
                self.address(),
                req.amount_in,
            )
            .await?;

        let amount_out = self.swap_leg(journal, &key, req.token_in, req.amount_in).await?;
        if amount_out < req.amount_out_min {
            return Err(ExchangeError::InsufficientOutputAmount {
                actual: amount_out,
                min: req.amount_out_min,
            });
        }

        journal
            .transfer(&self.tokens, req.token_out, self.address(), ctx.sender, amount_out)
            .await?;

        let route = Route::single(RouteHop {
            pool_ref: key.pool_ref(),
            pool_id: key.id(),
            token_in: req.token_in,
            token_out: req.token_out,
            fee: self.fees.get_fee(&key)?,
            amount_in: req.amount_in,
            amount_out,
            data: Bytes::new(),
        });
        Ok((amount_out, route))
    }

    // ---------------------------------------------------------------------
    // Liquidity
    // ---------------------------------------------------------------------

    /// Deposit into a constant-product pool, pulling exactly what the pool takes
    pub async fn add_liquidity(
        &self,
        ctx: &CallContext,
        token_a: Address,
        token_b: Address,
        fee: u32,
        amount_a_desired: U256,
        amount_b_desired: U256,
    ) -> ExchangeResult<BalanceDelta> {
        let result = async {
            self.check_entry(ctx)?;
            let key = self.pools.pool_for(token_a, token_b, fee)?;
            let (amount0_desired, amount1_desired) = if token_a == key.currency0 {
                (amount_a_desired, amount_b_desired)
            } else {
                (amount_b_desired, amount_a_desired)
            };

            self.guard
                .run(async {
                    let mut journal = Journal::new();
                    let result = async {
                        journal.snapshot_pool(&self.pools, key.id())?;
                        let delta =
                            self.pools
                                .mint(key.id(), ctx.sender, amount0_desired, amount1_desired)?;
                        self.pull_pair(&mut journal, ctx, &key, &delta).await?;
                        Ok::<_, ExchangeError>(delta)
                    }
                    .await;
                    self.settle(journal, result).await
                })
                .await
                .map(|delta| self.emit_liquidity(&key, ctx.sender, delta))
        }
        .await;
        self.reject("add_liquidity", result)
    }

    /// Redeem LP shares of a constant-product pool
    pub async fn remove_liquidity(
        &self,
        ctx: &CallContext,
        token_a: Address,
        token_b: Address,
        fee: u32,
        liquidity: U256,
    ) -> ExchangeResult<BalanceDelta> {
        let result = async {
            self.check_entry(ctx)?;
            let key = self.pools.pool_for(token_a, token_b, fee)?;

            self.guard
                .run(async {
                    let mut journal = Journal::new();
                    let result = async {
                        journal.snapshot_pool(&self.pools, key.id())?;
                        let delta = self.pools.burn(key.id(), ctx.sender, liquidity)?;
                        self.push_pair(&mut journal, ctx, &key, &delta).await?;
                        Ok::<_, ExchangeError>(delta)
                    }
                    .await;
                    self.settle(journal, result).await
                })
                .await
                .map(|delta| self.emit_liquidity(&key, ctx.sender, delta))
        }
        .await;
        self.reject("remove_liquidity", result)
    }

    /// Add (positive) or remove (negative) a concentrated range position
    pub async fn modify_position(
        &self,
        ctx: &CallContext,
        token_a: Address,
        token_b: Address,
        fee: u32,
        tick_lower: i32,
        tick_upper: i32,
        liquidity_delta: i128,
    ) -> ExchangeResult<BalanceDelta> {
        let result = async {
            self.check_entry(ctx)?;
            let key = self.pools.pool_for(token_a, token_b, fee)?;

            self.guard
                .run(async {
                    let mut journal = Journal::new();
                    let result = async {
                        journal.snapshot_pool(&self.pools, key.id())?;
                        let delta = self.pools.modify_position(
                            key.id(),
                            ctx.sender,
                            tick_lower,
                            tick_upper,
                            liquidity_delta,
                        )?;
                        if liquidity_delta > 0 {
                            self.pull_pair(&mut journal, ctx, &key, &delta).await?;
                        } else {
                            self.push_pair(&mut journal, ctx, &key, &delta).await?;
                        }
                        Ok::<_, ExchangeError>(delta)
                    }
                    .await;
                    self.settle(journal, result).await
                })
                .await
                .map(|delta| self.emit_liquidity(&key, ctx.sender, delta))
        }
        .await;
        self.reject("modify_position", result)
    }

    async fn pull_pair(
        &self,
        journal: &mut Journal,
        ctx: &CallContext,
        key: &PoolKey,
        delta: &BalanceDelta,
    ) -> ExchangeResult<()> {
        let pool_ref = key.pool_ref();
        for (token, amount) in [(key.currency0, delta.amount0), (key.currency1, delta.amount1)] {
            journal
                .transfer_from(&self.tokens, token, self.address(), ctx.sender, pool_ref, amount)
                .await?;
        }
        Ok(())
    }

    async fn push_pair(
        &self,
        journal: &mut Journal,
        ctx: &CallContext,
        key: &PoolKey,
        delta: &BalanceDelta,
    ) -> ExchangeResult<()> {
        let pool_ref = key.pool_ref();
        for (token, amount) in [(key.currency0, delta.amount0), (key.currency1, delta.amount1)] {
            journal
                .transfer(&self.tokens, token, pool_ref, ctx.sender, amount)
                .await?;
        }
        Ok(())
    }

    fn emit_liquidity(&self, key: &PoolKey, provider: Address, delta: BalanceDelta) -> BalanceDelta {
        let (pool_id, amount0, amount1, liquidity) =
            (key.id(), delta.amount0, delta.amount1, delta.liquidity);
        let event = match delta.direction {
            crate::pool::LiquidityDirection::Add => ExchangeEvent::LiquidityAdded {
                pool_id,
                provider,
                amount0,
                amount1,
                liquidity,
            },
            crate::pool::LiquidityDirection::Remove => ExchangeEvent::LiquidityRemoved {
                pool_id,
                provider,
                amount0,
                amount1,
                liquidity,
            },
        };
        info!("{} on {} by {}", event.name(), pool_id, provider);
        self.events.emit(event);
        delta
    }

    // ---------------------------------------------------------------------
    // Administration
    // ---------------------------------------------------------------------

    pub fn pause(&self, ctx: &CallContext) -> ExchangeResult<()> {
        self.ownership.only_owner(ctx)?;
        self.pause.pause()?;
        warn!("Router paused by {}", ctx.sender);
        self.events.emit(ExchangeEvent::Paused { account: ctx.sender });
        Ok(())
    }

    pub fn unpause(&self, ctx: &CallContext) -> ExchangeResult<()> {
        self.ownership.only_owner(ctx)?;
        self.pause.unpause()?;
        info!("Router unpaused by {}", ctx.sender);
        self.events.emit(ExchangeEvent::Unpaused { account: ctx.sender });
        Ok(())
    }

    /// Allow program callers through the end-user check
    pub fn set_test_mode(&self, ctx: &CallContext, enabled: bool) -> ExchangeResult<()> {
        self.ownership.only_owner(ctx)?;
        self.test_mode.store(enabled, Ordering::SeqCst);
        warn!("Test mode {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    pub fn transfer_ownership(&self, ctx: &CallContext, new_owner: Address) -> ExchangeResult<()> {
        self.ownership.transfer_ownership(ctx, new_owner, &self.events)
    }

    pub fn set_treasury(&self, ctx: &CallContext, treasury: Address) -> ExchangeResult<()> {
        self.ownership.only_owner(ctx)?;
        if treasury == Address::ZERO {
            return Err(ExchangeError::InvalidRecipient(treasury));
        }
        *self.treasury.write().unwrap_or_else(PoisonError::into_inner) = treasury;
        info!("Treasury set to {}", treasury);
        Ok(())
    }

    /// Send accumulated native fees to the treasury
    pub async fn distribute_fees(&self, ctx: &CallContext, amount: U256) -> ExchangeResult<()> {
        self.ownership.only_owner(ctx)?;
        let treasury = self.treasury();
        self.pay_native(treasury, amount).await?;
        info!("Distributed {} native fees to {}", amount, treasury);
        self.events
            .emit(ExchangeEvent::FeesDistributed { treasury, amount });
        Ok(())
    }

    /// Return over-paid message fees to the caller
    pub async fn refund_excess_fee(&self, ctx: &CallContext, amount: U256) -> ExchangeResult<()> {
        self.ownership.only_owner(ctx)?;
        self.pay_native(ctx.sender, amount).await?;
        info!("Refunded {} excess fee to {}", amount, ctx.sender);
        self.events.emit(ExchangeEvent::ExcessFeeRefunded {
            recipient: ctx.sender,
            amount,
        });
        Ok(())
    }

    async fn pay_native(&self, to: Address, amount: U256) -> ExchangeResult<()> {
        if amount.is_zero() {
            return Err(ExchangeError::InvalidAmount(amount));
        }
        self.guard
            .run(async {
                let native = self.tokens.native()?;
                let have = native.balance_of(self.address()).await?;
                if have < amount {
                    return Err(ExchangeError::InsufficientBalance { have, need: amount });
                }
                native.transfer(self.address(), to, amount).await
            })
            .await
    }
}
