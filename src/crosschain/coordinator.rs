//! Cross-chain coordinator
//!
//! Escrows the input on this chain, records a [`CrossChainOperation`] and
//! hands the settlement instructions to the cheaper transport. Dispatch is
//! fire-and-forget: the operation stays `Pending` until a transport endpoint
//! (or the owner) confirms or reports failure, or until the user recovers
//! the escrowed funds.

use super::message::{encode_remaining_hops, SettlementMessage};
use super::operation::{operation_id, CrossChainOperation, OperationState};
use crate::context::CallContext;
use crate::error::{ExchangeError, ExchangeResult};
use crate::events::{EventBus, ExchangeEvent};
use crate::router::{decode_hop, Journal, Router};
use crate::state::OperationStore;
use crate::token::NATIVE_TOKEN;
use crate::transport::{Dispatch, DispatchOutcome, TransportManager, TransportQuote};

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Swap settled on another chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossChainSwap {
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
    pub amount_out_min: U256,
    pub recipient: Address,
    pub src_chain: u64,
    pub dst_chain: u64,
    pub deadline: u64,
    #[serde(default)]
    pub data: Bytes,
}

/// Swap over a path of chains
///
/// `route_data[i]` is an encoded hop (token out, fee) executed on
/// `chain_path[i]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiPathSwap {
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
    pub amount_out_min: U256,
    pub recipient: Address,
    pub chain_path: Vec<u64>,
    pub route_data: Vec<Bytes>,
    pub deadline: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrossChainQuote {
    pub amount_out: U256,
    pub route_data: Bytes,
    pub use_provider_a: bool,
    pub fee: U256,
}

/// What a multi-path route ended as
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultiPathOutcome {
    /// Every hop ran on this chain and the output was delivered
    Local { amount_out: U256 },
    /// Local hops ran, the remainder was handed to a transport
    Dispatched {
        local_amount_out: U256,
        operation: CrossChainOperation,
    },
}

pub struct CrossChainCoordinator {
    router: Arc<Router>,
    transports: Arc<TransportManager>,
    store: Arc<dyn OperationStore>,
    /// Destination chain -> router custody address on that chain
    destinations: HashMap<u64, Address>,
    events: EventBus,
}

/// Escrow request shared by direct and multi-path dispatch
struct Escrow {
    token_in: Address,
    token_out: Address,
    amount: U256,
    min_amount_out: U256,
    recipient: Address,
    dst_chain: u64,
    data: Bytes,
}

impl CrossChainCoordinator {
    pub fn new(
        router: Arc<Router>,
        transports: Arc<TransportManager>,
        store: Arc<dyn OperationStore>,
        destinations: HashMap<u64, Address>,
    ) -> Self {
        let events = router.events().clone();
        Self {
            router,
            transports,
            store,
            destinations,
            events,
        }
    }

    pub fn store(&self) -> &Arc<dyn OperationStore> {
        &self.store
    }

    pub fn transports(&self) -> &Arc<TransportManager> {
        &self.transports
    }

    pub async fn get_operation(&self, id: B256) -> ExchangeResult<CrossChainOperation> {
        self.store
            .get(id)
            .await?
            .ok_or(ExchangeError::OperationNotFound(id))
    }

    fn check_chains(&self, src_chain: u64, dst_chain: u64) -> ExchangeResult<Address> {
        if src_chain == 0 || src_chain != self.router.chain_id() {
            return Err(ExchangeError::InvalidChainId(src_chain));
        }
        self.destination(dst_chain)
    }

    fn destination(&self, dst_chain: u64) -> ExchangeResult<Address> {
        if dst_chain == self.router.chain_id() {
            return Err(ExchangeError::InvalidChainId(dst_chain));
        }
        self.destinations
            .get(&dst_chain)
            .copied()
            .ok_or(ExchangeError::InvalidChainId(dst_chain))
    }

    /// Local output estimate plus the cheaper provider's fee
    ///
    /// Without a local pool for the pair the input amount is reported as the
    /// estimate; the destination prices the swap.
    pub async fn get_cross_chain_route(
        &self,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        src_chain: u64,
        dst_chain: u64,
    ) -> ExchangeResult<CrossChainQuote> {
        if token_in == Address::ZERO {
            return Err(ExchangeError::InvalidTokenAddress(token_in));
        }
        if token_out == Address::ZERO || token_out == token_in {
            return Err(ExchangeError::InvalidTokenAddress(token_out));
        }
        if amount_in.is_zero() {
            return Err(ExchangeError::InvalidAmount(amount_in));
        }
        self.check_chains(src_chain, dst_chain)?;

        let (amount_out, route_data) =
            match self
                .router
                .get_optimal_route(token_in, token_out, amount_in, src_chain)
            {
                Ok((amount_out, route)) => (amount_out, encode_remaining_hops(&route.hop_data())),
                // Pools that cannot quote the input are skipped, so this is
                // the only error left once the inputs are valid
                Err(ExchangeError::InsufficientLiquidity) => {
                    (amount_in, encode_remaining_hops(&[]))
                }
                Err(e) => return Err(e),
            };

        let sample = SettlementMessage {
            operation_id: B256::ZERO,
            recipient: Address::ZERO,
            token_in,
            token_out,
            amount: amount_in,
            min_amount_out: amount_out,
            data: route_data.clone(),
        };
        let quote = self.transports.quote(dst_chain, &sample.encode()).await?;

        Ok(CrossChainQuote {
            amount_out,
            route_data,
            use_provider_a: quote.slot == crate::transport::ProviderSlot::A,
            fee: quote.fee,
        })
    }

    /// Escrow the input and dispatch settlement instructions
    ///
    /// A provider failure does not fail the call: the operation is recorded
    /// as `Failed`, the input stays escrowed for recovery and the attached
    /// value is refunded.
    pub async fn execute_cross_chain_route(
        &self,
        ctx: &CallContext,
        swap: &CrossChainSwap,
    ) -> ExchangeResult<CrossChainOperation> {
        let result = self.execute_cross_chain_checked(ctx, swap).await;
        if let Err(e) = &result {
            warn!("execute_cross_chain_route rejected: {}", e);
            crate::metrics::record_rejection(e);
        }
        result
    }

    async fn execute_cross_chain_checked(
        &self,
        ctx: &CallContext,
        swap: &CrossChainSwap,
    ) -> ExchangeResult<CrossChainOperation> {
        self.router.check_entry(ctx)?;
        self.router.validate_swap(
            ctx,
            swap.token_in,
            swap.token_out,
            swap.amount_in,
            swap.deadline,
        )?;
        if swap.recipient == Address::ZERO {
            return Err(ExchangeError::InvalidRecipient(swap.recipient));
        }
        self.check_chains(swap.src_chain, swap.dst_chain)?;

        self.router
            .guard()
            .run(async {
                let mut journal = Journal::new();
                let result = async {
                    self.take_value(&mut journal, ctx).await?;
                    let tokens = self.router.tokens();
                    journal
                        .transfer_from(
                            tokens,
                            swap.token_in,
                            self.router.address(),
                            ctx.sender,
                            self.router.address(),
                            swap.amount_in,
                        )
                        .await?;

                    let escrow = Escrow {
                        token_in: swap.token_in,
                        token_out: swap.token_out,
                        amount: swap.amount_in,
                        min_amount_out: swap.amount_out_min,
                        recipient: swap.recipient,
                        dst_chain: swap.dst_chain,
                        data: swap.data.clone(),
                    };
                    self.escrow_and_dispatch(&mut journal, ctx, escrow).await
                }
                .await;
                self.router.settle(journal, result).await
            })
            .await
    }

    /// Move the attached native value into router custody
    async fn take_value(&self, journal: &mut Journal, ctx: &CallContext) -> ExchangeResult<()> {
        journal
            .transfer(
                self.router.tokens(),
                NATIVE_TOKEN,
                ctx.sender,
                self.router.address(),
                ctx.value,
            )
            .await
    }

    /// Record the operation, pay the provider and settle the attached value
    ///
    /// Expects the input already in router custody and the value taken.
    /// Every check that can reject the call runs before the operation is
    /// stored. Once stored, the escrow is backed by a recoverable record and
    /// the call commits: later failures are logged and leave the funds in
    /// custody for `recover_failed_operation`.
    async fn escrow_and_dispatch(
        &self,
        journal: &mut Journal,
        ctx: &CallContext,
        escrow: Escrow,
    ) -> ExchangeResult<CrossChainOperation> {
        let destination = self.destination(escrow.dst_chain)?;
        let id = operation_id(
            ctx.sender,
            escrow.token_in,
            escrow.token_out,
            escrow.amount,
            ctx.timestamp,
        );
        if self.store.get(id).await?.is_some() {
            return Err(ExchangeError::DuplicateOperation(id));
        }

        let message = SettlementMessage {
            operation_id: id,
            recipient: escrow.recipient,
            token_in: escrow.token_in,
            token_out: escrow.token_out,
            amount: escrow.amount,
            min_amount_out: escrow.min_amount_out,
            data: escrow.data.clone(),
        };
        let payload = message.encode();

        let quote: TransportQuote = self.transports.quote(escrow.dst_chain, &payload).await?;
        if quote.fee > ctx.value {
            return Err(ExchangeError::InsufficientFee {
                required: quote.fee,
                provided: ctx.value,
            });
        }

        let op = CrossChainOperation::pending(
            ctx.sender,
            escrow.token_in,
            escrow.token_out,
            escrow.amount,
            self.router.chain_id(),
            escrow.dst_chain,
            escrow.recipient,
            ctx.timestamp,
        );
        self.store.insert(&op).await?;
        crate::metrics::record_operation_state(OperationState::Pending.as_str());
        info!(
            "Operation {} pending: {} {} to chain {} via provider {}",
            id, escrow.amount, escrow.token_in, escrow.dst_chain, quote.slot
        );

        let dispatch = self
            .transports
            .dispatch(quote, escrow.dst_chain, destination, payload.clone(), ctx.value)
            .await;
        self.announce_failover(&dispatch);

        Ok(self
            .settle_dispatch(journal, ctx, op, &escrow, dispatch.outcome, &payload)
            .await)
    }

    /// Apply a dispatch outcome to a stored operation; never fails the call
    async fn settle_dispatch(
        &self,
        journal: &mut Journal,
        ctx: &CallContext,
        mut op: CrossChainOperation,
        escrow: &Escrow,
        outcome: DispatchOutcome,
        payload: &[u8],
    ) -> CrossChainOperation {
        let id = op.operation_id;
        let tokens = self.router.tokens();
        let router = self.router.address();
        match outcome {
            DispatchOutcome::Sent {
                slot,
                provider,
                message_id,
                fee,
            } => {
                let collector = self.transports.get(slot).fee_collector();
                let paid = async {
                    journal
                        .transfer(tokens, NATIVE_TOKEN, router, collector, fee)
                        .await?;
                    journal
                        .transfer(tokens, NATIVE_TOKEN, router, ctx.sender, ctx.value.saturating_sub(fee))
                        .await
                }
                .await;
                if let Err(e) = paid {
                    error!(
                        "Operation {} dispatched but the attached value was not settled: {}",
                        id, e
                    );
                    crate::metrics::record_rejection(&e);
                }

                op.provider = Some(provider);
                op.message_id = Some(message_id);
                if let Err(e) = self.store.update(&op).await {
                    error!("Operation {} dispatched but its record stays pending: {}", id, e);
                    crate::metrics::record_rejection(&e);
                }

                info!(
                    "Operation {} dispatched as message {} (fee {})",
                    id, message_id, fee
                );
                self.events.emit(ExchangeEvent::CrossChainRouteExecuted {
                    operation_id: id,
                    user: ctx.sender,
                    token_in: escrow.token_in,
                    token_out: escrow.token_out,
                    amount_in: escrow.amount,
                    amount_out: escrow.min_amount_out,
                    src_chain: self.router.chain_id(),
                    dst_chain: escrow.dst_chain,
                    route_hash: keccak256(payload),
                });
            }
            DispatchOutcome::Failed {
                provider, reason, ..
            } => {
                if let Err(e) = journal
                    .transfer(tokens, NATIVE_TOKEN, router, ctx.sender, ctx.value)
                    .await
                {
                    error!("Operation {} failed and its value was not refunded: {}", id, e);
                    crate::metrics::record_rejection(&e);
                }

                let pending = op.clone();
                op.provider = Some(provider);
                match op.fail(reason.clone(), ctx.timestamp) {
                    Ok(()) => {
                        if let Err(e) = self.store.update(&op).await {
                            error!("Operation {} failed but its record stays pending: {}", id, e);
                            crate::metrics::record_rejection(&e);
                            op = pending;
                        } else {
                            crate::metrics::record_operation_state(OperationState::Failed.as_str());
                        }
                    }
                    Err(e) => {
                        error!("Operation {} could not be marked failed: {}", id, e);
                        op = pending;
                    }
                }

                error!("Operation {} failed to dispatch: {}", id, reason);
                self.events.emit(ExchangeEvent::CrossChainDispatchFailed {
                    operation_id: id,
                    user: ctx.sender,
                    reason,
                });
            }
        }
        op
    }

    fn announce_failover(&self, dispatch: &Dispatch) {
        if let Some((from, to, reason)) = &dispatch.failover {
            self.events.emit(ExchangeEvent::TransportFailover {
                from: from.clone(),
                to: to.clone(),
                reason: reason.clone(),
            });
        }
    }

    fn only_settlement_authority(&self, ctx: &CallContext) -> ExchangeResult<()> {
        if self.transports.is_endpoint(ctx.sender)
            || self.router.ownership().owner() == ctx.sender
        {
            Ok(())
        } else {
            Err(ExchangeError::UnauthorizedAccess(ctx.sender))
        }
    }

    /// Destination settlement confirmed
    pub async fn confirm_settlement(
        &self,
        ctx: &CallContext,
        id: B256,
    ) -> ExchangeResult<CrossChainOperation> {
        self.only_settlement_authority(ctx)?;
        self.router
            .guard()
            .run(async {
                let mut op = self.get_operation(id).await?;
                op.transition(OperationState::Completed, ctx.timestamp)?;
                self.store.update(&op).await?;
                Ok(op)
            })
            .await
            .map(|op| {
                info!("Operation {} completed", id);
                crate::metrics::record_operation_state(OperationState::Completed.as_str());
                self.events
                    .emit(ExchangeEvent::OperationCompleted { operation_id: id });
                op
            })
    }

    /// Destination reported the settlement failed
    pub async fn report_failure(
        &self,
        ctx: &CallContext,
        id: B256,
        reason: &str,
    ) -> ExchangeResult<CrossChainOperation> {
        self.only_settlement_authority(ctx)?;
        let op = self
            .router
            .guard()
            .run(async {
                let mut op = self.get_operation(id).await?;
                op.fail(reason, ctx.timestamp)?;
                self.store.update(&op).await?;
                Ok(op)
            })
            .await?;

        warn!("Operation {} failed on destination: {}", id, reason);
        crate::metrics::record_operation_state(OperationState::Failed.as_str());
        self.events.emit(ExchangeEvent::CrossChainDispatchFailed {
            operation_id: id,
            user: op.user,
            reason: reason.to_string(),
        });
        Ok(op)
    }

    /// Refund the escrowed input to the operation's user
    pub async fn recover_failed_operation(
        &self,
        ctx: &CallContext,
        id: B256,
    ) -> ExchangeResult<CrossChainOperation> {
        let result = self
            .router
            .guard()
            .run(async {
                let mut op = self.get_operation(id).await?;
                if ctx.sender != op.user {
                    return Err(ExchangeError::UnauthorizedAccess(ctx.sender));
                }
                if !op.state.is_recoverable() {
                    return Err(ExchangeError::OperationNotRecoverable {
                        id,
                        state: op.state.to_string(),
                    });
                }

                let mut journal = Journal::new();
                let result = async {
                    journal
                        .transfer(
                            self.router.tokens(),
                            op.token_in,
                            self.router.address(),
                            op.user,
                            op.amount,
                        )
                        .await?;
                    op.transition(OperationState::Recovered, ctx.timestamp)?;
                    self.store.update(&op).await?;
                    Ok::<_, ExchangeError>(())
                }
                .await;
                self.router.settle(journal, result).await?;
                Ok(op)
            })
            .await;

        match &result {
            Ok(op) => {
                info!(
                    "Operation {} recovered: {} {} returned to {}",
                    id, op.amount, op.token_in, op.user
                );
                crate::metrics::record_operation_state(OperationState::Recovered.as_str());
                self.events.emit(ExchangeEvent::OperationRecovered {
                    operation_id: id,
                    user: op.user,
                    token: op.token_in,
                    amount: op.amount,
                });
            }
            Err(e) => {
                warn!("Recovery of {} rejected: {}", id, e);
                crate::metrics::record_rejection(e);
            }
        }
        result
    }

    /// Run leading local hops, then dispatch the rest as one operation
    pub async fn execute_multi_path_route(
        &self,
        ctx: &CallContext,
        swap: &MultiPathSwap,
    ) -> ExchangeResult<MultiPathOutcome> {
        let result = self.execute_multi_path_checked(ctx, swap).await;
        if let Err(e) = &result {
            warn!("execute_multi_path_route rejected: {}", e);
            crate::metrics::record_rejection(e);
        }
        result
    }

    async fn execute_multi_path_checked(
        &self,
        ctx: &CallContext,
        swap: &MultiPathSwap,
    ) -> ExchangeResult<MultiPathOutcome> {
        self.router.check_entry(ctx)?;
        self.router.validate_swap(
            ctx,
            swap.token_in,
            swap.token_out,
            swap.amount_in,
            swap.deadline,
        )?;
        if swap.recipient == Address::ZERO {
            return Err(ExchangeError::InvalidRecipient(swap.recipient));
        }
        let hops = decode_path(swap)?;
        for (chain, _, _) in &hops {
            if *chain == 0 {
                return Err(ExchangeError::InvalidChainId(*chain));
            }
            if *chain != self.router.chain_id() {
                self.destination(*chain)?;
            }
        }

        let outcome = self
            .router
            .guard()
            .run(async {
                let mut journal = Journal::new();
                let result = self.run_multi_path(&mut journal, ctx, swap, &hops).await;
                self.router.settle(journal, result).await
            })
            .await?;

        if let MultiPathOutcome::Local { amount_out } = &outcome {
            info!(
                "Multi-path route settled locally for {}: {} -> {}",
                ctx.sender, swap.amount_in, amount_out
            );
            self.events.emit(ExchangeEvent::RouteExecuted {
                user: ctx.sender,
                token_in: swap.token_in,
                token_out: swap.token_out,
                amount_in: swap.amount_in,
                amount_out: *amount_out,
                chain_id: self.router.chain_id(),
                route_hash: keccak256(encode_remaining_hops(&swap.route_data)),
            });
        }
        Ok(outcome)
    }

    async fn run_multi_path(
        &self,
        journal: &mut Journal,
        ctx: &CallContext,
        swap: &MultiPathSwap,
        hops: &[(u64, Address, u32)],
    ) -> ExchangeResult<MultiPathOutcome> {
        let router = self.router.address();
        let local_chain = self.router.chain_id();

        self.take_value(journal, ctx).await?;
        journal
            .transfer_from(
                self.router.tokens(),
                swap.token_in,
                router,
                ctx.sender,
                router,
                swap.amount_in,
            )
            .await?;

        let mut token = swap.token_in;
        let mut amount = swap.amount_in;
        for (index, (chain, token_out, fee)) in hops.iter().copied().enumerate() {
            if chain != local_chain {
                debug!(
                    "Hop {} leaves for chain {} with {} of {}",
                    index, chain, amount, token
                );
                let escrow = Escrow {
                    token_in: token,
                    token_out: swap.token_out,
                    amount,
                    min_amount_out: swap.amount_out_min,
                    recipient: swap.recipient,
                    dst_chain: chain,
                    data: encode_remaining_hops(&swap.route_data[index..]),
                };
                let operation = self.escrow_and_dispatch(journal, ctx, escrow).await?;
                return Ok(MultiPathOutcome::Dispatched {
                    local_amount_out: amount,
                    operation,
                });
            }

            let key = self.router.pools().pool_for(token, token_out, fee)?;
            amount = self.router.swap_leg(journal, &key, token, amount).await?;
            token = token_out;
        }

        if amount < swap.amount_out_min {
            return Err(ExchangeError::InsufficientOutputAmount {
                actual: amount,
                min: swap.amount_out_min,
            });
        }
        let tokens = self.router.tokens();
        journal
            .transfer(tokens, token, router, swap.recipient, amount)
            .await?;
        journal
            .transfer(tokens, NATIVE_TOKEN, router, ctx.sender, ctx.value)
            .await?;
        Ok(MultiPathOutcome::Local { amount_out: amount })
    }
}

/// Pair each chain with its decoded hop and check the path ends in `token_out`
fn decode_path(swap: &MultiPathSwap) -> ExchangeResult<Vec<(u64, Address, u32)>> {
    if swap.chain_path.is_empty() {
        return Err(ExchangeError::InvalidRouteData("empty chain path".into()));
    }
    if swap.chain_path.len() != swap.route_data.len() {
        return Err(ExchangeError::InvalidRouteData(format!(
            "{} chains but {} hops",
            swap.chain_path.len(),
            swap.route_data.len()
        )));
    }

    let hops = swap
        .chain_path
        .iter()
        .zip(&swap.route_data)
        .enumerate()
        .map(|(index, (chain, data))| {
            decode_hop(data)
                .map(|(token_out, fee)| (*chain, token_out, fee))
                .ok_or_else(|| ExchangeError::InvalidRouteData(format!("hop {} is malformed", index)))
        })
        .collect::<ExchangeResult<Vec<_>>>()?;

    match hops.last() {
        Some((_, last, _)) if *last == swap.token_out => Ok(hops),
        _ => Err(ExchangeError::InvalidRouteData(
            "path does not end in the output token".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crosschain::message::decode_remaining_hops;
    use crate::router::encode_hop;
    use crate::router::tests::{
        e18, fixture, owner, Fixture, CHAIN_ID, ROUTER, TOKEN_A, TOKEN_B, TOKEN_C, USER,
    };
    use crate::state::MemoryOperationStore;
    use crate::token::TokenLedger;
    use std::sync::atomic::{AtomicBool, Ordering};
    use crate::transport::{
        DispatchError, LoopbackMode, LoopbackTransport, MessageTransport, MockMessageTransport,
    };

    const DST: u64 = 10;
    const REMOTE_ROUTER: Address = Address::repeat_byte(0xd0);
    const ENDPOINT_A: Address = Address::repeat_byte(0xea);
    const COLLECTOR_A: Address = Address::repeat_byte(0xca);
    const COLLECTOR_B: Address = Address::repeat_byte(0xcb);
    const EXPECTED_OUT: u128 = 908_677_667_166_689_394_972;

    fn loopback(name: &str, endpoint: Address, collector: Address, fee: u64) -> Arc<LoopbackTransport> {
        Arc::new(LoopbackTransport::new(
            name,
            endpoint,
            collector,
            U256::from(fee),
            U256::ZERO,
        ))
    }

    async fn setup_with(
        a: Arc<dyn MessageTransport>,
        b: Arc<dyn MessageTransport>,
    ) -> (Fixture, CrossChainCoordinator) {
        setup_with_store(a, b, Arc::new(MemoryOperationStore::new())).await
    }

    async fn setup_with_store(
        a: Arc<dyn MessageTransport>,
        b: Arc<dyn MessageTransport>,
        store: Arc<dyn OperationStore>,
    ) -> (Fixture, CrossChainCoordinator) {
        let fx = fixture().await;
        fx.native.mint(USER, U256::from(5_000)).await.unwrap();
        let coordinator = CrossChainCoordinator::new(
            fx.router.clone(),
            Arc::new(TransportManager::new(a, b)),
            store,
            HashMap::from([(DST, REMOTE_ROUTER)]),
        );
        (fx, coordinator)
    }

    /// Memory store whose next update fails once
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryOperationStore,
        fail_next_update: AtomicBool,
    }

    #[async_trait::async_trait]
    impl OperationStore for FlakyStore {
        async fn insert(&self, operation: &CrossChainOperation) -> ExchangeResult<()> {
            self.inner.insert(operation).await
        }

        async fn get(&self, id: B256) -> ExchangeResult<Option<CrossChainOperation>> {
            self.inner.get(id).await
        }

        async fn update(&self, operation: &CrossChainOperation) -> ExchangeResult<()> {
            if self.fail_next_update.swap(false, Ordering::SeqCst) {
                return Err(ExchangeError::Internal("db down".into()));
            }
            self.inner.update(operation).await
        }

        async fn list_by_state(
            &self,
            state: OperationState,
        ) -> ExchangeResult<Vec<CrossChainOperation>> {
            self.inner.list_by_state(state).await
        }

        async fn stats(&self) -> ExchangeResult<crate::state::OperationStats> {
            self.inner.stats().await
        }

        async fn health_check(&self) -> ExchangeResult<()> {
            self.inner.health_check().await
        }
    }

    async fn setup_flaky() -> (Fixture, CrossChainCoordinator, Arc<LoopbackTransport>) {
        let a = loopback("alpha", ENDPOINT_A, COLLECTOR_A, 1_000);
        let b = loopback("beta", Address::repeat_byte(0xeb), COLLECTOR_B, 2_000);
        let store = Arc::new(FlakyStore::default());
        store.fail_next_update.store(true, Ordering::SeqCst);
        let (fx, coordinator) = setup_with_store(a.clone(), b, store).await;
        (fx, coordinator, a)
    }

    async fn setup() -> (
        Fixture,
        CrossChainCoordinator,
        Arc<LoopbackTransport>,
        Arc<LoopbackTransport>,
    ) {
        let a = loopback("alpha", ENDPOINT_A, COLLECTOR_A, 1_000);
        let b = loopback("beta", Address::repeat_byte(0xeb), COLLECTOR_B, 2_000);
        let (fx, coordinator) = setup_with(a.clone(), b.clone()).await;
        (fx, coordinator, a, b)
    }

    fn bridge(amount_in: U256) -> CrossChainSwap {
        CrossChainSwap {
            token_in: TOKEN_A,
            token_out: TOKEN_B,
            amount_in,
            amount_out_min: U256::from(1),
            recipient: USER,
            src_chain: CHAIN_ID,
            dst_chain: DST,
            deadline: u64::MAX,
            data: Bytes::new(),
        }
    }

    fn user(value: u64) -> CallContext {
        CallContext::user(USER).with_value(U256::from(value))
    }

    #[tokio::test]
    async fn test_quote_selects_cheaper_provider() {
        let (_fx, coordinator, _, _) = setup().await;
        let quote = coordinator
            .get_cross_chain_route(TOKEN_A, TOKEN_B, e18(100), CHAIN_ID, DST)
            .await
            .unwrap();
        assert!(quote.use_provider_a);
        assert_eq!(quote.fee, U256::from(1_000));
        assert_eq!(quote.amount_out, U256::from(EXPECTED_OUT));
        assert_eq!(decode_remaining_hops(&quote.route_data).unwrap().len(), 1);

        for (src, dst) in [(2, DST), (CHAIN_ID, CHAIN_ID), (CHAIN_ID, 99), (0, DST)] {
            assert!(matches!(
                coordinator
                    .get_cross_chain_route(TOKEN_A, TOKEN_B, e18(1), src, dst)
                    .await,
                Err(ExchangeError::InvalidChainId(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_quote_passes_through_unquotable_input() {
        let (fx, coordinator, _, _) = setup().await;
        // one wei rounds to zero output in the local pool
        assert!(matches!(
            fx.router.get_optimal_route(TOKEN_A, TOKEN_B, U256::from(1), CHAIN_ID),
            Err(ExchangeError::InsufficientLiquidity)
        ));

        let quote = coordinator
            .get_cross_chain_route(TOKEN_A, TOKEN_B, U256::from(1), CHAIN_ID, DST)
            .await
            .unwrap();
        assert_eq!(quote.amount_out, U256::from(1));
        assert!(decode_remaining_hops(&quote.route_data).unwrap().is_empty());
        assert!(quote.use_provider_a);
    }

    #[tokio::test]
    async fn test_dispatch_escrows_and_pays_fee() {
        let (fx, coordinator, a, b) = setup().await;
        let op = coordinator
            .execute_cross_chain_route(&user(1_500), &bridge(e18(100)))
            .await
            .unwrap();

        assert_eq!(op.state, OperationState::Pending);
        assert_eq!(op.provider.as_deref(), Some("alpha"));
        assert_eq!(op.amount, e18(100));
        assert_eq!(coordinator.get_operation(op.operation_id).await.unwrap(), op);

        assert_eq!(fx.a.balance_of(USER).await.unwrap(), U256::ZERO);
        assert_eq!(fx.a.balance_of(ROUTER).await.unwrap(), e18(100));
        assert_eq!(fx.native.balance_of(COLLECTOR_A).await.unwrap(), U256::from(1_000));
        assert_eq!(fx.native.balance_of(USER).await.unwrap(), U256::from(4_000));
        assert_eq!(fx.native.balance_of(ROUTER).await.unwrap(), U256::ZERO);

        let sent = a.sent();
        assert_eq!(sent.len(), 1);
        assert!(b.sent().is_empty());
        assert_eq!(sent[0].destination, REMOTE_ROUTER);
        assert_eq!(Some(sent[0].message_id), op.message_id);
        let message = SettlementMessage::decode(&sent[0].payload).unwrap();
        assert_eq!(message.operation_id, op.operation_id);
        assert_eq!(message.amount, e18(100));
        assert_eq!(message.recipient, USER);
    }

    #[tokio::test]
    async fn test_insufficient_fee_rolls_back() {
        let (fx, coordinator, a, _) = setup().await;
        let result = coordinator
            .execute_cross_chain_route(&user(500), &bridge(e18(100)))
            .await;
        match result {
            Err(ExchangeError::InsufficientFee { required, provided }) => {
                assert_eq!(required, U256::from(1_000));
                assert_eq!(provided, U256::from(500));
            }
            other => panic!("unexpected result {:?}", other),
        }

        assert_eq!(fx.a.balance_of(USER).await.unwrap(), e18(100));
        assert_eq!(fx.native.balance_of(USER).await.unwrap(), U256::from(5_000));
        assert_eq!(coordinator.store().stats().await.unwrap().total(), 0);
        assert!(a.sent().is_empty());
    }

    #[tokio::test]
    async fn test_validation() {
        let (_fx, coordinator, _, _) = setup().await;
        let mut no_recipient = bridge(e18(1));
        no_recipient.recipient = Address::ZERO;
        assert!(matches!(
            coordinator
                .execute_cross_chain_route(&user(1_000), &no_recipient)
                .await,
            Err(ExchangeError::InvalidRecipient(_))
        ));

        let mut unknown_dst = bridge(e18(1));
        unknown_dst.dst_chain = 42;
        assert!(matches!(
            coordinator
                .execute_cross_chain_route(&user(1_000), &unknown_dst)
                .await,
            Err(ExchangeError::InvalidChainId(42))
        ));

        assert!(matches!(
            coordinator
                .execute_cross_chain_route(&user(1_000), &bridge(U256::ZERO))
                .await,
            Err(ExchangeError::InvalidAmount(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_operation_in_same_second() {
        let (_fx, coordinator, _, _) = setup().await;
        let ctx = user(1_000).at(1_700_000_000);
        coordinator
            .execute_cross_chain_route(&ctx, &bridge(e18(10)))
            .await
            .unwrap();
        assert!(matches!(
            coordinator.execute_cross_chain_route(&ctx, &bridge(e18(10))).await,
            Err(ExchangeError::DuplicateOperation(_))
        ));
        assert!(coordinator
            .execute_cross_chain_route(&ctx.at(1_700_000_001), &bridge(e18(10)))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_unavailable_primary_fails_over() {
        let mut alpha = MockMessageTransport::new();
        alpha.expect_name().returning(|| "alpha".to_string());
        alpha.expect_endpoint().return_const(ENDPOINT_A);
        alpha.expect_fee_collector().return_const(COLLECTOR_A);
        alpha
            .expect_estimate_fee()
            .returning(|_, _| Ok(U256::from(1_000)));
        alpha
            .expect_send()
            .times(1)
            .returning(|_, _, _| Err(DispatchError::Unavailable("rpc down".into())));
        let beta = loopback("beta", Address::repeat_byte(0xeb), COLLECTOR_B, 2_000);

        let (fx, coordinator) = setup_with(Arc::new(alpha), beta.clone()).await;
        let mut events = fx.router.events().subscribe();

        let op = coordinator
            .execute_cross_chain_route(&user(2_500), &bridge(e18(100)))
            .await
            .unwrap();
        assert_eq!(op.state, OperationState::Pending);
        assert_eq!(op.provider.as_deref(), Some("beta"));
        assert_eq!(beta.sent().len(), 1);
        assert_eq!(fx.native.balance_of(COLLECTOR_B).await.unwrap(), U256::from(2_000));
        assert_eq!(fx.native.balance_of(USER).await.unwrap(), U256::from(3_000));

        match events.recv().await.unwrap() {
            ExchangeEvent::TransportFailover { from, to, .. } => {
                assert_eq!((from.as_str(), to.as_str()), ("alpha", "beta"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(
            events.recv().await.unwrap(),
            ExchangeEvent::CrossChainRouteExecuted { .. }
        ));
    }

    #[tokio::test]
    async fn test_rejected_dispatch_is_recoverable_once() {
        let (fx, coordinator, a, _) = setup().await;
        a.set_mode(LoopbackMode::Reject("destination paused".into()));

        let op = coordinator
            .execute_cross_chain_route(&user(1_500), &bridge(e18(100)))
            .await
            .unwrap();
        assert_eq!(op.state, OperationState::Failed);
        assert_eq!(op.failure_reason.as_deref(), Some("destination paused"));
        assert_eq!(fx.native.balance_of(USER).await.unwrap(), U256::from(5_000));
        assert_eq!(fx.a.balance_of(ROUTER).await.unwrap(), e18(100));

        let stranger = CallContext::user(Address::repeat_byte(0x77));
        assert!(matches!(
            coordinator
                .recover_failed_operation(&stranger, op.operation_id)
                .await,
            Err(ExchangeError::UnauthorizedAccess(_))
        ));

        let recovered = coordinator
            .recover_failed_operation(&CallContext::user(USER), op.operation_id)
            .await
            .unwrap();
        assert_eq!(recovered.state, OperationState::Recovered);
        assert_eq!(fx.a.balance_of(USER).await.unwrap(), e18(100));
        assert_eq!(fx.a.balance_of(ROUTER).await.unwrap(), U256::ZERO);

        assert!(matches!(
            coordinator
                .recover_failed_operation(&CallContext::user(USER), op.operation_id)
                .await,
            Err(ExchangeError::OperationNotRecoverable { .. })
        ));
        assert!(matches!(
            coordinator
                .recover_failed_operation(&CallContext::user(USER), B256::repeat_byte(1))
                .await,
            Err(ExchangeError::OperationNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_store_failure_after_send_keeps_escrow_recoverable_once() {
        let (fx, coordinator, a) = setup_flaky().await;
        // another user's escrow already held by the router
        fx.a.mint(ROUTER, e18(100)).await.unwrap();

        let op = coordinator
            .execute_cross_chain_route(&user(1_500), &bridge(e18(100)))
            .await
            .unwrap();
        assert_eq!(a.sent().len(), 1);
        assert_eq!(fx.a.balance_of(USER).await.unwrap(), U256::ZERO);
        assert_eq!(fx.a.balance_of(ROUTER).await.unwrap(), e18(200));
        assert_eq!(fx.native.balance_of(COLLECTOR_A).await.unwrap(), U256::from(1_000));
        assert_eq!(fx.native.balance_of(USER).await.unwrap(), U256::from(4_000));

        let stored = coordinator.get_operation(op.operation_id).await.unwrap();
        assert_eq!(stored.state, OperationState::Pending);
        assert_eq!(coordinator.store().stats().await.unwrap().pending, 1);

        let user_ctx = CallContext::user(USER);
        coordinator
            .recover_failed_operation(&user_ctx, op.operation_id)
            .await
            .unwrap();
        assert_eq!(fx.a.balance_of(USER).await.unwrap(), e18(100));
        assert_eq!(fx.a.balance_of(ROUTER).await.unwrap(), e18(100));
        assert!(matches!(
            coordinator
                .recover_failed_operation(&user_ctx, op.operation_id)
                .await,
            Err(ExchangeError::OperationNotRecoverable { .. })
        ));
        assert_eq!(fx.a.balance_of(ROUTER).await.unwrap(), e18(100));
    }

    #[tokio::test]
    async fn test_store_failure_after_rejection_leaves_pending_record() {
        let (fx, coordinator, a) = setup_flaky().await;
        a.set_mode(LoopbackMode::Reject("destination paused".into()));

        let op = coordinator
            .execute_cross_chain_route(&user(1_500), &bridge(e18(100)))
            .await
            .unwrap();
        assert_eq!(op.state, OperationState::Pending);
        assert_eq!(
            coordinator.get_operation(op.operation_id).await.unwrap().state,
            OperationState::Pending
        );
        assert_eq!(fx.native.balance_of(USER).await.unwrap(), U256::from(5_000));
        assert_eq!(fx.a.balance_of(ROUTER).await.unwrap(), e18(100));

        coordinator
            .recover_failed_operation(&CallContext::user(USER), op.operation_id)
            .await
            .unwrap();
        assert_eq!(fx.a.balance_of(USER).await.unwrap(), e18(100));
        assert_eq!(fx.a.balance_of(ROUTER).await.unwrap(), U256::ZERO);
    }

    #[tokio::test]
    async fn test_settlement_authorities() {
        let (_fx, coordinator, _, _) = setup().await;
        let op = coordinator
            .execute_cross_chain_route(&user(1_000), &bridge(e18(50)))
            .await
            .unwrap();
        let id = op.operation_id;

        assert!(matches!(
            coordinator
                .confirm_settlement(&CallContext::user(USER), id)
                .await,
            Err(ExchangeError::UnauthorizedAccess(_))
        ));

        let completed = coordinator
            .confirm_settlement(&CallContext::user(ENDPOINT_A), id)
            .await
            .unwrap();
        assert_eq!(completed.state, OperationState::Completed);

        assert!(matches!(
            coordinator.report_failure(&owner(), id, "late").await,
            Err(ExchangeError::InvalidStateTransition { .. })
        ));
        assert!(matches!(
            coordinator
                .recover_failed_operation(&CallContext::user(USER), id)
                .await,
            Err(ExchangeError::OperationNotRecoverable { .. })
        ));
    }

    #[tokio::test]
    async fn test_reported_failure_then_recovery() {
        let (fx, coordinator, _, _) = setup().await;
        let op = coordinator
            .execute_cross_chain_route(&user(1_000), &bridge(e18(40)))
            .await
            .unwrap();

        let failed = coordinator
            .report_failure(&owner(), op.operation_id, "slippage on destination")
            .await
            .unwrap();
        assert_eq!(failed.state, OperationState::Failed);

        coordinator
            .recover_failed_operation(&CallContext::user(USER), op.operation_id)
            .await
            .unwrap();
        assert_eq!(fx.a.balance_of(USER).await.unwrap(), e18(100));
        let stats = coordinator.store().stats().await.unwrap();
        assert_eq!(stats.recovered, 1);
    }

    fn multi_path(chain_path: Vec<u64>, route_data: Vec<Bytes>, token_out: Address) -> MultiPathSwap {
        MultiPathSwap {
            token_in: TOKEN_A,
            token_out,
            amount_in: e18(100),
            amount_out_min: U256::ZERO,
            recipient: Address::repeat_byte(0x5e),
            chain_path,
            route_data,
            deadline: u64::MAX,
        }
    }

    #[tokio::test]
    async fn test_multi_path_fully_local() {
        let (fx, coordinator, a, _) = setup().await;
        let swap = multi_path(vec![CHAIN_ID], vec![encode_hop(TOKEN_B, 500)], TOKEN_B);

        let outcome = coordinator
            .execute_multi_path_route(&user(0), &swap)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            MultiPathOutcome::Local {
                amount_out: U256::from(EXPECTED_OUT)
            }
        );
        assert_eq!(
            fx.b.balance_of(swap.recipient).await.unwrap(),
            U256::from(EXPECTED_OUT)
        );
        assert!(a.sent().is_empty());

        let mut strict = swap.clone();
        strict.amount_out_min = U256::from(EXPECTED_OUT) * U256::from(2);
        fx.a.mint(USER, e18(100)).await.unwrap();
        assert!(matches!(
            coordinator.execute_multi_path_route(&user(0), &strict).await,
            Err(ExchangeError::InsufficientOutputAmount { .. })
        ));
        assert_eq!(fx.a.balance_of(USER).await.unwrap(), e18(100));
    }

    #[tokio::test]
    async fn test_multi_path_dispatches_remainder() {
        let (fx, coordinator, a, _) = setup().await;
        let swap = multi_path(
            vec![CHAIN_ID, DST],
            vec![encode_hop(TOKEN_B, 500), encode_hop(TOKEN_C, 3000)],
            TOKEN_C,
        );

        let outcome = coordinator
            .execute_multi_path_route(&user(1_000), &swap)
            .await
            .unwrap();
        let operation = match outcome {
            MultiPathOutcome::Dispatched {
                local_amount_out,
                operation,
            } => {
                assert_eq!(local_amount_out, U256::from(EXPECTED_OUT));
                operation
            }
            other => panic!("unexpected outcome {:?}", other),
        };
        assert_eq!(operation.token_in, TOKEN_B);
        assert_eq!(operation.token_out, TOKEN_C);
        assert_eq!(operation.amount, U256::from(EXPECTED_OUT));
        assert_eq!(operation.dst_chain, DST);
        assert_eq!(fx.b.balance_of(ROUTER).await.unwrap(), U256::from(EXPECTED_OUT));

        let message = SettlementMessage::decode(&a.sent()[0].payload).unwrap();
        assert_eq!(
            decode_remaining_hops(&message.data).unwrap(),
            vec![encode_hop(TOKEN_C, 3000)]
        );
    }

    #[tokio::test]
    async fn test_multi_path_route_data_checks() {
        let (_fx, coordinator, _, _) = setup().await;
        let cases = [
            multi_path(vec![], vec![], TOKEN_B),
            multi_path(vec![CHAIN_ID, DST], vec![encode_hop(TOKEN_B, 500)], TOKEN_B),
            multi_path(vec![CHAIN_ID], vec![encode_hop(TOKEN_C, 500)], TOKEN_B),
            multi_path(vec![CHAIN_ID], vec![Bytes::from_static(&[1, 2])], TOKEN_B),
        ];
        for swap in cases {
            assert!(matches!(
                coordinator.execute_multi_path_route(&user(0), &swap).await,
                Err(ExchangeError::InvalidRouteData(_))
            ));
        }

        let unknown_chain = multi_path(
            vec![CHAIN_ID, 77],
            vec![encode_hop(TOKEN_C, 500), encode_hop(TOKEN_B, 500)],
            TOKEN_B,
        );
        assert!(matches!(
            coordinator.execute_multi_path_route(&user(0), &unknown_chain).await,
            Err(ExchangeError::InvalidChainId(77))
        ));
    }
}
