//! Engine event types and the broadcast bus that carries them
//!
//! Every state change the engine commits is announced as an [`ExchangeEvent`].
//! Subscribers (the API, metrics, tests) receive them over a tokio broadcast
//! channel.

use crate::pool::PoolKey;

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Events emitted by pools, the fee registry, the router and the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExchangeEvent {
    /// Single-chain route executed
    RouteExecuted {
        user: Address,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        amount_out: U256,
        chain_id: u64,
        route_hash: B256,
    },

    /// Cross-chain route dispatched
    CrossChainRouteExecuted {
        operation_id: B256,
        user: Address,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        amount_out: U256,
        src_chain: u64,
        dst_chain: u64,
        route_hash: B256,
    },

    /// Cross-chain dispatch failed, funds held for recovery
    CrossChainDispatchFailed {
        operation_id: B256,
        user: Address,
        reason: String,
    },

    /// Destination settlement confirmed
    OperationCompleted { operation_id: B256 },

    /// Failed or stuck operation refunded to its user
    OperationRecovered {
        operation_id: B256,
        user: Address,
        token: Address,
        amount: U256,
    },

    /// Dispatch moved to the fallback transport
    TransportFailover { from: String, to: String, reason: String },

    /// Pool created
    PoolCreated {
        pool_id: B256,
        pool_ref: Address,
        key: PoolKey,
    },

    /// Liquidity added to a pool
    LiquidityAdded {
        pool_id: B256,
        provider: Address,
        amount0: U256,
        amount1: U256,
        liquidity: U256,
    },

    /// Liquidity removed from a pool
    LiquidityRemoved {
        pool_id: B256,
        provider: Address,
        amount0: U256,
        amount1: U256,
        liquidity: U256,
    },

    /// Static fee tier registered
    FeeConfigurationAdded { fee: u32, tick_spacing: i32 },

    /// Pool switched to dynamic fees
    DynamicFeePoolRegistered {
        pool_id_hash: B256,
        initial_fee: u32,
        updater: Address,
    },

    /// Dynamic fee changed
    DynamicFeeUpdated {
        pool_id_hash: B256,
        updater: Address,
        new_fee: u32,
    },

    /// Dynamic fee updater replaced
    FeeUpdaterSet {
        pool_id_hash: B256,
        old: Address,
        new: Address,
    },

    /// Accumulated native fees sent to the treasury
    FeesDistributed { treasury: Address, amount: U256 },

    /// Over-paid message fees returned
    ExcessFeeRefunded { recipient: Address, amount: U256 },

    /// Contract paused
    Paused { account: Address },

    /// Contract unpaused
    Unpaused { account: Address },

    /// Owner changed
    OwnershipTransferred {
        previous_owner: Address,
        new_owner: Address,
    },
}

impl ExchangeEvent {
    /// Get event name for metrics and logs
    pub fn name(&self) -> &'static str {
        match self {
            ExchangeEvent::RouteExecuted { .. } => "route_executed",
            ExchangeEvent::CrossChainRouteExecuted { .. } => "cross_chain_route_executed",
            ExchangeEvent::CrossChainDispatchFailed { .. } => "cross_chain_dispatch_failed",
            ExchangeEvent::OperationCompleted { .. } => "operation_completed",
            ExchangeEvent::OperationRecovered { .. } => "operation_recovered",
            ExchangeEvent::TransportFailover { .. } => "transport_failover",
            ExchangeEvent::PoolCreated { .. } => "pool_created",
            ExchangeEvent::LiquidityAdded { .. } => "liquidity_added",
            ExchangeEvent::LiquidityRemoved { .. } => "liquidity_removed",
            ExchangeEvent::FeeConfigurationAdded { .. } => "fee_configuration_added",
            ExchangeEvent::DynamicFeePoolRegistered { .. } => "dynamic_fee_pool_registered",
            ExchangeEvent::DynamicFeeUpdated { .. } => "dynamic_fee_updated",
            ExchangeEvent::FeeUpdaterSet { .. } => "fee_updater_set",
            ExchangeEvent::FeesDistributed { .. } => "fees_distributed",
            ExchangeEvent::ExcessFeeRefunded { .. } => "excess_fee_refunded",
            ExchangeEvent::Paused { .. } => "paused",
            ExchangeEvent::Unpaused { .. } => "unpaused",
            ExchangeEvent::OwnershipTransferred { .. } => "ownership_transferred",
        }
    }

    /// Check if this event concerns a cross-chain operation
    pub fn is_cross_chain(&self) -> bool {
        matches!(
            self,
            ExchangeEvent::CrossChainRouteExecuted { .. }
                | ExchangeEvent::CrossChainDispatchFailed { .. }
                | ExchangeEvent::OperationCompleted { .. }
                | ExchangeEvent::OperationRecovered { .. }
                | ExchangeEvent::TransportFailover { .. }
        )
    }
}

/// Broadcast bus for engine events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ExchangeEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event; having no subscribers is not an error
    pub fn emit(&self, event: ExchangeEvent) {
        debug!("Event: {}", event.name());
        crate::metrics::record_event(&event);
        let _ = self.tx.send(event);
    }

    /// Subscribe to all subsequent events
    pub fn subscribe(&self) -> broadcast::Receiver<ExchangeEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(10_000)
    }
}
