//! Component wiring from configuration

use crate::access::{Ownership, ReentrancyGuard};
use crate::config::Settings;
use crate::context::CallContext;
use crate::crosschain::CrossChainCoordinator;
use crate::events::EventBus;
use crate::fees::FeeRegistry;
use crate::pool::PoolManager;
use crate::router::{Router, RouterSettings};
use crate::state::OperationStore;
use crate::token::{InMemoryToken, TokenRegistry, NATIVE_TOKEN};
use crate::transport::{LoopbackTransport, MessageTransport, TransportManager};

use alloy_primitives::Address;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Every long-lived component of a running exchange
pub struct Engine {
    pub events: EventBus,
    pub fees: Arc<FeeRegistry>,
    pub pools: Arc<PoolManager>,
    pub tokens: Arc<TokenRegistry>,
    pub router: Arc<Router>,
    pub coordinator: Arc<CrossChainCoordinator>,
}

impl Engine {
    /// Build the engine and seed the configured fee tiers and pools
    pub fn from_settings(settings: &Settings, store: Arc<dyn OperationStore>) -> Result<Self> {
        let engine = &settings.engine;
        let events = EventBus::default();
        let ownership = Arc::new(Ownership::new(engine.owner));
        let as_owner = CallContext::user(engine.owner);

        let fees = Arc::new(FeeRegistry::new(
            ownership.clone(),
            events.clone(),
            settings.fees.dynamic.params()?,
        ));
        for tier in &settings.fees.tiers {
            fees.add_fee_configuration(&as_owner, tier.fee, tier.tick_spacing)
                .with_context(|| format!("Failed to add fee tier {}", tier.fee))?;
        }

        let tokens = Arc::new(TokenRegistry::new());
        tokens.register(NATIVE_TOKEN, Arc::new(InMemoryToken::new(NATIVE_TOKEN, "NATIVE")));
        for token in &settings.tokens {
            tokens.register(
                token.address,
                Arc::new(InMemoryToken::new(token.address, token.symbol.clone())),
            );
        }

        let pools = Arc::new(PoolManager::new(
            fees.clone(),
            ownership.clone(),
            events.clone(),
        ));
        for pool in &settings.pools {
            let key = pools
                .create_pool(
                    &as_owner,
                    pool.token_a,
                    pool.token_b,
                    pool.fee,
                    pool.hooks.unwrap_or(Address::ZERO),
                    pool.kind,
                )
                .with_context(|| {
                    format!("Failed to create pool {}/{} fee {}", pool.token_a, pool.token_b, pool.fee)
                })?;
            info!("Seeded pool {} at {}", key.id(), key.pool_ref());
        }

        let router = Arc::new(Router::new(
            RouterSettings {
                chain_id: engine.chain_id,
                address: engine.router_address,
                treasury: engine.treasury,
                base_tokens: engine.base_tokens.clone(),
                test_mode: engine.test_mode,
            },
            pools.clone(),
            tokens.clone(),
            ownership,
            Arc::new(ReentrancyGuard::new()),
            events.clone(),
        ));

        let loopback = |config: &crate::config::TransportConfig| -> Result<Arc<dyn MessageTransport>> {
            Ok(Arc::new(LoopbackTransport::new(
                config.name.clone(),
                config.endpoint,
                config.fee_collector,
                config.base_fee()?,
                config.fee_per_byte()?,
            )))
        };
        let transports = Arc::new(TransportManager::new(
            loopback(&settings.transports.a)?,
            loopback(&settings.transports.b)?,
        ));

        let destinations: HashMap<u64, Address> = settings
            .destinations
            .iter()
            .map(|d| (d.chain_id, d.router))
            .collect();
        let coordinator = Arc::new(CrossChainCoordinator::new(
            router.clone(),
            transports,
            store,
            destinations,
        ));

        info!(
            "Engine ready on chain {}: {} fee tiers, {} tokens, {} pools",
            engine.chain_id,
            settings.fees.tiers.len(),
            settings.tokens.len(),
            pools.pool_count()
        );

        Ok(Self {
            events,
            fees,
            pools,
            tokens,
            router,
            coordinator,
        })
    }
}
