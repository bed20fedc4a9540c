//! Message transports for cross-chain dispatch
//!
//! Two interchangeable providers sit in slots A and B. Quotes ask both and
//! take the cheaper; dispatch goes to the chosen slot and fails over to the
//! other one when the chosen provider is unavailable. A provider that
//! rejects the message is final, there is no retry.

mod loopback;

pub use loopback::{LoopbackMode, LoopbackTransport, SentMessage};

use crate::error::{ExchangeError, ExchangeResult};

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Synchronous dispatch failure reported by a provider
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The provider refused the message; trying elsewhere will not help
    #[error("message rejected: {0}")]
    Rejected(String),

    /// The provider could not be reached
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

/// A messaging provider able to carry a payload to another chain
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageTransport: Send + Sync {
    fn name(&self) -> String;

    /// Address inbound settlement confirmations arrive from
    fn endpoint(&self) -> Address;

    /// Account the native message fee is paid to
    fn fee_collector(&self) -> Address;

    async fn estimate_fee(&self, dst_chain: u64, payload: &[u8]) -> Result<U256, DispatchError>;

    /// Hand the payload off, returning the provider's message id
    async fn send(
        &self,
        dst_chain: u64,
        destination: Address,
        payload: Bytes,
    ) -> Result<B256, DispatchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderSlot {
    A,
    B,
}

impl ProviderSlot {
    pub fn other(self) -> Self {
        match self {
            ProviderSlot::A => ProviderSlot::B,
            ProviderSlot::B => ProviderSlot::A,
        }
    }
}

impl fmt::Display for ProviderSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderSlot::A => write!(f, "A"),
            ProviderSlot::B => write!(f, "B"),
        }
    }
}

/// Cheapest provider for a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportQuote {
    pub slot: ProviderSlot,
    pub fee: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent {
        slot: ProviderSlot,
        provider: String,
        message_id: B256,
        fee: U256,
    },
    Failed {
        slot: ProviderSlot,
        provider: String,
        reason: String,
    },
}

/// Result of a dispatch attempt, including any failover taken on the way
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub outcome: DispatchOutcome,
    /// (from, to, reason) when the first provider was unavailable
    pub failover: Option<(String, String, String)>,
}

pub struct TransportManager {
    a: Arc<dyn MessageTransport>,
    b: Arc<dyn MessageTransport>,
}

impl TransportManager {
    pub fn new(a: Arc<dyn MessageTransport>, b: Arc<dyn MessageTransport>) -> Self {
        info!("Transports configured: A={} B={}", a.name(), b.name());
        Self { a, b }
    }

    pub fn get(&self, slot: ProviderSlot) -> &Arc<dyn MessageTransport> {
        match slot {
            ProviderSlot::A => &self.a,
            ProviderSlot::B => &self.b,
        }
    }

    /// Whether `account` is one of the providers' inbound endpoints
    pub fn is_endpoint(&self, account: Address) -> bool {
        self.a.endpoint() == account || self.b.endpoint() == account
    }

    /// Ask both providers and take the cheaper, A on ties
    pub async fn quote(&self, dst_chain: u64, payload: &[u8]) -> ExchangeResult<TransportQuote> {
        let (fee_a, fee_b) = futures::join!(
            self.a.estimate_fee(dst_chain, payload),
            self.b.estimate_fee(dst_chain, payload)
        );

        let quote = match (fee_a, fee_b) {
            (Ok(a), Ok(b)) if b < a => TransportQuote {
                slot: ProviderSlot::B,
                fee: b,
            },
            (Ok(a), Ok(_)) => TransportQuote {
                slot: ProviderSlot::A,
                fee: a,
            },
            (Ok(a), Err(e)) => {
                warn!("Provider {} cannot quote chain {}: {}", self.b.name(), dst_chain, e);
                TransportQuote {
                    slot: ProviderSlot::A,
                    fee: a,
                }
            }
            (Err(e), Ok(b)) => {
                warn!("Provider {} cannot quote chain {}: {}", self.a.name(), dst_chain, e);
                TransportQuote {
                    slot: ProviderSlot::B,
                    fee: b,
                }
            }
            (Err(ea), Err(eb)) => {
                return Err(ExchangeError::NoTransportAvailable(format!(
                    "{}: {}; {}: {}",
                    self.a.name(),
                    ea,
                    self.b.name(),
                    eb
                )));
            }
        };

        debug!(
            "Chain {} quote: provider {} fee {}",
            dst_chain, quote.slot, quote.fee
        );
        Ok(quote)
    }

    /// Send through `quote.slot`, failing over once if it is unavailable
    ///
    /// The fallback provider is re-quoted and must fit in `budget`.
    pub async fn dispatch(
        &self,
        quote: TransportQuote,
        dst_chain: u64,
        destination: Address,
        payload: Bytes,
        budget: U256,
    ) -> Dispatch {
        let primary = self.get(quote.slot);
        let reason = match self
            .send_timed(primary, dst_chain, destination, payload.clone())
            .await
        {
            Ok(message_id) => {
                return Dispatch {
                    outcome: DispatchOutcome::Sent {
                        slot: quote.slot,
                        provider: primary.name(),
                        message_id,
                        fee: quote.fee,
                    },
                    failover: None,
                };
            }
            Err(DispatchError::Rejected(reason)) => {
                return Dispatch {
                    outcome: DispatchOutcome::Failed {
                        slot: quote.slot,
                        provider: primary.name(),
                        reason,
                    },
                    failover: None,
                };
            }
            Err(DispatchError::Unavailable(reason)) => reason,
        };

        let slot = quote.slot.other();
        let fallback = self.get(slot);
        warn!(
            "Provider {} unavailable ({}), failing over to {}",
            primary.name(),
            reason,
            fallback.name()
        );
        crate::metrics::record_failover(&primary.name(), &fallback.name());
        let failover = Some((primary.name(), fallback.name(), reason));

        let failed = |reason: String| Dispatch {
            outcome: DispatchOutcome::Failed {
                slot,
                provider: fallback.name(),
                reason,
            },
            failover: failover.clone(),
        };

        let fee = match fallback.estimate_fee(dst_chain, &payload).await {
            Ok(fee) => fee,
            Err(e) => return failed(e.to_string()),
        };
        if fee > budget {
            return failed(format!("fallback fee {} exceeds attached value {}", fee, budget));
        }

        match self
            .send_timed(fallback, dst_chain, destination, payload)
            .await
        {
            Ok(message_id) => Dispatch {
                outcome: DispatchOutcome::Sent {
                    slot,
                    provider: fallback.name(),
                    message_id,
                    fee,
                },
                failover: failover.clone(),
            },
            Err(e) => failed(e.to_string()),
        }
    }

    async fn send_timed(
        &self,
        transport: &Arc<dyn MessageTransport>,
        dst_chain: u64,
        destination: Address,
        payload: Bytes,
    ) -> Result<B256, DispatchError> {
        let name = transport.name();
        let start = Instant::now();
        let result = transport.send(dst_chain, destination, payload).await;
        crate::metrics::record_dispatch_latency(&name, start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            warn!("Dispatch via {} to chain {} failed: {}", name, dst_chain, e);
            crate::metrics::record_dispatch_failure(&name);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    fn mock(name: &'static str, fee: Result<u64, DispatchError>) -> MockMessageTransport {
        let mut transport = MockMessageTransport::new();
        transport.expect_name().returning(move || name.to_string());
        transport
            .expect_endpoint()
            .return_const(Address::repeat_byte(name.as_bytes()[0]));
        transport
            .expect_estimate_fee()
            .returning(move |_, _| fee.clone().map(U256::from));
        transport
    }

    #[tokio::test]
    async fn test_quote_prefers_cheaper_and_a_on_tie() {
        let manager = TransportManager::new(
            Arc::new(mock("alpha", Ok(100))),
            Arc::new(mock("beta", Ok(90))),
        );
        let quote = manager.quote(10, b"payload").await.unwrap();
        assert_eq!(quote.slot, ProviderSlot::B);
        assert_eq!(quote.fee, U256::from(90));

        let tied = TransportManager::new(
            Arc::new(mock("alpha", Ok(100))),
            Arc::new(mock("beta", Ok(100))),
        );
        assert_eq!(tied.quote(10, b"payload").await.unwrap().slot, ProviderSlot::A);
    }

    #[tokio::test]
    async fn test_quote_uses_surviving_provider() {
        let manager = TransportManager::new(
            Arc::new(mock("alpha", Err(DispatchError::Unavailable("down".into())))),
            Arc::new(mock("beta", Ok(250))),
        );
        let quote = manager.quote(10, b"payload").await.unwrap();
        assert_eq!(quote.slot, ProviderSlot::B);

        let dead = TransportManager::new(
            Arc::new(mock("alpha", Err(DispatchError::Unavailable("down".into())))),
            Arc::new(mock("beta", Err(DispatchError::Rejected("no route".into())))),
        );
        assert!(matches!(
            dead.quote(10, b"payload").await,
            Err(ExchangeError::NoTransportAvailable(_))
        ));
    }

    #[tokio::test]
    async fn test_dispatch_fails_over_when_unavailable() {
        let mut alpha = mock("alpha", Ok(100));
        alpha
            .expect_send()
            .times(1)
            .returning(|_, _, _| Err(DispatchError::Unavailable("timeout".into())));
        let mut beta = mock("beta", Ok(120));
        beta.expect_send()
            .with(eq(10u64), eq(Address::repeat_byte(9)), mockall::predicate::always())
            .times(1)
            .returning(|_, _, _| Ok(B256::repeat_byte(7)));

        let manager = TransportManager::new(Arc::new(alpha), Arc::new(beta));
        let quote = TransportQuote {
            slot: ProviderSlot::A,
            fee: U256::from(100),
        };
        let dispatch = manager
            .dispatch(quote, 10, Address::repeat_byte(9), Bytes::from_static(b"x"), U256::from(200))
            .await;

        assert_eq!(
            dispatch.outcome,
            DispatchOutcome::Sent {
                slot: ProviderSlot::B,
                provider: "beta".to_string(),
                message_id: B256::repeat_byte(7),
                fee: U256::from(120),
            }
        );
        let (from, to, _) = dispatch.failover.unwrap();
        assert_eq!((from.as_str(), to.as_str()), ("alpha", "beta"));
    }

    #[tokio::test]
    async fn test_rejection_is_final() {
        let mut alpha = mock("alpha", Ok(100));
        alpha
            .expect_send()
            .times(1)
            .returning(|_, _, _| Err(DispatchError::Rejected("bad payload".into())));
        let mut beta = mock("beta", Ok(120));
        beta.expect_send().never();

        let manager = TransportManager::new(Arc::new(alpha), Arc::new(beta));
        let quote = TransportQuote {
            slot: ProviderSlot::A,
            fee: U256::from(100),
        };
        let dispatch = manager
            .dispatch(quote, 10, Address::ZERO, Bytes::new(), U256::from(1_000))
            .await;

        assert!(dispatch.failover.is_none());
        match dispatch.outcome {
            DispatchOutcome::Failed { slot, reason, .. } => {
                assert_eq!(slot, ProviderSlot::A);
                assert_eq!(reason, "bad payload");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fallback_over_budget_fails() {
        let mut alpha = mock("alpha", Ok(100));
        alpha
            .expect_send()
            .returning(|_, _, _| Err(DispatchError::Unavailable("down".into())));
        let mut beta = mock("beta", Ok(500));
        beta.expect_send().never();

        let manager = TransportManager::new(Arc::new(alpha), Arc::new(beta));
        let quote = TransportQuote {
            slot: ProviderSlot::A,
            fee: U256::from(100),
        };
        let dispatch = manager
            .dispatch(quote, 10, Address::ZERO, Bytes::new(), U256::from(200))
            .await;
        assert!(matches!(
            dispatch.outcome,
            DispatchOutcome::Failed {
                slot: ProviderSlot::B,
                ..
            }
        ));
        assert!(dispatch.failover.is_some());
    }
}
