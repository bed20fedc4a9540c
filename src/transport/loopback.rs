use super::{DispatchError, MessageTransport};

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::SolValue;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// How a loopback transport answers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopbackMode {
    Healthy,
    Reject(String),
    Unavailable(String),
}

/// A message handed to a loopback transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub message_id: B256,
    pub dst_chain: u64,
    pub destination: Address,
    pub payload: Bytes,
}

/// In-process transport that records what it is given
///
/// The fee is `base_fee + fee_per_byte * payload.len()`.
pub struct LoopbackTransport {
    name: String,
    endpoint: Address,
    fee_collector: Address,
    base_fee: U256,
    fee_per_byte: U256,
    mode: Mutex<LoopbackMode>,
    nonce: AtomicU64,
    sent: Mutex<Vec<SentMessage>>,
}

impl LoopbackTransport {
    pub fn new(
        name: impl Into<String>,
        endpoint: Address,
        fee_collector: Address,
        base_fee: U256,
        fee_per_byte: U256,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint,
            fee_collector,
            base_fee,
            fee_per_byte,
            mode: Mutex::new(LoopbackMode::Healthy),
            nonce: AtomicU64::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn set_mode(&self, mode: LoopbackMode) {
        *self.mode.lock().unwrap_or_else(PoisonError::into_inner) = mode;
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn mode(&self) -> LoopbackMode {
        self.mode
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl MessageTransport for LoopbackTransport {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn endpoint(&self) -> Address {
        self.endpoint
    }

    fn fee_collector(&self) -> Address {
        self.fee_collector
    }

    async fn estimate_fee(&self, _dst_chain: u64, payload: &[u8]) -> Result<U256, DispatchError> {
        if let LoopbackMode::Unavailable(reason) = self.mode() {
            return Err(DispatchError::Unavailable(reason));
        }
        let bytes = U256::from(payload.len());
        Ok(self.base_fee.saturating_add(self.fee_per_byte.saturating_mul(bytes)))
    }

    async fn send(
        &self,
        dst_chain: u64,
        destination: Address,
        payload: Bytes,
    ) -> Result<B256, DispatchError> {
        match self.mode() {
            LoopbackMode::Healthy => {}
            LoopbackMode::Reject(reason) => return Err(DispatchError::Rejected(reason)),
            LoopbackMode::Unavailable(reason) => return Err(DispatchError::Unavailable(reason)),
        }

        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        let message_id = keccak256(
            (self.name.clone(), nonce, dst_chain, destination, payload.clone()).abi_encode(),
        );
        debug!(
            "{} carried message {} to chain {} ({} bytes)",
            self.name,
            message_id,
            dst_chain,
            payload.len()
        );
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SentMessage {
                message_id,
                dst_chain,
                destination,
                payload,
            });
        Ok(message_id)
    }
}
