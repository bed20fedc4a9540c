use crate::error::{ExchangeError, ExchangeResult};

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::SolValue;

type Wire = (B256, Address, Address, Address, U256, U256, Bytes);

/// Instructions carried to the destination chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementMessage {
    pub operation_id: B256,
    pub recipient: Address,
    pub token_in: Address,
    pub token_out: Address,
    pub amount: U256,
    pub min_amount_out: U256,
    /// Free-form for direct routes, abi-encoded `bytes[]` hop list for multi-path
    pub data: Bytes,
}

impl SettlementMessage {
    pub fn encode(&self) -> Bytes {
        let wire: Wire = (
            self.operation_id,
            self.recipient,
            self.token_in,
            self.token_out,
            self.amount,
            self.min_amount_out,
            self.data.clone(),
        );
        Bytes::from(wire.abi_encode_params())
    }

    pub fn decode(payload: &[u8]) -> ExchangeResult<Self> {
        let (operation_id, recipient, token_in, token_out, amount, min_amount_out, data) =
            <Wire>::abi_decode_params(payload, true)
                .map_err(|e| ExchangeError::InvalidRouteData(e.to_string()))?;
        Ok(Self {
            operation_id,
            recipient,
            token_in,
            token_out,
            amount,
            min_amount_out,
            data,
        })
    }
}

/// abi.encode(bytes[]) of the hops left to execute remotely
pub fn encode_remaining_hops(hops: &[Bytes]) -> Bytes {
    Bytes::from(hops.to_vec().abi_encode())
}

pub fn decode_remaining_hops(data: &[u8]) -> ExchangeResult<Vec<Bytes>> {
    <Vec<Bytes>>::abi_decode(data, true).map_err(|e| ExchangeError::InvalidRouteData(e.to_string()))
}
