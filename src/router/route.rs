use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::SolValue;
use serde::{Deserialize, Serialize};

/// One pool traversal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteHop {
    pub pool_ref: Address,
    pub pool_id: B256,
    pub token_in: Address,
    pub token_out: Address,
    pub fee: u32,
    pub amount_in: U256,
    pub amount_out: U256,
    #[serde(default)]
    pub data: Bytes,
}

/// Ordered hops converting one token into another
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub hops: Vec<RouteHop>,
}

impl Route {
    pub fn single(hop: RouteHop) -> Self {
        Self { hops: vec![hop] }
    }

    pub fn amount_in(&self) -> U256 {
        self.hops.first().map(|hop| hop.amount_in).unwrap_or_default()
    }

    pub fn amount_out(&self) -> U256 {
        self.hops.last().map(|hop| hop.amount_out).unwrap_or_default()
    }

    pub fn token_in(&self) -> Option<Address> {
        self.hops.first().map(|hop| hop.token_in)
    }

    pub fn token_out(&self) -> Option<Address> {
        self.hops.last().map(|hop| hop.token_out)
    }

    /// Hash over the pools and tokens traversed
    pub fn hash(&self) -> B256 {
        let path: Vec<(B256, Address, Address, u32)> = self
            .hops
            .iter()
            .map(|hop| (hop.pool_id, hop.token_in, hop.token_out, hop.fee))
            .collect();
        keccak256(path.abi_encode())
    }

    /// Per-hop instructions in the multi-path wire format
    pub fn hop_data(&self) -> Vec<Bytes> {
        self.hops
            .iter()
            .map(|hop| encode_hop(hop.token_out, hop.fee))
            .collect()
    }
}

/// abi.encode(address tokenOut, uint32 fee)
pub fn encode_hop(token_out: Address, fee: u32) -> Bytes {
    Bytes::from((token_out, fee).abi_encode_params())
}

/// Inverse of [`encode_hop`]
pub fn decode_hop(data: &[u8]) -> Option<(Address, u32)> {
    <(Address, u32)>::abi_decode_params(data, true).ok()
}
