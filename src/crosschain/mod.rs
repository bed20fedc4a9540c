//! Cross-chain settlement
//!
//! Operations move `Pending -> Completed`, `Pending -> Failed -> Recovered`
//! or `Pending -> Recovered`. Nothing leaves `Completed` or `Recovered`.

pub mod coordinator;
pub mod message;
pub mod operation;

pub use coordinator::{
    CrossChainCoordinator, CrossChainQuote, CrossChainSwap, MultiPathOutcome, MultiPathSwap,
};
pub use message::SettlementMessage;
pub use operation::{operation_id, CrossChainOperation, OperationState};
