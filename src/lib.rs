//! DEX settlement engine
//!
//! Constant-product and concentrated-liquidity pools behind a fee registry,
//! a swap router that executes routes atomically, and a coordinator that
//! escrows input and dispatches settlement messages to other chains through
//! one of two interchangeable transports.

pub mod access;
pub mod api;
pub mod config;
pub mod context;
pub mod crosschain;
pub mod engine;
pub mod error;
pub mod events;
pub mod fees;
pub mod math;
pub mod metrics;
pub mod pool;
pub mod router;
pub mod state;
pub mod token;
pub mod transport;

pub use context::CallContext;
pub use crosschain::{CrossChainCoordinator, CrossChainOperation, OperationState};
pub use engine::Engine;
pub use error::{ErrorKind, ExchangeError, ExchangeResult};
pub use events::{EventBus, ExchangeEvent};
pub use router::{Route, Router, SwapRequest};
