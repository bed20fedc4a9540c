//! Access-control capabilities composed by the router and coordinator
//!
//! - [`Ownership`]: single-owner authorization
//! - [`PauseState`]: emergency stop flag
//! - [`ReentrancyGuard`]: call-tree scoped mutual exclusion

pub mod guard;
pub mod ownable;
pub mod pausable;

pub use guard::ReentrancyGuard;
pub use ownable::Ownership;
pub use pausable::PauseState;
