//! Error types for the settlement engine

use alloy_primitives::{Address, B256, U256};
use thiserror::Error;

/// Coarse classification of an [`ExchangeError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authorization,
    Slippage,
    Reentrancy,
    Dispatch,
    Arithmetic,
    State,
    Infrastructure,
}

/// Main error type for pools, fees, routing and cross-chain settlement
#[derive(Error, Debug)]
pub enum ExchangeError {
    // Validation
    #[error("Invalid amount: {0}")]
    InvalidAmount(U256),

    #[error("Invalid token address: {0}")]
    InvalidTokenAddress(Address),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(Address),

    #[error("Invalid chain id: {0}")]
    InvalidChainId(u64),

    #[error("Invalid route data: {0}")]
    InvalidRouteData(String),

    #[error("Liquidity delta is zero")]
    LiquidityDeltaZero,

    #[error("Deadline {deadline} expired at {now}")]
    DeadlineExpired { deadline: u64, now: u64 },

    #[error("Token {0} is not part of the pool")]
    InvalidInputToken(Address),

    #[error("Invalid tick range [{lower}, {upper})")]
    InvalidTickRange { lower: i32, upper: i32 },

    #[error("Insufficient message fee: required {required}, provided {provided}")]
    InsufficientFee { required: U256, provided: U256 },

    // Fee registry
    #[error("Invalid fee configuration: fee {fee}, tick spacing {tick_spacing}")]
    InvalidFeeConfiguration { fee: u32, tick_spacing: i32 },

    #[error("Fee {0} already exists")]
    FeeAlreadyExists(u32),

    #[error("Fee tier {0} not supported")]
    FeeTierNotSupported(u32),

    #[error("Pool {0} already registered for dynamic fees")]
    PoolAlreadyRegistered(B256),

    #[error("Pool {0} not registered for dynamic fees")]
    PoolNotRegistered(B256),

    #[error("Invalid initial fee or updater")]
    InvalidInitialFeeOrUpdater,

    #[error("Unauthorized fee updater {0}")]
    UnauthorizedUpdater(Address),

    #[error("Invalid new updater {0}")]
    InvalidNewUpdater(Address),

    #[error("Invalid dynamic fee {0}")]
    InvalidDynamicFee(u32),

    // Authorization
    #[error("Account {0} is not the owner")]
    NotOwner(Address),

    #[error("Unauthorized access by {0}")]
    UnauthorizedAccess(Address),

    #[error("Only externally owned accounts may call")]
    EoaOnly,

    #[error("Contract is paused")]
    EnforcedPause,

    #[error("Contract is not paused")]
    ExpectedPause,

    // Slippage
    #[error("Insufficient output amount: got {actual}, minimum {min}")]
    InsufficientOutputAmount { actual: U256, min: U256 },

    // Reentrancy
    #[error("Reentrant call")]
    ReentrantCall,

    // Pools
    #[error("Pool {0} not found")]
    PoolNotFound(B256),

    #[error("Pool {0} already exists")]
    PoolAlreadyExists(B256),

    #[error("Insufficient liquidity")]
    InsufficientLiquidity,

    #[error("Insufficient liquidity burned: requested {requested}, available {available}")]
    InsufficientLiquidityBurned { requested: U256, available: U256 },

    #[error("Hooks {0} not registered")]
    HooksNotRegistered(Address),

    #[error("Hook rejected operation: {0}")]
    HookRejected(String),

    #[error("Pool {0} does not support this operation")]
    UnsupportedPoolOperation(B256),

    // Tokens
    #[error("Token {0} not registered")]
    TokenNotFound(Address),

    #[error("Transfer of token {token} failed: {reason}")]
    TransferFailed { token: Address, reason: String },

    #[error("Insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: U256, need: U256 },

    // Cross-chain
    #[error("No message transport available: {0}")]
    NoTransportAvailable(String),

    #[error("Operation {0} not found")]
    OperationNotFound(B256),

    #[error("Operation {0} already exists")]
    DuplicateOperation(B256),

    #[error("Operation {id} is not recoverable in state {state}")]
    OperationNotRecoverable { id: B256, state: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // Arithmetic
    #[error("Arithmetic overflow")]
    Overflow,

    #[error("Arithmetic underflow")]
    Underflow,

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Pool invariant violated")]
    InvariantViolated,

    // Infrastructure
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExchangeError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        use ExchangeError::*;
        match self {
            InvalidAmount(_)
            | InvalidTokenAddress(_)
            | InvalidRecipient(_)
            | InvalidChainId(_)
            | InvalidRouteData(_)
            | LiquidityDeltaZero
            | DeadlineExpired { .. }
            | InvalidInputToken(_)
            | InvalidTickRange { .. }
            | InsufficientFee { .. }
            | InvalidFeeConfiguration { .. }
            | InvalidInitialFeeOrUpdater
            | InvalidNewUpdater(_)
            | InvalidDynamicFee(_)
            | UnsupportedPoolOperation(_) => ErrorKind::Validation,

            NotOwner(_) | UnauthorizedAccess(_) | UnauthorizedUpdater(_) | EoaOnly => {
                ErrorKind::Authorization
            }

            InsufficientOutputAmount { .. } => ErrorKind::Slippage,

            ReentrantCall => ErrorKind::Reentrancy,

            NoTransportAvailable(_) => ErrorKind::Dispatch,

            Overflow | Underflow | DivisionByZero | InvariantViolated => ErrorKind::Arithmetic,

            Config(_) | Database(_) | Internal(_) => ErrorKind::Infrastructure,

            EnforcedPause
            | ExpectedPause
            | FeeAlreadyExists(_)
            | FeeTierNotSupported(_)
            | PoolAlreadyRegistered(_)
            | PoolNotRegistered(_)
            | PoolNotFound(_)
            | PoolAlreadyExists(_)
            | InsufficientLiquidity
            | InsufficientLiquidityBurned { .. }
            | HooksNotRegistered(_)
            | HookRejected(_)
            | TokenNotFound(_)
            | TransferFailed { .. }
            | InsufficientBalance { .. }
            | OperationNotFound(_)
            | DuplicateOperation(_)
            | OperationNotRecoverable { .. }
            | InvalidStateTransition { .. } => ErrorKind::State,
        }
    }

    /// Check if the error points at a broken invariant or lost funds
    pub fn should_alert(&self) -> bool {
        matches!(
            self,
            ExchangeError::InvariantViolated
                | ExchangeError::Database(_)
                | ExchangeError::Internal(_)
        )
    }
}

/// Result type for engine operations
pub type ExchangeResult<T> = Result<T, ExchangeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slippage_error_carries_both_amounts() {
        let err = ExchangeError::InsufficientOutputAmount {
            actual: U256::from(90),
            min: U256::from(100),
        };
        assert_eq!(err.kind(), ErrorKind::Slippage);
        assert_eq!(
            err.to_string(),
            "Insufficient output amount: got 90, minimum 100"
        );
    }

    #[test]
    fn test_error_classification() {
        assert_eq!(ExchangeError::EoaOnly.kind(), ErrorKind::Authorization);
        assert_eq!(ExchangeError::ReentrantCall.kind(), ErrorKind::Reentrancy);
        assert_eq!(ExchangeError::Overflow.kind(), ErrorKind::Arithmetic);
        assert_eq!(
            ExchangeError::InvalidAmount(U256::ZERO).kind(),
            ErrorKind::Validation
        );
        assert!(ExchangeError::InvariantViolated.should_alert());
        assert!(!ExchangeError::EnforcedPause.should_alert());
    }
}
