//! Error types for the vouch engine.

use thiserror::Error;

/// Result type alias for engine operations.
pub type VouchResult<T> = Result<T, VouchError>;

/// Errors surfaced by the store, ledger and state machines.
#[derive(Error, Debug)]
pub enum VouchError {
    #[error("Store error: {0}")]
    Store(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Agent already registered: {0}")]
    DuplicateAgent(String),

    #[error("Invalid pubkey {0:?}: expected 64 lowercase hex characters")]
    InvalidPubkey(String),

    #[error("Refusing to publish: message matches secret pattern '{0}'")]
    SecretLeak(String),

    #[error("Orchestration aborted: {0}")]
    Orchestration(#[from] OrchestrationError),
}

impl From<config::ConfigError> for VouchError {
    fn from(err: config::ConfigError) -> Self {
        VouchError::Config(err.to_string())
    }
}

/// Transport-level failure talking to an agent endpoint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Other(String),
}

/// Reasons a peer-review cycle is abandoned without writing anything.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestrationError {
    #[error("no eligible reviewer")]
    NoReviewer,

    #[error("no eligible worker")]
    NoWorker,

    #[error("worker {worker} did not deliver work: {reason}")]
    WorkerUnavailable { worker: String, reason: String },

    #[error("reviewer {reviewer} unreachable: {reason}")]
    ReviewerUnavailable { reviewer: String, reason: String },

    #[error("malformed reviewer response: {0}")]
    MalformedReview(String),

    #[error("agent {0} cannot review its own work")]
    SelfReview(String),
}
