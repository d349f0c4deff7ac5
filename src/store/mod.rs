//! Shared state store contract and adapters.
//!
//! All counter state lives in the store. Every limiter check is a single
//! [`AtomicStore::atomic_apply`] call: the trim/refill, the decision and the
//! write happen as one indivisible step per key, whatever the adapter.

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::ratelimit::{PolicyRecord, WindowEdge};

/// Prefix for policy records in the store.
pub const POLICY_PREFIX: &str = "policy:";

/// Errors raised by a store adapter.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Redis connection, protocol or script failure
    #[error("redis: {0}")]
    Redis(#[from] ::redis::RedisError),

    /// The store did not answer within the configured budget (milliseconds)
    #[error("store did not respond within {0} ms")]
    Timeout(u64),

    /// State under a key could not be interpreted
    #[error("corrupt state at {key}: {reason}")]
    CorruptState { key: String, reason: String },
}

/// Parameters of the sliding-window procedure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlidingWindowArgs {
    /// Caller timestamp, epoch milliseconds
    pub now_ms: i64,
    /// Window length in milliseconds; also the key TTL
    pub window_ms: i64,
    /// Maximum entries inside the window
    pub limit: u64,
    /// Entries to add when admitted
    pub cost: u64,
    /// Unique tag for this request's entries
    pub token: String,
    /// Whether an entry exactly `window_ms` old still counts
    pub edge: WindowEdge,
}

/// Parameters of the token-bucket procedure.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBucketArgs {
    /// Caller timestamp, epoch milliseconds
    pub now_ms: i64,
    /// Bucket capacity; a fresh bucket starts full
    pub capacity: u64,
    /// Span over which an empty bucket refills completely; also the key TTL
    pub window_ms: i64,
    /// Tokens to debit when admitted
    pub cost: u64,
}

/// A read-modify-write procedure executed atomically against one key.
#[derive(Debug, Clone, PartialEq)]
pub enum Procedure {
    SlidingWindow(SlidingWindowArgs),
    TokenBucket(TokenBucketArgs),
}

/// Result of an atomic procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub allowed: bool,
    pub remaining: u64,
}

impl Outcome {
    pub fn allowed(remaining: u64) -> Self {
        Self {
            allowed: true,
            remaining,
        }
    }

    pub fn denied(remaining: u64) -> Self {
        Self {
            allowed: false,
            remaining,
        }
    }
}

/// A store that can run a limiter procedure as one indivisible unit.
#[async_trait]
pub trait AtomicStore: Send + Sync {
    /// Run `procedure` against `key` atomically.
    ///
    /// Concurrent calls on the same key are totally ordered; each observes
    /// every call that completed before it. Calls on different keys are
    /// independent.
    async fn atomic_apply(&self, key: &str, procedure: &Procedure) -> Result<Outcome, StoreError>;

    /// Delete every counter whose key starts with `prefix`.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError>;

    /// Round trip to check the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Key-indexed storage for policy records.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Store a record under `policy_id`, replacing any previous one.
    async fn insert_policy(&self, policy_id: &str, record: &PolicyRecord) -> Result<(), StoreError>;

    /// Fetch a record without touching any counter state.
    async fn get_policy(&self, policy_id: &str) -> Result<Option<PolicyRecord>, StoreError>;

    /// Remove a record. Returns `false` when it did not exist.
    async fn delete_policy(&self, policy_id: &str) -> Result<bool, StoreError>;
}

/// Store key of a policy record.
pub fn policy_key(policy_id: &str) -> String {
    format!("{}{}", POLICY_PREFIX, policy_id)
}
