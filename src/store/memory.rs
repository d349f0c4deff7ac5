//! In-process state store.
//!
//! Counters live in a sharded map; a procedure runs while holding its key's
//! shard lock, which makes it atomic with respect to every other caller in
//! this process. Suitable for single-instance deployments and tests; several
//! service instances need a shared store such as Redis.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use super::{AtomicStore, Outcome, PolicyStore, Procedure, StoreError};
use crate::clock::Clock;
use crate::ratelimit::{BucketState, PolicyRecord, SlidingWindowLog};

/// Counter state kept under one key.
#[derive(Debug, Clone)]
enum CounterState {
    Log(SlidingWindowLog),
    Bucket(BucketState),
}

#[derive(Debug, Clone)]
struct CounterEntry {
    state: CounterState,
    /// Last epoch millisecond at which the entry is still live
    expires_at_ms: i64,
}

impl CounterEntry {
    /// Live through `expires_at_ms` itself, like a Redis key TTL.
    fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms < now_ms
    }
}

/// Memory-backed [`AtomicStore`] and [`PolicyStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    counters: DashMap<String, CounterEntry>,
    policies: DashMap<String, PolicyRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of counter keys held, expired or not.
    pub fn counter_count(&self) -> usize {
        self.counters.len()
    }

    /// Whether a live counter exists under `key` at `now_ms`.
    pub fn has_counter(&self, key: &str, now_ms: i64) -> bool {
        self.counters
            .get(key)
            .map(|entry| !entry.is_expired(now_ms))
            .unwrap_or(false)
    }

    /// Drop counters that expired before `now_ms`.
    pub fn purge_expired(&self, now_ms: i64) -> usize {
        let before = self.counters.len();
        self.counters.retain(|_, entry| !entry.is_expired(now_ms));
        before - self.counters.len()
    }

    /// Purge expired counters every `every`, reading time from `clock`.
    ///
    /// The task holds only a weak reference and exits once the store is
    /// dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration, clock: Arc<dyn Clock>) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let purged = store.purge_expired(clock.now_ms());
                if purged > 0 {
                    debug!(purged, remaining = store.counter_count(), "Swept expired counters");
                }
            }
        })
    }

    fn apply(entry: &mut CounterEntry, key: &str, procedure: &Procedure) -> Result<Outcome, StoreError> {
        match (procedure, &mut entry.state) {
            (Procedure::SlidingWindow(args), CounterState::Log(log)) => {
                let outcome = log.admit(args);
                entry.expires_at_ms = args.now_ms + args.window_ms;
                Ok(outcome)
            }
            (Procedure::TokenBucket(args), CounterState::Bucket(bucket)) => {
                let outcome = bucket.take(args);
                entry.expires_at_ms = args.now_ms + args.window_ms;
                Ok(outcome)
            }
            _ => Err(StoreError::CorruptState {
                key: key.to_string(),
                reason: "counter holds state of a different algorithm".to_string(),
            }),
        }
    }

    fn fresh_entry(procedure: &Procedure) -> CounterEntry {
        match procedure {
            Procedure::SlidingWindow(args) => CounterEntry {
                state: CounterState::Log(SlidingWindowLog::new()),
                expires_at_ms: args.now_ms + args.window_ms,
            },
            Procedure::TokenBucket(args) => CounterEntry {
                state: CounterState::Bucket(BucketState::full(args.capacity, args.now_ms)),
                expires_at_ms: args.now_ms + args.window_ms,
            },
        }
    }
}

fn procedure_now(procedure: &Procedure) -> i64 {
    match procedure {
        Procedure::SlidingWindow(args) => args.now_ms,
        Procedure::TokenBucket(args) => args.now_ms,
    }
}

#[async_trait]
impl AtomicStore for MemoryStore {
    async fn atomic_apply(&self, key: &str, procedure: &Procedure) -> Result<Outcome, StoreError> {
        let now_ms = procedure_now(procedure);

        // The entry guard holds the shard write lock until it is dropped.
        match self.counters.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now_ms) {
                    trace!(key = %key, "Counter expired, starting fresh");
                    *occupied.get_mut() = Self::fresh_entry(procedure);
                }
                Self::apply(occupied.get_mut(), key, procedure)
            }
            MapEntry::Vacant(vacant) => {
                let mut entry = Self::fresh_entry(procedure);
                let outcome = Self::apply(&mut entry, key, procedure)?;
                vacant.insert(entry);
                Ok(outcome)
            }
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        let before = self.counters.len();
        self.counters.retain(|key, _| !key.starts_with(prefix));
        Ok((before - self.counters.len()) as u64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn insert_policy(&self, policy_id: &str, record: &PolicyRecord) -> Result<(), StoreError> {
        self.policies.insert(policy_id.to_string(), record.clone());
        Ok(())
    }

    async fn get_policy(&self, policy_id: &str) -> Result<Option<PolicyRecord>, StoreError> {
        Ok(self.policies.get(policy_id).map(|r| r.value().clone()))
    }

    async fn delete_policy(&self, policy_id: &str) -> Result<bool, StoreError> {
        Ok(self.policies.remove(policy_id).is_some())
    }
}
