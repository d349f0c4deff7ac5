//! Redis-backed state store.
//!
//! Limiter procedures run as Lua scripts, which Redis executes without
//! interleaving any other command, so each check is one atomic round trip
//! shared by every service instance pointed at the same server. Scripts are
//! sent by SHA (`EVALSHA`) and loaded on first use.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use tracing::{debug, info};

use super::{policy_key, AtomicStore, Outcome, PolicyStore, Procedure, StoreError};
use crate::ratelimit::{PolicyRecord, WindowEdge};

const SLIDING_WINDOW_SCRIPT: &str = include_str!("scripts/sliding_window.lua");
const TOKEN_BUCKET_SCRIPT: &str = include_str!("scripts/token_bucket.lua");

/// Keys requested per `SCAN` page when purging counters.
const SCAN_BATCH: usize = 500;

/// Shared Redis store for counters and policies.
pub struct RedisStore {
    conn: ConnectionManager,
    sliding_window: Script,
    token_bucket: Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to the Redis server at `url`.
    ///
    /// The connection manager reconnects on its own after transient
    /// failures; commands issued while disconnected fail instead of waiting.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        info!(addr = %client.get_connection_info().addr, "Connecting to Redis");

        let conn = ConnectionManager::new(client).await?;

        Ok(Self {
            conn,
            sliding_window: Script::new(SLIDING_WINDOW_SCRIPT),
            token_bucket: Script::new(TOKEN_BUCKET_SCRIPT),
        })
    }

    fn decode_outcome(key: &str, reply: &[i64]) -> Result<Outcome, StoreError> {
        match reply {
            [allowed, remaining] if *remaining >= 0 => Ok(Outcome {
                allowed: *allowed == 1,
                remaining: *remaining as u64,
            }),
            _ => Err(StoreError::CorruptState {
                key: key.to_string(),
                reason: format!("unexpected script reply {:?}", reply),
            }),
        }
    }

    fn decode_policy(
        policy_id: &str,
        mut fields: HashMap<String, String>,
    ) -> Result<Option<PolicyRecord>, StoreError> {
        if fields.is_empty() {
            return Ok(None);
        }

        let corrupt = |reason: String| StoreError::CorruptState {
            key: policy_key(policy_id),
            reason,
        };
        let int_field = |fields: &mut HashMap<String, String>, name: &str| {
            fields
                .remove(name)
                .ok_or_else(|| corrupt(format!("missing field {}", name)))?
                .parse::<i64>()
                .map_err(|e| corrupt(format!("field {}: {}", name, e)))
        };

        let limit = int_field(&mut fields, "limit")?;
        let window_seconds = int_field(&mut fields, "windowSeconds")?;
        let algorithm = fields
            .remove("algorithm")
            .ok_or_else(|| corrupt("missing field algorithm".to_string()))?;

        Ok(Some(PolicyRecord {
            algorithm,
            limit,
            window_seconds,
        }))
    }
}

/// Escape glob metacharacters so `prefix` matches literally in `SCAN MATCH`.
fn glob_escape(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl AtomicStore for RedisStore {
    async fn atomic_apply(&self, key: &str, procedure: &Procedure) -> Result<Outcome, StoreError> {
        let mut conn = self.conn.clone();

        let reply: Vec<i64> = match procedure {
            Procedure::SlidingWindow(args) => {
                let exclusive = match args.edge {
                    WindowEdge::Inclusive => "0",
                    WindowEdge::Exclusive => "1",
                };
                self.sliding_window
                    .key(key)
                    .arg(args.now_ms)
                    .arg(args.window_ms)
                    .arg(args.limit)
                    .arg(args.cost)
                    .arg(&args.token)
                    .arg(exclusive)
                    .invoke_async(&mut conn)
                    .await?
            }
            Procedure::TokenBucket(args) => {
                self.token_bucket
                    .key(key)
                    .arg(args.now_ms)
                    .arg(args.capacity)
                    .arg(args.window_ms)
                    .arg(args.cost)
                    .invoke_async(&mut conn)
                    .await?
            }
        };

        Self::decode_outcome(key, &reply)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", glob_escape(prefix));
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let deleted: u64 = conn.del(&keys).await?;
                removed += deleted;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(prefix = %prefix, removed, "Deleted counters by prefix");
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl PolicyStore for RedisStore {
    async fn insert_policy(&self, policy_id: &str, record: &PolicyRecord) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let fields = [
            ("algorithm", record.algorithm.clone()),
            ("limit", record.limit.to_string()),
            ("windowSeconds", record.window_seconds.to_string()),
        ];
        let _: () = conn.hset_multiple(policy_key(policy_id), &fields).await?;
        Ok(())
    }

    async fn get_policy(&self, policy_id: &str) -> Result<Option<PolicyRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(policy_key(policy_id)).await?;
        Self::decode_policy(policy_id, fields)
    }

    async fn delete_policy(&self, policy_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn.del(policy_key(policy_id)).await?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_outcome() {
        assert_eq!(
            RedisStore::decode_outcome("k", &[1, 4]).unwrap(),
            Outcome::allowed(4)
        );
        assert_eq!(
            RedisStore::decode_outcome("k", &[0, 0]).unwrap(),
            Outcome::denied(0)
        );
        assert!(RedisStore::decode_outcome("k", &[1]).is_err());
        assert!(RedisStore::decode_outcome("k", &[1, -1]).is_err());
    }

    #[test]
    fn test_decode_policy() {
        let fields: HashMap<String, String> = [
            ("algorithm", "token_bucket"),
            ("limit", "60"),
            ("windowSeconds", "60"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let record = RedisStore::decode_policy("abc", fields).unwrap().unwrap();
        assert_eq!(record, PolicyRecord::new("token_bucket", 60, 60));

        assert!(RedisStore::decode_policy("abc", HashMap::new()).unwrap().is_none());
    }

    #[test]
    fn test_decode_policy_rejects_garbage() {
        let mut fields = HashMap::new();
        fields.insert("algorithm".to_string(), "token_bucket".to_string());
        fields.insert("limit".to_string(), "lots".to_string());
        fields.insert("windowSeconds".to_string(), "60".to_string());

        let err = RedisStore::decode_policy("abc", fields).unwrap_err();
        assert!(matches!(err, StoreError::CorruptState { .. }));
    }

    #[test]
    fn test_glob_escape() {
        assert_eq!(glob_escape("rl:sw:abc:"), "rl:sw:abc:");
        assert_eq!(glob_escape("a*b?[c]"), "a\\*b\\?\\[c\\]");
    }

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server (REDIS_URL)"]
    async fn test_redis_sliding_window_script() {
        use crate::store::SlidingWindowArgs;

        let store = RedisStore::connect(&redis_url()).await.unwrap();
        let key = format!("rl:sw:test-{}:client", uuid::Uuid::new_v4().simple());
        let procedure = |now_ms| {
            Procedure::SlidingWindow(SlidingWindowArgs {
                now_ms,
                window_ms: 1_000,
                limit: 2,
                cost: 1,
                token: uuid::Uuid::new_v4().to_string(),
                edge: WindowEdge::Inclusive,
            })
        };

        assert_eq!(store.atomic_apply(&key, &procedure(0)).await.unwrap(), Outcome::allowed(1));
        assert_eq!(store.atomic_apply(&key, &procedure(0)).await.unwrap(), Outcome::allowed(0));
        assert_eq!(store.atomic_apply(&key, &procedure(1_000)).await.unwrap(), Outcome::denied(0));
        assert_eq!(store.atomic_apply(&key, &procedure(1_001)).await.unwrap(), Outcome::allowed(1));

        assert_eq!(store.delete_prefix(&key).await.unwrap(), 1);
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server (REDIS_URL)"]
    async fn test_redis_token_bucket_script() {
        use crate::store::TokenBucketArgs;

        let store = RedisStore::connect(&redis_url()).await.unwrap();
        let key = format!("rl:tb:test-{}:u1", uuid::Uuid::new_v4().simple());
        let procedure = |now_ms| {
            Procedure::TokenBucket(TokenBucketArgs {
                now_ms,
                capacity: 3,
                window_ms: 10_000,
                cost: 1,
            })
        };

        let now = chrono::Utc::now().timestamp_millis();
        for expected in [2, 1, 0] {
            assert_eq!(
                store.atomic_apply(&key, &procedure(now)).await.unwrap(),
                Outcome::allowed(expected)
            );
        }
        assert_eq!(store.atomic_apply(&key, &procedure(now)).await.unwrap(), Outcome::denied(0));
        assert_eq!(
            store.atomic_apply(&key, &procedure(now + 4_000)).await.unwrap(),
            Outcome::allowed(0)
        );

        store.delete_prefix(&key).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server (REDIS_URL)"]
    async fn test_redis_policy_round_trip() {
        let store = RedisStore::connect(&redis_url()).await.unwrap();
        let id = uuid::Uuid::new_v4().simple().to_string();
        let record = PolicyRecord::new("sliding_window", 10, 60);

        store.insert_policy(&id, &record).await.unwrap();
        assert_eq!(store.get_policy(&id).await.unwrap(), Some(record));
        assert!(store.delete_policy(&id).await.unwrap());
        assert!(store.get_policy(&id).await.unwrap().is_none());
    }
}
