//! Counter key generation.

use std::fmt;

use super::policy::Algorithm;

/// Prefix shared by every counter key in the state store.
pub const COUNTER_PREFIX: &str = "rl";

/// Identifies the counter state for one identifier under one policy.
///
/// The key is never persisted on its own; it addresses ephemeral state that
/// the store expires automatically.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    /// The policy the identifier is checked under
    pub policy_id: String,
    /// Caller-supplied identity (user id, IP, ...)
    pub identifier: String,
}

impl CounterKey {
    pub fn new(policy_id: &str, identifier: &str) -> Self {
        Self {
            policy_id: policy_id.to_string(),
            identifier: identifier.to_string(),
        }
    }

    /// Store key for this counter under the given algorithm.
    ///
    /// Format: `rl:{sw|tb}:{policy_id}:{identifier}`
    pub fn storage_key(&self, algorithm: Algorithm) -> String {
        format!(
            "{}{}",
            Self::policy_prefix(algorithm, &self.policy_id),
            self.identifier
        )
    }

    /// Prefix covering every counter of a policy under one algorithm.
    pub fn policy_prefix(algorithm: Algorithm, policy_id: &str) -> String {
        format!(
            "{}:{}:{}:",
            COUNTER_PREFIX,
            algorithm.key_namespace(),
            policy_id
        )
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.policy_id, self.identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key_format() {
        let key = CounterKey::new("a1b2c3", "user:42");
        assert_eq!(key.storage_key(Algorithm::SlidingWindow), "rl:sw:a1b2c3:user:42");
        assert_eq!(key.storage_key(Algorithm::TokenBucket), "rl:tb:a1b2c3:user:42");
        assert_eq!(key.to_string(), "a1b2c3:user:42");
    }

    #[test]
    fn test_policies_never_share_state() {
        let first = CounterKey::new("policy1", "10.0.0.1");
        let second = CounterKey::new("policy2", "10.0.0.1");
        assert_ne!(
            first.storage_key(Algorithm::SlidingWindow),
            second.storage_key(Algorithm::SlidingWindow)
        );
    }

    #[test]
    fn test_prefix_covers_keys() {
        let key = CounterKey::new("p", "id");
        let prefix = CounterKey::policy_prefix(Algorithm::TokenBucket, "p");
        assert!(key.storage_key(Algorithm::TokenBucket).starts_with(&prefix));
        assert!(!key.storage_key(Algorithm::SlidingWindow).starts_with(&prefix));
    }
}
