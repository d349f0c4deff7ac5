//! Rate limit policies and algorithm selection.
//!
//! A policy arrives as a raw [`PolicyRecord`] (from a create request or from
//! the policy store) and only becomes a [`RateLimitPolicy`] after validation,
//! so an unknown algorithm or a non-positive limit/window cannot reach a
//! limiter.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{QuotaError, Result};

/// Admission-control algorithm applied by a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// Exact log-based counting over a moving window
    SlidingWindow,
    /// Continuously refilling token balance
    TokenBucket,
}

impl Algorithm {
    /// Canonical wire/storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::SlidingWindow => "sliding_window",
            Algorithm::TokenBucket => "token_bucket",
        }
    }

    /// Short namespace used in counter keys so the two algorithms never
    /// alias the same state.
    pub fn key_namespace(&self) -> &'static str {
        match self {
            Algorithm::SlidingWindow => "sw",
            Algorithm::TokenBucket => "tb",
        }
    }

    /// All supported algorithms.
    pub fn all() -> [Algorithm; 2] {
        [Algorithm::SlidingWindow, Algorithm::TokenBucket]
    }
}

impl FromStr for Algorithm {
    type Err = QuotaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sliding_window" => Ok(Algorithm::SlidingWindow),
            "token_bucket" => Ok(Algorithm::TokenBucket),
            _ => Err(QuotaError::InvalidPolicy(format!(
                "unknown algorithm: {}. Valid options: sliding_window, token_bucket",
                s
            ))),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unvalidated policy fields as they travel over the wire or sit in the
/// policy store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRecord {
    /// Algorithm name, matched case-insensitively
    pub algorithm: String,
    /// Maximum permits per window
    pub limit: i64,
    /// Window length in seconds
    pub window_seconds: i64,
}

impl PolicyRecord {
    pub fn new(algorithm: impl Into<String>, limit: i64, window_seconds: i64) -> Self {
        Self {
            algorithm: algorithm.into(),
            limit,
            window_seconds,
        }
    }
}

/// A validated, immutable rate limit policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    limit: u64,
    window_seconds: u64,
    algorithm: Algorithm,
}

impl RateLimitPolicy {
    /// Build a policy, rejecting non-positive limits or windows.
    pub fn new(limit: i64, window_seconds: i64, algorithm: Algorithm) -> Result<Self> {
        if limit <= 0 {
            return Err(QuotaError::InvalidPolicy(
                "limit must be greater than 0".to_string(),
            ));
        }
        if window_seconds <= 0 {
            return Err(QuotaError::InvalidPolicy(
                "windowSeconds must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            limit: limit as u64,
            window_seconds: window_seconds as u64,
            algorithm,
        })
    }

    /// Maximum permits per window (also the bucket capacity).
    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn window_seconds(&self) -> u64 {
        self.window_seconds
    }

    pub fn window_ms(&self) -> i64 {
        self.window_seconds as i64 * 1000
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Token bucket refill rate in tokens per second.
    pub fn refill_rate(&self) -> f64 {
        self.limit as f64 / self.window_seconds as f64
    }
}

impl TryFrom<PolicyRecord> for RateLimitPolicy {
    type Error = QuotaError;

    fn try_from(record: PolicyRecord) -> Result<Self> {
        let algorithm = record.algorithm.parse()?;
        RateLimitPolicy::new(record.limit, record.window_seconds, algorithm)
    }
}

impl From<&RateLimitPolicy> for PolicyRecord {
    fn from(policy: &RateLimitPolicy) -> Self {
        PolicyRecord {
            algorithm: policy.algorithm.as_str().to_string(),
            limit: policy.limit as i64,
            window_seconds: policy.window_seconds as i64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_parse_case_insensitive() {
        assert_eq!("sliding_window".parse::<Algorithm>().unwrap(), Algorithm::SlidingWindow);
        assert_eq!("TOKEN_BUCKET".parse::<Algorithm>().unwrap(), Algorithm::TokenBucket);
        assert_eq!("Sliding_Window".parse::<Algorithm>().unwrap(), Algorithm::SlidingWindow);
    }

    #[test]
    fn test_algorithm_unknown_rejected() {
        let err = "fixed_window".parse::<Algorithm>().unwrap_err();
        assert!(matches!(err, QuotaError::InvalidPolicy(_)));
        assert!(err.to_string().contains("fixed_window"));

        assert!("".parse::<Algorithm>().is_err());
    }

    #[test]
    fn test_key_namespaces_are_distinct() {
        assert_eq!(Algorithm::SlidingWindow.key_namespace(), "sw");
        assert_eq!(Algorithm::TokenBucket.key_namespace(), "tb");
    }

    #[test]
    fn test_policy_rejects_non_positive_values() {
        assert!(RateLimitPolicy::new(0, 10, Algorithm::SlidingWindow).is_err());
        assert!(RateLimitPolicy::new(-5, 10, Algorithm::SlidingWindow).is_err());
        assert!(RateLimitPolicy::new(10, 0, Algorithm::TokenBucket).is_err());
        assert!(RateLimitPolicy::new(10, -1, Algorithm::TokenBucket).is_err());
    }

    #[test]
    fn test_policy_derived_values() {
        let policy = RateLimitPolicy::new(60, 60, Algorithm::TokenBucket).unwrap();
        assert_eq!(policy.window_ms(), 60_000);
        assert_eq!(policy.refill_rate(), 1.0);

        let policy = RateLimitPolicy::new(3, 10, Algorithm::TokenBucket).unwrap();
        assert!((policy.refill_rate() - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_record_validation() {
        let record = PolicyRecord::new("Token_Bucket", 5, 30);
        let policy = RateLimitPolicy::try_from(record).unwrap();
        assert_eq!(policy.algorithm(), Algorithm::TokenBucket);
        assert_eq!(policy.limit(), 5);

        // Round trip normalizes the algorithm name.
        let back = PolicyRecord::from(&policy);
        assert_eq!(back, PolicyRecord::new("token_bucket", 5, 30));

        let bad = PolicyRecord::new("leaky_bucket", 5, 30);
        assert!(RateLimitPolicy::try_from(bad).is_err());
    }
}
