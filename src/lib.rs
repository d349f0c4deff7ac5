//! quotad - Shared Per-Identity Rate Limiting Service
//!
//! This crate implements a rate limiting service that decides, per
//! `(policy, identifier)` pair, whether a request is within quota. Decisions
//! are made with sliding window log or token bucket algorithms whose state
//! lives in an atomic shared store, so any number of stateless replicas agree
//! on the same counters.

pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod grpc;
pub mod ratelimit;
pub mod store;
