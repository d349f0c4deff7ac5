//! Protobuf messages for the `quotad.v1.QuotaService` API.
//!
//! Equivalent proto definition:
//!
//! ```proto
//! syntax = "proto3";
//! package quotad.v1;
//!
//! import "google/protobuf/duration.proto";
//!
//! message CheckRequest {
//!   string policy_id = 1;
//!   string identifier = 2;
//!   optional uint64 cost = 3;
//! }
//!
//! message CheckResponse {
//!   enum Code { UNKNOWN = 0; OK = 1; OVER_LIMIT = 2; }
//!   bool allowed = 1;
//!   uint64 remaining = 2;
//!   int64 reset_at_epoch_ms = 3;
//!   uint64 retry_after_seconds = 4;
//!   uint64 limit = 5;
//!   uint64 window_seconds = 6;
//!   Code code = 7;
//!   google.protobuf.Duration duration_until_reset = 8;
//! }
//!
//! message CreatePolicyRequest {
//!   int64 limit = 1;
//!   int64 window_seconds = 2;
//!   string algorithm = 3;
//! }
//!
//! message CreatePolicyResponse {
//!   string policy_id = 1;
//!   Policy policy = 2;
//! }
//!
//! message GetPolicyRequest { string policy_id = 1; }
//!
//! message Policy {
//!   string policy_id = 1;
//!   int64 limit = 2;
//!   int64 window_seconds = 3;
//!   string algorithm = 4;
//! }
//!
//! message DeletePolicyRequest { string policy_id = 1; }
//!
//! message DeletePolicyResponse {
//!   string policy_id = 1;
//!   uint64 counters_removed = 2;
//! }
//! ```

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CheckRequest {
    /// Policy to check against
    #[prost(string, tag = "1")]
    pub policy_id: ::prost::alloc::string::String,
    /// Caller identity (user id, IP, ...)
    #[prost(string, tag = "2")]
    pub identifier: ::prost::alloc::string::String,
    /// Permits to consume; defaults to 1
    #[prost(uint64, optional, tag = "3")]
    pub cost: ::core::option::Option<u64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CheckResponse {
    #[prost(bool, tag = "1")]
    pub allowed: bool,
    #[prost(uint64, tag = "2")]
    pub remaining: u64,
    #[prost(int64, tag = "3")]
    pub reset_at_epoch_ms: i64,
    #[prost(uint64, tag = "4")]
    pub retry_after_seconds: u64,
    #[prost(uint64, tag = "5")]
    pub limit: u64,
    #[prost(uint64, tag = "6")]
    pub window_seconds: u64,
    #[prost(enumeration = "check_response::Code", tag = "7")]
    pub code: i32,
    #[prost(message, optional, tag = "8")]
    pub duration_until_reset: ::core::option::Option<::prost_types::Duration>,
}

/// Nested types for [`CheckResponse`].
pub mod check_response {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Code {
        Unknown = 0,
        /// The request is within quota
        Ok = 1,
        /// The request exceeded quota; honor `retry_after_seconds`
        OverLimit = 2,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreatePolicyRequest {
    #[prost(int64, tag = "1")]
    pub limit: i64,
    #[prost(int64, tag = "2")]
    pub window_seconds: i64,
    #[prost(string, tag = "3")]
    pub algorithm: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreatePolicyResponse {
    #[prost(string, tag = "1")]
    pub policy_id: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub policy: ::core::option::Option<Policy>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetPolicyRequest {
    #[prost(string, tag = "1")]
    pub policy_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Policy {
    #[prost(string, tag = "1")]
    pub policy_id: ::prost::alloc::string::String,
    #[prost(int64, tag = "2")]
    pub limit: i64,
    #[prost(int64, tag = "3")]
    pub window_seconds: i64,
    #[prost(string, tag = "4")]
    pub algorithm: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeletePolicyRequest {
    #[prost(string, tag = "1")]
    pub policy_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeletePolicyResponse {
    #[prost(string, tag = "1")]
    pub policy_id: ::prost::alloc::string::String,
    #[prost(uint64, tag = "2")]
    pub counters_removed: u64,
}
