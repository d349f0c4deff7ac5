//! gRPC front end for the quota service.

pub mod messages;
mod server;
mod service;

pub use server::GrpcServer;
pub use service::QuotaServiceImpl;

/// Service stubs generated by `build.rs`.
pub mod proto {
    tonic::include_proto!("quotad.v1.QuotaService");
}

// Re-export commonly used types
pub use messages::check_response::Code;
pub use messages::{
    CheckRequest, CheckResponse, CreatePolicyRequest, CreatePolicyResponse, DeletePolicyRequest,
    DeletePolicyResponse, GetPolicyRequest, Policy,
};
pub use proto::quota_service_client::QuotaServiceClient;
pub use proto::quota_service_server::{QuotaService, QuotaServiceServer};
