use tonic_build::manual::{Builder, Method, Service};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=build.rs");

    // Messages are hand-written prost structs in src/grpc/messages.rs, so the
    // service stubs are generated without protoc.
    let quota_service = Service::builder()
        .name("QuotaService")
        .package("quotad.v1")
        .comment("Shared rate limiting decisions and policy management.")
        .method(unary(
            "check",
            "Check",
            "crate::grpc::messages::CheckRequest",
            "crate::grpc::messages::CheckResponse",
        ))
        .method(unary(
            "create_policy",
            "CreatePolicy",
            "crate::grpc::messages::CreatePolicyRequest",
            "crate::grpc::messages::CreatePolicyResponse",
        ))
        .method(unary(
            "get_policy",
            "GetPolicy",
            "crate::grpc::messages::GetPolicyRequest",
            "crate::grpc::messages::Policy",
        ))
        .method(unary(
            "delete_policy",
            "DeletePolicy",
            "crate::grpc::messages::DeletePolicyRequest",
            "crate::grpc::messages::DeletePolicyResponse",
        ))
        .build();

    Builder::new()
        .build_server(true)
        .build_client(true)
        .compile(&[quota_service]);

    Ok(())
}

fn unary(name: &str, route: &str, input: &str, output: &str) -> Method {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(input)
        .output_type(output)
        .codec_path("tonic::codec::ProstCodec")
        .build()
}
