//! Generated gRPC stubs for the signer's `KeyManagement` and `Signer` services, plus the
//! `grpc.health.v1.Health` wiring both signer and server link against.

tonic::include_proto!("notary");

pub use tonic_health::pb::health_server::{Health, HealthServer};
pub use tonic_health::server::HealthReporter;

/// Sub-service names registered with the health service, per the wire contract.
pub const SERVICE_KEY_MANAGEMENT: &str = "notary.KeyManagement";
pub const SERVICE_SIGNER: &str = "notary.Signer";
pub const SERVICE_OVERALL: &str = "Overall";
