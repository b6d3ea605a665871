//! A thin gRPC client wrapper over the signer's `KeyManagement`/`Signer` services, and the
//! `Signer` trait the freshness engine and HTTP key routes actually depend on. Connects over
//! mutual TLS per spec.md §4.5; the trait seam exists so tests can swap in an in-process signer
//! and skip the TLS handshake.

use crate::error::{Error, Result};
use async_trait::async_trait;
use notary_proto::key_management_client::KeyManagementClient as GrpcKeyManagementClient;
use notary_proto::signer_client::SignerClient as GrpcSignerClient;
use notary_proto::{CreateKeyRequest, SignRequest};
use notary_types::key::{Algorithm, Key};
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Identity};

/// The signer capability the server side needs: producing signatures and minting new keys for
/// role rotation. Implemented by `SignerClient` over gRPC; swappable in tests.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(&self, key_id: &str, payload: &[u8]) -> Result<(Vec<u8>, Algorithm)>;

    /// Creates (or reuses a pending) key for `role`/`gun`, for the `POST /<role>.key` rotation
    /// route. Returns the new key's public half; the caller is responsible for publishing it in
    /// the next `root`.
    async fn create_key(&self, gun: &str, role: &str, algorithm: Algorithm) -> Result<(String, Key)>;
}

/// Mutual-TLS material for dialing the signer, named the way `notary-signer`'s own `Config`
/// names its server-side counterparts.
pub struct SignerTls {
    pub ca_cert: Vec<u8>,
    pub client_cert: Vec<u8>,
    pub client_key: Vec<u8>,
    pub domain_name: String,
}

#[derive(Clone)]
pub struct SignerClient {
    inner: GrpcSignerClient<Channel>,
    key_management: GrpcKeyManagementClient<Channel>,
}

impl SignerClient {
    pub async fn connect(endpoint: &str, tls: SignerTls) -> Result<SignerClient> {
        let tls_config = ClientTlsConfig::new()
            .ca_certificate(Certificate::from_pem(tls.ca_cert))
            .identity(Identity::from_pem(tls.client_cert, tls.client_key))
            .domain_name(tls.domain_name);

        let channel = Channel::from_shared(endpoint.to_string())
            .map_err(|e| Error::Internal { msg: e.to_string() })?
            .tls_config(tls_config)
            .map_err(|e| Error::Internal { msg: e.to_string() })?
            .connect()
            .await
            .map_err(|e| Error::SignerTransport {
                source: tonic::Status::unavailable(e.to_string()),
            })?;

        Ok(SignerClient {
            inner: GrpcSignerClient::new(channel.clone()),
            key_management: GrpcKeyManagementClient::new(channel),
        })
    }
}

#[async_trait]
impl Signer for SignerClient {
    async fn create_key(&self, gun: &str, role: &str, algorithm: Algorithm) -> Result<(String, Key)> {
        let mut client = self.key_management.clone();
        let response = client
            .create_key(CreateKeyRequest {
                algorithm: algorithm.as_str().to_string(),
                gun: gun.to_string(),
                role: role.to_string(),
            })
            .await
            .map_err(|source| Error::SignerTransport { source })?
            .into_inner();
        Ok((response.key_id, Key::new(response.algorithm.parse()?, response.public_bytes)))
    }

    /// Signs `payload` with the key named `key_id`. The signer marks the key active on its
    /// first successful sign; this call has no other side effects on this side.
    async fn sign(&self, key_id: &str, payload: &[u8]) -> Result<(Vec<u8>, Algorithm)> {
        let mut client = self.inner.clone();
        let response = client
            .sign(SignRequest {
                key_id: key_id.to_string(),
                payload: payload.to_vec(),
            })
            .await
            .map_err(|source| Error::SignerTransport { source })?
            .into_inner();
        let algorithm: Algorithm = response
            .algorithm
            .parse()
            .map_err(|_| Error::Internal {
                msg: format!("signer returned unknown algorithm '{}'", response.algorithm),
            })?;
        Ok((response.signature, algorithm))
    }
}
