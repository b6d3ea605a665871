use crate::keydb::KeyDBStore;
use crate::passphrase::PassphraseRetriever;
use notary_proto::key_management_server::KeyManagement;
use notary_proto::signer_server::Signer;
use notary_proto::{
    CreateKeyRequest, GetKeyInfoResponse, KeyInfoRequest, PublicKey, SignRequest, SignResponse,
    Void,
};
use std::sync::Arc;
use tonic::{Request, Response, Status};

/// The `notary.KeyManagement` and `notary.Signer` gRPC services. Both are thin façades: every
/// method forwards straight to the `KeyDBStore`, which owns all the state.
#[derive(Clone)]
pub struct SignerService {
    keys: Arc<dyn KeyDBStore>,
    passphrases: Arc<dyn PassphraseRetriever>,
}

impl SignerService {
    pub fn new(keys: Arc<dyn KeyDBStore>, passphrases: Arc<dyn PassphraseRetriever>) -> Self {
        SignerService { keys, passphrases }
    }
}

#[tonic::async_trait]
impl KeyManagement for SignerService {
    async fn create_key(
        &self,
        request: Request<CreateKeyRequest>,
    ) -> Result<Response<PublicKey>, Status> {
        let req = request.into_inner();
        let algorithm = req
            .algorithm
            .parse()
            .map_err(|_| Status::invalid_argument(format!("unknown algorithm '{}'", req.algorithm)))?;
        let gun = if req.gun.is_empty() {
            None
        } else {
            Some(req.gun.as_str())
        };
        let role = if req.role.is_empty() { "timestamp" } else { &req.role };
        let alias = self
            .passphrases
            .default_alias()
            .map_err(Status::from)?;

        let public = self
            .keys
            .create(role, gun, algorithm, &alias)
            .await
            .map_err(Status::from)?;
        Ok(Response::new(PublicKey {
            key_id: public.key_id().map_err(|e| Status::internal(e.to_string()))?,
            algorithm: public.algorithm.to_string(),
            public_bytes: public
                .public_bytes()
                .map_err(|e| Status::internal(e.to_string()))?,
        }))
    }

    async fn get_key_info(
        &self,
        request: Request<KeyInfoRequest>,
    ) -> Result<Response<GetKeyInfoResponse>, Status> {
        let req = request.into_inner();
        let (algorithm, public_bytes) = self.keys.get_key_info(&req.key_id).await.map_err(Status::from)?;
        Ok(Response::new(GetKeyInfoResponse {
            algorithm: algorithm.to_string(),
            public_bytes,
        }))
    }

    async fn delete_key(&self, request: Request<KeyInfoRequest>) -> Result<Response<Void>, Status> {
        let req = request.into_inner();
        self.keys.remove_key(&req.key_id).await.map_err(Status::from)?;
        Ok(Response::new(Void {}))
    }
}

#[tonic::async_trait]
impl Signer for SignerService {
    async fn sign(&self, request: Request<SignRequest>) -> Result<Response<SignResponse>, Status> {
        let req = request.into_inner();
        let (signature, algorithm) = self
            .keys
            .sign(&req.key_id, &req.payload)
            .await
            .map_err(Status::from)?;
        Ok(Response::new(SignResponse {
            signature,
            algorithm: algorithm.to_string(),
        }))
    }
}
