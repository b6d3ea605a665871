use crate::error::{self, Result};
use crate::jwe;
use crate::passphrase::PassphraseRetriever;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notary_types::key::{Algorithm, Key, PrivateKey};
use std::sync::Arc;

pub const ENCRYPTION_ALG: &str = "A256GCM";
pub const KEYWRAP_ALG: &str = "PBES2-HS256+A128KW";

/// One row of the signer's private key table, as documented in the persisted layout.
#[derive(Clone)]
pub struct KeyRow {
    pub key_id: String,
    pub encryption_alg: String,
    pub keywrap_alg: String,
    pub algorithm: Algorithm,
    pub passphrase_alias: String,
    pub gun: Option<String>,
    pub role: String,
    pub public: Key,
    /// Compact JWE serialization of the PKCS#8 private key document.
    pub private: String,
    pub last_used: Option<DateTime<Utc>>,
}

/// Encrypted-at-rest private key store. `last_used` tracks activation: a key is "pending" until
/// its first successful `sign`, at which point `last_used` becomes non-zero and stays
/// monotonic non-decreasing from then on.
#[async_trait]
pub trait KeyDBStore: Send + Sync {
    /// Encrypts `document` (a PKCS#8, or for RSA a DER, private key document) under
    /// `passphrase_alias` and inserts a new row. `KeyExists` if `key_id` (derived from the
    /// public key) is already present.
    async fn add_key(
        &self,
        role: &str,
        gun: Option<&str>,
        algorithm: Algorithm,
        document: &[u8],
        passphrase_alias: &str,
    ) -> Result<String>;

    /// Reuses a pending key matching `(role, gun, algorithm)` if one exists; otherwise
    /// generates a new key of `algorithm` and adds it.
    async fn create(
        &self,
        role: &str,
        gun: Option<&str>,
        algorithm: Algorithm,
        passphrase_alias: &str,
    ) -> Result<Key>;

    /// The most recent key matching `(role, gun)` whose `last_used` is still unset.
    async fn get_pending_key(&self, role: &str, gun: Option<&str>) -> Result<Key>;

    /// `(algorithm, public_bytes)` for `key_id`, without touching `last_used`.
    async fn get_key_info(&self, key_id: &str) -> Result<(Algorithm, Vec<u8>)>;

    /// Decrypts `key_id`'s private key, signs `payload`, and marks the key active on success.
    /// Activation is best-effort: a signing error is returned without updating `last_used`,
    /// but a failure to persist the activation timestamp does not un-sign a produced signature.
    async fn sign(&self, key_id: &str, payload: &[u8]) -> Result<(Vec<u8>, Algorithm)>;

    /// Re-encrypts `key_id`'s private key under `new_alias`'s passphrase. The previous
    /// ciphertext remains in place until the new one is durably written.
    async fn rotate_key_passphrase(&self, key_id: &str, new_alias: &str) -> Result<()>;

    /// Idempotent.
    async fn remove_key(&self, key_id: &str) -> Result<()>;

    async fn check_health(&self) -> Result<()>;
}

pub(crate) fn encrypt_row(
    retriever: &dyn PassphraseRetriever,
    role: &str,
    gun: Option<&str>,
    algorithm: Algorithm,
    public: Key,
    doc: &[u8],
    key_id: String,
    passphrase_alias: &str,
) -> Result<KeyRow> {
    let passphrase = retriever.get(passphrase_alias)?;
    let private = jwe::encrypt(&passphrase, doc)?;
    Ok(KeyRow {
        key_id,
        encryption_alg: ENCRYPTION_ALG.to_string(),
        keywrap_alg: KEYWRAP_ALG.to_string(),
        algorithm,
        passphrase_alias: passphrase_alias.to_string(),
        gun: gun.map(|g| g.to_string()),
        role: role.to_string(),
        public,
        private,
        last_used: None,
    })
}
