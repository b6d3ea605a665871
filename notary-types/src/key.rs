use crate::canonical::to_canonical_bytes;
use crate::error::{self, Result};
use data_encoding::HEXLOWER;
use ring::rand::SecureRandom;
use ring::signature::{
    self, EcdsaKeyPair, Ed25519KeyPair, KeyPair, RsaKeyPair, ECDSA_P256_SHA256_FIXED_SIGNING,
    ECDSA_P256_SHA256_FIXED, RSA_PSS_2048_8192_SHA256, RSA_PSS_SHA256,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use snafu::{ensure, OptionExt, ResultExt};
use std::fmt;

/// The three signature algorithms the core understands. String form matches the TUF wire
/// format and the `private_keys.algorithm` / `public_keys.algorithm` column.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    Ecdsa,
    Ed25519,
    #[serde(rename = "rsa-pss-sha256")]
    RsaPssSha256,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Ecdsa => "ecdsa",
            Algorithm::Ed25519 => "ed25519",
            Algorithm::RsaPssSha256 => "rsa-pss-sha256",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Algorithm {
    type Err = error::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ecdsa" => Ok(Algorithm::Ecdsa),
            "ed25519" => Ok(Algorithm::Ed25519),
            "rsa-pss-sha256" => Ok(Algorithm::RsaPssSha256),
            other => error::UnsupportedAlgorithmSnafu {
                algorithm: other.to_string(),
            }
            .fail(),
        }
    }
}

/// A public key as published in a `root` role's `keys` map.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Key {
    pub algorithm: Algorithm,
    /// Hex-lowercase encoding of the raw public key bytes (SEC1 for ecdsa, raw for ed25519,
    /// DER SubjectPublicKeyInfo for rsa).
    pub public: String,
}

#[derive(Serialize)]
struct KeyIdRecord<'a> {
    algorithm: &'a str,
    public: &'a str,
}

impl Key {
    pub fn new(algorithm: Algorithm, public: Vec<u8>) -> Key {
        Key {
            algorithm,
            public: HEXLOWER.encode(&public),
        }
    }

    /// The SHA-256 of this key's canonical-JSON record, hex-lowercase. TUF metadata references
    /// keys only by this id.
    pub fn key_id(&self) -> Result<String> {
        let record = KeyIdRecord {
            algorithm: self.algorithm.as_str(),
            public: &self.public,
        };
        let bytes = to_canonical_bytes(&record)?;
        let digest = Sha256::digest(&bytes);
        Ok(HEXLOWER.encode(&digest))
    }

    pub fn public_bytes(&self) -> Result<Vec<u8>> {
        HEXLOWER
            .decode(self.public.as_bytes())
            .context(error::HexDecodeSnafu)
    }

    /// Verifies `signature` over `message` against this public key.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let public = match self.public_bytes() {
            Ok(p) => p,
            Err(_) => return false,
        };
        let alg: &dyn signature::VerificationAlgorithm = match self.algorithm {
            Algorithm::Ecdsa => &ECDSA_P256_SHA256_FIXED,
            Algorithm::Ed25519 => &signature::ED25519,
            Algorithm::RsaPssSha256 => &RSA_PSS_2048_8192_SHA256,
        };
        signature::UnparsedPublicKey::new(alg, &public)
            .verify(message, signature)
            .is_ok()
    }
}

/// An in-memory signing handle. Never persisted directly; the signer encrypts the private bytes
/// at rest and reconstructs this type only for the duration of a single `Sign` call.
pub enum PrivateKey {
    Ecdsa(EcdsaKeyPair),
    Ed25519(Ed25519KeyPair),
    Rsa(RsaKeyPair),
}

impl PrivateKey {
    /// Generates a new key pair for `algorithm`, returning the handle plus its PKCS#8 document
    /// (the bytes the signer encrypts and stores).
    pub fn generate(algorithm: Algorithm) -> Result<(PrivateKey, Vec<u8>)> {
        let rng = ring::rand::SystemRandom::new();
        match algorithm {
            Algorithm::Ecdsa => {
                let doc = EcdsaKeyPair::generate_pkcs8(
                    &signature::ECDSA_P256_SHA256_FIXED_SIGNING,
                    &rng,
                )
                .map_err(|e| error::Error::KeyGeneration {
                    algorithm: algorithm.to_string(),
                    msg: e.to_string(),
                })?;
                let pair = EcdsaKeyPair::from_pkcs8(
                    &ECDSA_P256_SHA256_FIXED_SIGNING,
                    doc.as_ref(),
                    &rng,
                )
                .map_err(|e| error::Error::MalformedKey { msg: e.to_string() })?;
                Ok((PrivateKey::Ecdsa(pair), doc.as_ref().to_vec()))
            }
            Algorithm::Ed25519 => {
                let doc = Ed25519KeyPair::generate_pkcs8(&rng).map_err(|e| {
                    error::Error::KeyGeneration {
                        algorithm: algorithm.to_string(),
                        msg: e.to_string(),
                    }
                })?;
                let pair = Ed25519KeyPair::from_pkcs8(doc.as_ref())
                    .map_err(|e| error::Error::MalformedKey { msg: e.to_string() })?;
                Ok((PrivateKey::Ed25519(pair), doc.as_ref().to_vec()))
            }
            Algorithm::RsaPssSha256 => {
                error::KeyGenerationSnafu {
                    algorithm: algorithm.to_string(),
                    msg: "RSA key generation requires an externally-provided PKCS#8 document",
                }
                .fail()
            }
        }
    }

    /// Reconstructs a signing handle from a stored PKCS#8 (or DER, for RSA) private key document.
    pub fn from_document(algorithm: Algorithm, doc: &[u8]) -> Result<PrivateKey> {
        let rng = ring::rand::SystemRandom::new();
        match algorithm {
            Algorithm::Ecdsa => {
                let pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, doc, &rng)
                    .map_err(|e| error::Error::MalformedKey { msg: e.to_string() })?;
                Ok(PrivateKey::Ecdsa(pair))
            }
            Algorithm::Ed25519 => {
                let pair = Ed25519KeyPair::from_pkcs8(doc)
                    .map_err(|e| error::Error::MalformedKey { msg: e.to_string() })?;
                Ok(PrivateKey::Ed25519(pair))
            }
            Algorithm::RsaPssSha256 => {
                let pair = RsaKeyPair::from_der(doc)
                    .map_err(|e| error::Error::MalformedKey { msg: e.to_string() })?;
                Ok(PrivateKey::Rsa(pair))
            }
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            PrivateKey::Ecdsa(_) => Algorithm::Ecdsa,
            PrivateKey::Ed25519(_) => Algorithm::Ed25519,
            PrivateKey::Rsa(_) => Algorithm::RsaPssSha256,
        }
    }

    pub fn public_key(&self) -> Key {
        let public = match self {
            PrivateKey::Ecdsa(pair) => pair.public_key().as_ref().to_vec(),
            PrivateKey::Ed25519(pair) => pair.public_key().as_ref().to_vec(),
            PrivateKey::Rsa(pair) => pair.public_key().as_ref().to_vec(),
        };
        Key::new(self.algorithm(), public)
    }

    /// Signs `message`, returning the raw signature bytes (r||s for ecdsa, per the wire format).
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let rng = ring::rand::SystemRandom::new();
        let key_id = self.public_key().key_id().unwrap_or_default();
        let sig = match self {
            PrivateKey::Ecdsa(pair) => pair
                .sign(&rng, message)
                .map_err(|_| error::Error::SigningFailed {
                    key_id: key_id.clone(),
                })?
                .as_ref()
                .to_vec(),
            PrivateKey::Ed25519(pair) => pair.sign(message).as_ref().to_vec(),
            PrivateKey::Rsa(pair) => {
                let mut signature = vec![0; pair.public_modulus_len()];
                pair.sign(&RSA_PSS_SHA256, &rng, message, &mut signature)
                    .map_err(|_| error::Error::SigningFailed {
                        key_id: key_id.clone(),
                    })?;
                signature
            }
        };
        ensure!(!sig.is_empty(), error::SigningFailedSnafu { key_id });
        Ok(sig)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ed25519_round_trips() {
        let (key, doc) = PrivateKey::generate(Algorithm::Ed25519).unwrap();
        let public = key.public_key();
        let reloaded = PrivateKey::from_document(Algorithm::Ed25519, &doc).unwrap();
        let sig = reloaded.sign(b"hello").unwrap();
        assert!(public.verify(b"hello", &sig));
        assert!(!public.verify(b"tampered", &sig));
    }

    #[test]
    fn ecdsa_round_trips() {
        let (key, doc) = PrivateKey::generate(Algorithm::Ecdsa).unwrap();
        let public = key.public_key();
        let reloaded = PrivateKey::from_document(Algorithm::Ecdsa, &doc).unwrap();
        let sig = reloaded.sign(b"hello").unwrap();
        assert!(public.verify(b"hello", &sig));
    }

    #[test]
    fn key_id_is_stable() {
        let (key, _doc) = PrivateKey::generate(Algorithm::Ed25519).unwrap();
        let public = key.public_key();
        assert_eq!(public.key_id().unwrap(), public.key_id().unwrap());
    }
}
