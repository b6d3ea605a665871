//! Bearer-token auth gate. Wraps every mutating HTTP route: verifies the JWT's signature,
//! issuer, audience, and `nbf`/`exp` window against a trust bundle loaded once at startup, then
//! checks the token's `access[]` claim against the scope a given (method, GUN) pair requires.
//! Any failure returns an RFC 6750 challenge instead of the request's normal error body.

use crate::error::{self, Error, Result};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use snafu::OptionExt;
use std::collections::HashMap;
use std::path::Path;

/// One `{resource_type, resource_name, action}` entry in a token's `access` claim, mirroring
/// the Docker registry token specification this gate reuses for compatibility with registry
/// clients.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AccessEntry {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    pub actions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: Option<String>,
    #[serde(default)]
    access: Vec<AccessEntry>,
}

/// A key named by `kid`, as published by the trust bundle. The bundle is loaded once at
/// startup; per spec.md, key rotation requires a process restart.
struct TrustedKey {
    algorithm: Algorithm,
    decoding_key: DecodingKey,
}

/// The static set of keys and issuers this gate trusts, plus the (method, GUN) -> required
/// access mapping. Built once from `Config` at startup and shared behind an `Arc` by every
/// handler.
pub struct AuthGate {
    keys: HashMap<String, TrustedKey>,
    trusted_issuers: Vec<String>,
    audience: String,
    realm: String,
    service: String,
}

impl AuthGate {
    /// Loads one `DecodingKey` per `<kid>.pem` file (an RSA or EC SubjectPublicKeyInfo PEM,
    /// named by the key's `kid`) found directly under `trust_bundle_dir`.
    pub fn load(
        trust_bundle_dir: &Path,
        trusted_issuers: Vec<String>,
        audience: String,
        realm: String,
        service: String,
    ) -> Result<AuthGate> {
        let mut keys = HashMap::new();
        let entries = std::fs::read_dir(trust_bundle_dir).map_err(|e| Error::ConfigRead {
            path: trust_bundle_dir.display().to_string(),
            source: e,
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::ConfigRead {
                path: trust_bundle_dir.display().to_string(),
                source: e,
            })?;
            let path = entry.path();
            let Some(kid) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if path.extension().and_then(|e| e.to_str()) != Some("pem") {
                continue;
            }
            let pem = std::fs::read(&path).map_err(|e| Error::ConfigRead {
                path: path.display().to_string(),
                source: e,
            })?;
            let (algorithm, decoding_key) = load_trusted_key(&pem)?;
            keys.insert(kid.to_string(), TrustedKey { algorithm, decoding_key });
        }
        Ok(AuthGate {
            keys,
            trusted_issuers,
            audience,
            realm,
            service,
        })
    }

    /// Verifies `authorization_header` grants `action` (`"pull"` or `"push"`) on `gun`, and
    /// returns the token's `sub` on success. On any failure, returns an `Error` whose
    /// `www_authenticate` rendering is the RFC 6750 challenge the caller should send back.
    pub fn authorize(
        &self,
        authorization_header: Option<&str>,
        gun: &str,
        action: &str,
    ) -> Result<Option<String>> {
        let required_scope = format!("repository:{}:{}", gun, action);
        let token = match authorization_header.and_then(|h| h.strip_prefix("Bearer ")) {
            Some(t) if !t.is_empty() => t,
            _ => {
                return Err(Error::Unauthenticated {
                    challenge: self.challenge(&required_scope, None),
                })
            }
        };

        let claims = self.verify(token, &required_scope)?;

        let satisfied = claims.access.iter().any(|entry| {
            entry.resource_type == "repository"
                && entry.name == gun
                && entry.actions.iter().any(|a| a == action)
        });
        if !satisfied {
            return Err(Error::InsufficientScope {
                scope: required_scope.clone(),
                challenge: self.challenge(&required_scope, Some("insufficient_scope")),
            });
        }
        Ok(claims.sub)
    }

    fn verify(&self, token: &str, required_scope: &str) -> Result<Claims> {
        let header = decode_header(token).map_err(|e| Error::InvalidToken {
            reason: e.to_string(),
            challenge: self.challenge(required_scope, Some("invalid_token")),
        })?;
        let kid = header.kid.as_deref().context(error::InvalidTokenSnafu {
            reason: "token header is missing 'kid'".to_string(),
            challenge: self.challenge(required_scope, Some("invalid_token")),
        })?;
        let trusted = self.keys.get(kid).context(error::InvalidTokenSnafu {
            reason: format!("unknown signing key '{}'", kid),
            challenge: self.challenge(required_scope, Some("invalid_token")),
        })?;
        if header.alg != trusted.algorithm {
            return error::InvalidTokenSnafu {
                reason: "token alg does not match the trusted key's algorithm".to_string(),
                challenge: self.challenge(required_scope, Some("invalid_token")),
            }
            .fail();
        }

        let mut validation = Validation::new(trusted.algorithm);
        validation.set_audience(&[self.audience.clone()]);
        validation.set_issuer(&self.trusted_issuers);
        validation.validate_nbf = true;

        let data = decode::<Claims>(token, &trusted.decoding_key, &validation).map_err(|e| {
            Error::InvalidToken {
                reason: e.to_string(),
                challenge: self.challenge(required_scope, Some("invalid_token")),
            }
        })?;
        Ok(data.claims)
    }

    /// Renders the `WWW-Authenticate: Bearer ...` header value per RFC 6750 §3.
    fn challenge(&self, scope: &str, error_code: Option<&str>) -> String {
        let mut value = format!(
            r#"Bearer realm="{}",service="{}",scope="{}""#,
            self.realm, self.service, scope
        );
        if let Some(code) = error_code {
            value.push_str(&format!(r#",error="{}""#, code));
        }
        value
    }
}

/// EC keys (P-256) use ES256; everything else is treated as RSA and uses PS256, matching the
/// two key families the signer can hold server-side for timestamp/snapshot. Tries EC first and
/// falls back to RSA rather than sniffing the PEM label text, which is not a reliable signal of
/// key family (a generic `BEGIN PUBLIC KEY` SPKI block carries no algorithm hint at all).
fn load_trusted_key(pem: &[u8]) -> Result<(Algorithm, DecodingKey)> {
    if let Ok(key) = DecodingKey::from_ec_pem(pem) {
        return Ok((Algorithm::ES256, key));
    }
    let key = DecodingKey::from_rsa_pem(pem).map_err(|e| Error::Internal { msg: e.to_string() })?;
    Ok((Algorithm::PS256, key))
}

/// Builds the bits the `test` module here and `http::test` both need to mint and verify real
/// tokens: an EC trust bundle entry plus a matching signing key, with no filesystem round trip.
#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header};

    fn pem_wrap(label: &str, der: &[u8]) -> Vec<u8> {
        let encoded = data_encoding::BASE64.encode(der);
        let mut out = format!("-----BEGIN {}-----\n", label);
        for line in encoded.as_bytes().chunks(64) {
            out.push_str(std::str::from_utf8(line).unwrap());
            out.push('\n');
        }
        out.push_str(&format!("-----END {}-----\n", label));
        out.into_bytes()
    }

    /// The fixed ASN.1 SubjectPublicKeyInfo header for an uncompressed P-256 point, so a raw
    /// 65-byte `Key::public_bytes()` value can round-trip through `DecodingKey::from_ec_pem`.
    fn ec_public_spki_der(point: &[u8]) -> Vec<u8> {
        const SPKI_P256_HEADER: [u8; 26] = [
            0x30, 0x59, 0x30, 0x13, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06,
            0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, 0x03, 0x42, 0x00,
        ];
        let mut der = SPKI_P256_HEADER.to_vec();
        der.extend_from_slice(point);
        der
    }

    #[derive(Serialize)]
    pub(crate) struct TestClaims {
        pub sub: String,
        pub aud: String,
        pub iss: String,
        pub exp: i64,
        pub nbf: i64,
        #[serde(default)]
        pub access: Vec<AccessEntry>,
    }

    pub(crate) fn base_claims(sub: &str, audience: &str, issuer: &str) -> TestClaims {
        let now = chrono::Utc::now().timestamp();
        TestClaims {
            sub: sub.to_string(),
            aud: audience.to_string(),
            iss: issuer.to_string(),
            exp: now + 300,
            nbf: now - 10,
            access: Vec::new(),
        }
    }

    /// Generates a fresh ES256 keypair, builds an `AuthGate` that trusts it under kid
    /// `"test-key"`, and returns the gate alongside the matching `EncodingKey` so tests can mint
    /// tokens it will accept.
    pub(crate) fn gate_with_signing_key(audience: &str, issuer: &str) -> (AuthGate, EncodingKey) {
        let (private, pkcs8_doc) =
            notary_types::key::PrivateKey::generate(notary_types::key::Algorithm::Ecdsa).unwrap();
        let public = private.public_key();
        let point = public.public_bytes().unwrap();
        let spki_pem = pem_wrap("PUBLIC KEY", &ec_public_spki_der(&point));
        let decoding_key = DecodingKey::from_ec_pem(&spki_pem).unwrap();

        let mut keys = HashMap::new();
        keys.insert(
            "test-key".to_string(),
            TrustedKey { algorithm: Algorithm::ES256, decoding_key },
        );
        let gate = AuthGate {
            keys,
            trusted_issuers: vec![issuer.to_string()],
            audience: audience.to_string(),
            realm: "https://auth.example.com/token".to_string(),
            service: "notary-server".to_string(),
        };

        let pkcs8_pem = pem_wrap("PRIVATE KEY", &pkcs8_doc);
        let encoding_key = EncodingKey::from_ec_pem(&pkcs8_pem).unwrap();
        (gate, encoding_key)
    }

    pub(crate) fn mint(encoding_key: &EncodingKey, claims: &TestClaims) -> String {
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some("test-key".to_string());
        jsonwebtoken::encode(&header, claims, encoding_key).unwrap()
    }
}
