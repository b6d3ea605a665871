use crate::error::{self, Result};
use josekit::jwe::{JweHeader, PBES2_HS256_A128KW};
use snafu::ensure;

/// Encrypts `plaintext` (a PKCS#8 private key document) at rest using JWE: content encryption
/// AES-256-GCM, key wrapping PBES2-HS256+A128KW with `passphrase`. Returns the compact
/// serialization, which is what gets stored in `private_keys.private`.
pub fn encrypt(passphrase: &[u8], plaintext: &[u8]) -> Result<String> {
    let mut header = JweHeader::new();
    header.set_content_encryption("A256GCM");
    header.set_token_type("JWE");

    let encrypter = PBES2_HS256_A128KW
        .encrypter_from_bytes(passphrase)
        .map_err(|e| error::Error::Encrypt { msg: e.to_string() })?;

    josekit::jwe::serialize_compact(plaintext, &header, &encrypter)
        .map_err(|e| error::Error::Encrypt { msg: e.to_string() })
}

/// Decrypts a compact JWE produced by `encrypt` with `passphrase`.
pub fn decrypt(passphrase: &[u8], jwe_compact: &str) -> Result<Vec<u8>> {
    let decrypter = PBES2_HS256_A128KW
        .decrypter_from_bytes(passphrase)
        .map_err(|e| error::Error::Decrypt { msg: e.to_string() })?;

    let (payload, _header) = josekit::jwe::deserialize_compact(jwe_compact, &decrypter)
        .map_err(|e| error::Error::Decrypt { msg: e.to_string() })?;
    ensure!(!payload.is_empty(), error::DecryptSnafu { msg: "empty payload" });
    Ok(payload)
}
