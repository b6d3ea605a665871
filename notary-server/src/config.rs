use crate::error::{self, Result};
use serde::Deserialize;
use snafu::ResultExt;
use std::path::{Path, PathBuf};

/// Configuration for the `notary-server` binary, loaded from the single `-config=<file>` TOML
/// file named in the CLI surface, the same convention `notary-signer` uses.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub signer: SignerConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub caching: CachingConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub http_addr: String,
    #[serde(default)]
    pub log_level: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// `memory` for the in-process dev/test backend, or a `postgres://...` URL.
    pub backend: String,
}

/// Where and how to dial the signer for every signing operation the freshness engine needs.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignerConfig {
    pub addr: String,
    pub ca_cert: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
    pub domain_name: String,
}

/// Bearer-token verification settings for the auth gate in front of every mutating route.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    pub trust_bundle_dir: PathBuf,
    pub trusted_issuers: Vec<String>,
    pub audience: String,
    pub realm: String,
    pub service: String,
}

/// `Cache-Control` TTLs applied to GET responses, in seconds. Consistent and explicitly-versioned
/// reads are immutable content and get a long TTL; current-role reads can change underneath a
/// client as soon as a new version is published and get a short one.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CachingConfig {
    pub consistent_ttl: u64,
    pub current_ttl: u64,
}

impl Default for CachingConfig {
    fn default() -> Self {
        // One year for consistent/versioned reads, matching the "immutable once published"
        // invariant; 5 minutes for current-role reads.
        CachingConfig {
            consistent_ttl: 31_536_000,
            current_ttl: 300,
        }
    }
}

impl Config {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).context(error::ConfigReadSnafu {
            path: path.display().to_string(),
        })?;
        toml::from_str(&contents).context(error::ConfigParseSnafu {
            path: path.display().to_string(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let toml = r#"
            [server]
            http_addr = "0.0.0.0:4443"

            [storage]
            backend = "memory"

            [signer]
            addr = "https://notary-signer:7899"
            ca_cert = "/etc/notary-server/signer-ca.crt"
            client_cert = "/etc/notary-server/signer-client.crt"
            client_key = "/etc/notary-server/signer-client.key"
            domain_name = "notary-signer"

            [auth]
            trust_bundle_dir = "/etc/notary-server/trust"
            trusted_issuers = ["https://auth.example.com/token"]
            audience = "notary-server"
            realm = "https://auth.example.com/token"
            service = "notary-server"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.http_addr, "0.0.0.0:4443");
        assert_eq!(config.storage.backend, "memory");
        assert_eq!(config.signer.domain_name, "notary-signer");
        assert_eq!(config.caching.consistent_ttl, 31_536_000);
        assert_eq!(config.caching.current_ttl, 300);
    }

    #[test]
    fn caching_overrides_apply() {
        let toml = r#"
            [server]
            http_addr = "0.0.0.0:4443"

            [storage]
            backend = "memory"

            [signer]
            addr = "https://notary-signer:7899"
            ca_cert = "/etc/notary-server/signer-ca.crt"
            client_cert = "/etc/notary-server/signer-client.crt"
            client_key = "/etc/notary-server/signer-client.key"
            domain_name = "notary-signer"

            [auth]
            trust_bundle_dir = "/etc/notary-server/trust"
            trusted_issuers = ["https://auth.example.com/token"]
            audience = "notary-server"
            realm = "https://auth.example.com/token"
            service = "notary-server"

            [caching]
            consistent_ttl = 60
            current_ttl = 5
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.caching.consistent_ttl, 60);
        assert_eq!(config.caching.current_ttl, 5);
    }
}
