use crate::error::{self, Result};
use serde::Deserialize;
use snafu::ResultExt;
use std::path::{Path, PathBuf};

/// Configuration for the `notary-signer` binary, loaded from the single `-config=<file>` TOML
/// file named in the CLI surface.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub grpc_addr: String,
    pub tls_cert: PathBuf,
    pub tls_key: PathBuf,
    pub client_ca: PathBuf,
    #[serde(default)]
    pub log_level: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// `memory` for the in-process dev/test backend, or a `postgres://...` URL.
    pub backend: String,
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
            grpc_addr = "0.0.0.0:7899"
            tls_cert = "/etc/notary-signer/server.crt"
            tls_key = "/etc/notary-signer/server.key"
            client_ca = "/etc/notary-signer/client-ca.crt"

            [storage]
            backend = "memory"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.grpc_addr, "0.0.0.0:7899");
        assert_eq!(config.storage.backend, "memory");
    }
}
