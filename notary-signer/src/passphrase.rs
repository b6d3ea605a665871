use crate::error::{self, Result};
use snafu::OptionExt;

/// Resolves a named passphrase alias to the bytes used as the JWE key-wrapping passphrase.
/// Abstracted so that tests can supply fixed passphrases without touching the environment.
pub trait PassphraseRetriever: Send + Sync {
    fn get(&self, alias: &str) -> Result<Vec<u8>>;

    /// The alias to use for newly-created keys, when the caller doesn't specify one.
    fn default_alias(&self) -> Result<String>;
}

/// Reads passphrases from `NOTARY_SIGNER_<ALIAS>` and the default alias from
/// `NOTARY_SIGNER_DEFAULT_ALIAS`, per the documented CLI/env surface.
pub struct EnvPassphraseRetriever;

impl PassphraseRetriever for EnvPassphraseRetriever {
    fn get(&self, alias: &str) -> Result<Vec<u8>> {
        let var = format!("NOTARY_SIGNER_{}", alias.to_uppercase());
        std::env::var(&var)
            .map(|s| s.into_bytes())
            .ok()
            .context(error::NoPassphraseSnafu {
                alias: alias.to_string(),
            })
    }

    fn default_alias(&self) -> Result<String> {
        std::env::var("NOTARY_SIGNER_DEFAULT_ALIAS").map_err(|_| error::Error::NoPassphrase {
            alias: "default".to_string(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct FixedPassphraseRetriever;
    impl PassphraseRetriever for FixedPassphraseRetriever {
        fn get(&self, _alias: &str) -> Result<Vec<u8>> {
            Ok(b"fixed".to_vec())
        }
        fn default_alias(&self) -> Result<String> {
            Ok("default".to_string())
        }
    }

    #[test]
    fn fixed_retriever_works() {
        let r = FixedPassphraseRetriever;
        assert_eq!(r.get("anything").unwrap(), b"fixed".to_vec());
        assert_eq!(r.default_alias().unwrap(), "default");
    }
}
