//! The signer: an encrypted-at-rest private key store plus the gRPC façade the freshness
//! engine calls to produce signatures without ever seeing key material.

pub mod config;
pub mod error;
pub mod jwe;
pub mod keydb;
pub mod memory_keydb;
pub mod passphrase;
pub mod rpc;
pub mod sql_keydb;

pub use config::Config;
pub use error::{Error, Result};
pub use keydb::{KeyDBStore, KeyRow};
pub use memory_keydb::MemoryKeyStore;
pub use passphrase::{EnvPassphraseRetriever, PassphraseRetriever};
pub use rpc::SignerService;
pub use sql_keydb::SqlKeyStore;

const _: fn() = || {
    fn assert_keydb_store<T: KeyDBStore>() {}
    assert_keydb_store::<MemoryKeyStore>();
    assert_keydb_store::<SqlKeyStore>();
};
