//! The server: write-time validation, read-time freshness regeneration, a bearer-token auth
//! gate, and the HTTP surface that ties them to a `MetaStore` and a signer RPC client.

pub mod auth;
pub mod config;
pub mod error;
pub mod freshness;
pub mod http;
pub mod signer_client;
pub mod validator;

pub use auth::AuthGate;
pub use config::Config;
pub use error::{Error, Result};
pub use freshness::Freshness;
pub use http::SharedData;
pub use signer_client::{Signer, SignerClient, SignerTls};
