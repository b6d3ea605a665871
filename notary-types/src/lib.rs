//! Shared TUF data model: GUNs, roles, canonical JSON, signed metadata, and key material.
//!
//! This crate has no knowledge of storage or transport; it is the vocabulary the metastore,
//! signer, and server crates all speak.

pub mod canonical;
pub mod error;
pub mod gun;
pub mod key;
pub mod metadata;
pub mod role;
pub mod sign;

pub use error::{Error, Result};
pub use gun::Gun;
pub use key::{Algorithm, Key, PrivateKey};
pub use metadata::{
    DelegatedRole, Delegations, Hashes, PathSet, Role, RoleKeys, Root, Signature, Signed,
    Snapshot, SnapshotMeta, Target, Targets, Timestamp, TimestampMeta,
};
pub use role::RoleType;
