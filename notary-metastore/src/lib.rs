//! Persists TUF metadata per (GUN, role, version), maintains the append-only change feed, and
//! wraps reads with the consistency guarantee described by `TUFMetaStorage`.

pub mod error;
pub mod memory;
pub mod record;
pub mod sql;
pub mod store;
pub mod tuf_storage;

pub use error::{Error, Result};
pub use memory::MemoryMetaStore;
pub use record::{Category, ChangeRecord, MetaRecord, MetaUpdate};
pub use sql::SqlMetaStore;
pub use store::{parse_since_id, MetaStore};
pub use tuf_storage::TUFMetaStorage;

// Compile-time check that both concrete backends satisfy `MetaStore` in full, per the design
// note against implicit/partial trait satisfaction.
const _: fn() = || {
    fn assert_meta_store<T: MetaStore>() {}
    assert_meta_store::<MemoryMetaStore>();
    assert_meta_store::<SqlMetaStore>();
};
