use crate::error::Result;
use crate::record::{ChangeRecord, MetaRecord, MetaUpdate};
use async_trait::async_trait;

/// Persists TUF metadata per (GUN, role, version) and maintains the append-only change feed.
///
/// Implementations must honor the atomicity and version-monotonicity rules documented on each
/// method; `TUFMetaStorage` relies on them to provide its consistent-read guarantee.
#[async_trait]
pub trait MetaStore: Send + Sync {
    /// Succeeds iff no existing record for `(gun, update.role)` has version >= `update.version`.
    /// On success, inserts the record and, if `update.role == "timestamp"`, appends a
    /// `Category::Update` change record in the same atomic unit.
    async fn update_current(&self, gun: &str, update: MetaUpdate) -> Result<()>;

    /// All-or-nothing multi-role publish. Fails with `OldVersion` if any update in the batch
    /// duplicates another by `(role, version)`, or if any update's version is not strictly
    /// greater than the current max for its `(gun, role)`. On success, inserts every record and
    /// appends at most one change record, for the timestamp update if one was present.
    async fn update_many(&self, gun: &str, updates: Vec<MetaUpdate>) -> Result<()>;

    /// The highest-versioned record for `(gun, role)`.
    async fn get_current(&self, gun: &str, role: &str) -> Result<MetaRecord>;

    /// Exact lookup by content hash.
    async fn get_checksum(&self, gun: &str, role: &str, sha256: &str) -> Result<MetaRecord>;

    /// Exact lookup by version.
    async fn get_version(&self, gun: &str, role: &str, version: u64) -> Result<MetaRecord>;

    /// Hard-removes every record for `gun`. Idempotent; appends one `Category::Deletion`
    /// change record (with an empty `sha256`) only if any record was actually removed.
    async fn delete(&self, gun: &str) -> Result<()>;

    /// Pages the change feed. `since_id < 0` means "from the latest, backwards" and forces
    /// `reversed`. Returns at most `page_size` records.
    async fn get_changes(
        &self,
        since_id: i64,
        page_size: u32,
        gun_filter: Option<&str>,
        reversed: bool,
    ) -> Result<Vec<ChangeRecord>>;

    async fn check_health(&self) -> Result<()>;
}

/// Parses a change feed cursor from its wire string form, per `GetChanges`'s cursor rules.
pub fn parse_since_id(cursor: &str) -> Result<i64> {
    cursor
        .parse::<i64>()
        .map_err(|_| crate::error::Error::BadChangeId {
            cursor: cursor.to_string(),
        })
}
