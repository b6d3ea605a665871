use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display(
        "Rejected update for {} role '{}': version {} is not newer than the current max",
        gun,
        role,
        version
    ))]
    OldVersion {
        gun: String,
        role: String,
        version: u64,
    },

    #[snafu(display("Batch contains duplicate (role, version) pairs"))]
    DuplicateInBatch,

    #[snafu(display("No metadata found for {} role '{}'", gun, role))]
    NotFound { gun: String, role: String },

    #[snafu(display("Change feed cursor '{}' is not a valid integer", cursor))]
    BadChangeId { cursor: String },

    #[snafu(display("Metastore backend error during {}: {}", op, source))]
    Backend { op: String, source: sqlx::Error },

    #[snafu(display("Failed to (de)serialize metadata during {}: {}", op, source))]
    Serialization {
        op: String,
        source: serde_json::Error,
    },

    #[snafu(display("Another task poisoned the in-memory metastore lock by panicking"))]
    LockPoisoned,

    #[snafu(display(
        "Could not chase the hash chain for {} role '{}': {}",
        gun,
        role,
        reason
    ))]
    Inconsistent {
        gun: String,
        role: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
