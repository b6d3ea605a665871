use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One signed metadata blob as handed to `UpdateCurrent`/`UpdateMany`. The store computes
/// `sha256` itself; callers only provide `role`, `version`, and `data`.
#[derive(Clone, Debug)]
pub struct MetaUpdate {
    pub role: String,
    pub version: u64,
    pub data: Vec<u8>,
}

/// A stored metadata blob as returned by reads.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MetaRecord {
    pub gun: String,
    pub role: String,
    pub version: u64,
    pub sha256: String,
    pub data: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// The category of a change feed event.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Update,
    Deletion,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Update => "update",
            Category::Deletion => "deletion",
        }
    }
}

/// One append-only change feed event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: i64,
    pub gun: String,
    pub version: u64,
    pub sha256: String,
    pub category: Category,
    pub created_at: DateTime<Utc>,
}
