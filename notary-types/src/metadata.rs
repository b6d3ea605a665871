use crate::canonical::to_canonical_bytes;
use crate::error::Result;
use crate::key::Key;
use crate::role::RoleType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroU64;

/// A signed TUF document: the role body plus the signatures over its canonical form.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Signed<T> {
    pub signed: T,
    pub signatures: Vec<Signature>,
}

impl<T: Serialize> Signed<T> {
    /// The bytes that `signatures` sign: the canonical JSON of `signed` alone.
    pub fn signed_bytes(&self) -> Result<Vec<u8>> {
        to_canonical_bytes(&self.signed)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Signature {
    pub keyid: String,
    pub sig: String,
}

/// Shared behavior of the four base roles: a version, an expiry, and a stable `_type`.
pub trait Role {
    const TYPE: RoleType;
    fn version(&self) -> NonZeroU64;
    fn expires(&self) -> DateTime<Utc>;
}

fn spec_version_default() -> String {
    "1.0.0".to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "_type", rename = "root")]
pub struct Root {
    #[serde(default = "spec_version_default")]
    pub spec_version: String,
    pub consistent_snapshot: bool,
    pub version: NonZeroU64,
    pub expires: DateTime<Utc>,
    pub keys: HashMap<String, Key>,
    pub roles: HashMap<RoleType, RoleKeys>,
}

impl Role for Root {
    const TYPE: RoleType = RoleType::Root;
    fn version(&self) -> NonZeroU64 {
        self.version
    }
    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }
}

impl Root {
    /// The keys and threshold currently authorized for `role`.
    pub fn role_keys(&self, role: &RoleType) -> Option<&RoleKeys> {
        self.roles.get(role)
    }

    /// All public keys delegated for `role` by this root, as `(key_id, Key)` pairs.
    pub fn keys_for_role(&self, role: &RoleType) -> Vec<(&String, &Key)> {
        match self.roles.get(role) {
            Some(role_keys) => self
                .keys
                .iter()
                .filter(|(id, _)| role_keys.keyids.contains(*id))
                .collect(),
            None => Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoleKeys {
    pub keyids: Vec<String>,
    pub threshold: NonZeroU64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Hashes {
    pub sha256: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "_type", rename = "snapshot")]
pub struct Snapshot {
    #[serde(default = "spec_version_default")]
    pub spec_version: String,
    pub version: NonZeroU64,
    pub expires: DateTime<Utc>,
    pub meta: HashMap<String, SnapshotMeta>,
}

impl Role for Snapshot {
    const TYPE: RoleType = RoleType::Snapshot;
    fn version(&self) -> NonZeroU64 {
        self.version
    }
    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub length: Option<u64>,
    pub hashes: Option<Hashes>,
    pub version: NonZeroU64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "_type", rename = "timestamp")]
pub struct Timestamp {
    #[serde(default = "spec_version_default")]
    pub spec_version: String,
    pub version: NonZeroU64,
    pub expires: DateTime<Utc>,
    pub meta: HashMap<String, TimestampMeta>,
}

impl Role for Timestamp {
    const TYPE: RoleType = RoleType::Timestamp;
    fn version(&self) -> NonZeroU64 {
        self.version
    }
    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimestampMeta {
    pub length: Option<u64>,
    pub hashes: Hashes,
    pub version: NonZeroU64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "_type", rename = "targets")]
pub struct Targets {
    #[serde(default = "spec_version_default")]
    pub spec_version: String,
    pub version: NonZeroU64,
    pub expires: DateTime<Utc>,
    pub targets: HashMap<String, Target>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegations: Option<Delegations>,
}

impl Role for Targets {
    const TYPE: RoleType = RoleType::Targets;
    fn version(&self) -> NonZeroU64 {
        self.version
    }
    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }
}

impl Targets {
    /// Finds the delegated role named `name` among this role's immediate delegations.
    pub fn delegated_role(&self, name: &str) -> Option<&DelegatedRole> {
        self.delegations
            .as_ref()
            .and_then(|d| d.roles.iter().find(|r| r.name == name))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Target {
    pub length: u64,
    pub hashes: Hashes,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub custom: HashMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Delegations {
    pub keys: HashMap<String, Key>,
    pub roles: Vec<DelegatedRole>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DelegatedRole {
    pub name: String,
    pub keyids: Vec<String>,
    pub threshold: NonZeroU64,
    pub paths: PathSet,
    #[serde(default)]
    pub terminating: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSet {
    Paths(Vec<String>),
    PathHashPrefixes(Vec<String>),
}

impl PathSet {
    /// Whether `target_path` falls within this delegation's authority. Glob-style `*`/`?`
    /// wildcards are honored for `Paths`; `PathHashPrefixes` matches on the hex prefix of the
    /// target's SHA-256.
    pub fn matches(&self, target_path: &str, target_sha256_hex: &str) -> bool {
        match self {
            PathSet::Paths(patterns) => patterns.iter().any(|p| glob_match(p, target_path)),
            PathSet::PathHashPrefixes(prefixes) => prefixes
                .iter()
                .any(|prefix| target_sha256_hex.starts_with(prefix.as_str())),
        }
    }
}

/// Minimal shell-style glob matcher supporting `*` and `?`, sufficient for TUF delegation paths.
fn glob_match(pattern: &str, text: &str) -> bool {
    fn helper(p: &[u8], t: &[u8]) -> bool {
        match (p.first(), t.first()) {
            (None, None) => true,
            (Some(b'*'), _) => helper(&p[1..], t) || (!t.is_empty() && helper(p, &t[1..])),
            (Some(b'?'), Some(_)) => helper(&p[1..], &t[1..]),
            (Some(pc), Some(tc)) if pc == tc => helper(&p[1..], &t[1..]),
            _ => false,
        }
    }
    helper(pattern.as_bytes(), text.as_bytes())
}

#[cfg(test)]
mod test {
    use super::*;
    use maplit::hashmap;

    fn sample_root() -> Root {
        Root {
            spec_version: "1.0.0".to_string(),
            consistent_snapshot: true,
            version: NonZeroU64::new(1).unwrap(),
            expires: Utc::now(),
            keys: hashmap! {},
            roles: hashmap! {},
        }
    }

    #[test]
    fn root_type_tag() {
        let root = sample_root();
        let bytes = to_canonical_bytes(&root).unwrap();
        let s = String::from_utf8(bytes).unwrap();
        assert!(s.contains(r#""_type":"root""#));
    }

    #[test]
    fn glob_matches_wildcard() {
        let set = PathSet::Paths(vec!["releases/*".to_string()]);
        assert!(set.matches("releases/1.0.0.tar.gz", "deadbeef"));
        assert!(!set.matches("other/1.0.0.tar.gz", "deadbeef"));
    }

    #[test]
    fn hash_prefix_matches() {
        let set = PathSet::PathHashPrefixes(vec!["dead".to_string()]);
        assert!(set.matches("whatever", "deadbeef"));
        assert!(!set.matches("whatever", "beefdead"));
    }
}
