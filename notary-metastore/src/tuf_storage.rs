use crate::error;
use crate::record::MetaRecord;
use crate::store::MetaStore;
use notary_types::metadata::{Signed, Snapshot, Timestamp};
use std::sync::Arc;

/// Wraps a `MetaStore` so that `get_current` always anchors its answer on the currently-serving
/// timestamp: `timestamp -> snapshot (by hash) -> role (by hash)`. This guarantees a client
/// reading `targets` sees exactly the `targets` the timestamp currently being served vouches
/// for, even if a newer `targets` has since been published by an interleaved write.
pub struct TUFMetaStorage<S: ?Sized> {
    inner: Arc<S>,
}

impl<S: MetaStore + ?Sized> TUFMetaStorage<S> {
    pub fn new(inner: Arc<S>) -> Self {
        TUFMetaStorage { inner }
    }

    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    /// The consistent read described above. `role == "timestamp"` short-circuits to a plain
    /// `get_current`; every other role is resolved by hash through the chain.
    pub async fn get_current(&self, gun: &str, role: &str) -> error::Result<MetaRecord> {
        let timestamp_record = self.inner.get_current(gun, "timestamp").await?;
        if role == "timestamp" {
            return Ok(timestamp_record);
        }

        let timestamp: Signed<Timestamp> =
            serde_json::from_slice(&timestamp_record.data).map_err(|e| {
                error::Error::Inconsistent {
                    gun: gun.to_string(),
                    role: "timestamp".to_string(),
                    reason: e.to_string(),
                }
            })?;
        let snapshot_hash = timestamp
            .signed
            .meta
            .get("snapshot.json")
            .or_else(|| timestamp.signed.meta.get("snapshot"))
            .map(|m| m.hashes.sha256.clone())
            .ok_or_else(|| error::Error::Inconsistent {
                gun: gun.to_string(),
                role: "timestamp".to_string(),
                reason: "missing snapshot hash in meta".to_string(),
            })?;

        let snapshot_record = self
            .inner
            .get_checksum(gun, "snapshot", &snapshot_hash)
            .await
            .map_err(|_| error::Error::Inconsistent {
                gun: gun.to_string(),
                role: "snapshot".to_string(),
                reason: "referenced snapshot not found by hash".to_string(),
            })?;
        if role == "snapshot" {
            return Ok(snapshot_record);
        }

        let snapshot: Signed<Snapshot> =
            serde_json::from_slice(&snapshot_record.data).map_err(|e| {
                error::Error::Inconsistent {
                    gun: gun.to_string(),
                    role: "snapshot".to_string(),
                    reason: e.to_string(),
                }
            })?;
        let file_name = format!("{}.json", role);
        let role_hash = snapshot
            .signed
            .meta
            .get(&file_name)
            .or_else(|| snapshot.signed.meta.get(role))
            .and_then(|m| m.hashes.as_ref())
            .map(|h| h.sha256.clone())
            .ok_or_else(|| error::Error::Inconsistent {
                gun: gun.to_string(),
                role: role.to_string(),
                reason: "missing role hash in snapshot meta".to_string(),
            })?;

        self.inner
            .get_checksum(gun, role, &role_hash)
            .await
            .map_err(|_| error::Error::Inconsistent {
                gun: gun.to_string(),
                role: role.to_string(),
                reason: "referenced role content not found by hash".to_string(),
            })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::memory::MemoryMetaStore;
    use crate::record::MetaUpdate;
    use chrono::Utc;
    use notary_types::metadata::{Hashes, Signature, SnapshotMeta, TimestampMeta};
    use sha2::{Digest, Sha256};
    use std::collections::HashMap;
    use std::num::NonZeroU64;

    fn sha256_hex(data: &[u8]) -> String {
        data_encoding::HEXLOWER.encode(&Sha256::digest(data))
    }

    #[tokio::test]
    async fn chases_timestamp_to_snapshot_to_role() {
        let store = Arc::new(MemoryMetaStore::new());

        let targets_bytes = br#"{"_type":"targets","version":1}"#.to_vec();
        let targets_hash = sha256_hex(&targets_bytes);
        store
            .update_current(
                "g",
                MetaUpdate {
                    role: "targets".to_string(),
                    version: 1,
                    data: targets_bytes.clone(),
                },
            )
            .await
            .unwrap();

        let snapshot = Signed {
            signed: Snapshot {
                spec_version: "1.0.0".to_string(),
                version: NonZeroU64::new(1).unwrap(),
                expires: Utc::now(),
                meta: HashMap::from([(
                    "targets.json".to_string(),
                    SnapshotMeta {
                        length: Some(targets_bytes.len() as u64),
                        hashes: Some(Hashes {
                            sha256: targets_hash.clone(),
                        }),
                        version: NonZeroU64::new(1).unwrap(),
                    },
                )]),
            },
            signatures: vec![],
        };
        let snapshot_bytes = serde_json::to_vec(&snapshot).unwrap();
        let snapshot_hash = sha256_hex(&snapshot_bytes);
        store
            .update_current(
                "g",
                MetaUpdate {
                    role: "snapshot".to_string(),
                    version: 1,
                    data: snapshot_bytes.clone(),
                },
            )
            .await
            .unwrap();

        let timestamp = Signed {
            signed: Timestamp {
                spec_version: "1.0.0".to_string(),
                version: NonZeroU64::new(1).unwrap(),
                expires: Utc::now(),
                meta: HashMap::from([(
                    "snapshot.json".to_string(),
                    TimestampMeta {
                        length: Some(snapshot_bytes.len() as u64),
                        hashes: Hashes {
                            sha256: snapshot_hash,
                        },
                        version: NonZeroU64::new(1).unwrap(),
                    },
                )]),
            },
            signatures: vec![Signature {
                keyid: "unused".to_string(),
                sig: "unused".to_string(),
            }],
        };
        let timestamp_bytes = serde_json::to_vec(&timestamp).unwrap();
        store
            .update_current(
                "g",
                MetaUpdate {
                    role: "timestamp".to_string(),
                    version: 1,
                    data: timestamp_bytes,
                },
            )
            .await
            .unwrap();

        let wrapper = TUFMetaStorage::new(store);
        let resolved = wrapper.get_current("g", "targets").await.unwrap();
        assert_eq!(resolved.sha256, targets_hash);
    }
}
