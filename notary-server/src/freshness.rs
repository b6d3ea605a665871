//! The freshness engine: keeps a GUN's `snapshot` and `timestamp` roles live by regenerating
//! and re-signing them, through the signer RPC, whenever a consistent read would otherwise see
//! stale or expired metadata. Spec.md §4.3's "on read" half of the validator/freshness engine.

use crate::error::{Error, Result};
use crate::signer_client::Signer;
use chrono::{Duration, Utc};
use data_encoding::HEXLOWER;
use notary_metastore::{MetaStore, MetaUpdate};
use notary_types::canonical::to_canonical_bytes;
use notary_types::metadata::{
    Hashes, Role as RoleTrait, Root, Signature, Signed, Snapshot, SnapshotMeta, Targets,
    Timestamp, TimestampMeta,
};
use notary_types::RoleType;
use std::collections::HashMap;
use std::num::NonZeroU64;
use std::sync::Arc;

/// How long a freshly-regenerated snapshot or timestamp is valid for. The original roles'
/// expiries are whatever the publisher chose; only server-regenerated roles use this.
const REGENERATED_TTL: Duration = Duration::days(3);

pub struct Freshness<S: ?Sized> {
    store: Arc<S>,
    signer: Arc<dyn Signer>,
}

fn parse_signed<T: serde::de::DeserializeOwned>(data: &[u8], role: &str) -> Result<Signed<T>> {
    serde_json::from_slice(data).map_err(|e| Error::Internal {
        msg: format!("stored {} metadata failed to parse: {}", role, e),
    })
}

impl<S: MetaStore + ?Sized> Freshness<S> {
    pub fn new(store: Arc<S>, signer: Arc<dyn Signer>) -> Freshness<S> {
        Freshness { store, signer }
    }

    /// Ensures `gun`'s current `snapshot` and `timestamp` are fresh, regenerating whichever one
    /// (or both) needs it. Must be called before any consistent read reaches
    /// `TUFMetaStorage::get_current`, so that the hash chain it walks is guaranteed live.
    pub async fn ensure_fresh(&self, gun: &str) -> Result<()> {
        let root_record = self
            .store
            .get_current(gun, "root")
            .await
            .map_err(|_| Error::NotFound {
                gun: gun.to_string(),
                role: "root".to_string(),
            })?;
        let root: Root = parse_signed::<Root>(&root_record.data, "root")?.signed;

        let targets_record = self.store.get_current(gun, "targets").await.ok();
        let targets: Option<Targets> = match &targets_record {
            Some(r) => Some(parse_signed::<Targets>(&r.data, "targets")?.signed),
            None => None,
        };

        let enumerable_roles = self.enumerable_roles(gun, targets.as_ref()).await;

        let snapshot_record = self.store.get_current(gun, "snapshot").await.ok();
        let snapshot_stale = self
            .snapshot_is_stale(gun, snapshot_record.as_ref(), &enumerable_roles)
            .await?;
        let snapshot_record = if snapshot_stale {
            Some(
                self.regenerate_snapshot(gun, &root, snapshot_record.as_ref(), &enumerable_roles)
                    .await?,
            )
        } else {
            snapshot_record
        };
        let snapshot_record = snapshot_record.context_not_found(gun, "snapshot")?;

        let timestamp_record = self.store.get_current(gun, "timestamp").await.ok();
        if self.timestamp_is_stale(&timestamp_record, &snapshot_record) {
            self.regenerate_timestamp(gun, &root, &timestamp_record, &snapshot_record)
                .await?;
        }

        Ok(())
    }

    /// The roles a snapshot must enumerate: `root`, `targets`, and every delegation reachable
    /// from `targets`'s delegation tree (breadth-first; a depth cap guards against cycles).
    async fn enumerable_roles(&self, gun: &str, targets: Option<&Targets>) -> Vec<String> {
        let mut roles = vec!["root".to_string()];
        let Some(targets) = targets else {
            return roles;
        };
        roles.push("targets".to_string());

        let mut frontier: Vec<(String, Targets)> = vec![("targets".to_string(), targets.clone())];
        let mut seen = std::collections::HashSet::new();
        seen.insert("targets".to_string());

        for _ in 0..8 {
            let mut next = Vec::new();
            for (_, parent) in &frontier {
                let Some(delegations) = &parent.delegations else {
                    continue;
                };
                for delegated in &delegations.roles {
                    let name = format!("targets/{}", delegated.name);
                    if !seen.insert(name.clone()) {
                        continue;
                    }
                    roles.push(name.clone());
                    if let Ok(record) = self.store.get_current(gun, &name).await {
                        if let Ok(signed) = parse_signed::<Targets>(&record.data, &name) {
                            next.push((name, signed.signed));
                        }
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        roles
    }

    async fn snapshot_is_stale(
        &self,
        gun: &str,
        snapshot_record: Option<&notary_metastore::MetaRecord>,
        enumerable_roles: &[String],
    ) -> Result<bool> {
        let Some(record) = snapshot_record else {
            return Ok(true);
        };
        let snapshot: Signed<Snapshot> = parse_signed(&record.data, "snapshot")?;
        if snapshot.signed.expires() <= Utc::now() {
            return Ok(true);
        }
        for role in enumerable_roles {
            let Ok(current) = self.store.get_current(gun, role).await else {
                continue;
            };
            let file_name = format!("{}.json", role);
            let matches = snapshot
                .signed
                .meta
                .get(&file_name)
                .or_else(|| snapshot.signed.meta.get(role))
                .map(|m| m.hashes.as_ref().map(|h| h.sha256 == current.sha256).unwrap_or(false))
                .unwrap_or(false);
            if !matches {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn timestamp_is_stale(
        &self,
        timestamp_record: &Option<notary_metastore::MetaRecord>,
        snapshot_record: &notary_metastore::MetaRecord,
    ) -> bool {
        let Some(record) = timestamp_record else {
            return true;
        };
        let Ok(timestamp) = parse_signed::<Timestamp>(&record.data, "timestamp") else {
            return true;
        };
        if timestamp.signed.expires() <= Utc::now() {
            return true;
        }
        let referenced = timestamp
            .signed
            .meta
            .get("snapshot.json")
            .or_else(|| timestamp.signed.meta.get("snapshot"));
        match referenced {
            Some(meta) => meta.hashes.sha256 != snapshot_record.sha256,
            None => true,
        }
    }

    async fn sign_with_root_keys<T: serde::Serialize>(
        &self,
        root: &Root,
        role: &RoleType,
        signed: &T,
    ) -> Result<Vec<Signature>> {
        let message = to_canonical_bytes(signed)?;
        let candidates = root.keys_for_role(role);
        let mut signatures = Vec::new();
        for (key_id, _key) in candidates {
            if let Ok((sig, _alg)) = self.signer.sign(key_id, &message).await {
                signatures.push(Signature {
                    keyid: key_id.clone(),
                    sig: HEXLOWER.encode(&sig),
                });
            }
        }
        if signatures.is_empty() {
            return Err(Error::NoCryptoService);
        }
        Ok(signatures)
    }

    async fn regenerate_snapshot(
        &self,
        gun: &str,
        root: &Root,
        previous: Option<&notary_metastore::MetaRecord>,
        enumerable_roles: &[String],
    ) -> Result<notary_metastore::MetaRecord> {
        let prev_version = match previous {
            Some(record) => parse_signed::<Snapshot>(&record.data, "snapshot")
                .ok()
                .map(|s| s.signed.version.get()),
            None => None,
        };
        let version = prev_version.unwrap_or(0) + 1;

        let mut meta = HashMap::new();
        for role in enumerable_roles {
            let record = self.store.get_current(gun, role).await.map_err(|_| Error::NotFound {
                gun: gun.to_string(),
                role: role.clone(),
            })?;
            let role_version = extract_signed_version(&record.data).unwrap_or(record.version);
            meta.insert(
                format!("{}.json", role),
                SnapshotMeta {
                    length: Some(record.data.len() as u64),
                    hashes: Some(Hashes {
                        sha256: record.sha256.clone(),
                    }),
                    version: NonZeroU64::new(role_version).unwrap_or(NonZeroU64::MIN),
                },
            );
        }

        let snapshot = Snapshot {
            spec_version: "1.0.0".to_string(),
            version: NonZeroU64::new(version).unwrap_or(NonZeroU64::MIN),
            expires: Utc::now() + REGENERATED_TTL,
            meta,
        };
        let signatures = self
            .sign_with_root_keys(root, &RoleType::Snapshot, &snapshot)
            .await?;
        let signed = Signed {
            signed: snapshot,
            signatures,
        };
        let bytes = serde_json::to_vec(&signed).map_err(|e| Error::Internal { msg: e.to_string() })?;

        match self
            .store
            .update_current(
                gun,
                MetaUpdate {
                    role: "snapshot".to_string(),
                    version,
                    data: bytes,
                },
            )
            .await
        {
            // Lost the race to regenerate; fall through to the re-read below, which picks up
            // the winner's version.
            Ok(()) | Err(notary_metastore::Error::OldVersion { .. }) => {}
            Err(source) => {
                return Err(Error::Metastore {
                    op: "regenerate snapshot".to_string(),
                    source,
                })
            }
        }

        // Re-read so the returned record carries the store's own `created_at`/`sha256`; if a
        // concurrent regenerator won the race, this naturally returns their winning version.
        self.store
            .get_current(gun, "snapshot")
            .await
            .map_err(|source| Error::Metastore {
                op: "reload regenerated snapshot".to_string(),
                source,
            })
    }

    async fn regenerate_timestamp(
        &self,
        gun: &str,
        root: &Root,
        previous: &Option<notary_metastore::MetaRecord>,
        snapshot_record: &notary_metastore::MetaRecord,
    ) -> Result<()> {
        let prev_version = match previous {
            Some(record) => parse_signed::<Timestamp>(&record.data, "timestamp")
                .ok()
                .map(|s| s.signed.version.get()),
            None => None,
        };
        let version = prev_version.unwrap_or(0) + 1;
        let snapshot_version =
            extract_signed_version(&snapshot_record.data).unwrap_or(snapshot_record.version);

        let timestamp = Timestamp {
            spec_version: "1.0.0".to_string(),
            version: NonZeroU64::new(version).unwrap_or(NonZeroU64::MIN),
            expires: Utc::now() + REGENERATED_TTL,
            meta: HashMap::from([(
                "snapshot.json".to_string(),
                TimestampMeta {
                    length: Some(snapshot_record.data.len() as u64),
                    hashes: Hashes {
                        sha256: snapshot_record.sha256.clone(),
                    },
                    version: NonZeroU64::new(snapshot_version).unwrap_or(NonZeroU64::MIN),
                },
            )]),
        };
        let signatures = self
            .sign_with_root_keys(root, &RoleType::Timestamp, &timestamp)
            .await?;
        let signed = Signed {
            signed: timestamp,
            signatures,
        };
        let bytes = serde_json::to_vec(&signed).map_err(|e| Error::Internal { msg: e.to_string() })?;

        match self
            .store
            .update_current(
                gun,
                MetaUpdate {
                    role: "timestamp".to_string(),
                    version,
                    data: bytes,
                },
            )
            .await
        {
            Ok(()) => Ok(()),
            // Lost the race to regenerate; the winner's version is now current, which is all
            // this call promises.
            Err(notary_metastore::Error::OldVersion { .. }) => Ok(()),
            Err(source) => Err(Error::Metastore {
                op: "regenerate timestamp".to_string(),
                source,
            }),
        }
    }
}

fn extract_signed_version(data: &[u8]) -> Option<u64> {
    let value: serde_json::Value = serde_json::from_slice(data).ok()?;
    value.get("signed")?.get("version")?.as_u64()
}

trait OptionContextNotFound<T> {
    fn context_not_found(self, gun: &str, role: &str) -> Result<T>;
}

impl<T> OptionContextNotFound<T> for Option<T> {
    fn context_not_found(self, gun: &str, role: &str) -> Result<T> {
        self.ok_or_else(|| Error::NotFound {
            gun: gun.to_string(),
            role: role.to_string(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use async_trait::async_trait;
    use maplit::hashmap;
    use notary_metastore::MemoryMetaStore;
    use notary_types::key::{Algorithm as KeyAlgorithm, Key, PrivateKey};
    use notary_types::metadata::RoleKeys;

    /// Signs every request with a single fixed key, and mints fresh ed25519 keys on
    /// `create_key`. No network, no signer process; the freshness engine only ever sees the
    /// `Signer` trait.
    struct FakeSigner {
        key: PrivateKey,
    }

    #[async_trait]
    impl Signer for FakeSigner {
        async fn sign(&self, _key_id: &str, payload: &[u8]) -> Result<(Vec<u8>, KeyAlgorithm)> {
            Ok((self.key.sign(payload)?, self.key.algorithm()))
        }

        async fn create_key(&self, _gun: &str, _role: &str, algorithm: KeyAlgorithm) -> Result<(String, Key)> {
            let (handle, _doc) = PrivateKey::generate(algorithm)?;
            let public = handle.public_key();
            let key_id = public.key_id()?;
            Ok((key_id, public))
        }
    }

    fn root_with_key(key: &Key, key_id: &str) -> Root {
        let role_keys = RoleKeys {
            keyids: vec![key_id.to_string()],
            threshold: NonZeroU64::MIN,
        };
        Root {
            spec_version: "1.0.0".to_string(),
            consistent_snapshot: true,
            version: NonZeroU64::MIN,
            expires: Utc::now() + Duration::days(365),
            keys: hashmap! { key_id.to_string() => key.clone() },
            roles: hashmap! {
                RoleType::Root => role_keys.clone(),
                RoleType::Targets => role_keys.clone(),
                RoleType::Snapshot => role_keys.clone(),
                RoleType::Timestamp => role_keys,
            },
        }
    }

    fn sample_targets() -> Targets {
        Targets {
            spec_version: "1.0.0".to_string(),
            version: NonZeroU64::MIN,
            expires: Utc::now() + Duration::days(365),
            targets: HashMap::new(),
            delegations: None,
        }
    }

    async fn seed<T: serde::Serialize>(store: &MemoryMetaStore, gun: &str, role: &str, version: u64, signed: T) {
        let bytes = serde_json::to_vec(&Signed { signed, signatures: vec![] }).unwrap();
        store
            .update_current(gun, MetaUpdate { role: role.to_string(), version, data: bytes })
            .await
            .unwrap();
    }

    fn harness() -> (Arc<MemoryMetaStore>, Arc<dyn Signer>, Key, String) {
        let (key, _doc) = PrivateKey::generate(KeyAlgorithm::Ed25519).unwrap();
        let public = key.public_key();
        let key_id = public.key_id().unwrap();
        let store = Arc::new(MemoryMetaStore::new());
        let signer: Arc<dyn Signer> = Arc::new(FakeSigner { key });
        (store, signer, public, key_id)
    }

    #[tokio::test]
    async fn regenerates_missing_snapshot_and_timestamp() {
        let (store, signer, public, key_id) = harness();
        let root = root_with_key(&public, &key_id);
        seed(&store, "gun", "root", 1, root).await;
        seed(&store, "gun", "targets", 1, sample_targets()).await;

        let freshness = Freshness::new(store.clone(), signer);
        freshness.ensure_fresh("gun").await.unwrap();

        let snapshot = store.get_current("gun", "snapshot").await.unwrap();
        let timestamp = store.get_current("gun", "timestamp").await.unwrap();
        assert_eq!(snapshot.version, 1);
        assert_eq!(timestamp.version, 1);

        // Already fresh: a second pass must not bump either version.
        freshness.ensure_fresh("gun").await.unwrap();
        assert_eq!(store.get_current("gun", "snapshot").await.unwrap().version, 1);
        assert_eq!(store.get_current("gun", "timestamp").await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn regenerates_expired_timestamp_with_incremented_version() {
        let (store, signer, public, key_id) = harness();
        let root = root_with_key(&public, &key_id);
        seed(&store, "gun", "root", 1, root).await;
        seed(&store, "gun", "targets", 1, sample_targets()).await;

        let freshness = Freshness::new(store.clone(), signer);
        freshness.ensure_fresh("gun").await.unwrap();
        let snapshot = store.get_current("gun", "snapshot").await.unwrap();

        // Overwrite with an already-expired timestamp at a higher version, referencing the same
        // snapshot, to force the staleness check down the "expired" path.
        let expired = Timestamp {
            spec_version: "1.0.0".to_string(),
            version: NonZeroU64::new(2).unwrap(),
            expires: Utc::now() - Duration::days(1),
            meta: hashmap! {
                "snapshot.json".to_string() => TimestampMeta {
                    length: Some(snapshot.data.len() as u64),
                    hashes: Hashes { sha256: snapshot.sha256.clone() },
                    version: NonZeroU64::MIN,
                }
            },
        };
        seed(&store, "gun", "timestamp", 2, expired).await;

        freshness.ensure_fresh("gun").await.unwrap();

        let regenerated = store.get_current("gun", "timestamp").await.unwrap();
        assert_eq!(regenerated.version, 3);
        let signed: Signed<Timestamp> = parse_signed(&regenerated.data, "timestamp").unwrap();
        assert!(signed.signed.expires() > Utc::now());
        assert_eq!(signed.signatures.len(), 1);
        assert!(public.verify(&to_canonical_bytes(&signed.signed).unwrap(), &{
            let sig = &signed.signatures[0];
            HEXLOWER.decode(sig.sig.as_bytes()).unwrap()
        }));
    }

    #[tokio::test]
    async fn concurrent_regeneration_leaves_exactly_one_winner() {
        let (store, signer, public, key_id) = harness();
        let root = root_with_key(&public, &key_id);
        seed(&store, "gun", "root", 1, root).await;
        seed(&store, "gun", "targets", 1, sample_targets()).await;

        let freshness = Arc::new(Freshness::new(store.clone(), signer));
        let (a, b) = tokio::join!(
            freshness.ensure_fresh("gun"),
            freshness.ensure_fresh("gun")
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(store.get_current("gun", "snapshot").await.unwrap().version, 1);
        assert_eq!(store.get_current("gun", "timestamp").await.unwrap().version, 1);
    }
}
