//! Write-time validation run before every `MetaStore::UpdateMany`.
//!
//! Rules are enforced in the order spelled out in the component's contract: bootstrap presence
//! of `root`, per-update parse/version/expiry/signature checks, root-chain continuity, snapshot
//! and timestamp meta-enumeration completeness, version monotonicity, and delegation signing.

use crate::error::{self, Error, Result};
use data_encoding::HEXLOWER;
use notary_metastore::{MetaStore, MetaUpdate};
use notary_types::metadata::{Role as RoleTrait, Root, Signed, Snapshot, Targets, Timestamp};
use notary_types::{Key, RoleType};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::HashMap;

fn parse_signed<T: DeserializeOwned>(data: &[u8]) -> Result<Signed<T>> {
    serde_json::from_slice(data).map_err(|e| Error::BadMetadata {
        reason: format!("invalid canonical JSON: {}", e),
    })
}

fn expected_type_tag(role: &str) -> &'static str {
    if role == "root" {
        "root"
    } else if role == "snapshot" {
        "snapshot"
    } else if role == "timestamp" {
        "timestamp"
    } else {
        "targets"
    }
}

fn check_type_tag(data: &[u8], role: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_slice(data).map_err(|e| Error::BadMetadata {
        reason: format!("invalid canonical JSON: {}", e),
    })?;
    let actual = value
        .get("signed")
        .and_then(|s| s.get("_type"))
        .and_then(|t| t.as_str())
        .map(|t| t.to_string());
    let expected = expected_type_tag(role);
    ensure!(
        actual.as_deref() == Some(expected),
        error::BadMetadataSnafu {
            reason: format!("expected signed._type '{}', found {:?}", expected, actual),
        }
    );
    Ok(())
}

fn check_common_rules<T>(
    signed: &Signed<T>,
    update: &MetaUpdate,
    keys: &HashMap<String, Key>,
    threshold: u64,
) -> Result<()>
where
    T: RoleTrait + Serialize,
{
    ensure!(
        signed.signed.version().get() == update.version,
        error::BadMetadataSnafu {
            reason: format!(
                "{} signed.version {} does not match upload version {}",
                update.role,
                signed.signed.version(),
                update.version
            ),
        }
    );
    ensure!(
        signed.signed.expires() > chrono::Utc::now(),
        error::BadMetadataSnafu {
            reason: format!("{} has already expired", update.role),
        }
    );
    ensure!(
        notary_types::sign::meets_threshold(signed, keys, threshold),
        error::InsufficientSignaturesSnafu {
            reason: format!("{} lacks {} valid signatures", update.role, threshold),
        }
    );
    Ok(())
}

fn role_keys(root: &Root, role: &RoleType) -> (HashMap<String, Key>, u64) {
    match root.role_keys(role) {
        Some(role_keys) => {
            let keys = root
                .keys_for_role(role)
                .into_iter()
                .map(|(id, key)| (id.clone(), key.clone()))
                .collect();
            (keys, role_keys.threshold.get())
        }
        None => (HashMap::new(), u64::MAX),
    }
}

enum Parsed {
    Root(Signed<Root>),
    Targets(Signed<Targets>),
    Snapshot(Signed<Snapshot>),
    Timestamp(Signed<Timestamp>),
}

async fn fetch_current_version(store: &dyn MetaStore, gun: &str, role: &str) -> Result<Option<u64>> {
    match store.get_current(gun, role).await {
        Ok(record) => {
            let value: serde_json::Value = serde_json::from_slice(&record.data).unwrap_or_default();
            Ok(value
                .get("signed")
                .and_then(|s| s.get("version"))
                .and_then(|v| v.as_u64()))
        }
        Err(notary_metastore::Error::NotFound { .. }) => Ok(None),
        Err(source) => Err(Error::Metastore {
            op: "get_current".to_string(),
            source,
        }),
    }
}

/// Runs every validator rule against `updates` before they're committed via `UpdateMany`.
pub async fn validate_batch(store: &dyn MetaStore, gun: &str, updates: &[MetaUpdate]) -> Result<()> {
    ensure!(
        !updates.is_empty(),
        error::BadMetadataSnafu {
            reason: "empty update batch".to_string(),
        }
    );

    // Rule 1: bootstrap of a new GUN must include root.
    let existing_root_record = match store.get_current(gun, "root").await {
        Ok(record) => Some(record),
        Err(notary_metastore::Error::NotFound { .. }) => None,
        Err(source) => {
            return Err(Error::Metastore {
                op: "get_current root".to_string(),
                source,
            })
        }
    };
    let is_bootstrap = existing_root_record.is_none();
    let root_update = updates.iter().find(|u| u.role == "root");
    ensure!(
        !is_bootstrap || root_update.is_some(),
        error::BadHierarchySnafu {
            reason: "bootstrap of a new GUN must include a root update".to_string(),
        }
    );

    let current_root: Option<Root> = match &existing_root_record {
        Some(record) => Some(parse_signed::<Root>(&record.data)?.signed),
        None => None,
    };

    // Precompute content hash, length, and type tag for every update; also parse each into a
    // typed, signature-checkable form.
    let mut hashes: HashMap<String, (String, u64)> = HashMap::new();
    let mut parsed: HashMap<String, Parsed> = HashMap::new();
    for update in updates {
        check_type_tag(&update.data, &update.role)?;
        let digest = Sha256::digest(&update.data);
        hashes.insert(
            update.role.clone(),
            (HEXLOWER.encode(&digest), update.data.len() as u64),
        );

        let role_type = RoleType::parse(&update.role);
        let item = match role_type {
            RoleType::Root => Parsed::Root(parse_signed::<Root>(&update.data)?),
            RoleType::Snapshot => Parsed::Snapshot(parse_signed::<Snapshot>(&update.data)?),
            RoleType::Timestamp => Parsed::Timestamp(parse_signed::<Timestamp>(&update.data)?),
            RoleType::Targets | RoleType::Delegation(_) => {
                Parsed::Targets(parse_signed::<Targets>(&update.data)?)
            }
        };
        parsed.insert(update.role.clone(), item);
    }

    let new_root: Option<&Root> = match parsed.get("root") {
        Some(Parsed::Root(r)) => Some(&r.signed),
        _ => None,
    };
    let governing_root = new_root
        .or(current_root.as_ref())
        .context(error::BadHierarchySnafu {
            reason: "no root available to validate against".to_string(),
        })?;

    // Rule 2: per-update version/expiry/signature checks, using the governing root's keys.
    for update in updates {
        let role_type = RoleType::parse(&update.role);
        let (keys, threshold) = role_keys(governing_root, &role_type);
        match parsed.get(&update.role).unwrap() {
            Parsed::Root(s) => check_common_rules(s, update, &keys, threshold)?,
            Parsed::Targets(s) => check_common_rules(s, update, &keys, threshold)?,
            Parsed::Snapshot(s) => check_common_rules(s, update, &keys, threshold)?,
            Parsed::Timestamp(s) => check_common_rules(s, update, &keys, threshold)?,
        }
    }

    // Rule 3: root chain continuity — a new root must also satisfy the previous root's
    // root-role threshold.
    if let (Some(Parsed::Root(new)), Some(old_root)) = (parsed.get("root"), &current_root) {
        let (old_keys, old_threshold) = role_keys(old_root, &RoleType::Root);
        ensure!(
            notary_types::sign::meets_threshold(new, &old_keys, old_threshold),
            error::BadHierarchySnafu {
                reason: "new root is not signed by the previous root's root keys".to_string(),
            }
        );
    }

    // Rule 4: snapshot/timestamp meta-enumeration completeness.
    if let Some(Parsed::Snapshot(snapshot)) = parsed.get("snapshot") {
        for update in updates {
            if update.role == "snapshot" || update.role == "timestamp" {
                continue;
            }
            let file_name = format!("{}.json", update.role);
            let meta = snapshot
                .signed
                .meta
                .get(&file_name)
                .or_else(|| snapshot.signed.meta.get(&update.role))
                .context(error::BadHierarchySnafu {
                    reason: format!("snapshot does not enumerate role '{}'", update.role),
                })?;
            let (sha256, length) = hashes.get(&update.role).expect("hash computed above");
            let actual_hash = meta.hashes.as_ref().map(|h| h.sha256.as_str());
            ensure!(
                actual_hash == Some(sha256.as_str()),
                error::BadHierarchySnafu {
                    reason: format!("snapshot hash for '{}' does not match uploaded content", update.role),
                }
            );
            if let Some(expected_len) = meta.length {
                ensure!(
                    expected_len == *length,
                    error::BadHierarchySnafu {
                        reason: format!("snapshot length for '{}' does not match uploaded content", update.role),
                    }
                );
            }
        }
    }
    if let Some(Parsed::Timestamp(timestamp)) = parsed.get("timestamp") {
        if let Some((sha256, _length)) = hashes.get("snapshot") {
            let meta = timestamp
                .signed
                .meta
                .get("snapshot.json")
                .or_else(|| timestamp.signed.meta.get("snapshot"))
                .context(error::BadHierarchySnafu {
                    reason: "timestamp does not reference the uploaded snapshot".to_string(),
                })?;
            ensure!(
                meta.hashes.sha256 == *sha256,
                error::BadHierarchySnafu {
                    reason: "timestamp's snapshot hash does not match uploaded snapshot".to_string(),
                }
            );
        }
    }

    // Rule 5: strict version monotonicity against currently-stored versions.
    for update in updates {
        if let Some(prev_version) = fetch_current_version(store, gun, &update.role).await? {
            ensure!(
                update.version > prev_version,
                error::OldVersionSnafu {
                    reason: format!(
                        "{} version {} is not greater than current version {}",
                        update.role, update.version, prev_version
                    ),
                }
            );
        }
    }

    // Rule 6: delegation targets must be signed by keys their parent `targets` delegated to them.
    for update in updates {
        let role_type = RoleType::parse(&update.role);
        let RoleType::Delegation(path) = &role_type else {
            continue;
        };
        let Parsed::Targets(child) = parsed.get(&update.role).unwrap() else {
            unreachable!("delegation roles always parse as Targets")
        };
        let parent_type = role_type
            .delegation_parent()
            .expect("delegations always have a parent");
        let parent_name = parent_type.name();

        let parent_targets = match parsed.get(&parent_name) {
            Some(Parsed::Targets(p)) => p.signed.clone(),
            _ => {
                let record = store
                    .get_current(gun, &parent_name)
                    .await
                    .map_err(|_| Error::BadHierarchy {
                        reason: format!("delegation parent '{}' not found", parent_name),
                    })?;
                parse_signed::<Targets>(&record.data)?.signed
            }
        };

        let delegated_role = parent_targets
            .delegated_role(path)
            .context(error::BadHierarchySnafu {
                reason: format!("'{}' is not delegated by '{}'", update.role, parent_name),
            })?;
        let keys: HashMap<String, Key> = parent_targets
            .delegations
            .as_ref()
            .map(|d| {
                d.keys
                    .iter()
                    .filter(|(id, _)| delegated_role.keyids.contains(id))
                    .map(|(id, key)| (id.clone(), key.clone()))
                    .collect()
            })
            .unwrap_or_default();
        ensure!(
            notary_types::sign::meets_threshold(child, &keys, delegated_role.threshold.get()),
            error::InsufficientSignaturesSnafu {
                reason: format!("'{}' lacks its delegated threshold of signatures", update.role),
            }
        );
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::{Duration, Utc};
    use maplit::hashmap;
    use notary_metastore::MemoryMetaStore;
    use notary_types::key::{Algorithm, PrivateKey};
    use notary_types::metadata::{RoleKeys, Signature};
    use std::num::NonZeroU64;

    fn signed_bytes<T: Serialize>(body: T, key: &PrivateKey) -> (Signed<T>, Vec<u8>) {
        let unsigned = Signed {
            signed: body,
            signatures: vec![],
        };
        let message = unsigned.signed_bytes().unwrap();
        let sig = key.sign(&message).unwrap();
        let key_id = key.public_key().key_id().unwrap();
        let signed = Signed {
            signed: unsigned.signed,
            signatures: vec![Signature {
                keyid: key_id,
                sig: HEXLOWER.encode(&sig),
            }],
        };
        let bytes = serde_json::to_vec(&signed).unwrap();
        (signed, bytes)
    }

    #[tokio::test]
    async fn bootstrap_requires_root() {
        let store = MemoryMetaStore::new();
        let (_key, _doc) = PrivateKey::generate(Algorithm::Ed25519).unwrap();
        let targets = Targets {
            spec_version: "1.0.0".to_string(),
            version: NonZeroU64::new(1).unwrap(),
            expires: Utc::now() + Duration::days(1),
            targets: HashMap::new(),
            delegations: None,
        };
        let (_, bytes) = signed_bytes(targets, &_key);
        let updates = vec![MetaUpdate {
            role: "targets".to_string(),
            version: 1,
            data: bytes,
        }];
        let result = validate_batch(&store, "g", &updates).await;
        assert!(matches!(result, Err(Error::BadHierarchy { .. })));
    }

    #[tokio::test]
    async fn accepts_well_formed_bootstrap() {
        let store = MemoryMetaStore::new();
        let (root_key, _doc) = PrivateKey::generate(Algorithm::Ed25519).unwrap();
        let public = root_key.public_key();
        let key_id = public.key_id().unwrap();

        let root = Root {
            spec_version: "1.0.0".to_string(),
            consistent_snapshot: true,
            version: NonZeroU64::new(1).unwrap(),
            expires: Utc::now() + Duration::days(365),
            keys: hashmap! { key_id.clone() => public },
            roles: hashmap! {
                RoleType::Root => RoleKeys{ keyids: vec![key_id.clone()], threshold: NonZeroU64::new(1).unwrap() },
                RoleType::Targets => RoleKeys{ keyids: vec![key_id.clone()], threshold: NonZeroU64::new(1).unwrap() },
                RoleType::Snapshot => RoleKeys{ keyids: vec![key_id.clone()], threshold: NonZeroU64::new(1).unwrap() },
                RoleType::Timestamp => RoleKeys{ keyids: vec![key_id.clone()], threshold: NonZeroU64::new(1).unwrap() },
            },
        };
        let (_, root_bytes) = signed_bytes(root, &root_key);

        let targets = Targets {
            spec_version: "1.0.0".to_string(),
            version: NonZeroU64::new(1).unwrap(),
            expires: Utc::now() + Duration::days(1),
            targets: HashMap::new(),
            delegations: None,
        };
        let (_, targets_bytes) = signed_bytes(targets, &root_key);
        let targets_hash = HEXLOWER.encode(&Sha256::digest(&targets_bytes));

        let snapshot = Snapshot {
            spec_version: "1.0.0".to_string(),
            version: NonZeroU64::new(1).unwrap(),
            expires: Utc::now() + Duration::days(1),
            meta: hashmap! {
                "targets.json".to_string() => notary_types::metadata::SnapshotMeta {
                    length: Some(targets_bytes.len() as u64),
                    hashes: Some(notary_types::metadata::Hashes{sha256: targets_hash.clone()}),
                    version: NonZeroU64::new(1).unwrap(),
                },
                "root.json".to_string() => notary_types::metadata::SnapshotMeta {
                    length: Some(root_bytes.len() as u64),
                    hashes: Some(notary_types::metadata::Hashes{sha256: HEXLOWER.encode(&Sha256::digest(&root_bytes))}),
                    version: NonZeroU64::new(1).unwrap(),
                },
            },
        };
        let (_, snapshot_bytes) = signed_bytes(snapshot, &root_key);
        let snapshot_hash = HEXLOWER.encode(&Sha256::digest(&snapshot_bytes));

        let timestamp = Timestamp {
            spec_version: "1.0.0".to_string(),
            version: NonZeroU64::new(1).unwrap(),
            expires: Utc::now() + Duration::days(1),
            meta: hashmap! {
                "snapshot.json".to_string() => notary_types::metadata::TimestampMeta {
                    length: Some(snapshot_bytes.len() as u64),
                    hashes: notary_types::metadata::Hashes{sha256: snapshot_hash},
                    version: NonZeroU64::new(1).unwrap(),
                },
            },
        };
        let (_, timestamp_bytes) = signed_bytes(timestamp, &root_key);

        let updates = vec![
            MetaUpdate { role: "root".to_string(), version: 1, data: root_bytes },
            MetaUpdate { role: "targets".to_string(), version: 1, data: targets_bytes },
            MetaUpdate { role: "snapshot".to_string(), version: 1, data: snapshot_bytes },
            MetaUpdate { role: "timestamp".to_string(), version: 1, data: timestamp_bytes },
        ];

        validate_batch(&store, "g", &updates).await.unwrap();
    }
}
