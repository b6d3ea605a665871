use crate::error::{self, Result};
use crate::record::{Category, ChangeRecord, MetaRecord, MetaUpdate};
use crate::store::MetaStore;
use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use snafu::ensure;
use std::collections::HashMap;
use tokio::sync::RwLock;

struct State {
    // keyed by (gun, role); each Vec is kept sorted ascending by version.
    records: HashMap<(String, String), Vec<MetaRecord>>,
    changes: Vec<ChangeRecord>,
    next_change_id: i64,
}

impl Default for State {
    fn default() -> Self {
        State {
            records: HashMap::new(),
            changes: Vec::new(),
            next_change_id: 1,
        }
    }
}

impl State {
    fn max_version(&self, gun: &str, role: &str) -> Option<u64> {
        self.records
            .get(&(gun.to_string(), role.to_string()))
            .and_then(|v| v.last())
            .map(|r| r.version)
    }

    fn insert(&mut self, gun: &str, role: &str, record: MetaRecord) {
        self.records
            .entry((gun.to_string(), role.to_string()))
            .or_default()
            .push(record);
    }

    fn append_change(&mut self, gun: &str, version: u64, sha256: String, category: Category) {
        let id = self.next_change_id;
        self.next_change_id += 1;
        self.changes.push(ChangeRecord {
            id,
            gun: gun.to_string(),
            version,
            sha256,
            category,
            created_at: Utc::now(),
        });
    }
}

/// Single coarse-lock in-memory `MetaStore`, for development and tests. Not suitable for
/// production: there is no durability and contention is global, not per-GUN.
#[derive(Default)]
pub struct MemoryMetaStore {
    state: RwLock<State>,
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sha256_hex(data: &[u8]) -> String {
    data_encoding::HEXLOWER.encode(&Sha256::digest(data))
}

#[async_trait]
impl MetaStore for MemoryMetaStore {
    async fn update_current(&self, gun: &str, update: MetaUpdate) -> Result<()> {
        self.update_many(gun, vec![update]).await
    }

    async fn update_many(&self, gun: &str, updates: Vec<MetaUpdate>) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for u in &updates {
            ensure!(
                seen.insert((u.role.clone(), u.version)),
                error::DuplicateInBatchSnafu
            );
        }

        let mut state = self.state.write().await;
        for u in &updates {
            if let Some(max) = state.max_version(gun, &u.role) {
                ensure!(
                    u.version > max,
                    error::OldVersionSnafu {
                        gun: gun.to_string(),
                        role: u.role.clone(),
                        version: u.version,
                    }
                );
            }
        }

        let mut timestamp_update: Option<(&MetaUpdate, String)> = None;
        for u in &updates {
            let sha256 = sha256_hex(&u.data);
            if u.role == "timestamp" {
                timestamp_update = Some((u, sha256.clone()));
            }
            state.insert(
                gun,
                &u.role,
                MetaRecord {
                    gun: gun.to_string(),
                    role: u.role.clone(),
                    version: u.version,
                    sha256,
                    data: u.data.clone(),
                    created_at: Utc::now(),
                },
            );
        }
        if let Some((u, sha256)) = timestamp_update {
            state.append_change(gun, u.version, sha256, Category::Update);
        }
        Ok(())
    }

    async fn get_current(&self, gun: &str, role: &str) -> Result<MetaRecord> {
        let state = self.state.read().await;
        state
            .records
            .get(&(gun.to_string(), role.to_string()))
            .and_then(|v| v.last())
            .cloned()
            .ok_or_else(|| error::Error::NotFound {
                gun: gun.to_string(),
                role: role.to_string(),
            })
    }

    async fn get_checksum(&self, gun: &str, role: &str, sha256: &str) -> Result<MetaRecord> {
        let state = self.state.read().await;
        state
            .records
            .get(&(gun.to_string(), role.to_string()))
            .and_then(|v| v.iter().find(|r| r.sha256 == sha256))
            .cloned()
            .ok_or_else(|| error::Error::NotFound {
                gun: gun.to_string(),
                role: role.to_string(),
            })
    }

    async fn get_version(&self, gun: &str, role: &str, version: u64) -> Result<MetaRecord> {
        let state = self.state.read().await;
        state
            .records
            .get(&(gun.to_string(), role.to_string()))
            .and_then(|v| v.iter().find(|r| r.version == version))
            .cloned()
            .ok_or_else(|| error::Error::NotFound {
                gun: gun.to_string(),
                role: role.to_string(),
            })
    }

    async fn delete(&self, gun: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let keys: Vec<(String, String)> = state
            .records
            .keys()
            .filter(|(g, _)| g == gun)
            .cloned()
            .collect();
        if keys.is_empty() {
            return Ok(());
        }
        for key in keys {
            state.records.remove(&key);
        }
        state.append_change(gun, 0, String::new(), Category::Deletion);
        Ok(())
    }

    async fn get_changes(
        &self,
        since_id: i64,
        page_size: u32,
        gun_filter: Option<&str>,
        reversed: bool,
    ) -> Result<Vec<ChangeRecord>> {
        let state = self.state.read().await;
        let all: Vec<&ChangeRecord> = state
            .changes
            .iter()
            .filter(|c| gun_filter.map(|g| c.gun == g).unwrap_or(true))
            .collect();

        let page_size = page_size as usize;
        let forced_reversed = since_id < 0 || reversed;

        let mut selected: Vec<ChangeRecord> = if !forced_reversed {
            all.into_iter()
                .filter(|c| c.id > since_id)
                .take(page_size)
                .cloned()
                .collect()
        } else if since_id < 0 {
            let mut tail: Vec<&ChangeRecord> = all;
            if tail.len() > page_size {
                tail = tail.split_off(tail.len() - page_size);
            }
            tail.into_iter().cloned().collect()
        } else {
            let mut before: Vec<&ChangeRecord> =
                all.into_iter().filter(|c| c.id < since_id).collect();
            before.reverse(); // descending by id
            before.truncate(page_size);
            before.reverse(); // back to ascending for the returned page
            before.into_iter().cloned().collect()
        };

        selected.sort_by_key(|c| c.id);
        Ok(selected)
    }

    async fn check_health(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn update(role: &str, version: u64, payload: &[u8]) -> MetaUpdate {
        MetaUpdate {
            role: role.to_string(),
            version,
            data: payload.to_vec(),
        }
    }

    #[tokio::test]
    async fn rejects_old_version() {
        let store = MemoryMetaStore::new();
        store
            .update_current("g", update("targets", 1, b"v1"))
            .await
            .unwrap();
        let err = store
            .update_current("g", update("targets", 1, b"v1-again"))
            .await
            .unwrap_err();
        assert!(matches!(err, error::Error::OldVersion { .. }));
    }

    #[tokio::test]
    async fn update_many_is_all_or_nothing() {
        let store = MemoryMetaStore::new();
        store
            .update_current("g", update("targets", 1, b"v1"))
            .await
            .unwrap();
        let err = store
            .update_many(
                "g",
                vec![update("snapshot", 1, b"s1"), update("targets", 1, b"dup")],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, error::Error::OldVersion { .. }));
        assert!(store.get_current("g", "snapshot").await.is_err());
    }

    #[tokio::test]
    async fn timestamp_publish_appends_one_change() {
        let store = MemoryMetaStore::new();
        store
            .update_many(
                "g",
                vec![update("targets", 1, b"t1"), update("timestamp", 1, b"ts1")],
            )
            .await
            .unwrap();
        let changes = store.get_changes(0, 10, None, false).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].category, Category::Update);
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_emits_one_change() {
        let store = MemoryMetaStore::new();
        store
            .update_current("g", update("timestamp", 1, b"ts1"))
            .await
            .unwrap();
        store.delete("g").await.unwrap();
        store.delete("g").await.unwrap();
        let changes = store.get_changes(0, 10, None, false).await.unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[1].category, Category::Deletion);
    }

    #[tokio::test]
    async fn changes_boundary_behaviors() {
        let store = MemoryMetaStore::new();
        for v in 1..=5u64 {
            store
                .update_current("g", update("timestamp", v, format!("ts{v}").as_bytes()))
                .await
                .unwrap();
        }
        let earliest = store.get_changes(0, 2, None, false).await.unwrap();
        assert_eq!(earliest.iter().map(|c| c.version).collect::<Vec<_>>(), [1, 2]);

        let latest = store.get_changes(-1, 2, None, false).await.unwrap();
        assert_eq!(latest.iter().map(|c| c.version).collect::<Vec<_>>(), [4, 5]);

        let beyond = store.get_changes(5, 10, None, false).await.unwrap();
        assert_eq!(beyond.len(), 0);
    }
}
