use crate::error::{self, Result};
use crate::jwe;
use crate::keydb::{encrypt_row, KeyDBStore, KeyRow};
use crate::passphrase::PassphraseRetriever;
use async_trait::async_trait;
use chrono::Utc;
use notary_types::key::{Algorithm, Key, PrivateKey};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Coarse-lock in-memory `KeyDBStore`, for development and tests.
pub struct MemoryKeyStore {
    rows: RwLock<Vec<KeyRow>>,
    retriever: Arc<dyn PassphraseRetriever>,
}

impl MemoryKeyStore {
    pub fn new(retriever: Arc<dyn PassphraseRetriever>) -> Self {
        MemoryKeyStore {
            rows: RwLock::new(Vec::new()),
            retriever,
        }
    }
}

#[async_trait]
impl KeyDBStore for MemoryKeyStore {
    async fn add_key(
        &self,
        role: &str,
        gun: Option<&str>,
        algorithm: Algorithm,
        document: &[u8],
        passphrase_alias: &str,
    ) -> Result<String> {
        let handle = PrivateKey::from_document(algorithm, document)?;
        let public = handle.public_key();
        let key_id = public.key_id()?;

        let mut rows = self.rows.write().await;
        if rows.iter().any(|r| r.key_id == key_id) {
            return error::KeyExistsSnafu { key_id }.fail();
        }
        let row = encrypt_row(
            self.retriever.as_ref(),
            role,
            gun,
            algorithm,
            public,
            document,
            key_id.clone(),
            passphrase_alias,
        )?;
        rows.push(row);
        Ok(key_id)
    }

    async fn create(
        &self,
        role: &str,
        gun: Option<&str>,
        algorithm: Algorithm,
        passphrase_alias: &str,
    ) -> Result<Key> {
        if let Ok(pending) = self.get_pending_key(role, gun).await {
            if pending.algorithm == algorithm {
                return Ok(pending);
            }
        }

        let (private, doc) = PrivateKey::generate(algorithm)?;
        let public = private.public_key();
        let key_id = public.key_id()?;

        let mut rows = self.rows.write().await;
        if rows.iter().any(|r| r.key_id == key_id) {
            return error::KeyExistsSnafu { key_id }.fail();
        }
        let row = encrypt_row(
            self.retriever.as_ref(),
            role,
            gun,
            algorithm,
            public.clone(),
            &doc,
            key_id,
            passphrase_alias,
        )?;
        rows.push(row);
        Ok(public)
    }

    async fn get_pending_key(&self, role: &str, gun: Option<&str>) -> Result<Key> {
        let rows = self.rows.read().await;
        rows.iter()
            .filter(|r| r.role == role && r.gun.as_deref() == gun && r.last_used.is_none())
            .max_by_key(|r| r.key_id.clone())
            .map(|r| r.public.clone())
            .ok_or_else(|| error::Error::NoKey {
                role: role.to_string(),
                gun: gun.map(|g| g.to_string()),
            })
    }

    async fn get_key_info(&self, key_id: &str) -> Result<(Algorithm, Vec<u8>)> {
        let rows = self.rows.read().await;
        let row = rows
            .iter()
            .find(|r| r.key_id == key_id)
            .ok_or_else(|| error::Error::KeyNotFound {
                key_id: key_id.to_string(),
            })?;
        Ok((row.algorithm, row.public.public_bytes()?))
    }

    async fn sign(&self, key_id: &str, payload: &[u8]) -> Result<(Vec<u8>, Algorithm)> {
        let (passphrase, private, algorithm) = {
            let rows = self.rows.read().await;
            let row = rows
                .iter()
                .find(|r| r.key_id == key_id)
                .ok_or_else(|| error::Error::KeyNotFound {
                    key_id: key_id.to_string(),
                })?;
            let passphrase = self.retriever.get(&row.passphrase_alias)?;
            (passphrase, row.private.clone(), row.algorithm)
        };

        let doc = jwe::decrypt(&passphrase, &private)?;
        let handle = PrivateKey::from_document(algorithm, &doc)?;
        let signature = handle.sign(payload)?;

        let mut rows = self.rows.write().await;
        if let Some(row) = rows.iter_mut().find(|r| r.key_id == key_id) {
            row.last_used = Some(Utc::now());
        }
        Ok((signature, algorithm))
    }

    async fn rotate_key_passphrase(&self, key_id: &str, new_alias: &str) -> Result<()> {
        let mut rows = self.rows.write().await;
        let row = rows
            .iter_mut()
            .find(|r| r.key_id == key_id)
            .ok_or_else(|| error::Error::KeyNotFound {
                key_id: key_id.to_string(),
            })?;

        let old_passphrase = self.retriever.get(&row.passphrase_alias)?;
        let doc = jwe::decrypt(&old_passphrase, &row.private)?;
        let new_passphrase = self.retriever.get(new_alias)?;
        let new_ciphertext = jwe::encrypt(&new_passphrase, &doc)?;

        // Old ciphertext stays addressable in `row.private` until this assignment completes.
        row.private = new_ciphertext;
        row.passphrase_alias = new_alias.to_string();
        Ok(())
    }

    async fn remove_key(&self, key_id: &str) -> Result<()> {
        let mut rows = self.rows.write().await;
        rows.retain(|r| r.key_id != key_id);
        Ok(())
    }

    async fn check_health(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::passphrase::PassphraseRetriever;

    struct FixedPassphraseRetriever;
    impl PassphraseRetriever for FixedPassphraseRetriever {
        fn get(&self, _alias: &str) -> Result<Vec<u8>> {
            Ok(b"correct horse battery staple".to_vec())
        }
        fn default_alias(&self) -> Result<String> {
            Ok("default".to_string())
        }
    }

    fn store() -> MemoryKeyStore {
        MemoryKeyStore::new(Arc::new(FixedPassphraseRetriever))
    }

    #[tokio::test]
    async fn create_then_sign_activates_key() {
        let store = store();
        let public = store
            .create("timestamp", Some("g"), Algorithm::Ed25519, "default")
            .await
            .unwrap();
        let key_id = public.key_id().unwrap();

        // pending before first sign
        let pending = store.get_pending_key("timestamp", Some("g")).await.unwrap();
        assert_eq!(pending.key_id().unwrap(), key_id);

        let (sig, _alg) = store.sign(&key_id, b"payload").await.unwrap();
        assert!(public.verify(b"payload", &sig));

        // no longer pending after activation
        assert!(store.get_pending_key("timestamp", Some("g")).await.is_err());
    }

    #[tokio::test]
    async fn create_reuses_pending_key() {
        let store = store();
        let first = store
            .create("snapshot", Some("g"), Algorithm::Ed25519, "default")
            .await
            .unwrap();
        let second = store
            .create("snapshot", Some("g"), Algorithm::Ed25519, "default")
            .await
            .unwrap();
        assert_eq!(first.key_id().unwrap(), second.key_id().unwrap());
    }

    #[tokio::test]
    async fn rotate_passphrase_then_sign_still_verifies() {
        let store = store();
        let public = store
            .create("timestamp", None, Algorithm::Ed25519, "default")
            .await
            .unwrap();
        let key_id = public.key_id().unwrap();
        store
            .rotate_key_passphrase(&key_id, "secondary")
            .await
            .unwrap();
        let (sig, _) = store.sign(&key_id, b"hello").await.unwrap();
        assert!(public.verify(b"hello", &sig));
    }

    #[tokio::test]
    async fn add_key_rejects_duplicate() {
        let store = store();
        let (handle, doc) = PrivateKey::generate(Algorithm::Ed25519).unwrap();
        let key_id = handle.public_key().key_id().unwrap();
        store
            .add_key("timestamp", Some("g"), Algorithm::Ed25519, &doc, "default")
            .await
            .unwrap();
        let err = store
            .add_key("timestamp", Some("g"), Algorithm::Ed25519, &doc, "default")
            .await
            .unwrap_err();
        assert!(matches!(err, error::Error::KeyExists { key_id: ref k } if *k == key_id));
    }

    #[tokio::test]
    async fn remove_key_is_idempotent() {
        let store = store();
        let public = store
            .create("timestamp", None, Algorithm::Ed25519, "default")
            .await
            .unwrap();
        let key_id = public.key_id().unwrap();
        store.remove_key(&key_id).await.unwrap();
        store.remove_key(&key_id).await.unwrap();
        assert!(store.sign(&key_id, b"x").await.is_err());
    }
}
