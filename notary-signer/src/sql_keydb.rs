use crate::error::{self, Result};
use crate::jwe;
use crate::keydb::{KeyDBStore, ENCRYPTION_ALG, KEYWRAP_ALG};
use crate::passphrase::PassphraseRetriever;
use async_trait::async_trait;
use chrono::Utc;
use notary_types::key::{Algorithm, Key, PrivateKey};
use snafu::ResultExt;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::sync::Arc;

/// Postgres-backed `KeyDBStore` against the `private_keys` table.
pub struct SqlKeyStore {
    pool: PgPool,
    retriever: Arc<dyn PassphraseRetriever>,
}

impl SqlKeyStore {
    pub async fn connect(database_url: &str, retriever: Arc<dyn PassphraseRetriever>) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await
            .context(error::BackendSnafu { op: "connect" })?;
        Ok(SqlKeyStore { pool, retriever })
    }
}

#[async_trait]
impl KeyDBStore for SqlKeyStore {
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
        let passphrase = self.retriever.get(passphrase_alias)?;
        let private = jwe::encrypt(&passphrase, document)?;

        let result = sqlx::query(
            "INSERT INTO private_keys \
             (key_id, encryption_alg, keywrap_alg, algorithm, passphrase_alias, gun, role, public, private, last_used) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NULL)",
        )
        .bind(&key_id)
        .bind(ENCRYPTION_ALG)
        .bind(KEYWRAP_ALG)
        .bind(algorithm.as_str())
        .bind(passphrase_alias)
        .bind(gun)
        .bind(role)
        .bind(public.public_bytes()?)
        .bind(&private)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(key_id),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                error::KeyExistsSnafu { key_id }.fail()
            }
            Err(e) => Err(e).context(error::BackendSnafu { op: "insert key" }),
        }
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
        let (_handle, doc) = PrivateKey::generate(algorithm)?;
        self.add_key(role, gun, algorithm, &doc, passphrase_alias)
            .await?;
        let (_alg, public_bytes) = {
            let handle = PrivateKey::from_document(algorithm, &doc)?;
            (algorithm, handle.public_key().public_bytes()?)
        };
        Ok(Key::new(algorithm, public_bytes))
    }

    async fn get_pending_key(&self, role: &str, gun: Option<&str>) -> Result<Key> {
        let row = sqlx::query(
            "SELECT algorithm, public FROM private_keys \
             WHERE role = $1 AND ($2::text IS NULL AND gun IS NULL OR gun = $2) \
               AND last_used IS NULL \
             ORDER BY id DESC LIMIT 1",
        )
        .bind(role)
        .bind(gun)
        .fetch_optional(&self.pool)
        .await
        .context(error::BackendSnafu { op: "get_pending_key" })?;

        let row = row.ok_or_else(|| error::Error::NoKey {
            role: role.to_string(),
            gun: gun.map(|g| g.to_string()),
        })?;
        let algorithm: String = row.get("algorithm");
        let public: Vec<u8> = row.get("public");
        let algorithm: Algorithm = algorithm.parse()?;
        Ok(Key::new(algorithm, public))
    }

    async fn get_key_info(&self, key_id: &str) -> Result<(Algorithm, Vec<u8>)> {
        let row = sqlx::query("SELECT algorithm, public FROM private_keys WHERE key_id = $1")
            .bind(key_id)
            .fetch_optional(&self.pool)
            .await
            .context(error::BackendSnafu { op: "get_key_info" })?
            .ok_or_else(|| error::Error::KeyNotFound {
                key_id: key_id.to_string(),
            })?;
        let algorithm: String = row.get("algorithm");
        let public: Vec<u8> = row.get("public");
        Ok((algorithm.parse()?, public))
    }

    async fn sign(&self, key_id: &str, payload: &[u8]) -> Result<(Vec<u8>, Algorithm)> {
        let row = sqlx::query(
            "SELECT algorithm, passphrase_alias, private FROM private_keys WHERE key_id = $1",
        )
        .bind(key_id)
        .fetch_optional(&self.pool)
        .await
        .context(error::BackendSnafu { op: "sign lookup" })?
        .ok_or_else(|| error::Error::KeyNotFound {
            key_id: key_id.to_string(),
        })?;

        let algorithm: String = row.get("algorithm");
        let algorithm: Algorithm = algorithm.parse()?;
        let passphrase_alias: String = row.get("passphrase_alias");
        let private: String = row.get("private");

        let passphrase = self.retriever.get(&passphrase_alias)?;
        let doc = jwe::decrypt(&passphrase, &private)?;
        let handle = PrivateKey::from_document(algorithm, &doc)?;
        let signature = handle.sign(payload)?;

        sqlx::query("UPDATE private_keys SET last_used = $1 WHERE key_id = $2")
            .bind(Utc::now())
            .bind(key_id)
            .execute(&self.pool)
            .await
            .context(error::BackendSnafu { op: "mark active" })?;

        Ok((signature, algorithm))
    }

    async fn rotate_key_passphrase(&self, key_id: &str, new_alias: &str) -> Result<()> {
        let row = sqlx::query(
            "SELECT passphrase_alias, private FROM private_keys WHERE key_id = $1",
        )
        .bind(key_id)
        .fetch_optional(&self.pool)
        .await
        .context(error::BackendSnafu { op: "rotate lookup" })?
        .ok_or_else(|| error::Error::KeyNotFound {
            key_id: key_id.to_string(),
        })?;
        let old_alias: String = row.get("passphrase_alias");
        let private: String = row.get("private");

        let old_passphrase = self.retriever.get(&old_alias)?;
        let doc = jwe::decrypt(&old_passphrase, &private)?;
        let new_passphrase = self.retriever.get(new_alias)?;
        let new_ciphertext = jwe::encrypt(&new_passphrase, &doc)?;

        // The UPDATE only lands once the new ciphertext is fully computed; the row still holds
        // the old one until this statement commits.
        sqlx::query(
            "UPDATE private_keys SET private = $1, passphrase_alias = $2 WHERE key_id = $3",
        )
        .bind(&new_ciphertext)
        .bind(new_alias)
        .bind(key_id)
        .execute(&self.pool)
        .await
        .context(error::BackendSnafu { op: "rotate commit" })?;
        Ok(())
    }

    async fn remove_key(&self, key_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM private_keys WHERE key_id = $1")
            .bind(key_id)
            .execute(&self.pool)
            .await
            .context(error::BackendSnafu { op: "remove_key" })?;
        Ok(())
    }

    async fn check_health(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context(error::BackendSnafu { op: "check_health" })?;
        Ok(())
    }
}
