use crate::error::{self, Result};
use crate::record::{Category, ChangeRecord, MetaRecord, MetaUpdate};
use crate::store::MetaStore;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use snafu::{ensure, ResultExt};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::collections::HashSet;

/// Postgres-backed `MetaStore`. Schema is the `tuf_files`/`changefeed` pair documented in
/// `schema.sql`; the unique `(gun, role, version)` index on `tuf_files` is what turns a
/// concurrent conflicting write into the `OldVersion` this trait promises.
pub struct SqlMetaStore {
    pool: PgPool,
}

impl SqlMetaStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await
            .context(error::BackendSnafu { op: "connect" })?;
        Ok(SqlMetaStore { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        SqlMetaStore { pool }
    }
}

fn sha256_hex(data: &[u8]) -> String {
    data_encoding::HEXLOWER.encode(&Sha256::digest(data))
}

fn row_to_record(row: &sqlx::postgres::PgRow) -> MetaRecord {
    MetaRecord {
        gun: row.get("gun"),
        role: row.get("role"),
        version: row.get::<i64, _>("version") as u64,
        sha256: row.get("sha256"),
        data: row.get("data"),
        created_at: row.get("created_at"),
    }
}

fn row_to_change(row: &sqlx::postgres::PgRow) -> ChangeRecord {
    let category: String = row.get("category");
    ChangeRecord {
        id: row.get("id"),
        gun: row.get("gun"),
        version: row.get::<i64, _>("version") as u64,
        sha256: row.get("sha256"),
        category: if category == "deletion" {
            Category::Deletion
        } else {
            Category::Update
        },
        created_at: row.get("created_at"),
    }
}

#[async_trait]
impl MetaStore for SqlMetaStore {
    async fn update_current(&self, gun: &str, update: MetaUpdate) -> Result<()> {
        self.update_many(gun, vec![update]).await
    }

    async fn update_many(&self, gun: &str, updates: Vec<MetaUpdate>) -> Result<()> {
        let mut seen = HashSet::new();
        for u in &updates {
            ensure!(
                seen.insert((u.role.clone(), u.version)),
                error::DuplicateInBatchSnafu
            );
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .context(error::BackendSnafu { op: "begin" })?;

        for u in &updates {
            let max_version: Option<i64> = sqlx::query_scalar(
                "SELECT max(version) FROM tuf_files WHERE gun = $1 AND role = $2",
            )
            .bind(gun)
            .bind(&u.role)
            .fetch_one(&mut *tx)
            .await
            .context(error::BackendSnafu {
                op: "select max version",
            })?;
            if let Some(max) = max_version {
                ensure!(
                    u.version as i64 > max,
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
            let result = sqlx::query(
                "INSERT INTO tuf_files (gun, role, version, sha256, data, created_at) \
                 VALUES ($1, $2, $3, $4, $5, now())",
            )
            .bind(gun)
            .bind(&u.role)
            .bind(u.version as i64)
            .bind(&sha256)
            .bind(&u.data)
            .execute(&mut *tx)
            .await;
            match result {
                Ok(_) => {}
                Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                    return error::OldVersionSnafu {
                        gun: gun.to_string(),
                        role: u.role.clone(),
                        version: u.version,
                    }
                    .fail();
                }
                Err(e) => return Err(e).context(error::BackendSnafu { op: "insert" }),
            }
        }

        if let Some((u, sha256)) = timestamp_update {
            sqlx::query(
                "INSERT INTO changefeed (gun, version, sha256, category, created_at) \
                 VALUES ($1, $2, $3, 'update', now())",
            )
            .bind(gun)
            .bind(u.version as i64)
            .bind(&sha256)
            .execute(&mut *tx)
            .await
            .context(error::BackendSnafu { op: "append change" })?;
        }

        tx.commit()
            .await
            .context(error::BackendSnafu { op: "commit" })?;
        Ok(())
    }

    async fn get_current(&self, gun: &str, role: &str) -> Result<MetaRecord> {
        let row = sqlx::query(
            "SELECT gun, role, version, sha256, data, created_at FROM tuf_files \
             WHERE gun = $1 AND role = $2 ORDER BY version DESC LIMIT 1",
        )
        .bind(gun)
        .bind(role)
        .fetch_optional(&self.pool)
        .await
        .context(error::BackendSnafu { op: "get_current" })?;
        row.map(|r| row_to_record(&r)).ok_or_else(|| error::Error::NotFound {
            gun: gun.to_string(),
            role: role.to_string(),
        })
    }

    async fn get_checksum(&self, gun: &str, role: &str, sha256: &str) -> Result<MetaRecord> {
        let row = sqlx::query(
            "SELECT gun, role, version, sha256, data, created_at FROM tuf_files \
             WHERE gun = $1 AND role = $2 AND sha256 = $3",
        )
        .bind(gun)
        .bind(role)
        .bind(sha256)
        .fetch_optional(&self.pool)
        .await
        .context(error::BackendSnafu { op: "get_checksum" })?;
        row.map(|r| row_to_record(&r)).ok_or_else(|| error::Error::NotFound {
            gun: gun.to_string(),
            role: role.to_string(),
        })
    }

    async fn get_version(&self, gun: &str, role: &str, version: u64) -> Result<MetaRecord> {
        let row = sqlx::query(
            "SELECT gun, role, version, sha256, data, created_at FROM tuf_files \
             WHERE gun = $1 AND role = $2 AND version = $3",
        )
        .bind(gun)
        .bind(role)
        .bind(version as i64)
        .fetch_optional(&self.pool)
        .await
        .context(error::BackendSnafu { op: "get_version" })?;
        row.map(|r| row_to_record(&r)).ok_or_else(|| error::Error::NotFound {
            gun: gun.to_string(),
            role: role.to_string(),
        })
    }

    async fn delete(&self, gun: &str) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context(error::BackendSnafu { op: "begin" })?;
        let result = sqlx::query("DELETE FROM tuf_files WHERE gun = $1")
            .bind(gun)
            .execute(&mut *tx)
            .await
            .context(error::BackendSnafu { op: "delete" })?;
        if result.rows_affected() > 0 {
            sqlx::query(
                "INSERT INTO changefeed (gun, version, sha256, category, created_at) \
                 VALUES ($1, 0, '', 'deletion', now())",
            )
            .bind(gun)
            .execute(&mut *tx)
            .await
            .context(error::BackendSnafu {
                op: "append deletion change",
            })?;
        }
        tx.commit()
            .await
            .context(error::BackendSnafu { op: "commit" })?;
        Ok(())
    }

    async fn get_changes(
        &self,
        since_id: i64,
        page_size: u32,
        gun_filter: Option<&str>,
        reversed: bool,
    ) -> Result<Vec<ChangeRecord>> {
        let page_size = page_size as i64;
        let forced_reversed = since_id < 0 || reversed;

        let rows = if !forced_reversed {
            sqlx::query(
                "SELECT id, gun, version, sha256, category, created_at FROM changefeed \
                 WHERE id > $1 AND ($2::text IS NULL OR gun = $2) \
                 ORDER BY id ASC LIMIT $3",
            )
            .bind(since_id)
            .bind(gun_filter)
            .bind(page_size)
            .fetch_all(&self.pool)
            .await
        } else if since_id < 0 {
            sqlx::query(
                "SELECT id, gun, version, sha256, category, created_at FROM ( \
                   SELECT id, gun, version, sha256, category, created_at FROM changefeed \
                   WHERE ($1::text IS NULL OR gun = $1) \
                   ORDER BY id DESC LIMIT $2 \
                 ) recent ORDER BY id ASC",
            )
            .bind(gun_filter)
            .bind(page_size)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query(
                "SELECT id, gun, version, sha256, category, created_at FROM ( \
                   SELECT id, gun, version, sha256, category, created_at FROM changefeed \
                   WHERE id < $1 AND ($2::text IS NULL OR gun = $2) \
                   ORDER BY id DESC LIMIT $3 \
                 ) page ORDER BY id ASC",
            )
            .bind(since_id)
            .bind(gun_filter)
            .bind(page_size)
            .fetch_all(&self.pool)
            .await
        }
        .context(error::BackendSnafu { op: "get_changes" })?;

        Ok(rows.iter().map(row_to_change).collect())
    }

    async fn check_health(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context(error::BackendSnafu { op: "check_health" })?;
        Ok(())
    }
}
