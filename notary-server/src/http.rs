//! The HTTP surface: multipart upload, role-file reads (current, exact version, exact
//! checksum), gun deletion, server-held key read/rotation, and the change feed. Routed the way
//! the in-process configuration API is, with a `SharedData` handle injected via `web::Data` and
//! one `App::new()...service(web::scope(...))` tree per concern.

use crate::auth::AuthGate;
use crate::config::{CachingConfig, Config};
use crate::error::{self, Error, Result};
use crate::freshness::Freshness;
use crate::signer_client::Signer;
use crate::validator;
use actix_multipart::Multipart;
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use futures_util::TryStreamExt;
use log::info;
use notary_metastore::{MetaStore, MetaUpdate};
use notary_types::key::Algorithm;
use notary_types::metadata::{Root, Signed};
use notary_types::RoleType;
use std::sync::Arc;

/// Everything a handler needs that doesn't come from the request itself: the consistent-read
/// wrapper, the raw store (for writes and exact lookups), the freshness engine, the auth gate,
/// and the cache TTL config.
pub struct SharedData {
    pub store: Arc<dyn MetaStore>,
    pub tuf: notary_metastore::TUFMetaStorage<dyn MetaStore>,
    pub freshness: Freshness<dyn MetaStore>,
    pub signer: Arc<dyn Signer>,
    pub auth: AuthGate,
    pub caching: CachingConfig,
}

impl SharedData {
    pub fn new(store: Arc<dyn MetaStore>, signer: Arc<dyn Signer>, auth: AuthGate, caching: CachingConfig) -> Self {
        SharedData {
            tuf: notary_metastore::TUFMetaStorage::new(store.clone()),
            freshness: Freshness::new(store.clone(), signer.clone()),
            store,
            signer,
            auth,
            caching,
        }
    }
}

fn authorize(data: &SharedData, req: &HttpRequest, gun: &str, action: &str) -> Result<Option<String>> {
    let header = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok());
    data.auth.authorize(header, gun, action)
}

/// Builds and runs the HTTP server described by `config` against `shared_data` until it's
/// stopped or fails to bind.
pub async fn serve(config: &Config, shared_data: web::Data<SharedData>) -> std::io::Result<()> {
    let http_addr = config.server.http_addr.clone();
    HttpServer::new(move || {
        App::new()
            .app_data(shared_data.clone())
            .service(
                web::resource("/_trust/changefeed").route(web::get().to(get_changefeed)),
            )
            .service(
                web::scope("/v2/{gun}/_trust/tuf")
                    .route("", web::post().to(upload))
                    .route("", web::delete().to(delete_gun))
                    .route("/{tail:.*}\\.key", web::get().to(get_key))
                    .route("/{tail:.*}\\.key", web::post().to(rotate_key))
                    .route("/{tail:.*}\\.json", web::get().to(get_role_file)),
            )
    })
    .bind(&http_addr)?
    .run()
    .await
}

// Upload

async fn upload(
    path: web::Path<String>,
    req: HttpRequest,
    data: web::Data<SharedData>,
    mut payload: Multipart,
) -> Result<HttpResponse> {
    let gun = path.into_inner();
    let sub = authorize(&data, &req, &gun, "push")?;
    info!("push authorized for gun '{}' by '{}'", gun, sub.as_deref().unwrap_or("anonymous"));

    let mut updates = Vec::new();
    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| Error::MalformedUpload { reason: e.to_string() })?
    {
        let role = field
            .content_disposition()
            .and_then(|cd| cd.get_name().map(str::to_string))
            .ok_or_else(|| Error::MalformedUpload {
                reason: "multipart field is missing a form-field name".to_string(),
            })?;

        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|e| Error::MalformedUpload { reason: e.to_string() })?
        {
            bytes.extend_from_slice(&chunk);
        }
        let version = extract_version(&bytes)?;
        updates.push(MetaUpdate { role, version, data: bytes });
    }

    validator::validate_batch(&*data.store, &gun, &updates).await?;
    error::from_metastore("update_many", data.store.update_many(&gun, updates).await)?;

    Ok(HttpResponse::NoContent().finish())
}

fn extract_version(data: &[u8]) -> Result<u64> {
    let value: serde_json::Value = serde_json::from_slice(data).map_err(|e| Error::MalformedUpload {
        reason: format!("invalid JSON: {}", e),
    })?;
    value
        .get("signed")
        .and_then(|s| s.get("version"))
        .and_then(|v| v.as_u64())
        .ok_or_else(|| Error::MalformedUpload {
            reason: "missing signed.version".to_string(),
        })
}

// Reads

enum TailKind {
    Current(String),
    Version(u64, String),
    Checksum(String, String),
}

/// `.json` has already been stripped from `tail` by the route pattern. A version-addressed read
/// puts its marker first (`<version>.<role>`); a checksum-addressed read puts its marker last
/// (`<role>.<sha256>`); anything else is a plain current-role read.
fn parse_tail(tail: &str) -> Result<TailKind> {
    if let Some((first, rest)) = tail.split_once('.') {
        if let Ok(version) = first.parse::<u64>() {
            return Ok(TailKind::Version(version, rest.to_string()));
        }
    }
    if let Some((role, sha256)) = tail.rsplit_once('.') {
        if sha256.len() == 64 && sha256.chars().all(|c| c.is_ascii_hexdigit()) {
            return Ok(TailKind::Checksum(role.to_string(), sha256.to_string()));
        }
    }
    Ok(TailKind::Current(tail.to_string()))
}

async fn get_role_file(
    path: web::Path<(String, String)>,
    req: HttpRequest,
    data: web::Data<SharedData>,
) -> Result<HttpResponse> {
    let (gun, tail) = path.into_inner();
    let sub = authorize(&data, &req, &gun, "pull")?;
    info!("pull authorized for gun '{}' by '{}'", gun, sub.as_deref().unwrap_or("anonymous"));

    let (record, ttl) = match parse_tail(&tail)? {
        TailKind::Current(role) => {
            data.freshness.ensure_fresh(&gun).await?;
            let record = error::from_metastore("get_current", data.tuf.get_current(&gun, &role).await)?;
            (record, data.caching.current_ttl)
        }
        TailKind::Version(version, role) => {
            let record = error::from_metastore(
                "get_version",
                data.store.get_version(&gun, &role, version).await,
            )?;
            (record, data.caching.consistent_ttl)
        }
        TailKind::Checksum(role, sha256) => {
            let record = error::from_metastore(
                "get_checksum",
                data.store.get_checksum(&gun, &role, &sha256).await,
            )?;
            (record, data.caching.consistent_ttl)
        }
    };

    Ok(HttpResponse::Ok()
        .content_type("application/json")
        .insert_header(("Cache-Control", format!("max-age={}", ttl)))
        .insert_header(("Last-Modified", record.created_at.to_rfc2822()))
        .body(record.data))
}

// Gun deletion

async fn delete_gun(path: web::Path<String>, req: HttpRequest, data: web::Data<SharedData>) -> Result<HttpResponse> {
    let gun = path.into_inner();
    let sub = authorize(&data, &req, &gun, "push")?;
    info!("delete authorized for gun '{}' by '{}'", gun, sub.as_deref().unwrap_or("anonymous"));
    error::from_metastore("delete", data.store.delete(&gun).await)?;
    Ok(HttpResponse::NoContent().finish())
}

// Server-held keys

fn ensure_role_keyable(gun: &str, role: &str) -> Result<()> {
    if role == "timestamp" || role == "snapshot" {
        Ok(())
    } else {
        Err(Error::NotFound {
            gun: gun.to_string(),
            role: role.to_string(),
        })
    }
}

fn parse_stored_root(data: &[u8]) -> Result<Root> {
    let signed: Signed<Root> = serde_json::from_slice(data).map_err(|e| Error::Internal {
        msg: format!("stored root failed to parse: {}", e),
    })?;
    Ok(signed.signed)
}

async fn get_key(
    path: web::Path<(String, String)>,
    req: HttpRequest,
    data: web::Data<SharedData>,
) -> Result<HttpResponse> {
    let (gun, role) = path.into_inner();
    let sub = authorize(&data, &req, &gun, "pull")?;
    info!(
        "key read authorized for gun '{}' role '{}' by '{}'",
        gun,
        role,
        sub.as_deref().unwrap_or("anonymous")
    );
    ensure_role_keyable(&gun, &role)?;

    let root_record = error::from_metastore("get_current root", data.store.get_current(&gun, "root").await)?;
    let root = parse_stored_root(&root_record.data)?;
    let role_type = RoleType::parse(&role);
    let (_key_id, key) = root
        .keys_for_role(&role_type)
        .into_iter()
        .next()
        .ok_or_else(|| Error::NotFound {
            gun: gun.clone(),
            role: role.clone(),
        })?;

    Ok(HttpResponse::Ok().json(key))
}

async fn rotate_key(
    path: web::Path<(String, String)>,
    req: HttpRequest,
    data: web::Data<SharedData>,
) -> Result<HttpResponse> {
    let (gun, role) = path.into_inner();
    let sub = authorize(&data, &req, &gun, "push")?;
    info!(
        "key rotation authorized for gun '{}' role '{}' by '{}'",
        gun,
        role,
        sub.as_deref().unwrap_or("anonymous")
    );
    ensure_role_keyable(&gun, &role)?;

    let (key_id, key) = data.signer.create_key(&gun, &role, Algorithm::Ed25519).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "keyid": key_id,
        "algorithm": key.algorithm,
        "public": key.public,
    })))
}

// Change feed

#[derive(serde::Deserialize)]
struct ChangeFeedQuery {
    since: Option<String>,
    records: Option<u32>,
    filter: Option<String>,
}

async fn get_changefeed(
    query: web::Query<ChangeFeedQuery>,
    data: web::Data<SharedData>,
) -> Result<HttpResponse> {
    let since_id = match &query.since {
        Some(cursor) => error::from_metastore("parse_since_id", notary_metastore::parse_since_id(cursor))?,
        None => 0,
    };
    let page_size = query.records.unwrap_or(100);
    let reversed = since_id < 0;

    let records = error::from_metastore(
        "get_changes",
        data.store
            .get_changes(since_id, page_size, query.filter.as_deref(), reversed)
            .await,
    )?;

    Ok(HttpResponse::Ok().json(records))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::auth::test_support::{base_claims, gate_with_signing_key, mint};
    use actix_web::body::to_bytes;
    use async_trait::async_trait;
    use notary_metastore::MemoryMetaStore;
    use notary_types::key::{Algorithm as KeyAlgorithm, Key};

    struct NoopSigner;

    #[async_trait]
    impl crate::signer_client::Signer for NoopSigner {
        async fn sign(&self, _key_id: &str, _payload: &[u8]) -> Result<(Vec<u8>, KeyAlgorithm)> {
            panic!("a request rejected at the auth gate must never reach the signer");
        }

        async fn create_key(&self, _gun: &str, _role: &str, _algorithm: KeyAlgorithm) -> Result<(String, Key)> {
            panic!("a request rejected at the auth gate must never reach the signer");
        }
    }

    /// An insufficient-scope token must be rejected by the auth gate before the handler ever
    /// touches the store: the change feed stays empty and the upload never lands.
    #[actix_web::test]
    async fn insufficient_scope_leaves_store_untouched() {
        let (gate, encoding_key) = gate_with_signing_key("notary-server", "issuer");
        let mut claims = base_claims("alice", "notary-server", "issuer");
        claims.access.push(crate::auth::AccessEntry {
            resource_type: "repository".to_string(),
            name: "acme-app".to_string(),
            actions: vec!["pull".to_string()],
        });
        let token = mint(&encoding_key, &claims);

        let store: Arc<dyn MetaStore> = Arc::new(MemoryMetaStore::new());
        let signer: Arc<dyn crate::signer_client::Signer> = Arc::new(NoopSigner);
        let data = web::Data::new(SharedData::new(store.clone(), signer, gate, CachingConfig::default()));

        let app = actix_web::test::init_service(
            App::new().app_data(data.clone()).service(
                web::scope("/v2/{gun}/_trust/tuf").route("", web::post().to(upload)),
            ),
        )
        .await;

        let req = actix_web::test::TestRequest::post()
            .uri("/v2/acme-app/_trust/tuf")
            .insert_header(("Authorization", format!("Bearer {}", token)))
            .set_payload(Vec::new())
            .to_request();
        let resp = actix_web::test::call_service(&app, req).await;
        assert_eq!(resp.status(), 401);
        let challenge = resp
            .headers()
            .get("WWW-Authenticate")
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .to_string();
        assert!(challenge.contains(r#"error="insufficient_scope""#));
        let _ = to_bytes(resp.into_body()).await.unwrap();

        let changes = store.get_changes(0, 10, None, false).await.unwrap();
        assert!(changes.is_empty(), "rejected upload must not append a change record");
    }
}
