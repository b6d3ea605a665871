use log::{error, info, LevelFilter};
use notary_metastore::{MemoryMetaStore, MetaStore, SqlMetaStore};
use notary_server::config::Config;
use notary_server::http::{self, SharedData};
use notary_server::signer_client::{SignerClient, SignerTls};
use notary_server::AuthGate;
use simplelog::{ColorChoice, TermLogger, TerminalMode};
use std::env;
use std::process;
use std::sync::Arc;

const USAGE_MSG: &str = "\
USAGE:
    notary-server -config=<file>";

fn usage() -> ! {
    eprintln!("{}", USAGE_MSG);
    process::exit(2);
}

struct Args {
    config_path: String,
}

fn parse_args(args: env::Args) -> Args {
    let mut config_path = None;
    for arg in args.skip(1) {
        if let Some(value) = arg.strip_prefix("-config=") {
            config_path = Some(value.to_string());
        } else {
            usage();
        }
    }
    Args {
        config_path: config_path.unwrap_or_else(|| usage()),
    }
}

mod error {
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    pub enum Error {
        #[snafu(display("Failed to load config: {}", source))]
        Config { source: notary_server::Error },

        #[snafu(display("Failed to read signer TLS material '{}': {}", path, source))]
        SignerTls { path: String, source: std::io::Error },

        #[snafu(display("Failed to connect to the signer at {}: {}", addr, source))]
        SignerConnect { addr: String, source: notary_server::Error },

        #[snafu(display("Failed to load the auth trust bundle: {}", source))]
        Auth { source: notary_server::Error },

        #[snafu(display("Failed to connect to storage backend: {}", source))]
        Storage { source: notary_metastore::Error },

        #[snafu(display("HTTP server error: {}", source))]
        Serve { source: std::io::Error },
    }

    pub type Result<T> = std::result::Result<T, Error>;
}
use error::Result;
use snafu::ResultExt;

fn read_pem(path: &std::path::Path) -> Result<Vec<u8>> {
    std::fs::read(path).context(error::SignerTlsSnafu {
        path: path.display().to_string(),
    })
}

async fn run(args: Args) -> Result<()> {
    let config = Config::from_path(&args.config_path).context(error::ConfigSnafu)?;

    TermLogger::init(
        config
            .server
            .log_level
            .as_deref()
            .and_then(|l| l.parse().ok())
            .unwrap_or(LevelFilter::Info),
        simplelog::Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .ok();

    info!("starting notary-server on {}", config.server.http_addr);

    let store: Arc<dyn MetaStore> = if config.storage.backend == "memory" {
        Arc::new(MemoryMetaStore::new())
    } else {
        let store = SqlMetaStore::connect(&config.storage.backend)
            .await
            .context(error::StorageSnafu)?;
        Arc::new(store)
    };

    let signer_tls = SignerTls {
        ca_cert: read_pem(&config.signer.ca_cert)?,
        client_cert: read_pem(&config.signer.client_cert)?,
        client_key: read_pem(&config.signer.client_key)?,
        domain_name: config.signer.domain_name.clone(),
    };
    let signer = Arc::new(
        SignerClient::connect(&config.signer.addr, signer_tls)
            .await
            .context(error::SignerConnectSnafu {
                addr: config.signer.addr.clone(),
            })?,
    );

    let auth = AuthGate::load(
        &config.auth.trust_bundle_dir,
        config.auth.trusted_issuers.clone(),
        config.auth.audience.clone(),
        config.auth.realm.clone(),
        config.auth.service.clone(),
    )
    .context(error::AuthSnafu)?;

    let shared_data = actix_web::web::Data::new(SharedData::new(
        store,
        signer,
        auth,
        config.caching.clone(),
    ));

    http::serve(&config, shared_data)
        .await
        .context(error::ServeSnafu)
}

fn main() {
    let args = parse_args(env::args());
    let rt = tokio::runtime::Runtime::new().expect("failed to start tokio runtime");
    if let Err(e) = rt.block_on(run(args)) {
        error!("{}", e);
        process::exit(1);
    }
}
