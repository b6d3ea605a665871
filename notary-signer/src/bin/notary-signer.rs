use log::{error, info, LevelFilter};
use notary_signer::config::Config;
use notary_signer::{EnvPassphraseRetriever, MemoryKeyStore, SignerService};
use simplelog::{ColorChoice, TermLogger, TerminalMode};
use std::env;
use std::process;
use std::sync::Arc;
use tonic::transport::{Certificate, Identity, Server, ServerTlsConfig};

const USAGE_MSG: &str = "\
USAGE:
    notary-signer -config=<file>

Reads signer passphrases from the environment: NOTARY_SIGNER_DEFAULT_ALIAS names the alias
used for newly-created keys, and NOTARY_SIGNER_<ALIAS> holds each alias's passphrase.";

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
        Config { source: notary_signer::Error },

        #[snafu(display("Failed to bind gRPC listener on {}: {}", addr, source))]
        Bind {
            addr: String,
            source: tonic::transport::Error,
        },

        #[snafu(display("Failed to read TLS material '{}': {}", path, source))]
        TlsRead {
            path: String,
            source: std::io::Error,
        },

        #[snafu(display("Failed to configure server TLS: {}", source))]
        TlsConfig { source: tonic::transport::Error },
    }

    pub type Result<T> = std::result::Result<T, Error>;
}
use error::Result;
use snafu::ResultExt;

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

    info!("starting notary-signer on {}", config.server.grpc_addr);

    let passphrases: Arc<dyn notary_signer::PassphraseRetriever> = Arc::new(EnvPassphraseRetriever);
    let keys: Arc<dyn notary_signer::KeyDBStore> = if config.storage.backend == "memory" {
        Arc::new(MemoryKeyStore::new(passphrases.clone()))
    } else {
        let store = notary_signer::SqlKeyStore::connect(&config.storage.backend, passphrases.clone())
            .await
            .context(error::ConfigSnafu)?;
        Arc::new(store)
    };

    let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<notary_proto::key_management_server::KeyManagementServer<SignerService>>()
        .await;
    health_reporter
        .set_serving::<notary_proto::signer_server::SignerServer<SignerService>>()
        .await;

    let service = SignerService::new(keys, passphrases);
    let addr = config
        .server
        .grpc_addr
        .parse()
        .unwrap_or_else(|_| usage());

    let read_tls = |path: &std::path::Path| {
        std::fs::read(path).context(error::TlsReadSnafu {
            path: path.display().to_string(),
        })
    };
    let server_identity = Identity::from_pem(
        read_tls(&config.server.tls_cert)?,
        read_tls(&config.server.tls_key)?,
    );
    let client_ca = Certificate::from_pem(read_tls(&config.server.client_ca)?);
    let tls_config = ServerTlsConfig::new()
        .identity(server_identity)
        .client_ca_root(client_ca);

    Server::builder()
        .tls_config(tls_config)
        .context(error::TlsConfigSnafu)?
        .add_service(health_service)
        .add_service(
            notary_proto::key_management_server::KeyManagementServer::new(service.clone()),
        )
        .add_service(notary_proto::signer_server::SignerServer::new(service))
        .serve(addr)
        .await
        .context(error::BindSnafu {
            addr: config.server.grpc_addr.clone(),
        })?;

    Ok(())
}

fn main() {
    let args = parse_args(env::args());
    let rt = tokio::runtime::Runtime::new().expect("failed to start tokio runtime");
    if let Err(e) = rt.block_on(run(args)) {
        error!("{}", e);
        process::exit(1);
    }
}
