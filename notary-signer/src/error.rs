use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Key '{}' already exists", key_id))]
    KeyExists { key_id: String },

    #[snafu(display("Key '{}' not found", key_id))]
    KeyNotFound { key_id: String },

    #[snafu(display("No pending key matches role '{}' gun {:?}", role, gun))]
    NoKey { role: String, gun: Option<String> },

    #[snafu(display("Key store backend error during {}: {}", op, source))]
    Backend { op: String, source: sqlx::Error },

    #[snafu(display("Failed to encrypt key material: {}", msg))]
    Encrypt { msg: String },

    #[snafu(display("Failed to decrypt key material: {}", msg))]
    Decrypt { msg: String },

    #[snafu(display("No passphrase configured for alias '{}'", alias))]
    NoPassphrase { alias: String },

    #[snafu(display("Underlying key material error: {}", source))]
    Types { source: notary_types::Error },

    #[snafu(display("Failed to read config file '{}': {}", path, source))]
    ConfigRead {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("Failed to parse config file '{}': {}", path, source))]
    ConfigParse { path: String, source: toml::de::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<notary_types::Error> for Error {
    fn from(source: notary_types::Error) -> Self {
        Error::Types { source }
    }
}

impl From<Error> for tonic::Status {
    fn from(e: Error) -> Self {
        match e {
            Error::KeyExists { .. } => tonic::Status::already_exists(e.to_string()),
            Error::KeyNotFound { .. } | Error::NoKey { .. } => {
                tonic::Status::not_found(e.to_string())
            }
            Error::Backend { .. } => tonic::Status::unavailable(e.to_string()),
            _ => tonic::Status::internal(e.to_string()),
        }
    }
}
