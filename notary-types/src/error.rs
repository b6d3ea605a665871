use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("GUN must not be empty"))]
    EmptyGun,

    #[snafu(display("'{}' is not a valid role name", name))]
    InvalidRole { name: String },

    #[snafu(display("Failed to canonicalize JSON for signing: {}", source))]
    Canonicalize { source: serde_json::Error },

    #[snafu(display("Failed to parse metadata as JSON: {}", source))]
    Parse { source: serde_json::Error },

    #[snafu(display("Unsupported signature algorithm '{}'", algorithm))]
    UnsupportedAlgorithm { algorithm: String },

    #[snafu(display("Key material is malformed: {}", msg))]
    MalformedKey { msg: String },

    #[snafu(display("Failed to generate a {} key: {}", algorithm, msg))]
    KeyGeneration { algorithm: String, msg: String },

    #[snafu(display("Signing operation failed for key {}", key_id))]
    SigningFailed { key_id: String },

    #[snafu(display("Hex decoding failed: {}", source))]
    HexDecode {
        source: data_encoding::DecodeError,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
