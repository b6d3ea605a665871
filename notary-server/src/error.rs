use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use snafu::Snafu;

// Server, validator, and auth-gate errors together, so every HTTP-visible failure maps to a
// status code and wire error code in one place.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Metastore error during {}: {}", op, source))]
    Metastore {
        op: String,
        source: notary_metastore::Error,
    },

    #[snafu(display("No metadata found for {} role '{}'", gun, role))]
    NotFound { gun: String, role: String },

    #[snafu(display("Rejected update: {}", reason))]
    OldVersion { reason: String },

    #[snafu(display("Change feed cursor '{}' is invalid", cursor))]
    BadChangeId { cursor: String },

    #[snafu(display("Invalid update: {}", reason))]
    BadMetadata { reason: String },

    #[snafu(display("Insufficient signatures: {}", reason))]
    InsufficientSignatures { reason: String },

    #[snafu(display("Bad role hierarchy: {}", reason))]
    BadHierarchy { reason: String },

    #[snafu(display("Malformed upload: {}", reason))]
    MalformedUpload { reason: String },

    #[snafu(display("No signer is configured or reachable"))]
    NoCryptoService,

    #[snafu(display("Signer RPC failed: {}", source))]
    SignerTransport { source: tonic::Status },

    #[snafu(display("Missing bearer token"))]
    Unauthenticated { challenge: String },

    #[snafu(display("Token lacked required scope '{}'", scope))]
    InsufficientScope { scope: String, challenge: String },

    #[snafu(display("Token rejected: {}", reason))]
    InvalidToken { reason: String, challenge: String },

    #[snafu(display("Failed to read config file '{}': {}", path, source))]
    ConfigRead {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("Failed to parse config file '{}': {}", path, source))]
    ConfigParse { path: String, source: toml::de::Error },

    #[snafu(display("Internal error: {}", msg))]
    Internal { msg: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<notary_types::Error> for Error {
    fn from(source: notary_types::Error) -> Self {
        Error::Internal {
            msg: source.to_string(),
        }
    }
}

/// Converts a `MetaStore` result into a server `Result`, preserving `NotFound`/`BadChangeId` as
/// their own variants (so they surface as 404/400) rather than flattening every backend error
/// into an opaque 500.
pub fn from_metastore<T>(op: &str, result: notary_metastore::Result<T>) -> Result<T> {
    result.map_err(|source| match source {
        notary_metastore::Error::NotFound { gun, role } => Error::NotFound { gun, role },
        notary_metastore::Error::BadChangeId { cursor } => Error::BadChangeId { cursor },
        notary_metastore::Error::OldVersion { gun, role, version } => Error::OldVersion {
            reason: format!(
                "{} version {} is not newer than the current max for '{}'",
                role, version, gun
            ),
        },
        notary_metastore::Error::DuplicateInBatch => Error::OldVersion {
            reason: "batch contains duplicate (role, version) pairs".to_string(),
        },
        other => Error::Metastore {
            op: op.to_string(),
            source: other,
        },
    })
}

#[derive(Serialize)]
struct ErrorBody {
    errors: Vec<ErrorDetail>,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl Error {
    fn code(&self) -> &'static str {
        match self {
            Error::NoCryptoService => "NO_CRYPTO_SERVICE",
            Error::OldVersion { .. } => "OLD_VERSION",
            Error::BadMetadata { .. } => "INVALID_UPDATE",
            Error::InsufficientSignatures { .. } => "INSUFFICIENT_SIGNATURES",
            Error::BadHierarchy { .. } => "BAD_HIERARCHY",
            Error::NotFound { .. } => "METADATA_NOT_FOUND",
            Error::MalformedUpload { .. } => "MALFORMED_UPLOAD",
            Error::BadChangeId { .. } => "MALFORMED_UPLOAD",
            _ => "UNKNOWN",
        }
    }

    /// The `WWW-Authenticate` header value to send alongside this error, if any.
    fn challenge(&self) -> Option<&str> {
        match self {
            Error::Unauthenticated { challenge }
            | Error::InsufficientScope { challenge, .. }
            | Error::InvalidToken { challenge, .. } => Some(challenge),
            _ => None,
        }
    }
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::OldVersion { .. }
            | Error::BadMetadata { .. }
            | Error::InsufficientSignatures { .. }
            | Error::BadHierarchy { .. }
            | Error::MalformedUpload { .. }
            | Error::BadChangeId { .. } => StatusCode::BAD_REQUEST,
            Error::Unauthenticated { .. }
            | Error::InsufficientScope { .. }
            | Error::InvalidToken { .. } => StatusCode::UNAUTHORIZED,
            Error::NoCryptoService | Error::SignerTransport { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Error::Metastore { .. } | Error::ConfigRead { .. } | Error::ConfigParse { .. }
            | Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status_code());
        if let Some(challenge) = self.challenge() {
            builder.insert_header(("WWW-Authenticate", challenge.as_str()));
        }
        builder.json(ErrorBody {
            errors: vec![ErrorDetail {
                code: self.code(),
                message: self.to_string(),
            }],
        })
    }
}
