use thiserror::Error;

/// Common error type for hwsight components.
///
/// Telemetry queries never fail; they degrade to unknown values. This type
/// covers the surfaces around them that can genuinely fail: configuration,
/// snapshot serialization and logging setup.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CBOR serialization error: {0}")]
    Cbor(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ciborium::ser::Error<std::io::Error>> for Error {
    fn from(e: ciborium::ser::Error<std::io::Error>) -> Self {
        Error::Cbor(e.to_string())
    }
}

impl From<ciborium::de::Error<std::io::Error>> for Error {
    fn from(e: ciborium::de::Error<std::io::Error>) -> Self {
        Error::Cbor(e.to_string())
    }
}

impl From<json5::Error> for Error {
    fn from(e: json5::Error) -> Self {
        Error::Config(e.to_string())
    }
}

/// Result type alias using hwsight's Error.
pub type Result<T> = std::result::Result<T, Error>;
