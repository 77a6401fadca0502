//! Error types for hq-barcode-core.

use thiserror::Error;

/// Result type alias using hq-barcode-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// The six classification kinds used throughout the retrieval pipeline.
///
/// These are the buckets `error_handling::classify` sorts exceptions into;
/// they are also the `error_type` tag stored alongside every
/// [`crate::tracking`] row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Database,
    Network,
    FileSystem,
    Data,
    Configuration,
    Unknown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Database => "database",
            ErrorKind::Network => "network",
            ErrorKind::FileSystem => "file_system",
            ErrorKind::Data => "data",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Errors that can occur anywhere in the retrieval/render/tracking pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// A classified failure surfaced by a retrieval method; carries the kind
    /// recorded into the tracking store.
    #[error("{kind}: {message}")]
    Classified { kind: ErrorKind, message: String },

    /// SOAP transport failure (non-2xx, connect, timeout).
    #[error("SOAP transport error: {0}")]
    SoapTransport(String),

    /// SOAP response could not be parsed as XML.
    #[error("SOAP response parse error: {0}")]
    SoapParse(String),

    /// Web scraping session failure (browser crash, navigation failure).
    #[error("web scraping error: {0}")]
    WebScrape(String),

    /// A required form field selector could not be resolved.
    #[error("selector resolution failed for field {field}")]
    SelectorNotFound { field: String },

    /// PDF rendering failure.
    #[error("PDF render error: {0}")]
    Render(String),

    /// Source database (read-only) error.
    #[error("source database error: {0}")]
    SourceDb(#[from] rusqlite::Error),

    /// Tracking store error.
    #[error("tracking store error: {0}")]
    Tracking(String),

    /// Filesystem error writing a rendered PDF.
    #[error("file system error: {0}")]
    FileSystem(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error (missing/invalid option, unknown key).
    #[error("configuration error: {0}")]
    Config(String),

    /// Retries exhausted; carries the last classified error.
    #[error("operation failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<Error>,
    },

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn classified(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Classified {
            kind,
            message: message.into(),
        }
    }

    pub fn selector_not_found(field: impl Into<String>) -> Self {
        Self::SelectorNotFound {
            field: field.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn tracking(message: impl Into<String>) -> Self {
        Self::Tracking(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Best-effort classification of this error into one of the six kinds,
    /// used when an error reaches the scheduler loop without having already
    /// been run through [`crate::error_handling::classify_message`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Classified { kind, .. } => *kind,
            Error::SoapTransport(_) | Error::WebScrape(_) => ErrorKind::Network,
            Error::SoapParse(_) | Error::SelectorNotFound { .. } => ErrorKind::Data,
            Error::Render(_) => ErrorKind::Unknown,
            Error::SourceDb(_) | Error::Tracking(_) => ErrorKind::Database,
            Error::FileSystem(_) => ErrorKind::FileSystem,
            Error::Serialization(_) => ErrorKind::Data,
            Error::Config(_) => ErrorKind::Configuration,
            Error::RetriesExhausted { last, .. } => last.kind(),
            Error::Internal(_) => ErrorKind::Unknown,
        }
    }
}
