use crate::download::FetchError;
use thiserror::Error;

/// Failures surfaced from install/uninstall/toggle operations. Variants are
/// structured so the presentation layer can word hash mismatches, network
/// failures and format problems differently.
#[derive(Debug, Error)]
pub enum Error {
    #[error("hash mismatch for {name}: expected {expected}, got {actual}")]
    HashMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("download of {name} failed")]
    Download {
        name: String,
        #[source]
        source: FetchError,
    },

    #[error("unsupported mod payload: {filename}")]
    UnsupportedFormat { filename: String },

    #[error("archive entry {entry:?} escapes the destination directory")]
    PathTraversal { entry: String },

    #[error("unknown mod: {0}")]
    UnknownMod(String),

    #[error("{0} is not installed")]
    NotInstalled(String),

    #[error("{0} is still installed")]
    StillInstalled(String),

    #[error("{0} has no update available")]
    UpToDate(String),

    #[error("the modding API is not installed")]
    ApiNotInstalled,

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
