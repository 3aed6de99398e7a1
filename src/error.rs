//! Error types for the capture pipeline and its collaborators

use thiserror::Error;

/// Result type alias for pagestitch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while capturing, stitching or publishing a page
///
/// The first four variants are the terminal failures of the full-page
/// pipeline. None of them is retried internally.
#[derive(Error, Debug)]
pub enum Error {
    /// The page could not be measured or scripted
    #[error("Failed to get page metrics: {0}")]
    MetricsUnavailable(String),

    /// A per-viewport capture call was rejected
    #[error("Viewport capture failed: {0}")]
    CaptureFailed(String),

    /// The stitching surface could not be created
    #[error("Failed to create 2D context for stitching: {0}")]
    StitchContextUnavailable(String),

    /// The final JPEG export was rejected
    #[error("Image export failed: {0}")]
    EncodeFailed(String),

    /// A captured frame could not be decoded (malformed data URI, bad image bytes)
    #[error("Failed to decode capture: {0}")]
    DecodeFailed(String),

    /// A remote page operation (scroll, restore) failed
    #[error("Script execution failed: {0}")]
    ScriptError(String),

    /// Failed to initialize a host backend
    #[error("Initialization failed: {0}")]
    InitializationError(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Object storage rejected an upload
    #[error("Upload failed: {0}")]
    UploadError(String),

    /// Object storage could not be reached or refused access
    #[error("Connection failed: {0}")]
    ConnectionError(String),

    /// Filesystem error (config persistence, output files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CDP-specific error
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    CdpError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::CdpError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::ConfigError(err.to_string())
    }
}
