//! Error types for the capture pipeline

use thiserror::Error;

/// Result type alias for capture operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while capturing a page
///
/// Only a few of these abort a run. Per-asset fetch failures and per-image
/// load timeouts are absorbed by the pipeline and never show up here.
#[derive(Error, Debug)]
pub enum Error {
    /// The target page cannot be captured (privileged or internal page)
    #[error("Page cannot be exported: {0}")]
    EnvironmentRejected(String),

    /// Raster or vector assembly could not produce an artifact
    #[error("PDF assembly failed: {0}")]
    AssemblyError(String),

    /// The binary artifact could not be encoded for transfer
    #[error("Encoding failed: {0}")]
    EncodingError(String),

    /// Failed to load a page or document
    #[error("Failed to load URL: {0}")]
    LoadError(String),

    /// Failed to render content
    #[error("Rendering failed: {0}")]
    RenderError(String),

    /// Network error
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Another capture is already running for the same page
    #[error("A capture is already in progress for {0}")]
    Busy(String),

    /// The run was cancelled through its cancel token
    #[error("Capture cancelled")]
    Cancelled,

    /// Filesystem error (settings, downloads)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CDP-specific error
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    CdpError(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::ConfigError(err.to_string())
    }
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::CdpError(err.to_string())
    }
}
