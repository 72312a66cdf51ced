//! RFox Export
//!
//! Capture a rendered web page into a self-contained, paginated PDF.
//!
//! The crate is organised around a capture pipeline:
//!
//! - **Selection** picks the subtree to export (the whole body, or the main
//!   content in readable mode) and deep-copies it out of the live page.
//! - **Sanitization** strips scripts, navigation, ads and other non-content
//!   regions from the copy.
//! - **Asset inlining** replaces cross-origin image references with `data:`
//!   URIs so the render surface can draw them.
//! - **Offscreen rendering** mounts the sanitized markup on an isolated
//!   surface and waits for images to settle.
//! - **Assembly** either prints the live page through the native print
//!   pipeline (vector) or rasterizes the surface into JPEG pages (image).
//! - **Transfer encoding** turns the PDF into a `data:` URL plus a safe
//!   filename.
//!
//! # Example
//!
//! ```no_run
//! use rfexport::{CaptureEngine, EngineConfig, ExportConfig, LivePage};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let page = LivePage::new("https://example.com/", "<html><body><p>Hi</p></body></html>")?;
//! let engine = CaptureEngine::builder(EngineConfig::default()).build()?;
//! let response = engine
//!     .export_document(&page, &ExportConfig::default(), page.title(), page.url().as_str())
//!     .await;
//! assert!(response.success);
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod error;
pub use error::{Error, Result};

pub mod assets;
pub mod dom;
pub mod download;
pub mod filename;
pub mod page;
pub mod pdf;
pub mod pipeline;
pub mod registry;
pub mod rendering;
pub mod sanitize;
pub mod select;
pub mod settings;
pub mod transfer;
pub mod wait;

// reqwest-backed fetcher for real pages and assets
#[cfg(feature = "http")]
pub mod http;

// Native print through headless Chrome
#[cfg(feature = "cdp")]
pub mod cdp;

pub use assets::{AssetFetcher, AssetInliner, AssetOutcome, AssetReference, InlineReport, MemoryFetcher};
pub use dom::{ContentNode, ElementNode};
pub use page::{check_environment, LivePage};
pub use download::{DirectoryDownloader, DownloadHandoff, DownloadId, DownloadRequest};
pub use pdf::{PageSetup, PdfArtifact, PdfAssembler, PrintBackend, SnapshotPrintBackend};
pub use pipeline::{CaptureEngine, CaptureEngineBuilder, CaptureOutcome, CaptureState};
pub use registry::Installation;
pub use rendering::{OffscreenRenderer, RenderSurface};
pub use sanitize::DocumentSanitizer;
pub use select::ContentSelector;
pub use settings::{JsonFileSettingsStore, MemorySettingsStore, Settings, SettingsStore};
pub use transfer::{TransferEncoder, TransferPayload};
pub use wait::{CancelToken, Clock, TokioClock, VirtualClock, Waiter};

#[cfg(feature = "http")]
pub use http::HttpFetcher;

/// Which part of the page is captured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// The whole body, keeping the page layout
    #[default]
    Original,
    /// Only the main content, in a single reading column
    Readable,
}

/// How the PDF is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Native print pipeline; selectable text, no artifact returned
    Vector,
    /// Raster capture of an offscreen render surface
    #[default]
    Image,
}

/// Per-request export options as sent by the UI trigger
///
/// `quality` only takes effect when it lies in `(0, 1]`, where it replaces the
/// JPEG quality factor; `scale <= 0` selects the default raster scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportConfig {
    pub mode: CaptureMode,
    pub format: OutputFormat,
    pub include_images: bool,
    pub include_links: bool,
    pub quality: f32,
    pub scale: f32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            mode: CaptureMode::Original,
            format: OutputFormat::Image,
            include_images: true,
            include_links: true,
            quality: 2.0,
            scale: 2.0,
        }
    }
}

impl ExportConfig {
    /// Start from persisted user settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            mode: settings.default_mode,
            include_images: settings.include_images,
            include_links: settings.include_links,
            ..Default::default()
        }
    }
}

/// One immutable capture request
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    pub mode: CaptureMode,
    pub format: OutputFormat,
    pub include_images: bool,
    pub include_links: bool,
    pub scale: f32,
    pub quality: f32,
    pub page_title: String,
    pub page_url: String,
}

impl CaptureRequest {
    pub fn new(config: &ExportConfig, page_title: &str, page_url: &str) -> Self {
        Self {
            mode: config.mode,
            format: config.format,
            include_images: config.include_images,
            include_links: config.include_links,
            scale: config.scale,
            quality: config.quality,
            page_title: page_title.to_string(),
            page_url: page_url.to_string(),
        }
    }
}

/// Configuration for a capture engine
///
/// The defaults mirror the timings the pipeline was tuned with: a 1200 unit
/// wide surface, 2 s per image, 100 ms initialization settle and 500 ms
/// settles after image load and after inlining.
///
/// # Examples
///
/// ```
/// let cfg = rfexport::EngineConfig::default();
/// assert_eq!(cfg.surface_width, 1200);
/// assert_eq!(cfg.image_timeout_ms, 2000);
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// User agent string sent with asset requests
    pub user_agent: String,
    /// Timeout for a single HTTP request in milliseconds
    pub fetch_timeout_ms: u64,
    /// Custom HTTP headers sent with every request
    pub headers: HashMap<String, String>,
    /// Logical width of the render surface
    pub surface_width: u32,
    /// Per-image load-or-error wait
    pub image_timeout_ms: u64,
    /// Per-asset wait while inlining
    pub asset_timeout_ms: u64,
    /// Settle after the surface is attached
    pub init_settle_ms: u64,
    /// Settle after all images loaded or timed out
    pub post_load_settle_ms: u64,
    /// Settle after inlining substituted assets
    pub post_inline_settle_ms: u64,
    /// Settle between print style injection and print invocation
    pub print_settle_ms: u64,
    /// Delay between print invocation and style removal
    pub print_cleanup_ms: u64,
    /// Paper, margins and raster parameters
    pub page: PageSetup,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) Gecko/20100101 Firefox/115.0 RFOX-Export/0.1".to_string(),
            fetch_timeout_ms: 30000,
            headers: HashMap::new(),
            surface_width: 1200,
            image_timeout_ms: 2000,
            asset_timeout_ms: 10000,
            init_settle_ms: 100,
            post_load_settle_ms: 500,
            post_inline_settle_ms: 500,
            print_settle_ms: 500,
            print_cleanup_ms: 1000,
            page: PageSetup::default(),
        }
    }
}

impl EngineConfig {
    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.surface_width == 0 {
            return Err(Error::ConfigError("surface_width must be positive".into()));
        }
        self.page.validate()
    }
}

/// Response of `export_document`
///
/// Serializes to `{"success":true,"encodedData":..,"filename":..}` or
/// `{"success":false,"error":..}`. Vector exports succeed without
/// `encodedData`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoded_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExportResponse {
    pub fn encoded(payload: TransferPayload) -> Self {
        Self {
            success: true,
            encoded_data: Some(payload.encoded_data),
            filename: Some(payload.filename),
            error: None,
        }
    }

    pub fn printed(filename: String) -> Self {
        Self {
            success: true,
            encoded_data: None,
            filename: Some(filename),
            error: None,
        }
    }

    pub fn failure(err: &Error) -> Self {
        Self {
            success: false,
            encoded_data: None,
            filename: None,
            error: Some(err.to_string()),
        }
    }
}

/// Liveness answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResponse {
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.surface_width, 1200);
        assert_eq!(config.post_load_settle_ms, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn export_config_reads_camel_case() {
        let cfg: ExportConfig = serde_json::from_str(
            r#"{"mode":"readable","format":"vector","includeImages":false,"includeLinks":true,"quality":2,"scale":2}"#,
        )
        .unwrap();
        assert_eq!(cfg.mode, CaptureMode::Readable);
        assert_eq!(cfg.format, OutputFormat::Vector);
        assert!(!cfg.include_images);
    }

    #[test]
    fn response_shapes() {
        let ok = ExportResponse::encoded(TransferPayload {
            encoded_data: "data:application/pdf;base64,AA==".into(),
            filename: "a.pdf".into(),
        });
        let v = serde_json::to_value(&ok).unwrap();
        assert_eq!(v["success"], true);
        assert_eq!(v["encodedData"], "data:application/pdf;base64,AA==");
        assert!(v.get("error").is_none());

        let err = ExportResponse::failure(&Error::AssemblyError("boom".into()));
        let v = serde_json::to_value(&err).unwrap();
        assert_eq!(v["success"], false);
        assert_eq!(v["error"], "PDF assembly failed: boom");
        assert!(v.get("encodedData").is_none());
    }
}
