//! Cross-origin asset inlining.
//!
//! The render surface shares the page's origin, so same-origin images load
//! directly. Cross-origin images are fetched without credentials in CORS mode
//! and substituted with `data:` URIs. Inlining is best-effort: every image
//! gets an `AssetOutcome`, and no single asset can fail the run.

use crate::dom::ElementNode;
use crate::wait::Waiter;
use crate::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use url::Url;

/// Whether credentials (cookies) accompany a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credentials {
    Omit,
    SameOrigin,
}

/// Whether the response must pass a CORS check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    Cors,
    NoCors,
}

/// An outgoing subresource request
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: Url,
    /// Serialized origin of the document issuing the request
    pub initiator_origin: String,
    pub credentials: Credentials,
    pub mode: RequestMode,
    /// Cookie header to send; only set for credentialed same-origin loads
    pub cookie_header: Option<String>,
}

impl FetchRequest {
    pub fn is_same_origin(&self) -> bool {
        self.url.origin().ascii_serialization() == self.initiator_origin
    }
}

/// A successfully fetched body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedAsset {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Network access used for inlining and for surface image loads
pub trait AssetFetcher: Send + Sync {
    fn fetch(&self, request: FetchRequest) -> BoxFuture<'_, Result<FetchedAsset>>;
}

/// In-memory fetcher
///
/// Serves registered bodies, fails unknown URLs, and never answers URLs marked
/// as stalled. Every request is recorded. Used in tests and for offline
/// captures where assets were collected ahead of time.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    bodies: HashMap<String, FetchedAsset>,
    stalled: HashSet<String>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(mut self, url: &str, content_type: &str, bytes: Vec<u8>) -> Self {
        self.bodies.insert(
            normalize(url),
            FetchedAsset {
                bytes,
                content_type: Some(content_type.to_string()),
            },
        );
        self
    }

    pub fn with_stalled(mut self, url: &str) -> Self {
        self.stalled.insert(normalize(url));
        self
    }

    /// Requests seen so far.
    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn normalize(url: &str) -> String {
    Url::parse(url)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| url.to_string())
}

impl AssetFetcher for MemoryFetcher {
    fn fetch(&self, request: FetchRequest) -> BoxFuture<'_, Result<FetchedAsset>> {
        let key = request.url.to_string();
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        if self.stalled.contains(&key) {
            return futures::future::pending().boxed();
        }
        let res = self
            .bodies
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::NetworkError(format!("no route to {}", key)));
        futures::future::ready(res).boxed()
    }
}

/// Identity of one image reference within a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetReference {
    /// Resolved URL, or the raw `src` when it could not be resolved
    pub url: String,
    /// Serialized origin of `url` (`"null"` for opaque origins)
    pub origin: String,
    pub inlined: bool,
}

/// Why an asset stayed a live reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeftRemoteReason {
    Unresolvable(String),
    UnsupportedScheme(String),
    FetchFailed(String),
    TimedOut(u64),
}

impl fmt::Display for LeftRemoteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeftRemoteReason::Unresolvable(e) => write!(f, "unresolvable URL: {}", e),
            LeftRemoteReason::UnsupportedScheme(s) => write!(f, "unsupported scheme {}", s),
            LeftRemoteReason::FetchFailed(e) => write!(f, "fetch failed: {}", e),
            LeftRemoteReason::TimedOut(ms) => write!(f, "no response after {}ms", ms),
        }
    }
}

/// Per-asset result of inlining
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetOutcome {
    /// Already a `data:` URI; left byte-identical
    AlreadyEmbedded,
    /// Same origin as the surface; resolved directly at render time
    SameOrigin,
    /// Fetched and substituted with a `data:` URI
    Inlined { bytes: usize },
    /// Best-effort failure; the original reference is untouched
    LeftRemote(LeftRemoteReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlinedAsset {
    pub reference: AssetReference,
    pub outcome: AssetOutcome,
}

/// Outcomes of one inlining pass, one entry per distinct `src`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InlineReport {
    pub assets: Vec<InlinedAsset>,
}

impl InlineReport {
    pub fn inlined_count(&self) -> usize {
        self.assets
            .iter()
            .filter(|a| matches!(a.outcome, AssetOutcome::Inlined { .. }))
            .count()
    }

    pub fn left_remote(&self) -> impl Iterator<Item = &InlinedAsset> {
        self.assets
            .iter()
            .filter(|a| matches!(a.outcome, AssetOutcome::LeftRemote(_)))
    }

    pub fn outcome_for(&self, url: &str) -> Option<&AssetOutcome> {
        self.assets
            .iter()
            .find(|a| a.reference.url == url)
            .map(|a| &a.outcome)
    }
}

/// Replaces cross-origin image references with embedded copies
pub struct AssetInliner {
    fetcher: Arc<dyn AssetFetcher>,
    timeout_ms: u64,
}

impl AssetInliner {
    pub fn new(fetcher: Arc<dyn AssetFetcher>, timeout_ms: u64) -> Self {
        Self {
            fetcher,
            timeout_ms,
        }
    }

    /// Inline every cross-origin `img[src]` under `root`.
    ///
    /// `base` resolves relative references; `surface_origin` is the origin the
    /// render surface loads from. Errors only on cancellation.
    pub async fn inline(
        &self,
        root: &mut ElementNode,
        base: &Url,
        surface_origin: &str,
        waiter: &Waiter,
    ) -> Result<InlineReport> {
        let mut seen = HashSet::new();
        let sources: Vec<String> = image_sources(root)
            .into_iter()
            .filter(|s| seen.insert(s.clone()))
            .collect();

        let mut report = InlineReport::default();
        let mut substitutions: HashMap<String, String> = HashMap::new();

        for src in sources {
            waiter.check()?;
            let (reference, outcome, data_uri) = self.inline_one(&src, base, surface_origin, waiter).await;
            match &outcome {
                AssetOutcome::LeftRemote(reason) => warn!("left {} remote: {}", reference.url, reason),
                other => debug!("asset {} -> {:?}", reference.url, other),
            }
            if let Some(data_uri) = data_uri {
                substitutions.insert(src, data_uri);
            }
            report.assets.push(InlinedAsset { reference, outcome });
        }
        waiter.check()?;

        if !substitutions.is_empty() {
            root.visit_descendants_mut(&mut |el| {
                if el.tag != "img" {
                    return;
                }
                let replacement = el.attr("src").and_then(|s| substitutions.get(s)).cloned();
                if let Some(data_uri) = replacement {
                    el.set_attr("src", &data_uri);
                    // a stale srcset would outrank the embedded copy
                    el.remove_attr("srcset");
                }
            });
        }

        info!(
            "inlined {} of {} image references",
            report.inlined_count(),
            report.assets.len()
        );
        Ok(report)
    }

    async fn inline_one(
        &self,
        src: &str,
        base: &Url,
        surface_origin: &str,
        waiter: &Waiter,
    ) -> (AssetReference, AssetOutcome, Option<String>) {
        if is_embedded(src) {
            let reference = AssetReference {
                url: src.to_string(),
                origin: "null".to_string(),
                inlined: false,
            };
            return (reference, AssetOutcome::AlreadyEmbedded, None);
        }

        let url = match base.join(src.trim()) {
            Ok(u) => u,
            Err(e) => {
                let reference = AssetReference {
                    url: src.to_string(),
                    origin: "null".to_string(),
                    inlined: false,
                };
                let outcome = AssetOutcome::LeftRemote(LeftRemoteReason::Unresolvable(e.to_string()));
                return (reference, outcome, None);
            }
        };
        let origin = url.origin().ascii_serialization();
        let mut reference = AssetReference {
            url: url.to_string(),
            origin: origin.clone(),
            inlined: false,
        };

        if origin == surface_origin {
            return (reference, AssetOutcome::SameOrigin, None);
        }
        if !matches!(url.scheme(), "http" | "https") {
            let reason = LeftRemoteReason::UnsupportedScheme(url.scheme().to_string());
            return (reference, AssetOutcome::LeftRemote(reason), None);
        }

        let request = FetchRequest {
            url,
            initiator_origin: surface_origin.to_string(),
            credentials: Credentials::Omit,
            mode: RequestMode::Cors,
            cookie_header: None,
        };
        match waiter.race(self.fetcher.fetch(request), self.timeout_ms).await {
            Some(Ok(asset)) => {
                let bytes = asset.bytes.len();
                let data_uri = to_data_uri(&asset.bytes, asset.content_type.as_deref());
                reference.inlined = true;
                (reference, AssetOutcome::Inlined { bytes }, Some(data_uri))
            }
            Some(Err(e)) => {
                let reason = LeftRemoteReason::FetchFailed(e.to_string());
                (reference, AssetOutcome::LeftRemote(reason), None)
            }
            None => {
                let reason = LeftRemoteReason::TimedOut(self.timeout_ms);
                (reference, AssetOutcome::LeftRemote(reason), None)
            }
        }
    }
}

/// `src` of every `img` under `root`, in document order.
pub fn image_sources(root: &ElementNode) -> Vec<String> {
    root.descendants()
        .filter(|e| e.tag == "img")
        .filter_map(|e| e.attr("src"))
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Whether `src` is already a self-contained `data:` URI.
pub fn is_embedded(src: &str) -> bool {
    src.trim_start()
        .get(..5)
        .map(|p| p.eq_ignore_ascii_case("data:"))
        .unwrap_or(false)
}

/// Encode bytes as a base64 `data:` URI, sniffing the MIME type when the
/// server did not send a usable one.
pub fn to_data_uri(bytes: &[u8], content_type: Option<&str>) -> String {
    let declared = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase())
        .filter(|ct| !ct.is_empty() && ct != "application/octet-stream");
    let mime = declared.unwrap_or_else(|| {
        image::guess_format(bytes)
            .map(|f| f.to_mime_type().to_string())
            .unwrap_or_else(|_| "application/octet-stream".to_string())
    });
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// Decode a `data:` URI into its MIME type and bytes.
pub fn decode_data_uri(src: &str) -> Option<(String, Vec<u8>)> {
    let rest = src.trim();
    if !is_embedded(rest) {
        return None;
    }
    let (meta, data) = rest[5..].split_once(',')?;
    let mut parts = meta.split(';');
    let mime = parts.next().unwrap_or("").trim();
    let mime = if mime.is_empty() { "text/plain" } else { mime }.to_string();
    let is_base64 = meta
        .split(';')
        .any(|p| p.trim().eq_ignore_ascii_case("base64"));
    let bytes = if is_base64 {
        let cleaned: String = data.chars().filter(|c| !c.is_whitespace()).collect();
        STANDARD.decode(cleaned).ok()?
    } else {
        percent_decode(data)
    };
    Some((mime, bytes))
}

fn percent_decode(s: &str) -> Vec<u8> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2]));
            if let (Some(hi), Some(lo)) = hex {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

fn hex_value(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}
