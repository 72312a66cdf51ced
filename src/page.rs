//! The live page a capture runs against.
//!
//! A `LivePage` holds the markup, URL and title of a loaded document together
//! with the host state the pipeline is allowed to touch: print style sheets
//! injected by the vector path and render surfaces attached by the offscreen
//! renderer. Both are registries keyed by handle so that guards can remove
//! exactly what they added.

use crate::{Error, Result};
use scraper::{Html, Selector};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use url::Url;

/// URL prefixes of browser-internal pages that can never be captured.
const PRIVILEGED_PREFIXES: &[&str] = &["chrome://", "edge://", "about:"];

static NEXT_PAGE_ID: AtomicU64 = AtomicU64::new(1);

/// A style sheet injected into the live page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectedStyle {
    pub handle: u64,
    pub css: String,
}

/// Bookkeeping for a render surface attached to the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceInfo {
    pub handle: u64,
    pub width: u32,
}

pub struct LivePage {
    id: u64,
    url: Url,
    title: String,
    markup: String,
    cookie_header: Option<String>,
    styles: Mutex<Vec<InjectedStyle>>,
    surfaces: Mutex<BTreeMap<u64, SurfaceInfo>>,
    next_handle: AtomicU64,
}

impl std::fmt::Debug for LivePage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivePage")
            .field("url", &self.url.as_str())
            .field("title", &self.title)
            .field("markup_len", &self.markup.len())
            .finish()
    }
}

impl LivePage {
    /// Wrap already-loaded markup. The title is read from `<title>`.
    pub fn new(url: &str, markup: impl Into<String>) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| Error::LoadError(format!("Invalid page URL {}: {}", url, e)))?;
        let markup = markup.into();
        let title = extract_title(&markup);
        Ok(Self {
            id: NEXT_PAGE_ID.fetch_add(1, Ordering::Relaxed),
            url,
            title,
            markup,
            cookie_header: None,
            styles: Mutex::new(Vec::new()),
            surfaces: Mutex::new(BTreeMap::new()),
            next_handle: AtomicU64::new(1),
        })
    }

    /// Override the title (e.g. the tab title reported by the browser).
    pub fn with_title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    /// Cookie header sent with same-origin subresource loads.
    pub fn with_cookies(mut self, cookie_header: &str) -> Self {
        self.cookie_header = Some(cookie_header.to_string());
        self
    }

    /// Process-unique identity of this page, independent of its URL.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn markup(&self) -> &str {
        &self.markup
    }

    pub fn cookie_header(&self) -> Option<&str> {
        self.cookie_header.as_deref()
    }

    /// Serialized origin, e.g. `https://example.com:8443`.
    pub fn origin(&self) -> String {
        self.url.origin().ascii_serialization()
    }

    /// Host name shown in the readable header; falls back to the full URL.
    pub fn host_label(&self) -> String {
        self.url
            .host_str()
            .map(|h| h.to_string())
            .unwrap_or_else(|| self.url.to_string())
    }

    /// Parse the page markup. The parsed tree is read-only.
    pub fn document(&self) -> Html {
        Html::parse_document(&self.markup)
    }

    pub(crate) fn inject_style(&self, css: &str) -> u64 {
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        lock(&self.styles).push(InjectedStyle {
            handle,
            css: css.to_string(),
        });
        handle
    }

    pub(crate) fn remove_style(&self, handle: u64) -> bool {
        let mut styles = lock(&self.styles);
        let before = styles.len();
        styles.retain(|s| s.handle != handle);
        styles.len() != before
    }

    /// Style sheets currently injected into the page, in injection order.
    pub fn injected_styles(&self) -> Vec<InjectedStyle> {
        lock(&self.styles).clone()
    }

    /// The page markup with injected style sheets appended to `<head>`.
    pub fn markup_with_injected_styles(&self) -> String {
        let styles = lock(&self.styles);
        if styles.is_empty() {
            return self.markup.clone();
        }
        let block: String = styles
            .iter()
            .map(|s| format!("<style data-rfexport=\"{}\">{}</style>", s.handle, s.css))
            .collect();
        match find_ascii_ci(&self.markup, "</head>") {
            Some(idx) => {
                let mut out = String::with_capacity(self.markup.len() + block.len());
                out.push_str(&self.markup[..idx]);
                out.push_str(&block);
                out.push_str(&self.markup[idx..]);
                out
            }
            None => format!("{}{}", block, self.markup),
        }
    }

    pub(crate) fn attach_surface(&self, width: u32) -> u64 {
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        lock(&self.surfaces).insert(handle, SurfaceInfo { handle, width });
        handle
    }

    pub(crate) fn detach_surface(&self, handle: u64) -> bool {
        lock(&self.surfaces).remove(&handle).is_some()
    }

    /// Render surfaces currently attached to the page.
    pub fn attached_surfaces(&self) -> Vec<SurfaceInfo> {
        lock(&self.surfaces).values().copied().collect()
    }
}

/// Reject pages the capture engine must not touch (browser-internal pages).
pub fn check_environment(page_url: &str) -> Result<()> {
    let lowered = page_url.trim().to_ascii_lowercase();
    if lowered.is_empty() {
        return Err(Error::EnvironmentRejected("no page URL".into()));
    }
    if PRIVILEGED_PREFIXES.iter().any(|p| lowered.starts_with(p)) {
        return Err(Error::EnvironmentRejected(format!(
            "browser-internal page {}",
            page_url
        )));
    }
    Ok(())
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn find_ascii_ci(haystack: &str, needle: &str) -> Option<usize> {
    haystack.to_ascii_lowercase().find(needle)
}

fn extract_title(markup: &str) -> String {
    let document = Html::parse_document(markup);
    let title_sel = Selector::parse("title").unwrap();
    document
        .select(&title_sel)
        .next()
        .map(|n| n.text().collect::<String>())
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .unwrap_or_default()
}
