//! Download handoff: persist an encoded artifact under a safe file name.

use crate::filename::{sanitize_filename, DEFAULT_STEM};
use crate::transfer::decode_data_url;
use crate::{Error, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// What the UI asks the host to download
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    pub encoded_data: String,
    pub filename: String,
    #[serde(default)]
    pub prompt_user_for_location: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DownloadId(pub u64);

impl fmt::Display for DownloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "download #{}", self.0)
    }
}

pub trait DownloadHandoff: Send + Sync {
    fn download(&self, request: &DownloadRequest) -> Result<DownloadId>;
}

/// Picks a save location for a suggested path; `None` cancels the download.
pub type LocationPrompt = Box<dyn Fn(&Path) -> Option<PathBuf> + Send + Sync>;

/// Writes downloads into a directory
///
/// Names are re-sanitized and never overwrite an existing file: a clash gets
/// a ` (n)` suffix before the extension.
pub struct DirectoryDownloader {
    dir: PathBuf,
    next_id: AtomicU64,
    prompt: Option<LocationPrompt>,
}

impl DirectoryDownloader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            next_id: AtomicU64::new(1),
            prompt: None,
        }
    }

    /// Consulted when a request asks to prompt for the location.
    pub fn with_prompt(mut self, prompt: LocationPrompt) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn target(&self, request: &DownloadRequest) -> Result<PathBuf> {
        let mut name = sanitize_filename(&request.filename);
        if name.is_empty() {
            name = format!("{}.pdf", DEFAULT_STEM);
        }
        let suggested = unique_path(&self.dir, &name);
        if !request.prompt_user_for_location {
            return Ok(suggested);
        }
        match &self.prompt {
            Some(prompt) => prompt(&suggested).ok_or(Error::Cancelled),
            None => Ok(suggested),
        }
    }
}

impl fmt::Debug for DirectoryDownloader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryDownloader")
            .field("dir", &self.dir)
            .field("prompt", &self.prompt.is_some())
            .finish()
    }
}

impl DownloadHandoff for DirectoryDownloader {
    fn download(&self, request: &DownloadRequest) -> Result<DownloadId> {
        let bytes = decode_data_url(&request.encoded_data)?;
        let target = self.target(request)?;
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, &bytes)?;
        let id = DownloadId(self.next_id.fetch_add(1, Ordering::Relaxed));
        info!("{}: saved {} bytes to {}", id, bytes.len(), target.display());
        Ok(id)
    }
}

/// First free `name`, `name (1)`, `name (2)`, ... in `dir`.
fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match name.rfind('.') {
        Some(i) if i > 0 => (&name[..i], &name[i..]),
        _ => (name, ""),
    };
    let mut n = 1;
    loop {
        let candidate = dir.join(format!("{} ({}){}", stem, n, ext));
        if !candidate.exists() {
            debug!("{} exists, using {}", name, candidate.display());
            return candidate;
        }
        n += 1;
    }
}
