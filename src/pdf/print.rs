//! Vector export through the native print pipeline.

use crate::filename::pdf_filename;
use crate::page::LivePage;
use crate::wait::Waiter;
use crate::{Error, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

/// Native print pipeline of the host
pub trait PrintBackend: Send + Sync {
    /// Print the page as it currently stands, injected style sheets included.
    fn print<'a>(&'a self, page: &'a LivePage) -> BoxFuture<'a, Result<()>>;
}

/// Print style sheet for the vector path.
pub fn print_css(include_images: bool) -> String {
    let image_rule = if include_images {
        ""
    } else {
        "display: none !important;"
    };
    format!(
        "@media print {{
  @page {{ size: auto; margin: 10mm; }}
  * {{ -webkit-print-color-adjust: exact !important; print-color-adjust: exact !important; }}
  html, body {{ width: 100% !important; height: auto !important; overflow: visible !important; background: white !important; }}
  body {{ font-size: 12pt !important; line-height: 1.5 !important; }}
  div, section, article, main, p, ul, ol, li, table, figure {{ break-inside: avoid !important; page-break-inside: avoid !important; }}
  img {{ max-width: 100% !important; height: auto !important; page-break-inside: avoid !important; {} }}
  nav, header, footer, aside, .ad, .ads, .advertisement, .social-share, .comments,
  [role=\"navigation\"], [role=\"banner\"], [role=\"complementary\"],
  script, style, noscript, iframe {{ display: none !important; }}
}}",
        image_rule
    )
}

/// Scoped print style sheet; removed from the page on drop.
pub struct PrintStyleGuard<'p> {
    page: &'p LivePage,
    handle: u64,
}

impl<'p> PrintStyleGuard<'p> {
    pub fn inject(page: &'p LivePage, css: &str) -> Self {
        let handle = page.inject_style(css);
        debug!("injected print styles ({})", handle);
        Self { page, handle }
    }

    pub fn handle(&self) -> u64 {
        self.handle
    }
}

impl Drop for PrintStyleGuard<'_> {
    fn drop(&mut self) {
        if self.page.remove_style(self.handle) {
            debug!("removed print styles ({})", self.handle);
        }
    }
}

/// Inject the print style sheet, wait `settle_ms`, print, wait `cleanup_ms`.
///
/// The style sheet is removed on every exit path.
pub async fn print_page(
    page: &LivePage,
    backend: &dyn PrintBackend,
    include_images: bool,
    waiter: &Waiter,
    settle_ms: u64,
    cleanup_ms: u64,
) -> Result<()> {
    let _guard = PrintStyleGuard::inject(page, &print_css(include_images));
    waiter.settle(settle_ms).await?;
    backend.print(page).await?;
    info!("print dispatched for {}", page.url());
    if let Err(e) = waiter.settle(cleanup_ms).await {
        // printing already happened; only the cleanup delay was cut short
        warn!("print cleanup interrupted: {}", e);
    }
    Ok(())
}

/// Writes the print-ready document into a directory
///
/// The output is the page markup with the print style sheet applied, named
/// after the page title, so any browser can turn it into a PDF.
#[derive(Debug, Clone)]
pub struct SnapshotPrintBackend {
    out_dir: PathBuf,
}

impl SnapshotPrintBackend {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Where a print of `page` is written.
    pub fn target_for(&self, page: &LivePage) -> PathBuf {
        let name = pdf_filename(page.title());
        let stem = name.trim_end_matches(".pdf");
        self.out_dir.join(format!("{}.print.html", stem))
    }
}

impl PrintBackend for SnapshotPrintBackend {
    fn print<'a>(&'a self, page: &'a LivePage) -> BoxFuture<'a, Result<()>> {
        async move {
            let target = self.target_for(page);
            tokio::fs::create_dir_all(&self.out_dir).await?;
            tokio::fs::write(&target, page.markup_with_injected_styles())
                .await
                .map_err(|e| Error::RenderError(format!("failed to write {}: {}", target.display(), e)))?;
            info!("print snapshot written to {}", target.display());
            Ok(())
        }
        .boxed()
    }
}
