//! Chrome DevTools Protocol print backend

use crate::filename::pdf_filename;
use crate::page::LivePage;
use crate::pdf::PrintBackend;
use crate::{EngineConfig, Error, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use headless_chrome::{Browser, LaunchOptions};
use log::{debug, info};
use std::path::{Path, PathBuf};

/// Prints pages to PDF through headless Chrome (uses the `headless_chrome` crate)
///
/// Each print opens a fresh tab on the page URL, re-applies the style sheets
/// injected into the `LivePage`, and saves Chrome's vector PDF into `out_dir`
/// under the page's export file name.
pub struct CdpPrintBackend {
    browser: Browser,
    out_dir: PathBuf,
    user_agent: String,
}

impl CdpPrintBackend {
    pub fn new(config: &EngineConfig, out_dir: impl Into<PathBuf>) -> Result<Self> {
        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .window_size(Some((config.surface_width, 900)))
            .build()
            .map_err(|e| Error::CdpError(format!("Failed to build launch options: {}", e)))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| Error::CdpError(format!("Failed to launch browser: {}", e)))?;

        Ok(Self {
            browser,
            out_dir: out_dir.into(),
            user_agent: config.user_agent.clone(),
        })
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }
}

/// Script appending one `<style>` element per injected sheet.
fn style_script(sheets: &[String]) -> Result<String> {
    let literal = serde_json::to_string(sheets)?;
    Ok(format!(
        "(function() {{
            for (const css of {}) {{
                const s = document.createElement('style');
                s.textContent = css;
                document.head.appendChild(s);
            }}
            return true;
        }})()",
        literal
    ))
}

fn print_blocking(browser: &Browser, user_agent: &str, url: &str, script: &str, target: &Path) -> Result<usize> {
    let tab = browser
        .new_tab()
        .map_err(|e| Error::CdpError(format!("Failed to create tab: {}", e)))?;
    tab.set_user_agent(user_agent, None, None)
        .map_err(|e| Error::CdpError(format!("Failed to set user agent: {}", e)))?;
    tab.navigate_to(url)
        .map_err(|e| Error::LoadError(format!("Navigation failed: {}", e)))?;
    tab.wait_until_navigated()
        .map_err(|e| Error::LoadError(format!("Wait for navigation failed: {}", e)))?;
    tab.evaluate(script, false)
        .map_err(|e| Error::CdpError(format!("Style injection failed: {}", e)))?;

    let pdf = tab
        .print_to_pdf(None)
        .map_err(|e| Error::CdpError(format!("Print failed: {}", e)))?;
    std::fs::write(target, &pdf)?;

    if let Err(e) = tab.close(true) {
        debug!("tab close failed: {}", e);
    }
    Ok(pdf.len())
}

impl PrintBackend for CdpPrintBackend {
    fn print<'a>(&'a self, page: &'a LivePage) -> BoxFuture<'a, Result<()>> {
        async move {
            let sheets: Vec<String> = page.injected_styles().into_iter().map(|s| s.css).collect();
            let script = style_script(&sheets)?;
            let target = self.out_dir.join(pdf_filename(page.title()));
            let url = page.url().to_string();
            let browser = self.browser.clone();
            let user_agent = self.user_agent.clone();
            tokio::fs::create_dir_all(&self.out_dir).await?;

            let written = {
                let target = target.clone();
                tokio::task::spawn_blocking(move || print_blocking(&browser, &user_agent, &url, &script, &target))
                    .await
                    .map_err(|e| Error::CdpError(format!("print task failed: {}", e)))??
            };
            info!("printed {} bytes to {}", written, target.display());
            Ok(())
        }
        .boxed()
    }
}
