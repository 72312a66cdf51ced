use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use log::info;
use rfexport::download::{DirectoryDownloader, DownloadHandoff, DownloadRequest};
use rfexport::settings::{JsonFileSettingsStore, SettingsStore};
use rfexport::{registry, CaptureEngine, CaptureMode, EngineConfig, ExportConfig, HttpFetcher, OutputFormat, Settings};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Original,
    Readable,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Image,
    Vector,
}

/// Export a web page to PDF
#[derive(Debug, Parser)]
#[command(name = "rfexport", version)]
struct Cli {
    /// Page to export
    url: String,

    /// Capture the whole page or only its main content
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Raster capture or native print
    #[arg(long, value_enum, default_value = "image")]
    format: FormatArg,

    /// Drop images from the export
    #[arg(long)]
    no_images: bool,

    /// Flatten links into plain text
    #[arg(long)]
    no_links: bool,

    /// Raster scale; values <= 0 use the default
    #[arg(long, default_value_t = 2.0)]
    scale: f32,

    /// JPEG quality in (0, 1]; anything else uses the default
    #[arg(long, default_value_t = 2.0)]
    quality: f32,

    /// Directory the PDF is saved into
    #[arg(long, default_value = ".")]
    out: PathBuf,

    /// Ask where to save the file
    #[arg(long)]
    save_as: bool,

    /// JSON settings file with defaultMode / includeImages / includeLinks
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Per-request network timeout
    #[arg(long, default_value_t = 30000)]
    timeout_ms: u64,
}

impl Cli {
    fn export_config(&self, settings: &Settings) -> ExportConfig {
        let mut config = ExportConfig::from_settings(settings);
        if let Some(mode) = self.mode {
            config.mode = match mode {
                ModeArg::Original => CaptureMode::Original,
                ModeArg::Readable => CaptureMode::Readable,
            };
        }
        config.format = match self.format {
            FormatArg::Image => OutputFormat::Image,
            FormatArg::Vector => OutputFormat::Vector,
        };
        if self.no_images {
            config.include_images = false;
        }
        if self.no_links {
            config.include_links = false;
        }
        config.scale = self.scale;
        config.quality = self.quality;
        config
    }
}

fn prompt_for_location(suggested: &Path) -> Option<PathBuf> {
    eprint!("Save as [{}]: ", suggested.display());
    io::stderr().flush().ok()?;
    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => {
            let answer = line.trim();
            if answer.is_empty() {
                Some(suggested.to_path_buf())
            } else {
                Some(PathBuf::from(answer))
            }
        }
    }
}

#[cfg(feature = "cdp")]
fn printer(config: &EngineConfig, out: &Path) -> anyhow::Result<Arc<dyn rfexport::PrintBackend>> {
    Ok(Arc::new(
        rfexport::cdp::CdpPrintBackend::new(config, out).context("failed to start headless Chrome")?,
    ))
}

#[cfg(not(feature = "cdp"))]
fn printer(_config: &EngineConfig, out: &Path) -> anyhow::Result<Arc<dyn rfexport::PrintBackend>> {
    Ok(Arc::new(rfexport::pdf::SnapshotPrintBackend::new(out)))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = match &cli.settings {
        Some(path) => JsonFileSettingsStore::new(path)
            .get_all()
            .with_context(|| format!("failed to read settings from {}", path.display()))?,
        None => Settings::default(),
    };
    let export = cli.export_config(&settings);

    let config = EngineConfig {
        fetch_timeout_ms: cli.timeout_ms,
        ..Default::default()
    };
    let fetcher = Arc::new(HttpFetcher::new(&config).context("failed to build HTTP client")?);
    let page = fetcher
        .load_page(&cli.url)
        .await
        .with_context(|| format!("failed to load {}", cli.url))?;
    info!("loaded {} ({})", page.url(), page.title());

    let printer = printer(&config, &cli.out)?;
    let installation = registry::install("cli", || {
        CaptureEngine::builder(config.clone())
            .fetcher(fetcher.clone())
            .printer(printer)
            .build()
    })
    .context("failed to set up capture engine")?;
    let engine = installation.engine();

    let response = engine
        .export_document(&page, &export, page.title(), page.url().as_str())
        .await;
    if !response.success {
        bail!(
            "export failed: {}",
            response.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }

    match (response.encoded_data, response.filename) {
        (Some(encoded_data), Some(filename)) => {
            let mut downloader = DirectoryDownloader::new(&cli.out);
            if cli.save_as {
                downloader = downloader.with_prompt(Box::new(prompt_for_location));
            }
            let request = DownloadRequest {
                encoded_data,
                filename,
                prompt_user_for_location: cli.save_as,
            };
            let id = downloader.download(&request).context("failed to save the PDF")?;
            println!("{} complete: {}", id, request.filename);
        }
        (None, Some(filename)) => println!("sent to print: {}", filename),
        _ => println!("done"),
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(e) = run(Cli::parse()).await {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
