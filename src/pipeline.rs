//! The capture engine
//!
//! `CaptureEngine` drives one capture per call: environment check, then either
//! the vector path (print the live page) or the image path (select, sanitize,
//! inline, render, assemble, encode). Every wait goes through a per-run
//! `Waiter`, so a run can be cancelled at any suspension point. At most one
//! run per `LivePage` is in flight; overlapping requests get `Error::Busy`.

use crate::assets::{AssetFetcher, AssetInliner, InlineReport};
use crate::filename::pdf_filename;
use crate::page::{check_environment, LivePage};
use crate::pdf::{print_page, PdfAssembler, PrintBackend, SnapshotPrintBackend};
use crate::rendering::OffscreenRenderer;
use crate::sanitize::DocumentSanitizer;
use crate::select::ContentSelector;
use crate::transfer::{TransferEncoder, TransferPayload};
use crate::wait::{CancelToken, Clock, TokioClock, Waiter};
use crate::{CaptureRequest, EngineConfig, Error, ExportConfig, ExportResponse, OutputFormat, PingResponse, Result};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

type StateObserver = Arc<dyn Fn(CaptureState) + Send + Sync>;

/// Progress of one capture run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureState {
    Idle,
    Selecting,
    Sanitizing,
    Inlining,
    Rendering,
    Assembling,
    Encoding,
    Done,
    Failed,
}

impl CaptureState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CaptureState::Done | CaptureState::Failed)
    }
}

/// Result of a successful run
#[derive(Debug, Clone)]
pub enum CaptureOutcome {
    /// Image path: the encoded PDF
    Encoded {
        payload: TransferPayload,
        inline_report: InlineReport,
        byte_size: usize,
    },
    /// Vector path: handed to the print pipeline, nothing to transfer
    Printed { filename: String },
}

impl CaptureOutcome {
    pub fn into_response(self) -> ExportResponse {
        match self {
            CaptureOutcome::Encoded { payload, .. } => ExportResponse::encoded(payload),
            CaptureOutcome::Printed { filename } => ExportResponse::printed(filename),
        }
    }
}

/// Builder for `CaptureEngine`
pub struct CaptureEngineBuilder {
    config: EngineConfig,
    fetcher: Option<Arc<dyn AssetFetcher>>,
    printer: Option<Arc<dyn PrintBackend>>,
    clock: Option<Arc<dyn Clock>>,
    on_state: Option<StateObserver>,
}

impl CaptureEngineBuilder {
    /// Network access for inlining and surface image loads. Defaults to an
    /// `HttpFetcher` when the `http` feature is enabled.
    pub fn fetcher(mut self, fetcher: Arc<dyn AssetFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Native print pipeline for vector exports. Defaults to a
    /// `SnapshotPrintBackend` writing into the system temp directory.
    pub fn printer(mut self, printer: Arc<dyn PrintBackend>) -> Self {
        self.printer = Some(printer);
        self
    }

    /// Clock behind every settle delay and timeout. Defaults to `TokioClock`.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Observe state transitions of every run.
    pub fn on_state<F>(mut self, f: F) -> Self
    where
        F: Fn(CaptureState) + Send + Sync + 'static,
    {
        self.on_state = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> Result<CaptureEngine> {
        self.config.validate()?;
        let fetcher = match self.fetcher {
            Some(f) => f,
            None => default_fetcher(&self.config)?,
        };
        let printer = self
            .printer
            .unwrap_or_else(|| Arc::new(SnapshotPrintBackend::new(std::env::temp_dir().join("rfexport"))));
        let clock = self.clock.unwrap_or_else(|| Arc::new(TokioClock));

        Ok(CaptureEngine {
            inliner: AssetInliner::new(fetcher.clone(), self.config.asset_timeout_ms),
            renderer: OffscreenRenderer::new(fetcher, &self.config),
            assembler: PdfAssembler::new(self.config.page.clone()),
            selector: ContentSelector::new(),
            encoder: TransferEncoder::new(),
            printer,
            clock,
            on_state: self.on_state,
            in_flight: Mutex::new(HashSet::new()),
            config: self.config,
        })
    }
}

#[cfg(feature = "http")]
fn default_fetcher(config: &EngineConfig) -> Result<Arc<dyn AssetFetcher>> {
    Ok(Arc::new(crate::http::HttpFetcher::new(config)?))
}

#[cfg(not(feature = "http"))]
fn default_fetcher(_config: &EngineConfig) -> Result<Arc<dyn AssetFetcher>> {
    Err(Error::ConfigError(
        "no asset fetcher configured (enable the `http` feature or call `fetcher`)".into(),
    ))
}

/// Capture engine bound to one configuration
pub struct CaptureEngine {
    config: EngineConfig,
    selector: ContentSelector,
    inliner: AssetInliner,
    renderer: OffscreenRenderer,
    assembler: PdfAssembler,
    encoder: TransferEncoder,
    printer: Arc<dyn PrintBackend>,
    clock: Arc<dyn Clock>,
    on_state: Option<StateObserver>,
    in_flight: Mutex<HashSet<u64>>,
}

impl std::fmt::Debug for CaptureEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureEngine")
            .field("config", &self.config)
            .field("in_flight", &self.in_flight_count())
            .finish()
    }
}

impl CaptureEngine {
    pub fn builder(config: EngineConfig) -> CaptureEngineBuilder {
        CaptureEngineBuilder {
            config,
            fetcher: None,
            printer: None,
            clock: None,
            on_state: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Liveness check.
    pub fn ping(&self) -> PingResponse {
        PingResponse { success: true }
    }

    /// Number of runs currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Export `page` and fold the result into a response. Never fails; errors
    /// become `{success: false, error}`.
    pub async fn export_document(
        &self,
        page: &LivePage,
        config: &ExportConfig,
        page_title: &str,
        page_url: &str,
    ) -> ExportResponse {
        self.export_document_with_cancel(page, config, page_title, page_url, CancelToken::new())
            .await
    }

    /// `export_document` with a caller-held cancel token.
    pub async fn export_document_with_cancel(
        &self,
        page: &LivePage,
        config: &ExportConfig,
        page_title: &str,
        page_url: &str,
        cancel: CancelToken,
    ) -> ExportResponse {
        let request = CaptureRequest::new(config, page_title, page_url);
        match self.capture(page, &request, cancel).await {
            Ok(outcome) => outcome.into_response(),
            Err(e) => {
                warn!("export of {} failed: {}", page_url, e);
                ExportResponse::failure(&e)
            }
        }
    }

    /// Run one capture.
    pub async fn capture(
        &self,
        page: &LivePage,
        request: &CaptureRequest,
        cancel: CancelToken,
    ) -> Result<CaptureOutcome> {
        check_environment(&request.page_url)?;
        let _flight = FlightGuard::acquire(&self.in_flight, page)?;
        let waiter = Waiter::new(self.clock.clone(), cancel);
        let mut tracker = StateTracker::new(self.on_state.clone());
        info!(
            "capturing {} ({:?}, {:?})",
            request.page_url, request.mode, request.format
        );

        let result = match request.format {
            OutputFormat::Vector => self.capture_vector(page, request, &waiter).await,
            OutputFormat::Image => self.capture_image(page, request, &waiter, &mut tracker).await,
        };
        match &result {
            Ok(_) => tracker.enter(CaptureState::Done),
            Err(e) => {
                debug!("run failed in state {:?}: {}", tracker.current(), e);
                tracker.enter(CaptureState::Failed);
            }
        }
        result
    }

    async fn capture_vector(
        &self,
        page: &LivePage,
        request: &CaptureRequest,
        waiter: &Waiter,
    ) -> Result<CaptureOutcome> {
        print_page(
            page,
            self.printer.as_ref(),
            request.include_images,
            waiter,
            self.config.print_settle_ms,
            self.config.print_cleanup_ms,
        )
        .await?;
        Ok(CaptureOutcome::Printed {
            filename: pdf_filename(&request.page_title),
        })
    }

    async fn capture_image(
        &self,
        page: &LivePage,
        request: &CaptureRequest,
        waiter: &Waiter,
        tracker: &mut StateTracker,
    ) -> Result<CaptureOutcome> {
        tracker.enter(CaptureState::Selecting);
        let mut content = self.selector.select(page, request.mode);
        waiter.check()?;

        tracker.enter(CaptureState::Sanitizing);
        let sanitizer = DocumentSanitizer::new(request.mode, request.include_images, request.include_links);
        sanitizer.sanitize(&mut content);
        // wrap in the readable or export container
        let mut root = sanitizer.wrap(content, page);

        tracker.enter(CaptureState::Inlining);
        // cross-origin stylesheets and images become data: URIs where CORS allows
        let inline_report = self
            .inliner
            .inline(&mut root, page.url(), &page.origin(), waiter)
            .await?;
        waiter.settle(self.config.post_inline_settle_ms).await?;

        tracker.enter(CaptureState::Rendering);
        // mount offscreen; image loads and settles happen inside
        let surface = self.renderer.mount(page, &root, waiter).await?;

        tracker.enter(CaptureState::Assembling);
        let artifact = self.assembler.capture(&surface, request.scale, request.quality)?;
        // detach before encoding
        drop(surface);
        waiter.check()?;

        tracker.enter(CaptureState::Encoding);
        let payload = self.encoder.encode(&artifact, &request.page_title)?;
        info!(
            "exported {} as {} ({} bytes)",
            request.page_url, payload.filename, artifact.byte_size
        );
        Ok(CaptureOutcome::Encoded {
            payload,
            inline_report,
            byte_size: artifact.byte_size,
        })
    }
}

struct StateTracker {
    current: CaptureState,
    observer: Option<StateObserver>,
}

impl StateTracker {
    fn new(observer: Option<StateObserver>) -> Self {
        Self {
            current: CaptureState::Idle,
            observer,
        }
    }

    fn current(&self) -> CaptureState {
        self.current
    }

    fn enter(&mut self, next: CaptureState) {
        if self.current.is_terminal() {
            return;
        }
        debug!("capture state {:?} -> {:?}", self.current, next);
        self.current = next;
        if let Some(cb) = &self.observer {
            cb(next);
        }
    }
}

/// Marks a page as busy for the lifetime of the guard.
struct FlightGuard<'a> {
    set: &'a Mutex<HashSet<u64>>,
    page_id: u64,
}

impl<'a> FlightGuard<'a> {
    fn acquire(set: &'a Mutex<HashSet<u64>>, page: &LivePage) -> Result<Self> {
        let mut flights = set.lock().unwrap_or_else(PoisonError::into_inner);
        if !flights.insert(page.id()) {
            return Err(Error::Busy(page.url().to_string()));
        }
        Ok(Self {
            set,
            page_id: page.id(),
        })
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.page_id);
    }
}
