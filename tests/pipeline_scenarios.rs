//! End-to-end capture runs against in-memory pages and assets

use futures::future::BoxFuture;
use futures::FutureExt;
use image::{DynamicImage, RgbImage};
use lopdf::{Document, Object};
use rfexport::assets::LeftRemoteReason;
use rfexport::transfer::decode_data_url;
use rfexport::{
    AssetFetcher, AssetOutcome, CancelToken, CaptureEngine, CaptureMode, CaptureOutcome, CaptureRequest,
    CaptureState, ContentSelector, DocumentSanitizer, EngineConfig, Error, ExportConfig, LivePage,
    MemoryFetcher, OutputFormat, PrintBackend, VirtualClock,
};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const STORY: &str = r#"<html><head><title>Story</title></head><body>
<nav>menu</nav>
<div class="ads">buy now</div>
<article>
  <h2>Headline</h2>
  <p>Body text of the story.</p>
  <img src="/a.png">
  <img src="https://news.test/b.png">
  <aside>related</aside>
</article>
<footer>footer</footer>
</body></html>"#;

fn png(w: u32, h: u32, rgb: [u8; 3]) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, image::Rgb(rgb)));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

fn story_fetcher() -> Arc<MemoryFetcher> {
    Arc::new(
        MemoryFetcher::new()
            .with_body("https://news.test/a.png", "image/png", png(120, 60, [220, 0, 0]))
            .with_body("https://news.test/b.png", "image/png", png(80, 40, [220, 0, 0])),
    )
}

struct Harness {
    engine: CaptureEngine,
    clock: VirtualClock,
    states: Arc<Mutex<Vec<CaptureState>>>,
}

fn harness(fetcher: Arc<dyn AssetFetcher>, printer: Option<Arc<dyn PrintBackend>>) -> Harness {
    let clock = VirtualClock::new();
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = states.clone();
    let mut builder = CaptureEngine::builder(EngineConfig::default())
        .fetcher(fetcher)
        .clock(Arc::new(clock.clone()))
        .on_state(move |s| sink.lock().unwrap().push(s));
    if let Some(printer) = printer {
        builder = builder.printer(printer);
    }
    Harness {
        engine: builder.build().unwrap(),
        clock,
        states,
    }
}

fn image_config(mode: CaptureMode) -> ExportConfig {
    ExportConfig {
        mode,
        format: OutputFormat::Image,
        scale: 1.0,
        ..Default::default()
    }
}

/// Decode every JPEG page image of a PDF.
fn page_images(pdf: &[u8]) -> Vec<RgbImage> {
    let doc = Document::load_mem(pdf).unwrap();
    doc.objects
        .values()
        .filter_map(|obj| match obj {
            Object::Stream(s) if matches!(s.dict.get(b"Subtype"), Ok(Object::Name(n)) if n == b"Image") => {
                Some(image::load_from_memory(&s.content).unwrap().to_rgb8())
            }
            _ => None,
        })
        .collect()
}

fn has_red(images: &[RgbImage]) -> bool {
    images
        .iter()
        .any(|img| img.pixels().any(|p| p.0[0] > 180 && p.0[1] < 70 && p.0[2] < 70))
}

/// Records print calls and the style sheets present at print time
#[derive(Default)]
struct RecordingPrinter {
    printed: Mutex<Vec<(String, Vec<String>)>>,
}

impl PrintBackend for RecordingPrinter {
    fn print<'a>(&'a self, page: &'a LivePage) -> BoxFuture<'a, rfexport::Result<()>> {
        async move {
            tokio::task::yield_now().await;
            let styles = page.injected_styles().into_iter().map(|s| s.css).collect();
            self.printed.lock().unwrap().push((page.url().to_string(), styles));
            Ok(())
        }
        .boxed()
    }
}

/// Cancels the run as soon as anything is fetched, then never answers
struct CancellingFetcher {
    cancel: CancelToken,
}

impl AssetFetcher for CancellingFetcher {
    fn fetch(&self, _request: rfexport::assets::FetchRequest) -> BoxFuture<'_, rfexport::Result<rfexport::assets::FetchedAsset>> {
        self.cancel.cancel();
        futures::future::pending().boxed()
    }
}

#[tokio::test]
async fn readable_image_export_of_semantic_root() {
    let page = LivePage::new("https://news.test/story", STORY).unwrap();
    let fetcher = story_fetcher();
    let h = harness(fetcher.clone(), None);

    let request = CaptureRequest::new(&image_config(CaptureMode::Readable), page.title(), page.url().as_str());
    let outcome = h.engine.capture(&page, &request, CancelToken::new()).await.unwrap();
    let (payload, report) = match outcome {
        CaptureOutcome::Encoded { payload, inline_report, .. } => (payload, inline_report),
        other => panic!("expected an encoded artifact, got {:?}", other),
    };

    assert_eq!(payload.filename, "Story.pdf");
    let pdf = decode_data_url(&payload.encoded_data).unwrap();
    assert!(pdf.starts_with(b"%PDF-"));
    assert!(has_red(&page_images(&pdf)));

    // both images are same-origin: referenced unchanged, never fetched with CORS
    assert_eq!(report.inlined_count(), 0);
    assert_eq!(report.outcome_for("https://news.test/a.png"), Some(&AssetOutcome::SameOrigin));
    assert_eq!(report.outcome_for("https://news.test/b.png"), Some(&AssetOutcome::SameOrigin));
    assert!(fetcher
        .requests()
        .iter()
        .all(|r| r.mode == rfexport::assets::RequestMode::NoCors));

    assert_eq!(
        *h.states.lock().unwrap(),
        vec![
            CaptureState::Selecting,
            CaptureState::Sanitizing,
            CaptureState::Inlining,
            CaptureState::Rendering,
            CaptureState::Assembling,
            CaptureState::Encoding,
            CaptureState::Done,
        ]
    );
    let requested = h.clock.requested();
    assert_eq!(requested.first(), Some(&Duration::from_millis(500)));
    assert!(requested.contains(&Duration::from_millis(100)));
    assert!(page.attached_surfaces().is_empty());
    assert!(page.markup().contains("<nav>menu</nav>"));
}

#[test]
fn readable_container_structure() {
    let page = LivePage::new("https://news.test/story", STORY).unwrap();
    let mut content = ContentSelector::new().select(&page, CaptureMode::Readable);
    let sanitizer = DocumentSanitizer::new(CaptureMode::Readable, true, true);
    sanitizer.sanitize(&mut content);
    let html = sanitizer.wrap(content, &page).outer_html();

    assert!(html.contains("max-width: 800px"));
    assert!(html.contains("Story"));
    assert!(html.contains("news.test"));
    assert!(html.contains("Headline"));
    assert!(html.contains(r#"src="/a.png""#));
    assert!(html.contains(r#"src="https://news.test/b.png""#));
    for gone in ["menu", "buy now", "related", "footer"] {
        assert!(!html.contains(gone), "{} survived sanitizing", gone);
    }
}

#[tokio::test]
async fn unreachable_cross_origin_image_stays_remote() {
    let markup = r#"<html><head><title>Gallery</title></head><body>
        <p>Look</p><img src="https://cdn.other/pic.png"></body></html>"#;
    let page = LivePage::new("https://site.test/gallery", markup).unwrap();
    let fetcher = Arc::new(MemoryFetcher::new().with_stalled("https://cdn.other/pic.png"));
    let h = harness(fetcher.clone(), None);

    let request = CaptureRequest::new(&image_config(CaptureMode::Original), page.title(), page.url().as_str());
    let outcome = h.engine.capture(&page, &request, CancelToken::new()).await.unwrap();
    let report = match outcome {
        CaptureOutcome::Encoded { inline_report, byte_size, .. } => {
            assert!(byte_size > 0);
            inline_report
        }
        other => panic!("expected an encoded artifact, got {:?}", other),
    };

    assert_eq!(
        report.outcome_for("https://cdn.other/pic.png"),
        Some(&AssetOutcome::LeftRemote(LeftRemoteReason::TimedOut(10000)))
    );
    let requested = h.clock.requested();
    assert!(requested.contains(&Duration::from_millis(10000)));
    assert!(requested.contains(&Duration::from_millis(2000)));
    // one CORS attempt while inlining, one plain load on the surface
    assert_eq!(fetcher.requests().len(), 2);
    assert_eq!(h.states.lock().unwrap().last(), Some(&CaptureState::Done));
}

#[tokio::test]
async fn reachable_cross_origin_image_is_inlined() {
    let markup = r#"<html><head><title>Gallery</title></head><body>
        <img src="https://cdn.other/pic.png" srcset="https://cdn.other/pic@2x.png 2x"></body></html>"#;
    let page = LivePage::new("https://site.test/gallery", markup).unwrap();
    let fetcher = Arc::new(MemoryFetcher::new().with_body("https://cdn.other/pic.png", "image/png", png(50, 50, [220, 0, 0])));
    let h = harness(fetcher.clone(), None);

    let request = CaptureRequest::new(&image_config(CaptureMode::Original), page.title(), page.url().as_str());
    let outcome = h.engine.capture(&page, &request, CancelToken::new()).await.unwrap();
    match outcome {
        CaptureOutcome::Encoded { inline_report, payload, .. } => {
            assert_eq!(inline_report.inlined_count(), 1);
            assert!(has_red(&page_images(&decode_data_url(&payload.encoded_data).unwrap())));
        }
        other => panic!("expected an encoded artifact, got {:?}", other),
    }
    // the surface drew the embedded copy; only the inlining fetch went out
    assert_eq!(fetcher.requests().len(), 1);
    assert_eq!(fetcher.requests()[0].credentials, rfexport::assets::Credentials::Omit);
}

#[tokio::test]
async fn title_becomes_a_safe_filename() {
    let page = LivePage::new("https://site.test/r", "<html><body><p>numbers</p></body></html>").unwrap();
    let h = harness(Arc::new(MemoryFetcher::new()), None);
    let response = h
        .engine
        .export_document(&page, &image_config(CaptureMode::Original), "Report: Q1/Q2 <Draft>", page.url().as_str())
        .await;
    assert!(response.success);
    assert_eq!(response.filename.as_deref(), Some("Report_ Q1_Q2 _Draft_.pdf"));
    assert!(response
        .encoded_data
        .unwrap()
        .starts_with("data:application/pdf;base64,"));
}

#[tokio::test]
async fn vector_export_only_prints() {
    let page = LivePage::new("https://news.test/story", STORY).unwrap();
    let fetcher = story_fetcher();
    let printer = Arc::new(RecordingPrinter::default());
    let h = harness(fetcher.clone(), Some(printer.clone()));

    let config = ExportConfig {
        format: OutputFormat::Vector,
        include_images: false,
        ..Default::default()
    };
    let response = h.engine.export_document(&page, &config, page.title(), page.url().as_str()).await;
    assert!(response.success);
    assert!(response.encoded_data.is_none());
    assert_eq!(response.filename.as_deref(), Some("Story.pdf"));

    let printed = printer.printed.lock().unwrap();
    assert_eq!(printed.len(), 1);
    assert!(printed[0].1[0].contains("@page"));
    assert!(printed[0].1[0].contains("display: none !important;"));
    assert!(page.injected_styles().is_empty());

    // no inlining, no surface
    assert!(fetcher.requests().is_empty());
    assert!(page.attached_surfaces().is_empty());
    assert_eq!(*h.states.lock().unwrap(), vec![CaptureState::Done]);
    assert_eq!(
        h.clock.requested(),
        vec![Duration::from_millis(500), Duration::from_millis(1000)]
    );
}

#[tokio::test]
async fn excluded_images_are_hidden_not_drawn() {
    let page = LivePage::new("https://news.test/story", STORY).unwrap();
    let h = harness(story_fetcher(), None);
    let config = ExportConfig {
        include_images: false,
        ..image_config(CaptureMode::Original)
    };
    let response = h.engine.export_document(&page, &config, page.title(), page.url().as_str()).await;
    assert!(response.success, "{:?}", response.error);
    let pdf = decode_data_url(response.encoded_data.as_deref().unwrap()).unwrap();
    let images = page_images(&pdf);
    assert!(!images.is_empty());
    assert!(!has_red(&images));

    // the nodes are still there, only hidden
    let mut content = ContentSelector::new().select(&page, CaptureMode::Original);
    DocumentSanitizer::new(CaptureMode::Original, false, true).sanitize(&mut content);
    let imgs: Vec<_> = content.descendants().filter(|e| e.tag == "img").collect();
    assert_eq!(imgs.len(), 2);
    assert!(imgs.iter().all(|e| e.is_hidden()));
}

#[tokio::test]
async fn overlapping_runs_on_one_page_are_rejected() {
    let page = LivePage::new("https://news.test/story", STORY).unwrap();
    let printer = Arc::new(RecordingPrinter::default());
    let h = harness(story_fetcher(), Some(printer.clone()));
    let config = ExportConfig {
        format: OutputFormat::Vector,
        ..Default::default()
    };

    let (first, second) = futures::join!(
        h.engine.export_document(&page, &config, page.title(), page.url().as_str()),
        h.engine.export_document(&page, &config, page.title(), page.url().as_str()),
    );
    assert!(first.success);
    assert!(!second.success);
    assert!(second.error.unwrap().contains("already in progress"));
    assert_eq!(printer.printed.lock().unwrap().len(), 1);
    assert_eq!(h.engine.in_flight_count(), 0);
}

#[tokio::test]
async fn overlap_is_detected_per_page_not_per_url_string() {
    let page = LivePage::new("https://a.test/", STORY).unwrap();
    let printer = Arc::new(RecordingPrinter::default());
    let h = harness(story_fetcher(), Some(printer.clone()));
    let config = ExportConfig {
        format: OutputFormat::Vector,
        ..Default::default()
    };

    let (first, second) = futures::join!(
        h.engine.export_document(&page, &config, page.title(), "https://a.test/"),
        h.engine.export_document(&page, &config, page.title(), "https://a.test/#x"),
    );
    assert!(first.success);
    assert!(!second.success);
    let printed = printer.printed.lock().unwrap();
    assert_eq!(printed.len(), 1);
    // only the running capture's print sheet was on the page
    assert_eq!(printed[0].1.len(), 1);
    assert!(page.injected_styles().is_empty());
}

#[tokio::test]
async fn cancellation_during_render_detaches_surface() {
    let page = LivePage::new("https://news.test/story", STORY).unwrap();
    let cancel = CancelToken::new();
    let h = harness(Arc::new(CancellingFetcher { cancel: cancel.clone() }), None);

    let response = h
        .engine
        .export_document_with_cancel(&page, &image_config(CaptureMode::Readable), page.title(), page.url().as_str(), cancel)
        .await;
    assert!(!response.success);
    assert_eq!(response.error.as_deref(), Some("Capture cancelled"));
    assert!(page.attached_surfaces().is_empty());

    let states = h.states.lock().unwrap();
    assert!(states.contains(&CaptureState::Rendering));
    assert_eq!(states.last(), Some(&CaptureState::Failed));
    assert!(!states.contains(&CaptureState::Assembling));
}

#[tokio::test]
async fn internal_pages_are_rejected_before_anything_runs() {
    let page = LivePage::new("chrome://settings", "<html><body>prefs</body></html>").unwrap();
    let fetcher = Arc::new(MemoryFetcher::new());
    let h = harness(fetcher.clone(), None);
    let request = CaptureRequest::new(&ExportConfig::default(), "Settings", "chrome://settings");
    let res = h.engine.capture(&page, &request, CancelToken::new()).await;
    assert!(matches!(res, Err(Error::EnvironmentRejected(_))));
    assert!(h.states.lock().unwrap().is_empty());
    assert!(h.clock.requested().is_empty());

    let response = h
        .engine
        .export_document(&page, &ExportConfig::default(), "Settings", "about:blank")
        .await;
    assert!(!response.success);
    assert!(response.error.unwrap().starts_with("Page cannot be exported"));
}

#[test]
fn ping_answers() {
    let h = harness(Arc::new(MemoryFetcher::new()), None);
    assert!(h.engine.ping().success);
}
