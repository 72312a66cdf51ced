//! Offscreen rendering
//!
//! A `RenderSurface` is an isolated, fixed-width surface attached to the live
//! page for the duration of one capture. It holds a private copy of the
//! sanitized markup, parsed back into its own tree, plus the decoded images.
//! Dropping the surface detaches it from the page.

pub mod font;
pub mod layout;
pub mod paint;
pub mod raster;

use crate::assets::{decode_data_uri, is_embedded, AssetFetcher, Credentials, FetchRequest, RequestMode};
use crate::dom::ElementNode;
use crate::page::LivePage;
use crate::wait::Waiter;
use crate::{EngineConfig, Error, Result};
use image::{DynamicImage, GenericImageView, RgbImage};
use layout::{IntrinsicImage, Layout};
use log::{debug, info, warn};
use paint::PaintCommand;
use scraper::{Html, Selector};
use std::sync::Arc;

/// Base style sheet of every surface document.
const SURFACE_CSS: &str = "* { box-sizing: border-box; margin: 0; padding: 0; } \
     body { padding: 20px; background: white; color: #333; \
     font-family: -apple-system, BlinkMacSystemFont, \"Segoe UI\", Roboto, sans-serif; \
     font-size: 14px; line-height: 1.6; } \
     img { max-width: 100%; height: auto; }";

/// Load state of one image on a surface
#[derive(Debug, Clone)]
pub enum ImageState {
    Loaded(DynamicImage),
    Failed(String),
    TimedOut,
}

impl ImageState {
    pub fn is_loaded(&self) -> bool {
        matches!(self, ImageState::Loaded(_))
    }
}

/// A distinct image source on a surface and how it loaded
#[derive(Debug, Clone)]
pub struct SurfaceImage {
    pub src: String,
    pub state: ImageState,
}

/// Builds render surfaces for one engine
pub struct OffscreenRenderer {
    fetcher: Arc<dyn AssetFetcher>,
    width: u32,
    image_timeout_ms: u64,
    init_settle_ms: u64,
    post_load_settle_ms: u64,
}

impl OffscreenRenderer {
    pub fn new(fetcher: Arc<dyn AssetFetcher>, config: &EngineConfig) -> Self {
        Self {
            fetcher,
            width: config.surface_width,
            image_timeout_ms: config.image_timeout_ms,
            init_settle_ms: config.init_settle_ms,
            post_load_settle_ms: config.post_load_settle_ms,
        }
    }

    /// Attach a surface to `page`, write `root` into it and wait until it is
    /// visually settled: the initialization delay, every image loaded, failed
    /// or timed out, then the post-load delay.
    ///
    /// The surface is detached again if any step fails.
    pub async fn mount<'p>(
        &self,
        page: &'p LivePage,
        root: &ElementNode,
        waiter: &Waiter,
    ) -> Result<RenderSurface<'p>> {
        let handle = page.attach_surface(self.width);
        let mut surface = RenderSurface {
            page,
            handle,
            width: self.width,
            markup: String::new(),
            body: ElementNode::new("body"),
            images: Vec::new(),
        };
        debug!("attached render surface {} ({} wide)", handle, self.width);

        waiter.settle(self.init_settle_ms).await?;

        surface.markup = surface_document(root);
        surface.body = parse_body(&surface.markup);

        let mut sources: Vec<String> = Vec::new();
        for img in surface.body.descendants().filter(|e| e.tag == "img") {
            if let Some(src) = img.attr("src").filter(|s| !s.trim().is_empty()) {
                if !sources.iter().any(|s| s == src) {
                    sources.push(src.to_string());
                }
            }
        }

        let loads = sources.iter().map(|src| async move {
            let state = match waiter.race(self.load_image(page, src), self.image_timeout_ms).await {
                Some(Ok(img)) => ImageState::Loaded(img),
                Some(Err(e)) => ImageState::Failed(e.to_string()),
                None => ImageState::TimedOut,
            };
            SurfaceImage {
                src: src.clone(),
                state,
            }
        });
        surface.images = futures::future::join_all(loads).await;
        waiter.check()?;

        for img in surface.images.iter() {
            match &img.state {
                ImageState::Loaded(_) => {}
                ImageState::Failed(e) => warn!("image {} failed to load: {}", img.src, e),
                ImageState::TimedOut => warn!("image {} timed out after {}ms", img.src, self.image_timeout_ms),
            }
        }

        waiter.settle(self.post_load_settle_ms).await?;
        info!(
            "surface {} settled ({} of {} images loaded)",
            handle,
            surface.images.iter().filter(|i| i.state.is_loaded()).count(),
            surface.images.len()
        );
        Ok(surface)
    }

    async fn load_image(&self, page: &LivePage, src: &str) -> Result<DynamicImage> {
        let bytes = if is_embedded(src) {
            decode_data_uri(src)
                .map(|(_, bytes)| bytes)
                .ok_or_else(|| Error::RenderError("malformed data URI".into()))?
        } else {
            let url = page
                .url()
                .join(src.trim())
                .map_err(|e| Error::RenderError(format!("invalid image URL {}: {}", src, e)))?;
            let origin = page.origin();
            let same_origin = url.origin().ascii_serialization() == origin;
            let request = FetchRequest {
                url,
                initiator_origin: origin,
                credentials: Credentials::SameOrigin,
                mode: RequestMode::NoCors,
                cookie_header: page.cookie_header().filter(|_| same_origin).map(|c| c.to_string()),
            };
            self.fetcher.fetch(request).await?.bytes
        };
        image::load_from_memory(&bytes).map_err(|e| Error::RenderError(format!("undecodable image: {}", e)))
    }
}

/// A mounted, settled render surface
///
/// Borrowing the page ties the surface's lifetime to it; the surface is
/// detached from the page when dropped.
pub struct RenderSurface<'p> {
    page: &'p LivePage,
    handle: u64,
    width: u32,
    markup: String,
    body: ElementNode,
    images: Vec<SurfaceImage>,
}

impl<'p> std::fmt::Debug for RenderSurface<'p> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderSurface")
            .field("handle", &self.handle)
            .field("width", &self.width)
            .field("images", &self.images.len())
            .finish()
    }
}

impl<'p> RenderSurface<'p> {
    pub fn handle(&self) -> u64 {
        self.handle
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    /// The self-contained document written into the surface.
    pub fn markup(&self) -> &str {
        &self.markup
    }

    /// The surface's private parsed tree.
    pub fn body(&self) -> &ElementNode {
        &self.body
    }

    pub fn images(&self) -> &[SurfaceImage] {
        &self.images
    }

    pub fn layout(&self) -> Layout {
        let intrinsic: Vec<IntrinsicImage<'_>> = self
            .images
            .iter()
            .map(|img| IntrinsicImage {
                src: &img.src,
                size: match &img.state {
                    ImageState::Loaded(i) => Some(i.dimensions()),
                    _ => None,
                },
            })
            .collect();
        layout::layout_document(&self.body, self.width, &intrinsic)
    }

    pub fn paint(&self) -> (Layout, Vec<PaintCommand>) {
        let layout = self.layout();
        let commands = paint::paint(&layout);
        (layout, commands)
    }

    /// Snapshot the surface at `scale` device pixels per unit.
    pub fn rasterize(&self, scale: f32) -> Result<RgbImage> {
        let (layout, commands) = self.paint();
        let decoded: Vec<Option<&DynamicImage>> = self
            .images
            .iter()
            .map(|img| match &img.state {
                ImageState::Loaded(i) => Some(i),
                _ => None,
            })
            .collect();
        let canvas = raster::rasterize(&commands, layout.width, layout.height, scale, &decoded)?;
        debug!(
            "rasterized surface {} to {}x{} at scale {}",
            self.handle,
            canvas.width(),
            canvas.height(),
            scale
        );
        Ok(canvas)
    }
}

impl Drop for RenderSurface<'_> {
    fn drop(&mut self) {
        if self.page.detach_surface(self.handle) {
            debug!("detached render surface {}", self.handle);
        }
    }
}

/// Wrap sanitized content into the surface's self-contained document.
pub fn surface_document(root: &ElementNode) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><style>{}</style></head><body>{}</body></html>",
        SURFACE_CSS,
        root.outer_html()
    )
}

fn parse_body(markup: &str) -> ElementNode {
    let document = Html::parse_document(markup);
    let body_sel = Selector::parse("body").unwrap();
    document
        .select(&body_sel)
        .next()
        .map(ElementNode::from_element_ref)
        .unwrap_or_else(|| ElementNode::new("body"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::MemoryFetcher;
    use crate::dom::ContentNode;
    use crate::wait::{CancelToken, VirtualClock};
    use std::io::Cursor;
    use std::time::Duration;

    /// Image load states keyed by source, for logging and tests.
    fn image_summary(images: &[SurfaceImage]) -> std::collections::HashMap<&str, &'static str> {
        images
            .iter()
            .map(|img| {
                let state = match img.state {
                    ImageState::Loaded(_) => "loaded",
                    ImageState::Failed(_) => "failed",
                    ImageState::TimedOut => "timed-out",
                };
                (img.src.as_str(), state)
            })
            .collect()
    }

    fn png(w: u32, h: u32, rgb: [u8; 3]) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, image::Rgb(rgb)));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn content(srcs: &[&str]) -> ElementNode {
        let mut root = ElementNode::new("div")
            .with_attr("class", "pdf-export-container")
            .with_child(ContentNode::Element(ElementNode::new("p").with_text("Hello")));
        for s in srcs {
            root.children
                .push(ContentNode::Element(ElementNode::new("img").with_attr("src", s)));
        }
        root
    }

    #[tokio::test]
    async fn mounts_settles_and_detaches() {
        let page = LivePage::new("https://site.test/", "<html><body></body></html>").unwrap();
        let fetcher = Arc::new(
            MemoryFetcher::new()
                .with_body("https://site.test/a.png", "image/png", png(10, 5, [0, 0, 255]))
                .with_stalled("https://site.test/slow.png"),
        );
        let clock = VirtualClock::new();
        let waiter = Waiter::new(Arc::new(clock.clone()), CancelToken::new());
        let renderer = OffscreenRenderer::new(fetcher.clone(), &EngineConfig::default());

        let surface = renderer
            .mount(&page, &content(&["/a.png", "/slow.png", "/missing.png"]), &waiter)
            .await
            .unwrap();
        assert_eq!(page.attached_surfaces().len(), 1);
        assert_eq!(surface.width(), 1200);
        assert!(surface.body().find(|e| e.has_class("pdf-export-container")).is_some());

        let summary = image_summary(surface.images());
        assert_eq!(summary["/a.png"], "loaded");
        assert_eq!(summary["/slow.png"], "timed-out");
        assert_eq!(summary["/missing.png"], "failed");

        assert_eq!(clock.requested()[0], Duration::from_millis(100));
        assert_eq!(*clock.requested().last().unwrap(), Duration::from_millis(500));

        // same-origin loads carry credentials and skip CORS
        let req = &fetcher.requests()[0];
        assert_eq!(req.credentials, Credentials::SameOrigin);
        assert_eq!(req.mode, RequestMode::NoCors);

        let canvas = surface.rasterize(1.0).unwrap();
        assert_eq!(canvas.width(), 1200);
        assert!(canvas.pixels().any(|p| p.0 == [0, 0, 255]));

        drop(surface);
        assert!(page.attached_surfaces().is_empty());
    }

    #[tokio::test]
    async fn data_uri_images_decode_locally() {
        let page = LivePage::new("https://site.test/", "<p></p>").unwrap();
        let fetcher = Arc::new(MemoryFetcher::new());
        let uri = crate::assets::to_data_uri(&png(2, 2, [0, 255, 0]), None);
        let waiter = Waiter::new(Arc::new(VirtualClock::new()), CancelToken::new());
        let surface = OffscreenRenderer::new(fetcher.clone(), &EngineConfig::default())
            .mount(&page, &content(&[uri.as_str()]), &waiter)
            .await
            .unwrap();
        assert!(surface.images()[0].state.is_loaded());
        assert!(fetcher.requests().is_empty());
    }

    #[tokio::test]
    async fn cancelled_mount_still_detaches() {
        let page = LivePage::new("https://site.test/", "<p></p>").unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let waiter = Waiter::new(Arc::new(VirtualClock::new()), cancel);
        let res = OffscreenRenderer::new(Arc::new(MemoryFetcher::new()), &EngineConfig::default())
            .mount(&page, &content(&[]), &waiter)
            .await;
        assert!(matches!(res, Err(Error::Cancelled)));
        assert!(page.attached_surfaces().is_empty());
    }
}
