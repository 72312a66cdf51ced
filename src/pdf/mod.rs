//! PDF assembly
//!
//! Two paths produce a PDF. The vector path (`print`) hands the live page to
//! the native print pipeline with a temporary print style sheet and yields no
//! artifact. The raster path snapshots a settled `RenderSurface`, slices the
//! snapshot into A4 pages and embeds each slice as a JPEG image.

pub mod print;

pub use print::{print_css, print_page, PrintBackend, PrintStyleGuard, SnapshotPrintBackend};

use crate::rendering::RenderSurface;
use crate::{Error, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{GenericImageView, RgbImage};
use log::{debug, info};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary as LoDictionary, Document as LoDocument, Object as LoObject, Stream as LoStream};
use sha2::{Digest, Sha256};

const MM_TO_PT: f32 = 72.0 / 25.4;

/// Paper and raster parameters
///
/// Defaults: A4 portrait (210 x 297 mm), 10 mm margins on every side, JPEG
/// quality 0.9, raster scale 1.5.
#[derive(Debug, Clone, PartialEq)]
pub struct PageSetup {
    pub paper_width_mm: f32,
    pub paper_height_mm: f32,
    pub margin_mm: f32,
    pub jpeg_quality: f32,
    pub default_scale: f32,
}

impl Default for PageSetup {
    fn default() -> Self {
        Self {
            paper_width_mm: 210.0,
            paper_height_mm: 297.0,
            margin_mm: 10.0,
            jpeg_quality: 0.9,
            default_scale: 1.5,
        }
    }
}

impl PageSetup {
    pub fn validate(&self) -> Result<()> {
        if !(self.paper_width_mm > 0.0 && self.paper_height_mm > 0.0) {
            return Err(Error::ConfigError("paper size must be positive".into()));
        }
        if self.margin_mm < 0.0
            || 2.0 * self.margin_mm >= self.paper_width_mm
            || 2.0 * self.margin_mm >= self.paper_height_mm
        {
            return Err(Error::ConfigError(format!(
                "margin of {}mm leaves no printable area",
                self.margin_mm
            )));
        }
        if !(self.jpeg_quality > 0.0 && self.jpeg_quality <= 1.0) {
            return Err(Error::ConfigError("jpeg_quality must be in (0, 1]".into()));
        }
        if !(self.default_scale > 0.0 && self.default_scale.is_finite()) {
            return Err(Error::ConfigError("default_scale must be positive".into()));
        }
        Ok(())
    }

    pub fn page_size_pt(&self) -> (f32, f32) {
        (self.paper_width_mm * MM_TO_PT, self.paper_height_mm * MM_TO_PT)
    }

    pub fn margin_pt(&self) -> f32 {
        self.margin_mm * MM_TO_PT
    }

    /// Printable area in points.
    pub fn content_size_pt(&self) -> (f32, f32) {
        let (w, h) = self.page_size_pt();
        let m = self.margin_pt();
        (w - 2.0 * m, h - 2.0 * m)
    }

    /// Requested scale, or the default when `scale <= 0` (or not a number).
    pub fn resolve_scale(&self, scale: f32) -> f32 {
        if scale.is_finite() && scale > 0.0 {
            scale
        } else {
            self.default_scale
        }
    }

    /// Requested JPEG quality when it lies in `(0, 1]`, the default otherwise.
    pub fn resolve_quality(&self, quality: f32) -> f32 {
        if quality > 0.0 && quality <= 1.0 {
            quality
        } else {
            self.jpeg_quality
        }
    }
}

/// A finished PDF
#[derive(Clone, PartialEq, Eq)]
pub struct PdfArtifact {
    pub binary_payload: Vec<u8>,
    pub byte_size: usize,
}

impl std::fmt::Debug for PdfArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfArtifact")
            .field("byte_size", &self.byte_size)
            .field("sha256", &self.digest())
            .finish()
    }
}

impl PdfArtifact {
    pub fn new(binary_payload: Vec<u8>) -> Self {
        let byte_size = binary_payload.len();
        Self {
            binary_payload,
            byte_size,
        }
    }

    /// Hex SHA-256 of the payload.
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(&self.binary_payload))
    }
}

/// Raster-path assembler
#[derive(Debug, Clone, Default)]
pub struct PdfAssembler {
    setup: PageSetup,
}

impl PdfAssembler {
    pub fn new(setup: PageSetup) -> Self {
        Self { setup }
    }

    pub fn setup(&self) -> &PageSetup {
        &self.setup
    }

    /// Snapshot `surface` and assemble the pages.
    ///
    /// Every failure, including a failed snapshot, is an `AssemblyError`.
    pub fn capture(&self, surface: &RenderSurface<'_>, scale: f32, quality: f32) -> Result<PdfArtifact> {
        let scale = self.setup.resolve_scale(scale);
        let canvas = surface.rasterize(scale).map_err(|e| match e {
            Error::AssemblyError(_) => e,
            other => Error::AssemblyError(format!("snapshot failed: {}", other)),
        })?;
        self.capture_raster(&canvas, quality)
    }

    /// Paginate an already rasterized snapshot.
    pub fn capture_raster(&self, canvas: &RgbImage, quality: f32) -> Result<PdfArtifact> {
        let (cw, ch) = canvas.dimensions();
        if cw == 0 || ch == 0 {
            return Err(Error::AssemblyError("empty snapshot".into()));
        }
        let quality = self.setup.resolve_quality(quality);
        let jpeg_quality = ((quality * 100.0).round() as u8).clamp(1, 100);

        let (page_w, page_h) = self.setup.page_size_pt();
        let margin = self.setup.margin_pt();
        let (content_w, content_h) = self.setup.content_size_pt();
        // snapshot pixels per page, keeping the width fitted to the printable area
        let slice_h = ((cw as f32 * content_h / content_w).floor() as u32).max(1);
        let page_count = ch.div_ceil(slice_h);

        let mut doc = LoDocument::with_version("1.4");
        let pages_id = doc.new_object_id();
        let mut kids: Vec<LoObject> = Vec::with_capacity(page_count as usize);

        for index in 0..page_count {
            let top = index * slice_h;
            let height = slice_h.min(ch - top);
            let slice = canvas.view(0, top, cw, height).to_image();

            // one JPEG per slice
            let mut jpeg = Vec::new();
            JpegEncoder::new_with_quality(&mut jpeg, jpeg_quality)
                .encode_image(&slice)
                .map_err(|e| Error::AssemblyError(format!("JPEG encoding of page {} failed: {}", index + 1, e)))?;

            let image_id = doc.add_object(LoStream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => cw as i64,
                    "Height" => height as i64,
                    "ColorSpace" => "DeviceRGB",
                    "BitsPerComponent" => 8,
                    "Filter" => "DCTDecode",
                },
                jpeg,
            ));

            // top-left of the printable area, scaled to the content width
            let draw_w = content_w;
            let draw_h = height as f32 * content_w / cw as f32;
            let content = Content {
                operations: vec![
                    Operation::new("q", vec![]),
                    Operation::new(
                        "cm",
                        vec![
                            draw_w.into(),
                            0.into(),
                            0.into(),
                            draw_h.into(),
                            margin.into(),
                            (page_h - margin - draw_h).into(),
                        ],
                    ),
                    Operation::new("Do", vec![LoObject::Name(b"Im0".to_vec())]),
                    Operation::new("Q", vec![]),
                ],
            };
            let encoded = content
                .encode()
                .map_err(|e| Error::AssemblyError(format!("content stream: {}", e)))?;
            let content_id = doc.add_object(LoStream::new(LoDictionary::new(), encoded));

            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => dictionary! {
                    "XObject" => dictionary! { "Im0" => image_id },
                },
                "MediaBox" => vec![0.into(), 0.into(), page_w.into(), page_h.into()],
            });
            kids.push(page_id.into());
        }

        // page tree and catalog
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count as i64,
        };
        doc.objects.insert(pages_id, LoObject::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        // serialize
        let mut out = Vec::new();
        doc.save_to(&mut out)
            .map_err(|e| Error::AssemblyError(format!("failed to write PDF: {}", e)))?;

        let artifact = PdfArtifact::new(out);
        debug!("snapshot {}x{} px sliced into {} pages of {} px", cw, ch, page_count, slice_h);
        info!(
            "assembled {} page PDF ({} bytes, sha256 {})",
            page_count,
            artifact.byte_size,
            artifact.digest()
        );
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a4_geometry() {
        let setup = PageSetup::default();
        let (w, h) = setup.page_size_pt();
        assert!((w - 595.28).abs() < 0.01);
        assert!((h - 841.89).abs() < 0.01);
        assert!((setup.margin_pt() - 28.35).abs() < 0.01);
        assert!(setup.validate().is_ok());
    }

    #[test]
    fn scale_and_quality_fallbacks() {
        let setup = PageSetup::default();
        assert_eq!(setup.resolve_scale(0.0), 1.5);
        assert_eq!(setup.resolve_scale(-1.0), 1.5);
        assert_eq!(setup.resolve_scale(2.0), 2.0);
        assert_eq!(setup.resolve_quality(2.0), 0.9);
        assert_eq!(setup.resolve_quality(0.5), 0.5);
    }

    #[test]
    fn rejects_unusable_setups() {
        let bad = PageSetup { margin_mm: 120.0, ..Default::default() };
        assert!(bad.validate().is_err());
        let bad = PageSetup { jpeg_quality: 0.0, ..Default::default() };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn tall_snapshots_paginate() {
        // 190 x 277 is exactly one printable area; three and a bit areas -> 4 pages
        let canvas = RgbImage::from_pixel(190, 277 * 3 + 10, image::Rgb([200, 10, 10]));
        let artifact = PdfAssembler::default().capture_raster(&canvas, 2.0).unwrap();
        assert_eq!(artifact.byte_size, artifact.binary_payload.len());
        assert!(artifact.binary_payload.starts_with(b"%PDF-"));
        let doc = LoDocument::load_mem(&artifact.binary_payload).unwrap();
        assert_eq!(doc.get_pages().len(), 4);
    }

    #[test]
    fn short_snapshot_is_one_page() {
        let canvas = RgbImage::from_pixel(1800, 300, image::Rgb([255, 255, 255]));
        let artifact = PdfAssembler::default().capture_raster(&canvas, 0.9).unwrap();
        let doc = LoDocument::load_mem(&artifact.binary_payload).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
        assert_eq!(artifact.digest().len(), 64);
    }

    #[test]
    fn empty_snapshot_is_an_assembly_error() {
        let canvas = RgbImage::new(0, 0);
        assert!(matches!(
            PdfAssembler::default().capture_raster(&canvas, 0.9),
            Err(Error::AssemblyError(_))
        ));
    }
}
