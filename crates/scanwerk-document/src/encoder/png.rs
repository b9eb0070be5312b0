// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PNG encoder: one PNG per image, 8 or 16 bits per sample.  Bilevel scans
// are widened to 8-bit gray.

use std::io::Write;

use image::ExtendedColorType;
use image::ImageEncoder as _;
use image::codecs::png::PngEncoder as ImagePngEncoder;
use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::{ColorSpace, MIME_TYPE_PNG};
use tracing::debug;

use super::{ImageEncoder, ImageGeometry, PageAssembler, expand_bilevel};

#[derive(Default)]
pub struct PngEncoder {
    assembler: PageAssembler,
}

impl PngEncoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ImageEncoder for PngEncoder {
    fn mime_type(&self) -> &'static str {
        MIME_TYPE_PNG
    }

    fn configure(&mut self, geometry: ImageGeometry) -> Result<()> {
        match (geometry.color_space, geometry.bit_depth) {
            (_, 8 | 16) | (ColorSpace::Grayscale, 1) => self.assembler.configure(geometry),
            (space, depth) => Err(ScanwerkError::Encoder(format!(
                "PNG cannot encode {space:?} at {depth} bits per sample"
            ))),
        }
    }

    fn bytes_per_line(&self) -> usize {
        self.assembler.bytes_per_line()
    }

    fn height(&self) -> u32 {
        self.assembler.height()
    }

    fn write_line(&mut self, line: &[u8], sink: &mut dyn Write) -> Result<()> {
        let Some(raw) = self.assembler.push_line(line)? else {
            return Ok(());
        };
        let g = self.assembler.geometry()?;
        let (data, color) = match (g.color_space, g.bit_depth) {
            (_, 1) => (expand_bilevel(&raw, &g), ExtendedColorType::L8),
            (ColorSpace::Grayscale, 8) => (raw, ExtendedColorType::L8),
            (ColorSpace::Grayscale, _) => (raw, ExtendedColorType::L16),
            (ColorSpace::Rgb, 8) => (raw, ExtendedColorType::Rgb8),
            (ColorSpace::Rgb, _) => (raw, ExtendedColorType::Rgb16),
        };
        ImagePngEncoder::new(&mut *sink)
            .write_image(&data, g.width, g.height, color)
            .map_err(|err| ScanwerkError::Encoder(format!("PNG encoding failed: {err}")))?;
        debug!(width = g.width, height = g.height, depth = g.bit_depth, "PNG image written");
        Ok(())
    }

    fn lines_left_in_current_image(&self) -> u32 {
        self.assembler.lines_left()
    }

    fn images_written(&self) -> u32 {
        self.assembler.images()
    }

    fn end_document(&mut self, _sink: &mut dyn Write) -> Result<()> {
        let dropped = self.assembler.discard_partial();
        if dropped > 0 {
            debug!(lines = dropped, "incomplete PNG image discarded");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::tests::{feed, geometry};

    fn encode(g: ImageGeometry) -> image::DynamicImage {
        let mut encoder = PngEncoder::new();
        encoder.configure(g).expect("configure");
        let mut out = Vec::new();
        feed(&mut encoder, 1, &mut out);
        encoder.end_document(&mut out).expect("end");
        image::load_from_memory(&out).expect("decode")
    }

    #[test]
    fn encodes_rgb_and_gray() {
        let rgb = encode(geometry(20, 10, 8, ColorSpace::Rgb));
        assert_eq!((rgb.width(), rgb.height()), (20, 10));
        assert_eq!(rgb.color(), image::ColorType::Rgb8);

        let gray16 = encode(geometry(20, 10, 16, ColorSpace::Grayscale));
        assert_eq!(gray16.color(), image::ColorType::L16);
    }

    #[test]
    fn bilevel_scan_becomes_gray() {
        let img = encode(geometry(12, 4, 1, ColorSpace::Grayscale));
        assert_eq!(img.color(), image::ColorType::L8);
        assert_eq!(img.width(), 12);
    }

    #[test]
    fn bilevel_color_is_rejected() {
        let mut encoder = PngEncoder::new();
        assert!(encoder.configure(geometry(12, 4, 1, ColorSpace::Rgb)).is_err());
    }
}
