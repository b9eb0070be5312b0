// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// JPEG encoder: one baseline JPEG per image, 8 bits per sample only.

use std::io::Write;

use image::ExtendedColorType;
use image::ImageEncoder as _;
use image::codecs::jpeg::JpegEncoder as ImageJpegEncoder;
use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::{ColorSpace, MIME_TYPE_JPEG};
use tracing::debug;

use super::{ImageEncoder, ImageGeometry, PageAssembler};

/// Quality used for scanned pages.
pub(crate) const DEFAULT_QUALITY: u8 = 90;

pub struct JpegEncoder {
    quality: u8,
    assembler: PageAssembler,
}

impl JpegEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            assembler: PageAssembler::default(),
        }
    }
}

impl ImageEncoder for JpegEncoder {
    fn mime_type(&self) -> &'static str {
        MIME_TYPE_JPEG
    }

    fn configure(&mut self, geometry: ImageGeometry) -> Result<()> {
        if geometry.bit_depth != 8 {
            return Err(ScanwerkError::Encoder(format!(
                "JPEG needs 8 bits per sample, got {}",
                geometry.bit_depth
            )));
        }
        self.assembler.configure(geometry)
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
        let color = match g.color_space {
            ColorSpace::Grayscale => ExtendedColorType::L8,
            ColorSpace::Rgb => ExtendedColorType::Rgb8,
        };
        ImageJpegEncoder::new_with_quality(&mut *sink, self.quality)
            .write_image(&raw, g.width, g.height, color)
            .map_err(|err| ScanwerkError::Encoder(format!("JPEG encoding failed: {err}")))?;
        debug!(width = g.width, height = g.height, quality = self.quality, "JPEG image written");
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
            debug!(lines = dropped, "incomplete JPEG image discarded");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::tests::{feed, geometry};

    #[test]
    fn encodes_decodable_gray_jpeg() {
        let mut encoder = JpegEncoder::new(DEFAULT_QUALITY);
        encoder.configure(geometry(64, 48, 8, ColorSpace::Grayscale)).expect("configure");
        let mut out = Vec::new();
        feed(&mut encoder, 1, &mut out);
        encoder.end_document(&mut out).expect("end");

        let decoded = image::load_from_memory(&out).expect("decode");
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
        assert_eq!(encoder.images_written(), 1);
    }

    #[test]
    fn rejects_sixteen_bit_samples() {
        let mut encoder = JpegEncoder::new(DEFAULT_QUALITY);
        assert!(encoder.configure(geometry(8, 8, 16, ColorSpace::Rgb)).is_err());
        assert!(encoder.configure(geometry(8, 8, 1, ColorSpace::Grayscale)).is_err());
    }

    #[test]
    fn partial_image_produces_no_output() {
        let mut encoder = JpegEncoder::new(DEFAULT_QUALITY);
        encoder.configure(geometry(8, 8, 8, ColorSpace::Rgb)).expect("configure");
        let mut out = Vec::new();
        encoder.write_line(&[0; 24], &mut out).expect("line");
        assert_eq!(encoder.lines_left_in_current_image(), 7);
        encoder.end_document(&mut out).expect("end");
        assert!(out.is_empty());
        assert_eq!(encoder.lines_left_in_current_image(), 8);
    }
}
