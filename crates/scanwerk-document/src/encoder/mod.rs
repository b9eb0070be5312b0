// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Row-oriented document encoders.
//
// An encoder is configured once with the geometry the device reports, then
// fed one raw scan line at a time.  When the last line of an image arrives
// the image is encoded and written to the sink; the line counter then
// resets so a further image (the next feeder page) can follow.
// `end_document` finalizes whatever the format needs at the very end.

mod jpeg;
mod pdf;
mod png;

use std::io::Write;

use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::{ColorSpace, MIME_TYPE_JPEG, MIME_TYPE_PDF, MIME_TYPE_PNG};

pub use jpeg::JpegEncoder;
pub use pdf::PdfEncoder;
pub use png::PngEncoder;

/// Geometry and sample layout of the images an encoder receives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageGeometry {
    pub width: u32,
    pub height: u32,
    /// Bits per sample: 1, 8, or 16.
    pub bit_depth: u32,
    pub color_space: ColorSpace,
    pub resolution_dpi: f64,
}

impl ImageGeometry {
    /// Bytes in one packed raw line.
    pub fn bytes_per_line(&self) -> usize {
        let bits = self.width as usize * self.color_space.components() * self.bit_depth as usize;
        bits.div_ceil(8)
    }
}

/// Document-level metadata, written where the format supports it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentInfo {
    pub creator: String,
    pub producer: String,
}

/// Contract shared by all encoders.
pub trait ImageEncoder: Send {
    fn mime_type(&self) -> &'static str;

    /// Set the geometry of all following images.  Fails when the format
    /// cannot represent it.
    fn configure(&mut self, geometry: ImageGeometry) -> Result<()>;

    /// Bytes `write_line` expects per call; 0 before `configure`.
    fn bytes_per_line(&self) -> usize;

    /// Configured image height.
    fn height(&self) -> u32;

    /// Consume one raw line, writing encoded output to `sink` once an image
    /// is complete.
    fn write_line(&mut self, line: &[u8], sink: &mut dyn Write) -> Result<()>;

    /// Lines still missing from the image in progress.  Equals `height()`
    /// between images.
    fn lines_left_in_current_image(&self) -> u32;

    /// Number of complete images encoded so far.
    fn images_written(&self) -> u32;

    /// Finish the document.  A partially received image is discarded.
    fn end_document(&mut self, sink: &mut dyn Write) -> Result<()>;
}

/// Pick the encoder for a document MIME type.  `None` for formats the
/// server cannot produce.
pub fn encoder_for_format(mime_type: &str, info: &DocumentInfo) -> Option<Box<dyn ImageEncoder>> {
    match mime_type {
        MIME_TYPE_JPEG => Some(Box::new(JpegEncoder::new(jpeg::DEFAULT_QUALITY))),
        MIME_TYPE_PNG => Some(Box::new(PngEncoder::new())),
        MIME_TYPE_PDF => Some(Box::new(PdfEncoder::new(info.clone()))),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Page assembly shared by the encoders
// ---------------------------------------------------------------------------

/// Collects raw lines until an image is complete.
#[derive(Debug, Default)]
pub(crate) struct PageAssembler {
    geometry: Option<ImageGeometry>,
    buffer: Vec<u8>,
    lines: u32,
    images: u32,
}

impl PageAssembler {
    pub(crate) fn configure(&mut self, geometry: ImageGeometry) -> Result<()> {
        if geometry.width == 0 || geometry.height == 0 {
            return Err(ScanwerkError::Encoder(format!(
                "empty image geometry {}x{}",
                geometry.width, geometry.height
            )));
        }
        self.geometry = Some(geometry);
        self.buffer.clear();
        self.lines = 0;
        Ok(())
    }

    pub(crate) fn geometry(&self) -> Result<ImageGeometry> {
        self.geometry
            .ok_or_else(|| ScanwerkError::Encoder("encoder used before configure".into()))
    }

    pub(crate) fn bytes_per_line(&self) -> usize {
        self.geometry.map(|g| g.bytes_per_line()).unwrap_or(0)
    }

    pub(crate) fn height(&self) -> u32 {
        self.geometry.map(|g| g.height).unwrap_or(0)
    }

    pub(crate) fn lines_left(&self) -> u32 {
        self.height() - self.lines
    }

    pub(crate) fn images(&self) -> u32 {
        self.images
    }

    /// Append a line; returns the raw image once its last line arrived.
    pub(crate) fn push_line(&mut self, line: &[u8]) -> Result<Option<Vec<u8>>> {
        let geometry = self.geometry()?;
        let expected = geometry.bytes_per_line();
        if line.len() != expected {
            return Err(ScanwerkError::Encoder(format!(
                "line has {} bytes, expected {expected}",
                line.len()
            )));
        }
        if self.buffer.is_empty() {
            self.buffer.reserve(expected * geometry.height as usize);
        }
        self.buffer.extend_from_slice(line);
        self.lines += 1;
        if self.lines < geometry.height {
            return Ok(None);
        }
        self.lines = 0;
        self.images += 1;
        Ok(Some(std::mem::take(&mut self.buffer)))
    }

    /// Drop an incomplete image; returns the number of lines discarded.
    pub(crate) fn discard_partial(&mut self) -> u32 {
        let dropped = self.lines;
        self.buffer.clear();
        self.lines = 0;
        dropped
    }
}

/// Expand packed 1-bit lines (set bit = black) to 8-bit gray.
pub(crate) fn expand_bilevel(raw: &[u8], geometry: &ImageGeometry) -> Vec<u8> {
    let width = geometry.width as usize;
    let bpl = geometry.bytes_per_line();
    let mut out = Vec::with_capacity(width * geometry.height as usize);
    for row in raw.chunks_exact(bpl) {
        out.extend((0..width).map(|x| {
            let bit = row[x / 8] & (0x80 >> (x % 8));
            if bit != 0 { 0 } else { 255 }
        }));
    }
    out
}

/// Reduce native-endian 16-bit samples to their high byte.
pub(crate) fn downsample_16(raw: &[u8]) -> Vec<u8> {
    raw.chunks_exact(2)
        .map(|p| (u16::from_ne_bytes([p[0], p[1]]) >> 8) as u8)
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn geometry(width: u32, height: u32, bit_depth: u32, color_space: ColorSpace) -> ImageGeometry {
        ImageGeometry {
            width,
            height,
            bit_depth,
            color_space,
            resolution_dpi: 300.0,
        }
    }

    /// Feed `images` gradient images through `encoder`.
    pub(crate) fn feed(encoder: &mut dyn ImageEncoder, images: u32, sink: &mut Vec<u8>) {
        let bpl = encoder.bytes_per_line();
        for _ in 0..images {
            for y in 0..encoder.height() {
                let line: Vec<u8> = (0..bpl).map(|x| ((x as u32 + y) % 256) as u8).collect();
                encoder.write_line(&line, sink).expect("write line");
            }
        }
    }

    #[test]
    fn bytes_per_line_packs_samples() {
        assert_eq!(geometry(2480, 1, 8, ColorSpace::Grayscale).bytes_per_line(), 2480);
        assert_eq!(geometry(2480, 1, 8, ColorSpace::Rgb).bytes_per_line(), 7440);
        assert_eq!(geometry(10, 1, 16, ColorSpace::Rgb).bytes_per_line(), 60);
        assert_eq!(geometry(10, 1, 1, ColorSpace::Grayscale).bytes_per_line(), 2);
    }

    #[test]
    fn assembler_counts_lines_per_image() {
        let mut assembler = PageAssembler::default();
        assembler.configure(geometry(4, 2, 8, ColorSpace::Grayscale)).expect("configure");
        assert_eq!(assembler.lines_left(), 2);
        assert!(assembler.push_line(&[0; 4]).expect("line").is_none());
        assert_eq!(assembler.lines_left(), 1);
        let page = assembler.push_line(&[1; 4]).expect("line").expect("page");
        assert_eq!(page.len(), 8);
        assert_eq!(assembler.lines_left(), 2);
        assert_eq!(assembler.images(), 1);
    }

    #[test]
    fn assembler_rejects_wrong_line_length() {
        let mut assembler = PageAssembler::default();
        assembler.configure(geometry(4, 2, 8, ColorSpace::Grayscale)).expect("configure");
        assert!(assembler.push_line(&[0; 3]).is_err());
    }

    #[test]
    fn unknown_format_has_no_encoder() {
        let info = DocumentInfo::default();
        assert!(encoder_for_format("image/tiff", &info).is_none());
        for mime in [MIME_TYPE_JPEG, MIME_TYPE_PNG, MIME_TYPE_PDF] {
            let encoder = encoder_for_format(mime, &info).expect("encoder");
            assert_eq!(encoder.mime_type(), mime);
        }
    }

    #[test]
    fn bilevel_expansion_maps_set_bits_to_black() {
        let g = geometry(10, 1, 1, ColorSpace::Grayscale);
        let out = expand_bilevel(&[0b1000_0001, 0b0100_0000], &g);
        assert_eq!(out, vec![0, 255, 255, 255, 255, 255, 255, 0, 255, 0]);
    }
}
