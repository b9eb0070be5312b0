// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF encoder built on `printpdf` 0.8.
//
// Every complete image becomes one page sized to the scanned area at the
// scan resolution.  Pages accumulate until `end_document`, which writes a
// single PDF holding all of them, so feeder pages can be concatenated.
// Samples are embedded as 8-bit gray or RGB.

use std::io::Write;

use printpdf::{
    Mm, Op, PdfDocument, PdfPage, PdfSaveOptions, PdfWarnMsg, Pt, RawImage, RawImageData,
    RawImageFormat, XObjectTransform,
};
use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::{ColorSpace, MIME_TYPE_PDF};
use tracing::{debug, info, warn};

use super::{DocumentInfo, ImageEncoder, ImageGeometry, PageAssembler, downsample_16, expand_bilevel};

const MM_PER_INCH: f32 = 25.4;

pub struct PdfEncoder {
    info: DocumentInfo,
    assembler: PageAssembler,
    pages: Vec<RawImage>,
}

impl PdfEncoder {
    pub fn new(info: DocumentInfo) -> Self {
        Self {
            info,
            assembler: PageAssembler::default(),
            pages: Vec::new(),
        }
    }

    pub fn pages_pending(&self) -> usize {
        self.pages.len()
    }
}

impl ImageEncoder for PdfEncoder {
    fn mime_type(&self) -> &'static str {
        MIME_TYPE_PDF
    }

    fn configure(&mut self, geometry: ImageGeometry) -> Result<()> {
        match (geometry.color_space, geometry.bit_depth) {
            (_, 8 | 16) | (ColorSpace::Grayscale, 1) => self.assembler.configure(geometry),
            (space, depth) => Err(ScanwerkError::Encoder(format!(
                "PDF cannot embed {space:?} at {depth} bits per sample"
            ))),
        }
    }

    fn bytes_per_line(&self) -> usize {
        self.assembler.bytes_per_line()
    }

    fn height(&self) -> u32 {
        self.assembler.height()
    }

    fn write_line(&mut self, line: &[u8], _sink: &mut dyn Write) -> Result<()> {
        let Some(raw) = self.assembler.push_line(line)? else {
            return Ok(());
        };
        let g = self.assembler.geometry()?;
        let pixels = match g.bit_depth {
            1 => expand_bilevel(&raw, &g),
            16 => downsample_16(&raw),
            _ => raw,
        };
        let data_format = match g.color_space {
            ColorSpace::Grayscale => RawImageFormat::R8,
            ColorSpace::Rgb => RawImageFormat::RGB8,
        };
        self.pages.push(RawImage {
            pixels: RawImageData::U8(pixels),
            width: g.width as usize,
            height: g.height as usize,
            data_format,
            tag: Vec::new(),
        });
        debug!(page = self.pages.len(), width = g.width, height = g.height, "PDF page collected");
        Ok(())
    }

    fn lines_left_in_current_image(&self) -> u32 {
        self.assembler.lines_left()
    }

    fn images_written(&self) -> u32 {
        self.assembler.images()
    }

    fn end_document(&mut self, sink: &mut dyn Write) -> Result<()> {
        let dropped = self.assembler.discard_partial();
        if dropped > 0 {
            debug!(lines = dropped, "incomplete PDF page discarded");
        }
        if self.pages.is_empty() {
            warn!("PDF document finished without pages, nothing written");
            return Ok(());
        }
        let g = self.assembler.geometry()?;
        let dpi = g.resolution_dpi as f32;

        let mut doc = PdfDocument::new("Scan");
        doc.metadata.info.creator = self.info.creator.clone();
        doc.metadata.info.producer = self.info.producer.clone();

        let mut pages = Vec::with_capacity(self.pages.len());
        for raw in self.pages.drain(..) {
            let width = Mm(raw.width as f32 / dpi * MM_PER_INCH);
            let height = Mm(raw.height as f32 / dpi * MM_PER_INCH);
            let id = doc.add_image(&raw);
            let ops = vec![Op::UseXobject {
                id,
                transform: XObjectTransform {
                    translate_x: Some(Pt(0.0)),
                    translate_y: Some(Pt(0.0)),
                    scale_x: None,
                    scale_y: None,
                    dpi: Some(dpi),
                    rotate: None,
                },
            }];
            pages.push(PdfPage::new(width, height, ops));
        }
        let page_count = pages.len();
        doc.with_pages(pages);

        let mut warnings: Vec<PdfWarnMsg> = Vec::new();
        let bytes = doc.save(&PdfSaveOptions::default(), &mut warnings);
        sink.write_all(&bytes)?;
        info!(pages = page_count, bytes = bytes.len(), warnings = warnings.len(), "PDF document written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::tests::{feed, geometry};

    fn info() -> DocumentInfo {
        DocumentInfo {
            creator: "Scanwerk Virtual Scanner".into(),
            producer: "Scanwerk".into(),
        }
    }

    #[test]
    fn pages_accumulate_into_one_document() {
        let mut encoder = PdfEncoder::new(info());
        encoder.configure(geometry(40, 30, 8, ColorSpace::Rgb)).expect("configure");
        let mut out = Vec::new();
        feed(&mut encoder, 3, &mut out);
        assert!(out.is_empty());
        assert_eq!(encoder.pages_pending(), 3);

        encoder.end_document(&mut out).expect("end");
        let doc = lopdf::Document::load_mem(&out).expect("parse PDF");
        assert_eq!(doc.get_pages().len(), 3);
    }

    #[test]
    fn sixteen_bit_and_bilevel_pages_are_embedded() {
        for g in [
            geometry(16, 16, 16, ColorSpace::Grayscale),
            geometry(16, 16, 1, ColorSpace::Grayscale),
        ] {
            let mut encoder = PdfEncoder::new(info());
            encoder.configure(g).expect("configure");
            let mut out = Vec::new();
            feed(&mut encoder, 1, &mut out);
            encoder.end_document(&mut out).expect("end");
            let doc = lopdf::Document::load_mem(&out).expect("parse PDF");
            assert_eq!(doc.get_pages().len(), 1);
        }
    }

    #[test]
    fn empty_document_writes_nothing() {
        let mut encoder = PdfEncoder::new(info());
        encoder.configure(geometry(16, 16, 8, ColorSpace::Grayscale)).expect("configure");
        let mut out = Vec::new();
        encoder.end_document(&mut out).expect("end");
        assert!(out.is_empty());
    }
}
