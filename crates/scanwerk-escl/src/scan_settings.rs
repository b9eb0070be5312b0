// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// eSCL scan-settings ticket parsing.
//
// Clients POST a `scan:ScanSettings` document.  Only a handful of leaf
// elements matter, so elements are looked up by local name regardless of
// namespace prefix instead of building a DOM.

use std::sync::LazyLock;

use regex::Regex;
use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::{ColorSpace, InputSource, JobKind, MIME_TYPE_PDF, MIME_TYPE_PNG};

/// Region unit eSCL clients must use.
const UNITS_THREE_HUNDREDTHS: &str = "escl:ThreeHundredthsOfInches";

/// Leaf element with optional namespace prefixes; the opening and closing
/// local names are captured separately and compared by the caller.
static LEAF_ELEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"<(?:[A-Za-z_][\w.-]*:)?([A-Za-z_][\w.-]*)(?:\s[^>]*)?>([^<]*)</(?:[A-Za-z_][\w.-]*:)?([A-Za-z_][\w.-]*)\s*>",
    )
    .expect("leaf element regex should compile")
});

static COLOR_MODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z]+)([0-9]+)$").expect("color mode regex should compile"));

/// Validated contents of one scan ticket.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSettings {
    pub resolution_dpi: u32,
    /// Scan region in device pixels at `resolution_dpi`.
    pub left_px: f64,
    pub top_px: f64,
    pub width_px: f64,
    pub height_px: f64,
    pub color_space: ColorSpace,
    /// Bits per sample.
    pub bit_depth: u32,
    pub document_format: String,
    pub intent: String,
    pub input_source: InputSource,
    pub kind: JobKind,
    pub images_to_transfer: i32,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            resolution_dpi: 300,
            left_px: 0.0,
            top_px: 0.0,
            width_px: 0.0,
            height_px: 0.0,
            color_space: ColorSpace::Grayscale,
            bit_depth: 8,
            document_format: String::new(),
            intent: String::new(),
            input_source: InputSource::Platen,
            kind: JobKind::Single,
            images_to_transfer: 1,
        }
    }
}

impl ScanSettings {
    /// Parse a ticket.  With `autoselect_format` the requested format is
    /// replaced by PNG (for clients that cannot handle anything else).
    pub fn from_xml(xml: &str, autoselect_format: bool) -> Result<Self> {
        let x_res = number(xml, "XResolution")?;
        let y_res = number(xml, "YResolution")?;
        let resolution = match (x_res, y_res) {
            (Some(x), Some(y)) if x == y => (x + 0.5).floor(),
            (Some(_), Some(_)) => return Err(ticket("XResolution and YResolution differ")),
            _ => return Err(ticket("resolution missing")),
        };
        if !(resolution >= 1.0) {
            return Err(ticket(format!("invalid resolution {resolution}")));
        }

        let left = number(xml, "XOffset")?.unwrap_or(0.0);
        let top = number(xml, "YOffset")?.unwrap_or(0.0);
        let width = number(xml, "Width")?.ok_or_else(|| ticket("region width missing"))?;
        let height = number(xml, "Height")?.ok_or_else(|| ticket("region height missing"))?;
        if left < 0.0 || top < 0.0 || width <= 0.0 || height <= 0.0 {
            return Err(ticket("scan region out of range"));
        }

        let units = text(xml, "ContentRegionUnits").unwrap_or_default();
        if units != UNITS_THREE_HUNDREDTHS {
            return Err(ticket(format!("unsupported region units '{units}'")));
        }
        let px_per_unit = resolution / 300.0;

        let (color_space, bit_depth) = color_mode(&text(xml, "ColorMode").unwrap_or_default())?;

        let mut document_format = text(xml, "DocumentFormat")
            .filter(|f| !f.is_empty())
            .or_else(|| text(xml, "DocumentFormatExt"))
            .unwrap_or_default();
        if autoselect_format {
            document_format = MIME_TYPE_PNG.to_string();
        }

        let source_name = text(xml, "InputSource").unwrap_or_default();
        let input_source = InputSource::from_escl(&source_name)
            .ok_or_else(|| ticket(format!("unknown input source '{source_name}'")))?;
        let (kind, images_to_transfer) = match input_source {
            InputSource::Platen => (JobKind::Single, 1),
            InputSource::Feeder => {
                let batch = number(xml, "BatchIfPossible")? == Some(1.0);
                if batch && document_format == MIME_TYPE_PDF {
                    (JobKind::AdfConcat, i32::MAX)
                } else {
                    (JobKind::AdfSingle, i32::MAX)
                }
            }
        };

        Ok(Self {
            resolution_dpi: resolution as u32,
            left_px: left * px_per_unit,
            top_px: top * px_per_unit,
            width_px: width * px_per_unit,
            height_px: height * px_per_unit,
            color_space,
            bit_depth,
            document_format,
            intent: text(xml, "Intent").unwrap_or_default(),
            input_source,
            kind,
            images_to_transfer,
        })
    }
}

fn ticket(message: impl Into<String>) -> ScanwerkError {
    ScanwerkError::ScanTicket(message.into())
}

/// Text content of the first element with local name `name`.
fn text(xml: &str, name: &str) -> Option<String> {
    LEAF_ELEMENT
        .captures_iter(xml)
        .find(|c| &c[1] == name && &c[3] == name)
        .map(|c| unescape(c[2].trim()))
}

fn number(xml: &str, name: &str) -> Result<Option<f64>> {
    match text(xml, name) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<f64>()
            .map(Some)
            .map_err(|_| ticket(format!("{name}: '{raw}' is not a number"))),
    }
}

fn unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Split an eSCL colour mode (`RGB24`, `Grayscale8`) into colour space and
/// bits per sample.
fn color_mode(mode: &str) -> Result<(ColorSpace, u32)> {
    let caps = COLOR_MODE
        .captures(mode)
        .ok_or_else(|| ticket(format!("unsupported color mode '{mode}'")))?;
    let bits: u32 = caps[2]
        .parse()
        .map_err(|_| ticket(format!("unsupported color mode '{mode}'")))?;
    match &caps[1] {
        "RGB" if bits >= 3 => Ok((ColorSpace::Rgb, bits / 3)),
        "Grayscale" if bits >= 1 => Ok((ColorSpace::Grayscale, bits)),
        _ => Err(ticket(format!("unsupported color mode '{mode}'"))),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use scanwerk_core::MIME_TYPE_JPEG;

    /// Build a ticket the way eSCL clients send it.
    pub(crate) fn ticket_xml(source: &str, color_mode: &str, format: &str, res: u32, width: u32, height: u32) -> String {
        format!(
            "<?xml version='1.0' encoding='UTF-8'?>\n\
             <scan:ScanSettings xmlns:scan='http://schemas.hp.com/imaging/escl/2011/05/03' \
             xmlns:pwg='http://www.pwg.org/schemas/2010/12/sm'>\n\
             <pwg:Version>2.0</pwg:Version>\n\
             <scan:Intent>Document</scan:Intent>\n\
             <pwg:ScanRegions>\n<pwg:ScanRegion>\n\
             <pwg:ContentRegionUnits>escl:ThreeHundredthsOfInches</pwg:ContentRegionUnits>\n\
             <pwg:XOffset>0</pwg:XOffset>\n<pwg:YOffset>0</pwg:YOffset>\n\
             <pwg:Width>{width}</pwg:Width>\n<pwg:Height>{height}</pwg:Height>\n\
             </pwg:ScanRegion>\n</pwg:ScanRegions>\n\
             <pwg:InputSource>{source}</pwg:InputSource>\n\
             <scan:ColorMode>{color_mode}</scan:ColorMode>\n\
             <scan:XResolution>{res}</scan:XResolution>\n\
             <scan:YResolution>{res}</scan:YResolution>\n\
             <pwg:DocumentFormat>{format}</pwg:DocumentFormat>\n\
             </scan:ScanSettings>\n"
        )
    }

    #[test]
    fn parses_platen_ticket() {
        let xml = ticket_xml("Platen", "RGB24", MIME_TYPE_JPEG, 300, 2480, 3508);
        let s = ScanSettings::from_xml(&xml, false).expect("ticket");
        assert_eq!(s.resolution_dpi, 300);
        assert_eq!((s.width_px, s.height_px), (2480.0, 3508.0));
        assert_eq!((s.color_space, s.bit_depth), (ColorSpace::Rgb, 8));
        assert_eq!(s.kind, JobKind::Single);
        assert_eq!(s.images_to_transfer, 1);
        assert_eq!(s.intent, "Document");
    }

    #[test]
    fn region_scales_with_resolution() {
        let xml = ticket_xml("Platen", "Grayscale16", MIME_TYPE_PNG, 150, 600, 300);
        let s = ScanSettings::from_xml(&xml, false).expect("ticket");
        assert_eq!((s.width_px, s.height_px), (300.0, 150.0));
        assert_eq!((s.color_space, s.bit_depth), (ColorSpace::Grayscale, 16));
    }

    #[test]
    fn feeder_pdf_with_batch_flag_concatenates() {
        let xml = ticket_xml("Feeder", "Grayscale8", MIME_TYPE_PDF, 300, 2550, 3300)
            .replace("</scan:ScanSettings>", "<scan:BatchIfPossible>1</scan:BatchIfPossible></scan:ScanSettings>");
        let s = ScanSettings::from_xml(&xml, false).expect("ticket");
        assert_eq!(s.kind, JobKind::AdfConcat);
        assert_eq!(s.images_to_transfer, i32::MAX);

        let single = ticket_xml("Feeder", "Grayscale8", MIME_TYPE_PDF, 300, 2550, 3300);
        assert_eq!(ScanSettings::from_xml(&single, false).expect("ticket").kind, JobKind::AdfSingle);
    }

    #[test]
    fn mismatched_resolutions_are_rejected() {
        let xml = ticket_xml("Platen", "RGB24", MIME_TYPE_JPEG, 300, 100, 100)
            .replace("<scan:YResolution>300", "<scan:YResolution>600");
        assert!(matches!(ScanSettings::from_xml(&xml, false), Err(ScanwerkError::ScanTicket(_))));
    }

    #[test]
    fn bad_units_source_and_mode_are_rejected() {
        let units = ticket_xml("Platen", "RGB24", MIME_TYPE_JPEG, 300, 100, 100)
            .replace("escl:ThreeHundredthsOfInches", "escl:Millimeters");
        assert!(ScanSettings::from_xml(&units, false).is_err());
        let source = ticket_xml("Camera", "RGB24", MIME_TYPE_JPEG, 300, 100, 100);
        assert!(ScanSettings::from_xml(&source, false).is_err());
        let mode = ticket_xml("Platen", "BlackAndWhite1", MIME_TYPE_JPEG, 300, 100, 100);
        assert!(ScanSettings::from_xml(&mode, false).is_err());
    }

    #[test]
    fn format_ext_fallback_and_autoselect() {
        let xml = ticket_xml("Platen", "RGB24", "", 300, 100, 100).replace(
            "</scan:ScanSettings>",
            "<scan:DocumentFormatExt>application/pdf</scan:DocumentFormatExt></scan:ScanSettings>",
        );
        assert_eq!(ScanSettings::from_xml(&xml, false).expect("ticket").document_format, MIME_TYPE_PDF);
        assert_eq!(ScanSettings::from_xml(&xml, true).expect("ticket").document_format, MIME_TYPE_PNG);
    }

    #[test]
    fn unprefixed_elements_are_found() {
        assert_eq!(text("<a><Width>12</Width></a>", "Width").as_deref(), Some("12"));
        assert_eq!(text("<pwg:Width >7</pwg:Width>", "Width").as_deref(), Some("7"));
        assert_eq!(text("<MaxWidth>7</MaxWidth>", "Width"), None);
        assert_eq!(text("<Width>3</Height>", "Width"), None);
        assert_eq!(text("<Height>1</Height><Width>2</Width>", "Width").as_deref(), Some("2"));
    }
}
