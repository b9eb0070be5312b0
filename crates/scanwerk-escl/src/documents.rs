// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// eSCL XML documents: ScannerCapabilities and ScannerStatus.
//
// Element names and nesting follow what AirScan/Mopria clients parse; the
// documents are written line by line with CRLF endings.

use std::fmt::Write as _;

use scanwerk_core::{ColorSpace, escl_color_mode};
use scanwerk_device::DeviceStatus;

use crate::scanner::{Capabilities, InputSourceCaps, Scanner};

const XML_HEADER: &str = "<?xml version='1.0' encoding='UTF-8'?>\r\n";
const NAMESPACES: &str = "xmlns:pwg='http://www.pwg.org/schemas/2010/12/sm' \
                          xmlns:scan='http://schemas.hp.com/imaging/escl/2011/05/03'";

/// Escape the five XML special characters.
pub fn xml_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
    out
}

/// Status keyword for the scanner's feeder.
pub fn adf_state_string(status: DeviceStatus) -> &'static str {
    match status {
        DeviceStatus::Good => "ScannerAdfLoaded",
        DeviceStatus::Jammed => "ScannerAdfJam",
        DeviceStatus::CoverOpen => "ScannerAdfDoorOpen",
        DeviceStatus::NoDocs => "ScannerAdfEmpty",
        _ => "",
    }
}

// ---------------------------------------------------------------------------
// ScannerCapabilities
// ---------------------------------------------------------------------------

/// Render the `scan:ScannerCapabilities` document.
pub fn scanner_capabilities_xml(scanner: &Scanner) -> String {
    let caps = scanner.capabilities();
    let mut out = String::new();
    let mut profile = 0u32;

    out.push_str(XML_HEADER);
    let _ = write!(out, "<scan:ScannerCapabilities {NAMESPACES}>\r\n");
    out.push_str("<pwg:Version>2.0</pwg:Version>\r\n");
    let _ = write!(out, "<pwg:MakeAndModel>{}</pwg:MakeAndModel>\r\n", xml_escape(scanner.make_and_model()));
    out.push_str("<pwg:SerialNumber>1.0</pwg:SerialNumber>\r\n");
    let _ = write!(out, "<scan:UUID>{}</scan:UUID>\r\n", scanner.uuid());
    if !scanner.admin_url().is_empty() {
        let _ = write!(out, "<scan:AdminURI>{}</scan:AdminURI>\r\n", xml_escape(scanner.admin_url()));
    }
    if !scanner.icon_url().is_empty() {
        let _ = write!(out, "<scan:IconURI>{}</scan:IconURI>\r\n", xml_escape(scanner.icon_url()));
    }

    if let Some(platen) = &caps.platen {
        out.push_str("<scan:Platen>\r\n<scan:PlatenInputCaps>\r\n");
        write_input_caps(&mut out, caps, platen, &mut profile);
        out.push_str("</scan:PlatenInputCaps>\r\n</scan:Platen>\r\n");
    }
    if let Some(adf) = &caps.adf {
        let element = if caps.duplex { "scan:AdfDuplexInputCaps" } else { "scan:AdfSimplexInputCaps" };
        let _ = write!(out, "<scan:Adf>\r\n<{element}>\r\n");
        write_input_caps(&mut out, caps, adf, &mut profile);
        let _ = write!(out, "</{element}>\r\n");
        out.push_str(
            "<scan:AdfOptions>\r\n\
             <scan:AdfOption>DetectPaperLoaded</scan:AdfOption>\r\n\
             </scan:AdfOptions>\r\n\
             </scan:Adf>\r\n",
        );
    }
    out.push_str("</scan:ScannerCapabilities>\r\n");
    out
}

fn write_input_caps(out: &mut String, caps: &Capabilities, source: &InputSourceCaps, profile: &mut u32) {
    for (name, value) in [
        ("MinWidth", source.min_width),
        ("MinHeight", source.min_height),
        ("MaxWidth", source.max_width),
        ("MaxHeight", source.max_height),
        ("MaxPhysicalWidth", source.max_physical_width),
        ("MaxPhysicalHeight", source.max_physical_height),
    ] {
        let _ = write!(out, "<scan:{name}>{value}</scan:{name}>\r\n");
    }
    out.push_str("<scan:MaxScanRegions>1</scan:MaxScanRegions>\r\n<scan:SettingProfiles>\r\n");
    write_setting_profile(out, caps, source.max_bits, profile);
    out.push_str("</scan:SettingProfiles>\r\n<scan:SupportedIntents>\r\n");
    for intent in &source.intents {
        let _ = write!(out, "<scan:SupportedIntent>{intent}</scan:SupportedIntent>\r\n");
    }
    out.push_str("</scan:SupportedIntents>\r\n");
}

fn write_setting_profile(out: &mut String, caps: &Capabilities, max_bits: u32, profile: &mut u32) {
    let _ = write!(out, "<scan:SettingProfile name='{profile}'>\r\n<scan:ColorModes>\r\n");
    *profile += 1;
    for color_space in &caps.color_spaces {
        for bits in (8..=max_bits).step_by(8) {
            let _ = write!(out, "<scan:ColorMode>{}</scan:ColorMode>\r\n", escl_color_mode(*color_space, bits));
        }
    }
    out.push_str(
        "</scan:ColorModes>\r\n\
         <scan:ColorSpaces>\r\n\
         <scan:ColorSpace>RGB</scan:ColorSpace>\r\n\
         </scan:ColorSpaces>\r\n\
         <scan:SupportedResolutions>\r\n",
    );
    if caps.discrete_resolutions.is_empty() {
        out.push_str("<scan:ResolutionRange />\r\n");
        for axis in ["XResolutionRange", "YResolutionRange"] {
            let _ = write!(
                out,
                "<scan:{axis}>\r\n<scan:Min>{}</scan:Min>\r\n<scan:Max>{}</scan:Max>\r\n\
                 <scan:Step>{}</scan:Step>\r\n</scan:{axis}>\r\n",
                caps.min_resolution, caps.max_resolution, caps.resolution_step
            );
        }
    } else {
        out.push_str("<scan:DiscreteResolutions>\r\n");
        for res in &caps.discrete_resolutions {
            let _ = write!(
                out,
                "<scan:DiscreteResolution>\r\n<scan:XResolution>{res}</scan:XResolution>\r\n\
                 <scan:YResolution>{res}</scan:YResolution>\r\n</scan:DiscreteResolution>\r\n"
            );
        }
        out.push_str("</scan:DiscreteResolutions>\r\n");
    }
    out.push_str("</scan:SupportedResolutions>\r\n<scan:DocumentFormats>\r\n");
    for format in &caps.document_formats {
        let _ = write!(out, "<pwg:DocumentFormat>{format}</pwg:DocumentFormat>\r\n");
    }
    out.push_str("</scan:DocumentFormats>\r\n</scan:SettingProfile>\r\n");
}

/// TXT-record colour space keywords (`grayscale`, `color`).
pub fn txt_color_space(color_space: ColorSpace) -> &'static str {
    match color_space {
        ColorSpace::Grayscale => "grayscale",
        ColorSpace::Rgb => "color",
    }
}

// ---------------------------------------------------------------------------
// ScannerStatus
// ---------------------------------------------------------------------------

/// Render the `scan:ScannerStatus` document.  Reading it consumes the
/// scanner's temporary feeder status.
pub fn scanner_status_xml(scanner: &Scanner) -> String {
    let mut out = String::new();
    out.push_str(XML_HEADER);
    let _ = write!(out, "<scan:ScannerStatus {NAMESPACES}>\r\n");
    out.push_str("<pwg:Version>2.0</pwg:Version>\r\n");
    let _ = write!(out, "<pwg:State>{}</pwg:State>\r\n", scanner.status_string());
    out.push_str("<pwg:StateReasons>\r\n<pwg:StateReason>None</pwg:StateReason>\r\n</pwg:StateReasons>\r\n");
    if scanner.has_adf() {
        let _ = write!(
            out,
            "<scan:AdfState>{}</scan:AdfState>\r\n",
            adf_state_string(scanner.take_temporary_adf_status())
        );
    }
    out.push_str("<scan:Jobs>\r\n");
    for job in scanner.jobs() {
        out.push_str(&job.job_info_xml());
    }
    out.push_str("</scan:Jobs>\r\n</scan:ScannerStatus>\r\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan_settings::tests::ticket_xml;
    use crate::scanner::tests::{scanner, scanner_with};
    use scanwerk_core::{MIME_TYPE_PNG, SimulatedDeviceConfig};

    #[test]
    fn escapes_markup() {
        assert_eq!(xml_escape(r#"A&B <"x"> 'y'"#), "A&amp;B &lt;&quot;x&quot;&gt; &apos;y&apos;");
    }

    #[test]
    fn capabilities_describe_both_sources() {
        let mut scanner = scanner();
        scanner.set_admin_url("http://host:8090/eSCL");
        let xml = scanner_capabilities_xml(&scanner);
        assert!(xml.starts_with(XML_HEADER));
        assert!(xml.contains("<pwg:MakeAndModel>Scanwerk Virtual Scanner</pwg:MakeAndModel>\r\n"));
        assert!(xml.contains(&format!("<scan:UUID>{}</scan:UUID>", scanner.uuid())));
        assert!(xml.contains("<scan:AdminURI>http://host:8090/eSCL</scan:AdminURI>"));
        assert!(!xml.contains("IconURI"));
        assert!(xml.contains("<scan:PlatenInputCaps>"));
        assert!(xml.contains("<scan:AdfSimplexInputCaps>"));
        assert!(xml.contains("<scan:MaxWidth>2550</scan:MaxWidth>"));
        assert!(xml.contains("<scan:SettingProfile name='0'>"));
        assert!(xml.contains("<scan:SettingProfile name='1'>"));
        assert!(xml.contains("<scan:ColorMode>Grayscale8</scan:ColorMode>"));
        assert!(xml.contains("<scan:ColorMode>RGB24</scan:ColorMode>"));
        assert!(!xml.contains("RGB48"));
        assert!(xml.contains("<scan:XResolution>600</scan:XResolution>"));
        assert!(xml.contains("<pwg:DocumentFormat>application/pdf</pwg:DocumentFormat>"));
        assert!(xml.contains("<scan:SupportedIntent>Preview</scan:SupportedIntent>"));
        assert!(xml.contains("<scan:AdfOption>DetectPaperLoaded</scan:AdfOption>"));
        assert!(xml.ends_with("</scan:ScannerCapabilities>\r\n"));
    }

    #[test]
    fn deep_duplex_capabilities() {
        let scanner = scanner_with(SimulatedDeviceConfig {
            max_depth: 16,
            duplex: true,
            flatbed: false,
            ..SimulatedDeviceConfig::default()
        });
        let xml = scanner_capabilities_xml(&scanner);
        assert!(!xml.contains("<scan:Platen>"));
        assert!(xml.contains("<scan:AdfDuplexInputCaps>"));
        assert!(xml.contains("<scan:ColorMode>Grayscale16</scan:ColorMode>"));
        assert!(xml.contains("<scan:ColorMode>RGB48</scan:ColorMode>"));
    }

    #[test]
    fn status_reports_jobs_and_resets_adf_state() {
        let scanner = scanner();
        let xml = ticket_xml("Platen", "Grayscale8", MIME_TYPE_PNG, 75, 300, 300);
        let job = scanner.create_job_from_scan_settings_xml(&xml, false).expect("job");
        scanner.set_temporary_adf_status(DeviceStatus::NoDocs);

        let status = scanner_status_xml(&scanner);
        assert!(status.contains("<pwg:State>Idle</pwg:State>"));
        assert!(status.contains("<scan:AdfState>ScannerAdfEmpty</scan:AdfState>"));
        assert!(status.contains(&format!("<pwg:JobUuid>{}</pwg:JobUuid>", job.uuid())));

        let again = scanner_status_xml(&scanner);
        assert!(again.contains("<scan:AdfState>ScannerAdfLoaded</scan:AdfState>"));
    }

    #[test]
    fn status_shows_processing_while_session_open() {
        let scanner = scanner();
        let xml = ticket_xml("Platen", "Grayscale8", MIME_TYPE_PNG, 75, 300, 300);
        let job = scanner.create_job_from_scan_settings_xml(&xml, false).expect("job");
        assert!(job.begin_transfer());
        assert!(scanner_status_xml(&scanner).contains("<pwg:State>Processing</pwg:State>"));
        job.finish_transfer(Vec::new()).expect("finish");
        assert!(scanner_status_xml(&scanner).contains("<pwg:State>Idle</pwg:State>"));
    }
}
