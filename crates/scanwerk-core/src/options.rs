// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device options file and device ignore list.
//
// Options file format, one setting per line:
//
// ```text
// # global settings apply to every device
// gray-gamma 1.2
// device fujitsu:.*
//   synthesize-gray yes
//   icon /usr/share/scanwerk/fujitsu.png
//   page-height 355.6
// ```
//
// A `device <regex>` line opens a section that applies to devices whose
// driver name or "vendor model" string the regex matches in full.  Names
// other than the recognised ones below are passed to the device unchanged.

use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{Result, ScanwerkError};

/// Gamma exponent for grayscale scans.
pub const OPTION_GRAY_GAMMA: &str = "gray-gamma";
/// Gamma exponent for colour scans.
pub const OPTION_COLOR_GAMMA: &str = "color-gamma";
/// Produce grayscale from the device's colour mode.
pub const OPTION_SYNTHESIZE_GRAY: &str = "synthesize-gray";
/// Icon file served at `/ScannerIcon`.
pub const OPTION_ICON: &str = "icon";
/// Note published in the mDNS TXT record.
pub const OPTION_NOTE: &str = "note";

/// Ordered `name value` pairs.
pub type OptionPairs = Vec<(String, String)>;

/// Effective options for one scanner, after merging global and matching
/// device sections.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceOptions {
    pub gray_gamma: f32,
    pub color_gamma: f32,
    pub synthesize_gray: bool,
    pub icon: Option<PathBuf>,
    pub note: Option<String>,
    /// Options handed to the device driver, in file order.
    pub device_options: OptionPairs,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            gray_gamma: 1.0,
            color_gamma: 1.0,
            synthesize_gray: false,
            icon: None,
            note: None,
            device_options: Vec::new(),
        }
    }
}

impl DeviceOptions {
    /// Interpret raw pairs.  Later pairs override earlier ones.
    pub fn from_pairs(pairs: &[(String, String)]) -> Self {
        let mut options = Self::default();
        for (name, value) in pairs {
            match name.as_str() {
                OPTION_GRAY_GAMMA => options.gray_gamma = parse_gamma(name, value, options.gray_gamma),
                OPTION_COLOR_GAMMA => {
                    options.color_gamma = parse_gamma(name, value, options.color_gamma)
                }
                OPTION_SYNTHESIZE_GRAY => options.synthesize_gray = parse_flag(value),
                OPTION_ICON => options.icon = Some(PathBuf::from(value)),
                OPTION_NOTE => options.note = Some(value.clone()),
                _ => options.device_options.push((name.clone(), value.clone())),
            }
        }
        options
    }
}

fn parse_gamma(name: &str, value: &str, current: f32) -> f32 {
    match value.parse::<f32>() {
        Ok(g) if g.is_finite() && g > 0.0 => g,
        _ => {
            warn!(option = name, value, "ignoring invalid gamma value");
            current
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "yes" | "true" | "on" | "1"
    )
}

/// Compile `pattern` so that it must match the whole input.
fn full_match_regex(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{pattern})$"))
}

/// One `device <regex>` section.
#[derive(Debug, Clone)]
struct DeviceSection {
    pattern: String,
    regex: Regex,
    options: OptionPairs,
}

/// Parsed device options file.
#[derive(Debug, Clone, Default)]
pub struct OptionsFile {
    file_name: String,
    global: OptionPairs,
    sections: Vec<DeviceSection>,
}

impl OptionsFile {
    /// Read an options file.  A missing file yields an empty option set.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                info!(path = %path.display(), "reading device options");
                Self::parse(&path.display().to_string(), &text)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no device options file");
                Ok(Self {
                    file_name: path.display().to_string(),
                    ..Self::default()
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Parse options file text.  `file_name` is used in log and error messages.
    pub fn parse(file_name: &str, text: &str) -> Result<Self> {
        let mut file = Self {
            file_name: file_name.to_string(),
            ..Self::default()
        };

        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (name, value) = match line.split_once(char::is_whitespace) {
                Some((n, v)) => (n.to_string(), v.trim().to_string()),
                None => (line.to_string(), String::new()),
            };

            if name == "device" {
                let regex = full_match_regex(&value).map_err(|e| {
                    ScanwerkError::OptionsFile(format!(
                        "{file_name}:{}: invalid device regex '{value}': {e}",
                        index + 1
                    ))
                })?;
                file.sections.push(DeviceSection {
                    pattern: value,
                    regex,
                    options: Vec::new(),
                });
            } else if let Some(section) = file.sections.last_mut() {
                section.options.push((name, value));
            } else {
                file.global.push((name, value));
            }
        }

        debug!(
            file = %file.file_name,
            global = file.global.len(),
            sections = file.sections.len(),
            "options file parsed"
        );
        Ok(file)
    }

    /// Raw option pairs for a device: global options first, then every
    /// matching section in file order.
    pub fn scanner_option_pairs(&self, device_name: &str, make_and_model: &str) -> OptionPairs {
        let mut pairs = self.global.clone();
        for section in &self.sections {
            if section.regex.is_match(device_name) {
                debug!(file = %self.file_name, regex = %section.pattern, device_name, "device section matches device name");
            } else if section.regex.is_match(make_and_model) {
                debug!(file = %self.file_name, regex = %section.pattern, make_and_model, "device section matches make and model");
            } else {
                continue;
            }
            pairs.extend(section.options.iter().cloned());
        }
        pairs
    }

    /// Effective options for a device.
    pub fn scanner_options(&self, device_name: &str, make_and_model: &str) -> DeviceOptions {
        DeviceOptions::from_pairs(&self.scanner_option_pairs(device_name, make_and_model))
    }
}

/// Devices that must not be served, one regex per line.
#[derive(Debug, Clone, Default)]
pub struct IgnoreList {
    patterns: Vec<Regex>,
}

impl IgnoreList {
    /// Read an ignore list.  A missing file ignores nothing.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Lines starting with `#`, `//`, or a space are comments.
    pub fn parse(text: &str) -> Result<Self> {
        let mut patterns = Vec::new();
        for line in text.lines() {
            if line.is_empty() || line.starts_with('#') || line.starts_with("//") || line.starts_with(' ') {
                continue;
            }
            let regex = full_match_regex(line.trim_end()).map_err(|e| {
                ScanwerkError::OptionsFile(format!("invalid ignore pattern '{line}': {e}"))
            })?;
            patterns.push(regex);
        }
        Ok(Self { patterns })
    }

    pub fn matches(&self, device_name: &str, make_and_model: &str) -> bool {
        self.patterns
            .iter()
            .any(|r| r.is_match(device_name) || r.is_match(make_and_model))
    }
}
