// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device status codes and scan frame parameters.

use serde::{Deserialize, Serialize};

/// Outcome of a single device operation.
///
/// Every driver call reports one of these; `Good` is the only success value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceStatus {
    Good,
    Unsupported,
    Cancelled,
    DeviceBusy,
    /// Invalid parameters or option values.
    Inval,
    /// End of the current page.
    Eof,
    Jammed,
    /// The feeder has no more sheets.
    NoDocs,
    CoverOpen,
    IoError,
    NoMem,
    AccessDenied,
}

impl DeviceStatus {
    pub fn is_good(self) -> bool {
        self == Self::Good
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Good => "Success",
            Self::Unsupported => "Operation not supported",
            Self::Cancelled => "Operation was cancelled",
            Self::DeviceBusy => "Device busy",
            Self::Inval => "Invalid argument",
            Self::Eof => "End of file reached",
            Self::Jammed => "Document feeder jammed",
            Self::NoDocs => "Document feeder out of documents",
            Self::CoverOpen => "Scanner cover is open",
            Self::IoError => "Error during device I/O",
            Self::NoMem => "Out of memory",
            Self::AccessDenied => "Access to resource has been denied",
        }
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Layout of the frame a session delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameFormat {
    Gray,
    Rgb,
}

/// Geometry of the page currently being acquired, as reported by the device
/// after `start()`.  May differ from what was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanParameters {
    pub format: FrameFormat,
    pub bytes_per_line: usize,
    pub pixels_per_line: u32,
    pub lines: u32,
    /// Bits per sample.
    pub depth: u32,
}

impl ScanParameters {
    /// Compute parameters for a packed frame of the given size.
    pub fn for_frame(format: FrameFormat, pixels_per_line: u32, lines: u32, depth: u32) -> Self {
        let components = match format {
            FrameFormat::Gray => 1,
            FrameFormat::Rgb => 3,
        };
        let bits = pixels_per_line as usize * components * depth as usize;
        Self {
            format,
            bytes_per_line: bits.div_ceil(8),
            pixels_per_line,
            lines,
            depth,
        }
    }
}
