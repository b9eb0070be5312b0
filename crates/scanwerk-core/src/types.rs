// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Scanwerk scan server.

use serde::{Deserialize, Serialize};

/// MIME type of JPEG documents.
pub const MIME_TYPE_JPEG: &str = "image/jpeg";

/// MIME type of PNG documents.
pub const MIME_TYPE_PNG: &str = "image/png";

/// MIME type of PDF documents.
pub const MIME_TYPE_PDF: &str = "application/pdf";

/// Document formats every scanner offers, in advertisement order.
pub const DOCUMENT_FORMATS: [&str; 3] = [MIME_TYPE_PDF, MIME_TYPE_JPEG, MIME_TYPE_PNG];

/// Lifecycle states of a scan job.
///
/// `Pending` and `Processing` are the only non-terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum JobState {
    Pending = 0,
    Processing = 1,
    Completed = 2,
    Canceled = 3,
    Aborted = 4,
}

impl JobState {
    /// Name used in the `pwg:JobState` element.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Processing => "Processing",
            Self::Completed => "Completed",
            Self::Canceled => "Canceled",
            Self::Aborted => "Aborted",
        }
    }

    /// Whether no further transfers can happen for a job in this state.
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Canceled | Self::Aborted)
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Pending,
            1 => Self::Processing,
            2 => Self::Completed,
            3 => Self::Canceled,
            _ => Self::Aborted,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// PWG job-state-reason keywords reported in job status documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StateReason {
    None = 0,
    JobQueued = 1,
    JobScanning = 2,
    JobCompletedSuccessfully = 3,
    JobCanceledByUser = 4,
    InvalidScanTicket = 5,
    UnsupportedDocumentFormat = 6,
    DocumentPermissionError = 7,
    ResourcesAreNotReady = 8,
    ErrorsDetected = 9,
}

impl StateReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::JobQueued => "JobQueued",
            Self::JobScanning => "JobScanning",
            Self::JobCompletedSuccessfully => "JobCompletedSuccessfully",
            Self::JobCanceledByUser => "JobCanceledByUser",
            Self::InvalidScanTicket => "InvalidScanTicket",
            Self::UnsupportedDocumentFormat => "UnsupportedDocumentFormat",
            Self::DocumentPermissionError => "DocumentPermissionError",
            Self::ResourcesAreNotReady => "ResourcesAreNotReady",
            Self::ErrorsDetected => "ErrorsDetected",
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::None,
            1 => Self::JobQueued,
            2 => Self::JobScanning,
            3 => Self::JobCompletedSuccessfully,
            4 => Self::JobCanceledByUser,
            5 => Self::InvalidScanTicket,
            6 => Self::UnsupportedDocumentFormat,
            7 => Self::DocumentPermissionError,
            8 => Self::ResourcesAreNotReady,
            _ => Self::ErrorsDetected,
        }
    }
}

impl std::fmt::Display for StateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a job maps device pages onto transferred documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobKind {
    /// One page from the platen.
    Single,
    /// Feeder job delivering one document per `NextDocument` request.
    AdfSingle,
    /// Feeder job concatenating every page into one PDF.
    AdfConcat,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::AdfSingle => "ADF single",
            Self::AdfConcat => "ADF batch",
        }
    }

    pub fn is_feeder(self) -> bool {
        matches!(self, Self::AdfSingle | Self::AdfConcat)
    }
}

/// Physical input source requested by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputSource {
    Platen,
    Feeder,
}

impl InputSource {
    /// Parse the eSCL `InputSource` keyword.
    pub fn from_escl(value: &str) -> Option<Self> {
        match value {
            "Platen" => Some(Self::Platen),
            "Feeder" => Some(Self::Feeder),
            _ => None,
        }
    }
}

/// Colour space of encoded image data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorSpace {
    Grayscale,
    Rgb,
}

impl ColorSpace {
    /// Samples per pixel.
    pub fn components(self) -> usize {
        match self {
            Self::Grayscale => 1,
            Self::Rgb => 3,
        }
    }
}

/// eSCL colour-mode keyword (`Grayscale8`, `RGB24`, ...) for a colour space
/// and per-sample bit depth.
pub fn escl_color_mode(color_space: ColorSpace, bit_depth: u32) -> String {
    match color_space {
        ColorSpace::Grayscale => format!("Grayscale{bit_depth}"),
        ColorSpace::Rgb => format!("RGB{}", 3 * bit_depth),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_state_round_trips_through_u8() {
        for state in [
            JobState::Pending,
            JobState::Processing,
            JobState::Completed,
            JobState::Canceled,
            JobState::Aborted,
        ] {
            assert_eq!(JobState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn only_terminal_states_are_finished() {
        assert!(!JobState::Pending.is_finished());
        assert!(!JobState::Processing.is_finished());
        assert!(JobState::Completed.is_finished());
        assert!(JobState::Canceled.is_finished());
        assert!(JobState::Aborted.is_finished());
    }

    #[test]
    fn reason_keywords_match_pwg_vocabulary() {
        assert_eq!(StateReason::JobCompletedSuccessfully.as_str(), "JobCompletedSuccessfully");
        assert_eq!(StateReason::ResourcesAreNotReady.as_str(), "ResourcesAreNotReady");
        assert_eq!(StateReason::from_u8(StateReason::ErrorsDetected as u8), StateReason::ErrorsDetected);
    }

    #[test]
    fn color_modes_use_bits_per_pixel_for_rgb() {
        assert_eq!(escl_color_mode(ColorSpace::Grayscale, 8), "Grayscale8");
        assert_eq!(escl_color_mode(ColorSpace::Rgb, 8), "RGB24");
        assert_eq!(escl_color_mode(ColorSpace::Rgb, 16), "RGB48");
    }

    #[test]
    fn feeder_kinds() {
        assert!(!JobKind::Single.is_feeder());
        assert!(JobKind::AdfSingle.is_feeder());
        assert!(JobKind::AdfConcat.is_feeder());
        assert_eq!(InputSource::from_escl("Feeder"), Some(InputSource::Feeder));
        assert_eq!(InputSource::from_escl("Camera"), None);
    }
}
