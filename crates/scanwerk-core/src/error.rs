// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Scanwerk.

use thiserror::Error;

/// Top-level error type for all Scanwerk operations.
#[derive(Debug, Error)]
pub enum ScanwerkError {
    // -- Configuration --
    #[error("configuration error: {0}")]
    Config(String),

    #[error("options file error: {0}")]
    OptionsFile(String),

    // -- Device --
    #[error("device error: {0}")]
    Device(String),

    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    // -- Scan jobs and documents --
    #[error("invalid scan ticket: {0}")]
    ScanTicket(String),

    #[error("image encoder failed: {0}")]
    Encoder(String),

    // -- Network --
    #[error("scan server error: {0}")]
    Server(String),

    #[error("mDNS announcement failed: {0}")]
    Announce(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ScanwerkError>;
