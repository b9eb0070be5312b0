// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanwerk — Core types, configuration, and error definitions shared across
// all crates.

pub mod config;
pub mod error;
pub mod options;
pub mod types;

pub use config::{BackendKind, ServerConfig, SimulatedDeviceConfig};
pub use error::ScanwerkError;
pub use options::{DeviceOptions, IgnoreList, OptionsFile};
pub use types::*;
