// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Driver-agnostic trait definitions for scanner access.
//
// A backend enumerates devices and opens sessions.  A session is the only
// way to touch a device: it exposes the option map, starts a page, reads
// raw scan lines, and cancels.  Drivers are not assumed to be thread-safe,
// so sessions are `Send` but not `Sync`; the one operation other threads
// may perform is cancellation, through a `CancelHandle`.

use std::sync::Arc;

use scanwerk_core::error::Result;

use crate::options::{OptionSet, OptionValue};
use crate::status::{DeviceStatus, ScanParameters};

/// Identity of a device as reported by enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Driver-level name used to open the device.
    pub name: String,
    pub vendor: String,
    pub model: String,
    /// Device type, e.g. "flatbed scanner".
    pub kind: String,
}

impl DeviceInfo {
    pub fn make_and_model(&self) -> String {
        format!("{} {}", self.vendor, self.model)
    }
}

/// Source of devices and sessions.
pub trait DeviceBackend: Send + Sync {
    /// Human-readable backend name for logging.
    fn backend_name(&self) -> &str;

    /// List attached devices.  With `local_only`, network scanners are skipped.
    fn enumerate(&self, local_only: bool) -> Result<Vec<DeviceInfo>>;

    /// Open a session on the named device.
    fn open(&self, device_name: &str) -> std::result::Result<Box<dyn DeviceSession>, DeviceStatus>;
}

/// An open session on one device.
///
/// Implementations must call `cancel()` when dropped; cancelling a session
/// that has nothing in flight is a no-op.
pub trait DeviceSession: Send {
    fn device_name(&self) -> &str;

    /// Current option snapshot.
    fn options(&self) -> &OptionSet;

    /// Write an option.  Writes that change dependent options reload the
    /// snapshot before returning.  Unknown, read-only, or unacceptable
    /// values yield `DeviceStatus::Inval`.
    fn set_option(&mut self, name: &str, value: &OptionValue) -> DeviceStatus;

    /// Begin acquiring one page.
    fn start(&mut self) -> DeviceStatus;

    /// Parameters of the page started last.
    fn parameters(&self) -> ScanParameters;

    /// Fill `buffer` completely with raw scan data.  `Eof` marks the end of
    /// the page; any other non-good status ends the transfer.
    fn read(&mut self, buffer: &mut [u8]) -> DeviceStatus;

    /// Abort any acquisition in progress.
    fn cancel(&mut self);

    /// Handle that lets another thread request cancellation.
    fn cancel_handle(&self) -> CancelHandle;
}

/// Something that can abort a session from another thread.
pub trait SessionCanceller: Send + Sync {
    fn cancel(&self);
}

/// Cloneable, thread-safe handle to a session's cancellation.
#[derive(Clone)]
pub struct CancelHandle(Arc<dyn SessionCanceller>);

impl CancelHandle {
    pub fn new(canceller: Arc<dyn SessionCanceller>) -> Self {
        Self(canceller)
    }

    pub fn cancel(&self) {
        self.0.cancel();
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CancelHandle")
    }
}
