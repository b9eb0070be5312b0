// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// One-session-per-device discipline.
//
// A scanner hands out at most one live device session.  The slot records
// an open flag and a generation counter; checking the flag and opening the
// driver session happen under the same lock, and the lease returned with
// the session clears the flag when it is dropped, but only for its own
// generation.

use std::sync::{Arc, Mutex, MutexGuard};

use scanwerk_device::{DeviceBackend, DeviceInfo, DeviceSession, DeviceStatus};
use tracing::debug;

#[derive(Debug, Default)]
struct SlotState {
    generation: u64,
    open: bool,
}

/// Device access point shared by a scanner and its jobs.
pub struct ScannerDevice {
    backend: Arc<dyn DeviceBackend>,
    info: DeviceInfo,
    slot: Mutex<SlotState>,
}

impl ScannerDevice {
    pub fn new(backend: Arc<dyn DeviceBackend>, info: DeviceInfo) -> Self {
        Self {
            backend,
            info,
            slot: Mutex::new(SlotState::default()),
        }
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether a session is currently open.
    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Open a fresh session unless one is already live.
    pub fn open_session(self: &Arc<Self>) -> Result<ActiveSession, DeviceStatus> {
        let mut slot = self.lock();
        if slot.open {
            debug!(device = %self.info.name, "session already open");
            return Err(DeviceStatus::DeviceBusy);
        }
        let session = self.backend.open(&self.info.name)?;
        slot.generation += 1;
        slot.open = true;
        debug!(device = %self.info.name, generation = slot.generation, "session opened");
        Ok(ActiveSession {
            session,
            _lease: SessionLease {
                device: Arc::clone(self),
                generation: slot.generation,
            },
        })
    }
}

/// Marks the slot as taken for the lifetime of one session.
struct SessionLease {
    device: Arc<ScannerDevice>,
    generation: u64,
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        let mut slot = self.device.lock();
        if slot.generation == self.generation {
            slot.open = false;
            debug!(device = %self.device.info.name, generation = self.generation, "session closed");
        }
    }
}

/// An open device session together with its slot lease.  The session is
/// dropped (and thereby cancelled) before the slot is released.
pub struct ActiveSession {
    session: Box<dyn DeviceSession>,
    _lease: SessionLease,
}

impl ActiveSession {
    pub fn session(&mut self) -> &mut dyn DeviceSession {
        self.session.as_mut()
    }

    pub fn session_ref(&self) -> &dyn DeviceSession {
        self.session.as_ref()
    }
}
