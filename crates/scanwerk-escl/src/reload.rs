// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Server reload triggers.
//
// A reload tears the server down and rebuilds it from a fresh device
// enumeration.  It is requested from the web interface's reset page or
// by the hotplug monitor, which polls the backend and reports when the
// set of attached devices changes.

use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_device::DeviceBackend;
use tracing::{debug, info, warn};

use crate::scanner::Scanner;

/// Why the server is being rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadReason {
    /// Requested through the web interface.
    Reset,
    /// Devices were attached or removed.
    Hotplug,
}

impl std::fmt::Display for ReloadReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Reset => "reset",
            Self::Hotplug => "hotplug",
        })
    }
}

struct Signal {
    terminate: Mutex<bool>,
    wake: Condvar,
}

/// Background thread that re-enumerates devices every interval and sends
/// `ReloadReason::Hotplug` once the device list differs from the one seen
/// at start.  Dropping it signals the thread and joins it.
pub struct HotplugMonitor {
    signal: Arc<Signal>,
    handle: Option<JoinHandle<()>>,
}

impl HotplugMonitor {
    pub fn start(
        backend: Arc<dyn DeviceBackend>,
        local_only: bool,
        scanners: Vec<Arc<Scanner>>,
        interval: Duration,
        notify: Sender<ReloadReason>,
    ) -> Result<Self> {
        let baseline = device_names(backend.as_ref(), local_only)?;
        let signal = Arc::new(Signal {
            terminate: Mutex::new(false),
            wake: Condvar::new(),
        });
        let thread_signal = Arc::clone(&signal);
        let handle = std::thread::Builder::new()
            .name("hotplug".into())
            .spawn(move || {
                let watch = Watch {
                    backend,
                    local_only,
                    scanners,
                    baseline,
                };
                run(&thread_signal, &watch, interval, &notify);
            })
            .map_err(|e| ScanwerkError::Server(format!("cannot start hotplug thread: {e}")))?;
        info!(interval_secs = interval.as_secs(), "hotplug monitor started");
        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        {
            let mut terminate = self.signal.terminate.lock().unwrap_or_else(|p| p.into_inner());
            *terminate = true;
        }
        self.signal.wake.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            debug!("hotplug monitor joined");
        }
    }
}

impl Drop for HotplugMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Watch {
    backend: Arc<dyn DeviceBackend>,
    local_only: bool,
    scanners: Vec<Arc<Scanner>>,
    baseline: Vec<String>,
}

impl Watch {
    /// Whether the attached devices differ from the baseline.  Skipped
    /// while a scanner has an open session; drivers are not re-entered
    /// mid-scan.
    fn changed(&self) -> bool {
        if self.scanners.iter().any(|s| s.is_open()) {
            return false;
        }
        match device_names(self.backend.as_ref(), self.local_only) {
            Ok(current) => current != self.baseline,
            Err(e) => {
                warn!(error = %e, "hotplug enumeration failed");
                false
            }
        }
    }
}

fn device_names(backend: &dyn DeviceBackend, local_only: bool) -> Result<Vec<String>> {
    let mut names: Vec<String> = backend.enumerate(local_only)?.into_iter().map(|d| d.name).collect();
    names.sort();
    Ok(names)
}

fn run(signal: &Signal, watch: &Watch, interval: Duration, notify: &Sender<ReloadReason>) {
    let mut terminate = signal.terminate.lock().unwrap_or_else(|p| p.into_inner());
    loop {
        let (guard, _) = signal
            .wake
            .wait_timeout_while(terminate, interval, |stop| !*stop)
            .unwrap_or_else(|p| p.into_inner());
        terminate = guard;
        if *terminate {
            return;
        }
        if watch.changed() {
            info!("attached devices changed");
            let _ = notify.send(ReloadReason::Hotplug);
            return;
        }
    }
}
