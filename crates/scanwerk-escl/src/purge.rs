// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Periodic removal of idle scan jobs.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use scanwerk_core::error::{Result, ScanwerkError};
use tracing::{debug, info};

use crate::scanner::Scanner;

struct Signal {
    terminate: Mutex<bool>,
    wake: Condvar,
}

/// Background thread sweeping every scanner's job table.  Dropping it
/// signals the thread and joins it.
pub struct PurgeThread {
    signal: Arc<Signal>,
    handle: Option<JoinHandle<()>>,
}

impl PurgeThread {
    /// Every `interval`, purge jobs idle for longer than `max_idle`.
    pub fn start(scanners: Vec<Arc<Scanner>>, interval: Duration, max_idle: Duration) -> Result<Self> {
        let signal = Arc::new(Signal {
            terminate: Mutex::new(false),
            wake: Condvar::new(),
        });
        let thread_signal = Arc::clone(&signal);
        let handle = std::thread::Builder::new()
            .name("purge".into())
            .spawn(move || run(&thread_signal, &scanners, interval, max_idle.as_secs()))
            .map_err(|e| ScanwerkError::Server(format!("cannot start purge thread: {e}")))?;
        info!(interval_secs = interval.as_secs(), max_idle_secs = max_idle.as_secs(), "purge thread started");
        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait for it to finish.
    pub fn stop(&mut self) {
        {
            let mut terminate = self.signal.terminate.lock().unwrap_or_else(|p| p.into_inner());
            *terminate = true;
        }
        self.signal.wake.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            debug!("purge thread joined");
        }
    }
}

impl Drop for PurgeThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(signal: &Signal, scanners: &[Arc<Scanner>], interval: Duration, max_idle_secs: u64) {
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
        let removed: usize = scanners.iter().map(|s| s.purge_jobs(max_idle_secs)).sum();
        if removed > 0 {
            debug!(removed, "purge sweep finished");
        }
    }
}
