// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// HTTP access log in Apache combined format, one line per request.

use std::fs::OpenOptions;
use std::io::Write;
use std::net::IpAddr;
use std::sync::Mutex;

use chrono::{DateTime, FixedOffset, Local};
use scanwerk_core::config::ACCESS_LOG_STDOUT;
use scanwerk_core::error::{Result, ScanwerkError};
use tracing::{debug, warn};

use crate::http::HttpRequest;

/// Destination of access log lines, shared by all connection threads.
pub struct AccessLog {
    target: String,
    out: Mutex<Box<dyn Write + Send>>,
}

impl AccessLog {
    /// `-` logs to stdout; anything else is a file opened for appending.
    pub fn open(target: &str) -> Result<Self> {
        if target == ACCESS_LOG_STDOUT {
            return Ok(Self::from_writer(target, std::io::stdout()));
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(target)
            .map_err(|e| ScanwerkError::Config(format!("cannot open access log '{target}': {e}")))?;
        debug!(path = target, "access log opened");
        Ok(Self::from_writer(target, file))
    }

    pub fn from_writer(target: &str, out: impl Write + Send + 'static) -> Self {
        Self {
            target: target.to_string(),
            out: Mutex::new(Box::new(out)),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Log one request.  `request` is `None` when it could not be parsed.
    pub fn record(&self, peer: IpAddr, request: Option<&HttpRequest>, status: u16, bytes: u64) {
        let line = combined_line(peer, &Local::now().fixed_offset(), request, status, bytes);
        let mut out = self.out.lock().unwrap_or_else(|p| p.into_inner());
        if let Err(e) = writeln!(out, "{line}").and_then(|_| out.flush()) {
            warn!(error = %e, target = %self.target, "cannot write access log");
        }
    }
}

impl std::fmt::Debug for AccessLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessLog").field("target", &self.target).finish()
    }
}

fn combined_line(
    peer: IpAddr,
    time: &DateTime<FixedOffset>,
    request: Option<&HttpRequest>,
    status: u16,
    bytes: u64,
) -> String {
    let (method, path, referer, agent) = match request {
        Some(r) => (
            r.method.as_str(),
            r.path.as_str(),
            r.header("Referer").unwrap_or(""),
            r.header("User-Agent").unwrap_or(""),
        ),
        None => ("", "", "", ""),
    };
    format!(
        "{peer} - - [{}] \"{method} {path}\" {status} {bytes} \"{referer}\" \"{agent}\"",
        time.format("%d/%b/%Y:%T %z")
    )
}
