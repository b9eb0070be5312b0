// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanwerk eSCL — scanner model, scan jobs, the eSCL HTTP server with its
// access log, DNS-SD announcement, and reload triggers.  Builds on the
// device sessions of `scanwerk-device` and the encoders of
// `scanwerk-document`.

pub mod access_log;
pub mod announce;
pub mod documents;
pub mod escl_server;
pub mod http;
pub mod purge;
pub mod reload;
pub mod scan_job;
pub mod scan_settings;
pub mod scanner;
pub mod session_slot;
pub mod worker;

pub use access_log::AccessLog;
pub use announce::Announcer;
pub use escl_server::{EsclServer, ServerOptions};
pub use purge::PurgeThread;
pub use reload::{HotplugMonitor, ReloadReason};
pub use scan_job::ScanJob;
pub use scan_settings::ScanSettings;
pub use scanner::{Capabilities, Scanner, choose_unique_published_name};
