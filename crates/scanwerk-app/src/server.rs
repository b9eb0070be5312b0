// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Server bootstrap: enumerate devices, build scanners, and run the HTTP
// server, announcer, purge thread, and hotplug monitor.  A reload request
// tears all of it down and builds it again from a fresh enumeration.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::mpsc::{self, Sender};
use std::time::{Duration, Instant};

use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::{IgnoreList, OptionsFile, ServerConfig};
use scanwerk_device::DeviceBackend;
use scanwerk_escl::{
    AccessLog, Announcer, EsclServer, HotplugMonitor, PurgeThread, ReloadReason, Scanner, ServerOptions,
    choose_unique_published_name,
};
use tracing::{Span, debug, error, info, info_span, warn};
use uuid::Uuid;

/// Everything the process keeps alive while serving.
pub struct RunningServer {
    scanners: Vec<Arc<Scanner>>,
    server: EsclServer,
    announcer: Option<Announcer>,
    purge: PurgeThread,
    hotplug: Option<HotplugMonitor>,
}

impl RunningServer {
    pub fn scanners(&self) -> &[Arc<Scanner>] {
        &self.scanners
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// Withdraw announcements, stop the background threads and the server.
    pub fn shutdown(mut self) {
        if let Some(mut hotplug) = self.hotplug.take() {
            hotplug.stop();
        }
        if let Some(mut announcer) = self.announcer.take() {
            announcer.shutdown();
        }
        self.purge.stop();
        self.server.stop();
    }
}

/// Path under which the scanner at `index` is served.
fn scanner_uri(config: &ServerConfig, index: usize, scanner_uuid: &str) -> String {
    if config.compatible_path && index == 0 {
        return "/eSCL".to_string();
    }
    if config.random_paths {
        format!("/{}/{scanner_uuid}", Uuid::new_v4())
    } else {
        format!("/{scanner_uuid}")
    }
}

/// Enumerate devices and build an initialised scanner for each one that
/// is neither ignored nor failing.
pub fn build_scanners(
    config: &ServerConfig,
    backend: &Arc<dyn DeviceBackend>,
    options: &OptionsFile,
    ignore: &IgnoreList,
    hostname: &str,
    parent: &Span,
) -> Result<Vec<Scanner>> {
    let devices = backend.enumerate(config.local_scanners_only)?;
    info!(backend = backend.backend_name(), count = devices.len(), "devices enumerated");

    let mut stable_names: Vec<String> = Vec::new();
    let mut published_names: Vec<String> = Vec::new();
    let mut scanners = Vec::new();

    for info in devices {
        let make_and_model = info.make_and_model();
        if ignore.matches(&info.name, &make_and_model) {
            info!(device = %info.name, make_and_model = %make_and_model, "device ignored");
            continue;
        }
        let device_name = info.name.clone();
        let mut scanner = Scanner::new(Arc::clone(backend), info, &stable_names, parent);
        if let Err(e) = scanner.init_with_options(options) {
            error!(device = %device_name, error = %e, "failed to initialise scanner, skipping it");
            continue;
        }
        stable_names.push(scanner.stable_unique_name().to_string());

        let published = choose_unique_published_name(scanner.make_and_model(), &published_names);
        published_names.push(published.clone());
        scanner.set_published_name(published);

        let uri = scanner_uri(config, scanners.len(), scanner.uuid());
        let url = format!("http://{hostname}:{}{uri}", config.listen_port);
        if scanner.options().icon.is_some() {
            scanner.set_icon_url(format!("{url}/ScannerIcon"));
        }
        if config.web_interface {
            scanner.set_admin_url(url);
        }
        scanner.set_uri(uri);
        scanners.push(scanner);
    }

    if scanners.is_empty() {
        warn!("no scanners to serve");
    }
    Ok(scanners)
}

/// Serve until startup fails, rebuilding the server on every reload
/// request.
pub fn serve(config: &ServerConfig, backend: Arc<dyn DeviceBackend>) -> Result<()> {
    let (reload_tx, reload_rx) = mpsc::channel();
    loop {
        let running = start(config, Arc::clone(&backend), reload_tx.clone())?;
        info!(addr = %running.local_addr(), scanners = running.scanners().len(), "serving");
        // `reload_tx` stays alive here, so this only returns a reason.
        let Ok(reason) = reload_rx.recv() else {
            running.shutdown();
            return Ok(());
        };
        info!(%reason, "reloading server");
        running.shutdown();
        while let Ok(extra) = reload_rx.try_recv() {
            debug!(reason = %extra, "reload request coalesced");
        }
    }
}

/// Bring up the whole server for `config`.  Reset and hotplug requests are
/// sent to `reload`.
pub fn start(config: &ServerConfig, backend: Arc<dyn DeviceBackend>, reload: Sender<ReloadReason>) -> Result<RunningServer> {
    let started = Instant::now();
    let hostname = config.resolved_hostname();
    let root = info_span!("scanwerk", host = %hostname);

    let options = OptionsFile::load(&config.options_file)?;
    let ignore = IgnoreList::load(&config.ignore_list)?;

    let scanners: Vec<Arc<Scanner>> = build_scanners(config, &backend, &options, &ignore, &hostname, &root)?
        .into_iter()
        .map(Arc::new)
        .collect();

    let ip: IpAddr = config
        .interface
        .parse()
        .map_err(|e| ScanwerkError::Config(format!("invalid interface address '{}': {e}", config.interface)))?;
    let access_log = config
        .access_log
        .as_deref()
        .map(AccessLog::open)
        .transpose()?
        .map(Arc::new);
    let server_options = ServerOptions {
        web_interface: config.web_interface,
        disclose_version: config.disclose_version,
        reset: config.reset_option.then(|| reload.clone()),
        // Roughly the time a rebuild takes.
        reset_refresh_secs: started.elapsed().as_secs() + 2,
        access_log,
        ..ServerOptions::new(hostname.clone())
    };
    let server = EsclServer::start(SocketAddr::new(ip, config.listen_port), scanners.clone(), server_options)?;

    let announcer = if config.mdns_announce {
        let mut announcer = Announcer::new(hostname.clone());
        for scanner in &scanners {
            announcer.announce(scanner, server.port());
        }
        Some(announcer)
    } else {
        info!("mDNS announcement disabled");
        None
    };

    let purge = PurgeThread::start(
        scanners.clone(),
        Duration::from_secs(config.purge_interval_secs.max(1)),
        Duration::from_secs(config.job_idle_timeout_secs),
    )?;

    let hotplug = if config.hotplug {
        Some(HotplugMonitor::start(
            Arc::clone(&backend),
            config.local_scanners_only,
            scanners.clone(),
            Duration::from_secs(config.hotplug_interval_secs.max(1)),
            reload,
        )?)
    } else {
        None
    };

    for scanner in &scanners {
        info!(
            name = %scanner.published_name(),
            uri = %scanner.uri(),
            url = %scanner.admin_url(),
            "serving scanner"
        );
    }
    info!(startup_ms = started.elapsed().as_millis() as u64, "server started");

    Ok(RunningServer {
        scanners,
        server,
        announcer,
        purge,
        hotplug,
    })
}
