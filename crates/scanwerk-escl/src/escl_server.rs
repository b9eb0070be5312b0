// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// eSCL HTTP server.
//
// Listens on one TCP port and serves every scanner under its own URI
// prefix.  Each connection is handled on its own thread; documents are
// streamed with chunked transfer encoding while the job's worker reads
// from the device.
//
// Server routes, served only with the web interface enabled:
//
//   GET    /                          HTML list of scanners
//   GET    /reset                     rebuild the server (when allowed)
//
// Routes below a scanner URI:
//
//   GET    /                          HTML status page (web interface)
//   GET    /ScannerIcon               configured PNG icon
//   GET    /ScannerCapabilities       capabilities document
//   GET    /ScannerStatus             status document
//   POST   /ScanJobs                  create a job (201 + Location)
//   DELETE /ScanJobs/{uuid}           cancel a job
//   GET    /ScanJobs/{uuid}/NextDocument

use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::SecondsFormat;
use scanwerk_core::error::{Result, ScanwerkError};
use tracing::{debug, error, info, instrument, warn};

use crate::access_log::AccessLog;
use crate::documents::{scanner_capabilities_xml, scanner_status_xml, xml_escape};
use crate::http::{
    self, ChunkedWriter, HttpRequest, HttpResponse, HTTP_BAD_REQUEST, HTTP_CONFLICT, HTTP_CREATED,
    HTTP_INTERNAL_SERVER_ERROR, HTTP_NOT_FOUND, HTTP_OK, HTTP_SERVICE_UNAVAILABLE,
};
use crate::reload::ReloadReason;
use crate::scan_job::ScanJob;
use crate::scanner::Scanner;

/// Clients identifying with this User-Agent get their document format
/// chosen by the server.
const AUTOSELECT_USER_AGENT: &str = "AirScanScanner";

/// Idle time allowed while a client sends its request.
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Behaviour switches for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host name shown on the HTML pages.
    pub hostname: String,
    /// Serve the HTML pages.
    pub web_interface: bool,
    /// Show the server version on the main page.
    pub disclose_version: bool,
    /// Receiver of `/reset` requests; `None` disables the page.
    pub reset: Option<Sender<ReloadReason>>,
    /// Delay before the reset page sends the browser back to `/`.
    pub reset_refresh_secs: u64,
    pub access_log: Option<Arc<AccessLog>>,
}

impl ServerOptions {
    /// Web interface on, version shown, no reset page, no access log.
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            web_interface: true,
            disclose_version: true,
            reset: None,
            reset_refresh_secs: 2,
            access_log: None,
        }
    }
}

struct SharedState {
    scanners: Vec<Arc<Scanner>>,
    options: ServerOptions,
    shutdown: AtomicBool,
    active_connections: AtomicU32,
}

/// Outcome of routing one request.
enum Reply {
    Response(HttpResponse),
    /// Transfer started; stream the job's next document.
    Document(Arc<ScanJob>),
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// The running server.  Dropping it stops the accept loop.
pub struct EsclServer {
    local_addr: SocketAddr,
    shared: Arc<SharedState>,
    accept_handle: Option<JoinHandle<()>>,
}

impl EsclServer {
    /// Bind `bind_addr` (port 0 picks a free port) and start accepting.
    pub fn start(bind_addr: SocketAddr, scanners: Vec<Arc<Scanner>>, options: ServerOptions) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr)
            .map_err(|e| ScanwerkError::Server(format!("cannot bind {bind_addr}: {e}")))?;
        let local_addr = listener.local_addr()?;

        let shared = Arc::new(SharedState {
            scanners,
            options,
            shutdown: AtomicBool::new(false),
            active_connections: AtomicU32::new(0),
        });

        let loop_shared = Arc::clone(&shared);
        let accept_handle = std::thread::Builder::new()
            .name("escl-accept".into())
            .spawn(move || accept_loop(listener, loop_shared))
            .map_err(|e| ScanwerkError::Server(format!("cannot start accept thread: {e}")))?;

        info!(
            addr = %local_addr,
            scanners = shared.scanners.len(),
            web_interface = shared.options.web_interface,
            access_log = shared.options.access_log.as_ref().map(|l| l.target()),
            "eSCL server listening"
        );
        Ok(Self {
            local_addr,
            shared,
            accept_handle: Some(accept_handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Connections currently being served.
    pub fn active_connections(&self) -> u32 {
        self.shared.active_connections.load(Ordering::Relaxed)
    }

    /// Block until the accept loop exits.
    pub fn wait(&mut self) {
        if let Some(handle) = self.accept_handle.take() {
            let _ = handle.join();
        }
    }

    /// Stop accepting connections.  Connections in flight finish on their
    /// own threads.
    pub fn stop(&mut self) {
        if self.accept_handle.is_none() {
            return;
        }
        self.shared.shutdown.store(true, Ordering::SeqCst);
        // Wake the blocking accept() with a throwaway connection.
        let mut wake_addr = self.local_addr;
        if wake_addr.ip().is_unspecified() {
            wake_addr.set_ip(match wake_addr {
                SocketAddr::V4(_) => std::net::Ipv4Addr::LOCALHOST.into(),
                SocketAddr::V6(_) => std::net::Ipv6Addr::LOCALHOST.into(),
            });
        }
        if let Err(e) = TcpStream::connect_timeout(&wake_addr, Duration::from_secs(1)) {
            warn!(error = %e, "could not wake accept loop");
        }
        self.wait();
        info!(addr = %self.local_addr, "eSCL server stopped");
    }
}

impl Drop for EsclServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(listener: TcpListener, shared: Arc<SharedState>) {
    for incoming in listener.incoming() {
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }
        let stream = match incoming {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".into());
        debug!(peer = %peer_addr, "incoming eSCL connection");

        let conn_shared = Arc::clone(&shared);
        conn_shared.active_connections.fetch_add(1, Ordering::Relaxed);
        let spawned = std::thread::Builder::new()
            .name("escl-conn".into())
            .spawn(move || {
                handle_connection(stream, &conn_shared);
                conn_shared.active_connections.fetch_sub(1, Ordering::Relaxed);
            });
        if let Err(e) = spawned {
            shared.active_connections.fetch_sub(1, Ordering::Relaxed);
            error!(error = %e, peer = %peer_addr, "cannot spawn connection thread");
        }
    }
    debug!("accept loop exited");
}

/// Serve one request on `stream`, then close it.
fn handle_connection(mut stream: TcpStream, shared: &SharedState) {
    let peer = stream
        .peer_addr()
        .map(|a| a.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    if let Err(e) = stream.set_read_timeout(Some(REQUEST_READ_TIMEOUT)) {
        debug!(error = %e, "cannot set read timeout");
    }
    let access_log = shared.options.access_log.as_deref();
    let request = match http::read_request(&mut stream) {
        Ok(Some(request)) => request,
        Ok(None) => return,
        Err(e) => {
            debug!(error = %e, "malformed request");
            let response = HttpResponse::status_only(HTTP_BAD_REQUEST);
            let _ = response.write_to(&mut stream);
            if let Some(log) = access_log {
                log.record(peer, None, response.status, response.body.len() as u64);
            }
            return;
        }
    };
    let (status, bytes) = match dispatch(&request, shared) {
        Reply::Response(response) => {
            if let Err(e) = response.write_to(&mut stream) {
                debug!(error = %e, "failed to send response");
            }
            (response.status, response.body.len() as u64)
        }
        Reply::Document(job) => (HTTP_OK, send_document(stream, &job)),
    };
    if let Some(log) = access_log {
        log.record(peer, Some(&request), status, bytes);
    }
}

/// Stream the job's next document as a chunked 200 response.
///
/// RETURNS: document bytes sent.
fn send_document(mut stream: TcpStream, job: &ScanJob) -> u64 {
    let headers = [("Content-Type".to_string(), job.document_format().to_string())];
    if let Err(e) = http::write_head(&mut stream, HTTP_OK, &headers, None) {
        debug!(error = %e, job = %job.uuid(), "client went away before transfer");
        // Still release the device.
        let _ = job.finish_transfer(std::io::sink());
        return 0;
    }
    match job.finish_transfer(ChunkedWriter::new(stream)) {
        Ok(writer) => {
            let sent = writer.payload_bytes();
            match writer.finish() {
                Ok(mut stream) => {
                    let _ = stream.flush();
                    let _ = stream.shutdown(Shutdown::Write);
                }
                Err(e) => debug!(error = %e, job = %job.uuid(), "failed to terminate chunked body"),
            }
            sent
        }
        Err(e) => {
            warn!(error = %e, job = %job.uuid(), "document transfer failed");
            0
        }
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

#[instrument(level = "debug", skip_all, fields(method = %request.method, path = %request.path))]
fn dispatch(request: &HttpRequest, shared: &SharedState) -> Reply {
    let options = &shared.options;
    if options.web_interface && request.method == "GET" {
        match (request.path.as_str(), &options.reset) {
            ("/", _) => return Reply::Response(HttpResponse::html(server_page(shared))),
            ("/reset", Some(reset)) => {
                info!("server reset requested");
                if reset.send(ReloadReason::Reset).is_err() {
                    warn!("reset requested but nothing is listening");
                }
                let response = HttpResponse::html(reset_page(&options.hostname))
                    .with_header("Refresh", format!("{}; url=/", options.reset_refresh_secs));
                return Reply::Response(response);
            }
            _ => {}
        }
    }
    for scanner in &shared.scanners {
        let prefix = scanner.uri().trim_end_matches('/');
        let Some(rest) = request.path.strip_prefix(prefix) else {
            continue;
        };
        if !(rest.is_empty() || rest.starts_with('/')) {
            continue;
        }
        let _entered = scanner.span().enter();
        if let Some(reply) = route_scanner(request, rest, scanner, options) {
            return reply;
        }
    }
    Reply::Response(HttpResponse::status_only(HTTP_NOT_FOUND))
}

/// Route `rest`, the path below the scanner URI.  `None` falls through to
/// 404.
fn route_scanner(request: &HttpRequest, rest: &str, scanner: &Scanner, options: &ServerOptions) -> Option<Reply> {
    let response = |r: HttpResponse| Some(Reply::Response(r));
    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();

    match (request.method.as_str(), segments.as_slice()) {
        ("GET", []) if options.web_interface => {
            response(HttpResponse::html(scanner_page(scanner, &options.hostname)))
        }
        ("GET", ["ScannerIcon"]) => {
            let path = scanner.options().icon.as_ref()?;
            match std::fs::read(path) {
                Ok(png) => response(HttpResponse::new(HTTP_OK).with_body("image/png", png)),
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "cannot read scanner icon");
                    None
                }
            }
        }
        ("GET", ["ScannerCapabilities"]) => response(HttpResponse::xml(scanner_capabilities_xml(scanner))),
        ("GET", ["ScannerStatus"]) => response(HttpResponse::xml(scanner_status_xml(scanner))),
        ("POST", ["ScanJobs"]) => {
            let autoselect = request
                .header("User-Agent")
                .is_some_and(|agent| agent.contains(AUTOSELECT_USER_AGENT));
            match scanner.create_job_from_scan_settings_xml(&request.body_text(), autoselect) {
                Ok(job) => {
                    info!(job = %job.uuid(), state = %job.state(), "scan job created");
                    response(HttpResponse::new(HTTP_CREATED).with_header("Location", job.uri()))
                }
                Err(e) => {
                    error!(error = %e, "cannot create scan job");
                    response(HttpResponse::status_only(HTTP_INTERNAL_SERVER_ERROR))
                }
            }
        }
        ("DELETE", ["ScanJobs", uuid]) => {
            if scanner.cancel_job(uuid) {
                info!(job = %uuid, "scan job cancelled by client");
                response(HttpResponse::new(HTTP_OK))
            } else {
                None
            }
        }
        ("GET", ["ScanJobs", uuid, "NextDocument"]) => {
            let job = scanner.get_job(uuid)?;
            if job.is_finished() {
                return None;
            }
            if job.begin_transfer() {
                return Some(Reply::Document(job));
            }
            let adf_status = job.adf_status();
            if !adf_status.is_good() {
                scanner.set_temporary_adf_status(adf_status);
                response(HttpResponse::status_only(HTTP_CONFLICT))
            } else {
                response(HttpResponse::status_only(HTTP_SERVICE_UNAVAILABLE))
            }
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// HTML pages
// ---------------------------------------------------------------------------

fn page(title: &str, body: &str) -> String {
    let title = xml_escape(title);
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n</head>\n\
         <body>\n<h1>{title}</h1>\n{body}</body>\n</html>\n"
    )
}

fn server_page(shared: &SharedState) -> String {
    let mut body = String::from("<ul>\n");
    for scanner in &shared.scanners {
        body.push_str(&format!(
            "<li><a href=\"{}/\">{}</a> ({})</li>\n",
            xml_escape(scanner.uri().trim_end_matches('/')),
            xml_escape(scanner.published_name()),
            scanner.status_string(),
        ));
    }
    body.push_str("</ul>\n");
    if shared.options.disclose_version {
        body.push_str(&format!(
            "<h2>Version</h2>\n<p>Scanwerk {}</p>\n",
            env!("CARGO_PKG_VERSION")
        ));
    }
    if shared.options.reset.is_some() {
        body.push_str("<h2>Server maintenance</h2>\n<ul>\n<li><a href=\"/reset\">Reset</a></li>\n</ul>\n");
    }
    page(&format!("Scanwerk on {}", shared.options.hostname), &body)
}

fn reset_page(hostname: &str) -> String {
    page(
        &format!("Resetting Scanwerk on {hostname} ..."),
        "<p>You will be redirected to the main page in a few seconds.</p>\n",
    )
}

fn scanner_page(scanner: &Scanner, hostname: &str) -> String {
    let caps = scanner.capabilities();
    let mut body = String::new();
    body.push_str("<table>\n");
    let rows = [
        ("Make and model", scanner.make_and_model().to_string()),
        ("Device", scanner.device_name().to_string()),
        ("UUID", scanner.uuid().to_string()),
        ("State", scanner.status_string().to_string()),
        ("Input sources", caps.input_sources().join(", ")),
        ("Color modes", caps.color_modes.join(", ")),
        ("Resolutions", format!("{}-{} dpi", caps.min_resolution, caps.max_resolution)),
        ("Document formats", caps.document_formats.join(", ")),
    ];
    for (label, value) in rows {
        body.push_str(&format!("<tr><th>{label}</th><td>{}</td></tr>\n", xml_escape(&value)));
    }
    body.push_str("</table>\n<h2>Jobs</h2>\n<table>\n");
    body.push_str("<tr><th>Job</th><th>Created</th><th>State</th><th>Reason</th><th>Images</th></tr>\n");
    for job in scanner.jobs() {
        body.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            xml_escape(job.uuid()),
            job.created_at().to_rfc3339_opts(SecondsFormat::Secs, true),
            job.state(),
            job.state_reason(),
            job.images_completed(),
        ));
    }
    body.push_str("</table>\n");
    page(&format!("{} on {hostname}", scanner.published_name()), &body)
}
