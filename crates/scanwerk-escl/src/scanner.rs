// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanner model.
//
// One `Scanner` per enumerated device.  It derives a stable identity for
// the device, discovers its capabilities once through a short-lived session,
// and owns the table of scan jobs submitted to it.  The device session
// slot it shares with its jobs guarantees at most one open session.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use scanwerk_core::config::system_hostname;
use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::{ColorSpace, DOCUMENT_FORMATS, DeviceOptions, OptionsFile, escl_color_mode};
use scanwerk_device::options::{
    OPTION_BIT_DEPTH, OPTION_BR_X, OPTION_BR_Y, OPTION_MODE, OPTION_RESOLUTION, OPTION_SOURCE,
    OPTION_TL_X, OPTION_TL_Y,
};
use scanwerk_device::{DeviceBackend, DeviceInfo, DeviceSession, DeviceStatus, OptionSet, OptionValue, Unit};
use scanwerk_document::DocumentInfo;
use tracing::{Span, debug, info, info_span, warn};
use uuid::Uuid;

use crate::scan_job::{JobContext, ScanJob};
use crate::session_slot::ScannerDevice;

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Geometry and limits of one input source, in pixels at 300 dpi.
#[derive(Debug, Clone, PartialEq)]
pub struct InputSourceCaps {
    /// Device-level source name; empty when the device has no source option.
    pub source_name: String,
    pub min_width: f64,
    pub max_width: f64,
    pub min_height: f64,
    pub max_height: f64,
    pub max_physical_width: f64,
    pub max_physical_height: f64,
    pub max_bits: u32,
    pub intents: Vec<&'static str>,
}

/// What the device can do, as advertised to clients.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Capabilities {
    pub min_resolution: u32,
    pub max_resolution: u32,
    pub resolution_step: u32,
    pub discrete_resolutions: Vec<u32>,
    pub document_formats: Vec<&'static str>,
    pub color_spaces: Vec<ColorSpace>,
    /// eSCL colour modes (`Grayscale8`, `RGB24`, ...).
    pub color_modes: Vec<String>,
    pub gray_mode: Option<String>,
    pub color_mode: Option<String>,
    pub platen: Option<InputSourceCaps>,
    pub adf: Option<InputSourceCaps>,
    pub duplex: bool,
    pub max_width_px300: f64,
    pub max_height_px300: f64,
}

impl Capabilities {
    /// eSCL input source keywords (`Platen`, `Feeder`).
    pub fn input_sources(&self) -> Vec<&'static str> {
        let mut sources = Vec::new();
        if self.platen.is_some() {
            sources.push("Platen");
        }
        if self.adf.is_some() {
            sources.push("Feeder");
        }
        sources
    }
}

const PLATEN_INTENTS: [&str; 3] = ["Preview", "TextAndGraphic", "Photo"];
const ADF_INTENTS: [&str; 2] = ["TextAndGraphic", "Photo"];

fn find_exact<'a>(names: &'a [String], candidates: &[&str]) -> Option<&'a String> {
    candidates
        .iter()
        .find_map(|c| names.iter().find(|n| n.as_str() == *c))
}

fn find_flatbed_name(names: &[String]) -> Option<String> {
    find_exact(names, &["Flatbed", "FlatBed", "Auto"]).cloned()
}

fn find_adf_simplex_name(names: &[String]) -> Option<String> {
    find_exact(names, &["Automatic Document Feeder", "ADF Simplex", "ADF Front", "ADF"])
        .or_else(|| names.iter().find(|n| n.contains("Automatic Document Feeder")))
        .cloned()
}

fn find_adf_duplex_name(names: &[String]) -> Option<String> {
    find_exact(names, &["ADF Duplex"])
        .or_else(|| {
            names
                .iter()
                .find(|n| n.contains("Automatic Document Feeder") && n.contains("Duplex"))
        })
        .cloned()
}

fn find_gray_name(names: &[String]) -> Option<String> {
    find_exact(names, &["True Gray", "Gray"])
        .or_else(|| names.iter().find(|n| n.contains("Gray")))
        .cloned()
}

fn find_color_name(names: &[String]) -> Option<String> {
    find_exact(names, &["Color"])
        .or_else(|| names.iter().find(|n| n.contains("Color")))
        .cloned()
}

fn round_to_step(value: f64, min: f64, step: f64) -> f64 {
    min + ((value - min) / step).floor() * step
}

/// Turn a resolution range into the discrete list clients expect: the
/// minimum, 75·2^k snapped to the step, and the maximum.
pub fn discretize_resolutions(min: f64, max: f64, step: f64) -> Vec<u32> {
    let step = step.max(1.0);
    let mut out = vec![min];
    let mut r = 75.0;
    let mut snapped = round_to_step(r, min, step);
    while snapped <= max {
        if out.last().is_some_and(|last| snapped > *last) {
            out.push(snapped);
        }
        r *= 2.0;
        snapped = round_to_step(r, min, step);
    }
    let top = round_to_step(max, min, step);
    if out.last().is_some_and(|last| top > *last) {
        out.push(top);
    }
    out.into_iter().map(|r| r as u32).collect()
}

/// Write the options-file passthrough options to a session, in file order.
pub(crate) fn apply_passthrough_options(session: &mut dyn DeviceSession, pairs: &[(String, String)]) {
    for (name, raw) in pairs {
        let value = session.options().get(name).and_then(|o| o.parse_value(raw));
        match value {
            Some(value) => {
                let status = session.set_option(name, &value);
                debug!(option = %name, value = %raw, %status, "device option applied");
            }
            None => warn!(option = %name, "device option from options file does not exist"),
        }
    }
}

/// Limits of the currently selected source.
fn source_caps(options: &OptionSet, intents: &[&'static str]) -> Result<InputSourceCaps> {
    let source_name = options
        .get(OPTION_SOURCE)
        .and_then(|o| o.string_value())
        .unwrap_or_default()
        .to_string();
    let max_bits = options
        .get(OPTION_BIT_DEPTH)
        .map(|o| o.max() as u32)
        .unwrap_or(8);

    let area = [OPTION_TL_X, OPTION_TL_Y, OPTION_BR_X, OPTION_BR_Y].map(|name| options.get(name));
    let [Some(tl_x), Some(tl_y), Some(br_x), Some(br_y)] = area else {
        return Err(ScanwerkError::Device("missing scan area options".into()));
    };
    let unit = tl_x.unit;
    if [tl_y.unit, br_x.unit, br_y.unit].iter().any(|u| *u != unit) {
        return Err(ScanwerkError::Device("inconsistent unit in scan area options".into()));
    }
    let factor = match unit {
        Unit::Mm => 300.0 / 25.4,
        Unit::Pixel => {
            let res = options
                .get(OPTION_RESOLUTION)
                .and_then(|o| o.numeric_value())
                .filter(|r| *r > 0.0)
                .ok_or_else(|| ScanwerkError::Device("pixel scan area without resolution".into()))?;
            300.0 / res
        }
        other => {
            return Err(ScanwerkError::Device(format!(
                "unexpected unit {other:?} in scan area options"
            )));
        }
    };
    let px = |v: f64| (v * factor + 0.5).floor();

    Ok(InputSourceCaps {
        source_name,
        min_width: px((br_x.min() - tl_x.max()).max(0.0)),
        max_width: px(br_x.max() - tl_x.min()),
        min_height: px((br_y.min() - tl_y.max()).max(0.0)),
        max_height: px(br_y.max() - tl_y.min()),
        max_physical_width: px(br_x.max()),
        max_physical_height: px(br_y.max()),
        max_bits,
        intents: intents.to_vec(),
    })
}

fn discover_capabilities(session: &mut dyn DeviceSession) -> Result<Capabilities> {
    let mut caps = Capabilities {
        document_formats: DOCUMENT_FORMATS.to_vec(),
        ..Capabilities::default()
    };

    let resolution = session
        .options()
        .get(OPTION_RESOLUTION)
        .ok_or_else(|| ScanwerkError::Device(format!("missing device option: {OPTION_RESOLUTION}")))?;
    caps.min_resolution = resolution.min() as u32;
    caps.max_resolution = resolution.max() as u32;
    caps.resolution_step = resolution.step() as u32;
    caps.discrete_resolutions = resolution
        .allowed_numeric_values()
        .into_iter()
        .map(|r| r as u32)
        .collect();
    if caps.discrete_resolutions.is_empty() {
        // Clients assume a discrete list.
        caps.discrete_resolutions =
            discretize_resolutions(resolution.min(), resolution.max(), resolution.step());
    }

    let mut modes = session
        .options()
        .get(OPTION_MODE)
        .map(|o| o.allowed_string_values())
        .unwrap_or_default();
    if modes.is_empty() {
        modes = vec!["Gray".into(), "Color".into()];
    }
    caps.gray_mode = find_gray_name(&modes);
    caps.color_mode = find_color_name(&modes);
    if caps.gray_mode.is_none() && caps.color_mode.is_none() {
        caps.gray_mode = Some("Gray".into());
    }
    if caps.gray_mode.is_some() {
        caps.color_spaces.push(ColorSpace::Grayscale);
        caps.color_modes.push(escl_color_mode(ColorSpace::Grayscale, 8));
    }
    if caps.color_mode.is_some() {
        caps.color_spaces.push(ColorSpace::Rgb);
        caps.color_modes.push(escl_color_mode(ColorSpace::Rgb, 8));
    }

    let sources = session
        .options()
        .get(OPTION_SOURCE)
        .map(|o| o.allowed_string_values())
        .unwrap_or_default();
    let mut flatbed = find_flatbed_name(&sources);
    let duplex = find_adf_duplex_name(&sources);
    let adf = duplex.clone().or_else(|| find_adf_simplex_name(&sources));
    if flatbed.is_none() && adf.is_none() {
        // No source option: the device is a plain flatbed.
        flatbed = Some(String::new());
    }

    let mut max_bits = 8;
    let mut select = |session: &mut dyn DeviceSession, name: &str| {
        if !name.is_empty() {
            let status = session.set_option(OPTION_SOURCE, &OptionValue::Text(name.to_string()));
            if !status.is_good() {
                warn!(source = name, %status, "could not select source");
            }
        }
    };
    if let Some(name) = flatbed {
        select(session, &name);
        let platen = source_caps(session.options(), &PLATEN_INTENTS)?;
        max_bits = max_bits.max(platen.max_bits);
        caps.max_width_px300 = caps.max_width_px300.max(platen.max_width);
        caps.max_height_px300 = caps.max_height_px300.max(platen.max_height);
        caps.platen = Some(platen);
    }
    if let Some(name) = adf {
        caps.duplex = duplex.is_some();
        select(session, &name);
        let feeder = source_caps(session.options(), &ADF_INTENTS)?;
        max_bits = max_bits.max(feeder.max_bits);
        caps.max_width_px300 = caps.max_width_px300.max(feeder.max_width);
        caps.max_height_px300 = caps.max_height_px300.max(feeder.max_height);
        caps.adf = Some(feeder);
    }

    if max_bits == 16 {
        if caps.gray_mode.is_some() {
            caps.color_modes.push(escl_color_mode(ColorSpace::Grayscale, 16));
        }
        if caps.color_mode.is_some() {
            caps.color_modes.push(escl_color_mode(ColorSpace::Rgb, 16));
        }
    }
    Ok(caps)
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Name that survives bus renumbering: the driver name's backend prefix,
/// make and model, and the lowest counter not in `taken`.
pub fn stable_unique_name(info: &DeviceInfo, taken: &[String]) -> String {
    let prefix = match info.name.find(':') {
        Some(pos) => info.name[..=pos].to_string(),
        None => format!("{}:", info.name),
    };
    let base = format!("{prefix}{}:", info.make_and_model());
    (1u32..)
        .map(|i| format!("{base}{i}"))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or(base)
}

/// Pick a published service name not yet in `taken`: `name`, `name (2)`, ...
pub fn choose_unique_published_name(name: &str, taken: &[String]) -> String {
    if !taken.iter().any(|t| t == name) {
        return name.to_string();
    }
    (2u32..)
        .map(|i| format!("{name} ({i})"))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| name.to_string())
}

/// Identifier of this machine, for name-based scanner UUIDs.
fn machine_id() -> String {
    std::fs::read_to_string("/etc/machine-id")
        .ok()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(system_hostname)
}

/// Deterministic scanner UUID for a stable name on a given machine.
pub fn scanner_uuid(machine: &str, stable_name: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("{machine}{stable_name}").as_bytes()).to_string()
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

/// One served device.
pub struct Scanner {
    info: DeviceInfo,
    make_and_model: String,
    stable_name: String,
    uuid: String,
    device: Arc<ScannerDevice>,
    capabilities: Capabilities,
    options: DeviceOptions,
    published_name: String,
    uri: String,
    admin_url: String,
    icon_url: String,
    jobs: Mutex<BTreeMap<String, Arc<ScanJob>>>,
    temporary_adf_status: Mutex<DeviceStatus>,
    span: Span,
}

impl Scanner {
    /// Derive identity for an enumerated device.  `taken` holds the stable
    /// names of scanners already created in this server.
    pub fn new(backend: Arc<dyn DeviceBackend>, info: DeviceInfo, taken: &[String], parent: &Span) -> Self {
        let make_and_model = info.make_and_model();
        let stable_name = stable_unique_name(&info, taken);
        let uuid = scanner_uuid(&machine_id(), &stable_name);
        let span = info_span!(parent: parent, "scanner", device = %info.name);
        {
            let _entered = span.enter();
            debug!(stable_name = %stable_name, uuid = %uuid, "scanner identity derived");
        }
        Self {
            device: Arc::new(ScannerDevice::new(backend, info.clone())),
            uri: format!("/{uuid}"),
            published_name: make_and_model.clone(),
            info,
            make_and_model,
            stable_name,
            uuid,
            capabilities: Capabilities::default(),
            options: DeviceOptions::default(),
            admin_url: String::new(),
            icon_url: String::new(),
            jobs: Mutex::new(BTreeMap::new()),
            temporary_adf_status: Mutex::new(DeviceStatus::Good),
            span,
        }
    }

    /// Resolve this device's options and discover its capabilities through a
    /// short-lived session.
    pub fn init_with_options(&mut self, options_file: &OptionsFile) -> Result<()> {
        let _entered = self.span.enter();
        self.options = options_file.scanner_options(&self.info.name, &self.make_and_model);
        let mut active = self
            .device
            .open_session()
            .map_err(|status| ScanwerkError::Device(format!("failed to open device: {status}")))?;
        apply_passthrough_options(active.session(), &self.options.device_options);
        self.capabilities = discover_capabilities(active.session())?;
        info!(
            uuid = %self.uuid,
            sources = ?self.capabilities.input_sources(),
            modes = ?self.capabilities.color_modes,
            "scanner initialised"
        );
        Ok(())
    }

    pub fn device_name(&self) -> &str {
        &self.info.name
    }

    pub fn make_and_model(&self) -> &str {
        &self.make_and_model
    }

    pub fn stable_unique_name(&self) -> &str {
        &self.stable_name
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn options(&self) -> &DeviceOptions {
        &self.options
    }

    pub fn published_name(&self) -> &str {
        &self.published_name
    }

    pub fn set_published_name(&mut self, name: impl Into<String>) {
        self.published_name = name.into();
    }

    /// Path prefix under which the scanner's eSCL resources live.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn set_uri(&mut self, uri: impl Into<String>) {
        self.uri = uri.into();
    }

    pub fn admin_url(&self) -> &str {
        &self.admin_url
    }

    pub fn set_admin_url(&mut self, url: impl Into<String>) {
        self.admin_url = url.into();
    }

    pub fn icon_url(&self) -> &str {
        &self.icon_url
    }

    pub fn set_icon_url(&mut self, url: impl Into<String>) {
        self.icon_url = url.into();
    }

    pub fn has_platen(&self) -> bool {
        self.capabilities.platen.is_some()
    }

    pub fn has_adf(&self) -> bool {
        self.capabilities.adf.is_some()
    }

    pub fn has_duplex_adf(&self) -> bool {
        self.capabilities.adf.is_some() && self.capabilities.duplex
    }

    /// Whether a device session is currently open.
    pub fn is_open(&self) -> bool {
        self.device.is_open()
    }

    pub fn status_string(&self) -> &'static str {
        if self.is_open() { "Processing" } else { "Idle" }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Remember a feeder fault for the next status document.
    pub fn set_temporary_adf_status(&self, status: DeviceStatus) {
        *lock(&self.temporary_adf_status) = status;
    }

    /// Report and reset the remembered feeder state.
    pub fn take_temporary_adf_status(&self) -> DeviceStatus {
        std::mem::replace(&mut *lock(&self.temporary_adf_status), DeviceStatus::Good)
    }

    // -- Job table -----------------------------------------------------------

    fn jobs_lock(&self) -> MutexGuard<'_, BTreeMap<String, Arc<ScanJob>>> {
        lock(&self.jobs)
    }

    fn job_context(&self, uuid: String) -> JobContext {
        let source = |caps: &Option<InputSourceCaps>| caps.as_ref().map(|c| c.source_name.clone());
        JobContext {
            uuid,
            scanner_uri: self.uri.clone(),
            device: Arc::clone(&self.device),
            platen_source: source(&self.capabilities.platen),
            adf_source: source(&self.capabilities.adf),
            gray_mode: self.capabilities.gray_mode.clone(),
            color_mode: self.capabilities.color_mode.clone(),
            options: self.options.clone(),
            document_info: DocumentInfo {
                creator: format!("{} (scanwerk)", self.make_and_model),
                producer: format!("scanwerk {}", env!("CARGO_PKG_VERSION")),
            },
            parent_span: self.span.clone(),
        }
    }

    /// Create and register a job for a scan ticket.  Ticket errors still
    /// yield a job, already aborted.
    pub fn create_job_from_scan_settings_xml(&self, xml: &str, autoselect_format: bool) -> Result<Arc<ScanJob>> {
        let mut jobs = self.jobs_lock();
        let uuid = loop {
            let candidate = Uuid::new_v4().to_string();
            if !jobs.contains_key(&candidate) {
                break candidate;
            }
        };
        let job = Arc::new(ScanJob::new(self.job_context(uuid.clone()), xml, autoselect_format)?);
        jobs.insert(uuid, Arc::clone(&job));
        Ok(job)
    }

    pub fn get_job(&self, uuid: &str) -> Option<Arc<ScanJob>> {
        self.jobs_lock().get(uuid).cloned()
    }

    /// Cancel a job.  False when no such job exists.
    pub fn cancel_job(&self, uuid: &str) -> bool {
        match self.jobs_lock().get(uuid) {
            Some(job) => {
                job.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove jobs idle for longer than `max_idle_seconds`; returns how
    /// many were removed.
    pub fn purge_jobs(&self, max_idle_seconds: u64) -> usize {
        let removed: Vec<Arc<ScanJob>> = {
            let mut jobs = self.jobs_lock();
            let stale: Vec<String> = jobs
                .iter()
                .filter(|(_, job)| job.idle_seconds() > max_idle_seconds)
                .map(|(uuid, _)| uuid.clone())
                .collect();
            stale.iter().filter_map(|uuid| jobs.remove(uuid)).collect()
        };
        // Dropped outside the lock: a job's drop joins its worker thread.
        let count = removed.len();
        if count > 0 {
            let _entered = self.span.enter();
            info!(count, "purged idle jobs");
        }
        count
    }

    /// Snapshot of the job table, ordered by UUID.
    pub fn jobs(&self) -> Vec<Arc<ScanJob>> {
        self.jobs_lock().values().cloned().collect()
    }
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("device", &self.info.name)
            .field("uuid", &self.uuid)
            .field("uri", &self.uri)
            .finish()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
