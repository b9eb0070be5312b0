// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scan job state machine.
//
// A job moves pending -> processing -> {completed | canceled | aborted},
// and back to pending between feeder pages.  State and reason live in one
// atomic word and only ever change by compare-and-swap, so a cancel from a
// request thread can never be overwritten by the worker.
//
// Device work (`begin_transfer`, `finish_transfer`) runs on the job's own
// worker thread.  The closures sent there capture only the shared job
// state, never the `ScanJob` itself, so the worker is always joined from a
// different thread.

use std::io::Write;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::{DateTime, Utc};
use scanwerk_core::options::OptionPairs;
use scanwerk_core::{ColorSpace, DeviceOptions, JobKind, JobState, StateReason};
use scanwerk_device::options::{
    OPTION_BIT_DEPTH, OPTION_BR_X, OPTION_BR_Y, OPTION_MODE, OPTION_RESOLUTION, OPTION_SOURCE,
    OPTION_TL_X, OPTION_TL_Y, OPTION_X_RESOLUTION, OPTION_Y_RESOLUTION,
};
use scanwerk_device::{CancelHandle, DeviceSession, DeviceStatus, OptionValue, Unit};
use scanwerk_document::{DocumentInfo, GammaTable, ImageGeometry, encoder_for_format, synthesize_gray};
use tracing::{Span, debug, error, info, info_span, warn};

use crate::scan_settings::ScanSettings;
use crate::scanner::apply_passthrough_options;
use crate::session_slot::{ActiveSession, ScannerDevice};
use crate::worker::Worker;

// ---------------------------------------------------------------------------
// Status mapping
// ---------------------------------------------------------------------------

/// What a device status means for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    /// Move to this state with this reason.
    Settle(JobState, StateReason),
    /// Concatenated feeder job: start the next page on the same session.
    NextPage,
}

/// Map a device status onto the job state machine.
pub fn status_outcome(status: DeviceStatus, kind: JobKind, images_completed: u32) -> StatusOutcome {
    use StatusOutcome::{NextPage, Settle};
    match status {
        DeviceStatus::Good => Settle(JobState::Processing, StateReason::JobScanning),
        DeviceStatus::Inval => Settle(JobState::Aborted, StateReason::InvalidScanTicket),
        DeviceStatus::DeviceBusy | DeviceStatus::IoError | DeviceStatus::NoMem => {
            Settle(JobState::Aborted, StateReason::ResourcesAreNotReady)
        }
        DeviceStatus::AccessDenied => Settle(JobState::Aborted, StateReason::DocumentPermissionError),
        DeviceStatus::Jammed | DeviceStatus::CoverOpen => {
            Settle(JobState::Aborted, StateReason::ResourcesAreNotReady)
        }
        DeviceStatus::Cancelled => Settle(JobState::Aborted, StateReason::JobCanceledByUser),
        DeviceStatus::Eof => match kind {
            JobKind::Single if images_completed > 0 => {
                Settle(JobState::Completed, StateReason::JobCompletedSuccessfully)
            }
            JobKind::Single | JobKind::AdfSingle => Settle(JobState::Pending, StateReason::None),
            JobKind::AdfConcat => NextPage,
        },
        DeviceStatus::NoDocs if images_completed > 0 && kind.is_feeder() => {
            Settle(JobState::Completed, StateReason::JobCompletedSuccessfully)
        }
        DeviceStatus::NoDocs => Settle(JobState::Aborted, StateReason::ResourcesAreNotReady),
        DeviceStatus::Unsupported => Settle(JobState::Aborted, StateReason::ErrorsDetected),
    }
}

/// Whether a status is worth reporting as the scanner's feeder state.
fn is_adf_fault(status: DeviceStatus) -> bool {
    matches!(status, DeviceStatus::Jammed | DeviceStatus::CoverOpen | DeviceStatus::NoDocs)
}

fn pack(state: JobState, reason: StateReason) -> u16 {
    ((state as u16) << 8) | reason as u16
}

fn unpack(word: u16) -> (JobState, StateReason) {
    (JobState::from_u8((word >> 8) as u8), StateReason::from_u8(word as u8))
}

// ---------------------------------------------------------------------------
// Job construction parameters
// ---------------------------------------------------------------------------

/// Everything a scanner supplies when it creates a job.
pub struct JobContext {
    pub uuid: String,
    /// Scanner URI; the job URI appends `/ScanJobs/<uuid>`.
    pub scanner_uri: String,
    pub device: Arc<ScannerDevice>,
    pub platen_source: Option<String>,
    pub adf_source: Option<String>,
    pub gray_mode: Option<String>,
    pub color_mode: Option<String>,
    pub options: DeviceOptions,
    pub document_info: DocumentInfo,
    pub parent_span: Span,
}

/// Device-facing settings resolved from a ticket.
#[derive(Debug, Clone, Default)]
struct DeviceRequest {
    source: Option<String>,
    mode: String,
    color_scan: bool,
    synthesize_gray: bool,
}

struct Timestamps {
    created: Instant,
    last_active: Instant,
}

// ---------------------------------------------------------------------------
// Shared job state
// ---------------------------------------------------------------------------

struct JobShared {
    uuid: String,
    uri: String,
    device: Arc<ScannerDevice>,
    settings: ScanSettings,
    request: DeviceRequest,
    gamma: Option<GammaTable>,
    passthrough: OptionPairs,
    document_info: DocumentInfo,
    created_at: DateTime<Utc>,

    state: AtomicU16,
    images_completed: AtomicU32,
    adf_status: Mutex<DeviceStatus>,
    timestamps: Mutex<Timestamps>,
    session: Mutex<Option<ActiveSession>>,
    cancel_handle: Mutex<Option<CancelHandle>>,
    span: Span,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl JobShared {
    fn state(&self) -> JobState {
        unpack(self.state.load(Ordering::SeqCst)).0
    }

    fn reason(&self) -> StateReason {
        unpack(self.state.load(Ordering::SeqCst)).1
    }

    fn is_processing(&self) -> bool {
        self.state() == JobState::Processing
    }

    /// Compare-and-swap the state; the reason changes with it.
    fn transition(&self, from: JobState, to: JobState, reason: StateReason) -> bool {
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            if unpack(current).0 != from {
                return false;
            }
            match self.state.compare_exchange(current, pack(to, reason), Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => {
                    if from != to {
                        debug!(from = %from, to = %to, reason = %reason, "job state changed");
                    }
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn abort(&self, reason: StateReason) {
        if self.transition(JobState::Processing, JobState::Aborted, reason) {
            warn!(reason = %reason, "job aborted");
        }
    }

    /// Abort a transfer whose data turned out bad after the device status
    /// already settled the job.  Canceled jobs stay canceled.
    fn abort_settled(&self, reason: StateReason) {
        let aborted = [JobState::Processing, JobState::Pending, JobState::Completed]
            .into_iter()
            .any(|from| self.transition(from, JobState::Aborted, reason));
        if aborted {
            warn!(reason = %reason, "job aborted");
        }
    }

    fn touch(&self) {
        lock(&self.timestamps).last_active = Instant::now();
    }

    fn set_adf_status(&self, status: DeviceStatus) {
        *lock(&self.adf_status) = status;
    }

    fn close_session(&self, slot: &mut Option<ActiveSession>) {
        lock(&self.cancel_handle).take();
        if slot.take().is_some() {
            debug!("device session released");
        }
    }

    // -- Worker-side operations ----------------------------------------------

    fn begin_transfer(&self) -> bool {
        let _entered = self.span.enter();
        if !self.transition(JobState::Pending, JobState::Processing, StateReason::JobScanning) {
            return false;
        }
        self.touch();
        let mut slot = lock(&self.session);
        self.open_session(&mut slot);
        let ok = self.is_processing();
        if !ok {
            self.close_session(&mut slot);
        }
        ok
    }

    fn open_session(&self, slot: &mut Option<ActiveSession>) {
        if slot.is_some() {
            error!("session still open when starting a transfer");
            self.close_session(slot);
        }
        let mut active = match self.device.open_session() {
            Ok(active) => active,
            Err(DeviceStatus::DeviceBusy) => {
                info!("device busy, job stays queued");
                self.transition(JobState::Processing, JobState::Pending, StateReason::JobQueued);
                return;
            }
            Err(status) => {
                warn!(%status, "could not open device");
                self.update_status(status, None);
                return;
            }
        };
        *lock(&self.cancel_handle) = Some(active.session().cancel_handle());

        let mut status = self.apply_options(active.session());
        if status.is_good() {
            status = active.session().start();
        }
        self.update_status(status, Some(active.session()));
        *slot = Some(active);
        if self.state() == JobState::Aborted {
            self.close_session(slot);
        }
    }

    /// Write the job's options to a fresh session: passthrough options
    /// first, then source, mode, depth, resolution, and scan area.
    fn apply_options(&self, session: &mut dyn DeviceSession) -> DeviceStatus {
        apply_passthrough_options(session, &self.passthrough);

        let s = &self.settings;
        let res = s.resolution_dpi as f64;
        let mut set = |name: &str, value: OptionValue| {
            let status = session.set_option(name, &value);
            if !status.is_good() {
                debug!(option = name, %value, %status, "option not accepted");
            }
            status.is_good()
        };
        if let Some(source) = &self.request.source {
            set(OPTION_SOURCE, OptionValue::Text(source.clone()));
        }
        set(OPTION_MODE, OptionValue::Text(self.request.mode.clone()));
        set(OPTION_BIT_DEPTH, OptionValue::Numeric(s.bit_depth as f64));
        let mut ok = set(OPTION_RESOLUTION, OptionValue::Numeric(res));
        if !ok {
            let x = set(OPTION_X_RESOLUTION, OptionValue::Numeric(res));
            let y = set(OPTION_Y_RESOLUTION, OptionValue::Numeric(res));
            ok = x || y;
        }

        let area = [s.left_px, s.top_px, s.left_px + s.width_px, s.top_px + s.height_px];
        let [left, top, right, bottom] = match session.options().unit(OPTION_TL_X) {
            Unit::Pixel => area.map(|v| (v + 0.5).floor()),
            Unit::Mm => area.map(|v| (v * 25.4 / res + 0.5).floor()),
            unit => {
                warn!(?unit, "scan area in unsupported unit");
                ok = false;
                area.map(|v| (v + 0.5).floor())
            }
        };
        for (name, value) in [(OPTION_TL_X, left), (OPTION_TL_Y, top), (OPTION_BR_X, right), (OPTION_BR_Y, bottom)] {
            let status = session.set_option(name, &OptionValue::Numeric(value));
            if !status.is_good() {
                debug!(option = name, value, %status, "scan area option not accepted");
            }
        }

        if ok { DeviceStatus::Good } else { DeviceStatus::Inval }
    }

    /// Apply a device status to the state machine.  Concatenated feeder jobs
    /// restart the session on end of page and apply that status instead.
    fn update_status(&self, mut status: DeviceStatus, mut session: Option<&mut dyn DeviceSession>) {
        let kind = self.settings.kind;
        loop {
            self.set_adf_status(DeviceStatus::Good);
            let images = self.images_completed.load(Ordering::SeqCst);
            match status_outcome(status, kind, images) {
                StatusOutcome::NextPage => match session.as_deref_mut() {
                    Some(s) => {
                        debug!(images, "starting next feeder page");
                        status = s.start();
                    }
                    None => status = DeviceStatus::Inval,
                },
                StatusOutcome::Settle(state, reason) => {
                    if is_adf_fault(status) {
                        self.set_adf_status(status);
                    }
                    if self.transition(JobState::Processing, state, reason) && state != JobState::Processing {
                        info!(%status, state = %state, reason = %reason, images, "device status applied");
                    }
                    return;
                }
            }
        }
    }

    fn finish_transfer(&self, sink: &mut dyn Write) {
        let _entered = self.span.enter();
        let mut slot = lock(&self.session);
        self.transfer(&mut slot, sink);
        self.close_session(&mut slot);
    }

    fn transfer(&self, slot: &mut Option<ActiveSession>, sink: &mut dyn Write) {
        if !self.is_processing() {
            return;
        }
        let Some(active) = slot.as_mut() else {
            error!("transfer requested without an open session");
            self.abort(StateReason::ErrorsDetected);
            return;
        };
        let Some(mut encoder) = encoder_for_format(&self.settings.document_format, &self.document_info) else {
            warn!(format = %self.settings.document_format, "unsupported document format");
            self.abort(StateReason::UnsupportedDocumentFormat);
            return;
        };

        let params = active.session_ref().parameters();
        let geometry = ImageGeometry {
            width: params.pixels_per_line,
            height: params.lines,
            bit_depth: params.depth,
            color_space: if self.request.color_scan { ColorSpace::Rgb } else { ColorSpace::Grayscale },
            resolution_dpi: self.settings.resolution_dpi as f64,
        };
        if let Err(err) = encoder.configure(geometry) {
            error!(%err, "encoder rejected device geometry");
            self.abort(StateReason::ErrorsDetected);
        } else {
            let expected = if self.request.synthesize_gray {
                params.bytes_per_line / 3
            } else {
                params.bytes_per_line
            };
            if encoder.bytes_per_line() != expected {
                error!(
                    encoder = encoder.bytes_per_line(),
                    device = expected,
                    "encoder and device disagree on bytes per line"
                );
                self.abort(StateReason::ErrorsDetected);
            } else {
                info!(
                    format = encoder.mime_type(),
                    width = geometry.width,
                    height = geometry.height,
                    depth = geometry.bit_depth,
                    "transfer started"
                );
            }
        }

        let gamma = match &self.gamma {
            Some(table) if table.depth() != params.depth => {
                warn!(table = table.depth(), device = params.depth, "device depth differs from gamma table, gamma skipped");
                None
            }
            other => other.as_ref(),
        };

        let session = active.session();
        let mut buffer = vec![0u8; params.bytes_per_line];
        while self.is_processing() {
            let mut status = DeviceStatus::Good;
            while status.is_good() && self.is_processing() {
                status = session.read(&mut buffer);
                if !status.is_good() {
                    break;
                }
                if let Some(table) = gamma {
                    table.apply(&mut buffer);
                }
                let len = if self.request.synthesize_gray {
                    synthesize_gray(&mut buffer, params.depth)
                } else {
                    buffer.len()
                };
                let written = encoder
                    .write_line(&buffer[..len], sink)
                    .and_then(|()| sink.flush().map_err(Into::into));
                if let Err(err) = written {
                    warn!(%err, "could not send data, aborting");
                    self.abort(StateReason::ErrorsDetected);
                }
                self.touch();
            }
            if !self.is_processing() {
                break;
            }
            if status == DeviceStatus::Eof {
                // Checked before the status moves the job out of processing.
                if encoder.lines_left_in_current_image() != encoder.height() {
                    error!(
                        missing = encoder.lines_left_in_current_image(),
                        "incomplete or excess scan data"
                    );
                    self.abort(StateReason::ErrorsDetected);
                    break;
                }
                let images = self.images_completed.fetch_add(1, Ordering::SeqCst) + 1;
                info!(images, "image completed");
            }
            self.update_status(status, Some(&mut *session));
        }

        if let Err(err) = encoder.end_document(sink).and_then(|()| sink.flush().map_err(Into::into)) {
            warn!(%err, "could not finish document");
            self.abort_settled(StateReason::ErrorsDetected);
        }
        self.touch();
    }

    fn cancel(&self) -> bool {
        let _entered = self.span.enter();
        let canceled = [JobState::Pending, JobState::Processing]
            .into_iter()
            .any(|from| self.transition(from, JobState::Canceled, StateReason::JobCanceledByUser));
        if canceled {
            info!("job canceled");
            if let Some(handle) = lock(&self.cancel_handle).as_ref() {
                handle.cancel();
            }
        }
        canceled
    }

    fn release_session(&self) {
        let _entered = self.span.enter();
        let mut slot = lock(&self.session);
        self.close_session(&mut slot);
    }
}

// ---------------------------------------------------------------------------
// ScanJob
// ---------------------------------------------------------------------------

/// One scan request.
pub struct ScanJob {
    shared: Arc<JobShared>,
    worker: Worker,
}

impl ScanJob {
    /// Create a job from a scan ticket.  Ticket problems yield a job that is
    /// already aborted with `InvalidScanTicket`.
    pub fn new(ctx: JobContext, ticket_xml: &str, autoselect_format: bool) -> scanwerk_core::error::Result<Self> {
        let span = info_span!(parent: &ctx.parent_span, "scan_job", job = %ctx.uuid);
        let (settings, request, gamma, problem) = {
            let _entered = span.enter();
            resolve_ticket(&ctx, ticket_xml, autoselect_format)
        };
        let initial = match &problem {
            Some(reason) => pack(JobState::Aborted, *reason),
            None => pack(JobState::Pending, StateReason::JobQueued),
        };
        let now = Instant::now();
        let worker = Worker::spawn(format!("scan-job-{}", &ctx.uuid[..8.min(ctx.uuid.len())]))?;

        let shared = Arc::new(JobShared {
            uri: format!("{}/ScanJobs/{}", ctx.scanner_uri, ctx.uuid),
            uuid: ctx.uuid,
            device: ctx.device,
            settings,
            request,
            gamma,
            passthrough: ctx.options.device_options,
            document_info: ctx.document_info,
            created_at: Utc::now(),
            state: AtomicU16::new(initial),
            images_completed: AtomicU32::new(0),
            adf_status: Mutex::new(DeviceStatus::Good),
            timestamps: Mutex::new(Timestamps { created: now, last_active: now }),
            session: Mutex::new(None),
            cancel_handle: Mutex::new(None),
            span,
        });
        {
            let _entered = shared.span.enter();
            info!(
                kind = shared.settings.kind.as_str(),
                format = %shared.settings.document_format,
                state = %shared.state(),
                reason = %shared.reason(),
                "job created"
            );
        }
        Ok(Self { shared, worker })
    }

    pub fn uuid(&self) -> &str {
        &self.shared.uuid
    }

    pub fn uri(&self) -> &str {
        &self.shared.uri
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.shared.settings
    }

    pub fn kind(&self) -> JobKind {
        self.shared.settings.kind
    }

    pub fn document_format(&self) -> &str {
        &self.shared.settings.document_format
    }

    pub fn state(&self) -> JobState {
        self.shared.state()
    }

    pub fn state_reason(&self) -> StateReason {
        self.shared.reason()
    }

    pub fn images_completed(&self) -> u32 {
        self.shared.images_completed.load(Ordering::SeqCst)
    }

    pub fn images_to_transfer(&self) -> i32 {
        self.shared.settings.images_to_transfer
    }

    /// Feeder condition recorded by the last device status.
    pub fn adf_status(&self) -> DeviceStatus {
        *lock(&self.shared.adf_status)
    }

    pub fn is_pending(&self) -> bool {
        self.state() == JobState::Pending
    }

    pub fn is_processing(&self) -> bool {
        self.shared.is_processing()
    }

    pub fn is_aborted(&self) -> bool {
        self.state() == JobState::Aborted
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_finished()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.shared.created_at
    }

    pub fn age_seconds(&self) -> u64 {
        lock(&self.shared.timestamps).created.elapsed().as_secs()
    }

    pub fn idle_seconds(&self) -> u64 {
        lock(&self.shared.timestamps).last_active.elapsed().as_secs()
    }

    /// Start a transfer: open the device, apply options, start a page.
    /// True when the job is now processing.
    pub fn begin_transfer(&self) -> bool {
        let shared = Arc::clone(&self.shared);
        self.worker
            .execute_synchronously(move || shared.begin_transfer())
            .unwrap_or_else(|err| {
                error!(job = %self.uuid(), %err, "begin transfer failed");
                false
            })
    }

    /// Stream scanned data into `sink` and return it.  The device session is
    /// closed afterwards, whatever the outcome.
    pub fn finish_transfer<W>(&self, sink: W) -> scanwerk_core::error::Result<W>
    where
        W: Write + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        self.worker.execute_synchronously(move || {
            let mut sink = sink;
            shared.finish_transfer(&mut sink);
            sink
        })
    }

    /// Cancel the job.  Terminal jobs are left alone; returns whether the
    /// state changed.  Does not wait for an in-flight transfer.
    pub fn cancel(&self) -> bool {
        let canceled = self.shared.cancel();
        if canceled {
            let shared = Arc::clone(&self.shared);
            // A busy worker closes the session itself when its transfer ends.
            self.worker.try_execute(move || shared.release_session());
        }
        canceled
    }

    /// `scan:JobInfo` element for the scanner status document.
    pub fn job_info_xml(&self) -> String {
        format!(
            "<scan:JobInfo>\r\n\
             <pwg:JobUri>{}</pwg:JobUri>\r\n\
             <pwg:JobUuid>{}</pwg:JobUuid>\r\n\
             <scan:Age>{}</scan:Age>\r\n\
             <pwg:JobState>{}</pwg:JobState>\r\n\
             <pwg:ImagesToTransfer>{}</pwg:ImagesToTransfer>\r\n\
             <pwg:ImagesCompleted>{}</pwg:ImagesCompleted>\r\n\
             <pwg:JobStateReasons>\r\n\
             <pwg:JobStateReason>{}</pwg:JobStateReason>\r\n\
             </pwg:JobStateReasons>\r\n\
             </scan:JobInfo>\r\n",
            self.uri(),
            self.uuid(),
            self.age_seconds(),
            self.state(),
            self.images_to_transfer(),
            self.images_completed(),
            self.state_reason(),
        )
    }

    /// Shift the job's timestamps into the past.
    #[cfg(test)]
    pub(crate) fn backdate(&self, age: std::time::Duration, idle: std::time::Duration) {
        let now = Instant::now();
        let mut ts = lock(&self.shared.timestamps);
        ts.created = now.checked_sub(age).unwrap_or(ts.created);
        ts.last_active = now.checked_sub(idle).unwrap_or(ts.last_active);
    }
}

impl std::fmt::Debug for ScanJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanJob")
            .field("uuid", &self.shared.uuid)
            .field("state", &self.state())
            .field("reason", &self.state_reason())
            .finish()
    }
}

/// Parse the ticket and resolve it against the scanner.  The last element
/// is the reason the job must start aborted, if any.
fn resolve_ticket(
    ctx: &JobContext,
    xml: &str,
    autoselect_format: bool,
) -> (ScanSettings, DeviceRequest, Option<GammaTable>, Option<StateReason>) {
    let invalid = |settings: ScanSettings| (settings, DeviceRequest::default(), None, Some(StateReason::InvalidScanTicket));

    let settings = match ScanSettings::from_xml(xml, autoselect_format) {
        Ok(settings) => settings,
        Err(err) => {
            warn!(%err, "invalid scan ticket");
            return invalid(ScanSettings::default());
        }
    };

    let color_scan = settings.color_space == ColorSpace::Rgb;
    let synthesize_gray = !color_scan && ctx.options.synthesize_gray && ctx.color_mode.is_some();
    let mode = if color_scan || synthesize_gray {
        ctx.color_mode.clone()
    } else {
        ctx.gray_mode.clone()
    };
    let Some(mode) = mode else {
        warn!(color_scan, "scanner has no matching scan mode");
        return invalid(settings);
    };
    if synthesize_gray {
        debug!("synthesizing grayscale from RGB");
    }

    let source = match settings.input_source {
        scanwerk_core::InputSource::Platen => ctx.platen_source.clone(),
        scanwerk_core::InputSource::Feeder => ctx.adf_source.clone(),
    };
    let Some(source) = source else {
        warn!(source = ?settings.input_source, "scanner lacks the requested input source");
        return invalid(settings);
    };

    let gamma_value = if color_scan { ctx.options.color_gamma } else { ctx.options.gray_gamma };
    let gamma = match GammaTable::new(gamma_value as f64, settings.bit_depth) {
        Ok(table) => table,
        Err(err) => {
            warn!(%err, "gamma correction not possible");
            return invalid(settings);
        }
    };
    debug!(gamma = gamma_value, mode = %mode, source = %source, "ticket resolved");

    let request = DeviceRequest {
        // An empty name means the device has no source option.
        source: Some(source).filter(|s| !s.is_empty()),
        mode,
        color_scan,
        synthesize_gray,
    };
    (settings, request, gamma, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan_settings::tests::ticket_xml;
    use scanwerk_core::config::GeometryUnit;
    use scanwerk_core::{MIME_TYPE_JPEG, MIME_TYPE_PDF, MIME_TYPE_PNG, SimulatedDeviceConfig};
    use scanwerk_device::{DeviceBackend, SimulatedBackend, SimulatedDevice};
    use std::time::Duration;

    struct Rig {
        device: Arc<ScannerDevice>,
        sim: SimulatedDevice,
    }

    fn rig_with(config: SimulatedDeviceConfig) -> Rig {
        let backend = SimulatedBackend::new(vec![config]);
        let info = backend.enumerate(false).expect("enumerate").remove(0);
        let sim = backend.device(&info.name).expect("device");
        Rig {
            device: Arc::new(ScannerDevice::new(Arc::new(backend), info)),
            sim,
        }
    }

    fn rig() -> Rig {
        rig_with(SimulatedDeviceConfig::default())
    }

    fn context(rig: &Rig, options: DeviceOptions) -> JobContext {
        JobContext {
            uuid: uuid::Uuid::new_v4().to_string(),
            scanner_uri: "/eSCL".into(),
            device: rig.device.clone(),
            platen_source: Some("Flatbed".into()),
            adf_source: Some("ADF".into()),
            gray_mode: Some("Gray".into()),
            color_mode: Some("Color".into()),
            options,
            document_info: DocumentInfo {
                creator: "Scanwerk Virtual Scanner".into(),
                producer: "Scanwerk".into(),
            },
            parent_span: Span::none(),
        }
    }

    fn job(rig: &Rig, xml: &str) -> ScanJob {
        ScanJob::new(context(rig, DeviceOptions::default()), xml, false).expect("job")
    }

    fn small_ticket(source: &str, mode: &str, format: &str) -> String {
        // One inch square at 75 dpi; the millimetre device rounds it to 25 mm.
        ticket_xml(source, mode, format, 75, 300, 300)
    }

    /// Scan area the device holds after the job's options were written.
    fn applied_area(rig: &Rig, job: &ScanJob) -> [f64; 4] {
        let mut active = rig.device.open_session().expect("open");
        assert_eq!(job.shared.apply_options(active.session()), DeviceStatus::Good);
        let options = active.session_ref().options();
        [OPTION_TL_X, OPTION_TL_Y, OPTION_BR_X, OPTION_BR_Y]
            .map(|name| options.get(name).and_then(|o| o.numeric_value()).expect("area option"))
    }

    #[test]
    fn status_table() {
        use JobKind::*;
        use StatusOutcome::Settle;
        let cases = [
            (DeviceStatus::Good, Single, 0, Settle(JobState::Processing, StateReason::JobScanning)),
            (DeviceStatus::Inval, Single, 0, Settle(JobState::Aborted, StateReason::InvalidScanTicket)),
            (DeviceStatus::DeviceBusy, Single, 0, Settle(JobState::Aborted, StateReason::ResourcesAreNotReady)),
            (DeviceStatus::IoError, AdfSingle, 1, Settle(JobState::Aborted, StateReason::ResourcesAreNotReady)),
            (DeviceStatus::NoMem, Single, 0, Settle(JobState::Aborted, StateReason::ResourcesAreNotReady)),
            (DeviceStatus::AccessDenied, Single, 0, Settle(JobState::Aborted, StateReason::DocumentPermissionError)),
            (DeviceStatus::Jammed, AdfSingle, 0, Settle(JobState::Aborted, StateReason::ResourcesAreNotReady)),
            (DeviceStatus::CoverOpen, AdfSingle, 0, Settle(JobState::Aborted, StateReason::ResourcesAreNotReady)),
            (DeviceStatus::Cancelled, Single, 0, Settle(JobState::Aborted, StateReason::JobCanceledByUser)),
            (DeviceStatus::Eof, Single, 1, Settle(JobState::Completed, StateReason::JobCompletedSuccessfully)),
            (DeviceStatus::Eof, Single, 0, Settle(JobState::Pending, StateReason::None)),
            (DeviceStatus::Eof, AdfSingle, 3, Settle(JobState::Pending, StateReason::None)),
            (DeviceStatus::Eof, AdfConcat, 3, StatusOutcome::NextPage),
            (DeviceStatus::NoDocs, AdfSingle, 2, Settle(JobState::Completed, StateReason::JobCompletedSuccessfully)),
            (DeviceStatus::NoDocs, AdfConcat, 0, Settle(JobState::Aborted, StateReason::ResourcesAreNotReady)),
            (DeviceStatus::NoDocs, Single, 1, Settle(JobState::Aborted, StateReason::ResourcesAreNotReady)),
            (DeviceStatus::Unsupported, Single, 0, Settle(JobState::Aborted, StateReason::ErrorsDetected)),
        ];
        for (status, kind, images, expected) in cases {
            assert_eq!(status_outcome(status, kind, images), expected, "{status:?} {kind:?} {images}");
        }
    }

    #[test]
    fn state_word_round_trips() {
        let word = pack(JobState::Aborted, StateReason::DocumentPermissionError);
        assert_eq!(unpack(word), (JobState::Aborted, StateReason::DocumentPermissionError));
    }

    #[test]
    fn new_job_is_queued() {
        let rig = rig();
        let job = job(&rig, &small_ticket("Platen", "Grayscale8", MIME_TYPE_PNG));
        assert_eq!(job.state(), JobState::Pending);
        assert_eq!(job.state_reason(), StateReason::JobQueued);
        assert!(job.uri().starts_with("/eSCL/ScanJobs/"));
    }

    #[test]
    fn invalid_ticket_creates_aborted_job() {
        let rig = rig();
        let job = job(&rig, "<scan:ScanSettings/>");
        assert_eq!(job.state(), JobState::Aborted);
        assert_eq!(job.state_reason(), StateReason::InvalidScanTicket);
        assert!(!job.begin_transfer());
    }

    #[test]
    fn gamma_on_unsupported_depth_aborts_at_creation() {
        let rig = rig();
        let options = DeviceOptions { gray_gamma: 2.2, ..DeviceOptions::default() };
        let xml = small_ticket("Platen", "Grayscale4", MIME_TYPE_PNG);
        let job = ScanJob::new(context(&rig, options), &xml, false).expect("job");
        assert_eq!(job.state_reason(), StateReason::InvalidScanTicket);
    }

    #[test]
    fn begin_transfer_reaches_processing_or_pending() {
        let rig = rig();
        let job = job(&rig, &small_ticket("Platen", "RGB24", MIME_TYPE_JPEG));
        assert!(job.begin_transfer());
        assert_eq!(job.state(), JobState::Processing);
        assert!(rig.device.is_open());
        // Not pending any more, so a second begin is refused.
        assert!(!job.begin_transfer());
        job.finish_transfer(Vec::new()).expect("finish");
        assert!(!rig.device.is_open());
    }

    #[test]
    fn platen_job_completes_with_one_image() {
        let rig = rig();
        let job = job(&rig, &small_ticket("Platen", "Grayscale8", MIME_TYPE_PNG));
        assert!(job.begin_transfer());
        let out = job.finish_transfer(Vec::new()).expect("finish");
        assert_eq!(job.images_completed(), 1);
        assert_eq!(job.state(), JobState::Completed);
        assert_eq!(job.state_reason(), StateReason::JobCompletedSuccessfully);
        let img = image::load_from_memory(&out).expect("decode");
        assert_eq!((img.width(), img.height()), (74, 74));
        assert!(!rig.device.is_open());
    }

    #[test]
    fn millimetre_area_is_rounded_to_whole_units() {
        let rig = rig();
        // 620 x 750 px at 75 dpi is 209.97 x 254 mm.
        let job = job(&rig, &ticket_xml("Platen", "Grayscale8", MIME_TYPE_PNG, 75, 2480, 3000));
        assert_eq!(applied_area(&rig, &job), [0.0, 0.0, 210.0, 254.0]);
    }

    #[test]
    fn pixel_area_is_rounded_to_whole_pixels() {
        let rig = rig_with(SimulatedDeviceConfig {
            geometry_unit: GeometryUnit::Pixel,
            ..SimulatedDeviceConfig::default()
        });
        // 1202 / 300 * 75 = 300.5 px.
        let job = job(&rig, &ticket_xml("Platen", "Grayscale8", MIME_TYPE_PNG, 75, 1202, 602));
        assert_eq!(applied_area(&rig, &job), [0.0, 0.0, 301.0, 151.0]);
    }

    #[test]
    fn a4_jpeg_uses_device_geometry() {
        let rig = rig_with(SimulatedDeviceConfig {
            geometry_unit: GeometryUnit::Pixel,
            ..SimulatedDeviceConfig::default()
        });
        let job = job(&rig, &ticket_xml("Platen", "Grayscale8", MIME_TYPE_JPEG, 300, 2480, 3508));
        assert!(job.begin_transfer());
        let out = job.finish_transfer(Vec::new()).expect("finish");
        assert_eq!(job.state(), JobState::Completed);
        assert_eq!(rig.sim.counters().lines_read, 3508);
        let img = image::load_from_memory(&out).expect("decode");
        assert_eq!((img.width(), img.height()), (2480, 3508));
    }

    #[test]
    fn adf_concat_pdf_spans_all_pages() {
        let rig = rig();
        rig.sim.load_pages(3);
        let xml = small_ticket("Feeder", "Grayscale8", MIME_TYPE_PDF)
            .replace("</scan:ScanSettings>", "<scan:BatchIfPossible>1</scan:BatchIfPossible></scan:ScanSettings>");
        let job = job(&rig, &xml);
        assert_eq!(job.kind(), JobKind::AdfConcat);
        assert!(job.begin_transfer());
        let out = job.finish_transfer(Vec::new()).expect("finish");
        assert_eq!(job.images_completed(), 3);
        assert_eq!(job.state(), JobState::Completed);
        assert_eq!(job.adf_status(), DeviceStatus::NoDocs);
        let doc = lopdf::Document::load_mem(&out).expect("parse PDF");
        assert_eq!(doc.get_pages().len(), 3);
    }

    #[test]
    fn adf_single_delivers_page_per_transfer() {
        let rig = rig();
        rig.sim.load_pages(2);
        let job = job(&rig, &small_ticket("Feeder", "RGB24", MIME_TYPE_JPEG));
        for page in 1..=2 {
            assert!(job.begin_transfer(), "page {page}");
            job.finish_transfer(Vec::new()).expect("finish");
            assert_eq!(job.state(), JobState::Pending);
            assert_eq!(job.images_completed(), page);
        }
        assert!(!job.begin_transfer());
        assert_eq!(job.state(), JobState::Completed);
        assert_eq!(job.adf_status(), DeviceStatus::NoDocs);
        assert!(!rig.device.is_open());
    }

    #[test]
    fn short_feeder_page_aborts() {
        let rig = rig();
        rig.sim.load_pages(2);
        rig.sim.fail_read_after(10, DeviceStatus::Eof);
        let job = job(&rig, &small_ticket("Feeder", "Grayscale8", MIME_TYPE_PNG));
        assert!(job.begin_transfer());
        let out = job.finish_transfer(Vec::new()).expect("finish");
        assert!(out.is_empty());
        assert_eq!(job.state(), JobState::Aborted);
        assert_eq!(job.state_reason(), StateReason::ErrorsDetected);
        assert_eq!(job.images_completed(), 0);
        assert!(!job.begin_transfer());
        assert!(!rig.device.is_open());
    }

    #[test]
    fn short_platen_page_aborts() {
        let rig = rig();
        rig.sim.fail_read_after(10, DeviceStatus::Eof);
        let job = job(&rig, &small_ticket("Platen", "Grayscale8", MIME_TYPE_JPEG));
        assert!(job.begin_transfer());
        job.finish_transfer(Vec::new()).expect("finish");
        assert_eq!(job.state(), JobState::Aborted);
        assert_eq!(job.state_reason(), StateReason::ErrorsDetected);
    }

    #[test]
    fn unfinished_feeder_document_aborts() {
        // Lines go through; only the final document write fails.
        struct RejectsWrites;
        impl Write for RejectsWrites {
            fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        let rig = rig();
        rig.sim.load_pages(2);
        let job = job(&rig, &small_ticket("Feeder", "Grayscale8", MIME_TYPE_PDF));
        assert_eq!(job.kind(), JobKind::AdfSingle);
        assert!(job.begin_transfer());
        job.finish_transfer(RejectsWrites).expect("finish");
        assert_eq!(job.state(), JobState::Aborted);
        assert_eq!(job.state_reason(), StateReason::ErrorsDetected);
        assert!(!rig.device.is_open());
    }

    #[test]
    fn empty_feeder_aborts_not_completes() {
        let rig = rig();
        rig.sim.load_pages(0);
        let job = job(&rig, &small_ticket("Feeder", "Grayscale8", MIME_TYPE_PNG));
        assert!(!job.begin_transfer());
        assert_eq!(job.state(), JobState::Aborted);
        assert_eq!(job.state_reason(), StateReason::ResourcesAreNotReady);
        assert_eq!(job.adf_status(), DeviceStatus::NoDocs);
        assert!(!rig.device.is_open());
    }

    #[test]
    fn jam_is_recorded_as_adf_status() {
        let rig = rig();
        rig.sim.script_start([DeviceStatus::Jammed]);
        let job = job(&rig, &small_ticket("Feeder", "Grayscale8", MIME_TYPE_PNG));
        assert!(!job.begin_transfer());
        assert_eq!(job.state_reason(), StateReason::ResourcesAreNotReady);
        assert_eq!(job.adf_status(), DeviceStatus::Jammed);
    }

    #[test]
    fn busy_device_keeps_job_pending() {
        let rig = rig();
        let _held = rig.device.open_session().expect("open");
        let job = job(&rig, &small_ticket("Platen", "Grayscale8", MIME_TYPE_PNG));
        assert!(!job.begin_transfer());
        assert_eq!(job.state(), JobState::Pending);
        drop(_held);
        assert!(job.begin_transfer());
    }

    #[test]
    fn access_denied_on_open_aborts() {
        let rig = rig();
        rig.sim.fail_next_open(DeviceStatus::AccessDenied);
        let job = job(&rig, &small_ticket("Platen", "Grayscale8", MIME_TYPE_PNG));
        assert!(!job.begin_transfer());
        assert_eq!(job.state_reason(), StateReason::DocumentPermissionError);
    }

    #[test]
    fn read_error_mid_page_aborts_and_releases_device() {
        let rig = rig();
        rig.sim.fail_read_after(10, DeviceStatus::IoError);
        let job = job(&rig, &small_ticket("Platen", "Grayscale8", MIME_TYPE_PNG));
        assert!(job.begin_transfer());
        let out = job.finish_transfer(Vec::new()).expect("finish");
        assert!(out.is_empty());
        assert_eq!(job.state(), JobState::Aborted);
        assert_eq!(job.state_reason(), StateReason::ResourcesAreNotReady);
        assert_eq!(job.images_completed(), 0);
        assert!(!rig.device.is_open());
    }

    #[test]
    fn unsupported_format_aborts_transfer() {
        let rig = rig();
        let job = job(&rig, &small_ticket("Platen", "Grayscale8", "image/tiff"));
        assert!(job.begin_transfer());
        job.finish_transfer(Vec::new()).expect("finish");
        assert_eq!(job.state_reason(), StateReason::UnsupportedDocumentFormat);
        assert!(!rig.device.is_open());
    }

    #[test]
    fn bytes_per_line_mismatch_aborts() {
        let rig = rig();
        rig.sim.override_parameters(scanwerk_device::ScanParameters {
            format: scanwerk_device::FrameFormat::Gray,
            bytes_per_line: 80,
            pixels_per_line: 75,
            lines: 75,
            depth: 8,
        });
        let job = job(&rig, &small_ticket("Platen", "Grayscale8", MIME_TYPE_PNG));
        assert!(job.begin_transfer());
        job.finish_transfer(Vec::new()).expect("finish");
        assert_eq!(job.state(), JobState::Aborted);
        assert_eq!(job.state_reason(), StateReason::ErrorsDetected);
    }

    #[test]
    fn synthesized_gray_drives_device_in_color() {
        let rig = rig();
        let options = DeviceOptions { synthesize_gray: true, ..DeviceOptions::default() };
        let xml = small_ticket("Platen", "Grayscale8", MIME_TYPE_PNG);
        let job = ScanJob::new(context(&rig, options), &xml, false).expect("job");
        assert!(job.begin_transfer());
        let out = job.finish_transfer(Vec::new()).expect("finish");
        assert_eq!(job.state(), JobState::Completed);
        let img = image::load_from_memory(&out).expect("decode");
        assert_eq!(img.color(), image::ColorType::L8);
    }

    #[test]
    fn failed_sink_aborts_transfer() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
            }
        }
        let rig = rig();
        let job = job(&rig, &small_ticket("Platen", "Grayscale8", MIME_TYPE_PNG));
        assert!(job.begin_transfer());
        job.finish_transfer(Broken).expect("finish");
        assert_eq!(job.state(), JobState::Aborted);
        assert_eq!(job.state_reason(), StateReason::ErrorsDetected);
        assert!(!rig.device.is_open());
    }

    #[test]
    fn cancel_is_idempotent_and_spares_terminal_states() {
        let rig = rig();
        let job = job(&rig, &small_ticket("Platen", "Grayscale8", MIME_TYPE_PNG));
        assert!(job.cancel());
        assert!(!job.cancel());
        assert_eq!(job.state(), JobState::Canceled);
        assert_eq!(job.state_reason(), StateReason::JobCanceledByUser);

        let done = self::job(&rig, &small_ticket("Platen", "Grayscale8", MIME_TYPE_PNG));
        assert!(done.begin_transfer());
        done.finish_transfer(Vec::new()).expect("finish");
        assert!(!done.cancel());
        assert_eq!(done.state(), JobState::Completed);
    }

    #[test]
    fn cancel_during_transfer_stops_reading() {
        let rig = rig();
        rig.sim.set_line_delay(Duration::from_millis(5));
        let job = Arc::new(job(&rig, &small_ticket("Platen", "Grayscale8", MIME_TYPE_PNG)));
        assert!(job.begin_transfer());
        let transfer = {
            let job = job.clone();
            std::thread::spawn(move || job.finish_transfer(Vec::new()).expect("finish"))
        };
        std::thread::sleep(Duration::from_millis(40));
        assert!(job.cancel());
        let out = transfer.join().expect("join");
        assert!(out.is_empty());
        assert_eq!(job.state(), JobState::Canceled);
        assert!(rig.sim.counters().lines_read < 75);
        assert!(!rig.device.is_open());
    }

    #[test]
    fn cancel_after_begin_releases_session() {
        let rig = rig();
        let job = job(&rig, &small_ticket("Platen", "Grayscale8", MIME_TYPE_PNG));
        assert!(job.begin_transfer());
        assert!(job.cancel());
        // The release runs on the worker; a synchronous call orders after it.
        job.finish_transfer(Vec::new()).expect("finish");
        assert!(!rig.device.is_open());
    }

    #[test]
    fn job_info_lists_state_and_counters() {
        let rig = rig();
        let job = job(&rig, &small_ticket("Feeder", "Grayscale8", MIME_TYPE_PNG));
        let xml = job.job_info_xml();
        assert!(xml.contains(&format!("<pwg:JobUuid>{}</pwg:JobUuid>\r\n", job.uuid())));
        assert!(xml.contains("<pwg:JobState>Pending</pwg:JobState>"));
        assert!(xml.contains(&format!("<pwg:ImagesToTransfer>{}</pwg:ImagesToTransfer>", i32::MAX)));
        assert!(xml.contains("<pwg:JobStateReason>JobQueued</pwg:JobStateReason>"));
    }

    #[test]
    fn idle_and_age_are_tracked_separately() {
        let rig = rig();
        let job = job(&rig, &small_ticket("Platen", "Grayscale8", MIME_TYPE_PNG));
        job.backdate(Duration::from_secs(600), Duration::from_secs(5));
        assert!(job.age_seconds() >= 600);
        assert!(job.idle_seconds() < 600);
    }
}
