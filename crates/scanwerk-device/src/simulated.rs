// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Simulated scanner backend for hosts without a platform driver and for CI.
//
// Each configured device behaves like a single-open scanner: a flatbed that
// delivers one page per `start()`, and a feeder holding a number of sheets
// that survives across sessions.  Tests script faults (jams, busy devices,
// I/O errors) through `SimulatedDevice`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use scanwerk_core::config::GeometryUnit;
use scanwerk_core::error::Result;
use scanwerk_core::SimulatedDeviceConfig;
use tracing::{debug, info, warn};

use crate::options::*;
use crate::status::{DeviceStatus, FrameFormat, ScanParameters};
use crate::traits::{CancelHandle, DeviceBackend, DeviceInfo, DeviceSession, SessionCanceller};

/// Source name of the flatbed.
pub const SOURCE_FLATBED: &str = "Flatbed";
/// Source name of the simplex feeder.
pub const SOURCE_ADF: &str = "ADF";
/// Source name of the duplex feeder.
pub const SOURCE_ADF_DUPLEX: &str = "ADF Duplex";

const MM_PER_INCH: f64 = 25.4;

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Backend serving the devices described in the server configuration.
pub struct SimulatedBackend {
    devices: Vec<SimulatedDevice>,
}

impl SimulatedBackend {
    pub fn new(configs: Vec<SimulatedDeviceConfig>) -> Self {
        let devices = configs.into_iter().map(SimulatedDevice::new).collect();
        Self { devices }
    }

    /// Handle to a configured device, for scripting and inspection.
    pub fn device(&self, name: &str) -> Option<SimulatedDevice> {
        self.devices.iter().find(|d| d.config.name == name).cloned()
    }
}

impl DeviceBackend for SimulatedBackend {
    fn backend_name(&self) -> &str {
        "simulated"
    }

    fn enumerate(&self, local_only: bool) -> Result<Vec<DeviceInfo>> {
        let infos: Vec<DeviceInfo> = self
            .devices
            .iter()
            .filter(|d| !(local_only && d.config.network))
            .map(SimulatedDevice::info)
            .collect();
        info!(count = infos.len(), local_only, "simulated devices enumerated");
        Ok(infos)
    }

    fn open(&self, device_name: &str) -> std::result::Result<Box<dyn DeviceSession>, DeviceStatus> {
        let device = self.device(device_name).ok_or_else(|| {
            warn!(device = device_name, "open requested for unknown device");
            DeviceStatus::Inval
        })?;
        let session = SimulatedSession::open(device)?;
        Ok(Box::new(session))
    }
}

// ---------------------------------------------------------------------------
// Device handle
// ---------------------------------------------------------------------------

/// Operation counters, for assertions in tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulatedCounters {
    pub opens: u32,
    pub starts: u32,
    pub lines_read: u32,
    pub cancels: u32,
}

#[derive(Debug, Default)]
struct DeviceState {
    open: bool,
    pages_loaded: u32,
    open_failure: Option<DeviceStatus>,
    start_script: VecDeque<DeviceStatus>,
    read_failure: Option<(u32, DeviceStatus)>,
    line_delay: Option<Duration>,
    parameters_override: Option<ScanParameters>,
    counters: SimulatedCounters,
}

/// Shared handle to one simulated device.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    config: Arc<SimulatedDeviceConfig>,
    state: Arc<Mutex<DeviceState>>,
}

impl SimulatedDevice {
    fn new(config: SimulatedDeviceConfig) -> Self {
        let state = DeviceState {
            pages_loaded: config.adf_pages,
            ..DeviceState::default()
        };
        Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn info(&self) -> DeviceInfo {
        DeviceInfo {
            name: self.config.name.clone(),
            vendor: self.config.vendor.clone(),
            model: self.config.model.clone(),
            kind: if self.config.adf {
                "sheetfed scanner".into()
            } else {
                "flatbed scanner".into()
            },
        }
    }

    /// Put `pages` sheets into the feeder.
    pub fn load_pages(&self, pages: u32) {
        self.lock().pages_loaded = pages;
    }

    pub fn pages_loaded(&self) -> u32 {
        self.lock().pages_loaded
    }

    /// Make the next `open` fail with `status`.
    pub fn fail_next_open(&self, status: DeviceStatus) {
        self.lock().open_failure = Some(status);
    }

    /// Statuses returned by upcoming `start()` calls, in order.  A scripted
    /// `Good` proceeds with a normal page.
    pub fn script_start<I: IntoIterator<Item = DeviceStatus>>(&self, statuses: I) {
        self.lock().start_script.extend(statuses);
    }

    /// Make a read fail with `status` after `lines` lines of the current page.
    pub fn fail_read_after(&self, lines: u32, status: DeviceStatus) {
        self.lock().read_failure = Some((lines, status));
    }

    /// Delay every line read, to keep a transfer in flight.
    pub fn set_line_delay(&self, delay: Duration) {
        self.lock().line_delay = Some(delay);
    }

    /// Report these parameters instead of the ones derived from the options.
    pub fn override_parameters(&self, parameters: ScanParameters) {
        self.lock().parameters_override = Some(parameters);
    }

    pub fn counters(&self) -> SimulatedCounters {
        self.lock().counters
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

struct CancelFlag(AtomicBool);

impl SessionCanceller for CancelFlag {
    fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Current option values, from which the option map is rebuilt.
#[derive(Debug, Clone)]
struct Settings {
    source: String,
    mode: String,
    depth: f64,
    resolution: f64,
    x_resolution: f64,
    y_resolution: f64,
    tl_x: f64,
    tl_y: f64,
    br_x: f64,
    br_y: f64,
    brightness: f64,
}

/// Session on a simulated device.
pub struct SimulatedSession {
    device: SimulatedDevice,
    settings: Settings,
    options: OptionSet,
    parameters: ScanParameters,
    page_active: bool,
    lines_left: u32,
    line_index: u32,
    cancel_flag: Arc<CancelFlag>,
}

impl SimulatedSession {
    fn open(device: SimulatedDevice) -> std::result::Result<Self, DeviceStatus> {
        {
            let mut state = device.lock();
            if let Some(status) = state.open_failure.take() {
                debug!(device = %device.config.name, %status, "scripted open failure");
                return Err(status);
            }
            if state.open {
                return Err(DeviceStatus::DeviceBusy);
            }
            state.open = true;
            state.counters.opens += 1;
        }

        let config = &device.config;
        let source = source_names(config)
            .into_iter()
            .next()
            .unwrap_or_else(|| SOURCE_FLATBED.to_string());
        let mode = config
            .modes
            .iter()
            .find(|m| m.as_str() == "Gray")
            .or_else(|| config.modes.first())
            .cloned()
            .unwrap_or_else(|| "Gray".to_string());
        let resolution = nearest_resolution(config, 300.0);

        let mut settings = Settings {
            source,
            mode,
            depth: 8.0,
            resolution,
            x_resolution: resolution,
            y_resolution: resolution,
            tl_x: 0.0,
            tl_y: 0.0,
            br_x: 0.0,
            br_y: 0.0,
            brightness: 0.0,
        };
        let (w, h) = area_extent(config, &settings);
        settings.br_x = w;
        settings.br_y = h;

        let options = build_options(config, &settings);
        let parameters = compute_parameters(config, &settings);
        debug!(device = %config.name, options = options.len(), "simulated session opened");

        Ok(Self {
            device,
            settings,
            options,
            parameters,
            page_active: false,
            lines_left: 0,
            line_index: 0,
            cancel_flag: Arc::new(CancelFlag(AtomicBool::new(false))),
        })
    }

    fn is_feeder_source(&self) -> bool {
        self.settings.source.starts_with(SOURCE_ADF)
    }

    fn reload(&mut self, old: &Settings) {
        let config = &self.device.config;
        if config.geometry_unit == GeometryUnit::Pixel && old.resolution != self.settings.resolution {
            let f = self.settings.resolution / old.resolution;
            for v in [
                &mut self.settings.tl_x,
                &mut self.settings.tl_y,
                &mut self.settings.br_x,
                &mut self.settings.br_y,
            ] {
                *v = (*v * f).round();
            }
        }
        let (w, h) = area_extent(config, &self.settings);
        self.settings.tl_x = self.settings.tl_x.clamp(0.0, w);
        self.settings.br_x = self.settings.br_x.clamp(0.0, w);
        self.settings.tl_y = self.settings.tl_y.clamp(0.0, h);
        self.settings.br_y = self.settings.br_y.clamp(0.0, h);
        self.options = build_options(config, &self.settings);
        debug!(device = %config.name, "option map reloaded");
    }
}

impl DeviceSession for SimulatedSession {
    fn device_name(&self) -> &str {
        &self.device.config.name
    }

    fn options(&self) -> &OptionSet {
        &self.options
    }

    fn set_option(&mut self, name: &str, value: &OptionValue) -> DeviceStatus {
        let Some(accepted) = self.options.get(name).and_then(|o| o.constrain(value)) else {
            debug!(option = name, %value, "option write rejected");
            return DeviceStatus::Inval;
        };
        let old = self.settings.clone();
        let s = &mut self.settings;
        match (name, &accepted) {
            (OPTION_SOURCE, OptionValue::Text(v)) => s.source = v.clone(),
            (OPTION_MODE, OptionValue::Text(v)) => s.mode = v.clone(),
            (OPTION_BIT_DEPTH, OptionValue::Numeric(v)) => s.depth = *v,
            (OPTION_RESOLUTION, OptionValue::Numeric(v)) => {
                s.resolution = *v;
                s.x_resolution = *v;
                s.y_resolution = *v;
            }
            (OPTION_X_RESOLUTION, OptionValue::Numeric(v)) => {
                s.x_resolution = *v;
                s.resolution = *v;
            }
            (OPTION_Y_RESOLUTION, OptionValue::Numeric(v)) => s.y_resolution = *v,
            (OPTION_TL_X, OptionValue::Numeric(v)) => s.tl_x = *v,
            (OPTION_TL_Y, OptionValue::Numeric(v)) => s.tl_y = *v,
            (OPTION_BR_X, OptionValue::Numeric(v)) => s.br_x = *v,
            (OPTION_BR_Y, OptionValue::Numeric(v)) => s.br_y = *v,
            ("brightness", OptionValue::Numeric(v)) => s.brightness = *v,
            _ => return DeviceStatus::Inval,
        }
        let needs_reload = old.source != self.settings.source
            || old.resolution != self.settings.resolution;
        if needs_reload {
            self.reload(&old);
        } else if let Some(option) = self.options.get_mut(name) {
            option.value = accepted;
        }
        DeviceStatus::Good
    }

    fn start(&mut self) -> DeviceStatus {
        self.cancel_flag.0.store(false, Ordering::SeqCst);
        let feeder = self.is_feeder_source();
        let (scripted, override_params) = {
            let mut state = self.device.lock();
            state.counters.starts += 1;
            let scripted = state.start_script.pop_front();
            (scripted, state.parameters_override)
        };

        if let Some(status) = scripted.filter(|s| !s.is_good()) {
            debug!(device = %self.device.config.name, %status, "scripted start status");
            self.page_active = false;
            return status;
        }

        if feeder {
            let mut state = self.device.lock();
            if state.pages_loaded == 0 {
                self.page_active = false;
                return DeviceStatus::NoDocs;
            }
            state.pages_loaded -= 1;
        }

        self.parameters = override_params
            .unwrap_or_else(|| compute_parameters(&self.device.config, &self.settings));
        self.lines_left = self.parameters.lines;
        self.line_index = 0;
        self.page_active = true;
        DeviceStatus::Good
    }

    fn parameters(&self) -> ScanParameters {
        self.parameters
    }

    fn read(&mut self, buffer: &mut [u8]) -> DeviceStatus {
        if self.cancel_flag.0.load(Ordering::SeqCst) {
            self.page_active = false;
            return DeviceStatus::Cancelled;
        }
        if !self.page_active {
            return DeviceStatus::Inval;
        }
        if self.lines_left == 0 {
            self.page_active = false;
            return DeviceStatus::Eof;
        }

        let delay = {
            let mut state = self.device.lock();
            if let Some((after, status)) = state.read_failure {
                if after == self.line_index {
                    state.read_failure = None;
                    self.page_active = false;
                    return status;
                }
            }
            state.counters.lines_read += 1;
            state.line_delay
        };
        if let Some(d) = delay {
            std::thread::sleep(d);
        }

        for (i, byte) in buffer.iter_mut().enumerate() {
            *byte = ((i as u32 + self.line_index) % 256) as u8;
        }
        self.lines_left -= 1;
        self.line_index += 1;
        DeviceStatus::Good
    }

    fn cancel(&mut self) {
        self.cancel_flag.cancel();
        if self.page_active {
            debug!(device = %self.device.config.name, "page cancelled");
        }
        self.page_active = false;
        self.device.lock().counters.cancels += 1;
    }

    fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(self.cancel_flag.clone())
    }
}

impl Drop for SimulatedSession {
    fn drop(&mut self) {
        self.cancel();
        self.device.lock().open = false;
        debug!(device = %self.device.config.name, "simulated session closed");
    }
}

// ---------------------------------------------------------------------------
// Option map construction
// ---------------------------------------------------------------------------

fn source_names(config: &SimulatedDeviceConfig) -> Vec<String> {
    let mut names = Vec::new();
    if config.flatbed {
        names.push(SOURCE_FLATBED.to_string());
    }
    if config.adf {
        names.push(SOURCE_ADF.to_string());
        if config.duplex {
            names.push(SOURCE_ADF_DUPLEX.to_string());
        }
    }
    names
}

fn resolution_constraint(config: &SimulatedDeviceConfig) -> Constraint {
    if config.resolutions.is_empty() {
        Constraint::Range {
            min: config.min_resolution as f64,
            max: config.max_resolution as f64,
            step: config.resolution_step as f64,
        }
    } else {
        Constraint::NumericList(config.resolutions.iter().map(|r| *r as f64).collect())
    }
}

fn nearest_resolution(config: &SimulatedDeviceConfig, wanted: f64) -> f64 {
    let resolution = DeviceOption {
        name: OPTION_RESOLUTION.into(),
        unit: Unit::Dpi,
        constraint: resolution_constraint(config),
        value: OptionValue::Numeric(wanted),
        settable: true,
    };
    resolution
        .constrain(&OptionValue::Numeric(wanted))
        .and_then(|v| v.as_f64())
        .unwrap_or(wanted)
}

/// Width and height of the scan area for the current source, in the
/// device's geometry unit.
fn area_extent(config: &SimulatedDeviceConfig, settings: &Settings) -> (f64, f64) {
    let height_mm = if settings.source.starts_with(SOURCE_ADF) {
        config.adf_height_mm
    } else {
        config.flatbed_height_mm
    };
    match config.geometry_unit {
        GeometryUnit::Mm => (config.flatbed_width_mm, height_mm),
        GeometryUnit::Pixel => (
            (config.flatbed_width_mm / MM_PER_INCH * settings.resolution).round(),
            (height_mm / MM_PER_INCH * settings.resolution).round(),
        ),
    }
}

fn numeric(name: &str, unit: Unit, constraint: Constraint, value: f64) -> DeviceOption {
    DeviceOption {
        name: name.into(),
        unit,
        constraint,
        value: OptionValue::Numeric(value),
        settable: true,
    }
}

fn build_options(config: &SimulatedDeviceConfig, settings: &Settings) -> OptionSet {
    let mut set = OptionSet::new();
    set.insert(DeviceOption {
        name: OPTION_SOURCE.into(),
        unit: Unit::None,
        constraint: Constraint::StringList(source_names(config)),
        value: OptionValue::Text(settings.source.clone()),
        settable: true,
    });
    set.insert(DeviceOption {
        name: OPTION_MODE.into(),
        unit: Unit::None,
        constraint: Constraint::StringList(config.modes.clone()),
        value: OptionValue::Text(settings.mode.clone()),
        settable: true,
    });
    let depths = if config.max_depth >= 16 { vec![8.0, 16.0] } else { vec![8.0] };
    set.insert(numeric(OPTION_BIT_DEPTH, Unit::Bit, Constraint::NumericList(depths), settings.depth));
    set.insert(numeric(OPTION_RESOLUTION, Unit::Dpi, resolution_constraint(config), settings.resolution));
    set.insert(numeric("brightness", Unit::Percent, Constraint::Range { min: -100.0, max: 100.0, step: 1.0 }, settings.brightness));

    let (w, h) = area_extent(config, settings);
    let (unit, step) = match config.geometry_unit {
        GeometryUnit::Mm => (Unit::Mm, 0.0),
        GeometryUnit::Pixel => (Unit::Pixel, 1.0),
    };
    let x_range = Constraint::Range { min: 0.0, max: w, step };
    let y_range = Constraint::Range { min: 0.0, max: h, step };
    set.insert(numeric(OPTION_TL_X, unit, x_range.clone(), settings.tl_x));
    set.insert(numeric(OPTION_TL_Y, unit, y_range.clone(), settings.tl_y));
    set.insert(numeric(OPTION_BR_X, unit, x_range, settings.br_x));
    set.insert(numeric(OPTION_BR_Y, unit, y_range, settings.br_y));
    set
}

fn compute_parameters(config: &SimulatedDeviceConfig, settings: &Settings) -> ScanParameters {
    let format = if settings.mode.contains("Color") {
        FrameFormat::Rgb
    } else {
        FrameFormat::Gray
    };
    let depth = if settings.mode == "Lineart" { 1 } else { settings.depth as u32 };
    let to_px = |v: f64, res: f64| match config.geometry_unit {
        GeometryUnit::Mm => (v / MM_PER_INCH * res).round(),
        GeometryUnit::Pixel => v,
    };
    let width = (to_px(settings.br_x, settings.x_resolution) - to_px(settings.tl_x, settings.x_resolution)).max(0.0);
    let height = (to_px(settings.br_y, settings.y_resolution) - to_px(settings.tl_y, settings.y_resolution)).max(0.0);
    ScanParameters::for_frame(format, width as u32, height as u32, depth)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> SimulatedDeviceConfig {
        SimulatedDeviceConfig {
            name: "sim:test:1".into(),
            adf_pages: 2,
            ..SimulatedDeviceConfig::default()
        }
    }

    fn backend() -> SimulatedBackend {
        SimulatedBackend::new(vec![test_config()])
    }

    #[test]
    fn enumerate_skips_network_devices_when_local_only() {
        let mut net = test_config();
        net.name = "net:remote:1".into();
        net.network = true;
        let backend = SimulatedBackend::new(vec![test_config(), net]);
        assert_eq!(backend.enumerate(true).expect("enumerate").len(), 1);
        assert_eq!(backend.enumerate(false).expect("enumerate").len(), 2);
    }

    #[test]
    fn second_open_reports_busy_until_first_closes() {
        let backend = backend();
        let first = backend.open("sim:test:1").expect("first open");
        assert!(matches!(backend.open("sim:test:1"), Err(DeviceStatus::DeviceBusy)));
        drop(first);
        assert!(backend.open("sim:test:1").is_ok());
    }

    #[test]
    fn unknown_device_is_invalid() {
        assert!(matches!(backend().open("sim:none"), Err(DeviceStatus::Inval)));
    }

    #[test]
    fn flatbed_page_reads_all_lines_then_eof() {
        let backend = backend();
        let mut session = backend.open("sim:test:1").expect("open");
        assert!(session.set_option(OPTION_RESOLUTION, &OptionValue::Numeric(75.0)).is_good());
        assert!(session.set_option(OPTION_BR_X, &OptionValue::Numeric(25.4)).is_good());
        assert!(session.set_option(OPTION_BR_Y, &OptionValue::Numeric(25.4)).is_good());
        assert!(session.start().is_good());

        let params = session.parameters();
        assert_eq!(params.pixels_per_line, 75);
        assert_eq!(params.lines, 75);
        let mut line = vec![0u8; params.bytes_per_line];
        let mut lines = 0;
        while session.read(&mut line).is_good() {
            lines += 1;
        }
        assert_eq!(lines, 75);
        assert_eq!(session.read(&mut line), DeviceStatus::Inval);
    }

    #[test]
    fn feeder_runs_out_of_documents() {
        let backend = backend();
        let device = backend.device("sim:test:1").expect("device");
        let mut session = backend.open("sim:test:1").expect("open");
        assert!(session.set_option(OPTION_SOURCE, &OptionValue::Text("ADF".into())).is_good());
        assert!(session.start().is_good());
        assert!(session.start().is_good());
        assert_eq!(session.start(), DeviceStatus::NoDocs);
        assert_eq!(device.pages_loaded(), 0);
    }

    #[test]
    fn source_change_reloads_geometry_limits() {
        let backend = backend();
        let mut session = backend.open("sim:test:1").expect("open");
        let flatbed_max = session.options().get(OPTION_BR_Y).expect("br-y").max();
        assert!(session.set_option(OPTION_SOURCE, &OptionValue::Text("ADF".into())).is_good());
        let adf_max = session.options().get(OPTION_BR_Y).expect("br-y").max();
        assert_eq!(flatbed_max, 297.0);
        assert_eq!(adf_max, 355.6);
    }

    #[test]
    fn pixel_geometry_follows_resolution() {
        let mut config = test_config();
        config.geometry_unit = GeometryUnit::Pixel;
        let backend = SimulatedBackend::new(vec![config]);
        let mut session = backend.open("sim:test:1").expect("open");
        assert!(session.set_option(OPTION_RESOLUTION, &OptionValue::Numeric(150.0)).is_good());
        assert_eq!(session.options().unit(OPTION_TL_X), Unit::Pixel);
        assert_eq!(session.options().get(OPTION_BR_X).expect("br-x").max(), 1275.0);
    }

    #[test]
    fn cancel_handle_interrupts_reads() {
        let backend = backend();
        let mut session = backend.open("sim:test:1").expect("open");
        assert!(session.start().is_good());
        let handle = session.cancel_handle();
        let mut line = vec![0u8; session.parameters().bytes_per_line];
        assert!(session.read(&mut line).is_good());
        handle.cancel();
        assert_eq!(session.read(&mut line), DeviceStatus::Cancelled);
    }

    #[test]
    fn drop_cancels_and_releases_device() {
        let backend = backend();
        let device = backend.device("sim:test:1").expect("device");
        {
            let _session = backend.open("sim:test:1").expect("open");
            assert!(device.is_open());
        }
        assert!(!device.is_open());
        assert_eq!(device.counters().cancels, 1);
    }

    #[test]
    fn scripted_faults_are_reported_in_order() {
        let backend = backend();
        let device = backend.device("sim:test:1").expect("device");
        device.script_start([DeviceStatus::Jammed]);
        device.fail_next_open(DeviceStatus::AccessDenied);
        assert!(matches!(backend.open("sim:test:1"), Err(DeviceStatus::AccessDenied)));
        let mut session = backend.open("sim:test:1").expect("open");
        assert_eq!(session.start(), DeviceStatus::Jammed);
        assert!(session.start().is_good());
    }

    #[test]
    fn unknown_option_write_is_invalid() {
        let backend = backend();
        let mut session = backend.open("sim:test:1").expect("open");
        assert_eq!(session.set_option("x-resolution", &OptionValue::Numeric(300.0)), DeviceStatus::Inval);
        assert_eq!(session.set_option(OPTION_MODE, &OptionValue::Text("Infrared".into())), DeviceStatus::Inval);
    }
}
