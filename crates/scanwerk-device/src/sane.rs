// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// SANE backend.
//
// Drives physical scanners through the libsane C API.  The library is
// initialised while an enumeration or a session is alive and shut down
// after the last one ends, so a later enumeration sees newly attached
// devices.  Option descriptors are copied into an `OptionSet` snapshot
// that is rebuilt whenever the driver asks for a reload.

use std::collections::HashMap;
use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::ptr;
use std::sync::{Arc, Mutex};

use scanwerk_core::error::{Result, ScanwerkError};
use tracing::{debug, info, warn};

use crate::options::{Constraint, DeviceOption, OptionSet, OptionValue, Unit};
use crate::status::{DeviceStatus, FrameFormat, ScanParameters};
use crate::traits::{CancelHandle, DeviceBackend, DeviceInfo, DeviceSession, SessionCanceller};

// ---------------------------------------------------------------------------
// C API
// ---------------------------------------------------------------------------

#[allow(dead_code)]
mod ffi {
    use std::ffi::{c_char, c_int, c_void};

    pub type SaneStatus = c_int;
    pub type SaneWord = c_int;
    pub type SaneHandle = *mut c_void;

    pub const STATUS_GOOD: SaneStatus = 0;
    pub const STATUS_UNSUPPORTED: SaneStatus = 1;
    pub const STATUS_CANCELLED: SaneStatus = 2;
    pub const STATUS_DEVICE_BUSY: SaneStatus = 3;
    pub const STATUS_INVAL: SaneStatus = 4;
    pub const STATUS_EOF: SaneStatus = 5;
    pub const STATUS_JAMMED: SaneStatus = 6;
    pub const STATUS_NO_DOCS: SaneStatus = 7;
    pub const STATUS_COVER_OPEN: SaneStatus = 8;
    pub const STATUS_IO_ERROR: SaneStatus = 9;
    pub const STATUS_NO_MEM: SaneStatus = 10;
    pub const STATUS_ACCESS_DENIED: SaneStatus = 11;

    pub const TYPE_BOOL: c_int = 0;
    pub const TYPE_INT: c_int = 1;
    pub const TYPE_FIXED: c_int = 2;
    pub const TYPE_STRING: c_int = 3;

    pub const UNIT_PIXEL: c_int = 1;
    pub const UNIT_BIT: c_int = 2;
    pub const UNIT_MM: c_int = 3;
    pub const UNIT_DPI: c_int = 4;
    pub const UNIT_PERCENT: c_int = 5;

    pub const CONSTRAINT_RANGE: c_int = 1;
    pub const CONSTRAINT_WORD_LIST: c_int = 2;
    pub const CONSTRAINT_STRING_LIST: c_int = 3;

    pub const CAP_SOFT_SELECT: c_int = 1;
    pub const CAP_INACTIVE: c_int = 32;

    pub const ACTION_GET_VALUE: c_int = 0;
    pub const ACTION_SET_VALUE: c_int = 1;

    pub const INFO_INEXACT: c_int = 1;
    pub const INFO_RELOAD_OPTIONS: c_int = 2;

    pub const FRAME_GRAY: c_int = 0;
    pub const FRAME_RGB: c_int = 1;

    /// Fractional bits of a `SANE_Fixed` word.
    pub const FIXED_SCALE: f64 = 65536.0;

    #[repr(C)]
    pub struct SaneDevice {
        pub name: *const c_char,
        pub vendor: *const c_char,
        pub model: *const c_char,
        pub kind: *const c_char,
    }

    #[repr(C)]
    pub struct SaneRange {
        pub min: SaneWord,
        pub max: SaneWord,
        pub quant: SaneWord,
    }

    #[repr(C)]
    pub union SaneConstraint {
        pub string_list: *const *const c_char,
        pub word_list: *const SaneWord,
        pub range: *const SaneRange,
    }

    #[repr(C)]
    pub struct SaneOptionDescriptor {
        pub name: *const c_char,
        pub title: *const c_char,
        pub desc: *const c_char,
        pub value_type: c_int,
        pub unit: c_int,
        pub size: c_int,
        pub cap: c_int,
        pub constraint_type: c_int,
        pub constraint: SaneConstraint,
    }

    #[repr(C)]
    #[derive(Debug, Default)]
    pub struct SaneParameters {
        pub format: c_int,
        pub last_frame: c_int,
        pub bytes_per_line: c_int,
        pub pixels_per_line: c_int,
        pub lines: c_int,
        pub depth: c_int,
    }

    #[link(name = "sane")]
    unsafe extern "C" {
        pub fn sane_init(version_code: *mut c_int, authorize: *const c_void) -> SaneStatus;
        pub fn sane_exit();
        pub fn sane_get_devices(device_list: *mut *const *const SaneDevice, local_only: c_int) -> SaneStatus;
        pub fn sane_open(name: *const c_char, handle: *mut SaneHandle) -> SaneStatus;
        pub fn sane_close(handle: SaneHandle);
        pub fn sane_get_option_descriptor(handle: SaneHandle, option: c_int) -> *const SaneOptionDescriptor;
        pub fn sane_control_option(
            handle: SaneHandle,
            option: c_int,
            action: c_int,
            value: *mut c_void,
            info: *mut c_int,
        ) -> SaneStatus;
        pub fn sane_get_parameters(handle: SaneHandle, params: *mut SaneParameters) -> SaneStatus;
        pub fn sane_start(handle: SaneHandle) -> SaneStatus;
        pub fn sane_read(handle: SaneHandle, data: *mut u8, max_length: c_int, length: *mut c_int) -> SaneStatus;
        pub fn sane_cancel(handle: SaneHandle);
    }
}

fn map_status(code: ffi::SaneStatus) -> DeviceStatus {
    match code {
        ffi::STATUS_GOOD => DeviceStatus::Good,
        ffi::STATUS_UNSUPPORTED => DeviceStatus::Unsupported,
        ffi::STATUS_CANCELLED => DeviceStatus::Cancelled,
        ffi::STATUS_DEVICE_BUSY => DeviceStatus::DeviceBusy,
        ffi::STATUS_INVAL => DeviceStatus::Inval,
        ffi::STATUS_EOF => DeviceStatus::Eof,
        ffi::STATUS_JAMMED => DeviceStatus::Jammed,
        ffi::STATUS_NO_DOCS => DeviceStatus::NoDocs,
        ffi::STATUS_COVER_OPEN => DeviceStatus::CoverOpen,
        ffi::STATUS_IO_ERROR => DeviceStatus::IoError,
        ffi::STATUS_NO_MEM => DeviceStatus::NoMem,
        ffi::STATUS_ACCESS_DENIED => DeviceStatus::AccessDenied,
        _ => DeviceStatus::IoError,
    }
}

fn map_unit(unit: c_int) -> Unit {
    match unit {
        ffi::UNIT_PIXEL => Unit::Pixel,
        ffi::UNIT_BIT => Unit::Bit,
        ffi::UNIT_MM => Unit::Mm,
        ffi::UNIT_DPI => Unit::Dpi,
        ffi::UNIT_PERCENT => Unit::Percent,
        _ => Unit::None,
    }
}

fn unfix(word: ffi::SaneWord, value_type: c_int) -> f64 {
    if value_type == ffi::TYPE_FIXED {
        word as f64 / ffi::FIXED_SCALE
    } else {
        word as f64
    }
}

fn fix(value: f64, value_type: c_int) -> ffi::SaneWord {
    if value_type == ffi::TYPE_FIXED {
        (value * ffi::FIXED_SCALE).round() as ffi::SaneWord
    } else {
        value.round() as ffi::SaneWord
    }
}

/// Copy a C string owned by the driver.
///
/// # Safety
/// `p` must be null or point to a NUL-terminated string.
unsafe fn owned_string(p: *const c_char) -> String {
    if p.is_null() {
        return String::new();
    }
    // SAFETY: non-null and NUL-terminated per the caller's contract.
    unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned()
}

/// Translate a descriptor's constraint.
///
/// # Safety
/// `desc` must come from the driver (or be laid out the same way): the
/// union member selected by `constraint_type` points to valid data.
unsafe fn decode_constraint(desc: &ffi::SaneOptionDescriptor) -> Constraint {
    match desc.constraint_type {
        ffi::CONSTRAINT_RANGE => {
            // SAFETY: `range` is the active member for range constraints.
            let range = unsafe { desc.constraint.range };
            if range.is_null() {
                return Constraint::None;
            }
            // SAFETY: checked non-null above.
            let range = unsafe { &*range };
            Constraint::Range {
                min: unfix(range.min, desc.value_type),
                max: unfix(range.max, desc.value_type),
                step: unfix(range.quant, desc.value_type),
            }
        }
        ffi::CONSTRAINT_WORD_LIST => {
            // SAFETY: `word_list` is the active member; element 0 holds the count.
            let list = unsafe { desc.constraint.word_list };
            if list.is_null() {
                return Constraint::None;
            }
            // SAFETY: the list holds `count` words after the count itself.
            let count = unsafe { *list }.max(0) as usize;
            let values = (1..=count)
                .map(|i| unfix(unsafe { *list.add(i) }, desc.value_type))
                .collect();
            Constraint::NumericList(values)
        }
        ffi::CONSTRAINT_STRING_LIST => {
            // SAFETY: `string_list` is the active member; the list is null-terminated.
            let list = unsafe { desc.constraint.string_list };
            let mut values = Vec::new();
            if !list.is_null() {
                let mut i = 0;
                loop {
                    // SAFETY: entries up to the terminator are valid.
                    let entry = unsafe { *list.add(i) };
                    if entry.is_null() {
                        break;
                    }
                    // SAFETY: non-null entries are NUL-terminated strings.
                    let value = unsafe { owned_string(entry) };
                    if value.is_empty() {
                        break;
                    }
                    values.push(value);
                    i += 1;
                }
            }
            Constraint::StringList(values)
        }
        _ => Constraint::None,
    }
}

// ---------------------------------------------------------------------------
// Library lifetime
// ---------------------------------------------------------------------------

static INIT_COUNT: Mutex<usize> = Mutex::new(0);

/// Keeps libsane initialised while alive.
struct SaneInit;

impl SaneInit {
    fn acquire() -> Self {
        let mut count = INIT_COUNT.lock().unwrap_or_else(|p| p.into_inner());
        if *count == 0 {
            let mut version: c_int = 0;
            // SAFETY: serialised by INIT_COUNT; no other SANE call runs
            // without a live guard.
            let status = map_status(unsafe { ffi::sane_init(&mut version, ptr::null()) });
            let (major, minor, build) = ((version >> 24) & 0xff, (version >> 16) & 0xff, version & 0xffff);
            debug!(version = %format!("{major}.{minor}.{build}"), %status, "SANE initialised");
        }
        *count += 1;
        Self
    }
}

impl Drop for SaneInit {
    fn drop(&mut self) {
        let mut count = INIT_COUNT.lock().unwrap_or_else(|p| p.into_inner());
        *count = count.saturating_sub(1);
        if *count == 0 {
            // SAFETY: the last guard is gone, so no handle is open.
            unsafe { ffi::sane_exit() };
            debug!("SANE shut down");
        }
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Backend for devices reachable through SANE.
#[derive(Debug, Default)]
pub struct SaneBackend;

impl SaneBackend {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceBackend for SaneBackend {
    fn backend_name(&self) -> &str {
        "sane"
    }

    fn enumerate(&self, local_only: bool) -> Result<Vec<DeviceInfo>> {
        let _init = SaneInit::acquire();
        let mut list: *const *const ffi::SaneDevice = ptr::null();
        // SAFETY: `list` is an out-pointer; the array stays valid until the
        // next enumeration or `sane_exit`, and is copied below.
        let status = map_status(unsafe { ffi::sane_get_devices(&mut list, c_int::from(local_only)) });
        if !status.is_good() {
            return Err(ScanwerkError::Device(format!("cannot list SANE devices: {status}")));
        }

        let mut devices = Vec::new();
        if !list.is_null() {
            let mut i = 0;
            loop {
                // SAFETY: the array is null-terminated.
                let entry = unsafe { *list.add(i) };
                if entry.is_null() {
                    break;
                }
                // SAFETY: non-null entries point to device records whose
                // strings are NUL-terminated.
                let device = unsafe { &*entry };
                devices.push(unsafe {
                    DeviceInfo {
                        name: owned_string(device.name),
                        vendor: owned_string(device.vendor),
                        model: owned_string(device.model),
                        kind: owned_string(device.kind),
                    }
                });
                i += 1;
            }
        }
        info!(count = devices.len(), local_only, "SANE devices enumerated");
        Ok(devices)
    }

    fn open(&self, device_name: &str) -> std::result::Result<Box<dyn DeviceSession>, DeviceStatus> {
        let init = SaneInit::acquire();
        let name = CString::new(device_name).map_err(|_| DeviceStatus::Inval)?;
        let mut handle: ffi::SaneHandle = ptr::null_mut();
        // SAFETY: `name` is NUL-terminated and `handle` is an out-pointer.
        let status = map_status(unsafe { ffi::sane_open(name.as_ptr(), &mut handle) });
        if !status.is_good() {
            debug!(device = device_name, %status, "sane_open failed");
            return Err(status);
        }
        if handle.is_null() {
            return Err(DeviceStatus::IoError);
        }
        let mut session = SaneSession {
            name: device_name.to_string(),
            device: Arc::new(OpenDevice { handle, _init: init }),
            options: OptionSet::new(),
            slots: HashMap::new(),
            parameters: ScanParameters::for_frame(FrameFormat::Gray, 0, 0, 8),
        };
        session.load_options();
        debug!(device = device_name, options = session.options.len(), "SANE session opened");
        Ok(Box::new(session))
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// An open device handle.  Closed when the last owner lets go, before
/// the library guard is released.
struct OpenDevice {
    handle: ffi::SaneHandle,
    _init: SaneInit,
}

// SAFETY: the handle is driven by one session at a time (sessions are not
// `Sync`); the only call made from other threads is `sane_cancel`, which
// SANE permits at any time.
unsafe impl Send for OpenDevice {}
unsafe impl Sync for OpenDevice {}

impl OpenDevice {
    fn cancel(&self) {
        // SAFETY: the handle is open for as long as `self` exists.
        unsafe { ffi::sane_cancel(self.handle) };
    }

    fn control(&self, index: c_int, action: c_int, value: *mut c_void, info: &mut c_int) -> DeviceStatus {
        // SAFETY: the handle is open; `value` points to a buffer of at
        // least the descriptor's size, as arranged by the callers.
        map_status(unsafe { ffi::sane_control_option(self.handle, index, action, value, info) })
    }
}

impl Drop for OpenDevice {
    fn drop(&mut self) {
        // SAFETY: closed exactly once, here.
        unsafe { ffi::sane_close(self.handle) };
    }
}

struct SaneCanceller(Arc<OpenDevice>);

impl SessionCanceller for SaneCanceller {
    fn cancel(&self) {
        self.0.cancel();
    }
}

/// Where an option lives in the driver's table and how its value is stored.
#[derive(Debug, Clone, Copy)]
struct OptionSlot {
    index: c_int,
    value_type: c_int,
    size: c_int,
}

impl OptionSlot {
    fn words(&self) -> usize {
        (self.size.max(0) as usize / std::mem::size_of::<ffi::SaneWord>()).max(1)
    }
}

/// Session on a SANE device.
pub struct SaneSession {
    name: String,
    device: Arc<OpenDevice>,
    options: OptionSet,
    slots: HashMap<String, OptionSlot>,
    parameters: ScanParameters,
}

impl SaneSession {
    /// Rebuild the option snapshot from the driver's descriptors.
    fn load_options(&mut self) {
        let mut options = OptionSet::new();
        let mut slots = HashMap::new();
        let mut index: c_int = 1;
        loop {
            // SAFETY: returns null past the last option; the descriptor
            // stays valid until the next option write.
            let desc = unsafe { ffi::sane_get_option_descriptor(self.device.handle, index) };
            if desc.is_null() {
                break;
            }
            // SAFETY: checked non-null above.
            let desc = unsafe { &*desc };
            // SAFETY: descriptor names are null or NUL-terminated.
            let name = unsafe { owned_string(desc.name) };
            let slot = OptionSlot {
                index,
                value_type: desc.value_type,
                size: desc.size,
            };
            index += 1;
            if name.is_empty() {
                continue;
            }
            let active = desc.cap & ffi::CAP_INACTIVE == 0;
            let value = if active { self.read_value(slot) } else { None };
            let Some(value) = value.or_else(|| placeholder(desc.value_type)) else {
                continue;
            };
            // SAFETY: the descriptor came from the driver.
            let constraint = unsafe { decode_constraint(desc) };
            options.insert(DeviceOption {
                name: name.clone(),
                unit: map_unit(desc.unit),
                constraint,
                value,
                settable: active && desc.cap & ffi::CAP_SOFT_SELECT != 0,
            });
            slots.insert(name, slot);
        }
        self.options = options;
        self.slots = slots;
    }

    /// Current value of a readable option; first element for arrays.
    fn read_value(&self, slot: OptionSlot) -> Option<OptionValue> {
        let mut info = 0;
        match slot.value_type {
            ffi::TYPE_BOOL | ffi::TYPE_INT | ffi::TYPE_FIXED => {
                let mut data = vec![0 as ffi::SaneWord; slot.words()];
                let status = self
                    .device
                    .control(slot.index, ffi::ACTION_GET_VALUE, data.as_mut_ptr().cast(), &mut info);
                status
                    .is_good()
                    .then(|| OptionValue::Numeric(unfix(data[0], slot.value_type)))
            }
            ffi::TYPE_STRING => {
                let mut data = vec![0u8; slot.size.max(1) as usize];
                let status = self
                    .device
                    .control(slot.index, ffi::ACTION_GET_VALUE, data.as_mut_ptr().cast(), &mut info);
                if !status.is_good() {
                    return None;
                }
                let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
                Some(OptionValue::Text(String::from_utf8_lossy(&data[..end]).into_owned()))
            }
            _ => None,
        }
    }
}

/// Value shown for options that cannot be read; buttons and groups have none.
fn placeholder(value_type: c_int) -> Option<OptionValue> {
    match value_type {
        ffi::TYPE_BOOL | ffi::TYPE_INT | ffi::TYPE_FIXED => Some(OptionValue::Numeric(0.0)),
        ffi::TYPE_STRING => Some(OptionValue::Text(String::new())),
        _ => None,
    }
}

impl DeviceSession for SaneSession {
    fn device_name(&self) -> &str {
        &self.name
    }

    fn options(&self) -> &OptionSet {
        &self.options
    }

    fn set_option(&mut self, name: &str, value: &OptionValue) -> DeviceStatus {
        let Some(slot) = self.slots.get(name).copied() else {
            return DeviceStatus::Inval;
        };
        if !self.options.get(name).is_some_and(|o| o.settable) {
            debug!(option = name, "option is not settable");
            return DeviceStatus::Inval;
        }

        let mut info: c_int = 0;
        let status = match (slot.value_type, value) {
            (ffi::TYPE_STRING, OptionValue::Text(text)) => {
                let Ok(text) = CString::new(text.as_str()) else {
                    return DeviceStatus::Inval;
                };
                let mut data = text.into_bytes_with_nul();
                let size = slot.size.max(0) as usize;
                if data.len() < size {
                    data.resize(size, 0);
                }
                self.device
                    .control(slot.index, ffi::ACTION_SET_VALUE, data.as_mut_ptr().cast(), &mut info)
            }
            (ffi::TYPE_BOOL | ffi::TYPE_INT | ffi::TYPE_FIXED, OptionValue::Numeric(v)) => {
                let mut data = vec![0 as ffi::SaneWord; slot.words()];
                if data.len() > 1 {
                    // Arrays: rewrite the first element only.
                    let status = self
                        .device
                        .control(slot.index, ffi::ACTION_GET_VALUE, data.as_mut_ptr().cast(), &mut info);
                    if !status.is_good() {
                        return status;
                    }
                }
                data[0] = fix(*v, slot.value_type);
                self.device
                    .control(slot.index, ffi::ACTION_SET_VALUE, data.as_mut_ptr().cast(), &mut info)
            }
            _ => DeviceStatus::Inval,
        };

        if !status.is_good() {
            debug!(option = name, %value, %status, "option write rejected");
        } else if info & (ffi::INFO_RELOAD_OPTIONS | ffi::INFO_INEXACT) != 0 {
            debug!(option = name, %value, "option map reloaded");
            self.load_options();
        } else if let Some(option) = self.options.get_mut(name) {
            option.value = value.clone();
        }
        status
    }

    fn start(&mut self) -> DeviceStatus {
        // SAFETY: the handle is open.
        let status = map_status(unsafe { ffi::sane_start(self.device.handle) });
        if !status.is_good() {
            debug!(device = %self.name, %status, "sane_start");
            return status;
        }
        let mut raw = ffi::SaneParameters::default();
        // SAFETY: `raw` is a valid out-parameter.
        let status = map_status(unsafe { ffi::sane_get_parameters(self.device.handle, &mut raw) });
        if !status.is_good() {
            return status;
        }
        let format = match raw.format {
            ffi::FRAME_GRAY => FrameFormat::Gray,
            ffi::FRAME_RGB => FrameFormat::Rgb,
            other => {
                warn!(device = %self.name, format = other, "three-pass frames are not supported");
                return DeviceStatus::Unsupported;
            }
        };
        self.parameters = ScanParameters {
            format,
            bytes_per_line: raw.bytes_per_line.max(0) as usize,
            pixels_per_line: raw.pixels_per_line.max(0) as u32,
            lines: raw.lines.max(0) as u32,
            depth: raw.depth.max(0) as u32,
        };
        DeviceStatus::Good
    }

    fn parameters(&self) -> ScanParameters {
        self.parameters
    }

    fn read(&mut self, buffer: &mut [u8]) -> DeviceStatus {
        let mut total = 0;
        while total < buffer.len() {
            let rest = &mut buffer[total..];
            let max = c_int::try_from(rest.len()).unwrap_or(c_int::MAX);
            let mut got: c_int = 0;
            // SAFETY: `rest` has room for `max` bytes.
            let status = map_status(unsafe { ffi::sane_read(self.device.handle, rest.as_mut_ptr(), max, &mut got) });
            total += got.max(0) as usize;
            if !status.is_good() {
                if status != DeviceStatus::Eof {
                    debug!(device = %self.name, %status, "sane_read");
                }
                return status;
            }
        }
        DeviceStatus::Good
    }

    fn cancel(&mut self) {
        self.device.cancel();
    }

    fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(Arc::new(SaneCanceller(Arc::clone(&self.device))))
    }
}

impl Drop for SaneSession {
    fn drop(&mut self) {
        self.cancel();
        debug!(device = %self.name, "SANE session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(value_type: c_int, constraint_type: c_int, constraint: ffi::SaneConstraint) -> ffi::SaneOptionDescriptor {
        ffi::SaneOptionDescriptor {
            name: ptr::null(),
            title: ptr::null(),
            desc: ptr::null(),
            value_type,
            unit: ffi::UNIT_MM,
            size: 4,
            cap: ffi::CAP_SOFT_SELECT,
            constraint_type,
            constraint,
        }
    }

    #[test]
    fn status_codes_map_one_to_one() {
        assert_eq!(map_status(ffi::STATUS_GOOD), DeviceStatus::Good);
        assert_eq!(map_status(ffi::STATUS_EOF), DeviceStatus::Eof);
        assert_eq!(map_status(ffi::STATUS_NO_DOCS), DeviceStatus::NoDocs);
        assert_eq!(map_status(ffi::STATUS_ACCESS_DENIED), DeviceStatus::AccessDenied);
        assert_eq!(map_status(99), DeviceStatus::IoError);
    }

    #[test]
    fn fixed_words_round_trip() {
        assert_eq!(fix(215.9, ffi::TYPE_FIXED), 14_149_222);
        assert!((unfix(14_149_222, ffi::TYPE_FIXED) - 215.9).abs() < 1e-4);
        assert_eq!(fix(299.6, ffi::TYPE_INT), 300);
        assert_eq!(unfix(300, ffi::TYPE_INT), 300.0);
    }

    #[test]
    fn range_constraint_is_unfixed() {
        let range = ffi::SaneRange {
            min: 0,
            max: fix(297.0, ffi::TYPE_FIXED),
            quant: 0,
        };
        let desc = descriptor(ffi::TYPE_FIXED, ffi::CONSTRAINT_RANGE, ffi::SaneConstraint { range: &range });
        let constraint = unsafe { decode_constraint(&desc) };
        assert_eq!(constraint, Constraint::Range { min: 0.0, max: 297.0, step: 0.0 });
    }

    #[test]
    fn word_list_skips_count() {
        let words: [ffi::SaneWord; 4] = [3, 75, 150, 300];
        let desc = descriptor(ffi::TYPE_INT, ffi::CONSTRAINT_WORD_LIST, ffi::SaneConstraint {
            word_list: words.as_ptr(),
        });
        let constraint = unsafe { decode_constraint(&desc) };
        assert_eq!(constraint, Constraint::NumericList(vec![75.0, 150.0, 300.0]));
    }

    #[test]
    fn string_list_stops_at_terminator() {
        let flatbed = CString::new("Flatbed").expect("cstring");
        let adf = CString::new("ADF").expect("cstring");
        let list = [flatbed.as_ptr(), adf.as_ptr(), ptr::null()];
        let desc = descriptor(ffi::TYPE_STRING, ffi::CONSTRAINT_STRING_LIST, ffi::SaneConstraint {
            string_list: list.as_ptr(),
        });
        let constraint = unsafe { decode_constraint(&desc) };
        assert_eq!(constraint, Constraint::StringList(vec!["Flatbed".into(), "ADF".into()]));
    }

    #[test]
    fn units_and_placeholders() {
        assert_eq!(map_unit(ffi::UNIT_MM), Unit::Mm);
        assert_eq!(map_unit(ffi::UNIT_PIXEL), Unit::Pixel);
        assert_eq!(map_unit(6), Unit::None);
        assert_eq!(placeholder(ffi::TYPE_STRING), Some(OptionValue::Text(String::new())));
        assert_eq!(placeholder(4), None);
    }
}
