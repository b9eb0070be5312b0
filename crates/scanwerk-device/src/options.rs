// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device option map.
//
// Drivers describe their settings as named options, each with a unit, a
// constraint (range or list), and a current value.  The map is a snapshot;
// sessions rebuild it whenever a write changes dependent options.

use std::collections::BTreeMap;

/// Scan source (e.g. "Flatbed", "ADF").
pub const OPTION_SOURCE: &str = "source";
/// Scan mode (e.g. "Gray", "Color").
pub const OPTION_MODE: &str = "mode";
/// Bits per sample.
pub const OPTION_BIT_DEPTH: &str = "depth";
/// Combined X/Y resolution.
pub const OPTION_RESOLUTION: &str = "resolution";
pub const OPTION_X_RESOLUTION: &str = "x-resolution";
pub const OPTION_Y_RESOLUTION: &str = "y-resolution";
/// Scan area corners.
pub const OPTION_TL_X: &str = "tl-x";
pub const OPTION_TL_Y: &str = "tl-y";
pub const OPTION_BR_X: &str = "br-x";
pub const OPTION_BR_Y: &str = "br-y";

/// Physical unit of an option value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    None,
    Pixel,
    Bit,
    Mm,
    Dpi,
    Percent,
}

/// Value of a device option.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Numeric(f64),
    Text(String),
}

impl OptionValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Numeric(v) => Some(*v),
            Self::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Numeric(_) => None,
            Self::Text(s) => Some(s),
        }
    }
}

impl std::fmt::Display for OptionValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Numeric(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Permitted values of an option.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    None,
    Range { min: f64, max: f64, step: f64 },
    NumericList(Vec<f64>),
    StringList(Vec<String>),
}

/// One named device option.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceOption {
    pub name: String,
    pub unit: Unit,
    pub constraint: Constraint,
    pub value: OptionValue,
    pub settable: bool,
}

impl DeviceOption {
    pub fn is_numeric(&self) -> bool {
        matches!(self.value, OptionValue::Numeric(_))
    }

    pub fn numeric_value(&self) -> Option<f64> {
        self.value.as_f64()
    }

    pub fn string_value(&self) -> Option<&str> {
        self.value.as_str()
    }

    /// Lower bound, or the smallest list entry.
    pub fn min(&self) -> f64 {
        match &self.constraint {
            Constraint::Range { min, .. } => *min,
            Constraint::NumericList(values) => values.iter().copied().fold(f64::INFINITY, f64::min),
            _ => self.numeric_value().unwrap_or(0.0),
        }
    }

    /// Upper bound, or the largest list entry.
    pub fn max(&self) -> f64 {
        match &self.constraint {
            Constraint::Range { max, .. } => *max,
            Constraint::NumericList(values) => {
                values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
            }
            _ => self.numeric_value().unwrap_or(0.0),
        }
    }

    /// Quantization step; 0 when unconstrained.
    pub fn step(&self) -> f64 {
        match &self.constraint {
            Constraint::Range { step, .. } => *step,
            _ => 0.0,
        }
    }

    pub fn allowed_numeric_values(&self) -> Vec<f64> {
        match &self.constraint {
            Constraint::NumericList(values) => values.clone(),
            _ => Vec::new(),
        }
    }

    pub fn allowed_string_values(&self) -> Vec<String> {
        match &self.constraint {
            Constraint::StringList(values) => values.clone(),
            _ => Vec::new(),
        }
    }

    /// Fit `value` into the constraint the way drivers do: ranges clamp and
    /// quantize, numeric lists pick the nearest entry, string lists require
    /// a case-insensitive match.  `None` means the value is rejected.
    pub fn constrain(&self, value: &OptionValue) -> Option<OptionValue> {
        if !self.settable {
            return None;
        }
        match (&self.constraint, value) {
            (Constraint::Range { min, max, step }, OptionValue::Numeric(v)) => {
                let mut v = v.clamp(*min, *max);
                if *step > 0.0 {
                    v = min + ((v - min) / step).round() * step;
                    if v > *max {
                        v -= step;
                    }
                }
                Some(OptionValue::Numeric(v))
            }
            (Constraint::NumericList(values), OptionValue::Numeric(v)) => values
                .iter()
                .copied()
                .min_by(|a, b| (a - v).abs().total_cmp(&(b - v).abs()))
                .map(OptionValue::Numeric),
            (Constraint::StringList(values), OptionValue::Text(s)) => values
                .iter()
                .find(|candidate| candidate.eq_ignore_ascii_case(s))
                .map(|found| OptionValue::Text(found.clone())),
            (Constraint::None, OptionValue::Numeric(_)) if self.is_numeric() => Some(value.clone()),
            (Constraint::None, OptionValue::Text(_)) if !self.is_numeric() => Some(value.clone()),
            _ => None,
        }
    }

    /// Interpret a textual value (as found in options files) in this option's type.
    pub fn parse_value(&self, raw: &str) -> Option<OptionValue> {
        if self.is_numeric() {
            match raw.to_ascii_lowercase().as_str() {
                "yes" | "true" | "on" => Some(OptionValue::Numeric(1.0)),
                "no" | "false" | "off" => Some(OptionValue::Numeric(0.0)),
                other => other.parse::<f64>().ok().map(OptionValue::Numeric),
            }
        } else {
            Some(OptionValue::Text(raw.to_string()))
        }
    }
}

/// Snapshot of all options a session exposes, keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionSet {
    options: BTreeMap<String, DeviceOption>,
}

impl OptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, option: DeviceOption) {
        self.options.insert(option.name.clone(), option);
    }

    pub fn get(&self, name: &str) -> Option<&DeviceOption> {
        self.options.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut DeviceOption> {
        self.options.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.options.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceOption> {
        self.options.values()
    }

    /// Unit of an option, `Unit::None` when it does not exist.
    pub fn unit(&self, name: &str) -> Unit {
        self.get(name).map(|o| o.unit).unwrap_or(Unit::None)
    }
}
