// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Server configuration.
//
// Loaded from an optional JSON file; every field has a default so a partial
// file (or none at all) yields a runnable server.  Command-line flags are
// applied on top by the binary.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, ScanwerkError};

/// Default HTTP listening port.
pub const DEFAULT_LISTEN_PORT: u16 = 8090;

/// Access log target meaning standard output.
pub const ACCESS_LOG_STDOUT: &str = "-";

/// Which device backend serves the scanners.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// SANE when the binary was built with it, the simulated backend otherwise.
    #[default]
    Auto,
    Sane,
    Simulated,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Sane => "sane",
            Self::Simulated => "simulated",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "sane" => Ok(Self::Sane),
            "simulated" => Ok(Self::Simulated),
            other => Err(format!("unknown backend '{other}' (expected auto, sane or simulated)")),
        }
    }
}

/// Persistent scan server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP port for the eSCL HTTP server.
    pub listen_port: u16,
    /// Address to bind; `0.0.0.0` listens on all interfaces.
    pub interface: String,
    /// Host name used in advertised URLs.  `None` resolves it at startup.
    pub hostname: Option<String>,
    /// Announce scanners as `_uscan._tcp` via mDNS.
    pub mdns_announce: bool,
    /// Device backend.
    pub backend: BackendKind,
    /// Re-enumerate devices periodically and reload when the set changes.
    pub hotplug: bool,
    /// Seconds between hotplug re-enumerations.
    pub hotplug_interval_secs: u64,
    /// HTTP access log in combined log format: a file to append to, `-`
    /// for standard output, `None` for no log.
    pub access_log: Option<String>,
    /// Serve the HTML status pages and advertise their URL.
    pub web_interface: bool,
    /// Offer `/reset`, which reloads the server, on the web interface.
    pub reset_option: bool,
    /// Show the server version on the web interface.
    pub disclose_version: bool,
    /// Skip devices the backend reports as network-attached.
    pub local_scanners_only: bool,
    /// Device options file (gamma, grayscale synthesis, icon, passthrough options).
    pub options_file: PathBuf,
    /// Regex list of device names that must not be served.
    pub ignore_list: PathBuf,
    /// Prefix scanner paths with a random UUID.
    pub random_paths: bool,
    /// Serve the first scanner under `/eSCL`.
    pub compatible_path: bool,
    /// Seconds between idle-job sweeps.
    pub purge_interval_secs: u64,
    /// Jobs idle for longer than this are removed.
    pub job_idle_timeout_secs: u64,
    /// Devices exposed by the simulated backend.
    pub simulated_devices: Vec<SimulatedDeviceConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_LISTEN_PORT,
            interface: "0.0.0.0".into(),
            hostname: None,
            mdns_announce: true,
            backend: BackendKind::Auto,
            hotplug: true,
            hotplug_interval_secs: 5,
            access_log: None,
            web_interface: true,
            reset_option: false,
            disclose_version: true,
            local_scanners_only: true,
            options_file: PathBuf::from("/etc/scanwerk/options.conf"),
            ignore_list: PathBuf::from("/etc/scanwerk/ignore.conf"),
            random_paths: false,
            compatible_path: false,
            purge_interval_secs: 60,
            job_idle_timeout_secs: 120,
            simulated_devices: vec![SimulatedDeviceConfig::default()],
        }
    }
}

impl ServerConfig {
    /// Read a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            ScanwerkError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&data)?;
        info!(path = %path.display(), devices = config.simulated_devices.len(), "configuration loaded");
        Ok(config)
    }

    /// Load `path` if given, otherwise fall back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => {
                debug!("no configuration file given, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Host name to advertise: the configured one, else the system's.
    pub fn resolved_hostname(&self) -> String {
        self.hostname
            .clone()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(system_hostname)
    }

    /// Write the configuration as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Host name from `HOSTNAME` or `/etc/hostname`, else `localhost`.
pub fn system_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Unit in which a simulated device expresses its scan area options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryUnit {
    Mm,
    Pixel,
}

/// Description of one device served by the simulated backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedDeviceConfig {
    /// Driver-level device name, e.g. `sim:libusb:001:004`.
    pub name: String,
    pub vendor: String,
    pub model: String,
    /// Reported as a network scanner (filtered when only local ones are served).
    pub network: bool,
    pub flatbed: bool,
    pub adf: bool,
    pub duplex: bool,
    /// Sheets loaded in the feeder when a session opens.
    pub adf_pages: u32,
    /// Scan-mode names the device offers.
    pub modes: Vec<String>,
    /// Discrete resolutions; empty means the range below applies.
    pub resolutions: Vec<u32>,
    pub min_resolution: u32,
    pub max_resolution: u32,
    pub resolution_step: u32,
    /// Highest bit depth per sample (8 or 16).
    pub max_depth: u32,
    pub geometry_unit: GeometryUnit,
    /// Flatbed scan area in millimetres.
    pub flatbed_width_mm: f64,
    pub flatbed_height_mm: f64,
    /// Longest sheet the feeder accepts, in millimetres.
    pub adf_height_mm: f64,
}

impl Default for SimulatedDeviceConfig {
    fn default() -> Self {
        Self {
            name: "sim:usb:001".into(),
            vendor: "Scanwerk".into(),
            model: "Virtual Scanner".into(),
            network: false,
            flatbed: true,
            adf: true,
            duplex: false,
            adf_pages: 3,
            modes: vec!["Lineart".into(), "Gray".into(), "Color".into()],
            resolutions: vec![75, 150, 300, 600],
            min_resolution: 75,
            max_resolution: 1200,
            resolution_step: 1,
            max_depth: 8,
            geometry_unit: GeometryUnit::Mm,
            flatbed_width_mm: 215.9,
            flatbed_height_mm: 297.0,
            adf_height_mm: 355.6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_port, 8090);
        assert!(config.mdns_announce);
        assert!(config.local_scanners_only);
        assert_eq!(config.job_idle_timeout_secs, 120);
        assert_eq!(config.simulated_devices.len(), 1);
        assert_eq!(config.backend, BackendKind::Auto);
        assert!(config.hotplug && config.web_interface && config.disclose_version);
        assert!(!config.reset_option);
        assert!(config.access_log.is_none());
    }

    #[test]
    fn backend_names_parse_and_serialize() {
        assert_eq!("SANE".parse::<BackendKind>(), Ok(BackendKind::Sane));
        assert_eq!("simulated".parse::<BackendKind>(), Ok(BackendKind::Simulated));
        assert!("twain".parse::<BackendKind>().is_err());

        let config: ServerConfig =
            serde_json::from_str(r#"{ "backend": "simulated", "access_log": "-" }"#).expect("parse");
        assert_eq!(config.backend, BackendKind::Simulated);
        assert_eq!(config.access_log.as_deref(), Some(ACCESS_LOG_STDOUT));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("scanwerk.json");
        std::fs::write(&path, r#"{ "listen_port": 9000, "random_paths": true }"#)
            .expect("write config");

        let config = ServerConfig::load(&path).expect("load config");
        assert_eq!(config.listen_port, 9000);
        assert!(config.random_paths);
        assert_eq!(config.purge_interval_secs, 60);
    }

    #[test]
    fn save_then_load_preserves_devices() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("scanwerk.json");
        let mut config = ServerConfig::default();
        config.simulated_devices[0].geometry_unit = GeometryUnit::Pixel;
        config.simulated_devices[0].adf_pages = 7;
        config.save(&path).expect("save");

        let loaded = ServerConfig::load(&path).expect("load");
        assert_eq!(loaded, config);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = ServerConfig::load(Path::new("/nonexistent/scanwerk.json"))
            .expect_err("missing file must fail");
        assert!(matches!(err, ScanwerkError::Config(_)));
    }

    #[test]
    fn malformed_file_is_a_serialization_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").expect("write");
        let err = ServerConfig::load(&path).expect_err("malformed file must fail");
        assert!(matches!(err, ScanwerkError::Serialization(_)));
    }

    #[test]
    fn configured_hostname_wins() {
        let config = ServerConfig {
            hostname: Some("scanhost".into()),
            ..ServerConfig::default()
        };
        assert_eq!(config.resolved_hostname(), "scanhost");
        let blank = ServerConfig {
            hostname: Some(String::new()),
            ..ServerConfig::default()
        };
        assert!(!blank.resolved_hostname().is_empty());
    }
}
