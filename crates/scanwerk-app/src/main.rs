// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanwerk — eSCL scan server
//
// Entry point. Parses the command line, initialises logging, loads the
// configuration, and serves the enumerated scanners until the process is
// terminated, rebuilding the server on reset or hotplug.

mod server;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use scanwerk_core::{BackendKind, ServerConfig};
use scanwerk_core::error::Result;
use tracing_subscriber::EnvFilter;

/// Share local scanners with eSCL (AirScan) clients on the network.
#[derive(Parser, Debug)]
#[command(name = "scanwerk")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// TCP port for the HTTP server
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to listen on
    #[arg(short, long)]
    interface: Option<String>,

    /// Host name used in advertised URLs
    #[arg(long)]
    hostname: Option<String>,

    /// Device options file
    #[arg(long)]
    options_file: Option<PathBuf>,

    /// List of device name patterns not to serve
    #[arg(long)]
    ignore_list: Option<PathBuf>,

    /// Do not announce scanners via mDNS
    #[arg(long)]
    no_announce: bool,

    /// Also serve scanners the backend reports as network devices
    #[arg(long)]
    all_scanners: bool,

    /// Prefix scanner paths with a random component
    #[arg(long)]
    random_paths: bool,

    /// Serve the first scanner under /eSCL
    #[arg(long)]
    compatible_path: bool,

    /// Seconds after which idle jobs are removed
    #[arg(long)]
    job_timeout: Option<u64>,

    /// Device backend: auto, sane, or simulated
    #[arg(long)]
    backend: Option<BackendKind>,

    /// HTTP access log file, - for stdout
    #[arg(long)]
    access_log: Option<String>,

    /// Do not reload when devices are attached or removed
    #[arg(long)]
    no_hotplug: bool,

    /// Do not serve the HTML pages
    #[arg(long)]
    no_web_interface: bool,

    /// Allow a server reset from the web interface
    #[arg(long)]
    reset_option: bool,

    /// Do not show the server version on the web interface
    #[arg(long)]
    no_disclose_version: bool,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    print_config: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    /// Apply command-line overrides on top of a loaded configuration.
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(port) = self.port {
            config.listen_port = port;
        }
        if let Some(interface) = &self.interface {
            config.interface = interface.clone();
        }
        if let Some(hostname) = &self.hostname {
            config.hostname = Some(hostname.clone());
        }
        if let Some(path) = &self.options_file {
            config.options_file = path.clone();
        }
        if let Some(path) = &self.ignore_list {
            config.ignore_list = path.clone();
        }
        if self.no_announce {
            config.mdns_announce = false;
        }
        if self.all_scanners {
            config.local_scanners_only = false;
        }
        if self.random_paths {
            config.random_paths = true;
        }
        if self.compatible_path {
            config.compatible_path = true;
        }
        if let Some(secs) = self.job_timeout {
            config.job_idle_timeout_secs = secs;
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(target) = &self.access_log {
            config.access_log = Some(target.clone());
        }
        if self.no_hotplug {
            config.hotplug = false;
        }
        if self.no_web_interface {
            config.web_interface = false;
        }
        if self.reset_option {
            config.reset_option = true;
        }
        if self.no_disclose_version {
            config.disclose_version = false;
        }
    }

    fn effective_config(&self) -> Result<ServerConfig> {
        let mut config = ServerConfig::load_or_default(self.config.as_deref())?;
        self.apply(&mut config);
        Ok(config)
    }
}

fn init_tracing(debug: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" })),
        )
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.debug);

    let config = match args.effective_config() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    if args.print_config {
        return match serde_json::to_string_pretty(&config) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to serialise configuration");
                ExitCode::FAILURE
            }
        };
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Scanwerk starting");

    let backend = match scanwerk_device::device_backend(config.backend, &config.simulated_devices) {
        Ok(backend) => backend,
        Err(e) => {
            tracing::error!(error = %e, backend = %config.backend, "no device backend");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(backend = backend.backend_name(), "device backend ready");
    match server::serve(&config, backend) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "failed to start server");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn flags_override_defaults() {
        let args = Args::try_parse_from([
            "scanwerk",
            "--port",
            "9000",
            "--hostname",
            "desk",
            "--no-announce",
            "--all-scanners",
            "--compatible-path",
            "--job-timeout",
            "30",
        ])
        .expect("args");
        let config = args.effective_config().expect("config");
        assert_eq!(config.listen_port, 9000);
        assert_eq!(config.hostname.as_deref(), Some("desk"));
        assert!(!config.mdns_announce);
        assert!(!config.local_scanners_only);
        assert!(config.compatible_path);
        assert!(!config.random_paths);
        assert_eq!(config.job_idle_timeout_secs, 30);
        assert_eq!(config.interface, "0.0.0.0");
    }

    #[test]
    fn service_flags_override_defaults() {
        let args = Args::try_parse_from([
            "scanwerk",
            "--backend",
            "simulated",
            "--access-log",
            "-",
            "--no-hotplug",
            "--no-web-interface",
            "--reset-option",
            "--no-disclose-version",
        ])
        .expect("args");
        let config = args.effective_config().expect("config");
        assert_eq!(config.backend, BackendKind::Simulated);
        assert_eq!(config.access_log.as_deref(), Some("-"));
        assert!(!config.hotplug);
        assert!(!config.web_interface);
        assert!(config.reset_option);
        assert!(!config.disclose_version);

        let config = Args::try_parse_from(["scanwerk"]).expect("args").effective_config().expect("config");
        assert_eq!(config.backend, BackendKind::Auto);
        assert!(config.hotplug && config.web_interface && config.disclose_version);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(Args::try_parse_from(["scanwerk", "--backend", "twain"]).is_err());
    }

    #[test]
    fn flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(
            file,
            r#"{{"listen_port": 8100, "random_paths": true, "purge_interval_secs": 5}}"#
        )
        .expect("write");

        let path = file.path().to_str().expect("utf8 path");
        let args = Args::try_parse_from(["scanwerk", "--config", path]).expect("args");
        let config = args.effective_config().expect("config");
        assert_eq!(config.listen_port, 8100);
        assert!(config.random_paths);
        assert_eq!(config.purge_interval_secs, 5);

        let args = Args::try_parse_from(["scanwerk", "-c", path, "-p", "8200"]).expect("args");
        assert_eq!(args.effective_config().expect("config").listen_port, 8200);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("absent.json");
        let args = Args::try_parse_from(["scanwerk", "--config", missing.to_str().expect("utf8")])
            .expect("args");
        assert!(args.effective_config().is_err());
    }
}
