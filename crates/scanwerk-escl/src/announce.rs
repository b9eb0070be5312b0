// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// DNS-SD announcement of scanners as `_uscan._tcp` services.
//
// Announcement is best effort: a missing or failing mDNS responder is
// logged and the server keeps running without it.

use mdns_sd::{ServiceDaemon, ServiceInfo};
use tracing::{debug, info, warn};

use crate::documents::txt_color_space;
use crate::scanner::Scanner;

/// DNS-SD service type for eSCL over plain HTTP.
pub const USCAN_SERVICE_TYPE: &str = "_uscan._tcp.local.";

/// TXT record for one scanner, in announcement order.
pub fn txt_records(scanner: &Scanner, hostname: &str) -> Vec<(String, String)> {
    let caps = scanner.capabilities();

    let mut color_spaces: Vec<&str> = Vec::new();
    for cs in &caps.color_spaces {
        let keyword = txt_color_space(*cs);
        if !color_spaces.contains(&keyword) {
            color_spaces.push(keyword);
        }
    }
    let mut input_sources = Vec::new();
    if scanner.has_platen() {
        input_sources.push("platen");
    }
    if scanner.has_adf() {
        input_sources.push("adf");
    }

    let mut records = vec![
        ("txtvers".to_string(), "1".to_string()),
        ("vers".to_string(), "2.0".to_string()),
        ("pdl".to_string(), caps.document_formats.join(",")),
        ("ty".to_string(), scanner.make_and_model().to_string()),
        ("uuid".to_string(), scanner.uuid().to_string()),
        ("rs".to_string(), scanner.uri().trim_start_matches('/').to_string()),
        ("cs".to_string(), color_spaces.join(",")),
        ("is".to_string(), input_sources.join(",")),
        (
            "duplex".to_string(),
            if scanner.has_duplex_adf() { "T" } else { "F" }.to_string(),
        ),
    ];
    if !scanner.admin_url().is_empty() {
        records.push(("adminurl".to_string(), scanner.admin_url().to_string()));
    }
    if !scanner.icon_url().is_empty() {
        records.push(("representation".to_string(), scanner.icon_url().to_string()));
    }
    let note = scanner
        .options()
        .note
        .clone()
        .unwrap_or_else(|| hostname.to_string());
    records.push(("note".to_string(), note));
    records
}

/// Owner of the mDNS responder and the services registered through it.
/// Dropping it withdraws every announcement.
pub struct Announcer {
    daemon: Option<ServiceDaemon>,
    hostname: String,
    registered: Vec<String>,
}

impl Announcer {
    pub fn new(hostname: impl Into<String>) -> Self {
        let daemon = match ServiceDaemon::new() {
            Ok(d) => Some(d),
            Err(e) => {
                warn!(error = %e, "failed to create mDNS daemon, scanners will not be announced");
                None
            }
        };
        Self {
            daemon,
            hostname: hostname.into(),
            registered: Vec::new(),
        }
    }

    /// Services currently registered.
    pub fn registered(&self) -> usize {
        self.registered.len()
    }

    /// Register `scanner` under its published name.  Returns whether the
    /// service was handed to the responder.
    pub fn announce(&mut self, scanner: &Scanner, port: u16) -> bool {
        let Some(daemon) = &self.daemon else {
            return false;
        };
        let _entered = scanner.span().enter();

        let records = txt_records(scanner, &self.hostname);
        let properties: Vec<(&str, &str)> = records
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let service_info = match ServiceInfo::new(
            USCAN_SERVICE_TYPE,
            scanner.published_name(),
            &format!("{}.local.", self.hostname),
            "",
            port,
            &properties[..],
        ) {
            Ok(info) => info.enable_addr_auto(),
            Err(e) => {
                warn!(error = %e, "failed to create mDNS ServiceInfo");
                return false;
            }
        };

        let fullname = service_info.get_fullname().to_owned();
        match daemon.register(service_info) {
            Ok(()) => {
                info!(
                    service_type = USCAN_SERVICE_TYPE,
                    name = %scanner.published_name(),
                    port,
                    "mDNS service registered"
                );
                self.registered.push(fullname);
                true
            }
            Err(e) => {
                warn!(error = %e, "failed to register mDNS service");
                false
            }
        }
    }

    /// Withdraw all services and stop the responder.
    pub fn shutdown(&mut self) {
        let Some(daemon) = self.daemon.take() else {
            return;
        };
        for fullname in self.registered.drain(..) {
            if let Err(e) = daemon.unregister(&fullname) {
                warn!(error = %e, name = %fullname, "failed to unregister mDNS service");
            } else {
                debug!(name = %fullname, "mDNS service unregistered");
            }
        }
        if let Err(e) = daemon.shutdown() {
            warn!(error = %e, "failed to shut down mDNS daemon");
        }
    }
}

impl Drop for Announcer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::tests::{scanner, scanner_with};
    use scanwerk_core::SimulatedDeviceConfig;

    fn value<'a>(records: &'a [(String, String)], key: &str) -> Option<&'a str> {
        records.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    #[test]
    fn txt_describes_scanner() {
        let mut scanner = scanner();
        scanner.set_uri("/eSCL");
        scanner.set_admin_url("http://host:8090/eSCL");
        let records = txt_records(&scanner, "host");

        assert_eq!(records[0], ("txtvers".to_string(), "1".to_string()));
        assert_eq!(value(&records, "vers"), Some("2.0"));
        assert_eq!(value(&records, "pdl"), Some("application/pdf,image/jpeg,image/png"));
        assert_eq!(value(&records, "ty"), Some("Scanwerk Virtual Scanner"));
        assert_eq!(value(&records, "uuid"), Some(scanner.uuid()));
        assert_eq!(value(&records, "rs"), Some("eSCL"));
        assert_eq!(value(&records, "cs"), Some("grayscale,color"));
        assert_eq!(value(&records, "is"), Some("platen,adf"));
        assert_eq!(value(&records, "duplex"), Some("F"));
        assert_eq!(value(&records, "adminurl"), Some("http://host:8090/eSCL"));
        assert_eq!(value(&records, "representation"), None);
        assert_eq!(value(&records, "note"), Some("host"));
    }

    #[test]
    fn txt_reflects_flatbed_only_duplex_and_icon() {
        let mut scanner = scanner_with(SimulatedDeviceConfig {
            adf: false,
            ..SimulatedDeviceConfig::default()
        });
        scanner.set_icon_url("http://host:8090/eSCL/ScannerIcon");
        let records = txt_records(&scanner, "host");
        assert_eq!(value(&records, "is"), Some("platen"));
        assert_eq!(value(&records, "duplex"), Some("F"));
        assert_eq!(value(&records, "representation"), Some("http://host:8090/eSCL/ScannerIcon"));

        let duplex = scanner_with(SimulatedDeviceConfig {
            duplex: true,
            ..SimulatedDeviceConfig::default()
        });
        assert_eq!(value(&txt_records(&duplex, "host"), "duplex"), Some("T"));
    }
}
