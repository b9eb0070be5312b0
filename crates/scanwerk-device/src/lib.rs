// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanwerk — Scanner device abstractions.
//
// Defines the session contract the scan server drives (options, start, read,
// cancel, status codes) and the backend that enumerates and opens devices.
// The SANE backend (feature `sane`) drives physical scanners; the simulated
// backend stands in for it on hosts without libsane and in tests.

pub mod options;
#[cfg(feature = "sane")]
pub mod sane;
pub mod simulated;
pub mod status;
pub mod traits;

use std::sync::Arc;

use scanwerk_core::error::Result;
use scanwerk_core::{BackendKind, SimulatedDeviceConfig};

pub use options::{Constraint, DeviceOption, OptionSet, OptionValue, Unit};
pub use simulated::{SimulatedBackend, SimulatedDevice};
pub use status::{DeviceStatus, FrameFormat, ScanParameters};
pub use traits::{CancelHandle, DeviceBackend, DeviceInfo, DeviceSession, SessionCanceller};

/// Build the device backend for this host.
///
/// `Auto` picks SANE when this build links it and the simulated devices
/// otherwise.  Asking for SANE from a build without it is a configuration
/// error.
///
/// RETURNS: a shared trait object, so scanners and their jobs can open
/// sessions from any thread.
pub fn device_backend(kind: BackendKind, devices: &[SimulatedDeviceConfig]) -> Result<Arc<dyn DeviceBackend>> {
    match kind {
        BackendKind::Simulated => Ok(Arc::new(SimulatedBackend::new(devices.to_vec()))),
        #[cfg(feature = "sane")]
        BackendKind::Auto | BackendKind::Sane => Ok(Arc::new(sane::SaneBackend::new())),
        #[cfg(not(feature = "sane"))]
        BackendKind::Auto => Ok(Arc::new(SimulatedBackend::new(devices.to_vec()))),
        #[cfg(not(feature = "sane"))]
        BackendKind::Sane => Err(scanwerk_core::ScanwerkError::Config(
            "this build has no SANE support; rebuild with the `sane` feature".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(not(feature = "sane"))]
    use scanwerk_core::ScanwerkError;

    #[test]
    fn simulated_backend_is_always_available() {
        let backend = device_backend(BackendKind::Simulated, &[]).expect("backend");
        assert_eq!(backend.backend_name(), "simulated");
    }

    #[cfg(not(feature = "sane"))]
    #[test]
    fn auto_falls_back_to_simulated_without_sane() {
        let backend = device_backend(BackendKind::Auto, &[]).expect("backend");
        assert_eq!(backend.backend_name(), "simulated");
    }

    #[cfg(not(feature = "sane"))]
    #[test]
    fn sane_without_the_feature_is_a_config_error() {
        let err = device_backend(BackendKind::Sane, &[]).err().expect("error");
        assert!(matches!(err, ScanwerkError::Config(_)));
    }

    #[cfg(feature = "sane")]
    #[test]
    fn auto_prefers_sane_when_linked() {
        let backend = device_backend(BackendKind::Auto, &[]).expect("backend");
        assert_eq!(backend.backend_name(), "sane");
    }
}
