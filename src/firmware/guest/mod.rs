// SPDX-License-Identifier: Apache-2.0

//! # Report Reader
//!
//! Requests attestation reports from the platform. Every call goes to the
//! device: reports are never cached, since the caller-supplied report data
//! differs per request.

mod types;

pub use types::*;

use crate::error::*;

#[cfg(target_os = "linux")]
use crate::firmware::linux::guest::{ioctl::*, types::*};

use log::debug;
use std::sync::Arc;

#[cfg(target_os = "linux")]
use std::{fs::OpenOptions, path::PathBuf};

/// Length of the caller-supplied report data.
pub const REPORT_DATA_LEN: usize = 64;

/// A platform interface that produces raw attestation reports.
///
/// Implementations may block; the reader always calls them from a blocking
/// task.
pub trait ReportDevice: Send + Sync + 'static {
    /// Returns the raw report bytes binding `report_data`.
    fn get_report(&self, report_data: [u8; REPORT_DATA_LEN]) -> Result<Vec<u8>, DeviceError>;
}

/// A report exactly as produced by the hardware, plus its parsed view.
///
/// The raw bytes are kept so that signature checks always run over what the
/// firmware signed, never over a re-serialization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawReport {
    bytes: Vec<u8>,
    report: AttestationReport,
}

impl RawReport {
    /// Parses `bytes`, keeping them alongside the structured view.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ReportError> {
        let report = AttestationReport::from_bytes(&bytes)?;
        Ok(Self { bytes, report })
    }

    /// The raw report.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The range covered by the report signature.
    pub fn signed_bytes(&self) -> &[u8] {
        &self.bytes[..SIGNED_LEN]
    }

    /// The parsed fields.
    pub fn report(&self) -> &AttestationReport {
        &self.report
    }

    /// Gives up the raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl TryFrom<&[u8]> for RawReport {
    type Error = ReportError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Self::from_bytes(bytes.to_vec())
    }
}

/// Reads fresh reports from a [`ReportDevice`].
#[derive(Clone)]
pub struct ReportReader {
    device: Arc<dyn ReportDevice>,
}

impl ReportReader {
    /// Creates a reader over `device`.
    pub fn new(device: Arc<dyn ReportDevice>) -> Self {
        Self { device }
    }

    /// Requests a report binding `report_data`.
    ///
    /// `report_data` must be exactly 64 bytes; anything else fails with
    /// [`EvidenceError::InvalidInput`] before the device is touched.
    pub async fn get_report(&self, report_data: &[u8]) -> Result<RawReport, EvidenceError> {
        let data: [u8; REPORT_DATA_LEN] = report_data.try_into().map_err(|_| {
            EvidenceError::InvalidInput(format!(
                "report_data must be {REPORT_DATA_LEN} bytes, got {}",
                report_data.len()
            ))
        })?;

        let device = Arc::clone(&self.device);
        let bytes = tokio::task::spawn_blocking(move || device.get_report(data))
            .await
            .map_err(|e| DeviceError::Interrupted(e.to_string()))??;

        if bytes.len() != REPORT_SIZE {
            return Err(DeviceError::InvalidResponseLength(bytes.len()).into());
        }

        let raw = RawReport::from_bytes(bytes)?;
        debug!(
            "read attestation report v{} (vmpl {}, reported tcb {})",
            raw.report().version,
            raw.report().vmpl,
            raw.report().reported_tcb.compact()
        );

        Ok(raw)
    }
}

/// Translates the `fw_err` halves of a failed guest request.
#[cfg(target_os = "linux")]
fn map_fw_err((vmm, firmware): (u32, u32), io: std::io::Error) -> DeviceError {
    if vmm != 0 {
        return VmmError::from(vmm).into();
    }

    if firmware != 0 {
        return DeviceError::Firmware(firmware);
    }

    io.into()
}

/// The SEV-SNP guest device, `/dev/sev-guest` by default.
#[cfg(target_os = "linux")]
#[derive(Clone, Debug)]
pub struct SevGuestDevice {
    path: PathBuf,
    vmpl: u32,
}

#[cfg(target_os = "linux")]
impl SevGuestDevice {
    /// A device at `path` requesting reports at `vmpl`.
    pub fn new(path: impl Into<PathBuf>, vmpl: u32) -> Self {
        Self {
            path: path.into(),
            vmpl,
        }
    }
}

#[cfg(target_os = "linux")]
impl ReportDevice for SevGuestDevice {
    fn get_report(&self, report_data: [u8; REPORT_DATA_LEN]) -> Result<Vec<u8>, DeviceError> {
        let mut file = OpenOptions::new().read(true).open(&self.path)?;

        let mut input = ReportReq::new(report_data, self.vmpl);
        let mut response = ReportRsp::default();

        {
            let mut request = GuestRequest::new(&mut input, &mut response);

            if let Err(io) = SNP_GET_REPORT.ioctl(&mut file, &mut request) {
                return Err(map_fw_err(request.split_fw_err(), io));
            }
        }

        if response.status != 0 {
            return Err(DeviceError::Firmware(response.status));
        }

        Ok(response.report_bytes().to_vec())
    }
}
