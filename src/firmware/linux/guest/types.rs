// SPDX-License-Identifier: Apache-2.0

use crate::firmware::guest::REPORT_SIZE;

use static_assertions::const_assert;

/// Information provided by the guest owner for requesting an attestation
/// report from the AMD Secure Processor.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ReportReq {
    /// Guest-provided data to be included in the attestation report
    pub report_data: [u8; 64],

    /// The VMPL to put into the attestation report. Must be greater than or
    /// equal to the current VMPL and at most three.
    pub vmpl: u32,

    /// Reserved memory slot, must be zero.
    _reserved: [u8; 28],
}

impl Default for ReportReq {
    fn default() -> Self {
        Self::new([0; 64], 0)
    }
}

impl ReportReq {
    /// Instantiates a new request for the given report data and VMPL.
    pub fn new(report_data: [u8; 64], vmpl: u32) -> Self {
        Self {
            report_data,
            vmpl,
            _reserved: Default::default(),
        }
    }
}

/// The response from the PSP containing the generated attestation report,
/// padded to 4000 bytes so that it fills a page together with the message
/// header.
#[repr(C)]
pub struct ReportRsp {
    /// The status of the operation.
    ///     0h: Success.
    ///     16h: Invalid parameters.
    pub status: u32,
    /// Size in bytes of the report.
    pub report_size: u32,
    _reserved_0: [u8; 24],
    /// The attestation report generated by the firmware.
    pub report: [u8; REPORT_SIZE],
    _reserved_1: [u8; 2784],
}

const_assert!(std::mem::size_of::<ReportRsp>() == 4000);

impl Default for ReportRsp {
    fn default() -> Self {
        Self {
            status: Default::default(),
            report_size: Default::default(),
            _reserved_0: Default::default(),
            report: [0; REPORT_SIZE],
            _reserved_1: [0; 2784],
        }
    }
}

impl ReportRsp {
    /// The bytes of the report the firmware claims to have written.
    pub fn report_bytes(&self) -> &[u8] {
        let len = (self.report_size as usize).min(REPORT_SIZE);
        &self.report[..len]
    }
}
