// SPDX-License-Identifier: Apache-2.0

use crate::firmware::linux::guest::types::{ReportReq, ReportRsp};

use std::marker::PhantomData;

use iocuddle::{Group, Ioctl, WriteRead};

// Ordinals from include/uapi/linux/sev-guest.h
pub enum GuestIoctl {
    GetReport = 0x0,
}

const SEV: Group = Group::new(b'S');

/// Guest message version sent with every request.
pub const MESSAGE_VERSION: u32 = 1;

pub const SNP_GET_REPORT: Ioctl<WriteRead, &GuestRequest<ReportReq, ReportRsp>> =
    unsafe { SEV.write_read(GuestIoctl::GetReport as u8) };

/// The default structure used for making requests to the PSP as a guest owner.
#[repr(C)]
pub struct GuestRequest<'a, 'b, Req, Rsp> {
    /// Message version number (must be non-zero)
    pub message_version: u32,
    /// Request structure address.
    pub request_data: u64,
    /// Response structure address.
    pub response_data: u64,
    /// Upper 32 bits: VMM error. Lower 32 bits: firmware status.
    pub fw_err: u64,

    _phantom_req: PhantomData<&'a mut Req>,
    _phantom_rsp: PhantomData<&'b mut Rsp>,
}

impl<'a, 'b, Req, Rsp> GuestRequest<'a, 'b, Req, Rsp> {
    /// Creates a new request from the addresses provided.
    pub fn new(req: &'a mut Req, rsp: &'b mut Rsp) -> Self {
        Self {
            message_version: MESSAGE_VERSION,
            request_data: req as *mut Req as u64,
            response_data: rsp as *mut Rsp as u64,
            fw_err: Default::default(),
            _phantom_req: PhantomData,
            _phantom_rsp: PhantomData,
        }
    }

    /// Splits `fw_err` into its (VMM, firmware) halves.
    pub fn split_fw_err(&self) -> (u32, u32) {
        ((self.fw_err >> 32) as u32, self.fw_err as u32)
    }
}
