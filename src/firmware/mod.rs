// SPDX-License-Identifier: Apache-2.0

//! Platform-facing types: the attestation report, its TCB versions and the
//! guest device that produces it.

pub mod guest;
mod tcb;

#[cfg(target_os = "linux")]
pub(crate) mod linux;

pub use tcb::TcbVersion;
