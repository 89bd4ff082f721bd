// SPDX-License-Identifier: Apache-2.0

//! The `snp-evidence` crate produces and verifies attestation evidence for
//! [AMD SEV-SNP][SNP] guests.
//!
//! [SNP]: https://www.amd.com/content/dam/amd/en/documents/epyc-technical-docs/specifications/56860.pdf
//!
//! ## Evidence
//!
//! An [`EvidenceBundle`](service::EvidenceBundle) carries the raw
//! attestation report, the VCEK certificate chain that endorses the chip
//! that signed it, and the UVM endorsement for the guest measurement when
//! one is available. A bundle without an endorsement says so explicitly
//! through its `endorsement_missing` flag.
//!
//! ## Components
//!
//! - [`firmware::guest::ReportReader`] reads fresh reports from the guest
//!   device (`/dev/sev-guest` on Linux).
//! - [`kds::ChainCache`] resolves VCEK chains from the AMD Key
//!   Distribution Service, with single-flight deduplication, bounded
//!   retries and bounded eviction.
//! - [`verify::Verifier`] checks a report against its chain and the
//!   configured trust policy, reporting every failed check.
//! - [`endorsement::EndorsementProvider`] looks up UVM endorsements.
//! - [`service::EvidenceService`] ties them together behind
//!   `fetch_attestation` and `verify_bundle`.
//!
//! ## Remarks
//!
//! The crate installs no logger; it reports through the `log` facade.
//! Reading reports requires access to the guest device node, which usually
//! means running as root inside an SEV-SNP guest.

#![deny(clippy::all)]
#![deny(missing_docs)]
#![allow(unknown_lints)]
#![allow(clippy::identity_op)]
#![allow(clippy::unreadable_literal)]

/// SEV-SNP certificates interface.
pub mod certs;

pub mod config;
pub mod endorsement;
pub mod firmware;
pub mod kds;
pub mod service;
pub mod verify;

mod util;

/// Error module.
pub mod error;

pub use config::Config;
pub use error::{EvidenceError, RejectReason};
pub use service::{EvidenceBundle, EvidenceService};
pub use util::array::Array;
pub use verify::{VerificationResult, Verifier};

use serde::{Deserialize, Serialize};
use std::fmt::Display;

use firmware::guest::AttestationReport;

/// A representation for EPYC generational product lines.
///
/// The generation selects the KDS product path and how the chip id is
/// encoded in VCEK requests.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Generation {
    /// Third generation EPYC (SEV, SEV-ES, SEV-SNP).
    Milan,

    /// Fourth generation EPYC (SEV, SEV-ES, SEV-SNP).
    Genoa,

    /// Fifth generation EPYC (SEV, SEV-ES, SEV-SNP).
    Turin,
}

/// Type alias for the CPU family
pub type CpuFamily = u8;

/// Type alias for the CPU model
pub type CpuModel = u8;

impl TryFrom<(CpuFamily, CpuModel)> for Generation {
    type Error = std::io::Error;

    fn try_from(val: (CpuFamily, CpuModel)) -> Result<Self, Self::Error> {
        Self::identify_cpu(val.0, val.1)
    }
}

impl Generation {
    /// Identify the SEV generation based on the CPU family and model.
    pub fn identify_cpu(family: u8, model: u8) -> Result<Self, std::io::Error> {
        match family {
            0x19 => match model {
                0x0..=0xF => Ok(Self::Milan),
                0x10..=0x1F | 0xA0..=0xAF => Ok(Self::Genoa),
                _ => Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "processor is not of known SEV-SNP model.",
                )),
            },
            0x1A => match model {
                0x0..=0x11 => Ok(Self::Turin),
                _ => Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "processor is not of known SEV-SNP model.",
                )),
            },
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "processor is not of known SEV-SNP generation.",
            )),
        }
    }

    /// Identify the generation from the CPUID fields of a version 3+
    /// report. Version 2 reports carry no CPUID and yield `None`.
    pub fn from_report(report: &AttestationReport) -> Option<Self> {
        match (report.cpuid_fam_id, report.cpuid_mod_id) {
            (Some(family), Some(model)) => Self::identify_cpu(family, model).ok(),
            _ => None,
        }
    }

    /// Create a title-cased string identifying the SEV generation.
    pub fn titlecase(&self) -> String {
        match self {
            Self::Milan => "Milan".to_string(),
            Self::Genoa => "Genoa".to_string(),
            Self::Turin => "Turin".to_string(),
        }
    }
}

impl Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.titlecase())
    }
}

impl TryFrom<String> for Generation {
    type Error = String;

    fn try_from(val: String) -> Result<Self, Self::Error> {
        match &val.to_lowercase()[..] {
            "milan" => Ok(Self::Milan),
            "genoa" | "bergamo" | "siena" => Ok(Self::Genoa),
            "turin" => Ok(Self::Turin),
            _ => Err(format!("unknown SEV-SNP product: {val}")),
        }
    }
}

impl From<Generation> for String {
    fn from(generation: Generation) -> Self {
        generation.titlecase()
    }
}
