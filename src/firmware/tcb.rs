// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// TcbVersion represents the version of the firmware.
///
/// Pre-Turin platforms lay the eight raw bytes out as
/// `[bootloader, tee, 0, 0, 0, 0, snp, microcode]`; Turin adds an FMC
/// byte and uses `[fmc, bootloader, tee, snp, 0, 0, 0, microcode]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TcbVersion {
    /// SVN of the FMC firmware (Turin and later).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fmc: Option<u8>,
    /// SVN of PSP bootloader.
    pub bootloader: u8,
    /// SVN of PSP operating system.
    pub tee: u8,
    /// Security Version Number (SVN) of SNP firmware.
    pub snp: u8,
    /// Lowest current patch level of all the cores.
    pub microcode: u8,
}

impl Display for TcbVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            r#"
TCB Version:
  Microcode:   {}
  SNP:         {}
  TEE:         {}
  Boot Loader: {}
  FMC:         {}
  "#,
            self.microcode,
            self.snp,
            self.tee,
            self.bootloader,
            self.fmc.map_or("None".to_string(), |fmc| fmc.to_string())
        )
    }
}

impl TcbVersion {
    /// Creates a new instance of a pre-Turin TcbVersion.
    pub fn new(bootloader: u8, tee: u8, snp: u8, microcode: u8) -> Self {
        Self {
            fmc: None,
            bootloader,
            tee,
            snp,
            microcode,
        }
    }

    /// Creates a new instance of a Turin TcbVersion.
    pub fn new_turin(fmc: u8, bootloader: u8, tee: u8, snp: u8, microcode: u8) -> Self {
        Self {
            fmc: Some(fmc),
            ..Self::new(bootloader, tee, snp, microcode)
        }
    }

    /// Decodes the pre-Turin raw layout.
    pub fn from_legacy_bytes(bytes: &[u8; 8]) -> Self {
        Self::new(bytes[0], bytes[1], bytes[6], bytes[7])
    }

    /// Decodes the Turin raw layout.
    pub fn from_turin_bytes(bytes: &[u8; 8]) -> Self {
        Self::new_turin(bytes[0], bytes[1], bytes[2], bytes[3], bytes[7])
    }

    /// Encodes the pre-Turin raw layout.
    pub fn to_legacy_bytes(&self) -> [u8; 8] {
        [
            self.bootloader,
            self.tee,
            0,
            0,
            0,
            0,
            self.snp,
            self.microcode,
        ]
    }

    /// Encodes the Turin raw layout.
    pub fn to_turin_bytes(&self) -> [u8; 8] {
        [
            self.fmc.unwrap_or(0),
            self.bootloader,
            self.tee,
            self.snp,
            0,
            0,
            0,
            self.microcode,
        ]
    }

    /// Whether every component is at least the corresponding component of
    /// `minimum`. FMC is only compared when both sides carry one.
    pub fn meets(&self, minimum: &TcbVersion) -> bool {
        let fmc_ok = match (self.fmc, minimum.fmc) {
            (Some(fmc), Some(min)) => fmc >= min,
            _ => true,
        };

        fmc_ok
            && self.bootloader >= minimum.bootloader
            && self.tee >= minimum.tee
            && self.snp >= minimum.snp
            && self.microcode >= minimum.microcode
    }

    /// One-line form used in log lines and reject reasons.
    pub fn compact(&self) -> String {
        let mut out = format!(
            "bl={} tee={} snp={} ucode={}",
            self.bootloader, self.tee, self.snp, self.microcode
        );
        if let Some(fmc) = self.fmc {
            out.push_str(&format!(" fmc={fmc}"));
        }
        out
    }
}
