// SPDX-License-Identifier: Apache-2.0

use crate::{
    certs::snp::ecdsa::Signature,
    error::ReportError,
    firmware::TcbVersion,
    util::{
        array::Array,
        parser::{ByteParser, ReadExt, WriteExt},
    },
};

use bitfield::bitfield;
use serde::{Deserialize, Serialize};
use std::{fmt::Display, io::Write};

/// Size of the ATTESTATION_REPORT structure.
pub const REPORT_SIZE: usize = 0x4A0;

/// Bytes `[0, SIGNED_LEN)` are covered by the report signature.
pub const SIGNED_LEN: usize = 0x2A0;

const CHIP_ID_OFFSET: usize = 0x1A0;
const CPUID_FAM_OFFSET: usize = 0x188;

/// `sig_algo` value for ECDSA P-384 with SHA-384.
pub const SIG_ALGO_ECDSA_P384_SHA384: u32 = 1;

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord)]
/// A semver formatted version.
pub struct Version {
    /// Major Version
    pub major: u8,
    /// Minor Version
    pub minor: u8,
    /// Build Version
    pub build: u8,
}

impl Version {
    /// Create a new version.
    pub fn new(major: u8, minor: u8, build: u8) -> Self {
        Self {
            major,
            minor,
            build,
        }
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

impl ByteParser for Version {
    type Bytes = [u8; 3];

    #[inline(always)]
    fn from_bytes(bytes: Self::Bytes) -> Self {
        let [build, minor, major] = bytes;
        Self {
            major,
            minor,
            build,
        }
    }

    #[inline(always)]
    fn to_bytes(&self) -> Self::Bytes {
        [self.build, self.minor, self.major]
    }

    #[inline(always)]
    fn zeroed() -> Self {
        Default::default()
    }
}

/// Possible variants of the attestation report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportVariant {
    /// Version 2 with the pre-Turin TCB layout.
    V2,

    /// Version 2 produced by a Turin-like chip (only the first 8 chip id
    /// bytes are populated).
    V2Turin,

    /// Version 3 or later for pre-Turin CPUs.
    V3PreTurin,

    /// Version 3 or later for Turin+ CPUs.
    V3Turin,
}

impl ReportVariant {
    /// Determine the variant of the report from its raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ReportError> {
        if bytes.len() != REPORT_SIZE {
            return Err(ReportError::InvalidLength(bytes.len()));
        }

        let mut version_bytes = [0u8; 4];
        version_bytes.copy_from_slice(&bytes[0..4]);
        let version = u32::from_le_bytes(version_bytes);

        Ok(match version {
            0 | 1 => return Err(ReportError::UnsupportedVersion(version)),
            2 => {
                let chip_id = &bytes[CHIP_ID_OFFSET..CHIP_ID_OFFSET + 64];
                let populated = chip_id.iter().any(|b| *b != 0);
                if populated && chip_id[8..].iter().all(|b| *b == 0) {
                    Self::V2Turin
                } else {
                    Self::V2
                }
            }
            _ => {
                if bytes[CPUID_FAM_OFFSET] >= 0x1A {
                    Self::V3Turin
                } else {
                    Self::V3PreTurin
                }
            }
        })
    }

    /// Whether TCB fields use the Turin byte layout.
    pub fn is_turin(&self) -> bool {
        matches!(self, Self::V2Turin | Self::V3Turin)
    }

    /// Whether the CPUID family/model/stepping bytes are present.
    pub fn has_cpuid(&self) -> bool {
        matches!(self, Self::V3PreTurin | Self::V3Turin)
    }

    fn decode_tcb(&self, raw: [u8; 8]) -> TcbVersion {
        if self.is_turin() {
            TcbVersion::from_turin_bytes(&raw)
        } else {
            TcbVersion::from_legacy_bytes(&raw)
        }
    }

    fn encode_tcb(&self, tcb: &TcbVersion) -> [u8; 8] {
        if self.is_turin() {
            tcb.to_turin_bytes()
        } else {
            tcb.to_legacy_bytes()
        }
    }
}

/// The SEV-SNP attestation report.
#[repr(C)]
#[derive(Default, Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct AttestationReport {
    /// Version number of this attestation report.
    pub version: u32,
    /// The guest SVN.
    pub guest_svn: u32,
    /// The guest policy.
    pub policy: GuestPolicy,
    /// The family ID provided at launch.
    pub family_id: Array<16>,
    /// The image ID provided at launch.
    pub image_id: Array<16>,
    /// The request VMPL for the attestation report.
    pub vmpl: u32,
    /// The signature algorithm used to sign this report.
    pub sig_algo: u32,
    /// Current TCB.
    pub current_tcb: TcbVersion,
    /// Information about the platform.
    pub plat_info: PlatformInfo,
    /// Information related to signing keys in the report.
    pub key_info: KeyInfo,
    /// Guest-provided 512 Bits of Data
    pub report_data: Array<64>,
    /// The measurement calculated at launch.
    pub measurement: Array<48>,
    /// Data provided by the hypervisor at launch.
    pub host_data: Array<32>,
    /// SHA-384 digest of the ID public key that signed the ID block.
    pub id_key_digest: Array<48>,
    /// SHA-384 digest of the Author public key that certified the ID key.
    pub author_key_digest: Array<48>,
    /// Report ID of this guest.
    pub report_id: Array<32>,
    /// Report ID of this guest's migration agent (if applicable).
    pub report_id_ma: Array<32>,
    /// Reported TCB version used to derive the VCEK that signed this report.
    pub reported_tcb: TcbVersion,
    /// CPUID Family ID (Combined Extended Family ID and Family ID)
    pub cpuid_fam_id: Option<u8>,
    /// CPUID Model (Combined Extended Model and Model fields)
    pub cpuid_mod_id: Option<u8>,
    /// CPUID Stepping
    pub cpuid_step: Option<u8>,
    /// Identifier unique to the chip, zero if MASK_CHIP_ID is set.
    pub chip_id: Array<64>,
    /// CommittedTCB
    pub committed_tcb: TcbVersion,
    /// The build number of CurrentVersion
    pub current: Version,
    /// The build number of CommittedVersion
    pub committed: Version,
    /// The CurrentTcb at the time the guest was launched or imported.
    pub launch_tcb: TcbVersion,
    /// Signature of bytes 0 to 0x29F inclusive of this report.
    pub signature: Signature,
}

impl AttestationReport {
    /// Attempts to parse an AttestationReport structure from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ReportError> {
        let variant = ReportVariant::from_bytes(bytes)?;
        let stepper: &mut &[u8] = &mut &bytes[..];

        Ok(AttestationReport {
            version: stepper.parse_bytes::<_, 0>()?,
            guest_svn: stepper.parse_bytes::<_, 0>()?,
            policy: stepper.parse_bytes::<_, 0>()?,
            family_id: stepper.parse_bytes::<_, 0>()?,
            image_id: stepper.parse_bytes::<_, 0>()?,
            vmpl: stepper.parse_bytes::<_, 0>()?,
            sig_algo: stepper.parse_bytes::<_, 0>()?,
            current_tcb: variant.decode_tcb(stepper.parse_bytes::<_, 0>()?),
            plat_info: stepper.parse_bytes::<_, 0>()?,
            key_info: stepper.parse_bytes::<_, 0>()?,
            report_data: stepper.parse_bytes::<_, 4>()?,
            measurement: stepper.parse_bytes::<_, 0>()?,
            host_data: stepper.parse_bytes::<_, 0>()?,
            id_key_digest: stepper.parse_bytes::<_, 0>()?,
            author_key_digest: stepper.parse_bytes::<_, 0>()?,
            report_id: stepper.parse_bytes::<_, 0>()?,
            report_id_ma: stepper.parse_bytes::<_, 0>()?,
            reported_tcb: variant.decode_tcb(stepper.parse_bytes::<_, 0>()?),
            cpuid_fam_id: Self::parse_cpuid(stepper, variant)?,
            cpuid_mod_id: Self::parse_cpuid(stepper, variant)?,
            cpuid_step: Self::parse_cpuid(stepper, variant)?,
            chip_id: if variant.has_cpuid() {
                stepper.parse_bytes::<_, 21>()?
            } else {
                stepper.parse_bytes::<_, 24>()?
            },
            committed_tcb: variant.decode_tcb(stepper.parse_bytes::<_, 0>()?),
            current: stepper.parse_bytes::<_, 0>()?,
            committed: stepper.parse_bytes::<_, 1>()?,
            launch_tcb: variant.decode_tcb(stepper.parse_bytes::<_, 1>()?),
            signature: stepper.parse_bytes::<_, 168>()?,
        })
    }

    fn parse_cpuid(stepper: &mut &[u8], variant: ReportVariant) -> Result<Option<u8>, ReportError> {
        if variant.has_cpuid() {
            Ok(Some(stepper.parse_bytes::<_, 0>()?))
        } else {
            Ok(None)
        }
    }

    /// The layout this report is written with.
    pub fn variant(&self) -> ReportVariant {
        let turin_chip = !self.chip_id.is_zeroed() && self.chip_id[8..].iter().all(|b| *b == 0);
        match (self.version, self.cpuid_fam_id) {
            (2, _) if turin_chip => ReportVariant::V2Turin,
            (2, _) => ReportVariant::V2,
            (_, Some(family)) if family >= 0x1A => ReportVariant::V3Turin,
            _ => ReportVariant::V3PreTurin,
        }
    }

    /// Writes the Attestation Report back into the ASP binary format.
    /// Reserved ranges are written as zero.
    pub fn write_bytes(&self, mut handle: impl Write) -> Result<(), std::io::Error> {
        let variant = self.variant();

        handle.write_bytes::<_, 0>(self.version)?;
        handle.write_bytes::<_, 0>(self.guest_svn)?;
        handle.write_bytes::<_, 0>(self.policy)?;
        handle.write_bytes::<_, 0>(self.family_id)?;
        handle.write_bytes::<_, 0>(self.image_id)?;
        handle.write_bytes::<_, 0>(self.vmpl)?;
        handle.write_bytes::<_, 0>(self.sig_algo)?;
        handle.write_bytes::<_, 0>(variant.encode_tcb(&self.current_tcb))?;
        handle.write_bytes::<_, 0>(self.plat_info)?;
        handle.write_bytes::<_, 0>(self.key_info)?;
        handle.write_bytes::<_, 4>(self.report_data)?;
        handle.write_bytes::<_, 0>(self.measurement)?;
        handle.write_bytes::<_, 0>(self.host_data)?;
        handle.write_bytes::<_, 0>(self.id_key_digest)?;
        handle.write_bytes::<_, 0>(self.author_key_digest)?;
        handle.write_bytes::<_, 0>(self.report_id)?;
        handle.write_bytes::<_, 0>(self.report_id_ma)?;
        handle.write_bytes::<_, 0>(variant.encode_tcb(&self.reported_tcb))?;

        if variant.has_cpuid() {
            handle.write_bytes::<_, 0>(self.cpuid_fam_id.unwrap_or(0))?;
            handle.write_bytes::<_, 0>(self.cpuid_mod_id.unwrap_or(0))?;
            handle.write_bytes::<_, 0>(self.cpuid_step.unwrap_or(0))?;
            handle.write_bytes::<_, 21>(self.chip_id)?;
        } else {
            handle.write_bytes::<_, 24>(self.chip_id)?;
        }

        handle.write_bytes::<_, 0>(variant.encode_tcb(&self.committed_tcb))?;
        handle.write_bytes::<_, 0>(self.current)?;
        handle.write_bytes::<_, 1>(self.committed)?;
        handle.write_bytes::<_, 1>(variant.encode_tcb(&self.launch_tcb))?;
        handle.write_bytes::<_, 168>(self.signature)?;

        Ok(())
    }

    /// Serializes the report into a freshly allocated buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>, std::io::Error> {
        let mut raw = Vec::with_capacity(REPORT_SIZE);
        self.write_bytes(&mut raw)?;
        Ok(raw)
    }
}

impl Display for AttestationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            r#"Attestation Report:

Version:                      {}

Guest SVN:                    {}

{}

Family ID:{}

Image ID:{}

VMPL:                         {}

Signature Algorithm:          {}

Current TCB:
{}
{}

{}

Report Data:{}

Measurement:{}

Host Data:{}

ID Key Digest:{}

Author Key Digest:{}

Report ID:{}

Report ID Migration Agent:{}

Reported TCB:
{}
CPUID Family ID:              {}

CPUID Model ID:               {}

CPUID Stepping:               {}

Chip ID:{}

Committed TCB:
{}
Current Version:              {}

Committed Version:            {}

Launch TCB:
{}
{}"#,
            self.version,
            self.guest_svn,
            self.policy,
            self.family_id,
            self.image_id,
            self.vmpl,
            self.sig_algo,
            self.current_tcb,
            self.plat_info,
            self.key_info,
            self.report_data,
            self.measurement,
            self.host_data,
            self.id_key_digest,
            self.author_key_digest,
            self.report_id,
            self.report_id_ma,
            self.reported_tcb,
            self.cpuid_fam_id
                .map_or("None".to_string(), |fam| format!("{fam:#x}")),
            self.cpuid_mod_id
                .map_or("None".to_string(), |model| format!("{model:#x}")),
            self.cpuid_step
                .map_or("None".to_string(), |step| step.to_string()),
            self.chip_id,
            self.committed_tcb,
            self.current,
            self.committed,
            self.launch_tcb,
            self.signature
        )
    }
}

bitfield! {
    /// The guest policy the guest owner bound to the guest at launch.
    ///
    /// | Bit(s) | Name              | Description                                   |
    /// |--------|-------------------|-----------------------------------------------|
    /// | 7:0    | ABI_MINOR         | Minimum ABI minor version.                    |
    /// | 15:8   | ABI_MAJOR         | Minimum ABI major version.                    |
    /// | 16     | SMT               | Host SMT usage is allowed.                    |
    /// | 17     | -                 | Reserved. Must be one.                        |
    /// | 18     | MIGRATE_MA        | Association with a migration agent is allowed.|
    /// | 19     | DEBUG             | Debugging is allowed.                         |
    /// | 20     | SINGLE_SOCKET     | Guest can only be activated on one socket.    |
    /// | 63:21  | -                 | Not interpreted here.                         |
    #[repr(C)]
    #[derive(Default, Deserialize, Clone, Copy, Eq, PartialEq, Serialize)]
    pub struct GuestPolicy(u64);
    impl Debug;
    /// ABI_MINOR field: Indicates the minor API version.
    pub abi_minor, set_abi_minor: 7, 0;
    /// ABI_MAJOR field: Indicates the major API version.
    pub abi_major, set_abi_major: 15, 8;
    /// SMT_ALLOWED field: Indicates if SMT should be permitted.
    pub smt_allowed, set_smt_allowed: 16;
    /// MIGRATE_MA_ALLOWED field: Indicates if migration is permitted with
    /// the migration agent.
    pub migrate_ma_allowed, set_migrate_ma_allowed: 18;
    /// DEBUG_ALLOWED field: Indicates if debugging is permitted.
    pub debug_allowed, set_debug_allowed: 19;
    /// SINGLE_SOCKET_REQUIRED field: Indicates if a single socket is required.
    pub single_socket_required, set_single_socket_required: 20;
}

impl ByteParser for GuestPolicy {
    type Bytes = [u8; 8];

    fn from_bytes(bytes: Self::Bytes) -> Self {
        Self(u64::from_le_bytes(bytes))
    }

    fn to_bytes(&self) -> Self::Bytes {
        self.0.to_le_bytes()
    }

    fn zeroed() -> Self {
        Self(0)
    }
}

impl Display for GuestPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            r#"Guest Policy (0x{:x}):
  ABI Major:     {}
  ABI Minor:     {}
  SMT Allowed:   {}
  Migrate MA:    {}
  Debug Allowed: {}
  Single Socket: {}"#,
            self.0,
            self.abi_major(),
            self.abi_minor(),
            self.smt_allowed(),
            self.migrate_ma_allowed(),
            self.debug_allowed(),
            self.single_socket_required()
        )
    }
}

impl From<GuestPolicy> for u64 {
    fn from(value: GuestPolicy) -> Self {
        value.0
    }
}

impl From<u64> for GuestPolicy {
    fn from(value: u64) -> Self {
        GuestPolicy(value)
    }
}

bitfield! {
    /// Platform state at the time the report was generated.
    #[repr(C)]
    #[derive(Default, Deserialize, Clone, Copy, Serialize, PartialEq, Eq)]
    pub struct PlatformInfo(u64);
    impl Debug;
    /// Returns the bit state of SMT
    pub smt_enabled, _: 0;
    /// Returns the bit state of TSME.
    pub tsme_enabled, _: 1;
    /// Indicates that the platform is currently using ECC memory
    pub ecc_enabled, _: 2;
    /// Indicates that the RAPL feature is disabled
    pub rapl_disabled, _: 3;
    /// Indicates that ciphertext hiding is enabled
    pub ciphertext_hiding_enabled, _: 4;
    /// Alias detection completed since the last reset with no aliasing found.
    pub alias_check_complete, _: 5;
}

impl Display for PlatformInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            r#"Platform Info ({}):
  SMT Enabled:               {}
  TSME Enabled:              {}
  ECC Enabled:               {}
  RAPL Disabled:             {}
  Ciphertext Hiding Enabled: {}
  Alias Check Complete:      {}"#,
            self.0,
            self.smt_enabled(),
            self.tsme_enabled(),
            self.ecc_enabled(),
            self.rapl_disabled(),
            self.ciphertext_hiding_enabled(),
            self.alias_check_complete()
        )
    }
}

impl From<u64> for PlatformInfo {
    fn from(value: u64) -> Self {
        PlatformInfo(value)
    }
}

impl ByteParser for PlatformInfo {
    type Bytes = [u8; 8];

    fn from_bytes(bytes: Self::Bytes) -> Self {
        Self(u64::from_le_bytes(bytes))
    }

    fn to_bytes(&self) -> Self::Bytes {
        self.0.to_le_bytes()
    }

    fn zeroed() -> Self {
        Self(0)
    }
}

bitfield! {
    /// Which key signed the report.
    ///
    /// | Bit(s) | Name              | Description                                    |
    /// |--------|-------------------|------------------------------------------------|
    /// | 0      | AUTHOR_KEY_EN     | AUTHOR_KEY_DIGEST is populated.                |
    /// | 1      | MASK_CHIP_KEY     | The firmware wrote zeroes instead of signing.  |
    /// | 4:2    | SIGNING_KEY       | 0: VCEK, 1: VLEK, 7: none.                     |
    #[repr(C)]
    #[derive(Default, Deserialize, Clone, Copy, Eq, PartialEq, Serialize)]
    pub struct KeyInfo(u32);
    impl Debug;
    /// AUTHOR_KEY_EN field: Indicates that the digest of the author key is present in AUTHOR_KEY_DIGEST
    pub author_key_en, _: 0;
    /// MASK_CHIP_KEY field: The value of MaskChipKey
    pub mask_chip_key, _: 1;
    /// SIGNING_KEY field: Encodes the key used to sign this report.
    pub signing_key, _: 4, 2;
}

impl ByteParser for KeyInfo {
    type Bytes = [u8; 4];

    fn from_bytes(bytes: Self::Bytes) -> Self {
        Self(u32::from_le_bytes(bytes))
    }

    fn to_bytes(&self) -> Self::Bytes {
        self.0.to_le_bytes()
    }

    fn zeroed() -> Self {
        Self(0)
    }
}

impl From<u32> for KeyInfo {
    fn from(value: u32) -> Self {
        KeyInfo(value)
    }
}

impl Display for KeyInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let signing_key = match self.signing_key() {
            0 => "vcek",
            1 => "vlek",
            7 => "none",
            _ => "unknown",
        };

        write!(
            f,
            r#"Key Information:
    author key enabled: {}
    mask chip key:      {}
    signing key:        {}"#,
            self.author_key_en(),
            self.mask_chip_key(),
            signing_key
        )
    }
}
