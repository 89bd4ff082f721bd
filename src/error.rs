// SPDX-License-Identifier: Apache-2.0

use std::{
    array::TryFromSliceError,
    convert::From,
    error,
    fmt::{Debug, Display},
    io,
    path::PathBuf,
};

use serde::{Deserialize, Serialize};

use crate::firmware::TcbVersion;

/// Errors which may be encountered while handling fixed-size arrays.
#[derive(Debug)]
pub enum ArrayError {
    /// Error when converting a slice into an array.
    SliceError(TryFromSliceError),

    /// Error when converting a vector into an array.
    VectorError(String),
}

impl error::Error for ArrayError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            ArrayError::SliceError(error) => Some(error),
            ArrayError::VectorError(_) => None,
        }
    }
}

impl Display for ArrayError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ArrayError::SliceError(error) => write!(f, "Error when handling slice: {error}"),
            ArrayError::VectorError(error) => write!(f, "Error when handling vector: {error}"),
        }
    }
}

impl From<TryFromSliceError> for ArrayError {
    fn from(value: TryFromSliceError) -> Self {
        Self::SliceError(value)
    }
}

/// Structural problems found while parsing an attestation report.
#[derive(Debug)]
pub enum ReportError {
    /// The report version is not one this crate can lay out.
    UnsupportedVersion(u32),

    /// The buffer does not have the fixed report length.
    InvalidLength(usize),

    /// MASK_CHIP_ID was set, so the report cannot be matched to a VCEK.
    MaskedChipId,

    /// Reading a field failed.
    Io(io::Error),
}

impl error::Error for ReportError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            ReportError::Io(error) => Some(error),
            _ => None,
        }
    }
}

impl Display for ReportError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ReportError::UnsupportedVersion(version) => {
                write!(f, "Unsupported attestation report version: {version}")
            }
            ReportError::InvalidLength(len) => write!(
                f,
                "Attestation report must be exactly 1184 bytes, got {len} bytes"
            ),
            ReportError::MaskedChipId => write!(
                f,
                "The chip ID is masked (MASK_CHIP_ID=1); the VCEK cannot be located"
            ),
            ReportError::Io(error) => write!(f, "Failed to read attestation report: {error}"),
        }
    }
}

impl From<io::Error> for ReportError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// An error representing the upper 32 bits of a SW_EXITINFO2 field set by the VMM.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VmmError {
    /// The certificate buffer handed to the hypervisor was too small.
    InvalidCertificatePageLength,

    /// The AMD Secure Processor asked the guest to slow down and retry.
    RateLimitRetryRequest,

    /// Nothing more implemented yet.
    Unknown(u32),
}

impl error::Error for VmmError {}

impl From<u32> for VmmError {
    fn from(value: u32) -> Self {
        match value {
            0x1 => VmmError::InvalidCertificatePageLength,
            0x2 => VmmError::RateLimitRetryRequest,
            other => VmmError::Unknown(other),
        }
    }
}

impl Display for VmmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VmmError::InvalidCertificatePageLength => write!(f, "An invalid number of pages was provided to copy the certificate table and certificate data to userspace."),
            VmmError::RateLimitRetryRequest => write!(f, "The AMD Secure Processor detected a possible denial-of-service. Please retry your request."),
            VmmError::Unknown(code) => write!(f, "An unknown VMM error was encountered: {code:#x}"),
        }
    }
}

/// Failures of the attestation device interface.
#[derive(Debug)]
pub enum DeviceError {
    /// Opening or talking to the device node failed.
    Io(io::Error),

    /// The hypervisor rejected the guest request.
    Vmm(VmmError),

    /// The AMD Secure Processor returned a non-zero status.
    Firmware(u32),

    /// The response did not carry a report of the expected size.
    InvalidResponseLength(usize),

    /// The blocking device call could not be joined.
    Interrupted(String),
}

impl error::Error for DeviceError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            DeviceError::Io(error) => Some(error),
            DeviceError::Vmm(error) => Some(error),
            _ => None,
        }
    }
}

impl Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DeviceError::Io(error) => write!(f, "Device I/O error: {error}"),
            DeviceError::Vmm(error) => write!(f, "VMM error: {error}"),
            DeviceError::Firmware(status) => {
                write!(f, "Firmware returned status {status:#x}")
            }
            DeviceError::InvalidResponseLength(len) => {
                write!(f, "Device returned a report of {len} bytes")
            }
            DeviceError::Interrupted(reason) => write!(f, "Device call interrupted: {reason}"),
        }
    }
}

impl From<io::Error> for DeviceError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<VmmError> for DeviceError {
    fn from(value: VmmError) -> Self {
        Self::Vmm(value)
    }
}

/// A failure talking to the key-distribution service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KdsError {
    /// Timeouts, connection resets, 429 and 5xx responses.
    Transient {
        /// HTTP status, if a response was received.
        status: Option<u16>,
        /// Underlying cause.
        message: String,
    },

    /// The chip or TCB is unknown to the service (404).
    NotFound(String),

    /// Any other definitive rejection (4xx other than 404 and 429).
    Rejected {
        /// HTTP status.
        status: u16,
        /// Request that was rejected.
        message: String,
    },

    /// The response was not a well-formed certificate chain.
    Malformed(String),
}

impl KdsError {
    /// Whether the request may succeed if issued again.
    pub fn is_transient(&self) -> bool {
        matches!(self, KdsError::Transient { .. })
    }
}

impl error::Error for KdsError {}

impl Display for KdsError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            KdsError::Transient {
                status: Some(status),
                message,
            } => write!(f, "transient KDS failure (HTTP {status}): {message}"),
            KdsError::Transient {
                status: None,
                message,
            } => write!(f, "transient KDS failure: {message}"),
            KdsError::NotFound(message) => write!(f, "KDS has no certificate for {message}"),
            KdsError::Rejected { status, message } => {
                write!(f, "KDS rejected the request (HTTP {status}): {message}")
            }
            KdsError::Malformed(message) => write!(f, "malformed KDS response: {message}"),
        }
    }
}

/// The certificate chain could not be obtained. Shared by every waiter on
/// the same cache key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchError {
    /// How many requests were issued before giving up.
    pub attempts: u32,

    /// The last underlying cause.
    pub cause: KdsError,
}

impl error::Error for FetchError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        Some(&self.cause)
    }
}

impl Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "certificate fetch failed after {} attempt(s): {}",
            self.attempts, self.cause
        )
    }
}

/// A single failed verification check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail")]
pub enum RejectReason {
    /// The chain does not build to the pinned root of trust.
    ChainInvalid(String),

    /// The leaf certificate does not describe the chip/TCB in the report.
    IdentityMismatch(String),

    /// The report signature does not verify against the leaf key.
    SignatureInvalid(String),

    /// The reported TCB is below the configured minimum.
    TcbTooLow {
        /// TCB carried by the report.
        reported: TcbVersion,
        /// Configured minimum.
        minimum: TcbVersion,
    },

    /// The guest policy bits do not match the deployment.
    PolicyViolation(String),

    /// The report data is not the value the relying party expected.
    ReportDataMismatch,

    /// A revocation source flagged the chain.
    Revoked(String),
}

impl RejectReason {
    /// Stable name of the failed check.
    pub fn kind(&self) -> &'static str {
        match self {
            RejectReason::ChainInvalid(_) => "ChainInvalid",
            RejectReason::IdentityMismatch(_) => "IdentityMismatch",
            RejectReason::SignatureInvalid(_) => "SignatureInvalid",
            RejectReason::TcbTooLow { .. } => "TcbTooLow",
            RejectReason::PolicyViolation(_) => "PolicyViolation",
            RejectReason::ReportDataMismatch => "ReportDataMismatch",
            RejectReason::Revoked(_) => "Revoked",
        }
    }
}

impl Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RejectReason::ChainInvalid(detail)
            | RejectReason::IdentityMismatch(detail)
            | RejectReason::SignatureInvalid(detail)
            | RejectReason::PolicyViolation(detail)
            | RejectReason::Revoked(detail) => write!(f, "{}: {detail}", self.kind()),
            RejectReason::TcbTooLow { reported, minimum } => write!(
                f,
                "TcbTooLow: reported {} is below minimum {}",
                reported.compact(),
                minimum.compact()
            ),
            RejectReason::ReportDataMismatch => write!(f, "ReportDataMismatch"),
        }
    }
}

/// Errors surfaced by the evidence service.
#[derive(Debug)]
pub enum EvidenceError {
    /// The request was malformed; nothing was attempted.
    InvalidInput(String),

    /// The platform attestation interface failed.
    DeviceUnavailable(DeviceError),

    /// The endorsement chain could not be obtained.
    CertificateFetchFailed(FetchError),

    /// The evidence could not be parsed, so no check ran.
    MalformedEvidence(String),

    /// Verification ran and rejected the report.
    AttestationRejected(Vec<RejectReason>),
}

impl EvidenceError {
    /// The reasons carried by a rejection, empty for every other error.
    pub fn reasons(&self) -> &[RejectReason] {
        match self {
            EvidenceError::AttestationRejected(reasons) => reasons,
            _ => &[],
        }
    }
}

impl error::Error for EvidenceError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            EvidenceError::DeviceUnavailable(error) => Some(error),
            EvidenceError::CertificateFetchFailed(error) => Some(error),
            _ => None,
        }
    }
}

impl Display for EvidenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            EvidenceError::InvalidInput(reason) => write!(f, "InvalidInput: {reason}"),
            EvidenceError::DeviceUnavailable(error) => write!(f, "DeviceUnavailable: {error}"),
            EvidenceError::CertificateFetchFailed(error) => {
                write!(f, "CertificateFetchFailed: {error}")
            }
            EvidenceError::MalformedEvidence(reason) => write!(f, "MalformedEvidence: {reason}"),
            EvidenceError::AttestationRejected(reasons) => {
                let reasons: Vec<String> = reasons.iter().map(|r| r.to_string()).collect();
                write!(f, "AttestationRejected: [{}]", reasons.join("; "))
            }
        }
    }
}

impl From<DeviceError> for EvidenceError {
    fn from(value: DeviceError) -> Self {
        Self::DeviceUnavailable(value)
    }
}

impl From<FetchError> for EvidenceError {
    fn from(value: FetchError) -> Self {
        Self::CertificateFetchFailed(value)
    }
}

impl From<ReportError> for EvidenceError {
    fn from(value: ReportError) -> Self {
        Self::MalformedEvidence(value.to_string())
    }
}

/// The UVM endorsement could not be produced.
#[derive(Debug)]
pub enum EndorsementError {
    /// No endorsement exists for the measurement.
    NotFound(String),

    /// The endorsement source failed.
    Io(io::Error),

    /// The stored endorsement could not be decoded.
    Decode(String),
}

impl error::Error for EndorsementError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            EndorsementError::Io(error) => Some(error),
            _ => None,
        }
    }
}

impl Display for EndorsementError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            EndorsementError::NotFound(digest) => {
                write!(f, "no UVM endorsement for measurement {digest}")
            }
            EndorsementError::Io(error) => write!(f, "endorsement source failed: {error}"),
            EndorsementError::Decode(reason) => {
                write!(f, "endorsement could not be decoded: {reason}")
            }
        }
    }
}

impl From<io::Error> for EndorsementError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Problems loading or validating the configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// A configuration or root-of-trust file could not be read.
    Io(PathBuf, io::Error),

    /// The configuration document is not valid.
    Parse(serde_json::Error),

    /// A value is out of range.
    Invalid(String),

    /// The pinned root of trust is not a usable certificate.
    RootOfTrust(String),
}

impl error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            ConfigError::Io(_, error) => Some(error),
            ConfigError::Parse(error) => Some(error),
            _ => None,
        }
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, error) => {
                write!(f, "failed to read {}: {error}", path.display())
            }
            ConfigError::Parse(error) => write!(f, "invalid configuration: {error}"),
            ConfigError::Invalid(reason) => write!(f, "invalid configuration: {reason}"),
            ConfigError::RootOfTrust(reason) => write!(f, "invalid root of trust: {reason}"),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}
