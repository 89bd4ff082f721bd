// SPDX-License-Identifier: Apache-2.0

//! Chain and signature verification of attestation reports.
//!
//! [`Verifier::verify`] runs every check and lists every failure, so a
//! caller can tell stale firmware from a foreign root of trust in one
//! round trip:
//!
//! 1. the chain builds to the pinned ARK (`ChainInvalid`),
//! 2. the VCEK was issued for the reporting chip and TCB (`IdentityMismatch`),
//! 3. the VCEK signed the report (`SignatureInvalid`),
//! 4. the reported TCB meets the configured minimum (`TcbTooLow`),
//! 5. the guest policy matches the deployment (`PolicyViolation`).
//!
//! An expected report data value and a [`RevocationCheck`] may add
//! `ReportDataMismatch` and `Revoked`.

use crate::{
    certs::snp::{Certificate, Chain, Verifiable},
    error::RejectReason,
    firmware::{
        guest::{AttestationReport, GuestPolicy, RawReport, SIG_ALGO_ECDSA_P384_SHA384},
        TcbVersion,
    },
    util::array::Array,
};

use log::{info, warn};
use openssl::{ecdsa::EcdsaSig, sha::Sha384};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Guest policy bits the deployment tolerates.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyExpectations {
    /// Accept guests that allow debugging.
    pub allow_debug: bool,

    /// Accept guests that may be associated with a migration agent.
    pub allow_migration_agent: bool,

    /// Reject guests that may run across sockets.
    pub require_single_socket: bool,

    /// Highest VMPL a report may be requested from.
    pub max_vmpl: Option<u32>,
}

/// Revocation source consulted after the ordered checks.
pub trait RevocationCheck: Send + Sync {
    /// Returns why the chain or report is revoked, if it is.
    fn check(&self, chain: &Chain, report: &AttestationReport) -> Option<String>;
}

/// Treats nothing as revoked; the minimum TCB is the only revocation gate.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoRevocation;

impl RevocationCheck for NoRevocation {
    fn check(&self, _: &Chain, _: &AttestationReport) -> Option<String> {
        None
    }
}

/// Fields extracted from a report, for the relying party.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Launch measurement.
    pub measurement: Array<48>,
    /// TCB the report was signed under.
    pub reported_tcb: TcbVersion,
    /// Guest policy.
    pub policy: GuestPolicy,
    /// VMPL the report was requested from.
    pub vmpl: u32,
    /// Chip id, zero when masked.
    pub chip_id: Array<64>,
    /// Caller-supplied report data.
    pub report_data: Array<64>,
    /// Host-supplied data.
    pub host_data: Array<32>,
}

impl From<&AttestationReport> for Claims {
    fn from(report: &AttestationReport) -> Self {
        Self {
            measurement: report.measurement,
            reported_tcb: report.reported_tcb,
            policy: report.policy,
            vmpl: report.vmpl,
            chip_id: report.chip_id,
            report_data: report.report_data,
            host_data: report.host_data,
        }
    }
}

/// Outcome of verifying one report.
///
/// Serialised, `reasons` is the list of failed check names
/// ([`RejectReason::kind`]) and `details` the matching messages; the
/// measurement and reported TCB are repeated at the top level.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(into = "WireResult")]
pub struct VerificationResult {
    /// True exactly when `reasons` is empty.
    pub accepted: bool,

    /// Every failed check, in check order.
    pub reasons: Vec<RejectReason>,

    /// What the report states, trusted only if `accepted`.
    pub claims: Claims,
}

#[derive(Serialize)]
struct WireResult {
    accepted: bool,
    reasons: Vec<&'static str>,
    details: Vec<String>,
    measurement: Array<48>,
    tcb_version: TcbVersion,
    claims: Claims,
}

impl From<VerificationResult> for WireResult {
    fn from(result: VerificationResult) -> Self {
        Self {
            accepted: result.accepted,
            reasons: result.reason_kinds(),
            details: result.reasons.iter().map(ToString::to_string).collect(),
            measurement: result.claims.measurement,
            tcb_version: result.claims.reported_tcb,
            claims: result.claims,
        }
    }
}

impl VerificationResult {
    fn new(reasons: Vec<RejectReason>, report: &AttestationReport) -> Self {
        Self {
            accepted: reasons.is_empty(),
            reasons,
            claims: report.into(),
        }
    }

    /// Stable names of the failed checks.
    pub fn reason_kinds(&self) -> Vec<&'static str> {
        self.reasons.iter().map(RejectReason::kind).collect()
    }

    /// Whether a check of the given kind failed.
    pub fn rejected_for(&self, kind: &str) -> bool {
        self.reasons.iter().any(|r| r.kind() == kind)
    }
}

/// Verifies reports against a pinned root of trust and a trust policy.
#[derive(Clone)]
pub struct Verifier {
    root: Certificate,
    min_tcb: TcbVersion,
    policy: PolicyExpectations,
    revocation: Arc<dyn RevocationCheck>,
}

impl Verifier {
    /// A verifier trusting only `root` as ARK.
    pub fn new(root: Certificate, min_tcb: TcbVersion, policy: PolicyExpectations) -> Self {
        Self {
            root,
            min_tcb,
            policy,
            revocation: Arc::new(NoRevocation),
        }
    }

    /// Replaces the revocation source.
    pub fn with_revocation(mut self, revocation: Arc<dyn RevocationCheck>) -> Self {
        self.revocation = revocation;
        self
    }

    /// The pinned root of trust.
    pub fn root(&self) -> &Certificate {
        &self.root
    }

    /// Runs every check on `report` against `chain`.
    pub fn verify(&self, report: &RawReport, chain: &Chain) -> VerificationResult {
        self.verify_with(report, chain, None)
    }

    /// As [`Verifier::verify`], also requiring the report data to equal
    /// `expected_report_data`.
    pub fn verify_with(
        &self,
        raw: &RawReport,
        chain: &Chain,
        expected_report_data: Option<&[u8; 64]>,
    ) -> VerificationResult {
        let report = raw.report();
        let mut reasons = Vec::new();

        self.check_chain(chain, &mut reasons);
        check_identity(report, &chain.vek, &mut reasons);
        check_signature(raw, &chain.vek, &mut reasons);

        if !report.reported_tcb.meets(&self.min_tcb) {
            reasons.push(RejectReason::TcbTooLow {
                reported: report.reported_tcb,
                minimum: self.min_tcb,
            });
        }

        self.check_policy(report, &mut reasons);

        if let Some(expected) = expected_report_data {
            if report.report_data.0 != *expected {
                reasons.push(RejectReason::ReportDataMismatch);
            }
        }

        if let Some(why) = self.revocation.check(chain, report) {
            reasons.push(RejectReason::Revoked(why));
        }

        let result = VerificationResult::new(reasons, report);
        if result.accepted {
            info!(
                "attestation accepted (tcb {}, measurement {:x})",
                report.reported_tcb.compact(),
                report.measurement
            );
        } else {
            warn!("attestation rejected: {:?}", result.reason_kinds());
        }

        result
    }

    fn check_chain(&self, chain: &Chain, reasons: &mut Vec<RejectReason>) {
        if chain.ca.ark != self.root {
            reasons.push(RejectReason::ChainInvalid(
                "ARK does not match the pinned root of trust".to_string(),
            ));
        }

        if let Err(e) = chain.verify() {
            reasons.push(RejectReason::ChainInvalid(e.to_string()));
        }
    }

    fn check_policy(&self, report: &AttestationReport, reasons: &mut Vec<RejectReason>) {
        let policy = &report.policy;
        let expected = &self.policy;

        if policy.debug_allowed() && !expected.allow_debug {
            reasons.push(RejectReason::PolicyViolation(
                "guest policy allows debugging".to_string(),
            ));
        }

        if policy.migrate_ma_allowed() && !expected.allow_migration_agent {
            reasons.push(RejectReason::PolicyViolation(
                "guest policy allows a migration agent".to_string(),
            ));
        }

        if expected.require_single_socket && !policy.single_socket_required() {
            reasons.push(RejectReason::PolicyViolation(
                "guest policy does not require a single socket".to_string(),
            ));
        }

        if let Some(max_vmpl) = expected.max_vmpl {
            if report.vmpl > max_vmpl {
                reasons.push(RejectReason::PolicyViolation(format!(
                    "report requested from VMPL {} (maximum {max_vmpl})",
                    report.vmpl
                )));
            }
        }
    }
}

fn check_identity(report: &AttestationReport, vek: &Certificate, reasons: &mut Vec<RejectReason>) {
    let identity = match vek.identity() {
        Ok(identity) => identity,
        Err(e) => {
            reasons.push(RejectReason::IdentityMismatch(format!(
                "unable to read VEK identity: {e}"
            )));
            return;
        }
    };

    match report.key_info.signing_key() {
        // VCEK: bound to one chip.
        0 => match identity.hw_id {
            _ if report.chip_id.is_zeroed() => reasons.push(RejectReason::IdentityMismatch(
                "report chip id is masked".to_string(),
            )),
            Some(hw_id) if hw_id == report.chip_id.0 => {}
            Some(_) => reasons.push(RejectReason::IdentityMismatch(
                "VCEK hwID does not match the report chip id".to_string(),
            )),
            None => reasons.push(RejectReason::IdentityMismatch(
                "VCEK carries no hwID".to_string(),
            )),
        },
        // VLEK: bound to a cloud provider, not a chip.
        1 => {}
        other => reasons.push(RejectReason::IdentityMismatch(format!(
            "report is not signed by a versioned endorsement key (signing_key={other})"
        ))),
    }

    let reported = &report.reported_tcb;
    let certified = &identity.tcb;
    let fmc_matches = reported.fmc.is_none() || reported.fmc == certified.fmc;

    if !fmc_matches
        || reported.bootloader != certified.bootloader
        || reported.tee != certified.tee
        || reported.snp != certified.snp
        || reported.microcode != certified.microcode
    {
        reasons.push(RejectReason::IdentityMismatch(format!(
            "VEK certifies TCB {} but report states {}",
            certified.compact(),
            reported.compact()
        )));
    }
}

fn check_signature(raw: &RawReport, vek: &Certificate, reasons: &mut Vec<RejectReason>) {
    let report = raw.report();

    if report.sig_algo != SIG_ALGO_ECDSA_P384_SHA384 {
        reasons.push(RejectReason::SignatureInvalid(format!(
            "unsupported signature algorithm {}",
            report.sig_algo
        )));
        return;
    }

    match signature_verifies(raw, vek) {
        Ok(true) => {}
        Ok(false) => reasons.push(RejectReason::SignatureInvalid(
            "VEK does not sign the attestation report".to_string(),
        )),
        Err(e) => reasons.push(RejectReason::SignatureInvalid(e.to_string())),
    }
}

fn signature_verifies(raw: &RawReport, vek: &Certificate) -> std::io::Result<bool> {
    let sig = EcdsaSig::try_from(&raw.report().signature)?;
    let key = vek.public_key()?.ec_key()?;

    let mut hasher = Sha384::new();
    hasher.update(raw.signed_bytes());
    let digest = hasher.finish();

    Ok(sig.verify(&digest, &key)?)
}
