// SPDX-License-Identifier: Apache-2.0

mod common;

use std::sync::Arc;

use common::*;
use snp_evidence::{
    certs::snp::Chain,
    firmware::{guest::AttestationReport, TcbVersion},
    verify::{PolicyExpectations, RevocationCheck},
    Verifier,
};

const NONCE: [u8; 64] = [7; 64];

fn verifier(platform: &Platform, min_tcb: TcbVersion) -> Verifier {
    Verifier::new(platform.root(), min_tcb, PolicyExpectations::default())
}

#[test]
fn valid_report_is_accepted() {
    init_logger();
    let platform = Platform::new(Profile::default());

    let result = verifier(&platform, TcbVersion::default())
        .verify(&platform.raw_report(NONCE), &platform.chain());

    assert!(result.accepted, "{:?}", result.reasons);
    assert!(result.reasons.is_empty());
    assert_eq!(result.claims.measurement.0, MEASUREMENT);
    assert_eq!(result.claims.reported_tcb, TcbVersion::new(3, 0, 8, 115));
    assert_eq!(result.claims.report_data.0, NONCE);
}

#[test]
fn any_flipped_bit_in_signed_range_breaks_the_signature() {
    let platform = Platform::new(Profile::default());
    let verifier = verifier(&platform, TcbVersion::default());
    let chain = platform.chain();
    let pristine = platform.report(NONCE);

    for offset in 0..0x2A0 {
        let mut tampered = pristine.clone();
        tampered[offset] ^= 0x08;

        let report = snp_evidence::firmware::guest::RawReport::from_bytes(tampered).unwrap();
        let result = verifier.verify(&report, &chain);

        assert!(!result.accepted, "flip at {offset:#x} was accepted");
        assert!(
            result.rejected_for("SignatureInvalid"),
            "flip at {offset:#x} gave {:?}",
            result.reason_kinds()
        );
    }
}

#[test]
fn tcb_at_or_above_minimum_is_accepted() {
    let platform = Platform::new(Profile::milan(TcbVersion::new(3, 3, 3, 3)));

    let result = verifier(&platform, TcbVersion::new(2, 2, 2, 2))
        .verify(&platform.raw_report(NONCE), &platform.chain());

    assert!(result.accepted, "{:?}", result.reasons);
}

#[test]
fn tcb_below_minimum_is_rejected() {
    let platform = Platform::new(Profile::milan(TcbVersion::new(1, 1, 1, 1)));

    let result = verifier(&platform, TcbVersion::new(2, 2, 2, 2))
        .verify(&platform.raw_report(NONCE), &platform.chain());

    assert!(!result.accepted);
    assert_eq!(result.reason_kinds(), vec!["TcbTooLow"]);
}

#[test]
fn single_stale_component_is_too_low() {
    let platform = Platform::new(Profile::milan(TcbVersion::new(9, 9, 1, 200)));

    let result = verifier(&platform, TcbVersion::new(2, 2, 2, 2))
        .verify(&platform.raw_report(NONCE), &platform.chain());

    assert_eq!(result.reason_kinds(), vec!["TcbTooLow"]);
}

#[test]
fn foreign_root_is_chain_invalid() {
    let platform = Platform::new(Profile::default());
    let stranger = Pki::new();

    let result = Verifier::new(
        stranger.root(),
        TcbVersion::default(),
        PolicyExpectations::default(),
    )
    .verify(&platform.raw_report(NONCE), &platform.chain());

    assert_eq!(result.reason_kinds(), vec!["ChainInvalid"]);
}

#[test]
fn vcek_signed_by_another_ask_is_chain_invalid() {
    let platform = Platform::new(Profile::default());
    let other = Platform::new(Profile::default());

    let chain = Chain {
        ca: other.chain().ca,
        vek: platform.chain().vek,
    };

    let result = Verifier::new(
        other.root(),
        TcbVersion::default(),
        PolicyExpectations::default(),
    )
    .verify(&platform.raw_report(NONCE), &chain);

    assert_eq!(result.reason_kinds(), vec!["ChainInvalid"]);
}

#[test]
fn failures_are_accumulated_in_check_order() {
    let platform = Platform::new(Profile::milan(TcbVersion::new(1, 1, 1, 1)));
    let stranger = Pki::new();

    let result = Verifier::new(
        stranger.root(),
        TcbVersion::new(2, 2, 2, 2),
        PolicyExpectations::default(),
    )
    .verify(&platform.raw_report(NONCE), &platform.chain());

    assert!(!result.accepted);
    assert_eq!(result.reason_kinds(), vec!["ChainInvalid", "TcbTooLow"]);
}

#[test]
fn vcek_for_another_chip_is_identity_mismatch() {
    let mut profile = Profile::default();
    profile.cert_hw_id = vec![0x24; 64];
    let platform = Platform::new(profile);

    let result = verifier(&platform, TcbVersion::default())
        .verify(&platform.raw_report(NONCE), &platform.chain());

    assert_eq!(result.reason_kinds(), vec!["IdentityMismatch"]);
}

#[test]
fn vcek_for_another_tcb_is_identity_mismatch() {
    let mut profile = Profile::default();
    profile.cert_tcb = TcbVersion::new(3, 0, 9, 115);
    let platform = Platform::new(profile);

    let result = verifier(&platform, TcbVersion::default())
        .verify(&platform.raw_report(NONCE), &platform.chain());

    assert_eq!(result.reason_kinds(), vec!["IdentityMismatch"]);
}

#[test]
fn masked_chip_id_is_identity_mismatch() {
    let mut profile = Profile::default();
    profile.chip_id = [0; 64];
    let platform = Platform::new(profile);

    let result = verifier(&platform, TcbVersion::default())
        .verify(&platform.raw_report(NONCE), &platform.chain());

    assert_eq!(result.reason_kinds(), vec!["IdentityMismatch"]);
}

#[test]
fn debug_policy_is_a_violation_unless_allowed() {
    let mut profile = Profile::default();
    profile.policy |= 1 << 19;
    let platform = Platform::new(profile);
    let report = platform.raw_report(NONCE);

    let strict = verifier(&platform, TcbVersion::default()).verify(&report, &platform.chain());
    assert_eq!(strict.reason_kinds(), vec!["PolicyViolation"]);

    let lenient = Verifier::new(
        platform.root(),
        TcbVersion::default(),
        PolicyExpectations {
            allow_debug: true,
            ..Default::default()
        },
    )
    .verify(&report, &platform.chain());
    assert!(lenient.accepted, "{:?}", lenient.reasons);
}

#[test]
fn policy_checks_report_each_violation() {
    let mut profile = Profile::default();
    profile.policy |= (1 << 18) | (1 << 19);
    profile.vmpl = 2;
    let platform = Platform::new(profile);

    let result = Verifier::new(
        platform.root(),
        TcbVersion::default(),
        PolicyExpectations {
            require_single_socket: true,
            max_vmpl: Some(0),
            ..Default::default()
        },
    )
    .verify(&platform.raw_report(NONCE), &platform.chain());

    assert_eq!(result.reason_kinds(), vec!["PolicyViolation"; 4]);
}

#[test]
fn report_data_binding() {
    let platform = Platform::new(Profile::default());
    let verifier = verifier(&platform, TcbVersion::default());
    let report = platform.raw_report(NONCE);

    assert!(
        verifier
            .verify_with(&report, &platform.chain(), Some(&NONCE))
            .accepted
    );

    let result = verifier.verify_with(&report, &platform.chain(), Some(&[8; 64]));
    assert_eq!(result.reason_kinds(), vec!["ReportDataMismatch"]);
}

struct RevokeAll;

impl RevocationCheck for RevokeAll {
    fn check(&self, _: &Chain, report: &AttestationReport) -> Option<String> {
        Some(format!("TCB {} is revoked", report.reported_tcb.compact()))
    }
}

#[test]
fn revocation_hook_adds_a_reason() {
    let platform = Platform::new(Profile::default());

    let result = verifier(&platform, TcbVersion::default())
        .with_revocation(Arc::new(RevokeAll))
        .verify(&platform.raw_report(NONCE), &platform.chain());

    assert_eq!(result.reason_kinds(), vec!["Revoked"]);
}

#[test]
fn turin_report_is_accepted() {
    let platform = Platform::new(Profile::turin());

    let report = platform.raw_report(NONCE);
    assert!(report.report().variant().is_turin());
    assert_eq!(report.report().reported_tcb.fmc, Some(1));

    let result = verifier(&platform, TcbVersion::new_turin(1, 1, 0, 1, 1))
        .verify(&report, &platform.chain());

    assert!(result.accepted, "{:?}", result.reasons);
}

#[test]
fn turin_fmc_below_minimum_is_too_low() {
    let platform = Platform::new(Profile::turin());

    let result = verifier(&platform, TcbVersion::new_turin(2, 1, 0, 1, 1))
        .verify(&platform.raw_report(NONCE), &platform.chain());

    assert_eq!(result.reason_kinds(), vec!["TcbTooLow"]);
}

#[test]
fn vcek_identity_is_read_from_extensions() {
    let platform = Platform::new(Profile::default());
    let identity = platform.chain().vek.identity().unwrap();

    assert_eq!(identity.hw_id, Some(MILAN_CHIP));
    assert_eq!(identity.tcb, TcbVersion::new(3, 0, 8, 115));
    assert_eq!(identity.product.as_deref(), Some("Milan-B0"));
}

#[test]
fn serialised_result_lists_reasons_by_name() {
    let platform = Platform::new(Profile::milan(TcbVersion::new(1, 1, 1, 1)));

    let result = verifier(&platform, TcbVersion::new(2, 2, 2, 2))
        .verify_with(&platform.raw_report(NONCE), &platform.chain(), Some(&[8; 64]));
    let json = serde_json::to_value(&result).unwrap();

    assert_eq!(json["accepted"], false);
    assert_eq!(
        json["reasons"],
        serde_json::json!(["TcbTooLow", "ReportDataMismatch"])
    );
    assert_eq!(json["details"].as_array().unwrap().len(), 2);
    assert!(json["details"][0].as_str().unwrap().starts_with("TcbTooLow"));
    assert_eq!(
        json["measurement"],
        serde_json::to_value(result.claims.measurement).unwrap()
    );
    assert_eq!(
        json["tcb_version"],
        serde_json::to_value(TcbVersion::new(1, 1, 1, 1)).unwrap()
    );
}
