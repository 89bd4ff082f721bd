// SPDX-License-Identifier: Apache-2.0

//! A simulated SEV-SNP platform: a throwaway ARK/ASK/VCEK hierarchy with
//! the AMD VCEK extensions, signed reports, and counting collaborators.

#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use openssl::{
    asn1::{Asn1Object, Asn1OctetString, Asn1Time},
    bn::BigNum,
    ec::{EcGroup, EcKey},
    ecdsa::EcdsaSig,
    hash::MessageDigest,
    nid::Nid,
    pkey::{PKey, Private},
    sha::Sha384,
    x509::{X509Builder, X509Extension, X509NameBuilder, X509},
};

use snp_evidence::{
    certs::snp::{ca, ecdsa::Signature, Certificate, Chain},
    error::{DeviceError, KdsError},
    firmware::{
        guest::{AttestationReport, GuestPolicy, KeyInfo, RawReport, ReportDevice, Version},
        TcbVersion,
    },
    kds::{ChainKey, KeyDistribution, RawChain},
    Array, Generation,
};

pub const MILAN_CHIP: [u8; 64] = [0x42; 64];
pub const DEFAULT_POLICY: u64 = 0x30000;
pub const MEASUREMENT: [u8; 48] = [0x5C; 48];

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn ec_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::SECP384R1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

fn certificate(
    common_name: &str,
    serial: u32,
    key: &PKey<Private>,
    issuer: Option<(&X509, &PKey<Private>)>,
    extensions: Vec<X509Extension>,
) -> X509 {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, common_name)
        .unwrap();
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    builder
        .set_serial_number(&BigNum::from_u32(serial).unwrap().to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(&name).unwrap();
    match issuer {
        Some((cert, _)) => builder.set_issuer_name(cert.subject_name()).unwrap(),
        None => builder.set_issuer_name(&name).unwrap(),
    }
    builder.set_pubkey(key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(365).unwrap())
        .unwrap();

    for extension in extensions {
        builder.append_extension(extension).unwrap();
    }

    let signer = issuer.map(|(_, key)| key).unwrap_or(key);
    builder.sign(signer, MessageDigest::sha384()).unwrap();
    builder.build()
}

fn amd_extension(oid: &str, value: &[u8]) -> X509Extension {
    X509Extension::new_from_der(
        &Asn1Object::from_str(oid).unwrap(),
        false,
        &Asn1OctetString::new_from_bytes(value).unwrap(),
    )
    .unwrap()
}

fn spl(value: u8) -> Vec<u8> {
    if value < 0x80 {
        vec![0x02, 0x01, value]
    } else {
        vec![0x02, 0x02, 0x00, value]
    }
}

/// A root and intermediate.
#[derive(Clone)]
pub struct Pki {
    pub ark: X509,
    ark_key: PKey<Private>,
    pub ask: X509,
    ask_key: PKey<Private>,
}

impl Pki {
    pub fn new() -> Self {
        let ark_key = ec_key();
        let ark = certificate("ARK-Test", 1, &ark_key, None, vec![]);

        let ask_key = ec_key();
        let ask = certificate("SEV-Test", 2, &ask_key, Some((&ark, &ark_key)), vec![]);

        Self {
            ark,
            ark_key,
            ask,
            ask_key,
        }
    }

    pub fn root(&self) -> Certificate {
        self.ark.clone().into()
    }

    /// A VCEK for `hw_id` at `tcb`, signed by the ASK.
    pub fn vcek(&self, hw_id: &[u8], tcb: TcbVersion) -> (X509, PKey<Private>) {
        let key = ec_key();

        let mut extensions = vec![
            amd_extension("1.3.6.1.4.1.3704.1.2", b"Milan-B0"),
            amd_extension("1.3.6.1.4.1.3704.1.3.1", &spl(tcb.bootloader)),
            amd_extension("1.3.6.1.4.1.3704.1.3.2", &spl(tcb.tee)),
            amd_extension("1.3.6.1.4.1.3704.1.3.3", &spl(tcb.snp)),
            amd_extension("1.3.6.1.4.1.3704.1.3.8", &spl(tcb.microcode)),
            amd_extension("1.3.6.1.4.1.3704.1.4", hw_id),
        ];
        if let Some(fmc) = tcb.fmc {
            extensions.push(amd_extension("1.3.6.1.4.1.3704.1.3.9", &spl(fmc)));
        }

        let cert = certificate(
            "SEV-VCEK",
            3,
            &key,
            Some((&self.ask, &self.ask_key)),
            extensions,
        );
        (cert, key)
    }
}

/// What the simulated chip reports.
#[derive(Clone, Debug)]
pub struct Profile {
    pub chip_id: [u8; 64],
    pub cert_hw_id: Vec<u8>,
    pub tcb: TcbVersion,
    pub cert_tcb: TcbVersion,
    pub family: u8,
    pub model: u8,
    pub policy: u64,
    pub vmpl: u32,
    pub measurement: [u8; 48],
}

impl Default for Profile {
    fn default() -> Self {
        Self::milan(TcbVersion::new(3, 0, 8, 115))
    }
}

impl Profile {
    pub fn milan(tcb: TcbVersion) -> Self {
        Self {
            chip_id: MILAN_CHIP,
            cert_hw_id: MILAN_CHIP.to_vec(),
            tcb,
            cert_tcb: tcb,
            family: 0x19,
            model: 0x01,
            policy: DEFAULT_POLICY,
            vmpl: 0,
            measurement: MEASUREMENT,
        }
    }

    pub fn turin() -> Self {
        let mut chip_id = [0u8; 64];
        chip_id[..8].copy_from_slice(&[0x17; 8]);
        let tcb = TcbVersion::new_turin(1, 2, 0, 4, 77);

        Self {
            chip_id,
            cert_hw_id: chip_id[..8].to_vec(),
            tcb,
            cert_tcb: tcb,
            family: 0x1A,
            model: 0x02,
            policy: DEFAULT_POLICY,
            vmpl: 0,
            measurement: MEASUREMENT,
        }
    }
}

/// A chip with its VCEK.
#[derive(Clone)]
pub struct Platform {
    pub pki: Pki,
    pub profile: Profile,
    vcek: X509,
    vcek_key: PKey<Private>,
}

impl Platform {
    pub fn new(profile: Profile) -> Self {
        Self::with_pki(Pki::new(), profile)
    }

    pub fn with_pki(pki: Pki, profile: Profile) -> Self {
        let (vcek, vcek_key) = pki.vcek(&profile.cert_hw_id, profile.cert_tcb);
        Self {
            pki,
            profile,
            vcek,
            vcek_key,
        }
    }

    pub fn root(&self) -> Certificate {
        self.pki.root()
    }

    pub fn chain(&self) -> Chain {
        Chain {
            ca: ca::Chain {
                ark: self.pki.ark.clone().into(),
                ask: self.pki.ask.clone().into(),
            },
            vek: self.vcek.clone().into(),
        }
    }

    pub fn raw_chain(&self) -> RawChain {
        RawChain {
            vek: self.vcek.to_der().unwrap(),
            ask: self.pki.ask.to_der().unwrap(),
            ark: self.pki.ark.to_der().unwrap(),
        }
    }

    pub fn key(&self) -> ChainKey {
        ChainKey {
            generation: Generation::identify_cpu(self.profile.family, self.profile.model)
                .unwrap(),
            chip_id: Array(self.profile.chip_id),
            tcb: self.profile.tcb,
        }
    }

    /// A version 3 report binding `report_data`, signed by the VCEK.
    pub fn report(&self, report_data: [u8; 64]) -> Vec<u8> {
        let profile = &self.profile;
        let tcb = profile.tcb;

        let mut report = AttestationReport {
            version: 3,
            guest_svn: 1,
            policy: GuestPolicy::from(profile.policy),
            vmpl: profile.vmpl,
            sig_algo: 1,
            current_tcb: tcb,
            key_info: KeyInfo::from(0),
            report_data: Array(report_data),
            measurement: Array(profile.measurement),
            reported_tcb: tcb,
            cpuid_fam_id: Some(profile.family),
            cpuid_mod_id: Some(profile.model),
            cpuid_step: Some(1),
            chip_id: Array(profile.chip_id),
            committed_tcb: tcb,
            current: Version::new(1, 55, 4),
            committed: Version::new(1, 55, 4),
            launch_tcb: tcb,
            ..Default::default()
        };

        let unsigned = report.to_bytes().unwrap();

        let mut hasher = Sha384::new();
        hasher.update(&unsigned[..0x2A0]);
        let digest = hasher.finish();

        let ec_key = self.vcek_key.ec_key().unwrap();
        report.signature = Signature::from(EcdsaSig::sign(&digest, &ec_key).unwrap());

        report.to_bytes().unwrap()
    }

    pub fn raw_report(&self, report_data: [u8; 64]) -> RawReport {
        RawReport::from_bytes(self.report(report_data)).unwrap()
    }
}

/// A guest device backed by a [`Platform`].
pub struct SimulatedDevice {
    platform: Platform,
    pub calls: AtomicUsize,
}

impl SimulatedDevice {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ReportDevice for SimulatedDevice {
    fn get_report(&self, report_data: [u8; 64]) -> Result<Vec<u8>, DeviceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.platform.report(report_data))
    }
}

/// A KDS that replays scripted responses, then falls back to a default.
pub struct MockKds {
    scripted: Mutex<VecDeque<Result<RawChain, KdsError>>>,
    fallback: Result<RawChain, KdsError>,
    delay: Duration,
    calls: AtomicUsize,
}

impl MockKds {
    pub fn serving(chain: RawChain) -> Self {
        Self::new(Ok(chain))
    }

    pub fn failing(error: KdsError) -> Self {
        Self::new(Err(error))
    }

    fn new(fallback: Result<RawChain, KdsError>) -> Self {
        Self {
            scripted: Mutex::new(VecDeque::new()),
            fallback,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Responses returned, in order, before the fallback.
    pub fn then(self, response: Result<RawChain, KdsError>) -> Self {
        self.scripted.lock().unwrap().push_back(response);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyDistribution for MockKds {
    async fn fetch_chain(&self, _key: &ChainKey) -> Result<RawChain, KdsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let scripted = self.scripted.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| self.fallback.clone())
    }
}

pub fn transient() -> KdsError {
    KdsError::Transient {
        status: Some(503),
        message: "service unavailable".to_string(),
    }
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
