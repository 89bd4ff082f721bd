// SPDX-License-Identifier: Apache-2.0

//! The evidence service: fresh report, resolved chain, verification, and a
//! best-effort UVM endorsement, assembled into one [`EvidenceBundle`].

use crate::{
    certs::snp::Chain,
    endorsement::EndorsementProvider,
    error::EvidenceError,
    firmware::guest::{RawReport, ReportReader, REPORT_DATA_LEN},
    kds::{ChainCache, ChainKey},
    verify::{VerificationResult, Verifier},
    Generation,
};

#[cfg(target_os = "linux")]
use crate::{
    config::Config,
    endorsement::DirectoryEndorsements,
    error::ConfigError,
    firmware::guest::SevGuestDevice,
    kds::KdsClient,
};

use base64::{engine::general_purpose::STANDARD, Engine};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

#[cfg(target_os = "linux")]
use std::sync::Arc;

/// Whether a bundle carries a UVM endorsement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EndorsementStatus {
    /// The endorsement statement for the report's measurement.
    Present(Vec<u8>),

    /// No endorsement could be produced. The report and chain are still
    /// verified.
    Missing,
}

/// Attestation evidence for one request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireBundle", into = "WireBundle")]
pub struct EvidenceBundle {
    /// The attestation report exactly as the hardware produced it.
    pub report: Vec<u8>,

    /// DER certificates: VCEK, ASK, ARK.
    pub certificate_chain: Vec<Vec<u8>>,

    /// The UVM endorsement, or why there is none.
    pub endorsement: EndorsementStatus,
}

#[derive(Serialize, Deserialize)]
struct WireBundle {
    report: String,
    certificate_chain: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    uvm_endorsement: Option<String>,
    endorsement_missing: bool,
}

impl From<EvidenceBundle> for WireBundle {
    fn from(bundle: EvidenceBundle) -> Self {
        let uvm_endorsement = match &bundle.endorsement {
            EndorsementStatus::Present(statement) => Some(STANDARD.encode(statement)),
            EndorsementStatus::Missing => None,
        };

        Self {
            report: STANDARD.encode(&bundle.report),
            certificate_chain: bundle
                .certificate_chain
                .iter()
                .map(|cert| STANDARD.encode(cert))
                .collect(),
            endorsement_missing: uvm_endorsement.is_none(),
            uvm_endorsement,
        }
    }
}

impl TryFrom<WireBundle> for EvidenceBundle {
    type Error = String;

    fn try_from(wire: WireBundle) -> Result<Self, Self::Error> {
        let decode = |field: &str, value: &str| {
            STANDARD
                .decode(value)
                .map_err(|e| format!("{field} is not valid base64: {e}"))
        };

        let endorsement = match (wire.uvm_endorsement, wire.endorsement_missing) {
            (Some(statement), false) => {
                EndorsementStatus::Present(decode("uvm_endorsement", &statement)?)
            }
            (None, true) => EndorsementStatus::Missing,
            (Some(_), true) => {
                return Err("endorsement_missing is set but uvm_endorsement is present".into())
            }
            (None, false) => {
                return Err("uvm_endorsement is absent but endorsement_missing is not set".into())
            }
        };

        Ok(Self {
            report: decode("report", &wire.report)?,
            certificate_chain: wire
                .certificate_chain
                .iter()
                .map(|cert| decode("certificate_chain", cert))
                .collect::<Result<_, _>>()?,
            endorsement,
        })
    }
}

impl EvidenceBundle {
    /// Whether the UVM endorsement is absent.
    pub fn endorsement_missing(&self) -> bool {
        self.endorsement == EndorsementStatus::Missing
    }

    /// The endorsement statement, if present.
    pub fn uvm_endorsement(&self) -> Option<&[u8]> {
        match &self.endorsement {
            EndorsementStatus::Present(statement) => Some(statement),
            EndorsementStatus::Missing => None,
        }
    }

    /// JSON encoding with base64 byte fields.
    pub fn to_json(&self) -> Result<String, EvidenceError> {
        serde_json::to_string(self)
            .map_err(|e| EvidenceError::MalformedEvidence(format!("unable to encode bundle: {e}")))
    }

    /// Inverse of [`EvidenceBundle::to_json`].
    pub fn from_json(json: &str) -> Result<Self, EvidenceError> {
        serde_json::from_str(json)
            .map_err(|e| EvidenceError::MalformedEvidence(format!("unable to decode bundle: {e}")))
    }

    /// Parses the report and chain. Nothing is verified.
    pub fn parse(&self) -> Result<(RawReport, Chain), EvidenceError> {
        let report = RawReport::from_bytes(self.report.clone())?;
        let chain = Chain::from_der_list(&self.certificate_chain).map_err(|e| {
            EvidenceError::MalformedEvidence(format!("invalid certificate chain: {e}"))
        })?;

        Ok((report, chain))
    }
}

/// Produces and verifies evidence bundles.
pub struct EvidenceService {
    reader: ReportReader,
    chains: ChainCache,
    verifier: Verifier,
    endorsements: Option<EndorsementProvider>,
    product: Option<Generation>,
}

impl EvidenceService {
    /// A service without an endorsement source; its bundles are always
    /// flagged `endorsement_missing`.
    pub fn new(reader: ReportReader, chains: ChainCache, verifier: Verifier) -> Self {
        Self {
            reader,
            chains,
            verifier,
            endorsements: None,
            product: None,
        }
    }

    /// Attaches UVM endorsements from `provider`.
    pub fn with_endorsements(mut self, provider: EndorsementProvider) -> Self {
        self.endorsements = Some(provider);
        self
    }

    /// Product line to assume for reports that carry no CPUID.
    pub fn with_product(mut self, product: Generation) -> Self {
        self.product = Some(product);
        self
    }

    /// Builds a service over the guest device and the AMD KDS.
    #[cfg(target_os = "linux")]
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;

        let root = config.load_root()?;
        let verifier = Verifier::new(root, config.min_tcb, config.policy.clone());

        let device = SevGuestDevice::new(&config.device_path, config.vmpl);
        let reader = ReportReader::new(Arc::new(device));

        let kds = KdsClient::new(config.kds_url.clone(), config.request_timeout())
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        let chains = ChainCache::new(Arc::new(kds), config.retry.clone(), config.cache.clone());

        let mut service = Self::new(reader, chains, verifier);

        if let Some(dir) = &config.endorsements_dir {
            let provider = EndorsementProvider::new(Arc::new(DirectoryEndorsements::new(dir)))
                .with_timeout(config.request_timeout())
                .with_limits(config.cache.clone());
            service = service.with_endorsements(provider);
        }

        if let Some(product) = config.product {
            service = service.with_product(product);
        }

        Ok(service)
    }

    /// The certificate cache, shared with every clone of it.
    pub fn chains(&self) -> &ChainCache {
        &self.chains
    }

    /// The verifier.
    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    /// Produces verified evidence binding `report_data`.
    ///
    /// A report that fails verification is never returned; the request
    /// fails with [`EvidenceError::AttestationRejected`]. A missing UVM
    /// endorsement does not fail the request, it is flagged on the bundle.
    pub async fn fetch_attestation(
        &self,
        report_data: &[u8],
    ) -> Result<EvidenceBundle, EvidenceError> {
        let expected: [u8; REPORT_DATA_LEN] = report_data.try_into().map_err(|_| {
            EvidenceError::InvalidInput(format!(
                "report_data must be {REPORT_DATA_LEN} bytes, got {}",
                report_data.len()
            ))
        })?;

        let raw = self.reader.get_report(&expected).await?;

        let key = ChainKey::from_report(raw.report(), self.product)?;
        let chain = self.chains.get_chain(&key).await?;

        let result = self.verifier.verify_with(&raw, &chain, Some(&expected));
        if !result.accepted {
            return Err(EvidenceError::AttestationRejected(result.reasons));
        }

        let endorsement = self.endorsement_for(&raw).await;
        let certificate_chain = chain.to_der_list().map_err(|e| {
            EvidenceError::MalformedEvidence(format!("unable to encode certificate chain: {e}"))
        })?;

        info!(
            "attestation evidence ready for {key} (endorsement {})",
            match endorsement {
                EndorsementStatus::Present(_) => "attached",
                EndorsementStatus::Missing => "missing",
            }
        );

        Ok(EvidenceBundle {
            report: raw.into_bytes(),
            certificate_chain,
            endorsement,
        })
    }

    /// Verifies a bundle without touching the device.
    pub fn verify_bundle(&self, bundle: &EvidenceBundle) -> Result<VerificationResult, EvidenceError> {
        self.verify_bundle_with(bundle, None)
    }

    /// As [`EvidenceService::verify_bundle`], also requiring the report to
    /// bind `expected_report_data`.
    pub fn verify_bundle_with(
        &self,
        bundle: &EvidenceBundle,
        expected_report_data: Option<&[u8; REPORT_DATA_LEN]>,
    ) -> Result<VerificationResult, EvidenceError> {
        let (report, chain) = bundle.parse()?;
        Ok(self
            .verifier
            .verify_with(&report, &chain, expected_report_data))
    }

    async fn endorsement_for(&self, raw: &RawReport) -> EndorsementStatus {
        let Some(provider) = &self.endorsements else {
            debug!("no UVM endorsement source configured");
            return EndorsementStatus::Missing;
        };

        match provider.get_endorsement(&raw.report().measurement).await {
            Ok(endorsement) => EndorsementStatus::Present(endorsement.statement.clone()),
            Err(e) => {
                warn!("returning evidence without a UVM endorsement: {e}");
                EndorsementStatus::Missing
            }
        }
    }
}
