// SPDX-License-Identifier: Apache-2.0

//! Certificate chains from the AMD Key Distribution Service (KDS).
//!
//! A VCEK is specific to one chip at one TCB, so chains are keyed by
//! [`ChainKey`]. [`ChainCache`] sits in front of a [`KeyDistribution`]
//! source and makes sure each key is fetched at most once at a time.

mod cache;
mod client;
mod retry;

pub use cache::{CacheLimits, CacheStats, ChainCache};
pub use client::{KdsClient, KDS_CERT_SITE};
pub use retry::RetryPolicy;

use crate::{
    certs::snp::{ca, Certificate, Chain},
    error::{EvidenceError, KdsError, ReportError},
    firmware::{guest::AttestationReport, TcbVersion},
    util::array::Array,
    Generation,
};

use async_trait::async_trait;
use std::fmt::Display;

/// Identifies one VCEK: the chip and the TCB its key was derived from.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChainKey {
    /// Product line, which selects the KDS path.
    pub generation: Generation,

    /// The chip id as reported.
    pub chip_id: Array<64>,

    /// The reported TCB.
    pub tcb: TcbVersion,
}

impl ChainKey {
    /// Builds the key for the VCEK that signed `report`.
    ///
    /// The generation comes from the report's CPUID fields, or `fallback`
    /// for reports that carry none.
    pub fn from_report(
        report: &AttestationReport,
        fallback: Option<Generation>,
    ) -> Result<Self, EvidenceError> {
        if report.chip_id.is_zeroed() {
            return Err(ReportError::MaskedChipId.into());
        }

        let generation = Generation::from_report(report)
            .or(fallback)
            .ok_or_else(|| {
                EvidenceError::MalformedEvidence(
                    "cannot determine the processor generation: report has no CPUID and no product is configured"
                        .to_string(),
                )
            })?;

        if generation == Generation::Turin && report.reported_tcb.fmc.is_none() {
            return Err(EvidenceError::MalformedEvidence(
                "Turin report carries no FMC SVN".to_string(),
            ));
        }

        Ok(Self {
            generation,
            chip_id: report.chip_id,
            tcb: report.reported_tcb,
        })
    }

    /// Hex hardware id as used in KDS paths. Turin uses only the first
    /// eight chip id bytes.
    pub fn hw_id_hex(&self) -> String {
        match self.generation {
            Generation::Turin => hex::encode(&self.chip_id[..8]),
            _ => hex::encode(&self.chip_id[..]),
        }
    }
}

impl Display for ChainKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hw_id = self.hw_id_hex();
        write!(
            f,
            "{}/{}.. @ {}",
            self.generation,
            &hw_id[..hw_id.len().min(16)],
            self.tcb.compact()
        )
    }
}

/// Certificates as returned by a key-distribution source, not yet parsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawChain {
    /// The VCEK, DER or PEM.
    pub vek: Vec<u8>,

    /// The ASK, DER or PEM.
    pub ask: Vec<u8>,

    /// The ARK, DER or PEM.
    pub ark: Vec<u8>,
}

impl RawChain {
    /// Checks that every entry is a well-formed X.509 certificate.
    pub fn into_chain(self) -> Result<Chain, KdsError> {
        let parse = |raw: &[u8], name: &str| {
            Certificate::from_bytes(raw)
                .map_err(|e| KdsError::Malformed(format!("{name} is not a valid certificate: {e}")))
        };

        Ok(Chain {
            ca: ca::Chain {
                ark: parse(&self.ark, "ARK")?,
                ask: parse(&self.ask, "ASK")?,
            },
            vek: parse(&self.vek, "VCEK")?,
        })
    }
}

/// A source of VCEK certificate chains.
#[async_trait]
pub trait KeyDistribution: Send + Sync + 'static {
    /// Fetches the chain for `key`. One call is one attempt; retrying is up
    /// to the caller.
    async fn fetch_chain(&self, key: &ChainKey) -> Result<RawChain, KdsError>;
}
