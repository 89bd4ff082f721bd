// SPDX-License-Identifier: Apache-2.0

use super::{ChainKey, KeyDistribution, RawChain};

use crate::{
    certs::snp::{ca, Certificate},
    error::KdsError,
    Generation,
};

use async_trait::async_trait;
use log::debug;
use reqwest::StatusCode;
use std::time::Duration;

/// Default KDS endpoint.
pub const KDS_CERT_SITE: &str = "https://kdsintf.amd.com";

const KDS_VCEK: &str = "/vcek/v1";
const KDS_CERT_CHAIN: &str = "cert_chain";

/// HTTPS client for the AMD Key Distribution Service.
#[derive(Clone, Debug)]
pub struct KdsClient {
    base_url: String,
    client: reqwest::Client,
}

impl KdsClient {
    /// A client for `base_url` whose requests give up after `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, KdsError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KdsError::Malformed(format!("unable to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// URL of the VCEK for `key`.
    pub fn vcek_url(&self, key: &ChainKey) -> String {
        let tcb = &key.tcb;
        let hw_id = key.hw_id_hex();
        let product = key.generation.titlecase();

        match (key.generation, tcb.fmc) {
            (Generation::Turin, Some(fmc)) => format!(
                "{}{KDS_VCEK}/{product}/{hw_id}?fmcSPL={fmc:02}&blSPL={:02}&teeSPL={:02}&snpSPL={:02}&ucodeSPL={:02}",
                self.base_url, tcb.bootloader, tcb.tee, tcb.snp, tcb.microcode
            ),
            _ => format!(
                "{}{KDS_VCEK}/{product}/{hw_id}?blSPL={:02}&teeSPL={:02}&snpSPL={:02}&ucodeSPL={:02}",
                self.base_url, tcb.bootloader, tcb.tee, tcb.snp, tcb.microcode
            ),
        }
    }

    /// URL of the ASK/ARK chain for `generation`.
    pub fn ca_url(&self, generation: Generation) -> String {
        format!(
            "{}{KDS_VCEK}/{}/{KDS_CERT_CHAIN}",
            self.base_url,
            generation.titlecase()
        )
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>, KdsError> {
        debug!("GET {url}");

        let rsp = self.client.get(url).send().await.map_err(|e| {
            if e.is_builder() {
                KdsError::Malformed(format!("invalid request {url}: {e}"))
            } else {
                KdsError::Transient {
                    status: None,
                    message: e.to_string(),
                }
            }
        })?;

        classify(rsp.status(), url)?;

        let body = rsp.bytes().await.map_err(|e| KdsError::Transient {
            status: None,
            message: format!("reading response body: {e}"),
        })?;

        Ok(body.to_vec())
    }
}

/// Maps an HTTP status onto the retry taxonomy.
fn classify(status: StatusCode, url: &str) -> Result<(), KdsError> {
    if status.is_success() {
        return Ok(());
    }

    Err(match status {
        StatusCode::NOT_FOUND => KdsError::NotFound(url.to_string()),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => KdsError::Transient {
            status: Some(status.as_u16()),
            message: url.to_string(),
        },
        s if s.is_server_error() => KdsError::Transient {
            status: Some(s.as_u16()),
            message: url.to_string(),
        },
        s => KdsError::Rejected {
            status: s.as_u16(),
            message: url.to_string(),
        },
    })
}

#[async_trait]
impl KeyDistribution for KdsClient {
    async fn fetch_chain(&self, key: &ChainKey) -> Result<RawChain, KdsError> {
        let vek = self.get(&self.vcek_url(key)).await?;

        let pem = self.get(&self.ca_url(key.generation)).await?;
        let ca = ca::Chain::from_kds_pem(&pem)
            .map_err(|e| KdsError::Malformed(format!("cert_chain: {e}")))?;
        let to_der = |cert: &Certificate| {
            cert.to_der()
                .map_err(|e| KdsError::Malformed(format!("cert_chain: {e}")))
        };

        Ok(RawChain {
            vek,
            ask: to_der(&ca.ask)?,
            ark: to_der(&ca.ark)?,
        })
    }
}
