// SPDX-License-Identifier: Apache-2.0

//! Service configuration.
//!
//! Configuration is a JSON document. Every field except `root_of_trust`
//! has a default:
//!
//! ```json
//! {
//!     "root_of_trust": "/etc/snp-evidence/ark.pem",
//!     "min_tcb": { "bootloader": 3, "tee": 0, "snp": 8, "microcode": 115 },
//!     "policy": { "allow_debug": false },
//!     "retry": { "max_attempts": 4 }
//! }
//! ```

use crate::{
    certs::snp::Certificate,
    error::ConfigError,
    firmware::TcbVersion,
    kds::{CacheLimits, RetryPolicy, KDS_CERT_SITE},
    verify::PolicyExpectations,
    Generation,
};

use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "SNP_EVIDENCE_CONFIG";

/// Default guest device node.
pub const DEFAULT_DEVICE_PATH: &str = "/dev/sev-guest";

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Everything the evidence service needs from its deployment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the key-distribution service.
    #[serde(default = "default_kds_url")]
    pub kds_url: String,

    /// Product line to assume for reports that carry no CPUID.
    #[serde(default)]
    pub product: Option<Generation>,

    /// Per-request HTTP timeout, also bounding endorsement lookups.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// PEM or DER file holding the pinned ARK.
    pub root_of_trust: PathBuf,

    /// Lowest acceptable reported TCB.
    #[serde(default)]
    pub min_tcb: TcbVersion,

    /// Guest policy the deployment expects.
    #[serde(default)]
    pub policy: PolicyExpectations,

    /// Certificate cache bounds.
    #[serde(default)]
    pub cache: CacheLimits,

    /// KDS retry behaviour.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Directory of UVM endorsements, if any.
    #[serde(default)]
    pub endorsements_dir: Option<PathBuf>,

    /// Guest device node.
    #[serde(default = "default_device_path")]
    pub device_path: PathBuf,

    /// VMPL to request reports at.
    #[serde(default)]
    pub vmpl: u32,
}

fn default_kds_url() -> String {
    KDS_CERT_SITE.to_string()
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_device_path() -> PathBuf {
    PathBuf::from(DEFAULT_DEVICE_PATH)
}

impl Config {
    /// A configuration with every default and the given root of trust.
    pub fn new(root_of_trust: impl Into<PathBuf>) -> Self {
        Self {
            kds_url: default_kds_url(),
            product: None,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            root_of_trust: root_of_trust.into(),
            min_tcb: TcbVersion::default(),
            policy: PolicyExpectations::default(),
            cache: CacheLimits::default(),
            retry: RetryPolicy::default(),
            endorsements_dir: None,
            device_path: default_device_path(),
            vmpl: 0,
        }
    }

    /// Parses and validates a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates the file at `path`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_json(&json)
    }

    /// Loads the file named by `SNP_EVIDENCE_CONFIG`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = std::env::var_os(CONFIG_PATH_ENV).ok_or_else(|| {
            ConfigError::Invalid(format!("{CONFIG_PATH_ENV} is not set"))
        })?;
        Self::from_path(PathBuf::from(path))
    }

    /// Checks that the values can drive a service.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.cache.max_entries == 0 {
            return Err(ConfigError::Invalid(
                "cache.max_entries must be at least 1".to_string(),
            ));
        }

        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_ms must be positive".to_string(),
            ));
        }

        if self.kds_url.is_empty() {
            return Err(ConfigError::Invalid("kds_url is empty".to_string()));
        }

        Ok(())
    }

    /// The HTTP request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Reads the pinned ARK.
    pub fn load_root(&self) -> Result<Certificate, ConfigError> {
        let raw = std::fs::read(&self.root_of_trust)
            .map_err(|e| ConfigError::Io(self.root_of_trust.clone(), e))?;

        Certificate::from_bytes(&raw).map_err(|e| {
            ConfigError::RootOfTrust(format!("{}: {e}", self.root_of_trust.display()))
        })
    }
}
