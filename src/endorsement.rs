// SPDX-License-Identifier: Apache-2.0

//! UVM endorsements: signed statements binding a launch measurement to an
//! approved guest image and security policy.
//!
//! Endorsements are opaque to this crate. They are looked up by the
//! measurement digest and cached once found, within the same size and age
//! bounds as the chain cache; a missing endorsement is never cached.

use crate::{error::EndorsementError, kds::CacheLimits, util::array::Array};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use log::debug;
use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError, RwLock},
    time::Duration,
};
use tokio::time::Instant;

/// Length of a launch measurement digest.
pub const MEASUREMENT_LEN: usize = 48;

/// File name suffix marking a base64 encoded statement.
pub const BASE64_SUFFIX: &str = ".b64";

/// A signed statement about one launch measurement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UvmEndorsement {
    /// The measurement the statement is about.
    pub measurement: Array<MEASUREMENT_LEN>,

    /// The statement, exactly as the source stored it.
    pub statement: Vec<u8>,
}

/// Where endorsements come from.
#[async_trait]
pub trait EndorsementSource: Send + Sync + 'static {
    /// Returns the statement for `measurement`, or `None` if the source has
    /// none.
    async fn lookup(
        &self,
        measurement: &[u8; MEASUREMENT_LEN],
    ) -> Result<Option<Vec<u8>>, EndorsementError>;
}

/// Endorsements held in memory.
#[derive(Debug, Default)]
pub struct MemoryEndorsements {
    statements: RwLock<HashMap<[u8; MEASUREMENT_LEN], Vec<u8>>>,
}

impl MemoryEndorsements {
    /// An empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `statement` for `measurement`, replacing any earlier one.
    pub fn insert(&self, measurement: [u8; MEASUREMENT_LEN], statement: Vec<u8>) {
        self.statements
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(measurement, statement);
    }
}

#[async_trait]
impl EndorsementSource for MemoryEndorsements {
    async fn lookup(
        &self,
        measurement: &[u8; MEASUREMENT_LEN],
    ) -> Result<Option<Vec<u8>>, EndorsementError> {
        Ok(self
            .statements
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(measurement)
            .cloned())
    }
}

/// Endorsements stored one per file, named by the lowercase hex
/// measurement. `{hex}` holds the statement raw; `{hex}.b64` holds it base64
/// encoded. The raw file wins when both exist.
#[derive(Clone, Debug)]
pub struct DirectoryEndorsements {
    dir: PathBuf,
}

impl DirectoryEndorsements {
    /// A source reading from `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, measurement: &[u8; MEASUREMENT_LEN], suffix: &str) -> PathBuf {
        self.dir.join(format!("{}{suffix}", hex::encode(measurement)))
    }
}

async fn read_if_present(path: &Path) -> Result<Option<Vec<u8>>, EndorsementError> {
    match tokio::fs::read(path).await {
        Ok(contents) if contents.trim_ascii().is_empty() => Err(EndorsementError::Decode(
            format!("{} is empty", path.display()),
        )),
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl EndorsementSource for DirectoryEndorsements {
    async fn lookup(
        &self,
        measurement: &[u8; MEASUREMENT_LEN],
    ) -> Result<Option<Vec<u8>>, EndorsementError> {
        if let Some(raw) = read_if_present(&self.path_for(measurement, "")).await? {
            return Ok(Some(raw));
        }

        let path = self.path_for(measurement, BASE64_SUFFIX);
        match read_if_present(&path).await? {
            Some(encoded) => STANDARD
                .decode(encoded.trim_ascii())
                .map(Some)
                .map_err(|e| EndorsementError::Decode(format!("{}: {e}", path.display()))),
            None => Ok(None),
        }
    }
}

struct FoundEntry {
    endorsement: Arc<UvmEndorsement>,
    inserted_at: Instant,
    last_used: Instant,
}

/// Looks up endorsements and keeps the ones it found, within
/// [`CacheLimits`].
#[derive(Clone)]
pub struct EndorsementProvider {
    source: Arc<dyn EndorsementSource>,
    timeout: Option<Duration>,
    limits: CacheLimits,
    found: Arc<Mutex<HashMap<[u8; MEASUREMENT_LEN], FoundEntry>>>,
}

impl EndorsementProvider {
    /// A provider over `source` with the default cache limits.
    pub fn new(source: Arc<dyn EndorsementSource>) -> Self {
        Self {
            source,
            timeout: None,
            limits: CacheLimits::default(),
            found: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Gives up on lookups that take longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Bounds the cache of found endorsements.
    pub fn with_limits(mut self, limits: CacheLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Number of cached endorsements, expired ones included until next
    /// touched.
    pub fn cached(&self) -> usize {
        self.found
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns the endorsement for `measurement`.
    pub async fn get_endorsement(
        &self,
        measurement: &[u8; MEASUREMENT_LEN],
    ) -> Result<Arc<UvmEndorsement>, EndorsementError> {
        if let Some(found) = self.cached_endorsement(measurement) {
            debug!("UVM endorsement cache hit for {}", hex::encode(measurement));
            return Ok(found);
        }

        let lookup = self.source.lookup(measurement);
        let statement = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, lookup).await.map_err(|_| {
                EndorsementError::Io(std::io::Error::new(
                    ErrorKind::TimedOut,
                    format!("endorsement lookup exceeded {timeout:?}"),
                ))
            })??,
            None => lookup.await?,
        };

        let statement =
            statement.ok_or_else(|| EndorsementError::NotFound(hex::encode(measurement)))?;

        let endorsement = Arc::new(UvmEndorsement {
            measurement: Array(*measurement),
            statement,
        });
        self.remember(*measurement, Arc::clone(&endorsement));

        Ok(endorsement)
    }

    fn cached_endorsement(
        &self,
        measurement: &[u8; MEASUREMENT_LEN],
    ) -> Option<Arc<UvmEndorsement>> {
        let mut found = self.found.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();

        let entry = found.get_mut(measurement)?;
        if now.duration_since(entry.inserted_at) >= self.max_age() {
            found.remove(measurement);
            return None;
        }

        entry.last_used = now;
        Some(Arc::clone(&entry.endorsement))
    }

    fn remember(&self, measurement: [u8; MEASUREMENT_LEN], endorsement: Arc<UvmEndorsement>) {
        let mut found = self.found.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let max_age = self.max_age();

        found.retain(|_, entry| now.duration_since(entry.inserted_at) < max_age);
        while found.len() >= self.limits.max_entries && !found.contains_key(&measurement) {
            let Some(oldest) = found
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| *key)
            else {
                break;
            };
            debug!("evicting UVM endorsement for {}", hex::encode(oldest));
            found.remove(&oldest);
        }

        found.insert(
            measurement,
            FoundEntry {
                endorsement,
                inserted_at: now,
                last_used: now,
            },
        );
    }

    fn max_age(&self) -> Duration {
        Duration::from_secs(self.limits.max_age_secs)
    }
}
