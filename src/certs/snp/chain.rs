// SPDX-License-Identifier: Apache-2.0

use super::*;

/// A complete SEV-SNP certificate chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Chain {
    /// The Certificate Authority (CA) chain.
    pub ca: ca::Chain,

    /// The Versioned Chip Endorsement Key or Versioned Loaded Endorsement Key.
    pub vek: Certificate,
}

impl<'a> Verifiable for &'a Chain {
    type Output = &'a Certificate;

    fn verify(self) -> Result<Self::Output> {
        // Verify that ARK is self-signed and ARK signs ASK.
        let ask = self.ca.verify()?;

        // Verify that ASK signs VCEK.
        (ask, &self.vek).verify()?;

        Ok(&self.vek)
    }
}

impl Chain {
    /// DER encodings in bundle order: leaf, intermediate, root.
    pub fn to_der_list(&self) -> Result<Vec<Vec<u8>>> {
        Ok(vec![
            self.vek.to_der()?,
            self.ca.ask.to_der()?,
            self.ca.ark.to_der()?,
        ])
    }

    /// Inverse of [`Chain::to_der_list`]. Entries may be DER or PEM.
    pub fn from_der_list<T: AsRef<[u8]>>(certs: &[T]) -> Result<Self> {
        match certs {
            [vek, ask, ark] => Ok(Self {
                ca: ca::Chain {
                    ark: Certificate::from_bytes(ark.as_ref())?,
                    ask: Certificate::from_bytes(ask.as_ref())?,
                },
                vek: Certificate::from_bytes(vek.as_ref())?,
            }),
            _ => Err(Error::new(
                ErrorKind::InvalidData,
                format!(
                    "expected three certificates (VEK, ASK, ARK), got {}",
                    certs.len()
                ),
            )),
        }
    }
}
