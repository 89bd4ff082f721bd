// SPDX-License-Identifier: Apache-2.0

use super::*;

/// A Certificate Authority (CA) chain.
#[derive(Clone, Debug, PartialEq)]
pub struct Chain {
    /// AMD Root Key certificate.
    pub ark: Certificate,

    /// AMD Signing Key certificate.
    pub ask: Certificate,
}

/// Verify if a CA chain's ARK is self-signed, along with if the ARK signs the ASK.
impl<'a> Verifiable for &'a Chain {
    type Output = &'a Certificate;

    fn verify(self) -> Result<Self::Output> {
        // Verify that ARK is self-signed.
        (&self.ark, &self.ark).verify()?;

        // Verify that ARK signs ASK.
        (&self.ark, &self.ask).verify()?;

        Ok(&self.ask)
    }
}

impl Chain {
    /// Splits the KDS `cert_chain` document, PEM `ASK` followed by PEM `ARK`.
    pub fn from_kds_pem(pem: &[u8]) -> Result<Self> {
        let mut stack = X509::stack_from_pem(pem)?.into_iter();

        match (stack.next(), stack.next(), stack.next()) {
            (Some(ask), Some(ark), None) => Ok(Self {
                ark: ark.into(),
                ask: ask.into(),
            }),
            _ => Err(Error::new(
                ErrorKind::InvalidData,
                "expected exactly two certificates (ASK, ARK)",
            )),
        }
    }
}
