// SPDX-License-Identifier: Apache-2.0

/// ECDSA signatures.
pub mod ecdsa;

/// Certificate Authority (CA) certificates.
pub mod ca;

mod cert;
mod chain;

pub use cert::{Certificate, VekIdentity};
pub use chain::Chain;

use std::io::{Error, ErrorKind, Result};

use openssl::x509::X509;

/// An interface for types that may contain entities such as
/// signatures that must be verified.
pub trait Verifiable {
    /// An output type for successful verification.
    type Output;

    /// Self-verifies signatures.
    fn verify(self) -> Result<Self::Output>;
}

pub(crate) trait FromLe: Sized {
    fn from_le(value: &[u8]) -> Result<Self>;
}

pub(crate) trait AsLeBytes<T> {
    fn as_le_bytes(&self) -> T;
}

impl FromLe for openssl::bn::BigNum {
    #[inline]
    fn from_le(value: &[u8]) -> Result<Self> {
        Ok(Self::from_slice(
            &value.iter().rev().cloned().collect::<Vec<_>>(),
        )?)
    }
}

impl AsLeBytes<[u8; 72]> for openssl::bn::BigNumRef {
    fn as_le_bytes(&self) -> [u8; 72] {
        let mut buf = [0u8; 72];

        for (i, b) in self.to_vec().into_iter().rev().enumerate().take(72) {
            buf[i] = b;
        }

        buf
    }
}
