// SPDX-License-Identifier: Apache-2.0

use super::{AsLeBytes, FromLe};

use crate::util::{array::Array, parser::ByteParser};

use serde::{Deserialize, Serialize};

use openssl::{bn, ecdsa};
use std::io::Result;

/// ECDSA P-384 signature as laid out in the attestation report: `r` and `s`
/// little-endian, each zero-padded to 72 bytes, followed by 368 reserved
/// bytes.
#[repr(C)]
#[derive(Default, Copy, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Signature {
    r: Array<72>,

    s: Array<72>,
}

impl Signature {
    /// Creates a new signature from the values specified
    pub fn new(r: Array<72>, s: Array<72>) -> Self {
        Self { r, s }
    }

    /// Returns the signatures `r` component
    pub fn r(&self) -> &[u8; 72] {
        &self.r
    }

    /// Returns the signatures `s` component
    pub fn s(&self) -> &[u8; 72] {
        &self.s
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Signature {{ r: {:x}, s: {:x} }}", self.r, self.s)
    }
}

impl ByteParser for Signature {
    type Bytes = [u8; 512];

    #[inline(always)]
    fn from_bytes(bytes: Self::Bytes) -> Self {
        let mut r = [0; 72];
        let mut s = [0; 72];
        r.copy_from_slice(&bytes[0..72]);
        s.copy_from_slice(&bytes[72..144]);

        Self::new(Array(r), Array(s))
    }

    #[inline(always)]
    fn to_bytes(&self) -> Self::Bytes {
        let mut bytes = [0u8; 512];
        bytes[0..72].copy_from_slice(&*self.r);
        bytes[72..144].copy_from_slice(&*self.s);
        bytes
    }

    #[inline(always)]
    fn zeroed() -> Self {
        Default::default()
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            r#"Signature:
  R:{}
  S:{}"#,
            self.r, self.s
        )
    }
}

impl From<ecdsa::EcdsaSig> for Signature {
    #[inline]
    fn from(value: ecdsa::EcdsaSig) -> Self {
        Signature {
            r: Array(value.r().as_le_bytes()),
            s: Array(value.s().as_le_bytes()),
        }
    }
}

impl TryFrom<&Signature> for ecdsa::EcdsaSig {
    type Error = std::io::Error;

    #[inline]
    fn try_from(value: &Signature) -> Result<Self> {
        let r = bn::BigNum::from_le(&*value.r)?;
        let s = bn::BigNum::from_le(&*value.s)?;
        Ok(ecdsa::EcdsaSig::from_private_components(r, s)?)
    }
}
