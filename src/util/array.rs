// SPDX-License-Identifier: Apache-2.0

//! Fixed-size byte fields (digests, identifiers) of the attestation report.

use crate::{error::ArrayError, util::parser::ByteParser};

use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use std::{
    convert::{TryFrom, TryInto},
    fmt::{Debug, LowerHex, UpperHex},
    ops::{Deref, DerefMut},
};

/// A byte array of any length that serializes as a hex string and
/// prints as a hexdump.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Array<const N: usize>(pub [u8; N]);

impl<const N: usize> Array<N> {
    /// Whether every byte is zero.
    pub fn is_zeroed(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl<const N: usize> Debug for Array<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Array<{N}>({self:x})")
    }
}

impl<const N: usize> LowerHex for Array<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for byte in self.0.iter() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl<const N: usize> UpperHex for Array<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for byte in self.0.iter() {
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

impl<const N: usize> std::fmt::Display for Array<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f)?;
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 && i % 16 == 0 {
                writeln!(f)?;
            } else if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

impl<const N: usize> Serialize for Array<N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de, const N: usize> Deserialize<'de> for Array<N> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(encoded).map_err(D::Error::custom)?;
        Array::try_from(bytes).map_err(D::Error::custom)
    }
}

impl<const N: usize> ByteParser for Array<N> {
    type Bytes = [u8; N];

    #[inline]
    fn from_bytes(bytes: Self::Bytes) -> Self {
        Self(bytes)
    }

    #[inline]
    fn to_bytes(&self) -> Self::Bytes {
        self.0
    }

    #[inline]
    fn zeroed() -> Self {
        Self([0; N])
    }
}

impl<const N: usize> Default for Array<N> {
    fn default() -> Self {
        Self([0; N])
    }
}

impl<const N: usize> From<[u8; N]> for Array<N> {
    fn from(array: [u8; N]) -> Self {
        Array(array)
    }
}

impl<const N: usize> TryFrom<Vec<u8>> for Array<N> {
    type Error = ArrayError;

    fn try_from(vec: Vec<u8>) -> Result<Self, Self::Error> {
        let len = vec.len();
        Ok(Array(vec.try_into().map_err(|_| {
            ArrayError::VectorError(format!("expected {N} bytes, got {len}"))
        })?))
    }
}

impl<const N: usize> TryFrom<&[u8]> for Array<N> {
    type Error = ArrayError;

    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        Ok(Array(slice.try_into()?))
    }
}

impl<const N: usize> AsRef<[u8]> for Array<N> {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl<const N: usize> Deref for Array<N> {
    type Target = [u8; N];

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<const N: usize> DerefMut for Array<N> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}
