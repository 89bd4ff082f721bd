// SPDX-License-Identifier: Apache-2.0

/// A fixed-width little-endian field of the attestation report.
pub trait ByteParser: Sized {
    type Bytes: AsRef<[u8]> + AsMut<[u8]>;

    fn from_bytes(bytes: Self::Bytes) -> Self;

    fn to_bytes(&self) -> Self::Bytes;

    /// An all-zero value, used as the read buffer.
    fn zeroed() -> Self;
}

impl<const N: usize> ByteParser for [u8; N] {
    type Bytes = [u8; N];

    #[inline(always)]
    fn from_bytes(bytes: Self::Bytes) -> Self {
        bytes
    }

    #[inline(always)]
    fn to_bytes(&self) -> Self::Bytes {
        *self
    }

    #[inline(always)]
    fn zeroed() -> Self {
        [0u8; N]
    }
}

macro_rules! impl_byte_parser
{
    ($($t:ty), *) => {
        $(
            impl ByteParser for $t {
                type Bytes = [u8; std::mem::size_of::<$t>()];

                #[inline(always)]
                fn from_bytes(bytes: Self::Bytes) -> Self {
                    <$t>::from_le_bytes(bytes)
                }

                #[inline(always)]
                fn to_bytes(&self) -> Self::Bytes {
                    <$t>::to_le_bytes(*self)
                }

                #[inline(always)]
                fn zeroed() -> Self {
                    0
                }
            }
        )*
    };
}

impl_byte_parser!(u8, u16, u32, u64);
