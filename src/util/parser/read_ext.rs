// SPDX-License-Identifier: Apache-2.0
use super::byte_parser::ByteParser;
use std::io::Read;

pub(crate) trait ReadExt {
    /// Skips `SKIP` reserved bytes, then reads one `T`.
    ///
    /// Reserved bytes are not interpreted: they are covered by the report
    /// signature, so any tampering surfaces there.
    fn parse_bytes<T, const SKIP: usize>(&mut self) -> Result<T, std::io::Error>
    where
        T: ByteParser;
}

impl<R> ReadExt for R
where
    R: Read,
{
    #[inline(always)]
    fn parse_bytes<T, const SKIP: usize>(&mut self) -> Result<T, std::io::Error>
    where
        T: ByteParser,
    {
        if SKIP != 0 {
            let mut skipped_bytes = [0; SKIP];
            self.read_exact(&mut skipped_bytes)?;
        }

        let mut bytes = T::zeroed().to_bytes();
        self.read_exact(bytes.as_mut())?;
        Ok(T::from_bytes(bytes))
    }
}
