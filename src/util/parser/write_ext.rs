// SPDX-License-Identifier: Apache-2.0
use super::byte_parser::ByteParser;
use std::io::Write;

pub(crate) trait WriteExt: Write {
    /// Writes `SKIP` zeroed reserved bytes, then `value`.
    fn write_bytes<T: ByteParser, const SKIP: usize>(
        &mut self,
        value: T,
    ) -> Result<(), std::io::Error> {
        if SKIP != 0 {
            self.write_all(&[0; SKIP])?;
        }
        self.write_all(value.to_bytes().as_ref())
    }
}

impl<W> WriteExt for W where W: Write {}
