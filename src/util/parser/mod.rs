// SPDX-License-Identifier: Apache-2.0

mod byte_parser;

mod read_ext;

mod write_ext;

pub(crate) use byte_parser::ByteParser;

pub(crate) use read_ext::ReadExt;

pub(crate) use write_ext::WriteExt;
