// SPDX-License-Identifier: Apache-2.0

//! Helpful primitives for developing the crate.

pub mod array;
pub(crate) mod parser;
