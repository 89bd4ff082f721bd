// SPDX-License-Identifier: Apache-2.0

pub(crate) mod ioctl;
pub(crate) mod types;
