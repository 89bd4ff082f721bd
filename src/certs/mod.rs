// SPDX-License-Identifier: Apache-2.0

/// SEV-SNP certificates.
pub mod snp;
