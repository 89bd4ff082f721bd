// SPDX-License-Identifier: Apache-2.0

use super::*;

use crate::firmware::TcbVersion;

use openssl::pkey::{PKey, Public};
use x509_cert::der::{asn1::ObjectIdentifier, Decode};

// AMD VCEK extensions, table 8 of the VCEK certificate and KDS interface
// specification (AMD #57230).
const PRODUCT_NAME_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.4.1.3704.1.2");
const BL_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.4.1.3704.1.3.1");
const TEE_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.4.1.3704.1.3.2");
const SNP_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.4.1.3704.1.3.3");
const UCODE_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.4.1.3704.1.3.8");
const FMC_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.4.1.3704.1.3.9");
const HW_ID_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.4.1.3704.1.4");

/// An X.509 certificate of the SEV-SNP endorsement hierarchy.
#[derive(Clone, Debug)]
pub struct Certificate(X509);

/// The chip and TCB a versioned endorsement key certificate was issued for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VekIdentity {
    /// The hardware ID. Absent on VLEK certificates.
    pub hw_id: Option<[u8; 64]>,

    /// The TCB the key was derived from.
    pub tcb: TcbVersion,

    /// The product name extension, if present.
    pub product: Option<String>,
}

/// Wrap an X509 struct into a Certificate.
impl From<X509> for Certificate {
    fn from(x509: X509) -> Self {
        Self(x509)
    }
}

/// Unwrap the underlying X509 struct from a Certificate.
impl From<Certificate> for X509 {
    fn from(cert: Certificate) -> Self {
        cert.0
    }
}

/// Clone the underlying X509 structure from a reference to a Certificate.
impl From<&Certificate> for X509 {
    fn from(cert: &Certificate) -> Self {
        cert.0.clone()
    }
}

/// Verify if the public key of one Certificate signs another Certificate.
impl Verifiable for (&Certificate, &Certificate) {
    type Output = ();

    fn verify(self) -> Result<Self::Output> {
        let key: PKey<Public> = self.0.public_key()?;
        let signed = self.1 .0.verify(&key)?;

        match signed {
            true => Ok(()),
            false => Err(Error::new(
                ErrorKind::Other,
                "Signer certificate does not sign signee certificate",
            )),
        }
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        matches!((self.to_der(), other.to_der()), (Ok(a), Ok(b)) if a == b)
    }
}

impl Certificate {
    /// Create a Certificate from a PEM-encoded X509 structure.
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        Ok(Self(X509::from_pem(pem)?))
    }

    /// Create a Certificate from a DER-encoded X509 structure.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        Ok(Self(X509::from_der(der)?))
    }

    /// Create a Certificate from either encoding.
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.trim_ascii_start().starts_with(b"-----BEGIN") {
            Self::from_pem(raw)
        } else {
            Self::from_der(raw)
        }
    }

    /// DER encoding of the certificate.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        Ok(self.0.to_der()?)
    }

    /// PEM encoding of the certificate.
    pub fn to_pem(&self) -> Result<Vec<u8>> {
        Ok(self.0.to_pem()?)
    }

    /// Retrieve the underlying X509 public key for a Certificate.
    pub fn public_key(&self) -> Result<PKey<Public>> {
        Ok(self.0.public_key()?)
    }

    /// Reads the chip identity and TCB from the AMD certificate extensions.
    pub fn identity(&self) -> Result<VekIdentity> {
        let der = self.to_der()?;
        let cert = x509_cert::Certificate::from_der(&der).map_err(|e| {
            Error::new(ErrorKind::InvalidData, format!("unable to decode X.509: {e}"))
        })?;

        let extensions = cert
            .tbs_certificate
            .extensions
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::InvalidData, "certificate has no extensions"))?;

        let mut hw_id = None;
        let mut product = None;
        let mut bootloader = None;
        let mut tee = None;
        let mut snp = None;
        let mut microcode = None;
        let mut fmc = None;

        for ext in extensions {
            let value = ext.extn_value.as_bytes();

            if ext.extn_id == HW_ID_OID {
                hw_id = Some(hw_id_bytes(value)?);
            } else if ext.extn_id == PRODUCT_NAME_OID {
                product = Some(String::from_utf8_lossy(value).into_owned());
            } else if ext.extn_id == BL_OID {
                bootloader = Some(spl_byte(value, "blSPL")?);
            } else if ext.extn_id == TEE_OID {
                tee = Some(spl_byte(value, "teeSPL")?);
            } else if ext.extn_id == SNP_OID {
                snp = Some(spl_byte(value, "snpSPL")?);
            } else if ext.extn_id == UCODE_OID {
                microcode = Some(spl_byte(value, "ucodeSPL")?);
            } else if ext.extn_id == FMC_OID {
                fmc = Some(spl_byte(value, "fmcSPL")?);
            }
        }

        let missing = |name: &str| {
            Error::new(
                ErrorKind::InvalidData,
                format!("certificate has no {name} extension"),
            )
        };

        Ok(VekIdentity {
            hw_id,
            tcb: TcbVersion {
                fmc,
                bootloader: bootloader.ok_or_else(|| missing("blSPL"))?,
                tee: tee.ok_or_else(|| missing("teeSPL"))?,
                snp: snp.ok_or_else(|| missing("snpSPL"))?,
                microcode: microcode.ok_or_else(|| missing("ucodeSPL"))?,
            },
            product,
        })
    }
}

/// The hwID extension is either the raw bytes or a DER OCTET STRING
/// wrapping them. Turin certificates carry 8 bytes, which map onto the
/// zero-padded chip id of Turin reports.
fn hw_id_bytes(value: &[u8]) -> Result<[u8; 64]> {
    let raw = match value {
        [0x04, len, rest @ ..] if *len as usize == rest.len() && matches!(rest.len(), 8 | 64) => {
            rest
        }
        _ if matches!(value.len(), 8 | 64) => value,
        _ => {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("hwID extension has unexpected length {}", value.len()),
            ))
        }
    };

    let mut hw_id = [0u8; 64];
    hw_id[..raw.len()].copy_from_slice(raw);
    Ok(hw_id)
}

/// SPL extensions are DER INTEGERs whose value fits in one byte.
fn spl_byte(value: &[u8], name: &str) -> Result<u8> {
    match value {
        [0x02, len, body @ ..] if *len as usize == body.len() && !body.is_empty() => {
            let (last, leading) = body.split_last().ok_or_else(|| {
                Error::new(ErrorKind::InvalidData, format!("{name} is empty"))
            })?;
            if leading.iter().any(|b| *b != 0) {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("{name} does not fit in one byte"),
                ));
            }
            Ok(*last)
        }
        _ => Err(Error::new(
            ErrorKind::InvalidData,
            format!("{name} is not a DER INTEGER"),
        )),
    }
}
