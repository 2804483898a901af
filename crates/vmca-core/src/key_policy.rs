//! Public key and CSR signature checks.

use serde::{Deserialize, Serialize};
use tracing::info;
use x509_parser::prelude::*;
use x509_parser::public_key::PublicKey;

use crate::{CaError, Result};

/// Smallest RSA modulus accepted for issued certificates.
pub const DEFAULT_MIN_KEY_BITS: usize = 2048;

/// Largest RSA modulus accepted for issued certificates.
pub const DEFAULT_MAX_KEY_BITS: usize = 16384;

/// Accepted key types and sizes for subject keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPolicy {
    #[serde(default = "default_min_bits")]
    pub min_bits: usize,
    #[serde(default = "default_max_bits")]
    pub max_bits: usize,
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self {
            min_bits: DEFAULT_MIN_KEY_BITS,
            max_bits: DEFAULT_MAX_KEY_BITS,
        }
    }
}

impl KeyPolicy {
    /// Require an RSA key whose modulus length is within bounds.
    ///
    /// Returns the modulus length in bits.
    pub fn validate_public_key(&self, spki: &SubjectPublicKeyInfo<'_>) -> Result<usize> {
        let bits = match spki.parsed() {
            Ok(PublicKey::RSA(rsa)) => rsa.key_size(),
            _ => 0,
        };
        if bits < self.min_bits || bits > self.max_bits {
            info!(bits, min = self.min_bits, max = self.max_bits, "rejecting subject key");
            return Err(CaError::InvalidKeyLength {
                bits,
                min: self.min_bits,
                max: self.max_bits,
            });
        }
        Ok(bits)
    }

    /// Check the CSR's self-signature against its declared public key.
    pub fn verify_csr_signature(&self, csr: &X509CertificationRequest<'_>) -> Result<()> {
        csr.verify_signature()
            .map_err(|e| CaError::InvalidCsrField(format!("csr signature does not verify: {e}")))
    }
}

const fn default_min_bits() -> usize {
    DEFAULT_MIN_KEY_BITS
}

const fn default_max_bits() -> usize {
    DEFAULT_MAX_KEY_BITS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    fn with_csr<T>(pem_text: &str, f: impl FnOnce(&X509CertificationRequest<'_>) -> T) -> T {
        let der = testutil::pem_contents(pem_text);
        let (_, csr) = X509CertificationRequest::from_der(&der).unwrap();
        f(&csr)
    }

    #[test]
    fn test_accepts_rsa_2048() {
        let bits = with_csr(testutil::HOST_CSR_PEM, |csr| {
            KeyPolicy::default()
                .validate_public_key(&csr.certification_request_info.subject_pki)
                .unwrap()
        });
        assert_eq!(bits, 2048);
    }

    #[test]
    fn test_rejects_short_rsa() {
        let err = with_csr(testutil::WEAK_CSR_PEM, |csr| {
            KeyPolicy::default()
                .validate_public_key(&csr.certification_request_info.subject_pki)
                .unwrap_err()
        });
        assert!(matches!(err, CaError::InvalidKeyLength { bits: 1024, .. }));
    }

    #[test]
    fn test_rejects_over_max() {
        let policy = KeyPolicy {
            min_bits: 1024,
            max_bits: 1536,
        };
        let err = with_csr(testutil::HOST_CSR_PEM, |csr| {
            policy
                .validate_public_key(&csr.certification_request_info.subject_pki)
                .unwrap_err()
        });
        assert!(matches!(err, CaError::InvalidKeyLength { bits: 2048, .. }));
    }

    #[test]
    fn test_rejects_ec_key() {
        let csr_pem = testutil::ec_csr("ec.example.com");
        let err = with_csr(&csr_pem, |csr| {
            KeyPolicy::default()
                .validate_public_key(&csr.certification_request_info.subject_pki)
                .unwrap_err()
        });
        assert!(matches!(err, CaError::InvalidKeyLength { bits: 0, .. }));
    }

    #[test]
    fn test_signature_verifies() {
        with_csr(testutil::HOST_CSR_PEM, |csr| {
            KeyPolicy::default().verify_csr_signature(csr).unwrap();
        });
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let tampered = testutil::tamper_last_byte(testutil::HOST_CSR_PEM);
        let err = with_csr(&tampered, |csr| {
            KeyPolicy::default().verify_csr_signature(csr).unwrap_err()
        });
        assert!(matches!(err, CaError::InvalidCsrField(_)));
    }
}
