//! The CA handle: certificate, signing key, and anything above it in the chain.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use ::pem::{EncodeConfig, LineEnding};
use rcgen::{Issuer, KeyPair, PublicKeyData};
use x509_parser::prelude::*;

use crate::clock::asn1_to_utc;
use crate::{CaError, Result};

const PEM_CONFIG: EncodeConfig = EncodeConfig::new().set_line_ending(LineEnding::LF);

/// An installed certificate authority.
///
/// Immutable once built; shared between threads behind an `Arc` so a signing
/// call keeps its CA alive even if another thread installs a new one.
pub struct CaHandle {
    issuer: Issuer<'static, KeyPair>,
    cert_pem: String,
    cert_der: Vec<u8>,
    chain: Vec<String>,
    subject: String,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    key_id: Option<Vec<u8>>,
    self_signed: bool,
}

impl CaHandle {
    /// Build a handle from a PEM bundle and the CA's private key.
    ///
    /// The first certificate in the bundle is the CA; any that follow are
    /// kept as its chain. The certificate must be CA-capable, the key must
    /// match it, and the key must sign with SHA-256.
    pub fn from_pem(cert_bundle_pem: &str, key_pem: &str) -> Result<Self> {
        let blocks = ::pem::parse_many(cert_bundle_pem)
            .map_err(|e| CaError::Request(format!("ca certificate pem: {e}")))?;
        let mut certs = blocks.into_iter().filter(|p| p.tag() == "CERTIFICATE");
        let ca_block = certs
            .next()
            .ok_or_else(|| CaError::Request("no certificate in ca pem".into()))?;
        let chain = certs.map(|p| ::pem::encode_config(&p, PEM_CONFIG)).collect();
        let cert_pem = ::pem::encode_config(&ca_block, PEM_CONFIG);
        let cert_der = ca_block.into_contents();

        let (_, cert) = parse_x509_certificate(&cert_der)
            .map_err(|e| CaError::NotCaCertificate(format!("unparseable certificate: {e}")))?;
        let subject = cert.subject().to_string();

        match cert.basic_constraints() {
            Ok(Some(bc)) if bc.value.ca => {}
            _ => return Err(CaError::NotCaCertificate(subject)),
        }

        let key = KeyPair::from_pem(key_pem)
            .map_err(|e| CaError::Ssl(format!("ca private key: {e}")))?;
        if key.subject_public_key_info().as_slice() != cert.public_key().raw {
            return Err(CaError::CertKeyMismatch);
        }
        let alg = key.algorithm();
        if alg != &rcgen::PKCS_RSA_SHA256 && alg != &rcgen::PKCS_ECDSA_P256_SHA256 {
            return Err(CaError::Ssl(format!(
                "ca key algorithm {alg:?} does not sign with sha-256"
            )));
        }

        let validity = cert.validity();
        let not_before = asn1_to_utc(validity.not_before)
            .ok_or_else(|| CaError::NotCaCertificate(format!("{subject}: notBefore out of range")))?;
        let not_after = asn1_to_utc(validity.not_after)
            .ok_or_else(|| CaError::NotCaCertificate(format!("{subject}: notAfter out of range")))?;

        let key_id = cert.extensions().iter().find_map(|ext| match ext.parsed_extension() {
            ParsedExtension::SubjectKeyIdentifier(kid) => Some(kid.0.to_vec()),
            _ => None,
        });
        let self_signed = cert.subject().as_raw() == cert.issuer().as_raw()
            && cert.verify_signature(None).is_ok();

        let issuer = Issuer::from_ca_cert_pem(&cert_pem, key)
            .map_err(|e| CaError::Ssl(format!("ca certificate: {e}")))?;

        Ok(Self {
            issuer,
            cert_pem,
            cert_der,
            chain,
            subject,
            not_before,
            not_after,
            key_id,
            self_signed,
        })
    }

    /// Load the CA from a certificate file and a private key file.
    pub fn from_files(cert_path: &Path, key_path: &Path) -> Result<Self> {
        let cert_pem =
            std::fs::read_to_string(cert_path).map_err(|e| CaError::file_io(cert_path, e))?;
        let key_pem =
            std::fs::read_to_string(key_path).map_err(|e| CaError::file_io(key_path, e))?;
        Self::from_pem(&cert_pem, &key_pem)
    }

    /// Signing identity used for certificates and CRLs.
    pub const fn issuer(&self) -> &Issuer<'static, KeyPair> {
        &self.issuer
    }

    /// The CA certificate alone, PEM encoded.
    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn cert_der(&self) -> &[u8] {
        &self.cert_der
    }

    /// The CA certificate followed by the rest of its chain.
    pub fn bundle_pem(&self) -> String {
        std::iter::once(self.cert_pem.as_str())
            .chain(self.chain.iter().map(String::as_str))
            .collect()
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub const fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub const fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// Subject key identifier of the CA certificate, if it has one.
    pub fn key_id(&self) -> Option<&[u8]> {
        self.key_id.as_deref()
    }

    /// `false` for an intermediate, whose issued certificates carry the CA
    /// certificate as a chain.
    pub const fn is_self_signed(&self) -> bool {
        self.self_signed
    }

    /// Whether `cert_der` names this CA as issuer and carries its signature.
    pub fn verify_issued(&self, cert_der: &[u8]) -> Result<bool> {
        let (_, ca) = parse_x509_certificate(&self.cert_der)
            .map_err(|e| CaError::Ssl(format!("ca certificate: {e}")))?;
        let (_, leaf) = parse_x509_certificate(cert_der)
            .map_err(|e| CaError::Request(format!("certificate: {e}")))?;
        Ok(leaf.issuer().as_raw() == ca.subject().as_raw()
            && leaf.verify_signature(Some(ca.public_key())).is_ok())
    }
}

impl fmt::Debug for CaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaHandle")
            .field("subject", &self.subject)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .field("self_signed", &self.self_signed)
            .field("chain_len", &self.chain.len())
            .finish_non_exhaustive()
    }
}
