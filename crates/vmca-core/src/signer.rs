//! Turns a PEM CSR into a CA-signed certificate.

use chrono::{DateTime, Utc};
use rand::Rng;
use rcgen::string::{Ia5String, PrintableString};
use rcgen::{CertificateParams, DistinguishedName, DnType, DnValue, SerialNumber, SubjectPublicKeyInfo};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use x509_parser::der_parser::asn1_rs::Tag;
use x509_parser::prelude::*;

use crate::ca::CaHandle;
use crate::clock::{to_offset, CertificateClock};
use crate::extensions::ExtensionPolicy;
use crate::key_policy::KeyPolicy;
use crate::{CaError, Result};

const CSR_PEM_TAGS: &[&str] = &["CERTIFICATE REQUEST", "NEW CERTIFICATE REQUEST"];

/// A freshly issued certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedCertificate {
    /// Leaf PEM, followed by the CA certificate when the CA is an intermediate.
    pub pem: String,
    /// Leaf certificate only.
    pub der: Vec<u8>,
    /// Upper-case hex serial, no separators.
    pub serial_hex: String,
    pub subject: String,
    pub issuer: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

/// Issues certificates under the clock, key and extension policies.
///
/// Does no locking of its own. Callers pass a CA handle they already hold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateSigner {
    #[serde(default)]
    pub clock: CertificateClock,
    #[serde(default)]
    pub keys: KeyPolicy,
    #[serde(default)]
    pub extensions: ExtensionPolicy,
}

impl CertificateSigner {
    pub const fn new(clock: CertificateClock, keys: KeyPolicy, extensions: ExtensionPolicy) -> Self {
        Self {
            clock,
            keys,
            extensions,
        }
    }

    /// Sign `csr_pem` for the requested window.
    pub fn sign(
        &self,
        ca: &CaHandle,
        csr_pem: &str,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) -> Result<IssuedCertificate> {
        self.sign_at(ca, csr_pem, not_before, not_after, Utc::now())
    }

    /// [`sign`](Self::sign) against an explicit "now".
    pub fn sign_at(
        &self,
        ca: &CaHandle,
        csr_pem: &str,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<IssuedCertificate> {
        let csr_der = decode_csr_pem(csr_pem)?;
        let (_, csr) = X509CertificationRequest::from_der(&csr_der)
            .map_err(|e| CaError::Request(format!("csr decode: {e}")))?;
        let info = &csr.certification_request_info;

        if info.subject.iter_attributes().next().is_none() {
            return Err(CaError::InvalidCsrField("subject name is empty".into()));
        }
        if info.subject_pki.subject_public_key.data.is_empty() {
            return Err(CaError::InvalidCsrField("public key is missing".into()));
        }

        self.keys.validate_public_key(&info.subject_pki)?;
        self.keys.verify_csr_signature(&csr)?;

        let validity =
            self.clock
                .clamp_validity(ca.not_before(), ca.not_after(), not_before, not_after, now)?;

        let serial = random_serial();
        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(&info.subject)?;
        params.serial_number = Some(SerialNumber::from_slice(&serial));
        params.not_before = to_offset(validity.not_before)?;
        params.not_after = to_offset(validity.not_after)?;

        self.extensions.copy_extensions(&mut params, &csr)?;
        self.extensions.reject_unsafe_usage(&params)?;
        self.extensions
            .verify_names(&info.subject, &params.subject_alt_names)?;

        let public_key = SubjectPublicKeyInfo::from_der(info.subject_pki.raw)
            .map_err(|e| CaError::Request(format!("subject public key: {e}")))?;
        let cert = params.signed_by(&public_key, ca.issuer())?;

        let leaf_pem = cert.pem();
        let pem = if ca.is_self_signed() {
            leaf_pem
        } else {
            format!("{leaf_pem}\n{}", ca.cert_pem())
        };
        let serial_hex = hex::encode_upper(serial);
        info!(
            serial = %serial_hex,
            subject = %info.subject,
            not_after = %validity.not_after,
            "issued certificate"
        );

        Ok(IssuedCertificate {
            pem,
            der: cert.der().to_vec(),
            serial_hex,
            subject: info.subject.to_string(),
            issuer: ca.subject().to_string(),
            not_before: validity.not_before,
            not_after: validity.not_after,
        })
    }
}

fn decode_csr_pem(csr_pem: &str) -> Result<Vec<u8>> {
    let block = ::pem::parse(csr_pem).map_err(|e| CaError::Request(format!("csr pem: {e}")))?;
    if !CSR_PEM_TAGS.contains(&block.tag()) {
        return Err(CaError::Request(format!(
            "expected a certificate request, found {}",
            block.tag()
        )));
    }
    Ok(block.into_contents())
}

/// 64-bit random serial, positive and without a leading zero byte.
fn random_serial() -> [u8; 8] {
    let mut serial = [0u8; 8];
    rand::thread_rng().fill(&mut serial);
    serial[0] = (serial[0] & 0x7f) | 0x40;
    serial
}

/// Copy the CSR subject, keeping the string type of each attribute.
fn distinguished_name(subject: &X509Name<'_>) -> Result<DistinguishedName> {
    let mut dn = DistinguishedName::new();
    for attr in subject.iter_attributes() {
        let oid: Vec<u64> = attr
            .attr_type()
            .iter()
            .map(Iterator::collect)
            .ok_or_else(|| CaError::InvalidCsrField(format!("subject oid {}", attr.attr_type())))?;
        let text = attr
            .as_str()
            .map_err(|e| CaError::InvalidCsrField(format!("subject attribute {}: {e}", attr.attr_type())))?;
        let value = match attr.attr_value().header.tag() {
            Tag::PrintableString => PrintableString::try_from(text).map(DnValue::PrintableString),
            Tag::Ia5String => Ia5String::try_from(text).map(DnValue::Ia5String),
            _ => Ok(DnValue::Utf8String(text.to_string())),
        }
        .map_err(|e| CaError::InvalidCsrField(format!("subject attribute {text}: {e}")))?;
        debug!(oid = %attr.attr_type(), value = text, "subject attribute");
        dn.push(DnType::from_oid(&oid), value);
    }
    Ok(dn)
}
