//! Shared fixtures for unit tests.

use chrono::{DateTime, Duration, Utc};
use rcgen::{
    BasicConstraints, CertificateParams, CustomExtension, DistinguishedName, DnType, IsCa, Issuer,
    KeyPair, KeyUsagePurpose,
};

use crate::ca::CaHandle;
use crate::clock::to_offset;

macro_rules! fixture {
    ($name:literal) => {
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/../../testdata/", $name))
    };
}

/// 2048-bit RSA key, PKCS#8.
pub const RSA_KEY_PEM: &str = fixture!("rsa2048-key.pem");
/// openssl CSR with SAN (DNS + IP), critical key usage and EKU.
pub const HOST_CSR_PEM: &str = fixture!("host-csr.pem");
/// openssl CSR without an extension request.
pub const PLAIN_CSR_PEM: &str = fixture!("plain-csr.pem");
/// openssl CSR over a 1024-bit key.
pub const WEAK_CSR_PEM: &str = fixture!("rsa1024-csr.pem");

pub fn pem_contents(text: &str) -> Vec<u8> {
    ::pem::parse(text).unwrap().into_contents()
}

/// Flip the final byte, which lands in the signature.
pub fn tamper_last_byte(text: &str) -> String {
    let block = ::pem::parse(text).unwrap();
    let mut der = block.contents().to_vec();
    if let Some(last) = der.last_mut() {
        *last ^= 0xff;
    }
    ::pem::encode(&::pem::Pem::new(block.tag(), der))
}

fn name(cn: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    dn.push(DnType::OrganizationName, "VMware");
    dn
}

fn ca_params(cn: &str, not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> CertificateParams {
    let mut params = CertificateParams::default();
    params.distinguished_name = name(cn);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params.not_before = to_offset(not_before).unwrap();
    params.not_after = to_offset(not_after).unwrap();
    params
}

/// Self-signed P-256 CA as (cert PEM, key PEM).
pub fn ca_pair(cn: &str, not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> (String, String) {
    let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
    let cert = ca_params(cn, not_before, not_after).self_signed(&key).unwrap();
    (cert.pem(), key.serialize_pem())
}

/// CA valid from yesterday for ten years.
pub fn default_ca_pair() -> (String, String) {
    let now = Utc::now();
    ca_pair("VMCA Root", now - Duration::days(1), now + Duration::days(3650))
}

/// Intermediate CA signed by the given root.
pub fn intermediate_pair(root_cert: &str, root_key: &str, cn: &str) -> (String, String) {
    let issuer = Issuer::from_ca_cert_pem(root_cert, KeyPair::from_pem(root_key).unwrap()).unwrap();
    let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
    let now = Utc::now();
    let cert = ca_params(cn, now - Duration::hours(12), now + Duration::days(1825))
        .signed_by(&key, &issuer)
        .unwrap();
    (cert.pem(), key.serialize_pem())
}

/// Self-signed end-entity certificate.
pub fn leaf_pair(cn: &str) -> (String, String) {
    let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
    let mut params = CertificateParams::default();
    params.distinguished_name = name(cn);
    let cert = params.self_signed(&key).unwrap();
    (cert.pem(), key.serialize_pem())
}

pub fn ca_handle() -> CaHandle {
    let (cert, key) = default_ca_pair();
    CaHandle::from_pem(&cert, &key).unwrap()
}

pub fn ca_handle_between(not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> CaHandle {
    let (cert, key) = ca_pair("VMCA Root", not_before, not_after);
    CaHandle::from_pem(&cert, &key).unwrap()
}

/// CSR over the fixture RSA key, adjusted by `configure`.
pub fn rsa_csr(cn: &str, configure: impl FnOnce(&mut CertificateParams)) -> String {
    let key = KeyPair::from_pem(RSA_KEY_PEM).unwrap();
    let mut params = CertificateParams::default();
    params.distinguished_name = name(cn);
    configure(&mut params);
    params.serialize_request(&key).unwrap().pem().unwrap()
}

/// CSR over a fresh P-256 key.
pub fn ec_csr(cn: &str) -> String {
    let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
    let mut params = CertificateParams::default();
    params.distinguished_name = name(cn);
    params.serialize_request(&key).unwrap().pem().unwrap()
}

/// basicConstraints CA:TRUE as a raw extension, which request serialization
/// does not otherwise allow.
pub fn ca_true_extension() -> CustomExtension {
    let mut ext = CustomExtension::from_oid_content(&[2, 5, 29, 19], vec![0x30, 0x03, 0x01, 0x01, 0xff]);
    ext.set_criticality(true);
    ext
}
