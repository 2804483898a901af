//! X.509v3 extension handling for issued certificates.
//!
//! Requested extensions are carried over from the CSR. Basic constraints, key
//! usage and subject alternative names are decoded into typed certificate
//! parameters so the unsafe-usage check sees exactly what will be encoded;
//! everything else is copied byte for byte with its criticality.

use std::net::IpAddr;

use rcgen::string::Ia5String;
use rcgen::{BasicConstraints, CertificateParams, CustomExtension, IsCa, KeyUsagePurpose, SanType};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use x509_parser::der_parser::oid::Oid;
use x509_parser::prelude::*;
use yasna::models::ObjectIdentifier;
use yasna::Tag;

use crate::{CaError, Result};

const OID_BASIC_CONSTRAINTS: &[u64] = &[2, 5, 29, 19];
const OID_KEY_USAGE: &[u64] = &[2, 5, 29, 15];
const OID_SUBJECT_ALT_NAME: &[u64] = &[2, 5, 29, 17];
const OID_AUTHORITY_INFO_ACCESS: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 1, 1];
const OID_CA_ISSUERS: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 48, 2];

/// What issued certificates may carry, and what the CA adds to them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionPolicy {
    /// caIssuers URI placed in the Authority Info Access extension.
    #[serde(default)]
    pub ca_issuers_uri: Option<String>,

    /// Allow more than one DNS subject alternative name.
    #[serde(default)]
    pub allow_multiple_san: bool,
}

impl ExtensionPolicy {
    /// Merge CSR-requested extensions into `params` and add the CA's own.
    ///
    /// The Authority Key Identifier always links back to the issuing CA. A
    /// CSR-supplied AKI is dropped, as is a CSR-supplied AIA when the CA
    /// publishes its own.
    pub fn copy_extensions(
        &self,
        params: &mut CertificateParams,
        csr: &X509CertificationRequest<'_>,
    ) -> Result<()> {
        params.use_authority_key_identifier_extension = true;
        if let Some(uri) = &self.ca_issuers_uri {
            params
                .custom_extensions
                .push(authority_info_access(uri)?);
        }

        let Some(requested) = requested_extensions(csr) else {
            return Ok(());
        };

        let mut subject_key_id = None;
        for ext in requested {
            let oid = oid_components(&ext.oid)?;
            match ext.parsed_extension() {
                ParsedExtension::BasicConstraints(bc) => {
                    params.is_ca = if bc.ca {
                        IsCa::Ca(bc.path_len_constraint.map_or(
                            BasicConstraints::Unconstrained,
                            |len| BasicConstraints::Constrained(u8::try_from(len).unwrap_or(u8::MAX)),
                        ))
                    } else {
                        IsCa::ExplicitNoCa
                    };
                }
                ParsedExtension::KeyUsage(ku) => params.key_usages = key_usages(ku),
                ParsedExtension::SubjectAlternativeName(san) => {
                    for name in &san.general_names {
                        params.subject_alt_names.push(san_type(name)?);
                    }
                }
                ParsedExtension::AuthorityKeyIdentifier(_) => {
                    debug!("dropping requested authority key identifier");
                }
                ParsedExtension::SubjectKeyIdentifier(_) => subject_key_id = Some(raw_extension(ext, &oid)),
                ParsedExtension::AuthorityInfoAccess(_) if self.ca_issuers_uri.is_some() => {
                    debug!("dropping requested authority info access");
                }
                _ if [OID_BASIC_CONSTRAINTS, OID_KEY_USAGE, OID_SUBJECT_ALT_NAME].contains(&oid.as_slice()) => {
                    return Err(CaError::InvalidCsrField(format!(
                        "malformed extension {}",
                        ext.oid
                    )));
                }
                _ => params.custom_extensions.push(raw_extension(ext, &oid)),
            }
        }

        // With basic constraints present the subject key identifier is derived
        // from the subject key when the certificate is encoded.
        if let (Some(ski), IsCa::NoCa) = (subject_key_id, &params.is_ca) {
            params.custom_extensions.push(ski);
        }
        Ok(())
    }

    /// Refuse to issue anything that could act as a CA or sign CRLs.
    ///
    /// Runs on the merged parameters, so privileges requested through any
    /// extension path are caught.
    pub fn reject_unsafe_usage(&self, params: &CertificateParams) -> Result<()> {
        if matches!(params.is_ca, IsCa::Ca(_)) {
            info!("rejecting request for a ca certificate");
            return Err(CaError::InvalidCsrField(
                "basic constraints request a ca certificate".into(),
            ));
        }
        for usage in &params.key_usages {
            let name = match usage {
                KeyUsagePurpose::KeyCertSign => "keyCertSign",
                KeyUsagePurpose::CrlSign => "cRLSign",
                KeyUsagePurpose::DataEncipherment => "dataEncipherment",
                _ => continue,
            };
            info!(usage = name, "rejecting forbidden key usage");
            return Err(CaError::InvalidCsrField(format!(
                "key usage {name} is not allowed"
            )));
        }
        Ok(())
    }

    /// Reject wildcard names and, unless allowed, multiple DNS names.
    pub fn verify_names(&self, subject: &X509Name<'_>, sans: &[SanType]) -> Result<()> {
        for cn in subject.iter_common_name() {
            let value = cn
                .as_str()
                .map_err(|e| CaError::InvalidSubjectName(format!("unreadable common name: {e}")))?;
            if value.contains('*') {
                return Err(CaError::InvalidSubjectName(format!(
                    "wildcard common name {value}"
                )));
            }
        }

        let mut dns_names = 0usize;
        for san in sans {
            if let SanType::DnsName(name) = san {
                if name.as_str().contains('*') {
                    return Err(CaError::InvalidSan(format!("wildcard dns name {}", name.as_str())));
                }
                dns_names += 1;
            }
        }
        if dns_names > 1 && !self.allow_multiple_san {
            return Err(CaError::InvalidSan(format!(
                "{dns_names} dns names requested, only one allowed"
            )));
        }
        Ok(())
    }
}

fn requested_extensions<'a>(
    csr: &'a X509CertificationRequest<'a>,
) -> Option<&'a [X509Extension<'a>]> {
    csr.certification_request_info
        .iter_attributes()
        .find_map(|attr| match attr.parsed_attribute() {
            ParsedCriAttribute::ExtensionRequest(req) => Some(req.extensions.as_slice()),
            _ => None,
        })
}

fn oid_components(oid: &Oid<'_>) -> Result<Vec<u64>> {
    oid.iter()
        .map(Iterator::collect)
        .ok_or_else(|| CaError::Extension(format!("unsupported extension oid {oid}")))
}

fn raw_extension(ext: &X509Extension<'_>, oid: &[u64]) -> CustomExtension {
    let mut custom = CustomExtension::from_oid_content(oid, ext.value.to_vec());
    custom.set_criticality(ext.critical);
    custom
}

fn key_usages(ku: &KeyUsage) -> Vec<KeyUsagePurpose> {
    [
        (ku.digital_signature(), KeyUsagePurpose::DigitalSignature),
        (ku.non_repudiation(), KeyUsagePurpose::ContentCommitment),
        (ku.key_encipherment(), KeyUsagePurpose::KeyEncipherment),
        (ku.data_encipherment(), KeyUsagePurpose::DataEncipherment),
        (ku.key_agreement(), KeyUsagePurpose::KeyAgreement),
        (ku.key_cert_sign(), KeyUsagePurpose::KeyCertSign),
        (ku.crl_sign(), KeyUsagePurpose::CrlSign),
        (ku.encipher_only(), KeyUsagePurpose::EncipherOnly),
        (ku.decipher_only(), KeyUsagePurpose::DecipherOnly),
    ]
    .into_iter()
    .filter_map(|(set, usage)| set.then_some(usage))
    .collect()
}

fn san_type(name: &GeneralName<'_>) -> Result<SanType> {
    let ia5 = |s: &str| {
        Ia5String::try_from(s).map_err(|e| CaError::InvalidSan(format!("{s}: {e}")))
    };
    match name {
        GeneralName::DNSName(s) => Ok(SanType::DnsName(ia5(s)?)),
        GeneralName::RFC822Name(s) => Ok(SanType::Rfc822Name(ia5(s)?)),
        GeneralName::URI(s) => Ok(SanType::URI(ia5(s)?)),
        GeneralName::IPAddress(bytes) => ip_address(bytes).map(SanType::IpAddress),
        other => Err(CaError::InvalidSan(format!(
            "unsupported subject alternative name {other:?}"
        ))),
    }
}

fn ip_address(bytes: &[u8]) -> Result<IpAddr> {
    if let Ok(v4) = <[u8; 4]>::try_from(bytes) {
        return Ok(IpAddr::from(v4));
    }
    if let Ok(v6) = <[u8; 16]>::try_from(bytes) {
        return Ok(IpAddr::from(v6));
    }
    Err(CaError::InvalidSan(format!(
        "ip address of {} bytes",
        bytes.len()
    )))
}

/// AIA with a single caIssuers access description.
fn authority_info_access(uri: &str) -> Result<CustomExtension> {
    if !uri.is_ascii() {
        return Err(CaError::Extension(format!("ca issuers uri is not ascii: {uri}")));
    }
    let content = yasna::construct_der(|writer| {
        writer.write_sequence(|writer| {
            writer.next().write_sequence(|writer| {
                writer
                    .next()
                    .write_oid(&ObjectIdentifier::from_slice(OID_CA_ISSUERS));
                writer
                    .next()
                    .write_tagged_implicit(Tag::context(6), |writer| writer.write_ia5_string(uri));
            });
        });
    });
    Ok(CustomExtension::from_oid_content(
        OID_AUTHORITY_INFO_ACCESS,
        content,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    fn merged(policy: &ExtensionPolicy, csr_pem: &str) -> Result<CertificateParams> {
        let der = testutil::pem_contents(csr_pem);
        let (_, csr) = X509CertificationRequest::from_der(&der).unwrap();
        let mut params = CertificateParams::default();
        policy.copy_extensions(&mut params, &csr)?;
        Ok(params)
    }

    fn subject_of(csr_pem: &str, f: impl FnOnce(&X509Name<'_>)) {
        let der = testutil::pem_contents(csr_pem);
        let (_, csr) = X509CertificationRequest::from_der(&der).unwrap();
        f(&csr.certification_request_info.subject);
    }

    #[test]
    fn test_copies_openssl_request() {
        let params = merged(&ExtensionPolicy::default(), testutil::HOST_CSR_PEM).unwrap();
        assert!(params.use_authority_key_identifier_extension);
        assert_eq!(
            params.key_usages,
            vec![
                KeyUsagePurpose::DigitalSignature,
                KeyUsagePurpose::KeyEncipherment
            ]
        );
        assert_eq!(params.subject_alt_names.len(), 2);
        assert!(matches!(&params.subject_alt_names[0], SanType::DnsName(n) if n.as_str() == "host.example.com"));
        assert!(matches!(params.subject_alt_names[1], SanType::IpAddress(ip) if ip == IpAddr::from([10, 0, 0, 5])));
        // Extended key usage is copied raw.
        assert_eq!(params.custom_extensions.len(), 1);
        assert_eq!(
            params.custom_extensions[0].oid_components().collect::<Vec<_>>(),
            vec![2, 5, 29, 37]
        );
    }

    #[test]
    fn test_no_extension_request_still_gets_aki_and_aia() {
        let policy = ExtensionPolicy {
            ca_issuers_uri: Some("https://vmca.example.com/afd/vecs/ssl".into()),
            allow_multiple_san: false,
        };
        let params = merged(&policy, testutil::PLAIN_CSR_PEM).unwrap();
        assert!(params.use_authority_key_identifier_extension);
        assert_eq!(params.custom_extensions.len(), 1);
        assert_eq!(
            params.custom_extensions[0].oid_components().collect::<Vec<_>>(),
            OID_AUTHORITY_INFO_ACCESS
        );
        assert!(params.subject_alt_names.is_empty());
    }

    #[test]
    fn test_aia_encoding() {
        let ext = authority_info_access("http://ca/x").unwrap();
        assert!(!ext.criticality());
        let content = ext.content();
        assert_eq!(content[0], 0x30);
        assert!(content.ends_with(b"http://ca/x"));
        let ca_issuers = [0x06, 0x08, 0x2b, 0x06, 0x01, 0x05, 0x05, 0x07, 0x30, 0x02];
        assert!(content.windows(ca_issuers.len()).any(|w| w == ca_issuers));
    }

    #[test]
    fn test_non_ascii_uri_rejected() {
        assert!(matches!(
            authority_info_access("https://ça/"),
            Err(CaError::Extension(_))
        ));
    }

    #[test]
    fn test_reject_ca_flag() {
        let csr = testutil::rsa_csr("sneaky.example.com", |p| {
            p.custom_extensions.push(testutil::ca_true_extension());
        });
        let params = merged(&ExtensionPolicy::default(), &csr).unwrap();
        let err = ExtensionPolicy::default()
            .reject_unsafe_usage(&params)
            .unwrap_err();
        assert!(matches!(err, CaError::InvalidCsrField(_)));
    }

    #[test]
    fn test_reject_forbidden_key_usages() {
        for usage in [
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DataEncipherment,
        ] {
            let csr = testutil::rsa_csr("usage.example.com", |p| {
                p.key_usages = vec![KeyUsagePurpose::DigitalSignature, usage.clone()];
            });
            let params = merged(&ExtensionPolicy::default(), &csr).unwrap();
            assert!(matches!(
                ExtensionPolicy::default().reject_unsafe_usage(&params),
                Err(CaError::InvalidCsrField(_))
            ));
        }
    }

    #[test]
    fn test_leaf_usages_allowed() {
        let params = merged(&ExtensionPolicy::default(), testutil::HOST_CSR_PEM).unwrap();
        ExtensionPolicy::default()
            .reject_unsafe_usage(&params)
            .unwrap();
    }

    #[test]
    fn test_wildcard_common_name_rejected() {
        let csr = testutil::rsa_csr("*.example.com", |_| {});
        subject_of(&csr, |subject| {
            let err = ExtensionPolicy::default()
                .verify_names(subject, &[])
                .unwrap_err();
            assert!(matches!(err, CaError::InvalidSubjectName(_)));
        });
    }

    #[test]
    fn test_wildcard_san_rejected() {
        let sans = vec![SanType::DnsName(Ia5String::try_from("*.example.com").unwrap())];
        subject_of(testutil::HOST_CSR_PEM, |subject| {
            let err = ExtensionPolicy::default()
                .verify_names(subject, &sans)
                .unwrap_err();
            assert!(matches!(err, CaError::InvalidSan(_)));
        });
    }

    #[test]
    fn test_multiple_dns_names() {
        let sans = vec![
            SanType::DnsName(Ia5String::try_from("a.example.com").unwrap()),
            SanType::DnsName(Ia5String::try_from("b.example.com").unwrap()),
        ];
        subject_of(testutil::HOST_CSR_PEM, |subject| {
            assert!(matches!(
                ExtensionPolicy::default().verify_names(subject, &sans),
                Err(CaError::InvalidSan(_))
            ));
            let permissive = ExtensionPolicy {
                allow_multiple_san: true,
                ..ExtensionPolicy::default()
            };
            permissive.verify_names(subject, &sans).unwrap();
        });
    }

    #[test]
    fn test_ip_address_lengths() {
        assert_eq!(ip_address(&[127, 0, 0, 1]).unwrap(), IpAddr::from([127, 0, 0, 1]));
        assert!(ip_address(&[0u8; 16]).unwrap().is_ipv6());
        assert!(matches!(ip_address(&[1, 2, 3]), Err(CaError::InvalidSan(_))));
    }
}
