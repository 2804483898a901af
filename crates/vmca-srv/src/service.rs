//! Locked service entrypoints over the CA engine.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{info, warn};
use vmca_core::clock::asn1_to_utc;
use vmca_core::store::normalize_serial;
use vmca_core::{
    BuiltCrl, CaError, CaHandle, CaState, CertificateEntry, CertificateSigner, CertificateStatus,
    CertificateStore, CrlBuilder, CrlNumberRegistry, CrlNumberStore, CrlPublisher,
    FunctionalLevel, IssuedCertificate, RevocationReason,
};
use x509_parser::prelude::*;

use crate::config::ServiceConfig;
use crate::stores::{JsonCertificateStore, JsonCrlNumberStore};
use crate::{Result, SrvError};

/// Largest slice returned by one [`CaService::get_crl`] call.
pub const MAX_CRL_CHUNK: usize = 64 * 1024;

/// Summary of the published CRL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrlInfo {
    pub crl_number: Option<u64>,
    pub last_update: Option<DateTime<Utc>>,
    pub next_update: Option<DateTime<Utc>>,
    pub entries: usize,
    pub size: usize,
}

/// The certificate authority service.
///
/// Reads share the service lock; issuance, revocation and root installation
/// take it exclusively. CRL regeneration is serialized by its own mutex and
/// only takes the service lock to publish.
pub struct CaService {
    config: ServiceConfig,
    service_lock: Arc<RwLock<()>>,
    regen_lock: Mutex<()>,
    state: CaState,
    signer: CertificateSigner,
    numbers: CrlNumberRegistry,
    builder: CrlBuilder,
    publisher: CrlPublisher,
    certs: Arc<dyn CertificateStore>,
}

impl CaService {
    /// Open the service over the files in `config.data_dir`.
    pub fn open(config: ServiceConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let certs = Arc::new(JsonCertificateStore::open(config.cert_db_path())?);
        let numbers = Arc::new(JsonCrlNumberStore::new(config.crl_number_path()));
        Self::with_stores(config, certs, numbers)
    }

    /// Open the service with caller-provided stores.
    pub fn with_stores(
        config: ServiceConfig,
        certs: Arc<dyn CertificateStore>,
        crl_numbers: Arc<dyn CrlNumberStore>,
    ) -> Result<Self> {
        let service_lock = Arc::new(RwLock::new(()));
        let state = CaState::new();

        let (cert_path, key_path) = (config.root_cert_path(), config.private_key_path());
        if cert_path.exists() && key_path.exists() {
            let ca = CaHandle::from_files(&cert_path, &key_path)?;
            state.set_ca(Some(Arc::new(ca)));
        } else {
            warn!(path = %cert_path.display(), "no root ca installed");
        }

        let numbers = CrlNumberRegistry::new(crl_numbers);
        numbers.load(published_crl_number(&config)?)?;

        let builder = CrlBuilder::new(config.crl.policy, config.crl_temp_path(), config.crl_path());
        let publisher = CrlPublisher::new(
            config.crl_temp_path(),
            config.crl_path(),
            Arc::clone(&service_lock),
        );

        Ok(Self {
            signer: config.signer(),
            config,
            service_lock,
            regen_lock: Mutex::new(()),
            state,
            numbers,
            builder,
            publisher,
            certs,
        })
    }

    pub const fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn functional_level(&self) -> FunctionalLevel {
        self.state.functional_level()
    }

    /// Install a CA certificate bundle and its key, then publish a CRL.
    pub fn add_root_certificate(&self, cert_pem: &str, key_pem: &str) -> Result<BuiltCrl> {
        let ca = CaHandle::from_pem(cert_pem, key_pem)?;
        {
            let _guard = self.service_lock.write();
            write_file(&self.config.root_cert_path(), cert_pem.as_bytes(), 0o644)?;
            write_file(&self.config.private_key_path(), key_pem.as_bytes(), 0o600)?;
            self.state.set_ca(Some(Arc::new(ca)));
        }
        self.regenerate_crl()
    }

    /// The CA certificate followed by its chain.
    pub fn root_certificate(&self) -> Result<String> {
        let _guard = self.service_lock.read();
        Ok(self.state.get_ca()?.bundle_pem())
    }

    /// Sign a CSR and record the result in the certificate database.
    pub fn issue_certificate(
        &self,
        csr_pem: &str,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) -> Result<IssuedCertificate> {
        let _guard = self.service_lock.write();
        self.state.validate()?;
        let ca = self.state.get_ca()?;
        let issued = self.signer.sign(&ca, csr_pem, not_before, not_after)?;
        self.certs.add_certificate(CertificateEntry::from(&issued))?;
        Ok(issued)
    }

    /// Revoke a certificate given in PEM form.
    ///
    /// Same commit semantics as [`revoke_serial`](Self::revoke_serial).
    pub fn revoke_certificate(&self, cert_pem: &str, reason: u32) -> Result<BuiltCrl> {
        let der = certificate_der(cert_pem)?;
        let serial = {
            let _guard = self.service_lock.read();
            let ca = self.state.get_ca()?;
            if !ca.verify_issued(&der)? {
                return Err(SrvError::Verification(
                    "certificate was not issued by this ca".into(),
                ));
            }
            serial_of(&der)?
        };
        self.revoke_serial(&serial, reason)
    }

    /// Revoke by serial number, then regenerate and publish the CRL.
    ///
    /// The revocation is committed to the database before the CRL is rebuilt.
    /// If the rebuild fails the error is returned but the revocation stands:
    /// a retry reports `AlreadyRevoked`, and the next successful
    /// [`regenerate_crl`](Self::regenerate_crl) (including the refresher's)
    /// lists the certificate.
    pub fn revoke_serial(&self, serial_hex: &str, reason: u32) -> Result<BuiltCrl> {
        let reason_code =
            RevocationReason::try_from_code(reason).ok_or(SrvError::InvalidReason(reason))?;
        {
            let _guard = self.service_lock.write();
            self.state.validate()?;
            self.certs
                .revoke_certificate(serial_hex, reason_code.code(), Utc::now())?;
            info!(serial = serial_hex, reason = ?reason_code, "revoked certificate");
        }
        self.regenerate_crl()
    }

    /// Certificates in the database, optionally only those with `status`.
    pub fn enumerate_certificates(
        &self,
        status: Option<CertificateStatus>,
    ) -> Result<Vec<CertificateEntry>> {
        let _guard = self.service_lock.read();
        let now = Utc::now();
        Ok(self
            .certs
            .list_certificates()?
            .into_iter()
            .filter(|entry| status.map_or(true, |s| entry.status(now) == s))
            .collect())
    }

    /// Check that a certificate was issued by this CA and report its status.
    pub fn verify_certificate(&self, cert_pem: &str) -> Result<CertificateStatus> {
        let der = certificate_der(cert_pem)?;
        let _guard = self.service_lock.read();
        let ca = self.state.get_ca()?;
        if !ca.verify_issued(&der)? {
            return Err(SrvError::Verification(
                "certificate was not issued by this ca".into(),
            ));
        }

        let (_, cert) = parse_x509_certificate(&der)
            .map_err(|e| SrvError::Verification(format!("certificate: {e}")))?;
        let serial = normalize_serial(&hex::encode_upper(cert.raw_serial()))?;
        if let Some(entry) = self.certs.get_certificate(&serial)? {
            if entry.revoked_at.is_some() {
                return Ok(CertificateStatus::Revoked);
            }
        }
        let not_after = asn1_to_utc(cert.validity().not_after)
            .ok_or_else(|| SrvError::Verification("notAfter out of range".into()))?;
        if not_after < Utc::now() {
            return Ok(CertificateStatus::Expired);
        }
        Ok(CertificateStatus::Active)
    }

    /// Rebuild the CRL from the database and publish it.
    ///
    /// Failures are returned to the caller; nothing is published on error.
    pub fn regenerate_crl(&self) -> Result<BuiltCrl> {
        let _regen = self.regen_lock.lock();
        self.state.validate()?;
        let built = self
            .builder
            .regenerate(&self.state, self.certs.as_ref(), &self.numbers)?;
        self.publisher.publish()?;
        Ok(built)
    }

    /// Up to `size` bytes of the live CRL starting at `offset`.
    ///
    /// Reads the file directly, so repeated calls see a newly published CRL.
    /// An offset at or past the end returns an empty slice.
    pub fn get_crl(&self, offset: u64, size: usize) -> Result<Vec<u8>> {
        let _guard = self.service_lock.read();
        self.state.validate()?;
        let path = self.publisher.live_path();
        let mut file = File::open(path).map_err(|e| CaError::file_io(path, e))?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| CaError::file_io(path, e))?;
        let limit = size.min(MAX_CRL_CHUNK);
        let mut buf = Vec::with_capacity(limit);
        file.take(limit as u64)
            .read_to_end(&mut buf)
            .map_err(|e| CaError::file_io(path, e))?;
        Ok(buf)
    }

    /// Number, update times and size of the live CRL.
    pub fn crl_info(&self) -> Result<CrlInfo> {
        let _guard = self.service_lock.read();
        self.state.validate()?;
        let path = self.publisher.live_path();
        let der = std::fs::read(path).map_err(|e| CaError::file_io(path, e))?;
        let (_, crl) = parse_x509_crl(&der)
            .map_err(|e| SrvError::State(format!("published crl: {e}")))?;
        Ok(CrlInfo {
            crl_number: crl
                .crl_number()
                .map(|n| be_to_u64(&n.to_bytes_be()))
                .transpose()?,
            last_update: asn1_to_utc(crl.last_update()),
            next_update: crl.next_update().and_then(asn1_to_utc),
            entries: crl.iter_revoked_certificates().count(),
            size: der.len(),
        })
    }
}

impl std::fmt::Debug for CaService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaService")
            .field("data_dir", &self.config.data_dir)
            .field("functional_level", &self.functional_level())
            .field("crl_number", &self.numbers.current())
            .finish_non_exhaustive()
    }
}

/// CRL number of the file currently published.
///
/// A missing or unparseable file gives no floor. A number too large to
/// continue from is an error, since starting below it would reuse numbers.
fn published_crl_number(config: &ServiceConfig) -> Result<Option<u64>> {
    let path = config.crl_path();
    let Ok(der) = std::fs::read(&path) else {
        return Ok(None);
    };
    let Ok((_, crl)) = parse_x509_crl(&der) else {
        warn!(path = %path.display(), "published crl is unreadable, no number floor");
        return Ok(None);
    };
    crl.crl_number()
        .map(|n| be_to_u64(&n.to_bytes_be()))
        .transpose()
}

fn be_to_u64(bytes: &[u8]) -> Result<u64> {
    let start = bytes.iter().take_while(|b| **b == 0).count();
    let significant = &bytes[start..];
    if significant.len() > 8 {
        return Err(CaError::CrlNumber(format!(
            "published crl number 0x{} does not fit in 64 bits",
            hex::encode_upper(significant)
        ))
        .into());
    }
    Ok(significant.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

fn certificate_der(cert_pem: &str) -> Result<Vec<u8>> {
    let block = ::pem::parse(cert_pem)
        .map_err(|e| SrvError::Verification(format!("certificate pem: {e}")))?;
    if block.tag() != "CERTIFICATE" {
        return Err(SrvError::Verification(format!(
            "expected a certificate, found {}",
            block.tag()
        )));
    }
    Ok(block.into_contents())
}

fn serial_of(der: &[u8]) -> Result<String> {
    let (_, cert) = parse_x509_certificate(der)
        .map_err(|e| SrvError::Verification(format!("certificate: {e}")))?;
    Ok(normalize_serial(&hex::encode_upper(cert.raw_serial()))?)
}

#[cfg(unix)]
fn write_file(path: &std::path::Path, bytes: &[u8], mode: u32) -> Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)
        .map_err(|e| CaError::file_io(path, e))?;
    file.write_all(bytes).map_err(|e| CaError::file_io(path, e))?;
    Ok(())
}

#[cfg(not(unix))]
fn write_file(path: &std::path::Path, bytes: &[u8], _mode: u32) -> Result<()> {
    std::fs::write(path, bytes).map_err(|e| CaError::file_io(path, e))?;
    Ok(())
}
