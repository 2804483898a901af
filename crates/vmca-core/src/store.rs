//! Certificate database and CRL-number store interfaces.
//!
//! Persistence lives outside the engine. The engine only needs the revoked
//! set per regeneration, a place to record issued certificates, and a
//! durable CRL number.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::signer::IssuedCertificate;
use crate::{CaError, Result};

/// Lifecycle state of an issued certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateStatus {
    Active,
    Revoked,
    Expired,
}

/// A certificate as recorded by the certificate database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateEntry {
    pub serial_hex: String,
    pub subject: String,
    pub issuer: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub pem: String,
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reason: Option<u32>,
}

impl CertificateEntry {
    /// Status at `now`; revocation wins over expiry.
    pub fn status(&self, now: DateTime<Utc>) -> CertificateStatus {
        if self.revoked_at.is_some() {
            CertificateStatus::Revoked
        } else if self.not_after < now {
            CertificateStatus::Expired
        } else {
            CertificateStatus::Active
        }
    }
}

impl From<&IssuedCertificate> for CertificateEntry {
    fn from(issued: &IssuedCertificate) -> Self {
        Self {
            serial_hex: issued.serial_hex.clone(),
            subject: issued.subject.clone(),
            issuer: issued.issuer.clone(),
            not_before: issued.not_before,
            not_after: issued.not_after,
            pem: issued.pem.clone(),
            revoked_at: None,
            reason: None,
        }
    }
}

/// One row of the revoked-certificate snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokedCertificate {
    pub serial_hex: String,
    pub issuer: String,
    /// Stored reason code; codes unknown to the CRL encoder become `unspecified`.
    pub reason: u32,
    pub revoked_at: DateTime<Utc>,
}

/// Certificate database used by issuance, revocation and CRL generation.
pub trait CertificateStore: Send + Sync {
    /// Snapshot of every revoked certificate.
    fn query_revoked(&self) -> Result<Vec<RevokedCertificate>>;

    fn add_certificate(&self, entry: CertificateEntry) -> Result<()>;

    /// Mark `serial_hex` revoked. Fails if unknown or already revoked.
    fn revoke_certificate(&self, serial_hex: &str, reason: u32, at: DateTime<Utc>) -> Result<()>;

    fn get_certificate(&self, serial_hex: &str) -> Result<Option<CertificateEntry>>;

    fn list_certificates(&self) -> Result<Vec<CertificateEntry>>;
}

/// Durable home of the current CRL number.
pub trait CrlNumberStore: Send + Sync {
    /// `None` when no CRL has ever been numbered.
    fn current_crl_number(&self) -> Result<Option<u64>>;

    fn set_current_crl_number(&self, number: u64) -> Result<()>;
}

/// Canonical form of a serial: upper-case hex, no separators or leading zeros.
pub fn normalize_serial(serial: &str) -> Result<String> {
    let digits: String = serial
        .trim()
        .trim_start_matches("0x")
        .chars()
        .filter(|c| *c != ':' && !c.is_whitespace())
        .collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CaError::Store(format!("invalid serial number {serial:?}")));
    }
    let trimmed = digits.trim_start_matches('0');
    Ok(if trimmed.is_empty() {
        String::from("0")
    } else {
        trimmed.to_ascii_uppercase()
    })
}

/// In-memory implementation of both stores.
#[derive(Debug, Default)]
pub struct MemoryStore {
    certs: Mutex<BTreeMap<String, CertificateEntry>>,
    crl_number: Mutex<Option<u64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CertificateStore for MemoryStore {
    fn query_revoked(&self) -> Result<Vec<RevokedCertificate>> {
        Ok(self
            .certs
            .lock()
            .values()
            .filter_map(|entry| {
                entry.revoked_at.map(|revoked_at| RevokedCertificate {
                    serial_hex: entry.serial_hex.clone(),
                    issuer: entry.issuer.clone(),
                    reason: entry.reason.unwrap_or_default(),
                    revoked_at,
                })
            })
            .collect())
    }

    fn add_certificate(&self, mut entry: CertificateEntry) -> Result<()> {
        entry.serial_hex = normalize_serial(&entry.serial_hex)?;
        self.certs.lock().insert(entry.serial_hex.clone(), entry);
        Ok(())
    }

    fn revoke_certificate(&self, serial_hex: &str, reason: u32, at: DateTime<Utc>) -> Result<()> {
        let serial = normalize_serial(serial_hex)?;
        let mut certs = self.certs.lock();
        let entry = certs
            .get_mut(&serial)
            .ok_or_else(|| CaError::CertificateNotFound(serial.clone()))?;
        if entry.revoked_at.is_some() {
            return Err(CaError::AlreadyRevoked(serial));
        }
        entry.revoked_at = Some(at);
        entry.reason = Some(reason);
        Ok(())
    }

    fn get_certificate(&self, serial_hex: &str) -> Result<Option<CertificateEntry>> {
        let serial = normalize_serial(serial_hex)?;
        Ok(self.certs.lock().get(&serial).cloned())
    }

    fn list_certificates(&self) -> Result<Vec<CertificateEntry>> {
        Ok(self.certs.lock().values().cloned().collect())
    }
}

impl CrlNumberStore for MemoryStore {
    fn current_crl_number(&self) -> Result<Option<u64>> {
        Ok(*self.crl_number.lock())
    }

    fn set_current_crl_number(&self, number: u64) -> Result<()> {
        *self.crl_number.lock() = Some(number);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(serial: &str) -> CertificateEntry {
        let now = Utc::now();
        CertificateEntry {
            serial_hex: serial.to_string(),
            subject: String::from("CN=host.example.com"),
            issuer: String::from("CN=VMCA"),
            not_before: now,
            not_after: now + Duration::days(30),
            pem: String::new(),
            revoked_at: None,
            reason: None,
        }
    }

    #[test]
    fn test_normalize_serial() {
        assert_eq!(normalize_serial("00:ab:CD").unwrap(), "ABCD");
        assert_eq!(normalize_serial("0x7f01").unwrap(), "7F01");
        assert_eq!(normalize_serial("000").unwrap(), "0");
        assert!(normalize_serial("xyz").is_err());
        assert!(normalize_serial("").is_err());
    }

    #[test]
    fn test_revoke_and_query() {
        let store = MemoryStore::new();
        store.add_certificate(entry("4a01")).unwrap();
        store.add_certificate(entry("4a02")).unwrap();
        assert!(store.query_revoked().unwrap().is_empty());

        let at = Utc::now();
        store.revoke_certificate("4A01", 1, at).unwrap();
        let revoked = store.query_revoked().unwrap();
        assert_eq!(revoked.len(), 1);
        assert_eq!(revoked[0].serial_hex, "4A01");
        assert_eq!(revoked[0].reason, 1);
        assert_eq!(revoked[0].revoked_at, at);
    }

    #[test]
    fn test_revoke_twice_fails() {
        let store = MemoryStore::new();
        store.add_certificate(entry("4a01")).unwrap();
        store.revoke_certificate("4a01", 0, Utc::now()).unwrap();
        assert!(matches!(
            store.revoke_certificate("4a01", 0, Utc::now()),
            Err(CaError::AlreadyRevoked(_))
        ));
    }

    #[test]
    fn test_revoke_unknown_fails() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.revoke_certificate("beef", 0, Utc::now()),
            Err(CaError::CertificateNotFound(_))
        ));
    }

    #[test]
    fn test_status() {
        let now = Utc::now();
        let mut e = entry("01");
        assert_eq!(e.status(now), CertificateStatus::Active);
        assert_eq!(e.status(now + Duration::days(31)), CertificateStatus::Expired);
        e.revoked_at = Some(now);
        assert_eq!(e.status(now + Duration::days(31)), CertificateStatus::Revoked);
    }

    #[test]
    fn test_crl_number_store() {
        let store = MemoryStore::new();
        assert_eq!(store.current_crl_number().unwrap(), None);
        store.set_current_crl_number(9).unwrap();
        assert_eq!(store.current_crl_number().unwrap(), Some(9));
    }
}
