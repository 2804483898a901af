//! JSON-file implementations of the engine's store traits.
//!
//! Both stores rewrite their whole file on every change, through a sibling
//! temporary file and a rename, so a crash leaves either the old or the new
//! contents on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use vmca_core::store::normalize_serial;
use vmca_core::{CaError, CertificateEntry, CertificateStore, CrlNumberStore, RevokedCertificate};

/// Certificate database kept as a JSON array.
#[derive(Debug)]
pub struct JsonCertificateStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, CertificateEntry>>,
}

impl JsonCertificateStore {
    /// Open the database; a missing file is an empty database.
    pub fn open(path: impl Into<PathBuf>) -> crate::Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| crate::SrvError::State(format!("failed to read {}: {e}", path.display())))?;
            let list: Vec<CertificateEntry> = serde_json::from_str(&content)
                .map_err(|e| crate::SrvError::State(format!("failed to parse {}: {e}", path.display())))?;
            list.into_iter()
                .map(|entry| Ok((normalize_serial(&entry.serial_hex)?, entry)))
                .collect::<vmca_core::Result<BTreeMap<_, _>>>()?
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), entries = entries.len(), "opened certificate database");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn save(&self, entries: &BTreeMap<String, CertificateEntry>) -> vmca_core::Result<()> {
        let list: Vec<&CertificateEntry> = entries.values().collect();
        let json = serde_json::to_vec_pretty(&list)
            .map_err(|e| CaError::Store(format!("encode certificate database: {e}")))?;
        write_replace(&self.path, &json)
    }
}

impl CertificateStore for JsonCertificateStore {
    fn query_revoked(&self) -> vmca_core::Result<Vec<RevokedCertificate>> {
        Ok(self
            .entries
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

    fn add_certificate(&self, mut entry: CertificateEntry) -> vmca_core::Result<()> {
        entry.serial_hex = normalize_serial(&entry.serial_hex)?;
        let mut entries = self.entries.lock();
        let mut updated = entries.clone();
        updated.insert(entry.serial_hex.clone(), entry);
        self.save(&updated)?;
        *entries = updated;
        Ok(())
    }

    fn revoke_certificate(
        &self,
        serial_hex: &str,
        reason: u32,
        at: DateTime<Utc>,
    ) -> vmca_core::Result<()> {
        let serial = normalize_serial(serial_hex)?;
        let mut entries = self.entries.lock();
        let mut updated = entries.clone();
        let entry = updated
            .get_mut(&serial)
            .ok_or_else(|| CaError::CertificateNotFound(serial.clone()))?;
        if entry.revoked_at.is_some() {
            return Err(CaError::AlreadyRevoked(serial));
        }
        entry.revoked_at = Some(at);
        entry.reason = Some(reason);
        self.save(&updated)?;
        *entries = updated;
        Ok(())
    }

    fn get_certificate(&self, serial_hex: &str) -> vmca_core::Result<Option<CertificateEntry>> {
        let serial = normalize_serial(serial_hex)?;
        Ok(self.entries.lock().get(&serial).cloned())
    }

    fn list_certificates(&self) -> vmca_core::Result<Vec<CertificateEntry>> {
        Ok(self.entries.lock().values().cloned().collect())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CrlNumberFile {
    crl_number: u64,
}

/// CRL number kept in a small JSON file.
#[derive(Debug, Clone)]
pub struct JsonCrlNumberStore {
    path: PathBuf,
}

impl JsonCrlNumberStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CrlNumberStore for JsonCrlNumberStore {
    fn current_crl_number(&self) -> vmca_core::Result<Option<u64>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CaError::file_io(&self.path, e)),
        };
        let file: CrlNumberFile = serde_json::from_str(&content)
            .map_err(|e| CaError::CrlNumber(format!("parse {}: {e}", self.path.display())))?;
        Ok(Some(file.crl_number))
    }

    fn set_current_crl_number(&self, number: u64) -> vmca_core::Result<()> {
        let json = serde_json::to_vec(&CrlNumberFile { crl_number: number })
            .map_err(|e| CaError::CrlNumber(e.to_string()))?;
        write_replace(&self.path, &json)
    }
}

/// Write `bytes` to a sibling file, sync it, and rename it over `path`.
fn write_replace(path: &Path, bytes: &[u8]) -> vmca_core::Result<()> {
    use std::io::Write;

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".new");
    let tmp = PathBuf::from(tmp_name);

    let mut file = std::fs::File::create(&tmp).map_err(|e| CaError::file_io(&tmp, e))?;
    file.write_all(bytes).map_err(|e| CaError::file_io(&tmp, e))?;
    file.sync_all().map_err(|e| CaError::file_io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| CaError::file_io(path, e))
}
