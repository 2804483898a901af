//! Builds and signs a full CRL from the revoked-certificate snapshot.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rcgen::{CertificateRevocationListParams, KeyIdMethod, RevokedCertParams, SerialNumber};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::number::CrlNumberRegistry;
use crate::clock::{to_offset, CertificateClock};
use crate::state::CaState;
use crate::store::{normalize_serial, CertificateStore, RevokedCertificate};
use crate::{CaError, Result};

/// CRL reason codes (RFC 5280 5.3.1). Code 7 is unassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RevocationReason {
    Unspecified,
    KeyCompromise,
    CaCompromise,
    AffiliationChanged,
    Superseded,
    CessationOfOperation,
    CertificateHold,
    RemoveFromCrl,
    PrivilegeWithdrawn,
    AaCompromise,
}

impl RevocationReason {
    /// Map a stored code; unknown codes are `Unspecified`.
    pub const fn from_code(code: u32) -> Self {
        match code {
            1 => Self::KeyCompromise,
            2 => Self::CaCompromise,
            3 => Self::AffiliationChanged,
            4 => Self::Superseded,
            5 => Self::CessationOfOperation,
            6 => Self::CertificateHold,
            8 => Self::RemoveFromCrl,
            9 => Self::PrivilegeWithdrawn,
            10 => Self::AaCompromise,
            _ => Self::Unspecified,
        }
    }

    /// Strict variant for caller input.
    pub const fn try_from_code(code: u32) -> Option<Self> {
        match code {
            0..=6 | 8..=10 => Some(Self::from_code(code)),
            _ => None,
        }
    }

    pub const fn code(self) -> u32 {
        match self {
            Self::Unspecified => 0,
            Self::KeyCompromise => 1,
            Self::CaCompromise => 2,
            Self::AffiliationChanged => 3,
            Self::Superseded => 4,
            Self::CessationOfOperation => 5,
            Self::CertificateHold => 6,
            Self::RemoveFromCrl => 8,
            Self::PrivilegeWithdrawn => 9,
            Self::AaCompromise => 10,
        }
    }
}

impl From<RevocationReason> for rcgen::RevocationReason {
    fn from(reason: RevocationReason) -> Self {
        match reason {
            RevocationReason::Unspecified => Self::Unspecified,
            RevocationReason::KeyCompromise => Self::KeyCompromise,
            RevocationReason::CaCompromise => Self::CaCompromise,
            RevocationReason::AffiliationChanged => Self::AffiliationChanged,
            RevocationReason::Superseded => Self::Superseded,
            RevocationReason::CessationOfOperation => Self::CessationOfOperation,
            RevocationReason::CertificateHold => Self::CertificateHold,
            RevocationReason::RemoveFromCrl => Self::RemoveFromCrl,
            RevocationReason::PrivilegeWithdrawn => Self::PrivilegeWithdrawn,
            RevocationReason::AaCompromise => Self::AaCompromise,
        }
    }
}

/// Timing of generated CRLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrlPolicy {
    /// Validity used when the prior CRL gives no usable interval.
    #[serde(default = "default_validity_days")]
    pub default_validity_days: i64,

    /// How far lastUpdate is set before the generation time.
    #[serde(default = "default_back_date")]
    pub back_date_secs: i64,
}

impl Default for CrlPolicy {
    fn default() -> Self {
        Self {
            default_validity_days: default_validity_days(),
            back_date_secs: default_back_date(),
        }
    }
}

/// Outcome of one regeneration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltCrl {
    pub number: u64,
    pub this_update: DateTime<Utc>,
    pub next_update: DateTime<Utc>,
    pub entries: usize,
    pub der: Vec<u8>,
    /// nextUpdate came from the default validity.
    pub used_default_validity: bool,
}

/// Regenerates the full CRL into a temporary file.
#[derive(Debug, Clone)]
pub struct CrlBuilder {
    policy: CrlPolicy,
    temp_path: PathBuf,
    live_path: PathBuf,
}

impl CrlBuilder {
    /// `live_path` is only read, for the previous update interval.
    pub fn new(policy: CrlPolicy, temp_path: impl Into<PathBuf>, live_path: impl Into<PathBuf>) -> Self {
        Self {
            policy,
            temp_path: temp_path.into(),
            live_path: live_path.into(),
        }
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn regenerate(
        &self,
        state: &CaState,
        certs: &dyn CertificateStore,
        numbers: &CrlNumberRegistry,
    ) -> Result<BuiltCrl> {
        self.regenerate_at(state, certs, numbers, Utc::now())
    }

    /// Build, sign and write a CRL as of `now`.
    ///
    /// Any failure aborts the cycle. A temporary file left behind is removed
    /// at the start of the next call.
    pub fn regenerate_at(
        &self,
        state: &CaState,
        certs: &dyn CertificateStore,
        numbers: &CrlNumberRegistry,
        now: DateTime<Utc>,
    ) -> Result<BuiltCrl> {
        self.remove_stale_temp()?;

        let ca = state.get_ca()?;
        let revoked = certs.query_revoked()?;

        let mut entries = revoked
            .iter()
            .map(revoked_entry)
            .collect::<Result<Vec<_>>>()?;
        entries.sort_by(|(a, _), (b, _)| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));

        let number = numbers.increment()?;

        let this_update = CertificateClock::crl_last_update(now, self.policy.back_date_secs);
        let prior = std::fs::read(&self.live_path).ok();
        let (next_update, used_default_validity) = CertificateClock::next_update(
            prior.as_deref(),
            this_update,
            self.policy.default_validity_days,
        );

        let params = CertificateRevocationListParams {
            this_update: to_offset(this_update)?,
            next_update: to_offset(next_update)?,
            crl_number: SerialNumber::from_slice(&minimal_be(number)),
            issuing_distribution_point: None,
            revoked_certs: entries.into_iter().map(|(_, entry)| entry).collect(),
            key_identifier_method: ca
                .key_id()
                .map_or(KeyIdMethod::Sha256, |id| KeyIdMethod::PreSpecified(id.to_vec())),
        };
        let crl = params.signed_by(ca.issuer())?;
        let der = crl.der().to_vec();

        std::fs::write(&self.temp_path, &der).map_err(|e| CaError::file_io(&self.temp_path, e))?;

        info!(
            crl_number = number,
            entries = revoked.len(),
            next_update = %next_update,
            used_default_validity,
            "generated crl"
        );
        Ok(BuiltCrl {
            number,
            this_update,
            next_update,
            entries: revoked.len(),
            der,
            used_default_validity,
        })
    }

    fn remove_stale_temp(&self) -> Result<()> {
        match std::fs::remove_file(&self.temp_path) {
            Ok(()) => {
                debug!(path = %self.temp_path.display(), "removed stale temporary crl");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CaError::file_io(&self.temp_path, e)),
        }
    }
}

/// CRL entry plus its serial bytes, the sort key.
fn revoked_entry(record: &RevokedCertificate) -> Result<(Vec<u8>, RevokedCertParams)> {
    let serial = serial_bytes(&record.serial_hex)?;
    let reason = RevocationReason::from_code(record.reason);
    if reason.code() != record.reason {
        warn!(
            serial = %record.serial_hex,
            code = record.reason,
            "unknown revocation reason, recording as unspecified"
        );
    }
    let entry = RevokedCertParams {
        serial_number: SerialNumber::from_slice(&serial),
        revocation_time: to_offset(record.revoked_at)?,
        reason_code: Some(reason.into()),
        invalidity_date: None,
    };
    Ok((serial, entry))
}

fn serial_bytes(serial_hex: &str) -> Result<Vec<u8>> {
    let digits = normalize_serial(serial_hex)?;
    let padded = if digits.len() % 2 == 1 {
        format!("0{digits}")
    } else {
        digits
    };
    hex::decode(&padded).map_err(|e| CaError::Store(format!("serial {serial_hex}: {e}")))
}

fn minimal_be(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count().min(7);
    bytes[skip..].to_vec()
}

const fn default_validity_days() -> i64 {
    7
}

const fn default_back_date() -> i64 {
    600
}
