//! Validity window arithmetic for issued certificates and CRLs.
//!
//! Issued certificates never outlive their CA: a requested notAfter past the
//! CA's own notAfter is clamped down rather than rejected. Requests that start
//! before the CA, or that are backdated further than the tolerated clock skew,
//! are rejected outright.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use ::time::OffsetDateTime;
use tracing::{debug, info};
use x509_parser::prelude::*;

use crate::{CaError, Result};

/// Default tolerated backdating of a requested notBefore (10 minutes).
pub const DEFAULT_BACK_SKEW_SECS: i64 = 600;

/// Default maximum lifetime of an issued certificate (10 years).
pub const DEFAULT_MAX_VALIDITY_DAYS: i64 = 3650;

/// Clock policy applied to every signing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateClock {
    /// How far before "now" a requested notBefore may lie.
    #[serde(default = "default_back_skew")]
    pub back_skew_secs: i64,

    /// Longest allowed notBefore..notAfter window, in days.
    #[serde(default = "default_max_validity")]
    pub max_validity_days: i64,
}

/// A validity window after policy has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validity {
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// notAfter was pulled down to the CA's notAfter.
    pub clamped: bool,
}

impl Default for CertificateClock {
    fn default() -> Self {
        Self {
            back_skew_secs: default_back_skew(),
            max_validity_days: default_max_validity(),
        }
    }
}

impl CertificateClock {
    /// Fit a requested window inside the CA's validity.
    pub fn clamp_validity(
        &self,
        ca_not_before: DateTime<Utc>,
        ca_not_after: DateTime<Utc>,
        requested_not_before: DateTime<Utc>,
        requested_not_after: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Validity> {
        if requested_not_after <= requested_not_before {
            return Err(CaError::InvalidTimeSpecified(format!(
                "notAfter {requested_not_after} is not after notBefore {requested_not_before}"
            )));
        }

        let earliest = now - Duration::seconds(self.back_skew_secs);
        if requested_not_before < earliest {
            return Err(CaError::InvalidTimeSpecified(format!(
                "notBefore {requested_not_before} is earlier than {earliest}"
            )));
        }

        if ca_not_before >= requested_not_before {
            return Err(CaError::StartTimeBeforeCa {
                requested: requested_not_before.to_rfc3339(),
                ca_not_before: ca_not_before.to_rfc3339(),
            });
        }

        if requested_not_before >= ca_not_after {
            return Err(CaError::InvalidTimeSpecified(format!(
                "notBefore {requested_not_before} is after the ca notAfter {ca_not_after}"
            )));
        }

        let mut not_after = requested_not_after;
        let mut clamped = false;
        if ca_not_after <= requested_not_after {
            info!(
                requested = %requested_not_after,
                ca_not_after = %ca_not_after,
                "using ca certificate notAfter for issued certificate"
            );
            not_after = ca_not_after;
            clamped = true;
        }

        // Duration is checked on the window that will actually be issued.
        let max = Duration::days(self.max_validity_days);
        if not_after - requested_not_before > max {
            return Err(CaError::InvalidTimeSpecified(format!(
                "validity exceeds {} days",
                self.max_validity_days
            )));
        }

        Ok(Validity {
            not_before: requested_not_before,
            not_after,
            clamped,
        })
    }

    /// lastUpdate for a CRL generated at `now`, backdated to absorb replica skew.
    pub fn crl_last_update(now: DateTime<Utc>, back_date_secs: i64) -> DateTime<Utc> {
        now - Duration::seconds(back_date_secs)
    }

    /// nextUpdate for a new CRL.
    ///
    /// Keeps the update interval of the prior CRL when it has a usable
    /// lastUpdate/nextUpdate pair. Otherwise falls back to the default
    /// validity, which is the normal path for the first CRL. The flag is
    /// `true` when the default was used.
    pub fn next_update(
        prior_crl_der: Option<&[u8]>,
        last_update: DateTime<Utc>,
        default_validity_days: i64,
    ) -> (DateTime<Utc>, bool) {
        if let Some(interval) = prior_crl_der.and_then(prior_interval) {
            return (last_update + interval, false);
        }
        debug!(
            days = default_validity_days,
            "no usable prior crl interval, using default validity"
        );
        (last_update + Duration::days(default_validity_days), true)
    }
}

fn prior_interval(der: &[u8]) -> Option<Duration> {
    let (_, crl) = parse_x509_crl(der).ok()?;
    let last = asn1_to_utc(crl.last_update())?;
    let next = asn1_to_utc(crl.next_update()?)?;
    let interval = next - last;
    (interval > Duration::zero()).then_some(interval)
}

/// Convert an ASN.1 time to UTC, `None` when out of range.
pub fn asn1_to_utc(t: ASN1Time) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(t.timestamp(), 0).single()
}

/// Convert to the time type used by the certificate builder.
pub fn to_offset(dt: DateTime<Utc>) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(dt.timestamp())
        .map_err(|e| CaError::InvalidTimeSpecified(format!("{dt}: {e}")))
}

// Default value functions for serde.
const fn default_back_skew() -> i64 {
    DEFAULT_BACK_SKEW_SECS
}

const fn default_max_validity() -> i64 {
    DEFAULT_MAX_VALIDITY_DAYS
}
