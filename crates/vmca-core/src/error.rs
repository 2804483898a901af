//! Error types for the certificate authority engine.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while signing certificates or building CRLs.
#[derive(Error, Debug)]
pub enum CaError {
    /// Public key is not RSA or its modulus is outside the allowed range.
    #[error("invalid key length: {bits} bits (allowed {min}..={max}, RSA only)")]
    InvalidKeyLength { bits: usize, min: usize, max: usize },

    /// A CSR field is malformed, missing, or requests something a leaf may not have.
    #[error("invalid csr field: {0}")]
    InvalidCsrField(String),

    /// Requested validity window is backdated or too long.
    #[error("invalid time specified: {0}")]
    InvalidTimeSpecified(String),

    /// Requested start time is not after the CA certificate's own notBefore.
    #[error("requested start {requested} is not after the ca notBefore {ca_not_before}")]
    StartTimeBeforeCa {
        requested: String,
        ca_not_before: String,
    },

    /// Subject name contains a wildcard.
    #[error("invalid subject name: {0}")]
    InvalidSubjectName(String),

    /// Subject alternative names violate policy.
    #[error("invalid subject alternative name: {0}")]
    InvalidSan(String),

    /// No CA certificate is installed.
    #[error("root ca certificate is missing")]
    RootCaMissing,

    /// Supplied certificate cannot act as a CA.
    #[error("not a ca certificate: {0}")]
    NotCaCertificate(String),

    /// Private key does not belong to the certificate.
    #[error("ca certificate and private key do not match")]
    CertKeyMismatch,

    /// Certificate or CRL construction/signing failed.
    #[error("ssl error: {0}")]
    Ssl(String),

    /// Extension encoding failed.
    #[error("extension error: {0}")]
    Extension(String),

    /// Request could not be decoded.
    #[error("request error: {0}")]
    Request(String),

    /// CRL number store failed.
    #[error("crl number error: {0}")]
    CrlNumber(String),

    /// Certificate database failed.
    #[error("certificate store error: {0}")]
    Store(String),

    /// Serial not known to the certificate database.
    #[error("certificate not found: {0}")]
    CertificateNotFound(String),

    /// Serial has already been revoked.
    #[error("certificate already revoked: {0}")]
    AlreadyRevoked(String),

    /// File read/write failed.
    #[error("file io error on {}: {source}", path.display())]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CaError {
    /// Wrap an IO error with the path it happened on.
    pub fn file_io(path: &Path, source: std::io::Error) -> Self {
        Self::FileIo {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Whether this error is a synchronous policy rejection of the caller's input.
    pub const fn is_policy_violation(&self) -> bool {
        matches!(
            self,
            Self::InvalidKeyLength { .. }
                | Self::InvalidCsrField(_)
                | Self::InvalidTimeSpecified(_)
                | Self::StartTimeBeforeCa { .. }
                | Self::InvalidSubjectName(_)
                | Self::InvalidSan(_)
        )
    }

    /// Whether the operation failed because no CA is installed.
    pub const fn is_missing_ca(&self) -> bool {
        matches!(self, Self::RootCaMissing)
    }
}

impl From<rcgen::Error> for CaError {
    fn from(e: rcgen::Error) -> Self {
        Self::Ssl(e.to_string())
    }
}
