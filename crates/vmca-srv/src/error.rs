//! Error types for the certificate authority service.

use thiserror::Error;
use vmca_core::CaError;

/// Errors that can occur in service operations.
#[derive(Error, Debug)]
pub enum SrvError {
    /// Engine error (policy, signing, CRL).
    #[error(transparent)]
    Ca(#[from] CaError),

    /// Configuration is invalid.
    #[error("config error: {0}")]
    Config(String),

    /// State or store file is unreadable.
    #[error("state error: {0}")]
    State(String),

    /// Revocation reason code is not a CRL reason.
    #[error("invalid revocation reason code {0}")]
    InvalidReason(u32),

    /// Certificate was not issued by the installed CA.
    #[error("verification failed: {0}")]
    Verification(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SrvError {
    /// Whether the operation failed because no CA is installed.
    pub const fn is_missing_ca(&self) -> bool {
        matches!(self, Self::Ca(e) if e.is_missing_ca())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_ca_passthrough() {
        let err = SrvError::from(CaError::RootCaMissing);
        assert!(err.is_missing_ca());
        assert_eq!(err.to_string(), "root ca certificate is missing");
        assert!(!SrvError::InvalidReason(7).is_missing_ca());
    }
}
