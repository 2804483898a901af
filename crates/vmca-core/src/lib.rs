//! # vmca-core
//!
//! Certificate signing and CRL engine for the VMware Certificate Authority.
//!
//! ## Components
//!
//! ```text
//! CaState ──► CaHandle (Arc, immutable)
//!    │
//!    ├── CertificateSigner: CSR ─► KeyPolicy ─► CertificateClock ─► ExtensionPolicy ─► cert
//!    │
//!    └── CrlBuilder ─► CrlNumberRegistry ─► temp file ─► CrlPublisher ─► live CRL
//! ```
//!
//! ## Locking
//!
//! - The CA slot in [`CaState`] and the CRL number in [`CrlNumberRegistry`]
//!   have independent locks; no operation needs both at once.
//! - [`CrlPublisher`] takes the service-wide lock exclusively while it copies.
//! - A [`CaHandle`] is immutable; holding its `Arc` is enough to use it.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vmca_core::{CaHandle, CaState, CertificateSigner};
//!
//! let state = CaState::new();
//! state.set_ca(Some(Arc::new(CaHandle::from_files(cert_path, key_path)?)));
//!
//! let ca = state.get_ca()?;
//! let issued = CertificateSigner::default().sign(&ca, &csr_pem, not_before, not_after)?;
//! println!("{}", issued.pem);
//! ```

pub mod ca;
pub mod clock;
pub mod crl;
pub mod error;
pub mod extensions;
pub mod key_policy;
pub mod signer;
pub mod state;
pub mod store;

#[cfg(test)]
mod testutil;

pub use ca::CaHandle;
pub use clock::{CertificateClock, Validity};
pub use crl::{BuiltCrl, CrlBuilder, CrlNumberRegistry, CrlPolicy, CrlPublisher, RevocationReason};
pub use error::CaError;
pub use extensions::ExtensionPolicy;
pub use key_policy::KeyPolicy;
pub use signer::{CertificateSigner, IssuedCertificate};
pub use state::{CaState, FunctionalLevel};
pub use store::{
    CertificateEntry, CertificateStatus, CertificateStore, CrlNumberStore, MemoryStore,
    RevokedCertificate,
};

/// Result type for CA engine operations.
pub type Result<T> = std::result::Result<T, CaError>;
