//! vmca-srv: the certificate authority service around `vmca-core`.
//!
//! # Layout
//!
//! - [`config`] - TOML service configuration
//! - [`stores`] - JSON-file certificate database and CRL number store
//! - [`service`] - [`CaService`], the locked entrypoints (issue, revoke, CRL)
//! - [`refresher`] - background thread that regenerates the CRL periodically
//!
//! # Locking
//!
//! One service-wide readers/writer lock. Reads (root certificate, CRL bytes,
//! enumeration, verification) share it; issuance, revocation, root
//! installation and CRL publication take it exclusively.

pub mod config;
pub mod error;
pub mod refresher;
pub mod service;
pub mod stores;

// Re-exports for convenience.
pub use config::ServiceConfig;
pub use error::SrvError;
pub use refresher::CrlRefresher;
pub use service::{CaService, CrlInfo};

/// Result type for vmca-srv operations.
pub type Result<T> = std::result::Result<T, SrvError>;
