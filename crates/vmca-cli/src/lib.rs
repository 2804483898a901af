//! # vmca-cli
//!
//! Front end for the certificate authority in `vmca-srv`: install a root,
//! sign CSRs, revoke, and publish or inspect the CRL. `vmcad serve` keeps
//! the CRL fresh in the foreground.

pub mod cli;
pub mod output;

pub use cli::run;
