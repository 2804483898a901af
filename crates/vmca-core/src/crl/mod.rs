//! CRL numbering, construction and publication.
//!
//! A regeneration cycle is: [`CrlBuilder::regenerate`] writes a freshly signed
//! CRL to the temporary path, then [`CrlPublisher::publish`] copies it over
//! the live path.

pub mod builder;
pub mod number;
pub mod publisher;

pub use builder::{BuiltCrl, CrlBuilder, CrlPolicy, RevocationReason};
pub use number::CrlNumberRegistry;
pub use publisher::CrlPublisher;
