//! The process-wide slot holding the current CA.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::ca::CaHandle;
use crate::{CaError, Result};

/// Bitmask of what the service can currently do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FunctionalLevel(u32);

impl FunctionalLevel {
    /// No CA installed.
    pub const ROOT_MISSING: Self = Self(0);
    /// A CA is installed and can sign.
    pub const SELF_CA: Self = Self(1);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Holds the current CA handle.
///
/// The slot lock is only held long enough to swap or clone the `Arc`, so it
/// never nests with the CRL-number lock.
#[derive(Debug, Default)]
pub struct CaState {
    slot: RwLock<Option<Arc<CaHandle>>>,
    level: AtomicU32,
}

impl CaState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (`Some`) or clear (`None`) the CA, returning the previous one.
    ///
    /// Holders of the previous handle keep using it until they drop it.
    pub fn set_ca(&self, handle: Option<Arc<CaHandle>>) -> Option<Arc<CaHandle>> {
        let mut slot = self.slot.write();
        let level = if handle.is_some() {
            FunctionalLevel::SELF_CA
        } else {
            FunctionalLevel::ROOT_MISSING
        };
        if let Some(ca) = &handle {
            info!(subject = ca.subject(), "installed ca certificate");
        } else {
            info!("cleared ca certificate");
        }
        let previous = std::mem::replace(&mut *slot, handle);
        self.level.store(level.bits(), Ordering::Release);
        previous
    }

    /// Fail fast unless a CA is installed.
    pub fn validate(&self) -> Result<()> {
        if self.functional_level().contains(FunctionalLevel::SELF_CA) {
            Ok(())
        } else {
            Err(CaError::RootCaMissing)
        }
    }

    /// A new reference to the current CA.
    pub fn get_ca(&self) -> Result<Arc<CaHandle>> {
        self.slot.read().clone().ok_or(CaError::RootCaMissing)
    }

    pub fn functional_level(&self) -> FunctionalLevel {
        FunctionalLevel(self.level.load(Ordering::Acquire))
    }
}
