//! Monotonic CRL numbering.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::store::CrlNumberStore;
use crate::{CaError, Result};

/// Process-wide CRL number.
///
/// Guarded by its own mutex, independent of the CA slot. The persisted value
/// is always written before the in-memory one, so a restart can never hand
/// out a number that was already used.
pub struct CrlNumberRegistry {
    store: Arc<dyn CrlNumberStore>,
    current: Mutex<Option<u64>>,
}

impl CrlNumberRegistry {
    pub fn new(store: Arc<dyn CrlNumberStore>) -> Self {
        Self {
            store,
            current: Mutex::new(None),
        }
    }

    /// Read the persisted number; a missing value means 0.
    ///
    /// `published_floor` is the number of the CRL currently on disk, if any.
    /// The registry starts from whichever is larger, so a stale or lost store
    /// cannot cause reuse.
    pub fn load(&self, published_floor: Option<u64>) -> Result<u64> {
        let mut current = self.current.lock();
        let stored = self.store.current_crl_number()?.unwrap_or(0);
        let value = stored.max(published_floor.unwrap_or(0));
        if value > stored {
            info!(stored, published = value, "crl number store behind published crl");
        }
        *current = Some(value);
        debug!(crl_number = value, "loaded crl number");
        Ok(value)
    }

    /// Persist and return the next number.
    ///
    /// On a persistence failure the in-memory value is left unchanged.
    pub fn increment(&self) -> Result<u64> {
        let mut current = self.current.lock();
        let base = match *current {
            Some(value) => value,
            None => self.store.current_crl_number()?.unwrap_or(0),
        };
        let next = base
            .checked_add(1)
            .ok_or_else(|| CaError::CrlNumber(format!("crl number {base} cannot be incremented")))?;
        if let Err(e) = self.store.set_current_crl_number(next) {
            error!(crl_number = next, error = %e, "failed to persist crl number");
            return Err(e);
        }
        *current = Some(next);
        Ok(next)
    }

    /// Last number handed out, `None` before [`load`](Self::load).
    pub fn current(&self) -> Option<u64> {
        *self.current.lock()
    }
}

impl std::fmt::Debug for CrlNumberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrlNumberRegistry")
            .field("current", &self.current())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::CaError;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Store whose writes can be made to fail.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail: AtomicBool,
    }

    impl CrlNumberStore for FlakyStore {
        fn current_crl_number(&self) -> Result<Option<u64>> {
            self.inner.current_crl_number()
        }

        fn set_current_crl_number(&self, number: u64) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(CaError::CrlNumber("disk full".into()));
            }
            self.inner.set_current_crl_number(number)
        }
    }

    #[test]
    fn test_fresh_store_starts_at_zero() {
        let registry = CrlNumberRegistry::new(Arc::new(MemoryStore::new()));
        assert_eq!(registry.current(), None);
        assert_eq!(registry.load(None).unwrap(), 0);
        assert_eq!(registry.increment().unwrap(), 1);
        assert_eq!(registry.increment().unwrap(), 2);
    }

    #[test]
    fn test_increments_are_persisted() {
        let store = Arc::new(MemoryStore::new());
        store.set_current_crl_number(41).unwrap();
        let registry = CrlNumberRegistry::new(store.clone());
        registry.load(None).unwrap();
        assert_eq!(registry.increment().unwrap(), 42);
        assert_eq!(store.current_crl_number().unwrap(), Some(42));

        // A new registry over the same store continues the sequence.
        let restarted = CrlNumberRegistry::new(store);
        assert_eq!(restarted.load(None).unwrap(), 42);
        assert_eq!(restarted.increment().unwrap(), 43);
    }

    #[test]
    fn test_exhausted_number_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        let registry = CrlNumberRegistry::new(store.clone());
        registry.load(Some(u64::MAX)).unwrap();
        assert!(matches!(registry.increment(), Err(CaError::CrlNumber(_))));
        assert_eq!(registry.current(), Some(u64::MAX));
        assert_eq!(store.current_crl_number().unwrap(), None);
    }

    #[test]
    fn test_published_floor_wins() {
        let store = Arc::new(MemoryStore::new());
        store.set_current_crl_number(3).unwrap();
        let registry = CrlNumberRegistry::new(store);
        assert_eq!(registry.load(Some(10)).unwrap(), 10);
        assert_eq!(registry.increment().unwrap(), 11);
    }

    #[test]
    fn test_failed_persist_keeps_memory() {
        let store = Arc::new(FlakyStore::default());
        let registry = CrlNumberRegistry::new(store.clone());
        registry.load(None).unwrap();
        assert_eq!(registry.increment().unwrap(), 1);

        store.fail.store(true, Ordering::SeqCst);
        assert!(registry.increment().is_err());
        assert_eq!(registry.current(), Some(1));

        store.fail.store(false, Ordering::SeqCst);
        assert_eq!(registry.increment().unwrap(), 2);
    }

    #[test]
    fn test_lazy_load_on_increment() {
        let store = Arc::new(MemoryStore::new());
        store.set_current_crl_number(7).unwrap();
        let registry = CrlNumberRegistry::new(store);
        assert_eq!(registry.increment().unwrap(), 8);
    }

    #[test]
    fn test_concurrent_increments_unique() {
        let registry = Arc::new(CrlNumberRegistry::new(Arc::new(MemoryStore::new())));
        registry.load(None).unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    (0..25)
                        .map(|_| registry.increment().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (1..=200).collect::<Vec<_>>());
    }
}
