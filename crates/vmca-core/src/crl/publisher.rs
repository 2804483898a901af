//! Copies a freshly built CRL over the live one.

use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, info};

use crate::{CaError, Result};

/// Copy buffer size.
pub const CHUNK_SIZE: usize = 4096;

/// Publishes the temporary CRL to the live path.
///
/// The copy is sequential, not a rename: a reader that opens the live file
/// without taking the service lock can observe it mid-copy. The temporary
/// file stays in place for the next cycle to clean up.
#[derive(Debug, Clone)]
pub struct CrlPublisher {
    temp_path: PathBuf,
    live_path: PathBuf,
    service_lock: Arc<RwLock<()>>,
}

impl CrlPublisher {
    pub fn new(
        temp_path: impl Into<PathBuf>,
        live_path: impl Into<PathBuf>,
        service_lock: Arc<RwLock<()>>,
    ) -> Self {
        Self {
            temp_path: temp_path.into(),
            live_path: live_path.into(),
            service_lock,
        }
    }

    pub fn live_path(&self) -> &Path {
        &self.live_path
    }

    /// Copy temp to live under the exclusive service lock.
    ///
    /// Returns the number of bytes written. A short write is fatal.
    pub fn publish(&self) -> Result<u64> {
        let _guard = self.service_lock.write();
        self.copy_temp_to_live().map_err(|e| {
            error!(
                temp = %self.temp_path.display(),
                live = %self.live_path.display(),
                error = %e,
                "failed to copy temporary crl"
            );
            e
        })
    }

    fn copy_temp_to_live(&self) -> Result<u64> {
        let mut src =
            File::open(&self.temp_path).map_err(|e| CaError::file_io(&self.temp_path, e))?;
        let mut dst =
            File::create(&self.live_path).map_err(|e| CaError::file_io(&self.live_path, e))?;

        let mut buf = [0u8; CHUNK_SIZE];
        let mut total = 0u64;
        loop {
            let read = match src.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(CaError::file_io(&self.temp_path, e)),
            };
            let written = dst
                .write(&buf[..read])
                .map_err(|e| CaError::file_io(&self.live_path, e))?;
            if written != read {
                return Err(CaError::file_io(
                    &self.live_path,
                    std::io::Error::new(
                        ErrorKind::WriteZero,
                        format!("short write: {written} of {read} bytes"),
                    ),
                ));
            }
            total += written as u64;
        }
        dst.sync_all()
            .map_err(|e| CaError::file_io(&self.live_path, e))?;

        info!(bytes = total, path = %self.live_path.display(), "published crl");
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn publisher(dir: &Path) -> CrlPublisher {
        CrlPublisher::new(
            dir.join("fullcrl.crl.tmp"),
            dir.join("fullcrl.crl"),
            Arc::new(RwLock::new(())),
        )
    }

    #[test]
    fn test_copies_multi_chunk_file() {
        let dir = tempfile::tempdir().unwrap();
        let p = publisher(dir.path());
        let data: Vec<u8> = (0..CHUNK_SIZE * 3 + 17).map(|i| (i % 251) as u8).collect();
        std::fs::write(dir.path().join("fullcrl.crl.tmp"), &data).unwrap();

        assert_eq!(p.publish().unwrap(), data.len() as u64);
        assert_eq!(std::fs::read(p.live_path()).unwrap(), data);
        // Temporary file is left in place.
        assert!(dir.path().join("fullcrl.crl.tmp").exists());
    }

    #[test]
    fn test_replaces_longer_live_file() {
        let dir = tempfile::tempdir().unwrap();
        let p = publisher(dir.path());
        std::fs::write(p.live_path(), vec![7u8; 10_000]).unwrap();
        std::fs::write(dir.path().join("fullcrl.crl.tmp"), b"short").unwrap();
        p.publish().unwrap();
        assert_eq!(std::fs::read(p.live_path()).unwrap(), b"short");
    }

    #[test]
    fn test_missing_temp_is_file_io() {
        let dir = tempfile::tempdir().unwrap();
        let err = publisher(dir.path()).publish().unwrap_err();
        assert!(matches!(err, CaError::FileIo { .. }));
    }

    #[test]
    fn test_unwritable_live_is_file_io() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("fullcrl.crl.tmp"), b"crl").unwrap();
        let p = CrlPublisher::new(
            dir.path().join("fullcrl.crl.tmp"),
            dir.path().join("missing").join("fullcrl.crl"),
            Arc::new(RwLock::new(())),
        );
        assert!(matches!(p.publish(), Err(CaError::FileIo { .. })));
    }

    #[test]
    fn test_waits_for_readers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("fullcrl.crl.tmp"), b"crl").unwrap();
        let lock = Arc::new(RwLock::new(()));
        let p = CrlPublisher::new(
            dir.path().join("fullcrl.crl.tmp"),
            dir.path().join("fullcrl.crl"),
            Arc::clone(&lock),
        );

        let reader = lock.read();
        let handle = std::thread::spawn(move || p.publish());
        std::thread::sleep(Duration::from_millis(50));
        assert!(!dir.path().join("fullcrl.crl").exists());
        drop(reader);
        handle.join().unwrap().unwrap();
        assert_eq!(std::fs::read(dir.path().join("fullcrl.crl")).unwrap(), b"crl");
    }
}
