//! Background CRL regeneration.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::service::CaService;

/// Periodically regenerates and republishes the CRL so its nextUpdate
/// never lapses while the service runs.
#[derive(Debug)]
pub struct CrlRefresher {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CrlRefresher {
    pub fn spawn(service: Arc<CaService>, interval: Duration) -> std::io::Result<Self> {
        let (stop, rx) = mpsc::channel::<()>();
        let handle = std::thread::Builder::new()
            .name("crl-refresh".into())
            .spawn(move || {
                info!(interval_secs = interval.as_secs(), "crl refresher started");
                loop {
                    match rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    match service.regenerate_crl() {
                        Ok(built) => debug!(crl_number = built.number, "crl refreshed"),
                        Err(e) if e.is_missing_ca() => debug!("crl refresh skipped: no root ca"),
                        Err(e) => warn!(error = %e, "crl refresh failed, retrying next tick"),
                    }
                }
                info!("crl refresher stopped");
            })?;
        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    /// Ask the worker to exit after its current pass.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }

    /// Stop the worker and wait for it.
    pub fn join(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("crl refresher panicked");
            }
        }
    }
}

impl Drop for CrlRefresher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;

    fn service(dir: &std::path::Path) -> Arc<CaService> {
        let config = ServiceConfig {
            data_dir: dir.to_path_buf(),
            ..ServiceConfig::default()
        };
        Arc::new(CaService::open(config).unwrap())
    }

    #[test]
    fn test_refresher_survives_missing_ca_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let refresher = CrlRefresher::spawn(Arc::clone(&svc), Duration::from_millis(10)).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        refresher.join();
        assert!(!dir.path().join("fullcrl.crl").exists());
    }

    #[test]
    fn test_refresher_republishes() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());

        let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "Refresh Root");
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let cert = params.self_signed(&key).unwrap();
        svc.add_root_certificate(&cert.pem(), &key.serialize_pem())
            .unwrap();

        let mut refresher =
            CrlRefresher::spawn(Arc::clone(&svc), Duration::from_millis(10)).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while svc.crl_info().unwrap().crl_number < Some(3) && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        refresher.stop();
        drop(refresher);
        assert!(svc.crl_info().unwrap().crl_number >= Some(3));
    }
}
