//! Service configuration for the certificate authority.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use vmca_core::{CertificateClock, CertificateSigner, CrlPolicy, ExtensionPolicy, KeyPolicy};

/// Configuration for a CA service instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Directory holding the root certificate, key, CRL and stores.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// File names inside `data_dir`.
    #[serde(default)]
    pub files: FileNames,

    /// Accepted subject keys.
    #[serde(default)]
    pub keys: KeyPolicy,

    /// Validity window policy for issued certificates.
    #[serde(default)]
    pub validity: CertificateClock,

    /// Extension policy for issued certificates.
    #[serde(default)]
    pub extensions: ExtensionPolicy,

    /// CRL timing and refresh.
    #[serde(default)]
    pub crl: CrlConfig,
}

/// Names of the files the service keeps in its data directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNames {
    #[serde(default = "default_root_cert")]
    pub root_cert: String,
    #[serde(default = "default_private_key")]
    pub private_key: String,
    #[serde(default = "default_crl")]
    pub crl: String,
    #[serde(default = "default_crl_temp")]
    pub crl_temp: String,
    #[serde(default = "default_cert_db")]
    pub cert_db: String,
    #[serde(default = "default_crl_number")]
    pub crl_number: String,
}

/// CRL generation settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrlConfig {
    #[serde(flatten)]
    pub policy: CrlPolicy,

    /// How often the background refresher regenerates the CRL (seconds).
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            files: FileNames::default(),
            keys: KeyPolicy::default(),
            validity: CertificateClock::default(),
            extensions: ExtensionPolicy::default(),
            crl: CrlConfig::default(),
        }
    }
}

impl Default for FileNames {
    fn default() -> Self {
        Self {
            root_cert: default_root_cert(),
            private_key: default_private_key(),
            crl: default_crl(),
            crl_temp: default_crl_temp(),
            cert_db: default_cert_db(),
            crl_number: default_crl_number(),
        }
    }
}

impl Default for CrlConfig {
    fn default() -> Self {
        Self {
            policy: CrlPolicy::default(),
            refresh_interval_secs: default_refresh_interval(),
        }
    }
}

impl ServiceConfig {
    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self =
                toml::from_str(&content).map_err(|e| crate::SrvError::Config(e.to_string()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject settings the engine cannot work with.
    pub fn validate(&self) -> crate::Result<()> {
        if self.keys.min_bits > self.keys.max_bits {
            return Err(crate::SrvError::Config(format!(
                "keys.min_bits {} exceeds keys.max_bits {}",
                self.keys.min_bits, self.keys.max_bits
            )));
        }
        if self.validity.max_validity_days <= 0 {
            return Err(crate::SrvError::Config(
                "validity.max_validity_days must be positive".into(),
            ));
        }
        if self.crl.policy.default_validity_days <= 0 {
            return Err(crate::SrvError::Config(
                "crl.default_validity_days must be positive".into(),
            ));
        }
        if self.crl.refresh_interval_secs == 0 {
            return Err(crate::SrvError::Config(
                "crl.refresh_interval_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    /// The signer these policies describe.
    pub fn signer(&self) -> CertificateSigner {
        CertificateSigner::new(self.validity, self.keys, self.extensions.clone())
    }

    pub const fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.crl.refresh_interval_secs)
    }

    pub fn root_cert_path(&self) -> PathBuf {
        self.data_dir.join(&self.files.root_cert)
    }

    pub fn private_key_path(&self) -> PathBuf {
        self.data_dir.join(&self.files.private_key)
    }

    pub fn crl_path(&self) -> PathBuf {
        self.data_dir.join(&self.files.crl)
    }

    pub fn crl_temp_path(&self) -> PathBuf {
        self.data_dir.join(&self.files.crl_temp)
    }

    pub fn cert_db_path(&self) -> PathBuf {
        self.data_dir.join(&self.files.cert_db)
    }

    pub fn crl_number_path(&self) -> PathBuf {
        self.data_dir.join(&self.files.crl_number)
    }
}

// Default value functions for serde.
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/vmca")
}

fn default_root_cert() -> String {
    String::from("root.cer")
}

fn default_private_key() -> String {
    String::from("privatekey.pem")
}

fn default_crl() -> String {
    String::from("fullcrl.crl")
}

fn default_crl_temp() -> String {
    String::from("fullcrl.crl.tmp")
}

fn default_cert_db() -> String {
    String::from("certdb.json")
}

fn default_crl_number() -> String {
    String::from("crlnumber.json")
}

const fn default_refresh_interval() -> u64 {
    3600
}
