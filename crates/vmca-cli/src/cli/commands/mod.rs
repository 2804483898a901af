//! Command implementations.

pub mod cert;
pub mod crl;
pub mod root;
pub mod serve;

use anyhow::{Context as _, Result};
use vmca_srv::{CaService, ServiceConfig};

use crate::output::OutputFormat;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    pub config: ServiceConfig,
    pub output_format: OutputFormat,
}

impl Context {
    /// Open the service over the configured data directory.
    pub fn service(&self) -> Result<CaService> {
        CaService::open(self.config.clone()).with_context(|| {
            format!("opening data directory {}", self.config.data_dir.display())
        })
    }
}

/// Read a PEM input file.
pub(crate) fn read_pem(path: &std::path::Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}
