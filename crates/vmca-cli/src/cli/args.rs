//! Command-line argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use vmca_core::CertificateStatus;

use crate::output::OutputFormat;

/// VMware Certificate Authority
///
/// Issues X.509 certificates from PKCS#10 requests, tracks revocations and
/// publishes a signed CRL under the data directory.
#[derive(Parser, Debug)]
#[command(name = "vmcad")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Service configuration file
    #[arg(
        short,
        long,
        env = "VMCA_CONFIG",
        default_value = "/etc/vmca/vmca.toml",
        global = true
    )]
    pub config: PathBuf,

    /// Override the configured data directory
    #[arg(long, env = "VMCA_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Keep the CRL fresh until interrupted
    Serve,

    /// Install a CA certificate (bundle) and its private key
    InitRoot(InitRootArgs),

    /// Print the CA certificate and its chain
    GetRoot,

    /// Sign a certificate signing request
    Sign(SignArgs),

    /// Revoke a certificate by PEM file or serial number
    Revoke(RevokeArgs),

    /// List issued certificates
    List(ListArgs),

    /// Check a certificate against this CA
    Verify(VerifyArgs),

    /// Regenerate and publish the CRL now
    GenCrl,

    /// Write the published CRL to a file or stdout
    GetCrl(GetCrlArgs),

    /// Show number, update times and entry count of the published CRL
    CrlInfo,
}

#[derive(Args, Debug)]
pub struct InitRootArgs {
    /// PEM file holding the CA certificate, optionally followed by its chain
    #[arg(long)]
    pub cert: PathBuf,

    /// PEM file holding the CA private key
    #[arg(long)]
    pub key: PathBuf,
}

#[derive(Args, Debug)]
pub struct SignArgs {
    /// PEM-encoded PKCS#10 request
    pub csr: PathBuf,

    /// Start of validity (RFC 3339); defaults to now
    #[arg(long)]
    pub not_before: Option<String>,

    /// End of validity (RFC 3339); overrides --days
    #[arg(long)]
    pub not_after: Option<String>,

    /// Validity in days from the start
    #[arg(long, default_value = "365")]
    pub days: u32,

    /// Write the certificate here instead of stdout
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct RevokeArgs {
    /// Certificate PEM file to revoke
    #[arg(long, conflicts_with = "serial", required_unless_present = "serial")]
    pub cert: Option<PathBuf>,

    /// Serial number (hex) to revoke
    #[arg(long)]
    pub serial: Option<String>,

    /// RFC 5280 reason code (0-6, 8-10)
    #[arg(long, default_value = "0")]
    pub reason: u32,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only certificates with this status
    #[arg(long, value_enum)]
    pub status: Option<StatusFilter>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StatusFilter {
    Active,
    Revoked,
    Expired,
}

impl From<StatusFilter> for CertificateStatus {
    fn from(filter: StatusFilter) -> Self {
        match filter {
            StatusFilter::Active => Self::Active,
            StatusFilter::Revoked => Self::Revoked,
            StatusFilter::Expired => Self::Expired,
        }
    }
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Certificate PEM file
    pub cert: PathBuf,
}

#[derive(Args, Debug)]
pub struct GetCrlArgs {
    /// Output file; stdout when absent
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_revoke_by_serial() {
        let cli = Cli::try_parse_from(["vmcad", "revoke", "--serial", "0A1B", "--reason", "1"])
            .unwrap();
        match cli.command {
            Commands::Revoke(args) => {
                assert_eq!(args.serial.as_deref(), Some("0A1B"));
                assert_eq!(args.reason, 1);
                assert!(args.cert.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_revoke_needs_target() {
        assert!(Cli::try_parse_from(["vmcad", "revoke"]).is_err());
    }

    #[test]
    fn test_sign_defaults() {
        let cli = Cli::try_parse_from(["vmcad", "--data-dir", "/tmp/x", "sign", "req.csr"]).unwrap();
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/x")));
        match cli.command {
            Commands::Sign(args) => {
                assert_eq!(args.days, 365);
                assert!(args.not_before.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
