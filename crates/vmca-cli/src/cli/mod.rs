//! CLI argument parsing and command dispatch.

pub mod args;
pub mod commands;

use anyhow::{Context as _, Result};
use args::{Cli, Commands};
use clap::Parser;
use vmca_srv::ServiceConfig;

/// Run the CLI application.
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ServiceConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    let ctx = commands::Context {
        config,
        output_format: cli.output,
    };

    match cli.command {
        Commands::Serve => commands::serve::execute(&ctx),
        Commands::InitRoot(args) => commands::root::init(&ctx, &args),
        Commands::GetRoot => commands::root::get(&ctx),
        Commands::Sign(args) => commands::cert::sign(&ctx, &args),
        Commands::Revoke(args) => commands::cert::revoke(&ctx, &args),
        Commands::List(args) => commands::cert::list(&ctx, &args),
        Commands::Verify(args) => commands::cert::verify(&ctx, &args),
        Commands::GenCrl => commands::crl::generate(&ctx),
        Commands::GetCrl(args) => commands::crl::get(&ctx, &args),
        Commands::CrlInfo => commands::crl::info(&ctx),
    }
}
