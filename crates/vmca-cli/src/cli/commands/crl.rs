//! CRL commands: gen-crl, get-crl, crl-info.

use std::io::Write;

use anyhow::{Context as _, Result};
use vmca_srv::service::MAX_CRL_CHUNK;

use super::Context;
use crate::cli::args::GetCrlArgs;
use crate::output::emit;

pub fn generate(ctx: &Context) -> Result<()> {
    let service = ctx.service()?;
    service.regenerate_crl()?;
    let info = service.crl_info()?;
    emit(ctx.output_format, &info, describe)
}

/// Copy the published CRL out in bounded reads.
pub fn get(ctx: &Context, args: &GetCrlArgs) -> Result<()> {
    let service = ctx.service()?;
    let mut der = Vec::new();
    loop {
        let chunk = service.get_crl(der.len() as u64, MAX_CRL_CHUNK)?;
        if chunk.is_empty() {
            break;
        }
        der.extend_from_slice(&chunk);
    }

    match &args.out {
        Some(path) => {
            std::fs::write(path, &der).with_context(|| format!("writing {}", path.display()))?;
        }
        None => std::io::stdout().lock().write_all(&der)?,
    }
    Ok(())
}

pub fn info(ctx: &Context) -> Result<()> {
    let info = ctx.service()?.crl_info()?;
    emit(ctx.output_format, &info, describe)
}

fn describe(info: &vmca_srv::CrlInfo) -> String {
    let fmt = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map_or_else(|| "-".to_string(), |t| t.to_rfc3339())
    };
    format!(
        "CRL number:  {}\nLast update: {}\nNext update: {}\nEntries:     {}\nSize:        {} bytes",
        info.crl_number.map_or_else(|| "-".to_string(), |n| n.to_string()),
        fmt(info.last_update),
        fmt(info.next_update),
        info.entries,
        info.size
    )
}
