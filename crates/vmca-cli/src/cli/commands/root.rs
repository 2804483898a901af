//! `vmcad init-root` / `vmcad get-root`.

use anyhow::Result;
use tracing::info;

use super::{read_pem, Context};
use crate::output::{emit, OutputFormat};

pub fn init(ctx: &Context, args: &crate::cli::args::InitRootArgs) -> Result<()> {
    let cert = read_pem(&args.cert)?;
    let key = read_pem(&args.key)?;
    let service = ctx.service()?;
    let built = service.add_root_certificate(&cert, &key)?;
    info!(crl_number = built.number, "root installed");

    let info = service.crl_info()?;
    emit(ctx.output_format, &info, |i| {
        format!(
            "Root installed in {}\nCRL number: {}",
            ctx.config.data_dir.display(),
            i.crl_number.unwrap_or_default()
        )
    })
}

pub fn get(ctx: &Context) -> Result<()> {
    let pem = ctx.service()?.root_certificate()?;
    match ctx.output_format {
        OutputFormat::Json => println!("{}", serde_json::json!({ "pem": pem })),
        OutputFormat::Pretty => print!("{pem}"),
    }
    Ok(())
}
