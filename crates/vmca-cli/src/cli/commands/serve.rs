//! `vmcad serve` - keep the published CRL fresh.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};
use vmca_srv::CrlRefresher;

use super::Context;

pub fn execute(ctx: &Context) -> Result<()> {
    let service = Arc::new(ctx.service()?);
    info!(
        data_dir = %ctx.config.data_dir.display(),
        level = service.functional_level().bits(),
        "vmca service started"
    );

    match service.regenerate_crl() {
        Ok(built) => info!(crl_number = built.number, "published crl"),
        Err(e) if e.is_missing_ca() => warn!("no root ca installed, waiting for init-root"),
        Err(e) => return Err(e.into()),
    }

    let _refresher = CrlRefresher::spawn(Arc::clone(&service), ctx.config.refresh_interval())?;
    loop {
        std::thread::park();
    }
}
