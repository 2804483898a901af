//! Certificate commands: sign, revoke, list, verify.

use anyhow::{Context as _, Result};
use chrono::{DateTime, Duration, Utc};
use vmca_core::CertificateStatus;

use super::{read_pem, Context};
use crate::cli::args::{ListArgs, RevokeArgs, SignArgs, VerifyArgs};
use crate::output::{emit, OutputFormat};

const fn status_label(status: CertificateStatus) -> &'static str {
    match status {
        CertificateStatus::Active => "active",
        CertificateStatus::Revoked => "revoked",
        CertificateStatus::Expired => "expired",
    }
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("invalid RFC 3339 time {value:?}"))?
        .with_timezone(&Utc))
}

/// Validity window from the sign arguments.
pub(crate) fn window(args: &SignArgs, now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let not_before = args.not_before.as_deref().map(parse_time).transpose()?.unwrap_or(now);
    let not_after = match args.not_after.as_deref() {
        Some(value) => parse_time(value)?,
        None => not_before + Duration::days(i64::from(args.days)),
    };
    Ok((not_before, not_after))
}

pub fn sign(ctx: &Context, args: &SignArgs) -> Result<()> {
    let csr = read_pem(&args.csr)?;
    let (not_before, not_after) = window(args, Utc::now())?;
    let issued = ctx
        .service()?
        .issue_certificate(&csr, not_before, not_after)?;

    if let Some(out) = &args.out {
        std::fs::write(out, &issued.pem).with_context(|| format!("writing {}", out.display()))?;
    }
    match ctx.output_format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({
                "serial": issued.serial_hex,
                "subject": issued.subject,
                "not_before": issued.not_before,
                "not_after": issued.not_after,
                "pem": issued.pem,
            })
        ),
        OutputFormat::Pretty if args.out.is_some() => println!(
            "Issued {} (serial {}), valid until {}",
            issued.subject, issued.serial_hex, issued.not_after
        ),
        OutputFormat::Pretty => print!("{}", issued.pem),
    }
    Ok(())
}

pub fn revoke(ctx: &Context, args: &RevokeArgs) -> Result<()> {
    let service = ctx.service()?;
    let built = match (&args.cert, &args.serial) {
        (Some(path), _) => service.revoke_certificate(&read_pem(path)?, args.reason)?,
        (None, Some(serial)) => service.revoke_serial(serial, args.reason)?,
        (None, None) => anyhow::bail!("either --cert or --serial is required"),
    };
    let info = service.crl_info()?;
    emit(ctx.output_format, &info, |i| {
        format!(
            "Revoked. CRL {} now lists {} certificate(s)",
            built.number, i.entries
        )
    })
}

pub fn list(ctx: &Context, args: &ListArgs) -> Result<()> {
    let entries = ctx
        .service()?
        .enumerate_certificates(args.status.map(Into::into))?;
    let now = Utc::now();
    emit(ctx.output_format, &entries, |entries| {
        entries
            .iter()
            .map(|e| {
                format!(
                    "{:<20} {:<8} {} {}",
                    e.serial_hex,
                    status_label(e.status(now)),
                    e.not_after.format("%Y-%m-%d"),
                    e.subject
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    })
}

pub fn verify(ctx: &Context, args: &VerifyArgs) -> Result<()> {
    let status = ctx.service()?.verify_certificate(&read_pem(&args.cert)?)?;
    emit(ctx.output_format, &status, |s| {
        format!("{}: {}", args.cert.display(), status_label(*s))
    })
}
