use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};

use tmm_core::{
    config::Config,
    dedup::open_or_recover,
    domain::{ChannelHandle, DateWindow},
    mirror::{MirrorJob, MirrorOptions, MirrorReport},
    utils::AuditLogger,
    Result,
};
use tmm_media::{MediaSettings, MediaToolkit};
use tmm_s3::{S3Settings, S3Store};
use tmm_telegram::{TelegramReader, TelegramSettings};

/// Mirror photos and videos posted to a Telegram channel into an S3 bucket.
#[derive(Debug, Parser)]
#[command(name = "tmm", version)]
struct Args {
    /// Channel username, t.me link, private invite link or numeric chat id.
    #[arg(long)]
    channel_username: String,

    /// First day to mirror, YYYY-MM-DD (inclusive).
    #[arg(long)]
    start_date: String,

    /// Last day to mirror, YYYY-MM-DD (inclusive).
    #[arg(long)]
    end_date: String,

    /// Folder inside the bucket; also names the dedup database.
    #[arg(long)]
    s3_key_prefix: Option<String>,

    /// List what would be mirrored without downloading or uploading.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = tmm_core::logging::init("tmm") {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(report) => {
            if let Some(e) = &report.read_error {
                warn!(error = %e, "channel read stopped early; rerun to continue");
            }
            info!(
                channel = %report.channel,
                uploaded = report.uploaded,
                eligible = report.eligible,
                skipped = report.already_processed,
                failed = report.failed,
                "done"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "mirror run aborted");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(args: Args) -> Result<MirrorReport> {
    let handle = ChannelHandle::parse(&args.channel_username)?;
    let window = DateWindow::parse(&args.start_date, &args.end_date)?;
    let cfg = Config::load()?;

    let reader = TelegramReader::new(TelegramSettings::from_config(&cfg)?);
    let media = MediaToolkit::new(MediaSettings::from_config(&cfg));
    let store = S3Store::new(S3Settings::from_config(&cfg));
    let audit = cfg
        .audit_log_path
        .as_ref()
        .map(|p| AuditLogger::new(p.clone(), cfg.audit_log_json));

    let mut dedup = open_or_recover(&cfg.dedup_path_for(args.s3_key_prefix.as_deref()));

    let opts = MirrorOptions {
        handle,
        window,
        key_prefix: args.s3_key_prefix,
        dry_run: args.dry_run,
    };

    let mut job = MirrorJob::new(&reader, &media, &store, dedup.as_mut());
    if let Some(audit) = &audit {
        job = job.with_audit(audit);
    }
    job.run(&opts).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_required_and_optional_flags() {
        let args = Args::try_parse_from([
            "tmm",
            "--channel-username",
            "@mychannel",
            "--start-date",
            "2024-01-01",
            "--end-date",
            "2024-01-31",
            "--s3-key-prefix",
            "trip",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(args.channel_username, "@mychannel");
        assert_eq!(args.s3_key_prefix.as_deref(), Some("trip"));
        assert!(args.dry_run);
    }

    #[test]
    fn end_date_is_required() {
        assert!(Args::try_parse_from([
            "tmm",
            "--channel-username",
            "x",
            "--start-date",
            "2024-01-01"
        ])
        .is_err());
    }
}
