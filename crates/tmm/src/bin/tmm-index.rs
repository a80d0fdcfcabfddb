use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use tracing::{error, info};

use tmm_core::{
    config::Config,
    index::{IndexGenerator, IndexOptions, IndexReport},
    Result,
};
use tmm_media::{MediaSettings, MediaToolkit};
use tmm_s3::{S3Settings, S3Store};

/// Build the static HTML gallery for everything in the bucket.
#[derive(Debug, Parser)]
#[command(name = "tmm-index", version)]
struct Args {
    /// Where rendered pages are written before upload.
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// Only write pages locally.
    #[arg(long)]
    no_upload: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = tmm_core::logging::init("tmm-index") {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(report) => {
            info!(
                folders = report.folders,
                media = report.media,
                thumbnails_created = report.thumbnails_created,
                thumbnails_failed = report.thumbnails_failed,
                page_upload_failures = report.page_upload_failures,
                "gallery index generated"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "index generation failed");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(args: Args) -> Result<IndexReport> {
    let cfg = Config::load()?;
    let public_base_url = cfg.public_base_url()?;

    let store = S3Store::new(S3Settings::from_config(&cfg));
    let thumbnailer = MediaToolkit::new(MediaSettings::from_config(&cfg));

    IndexGenerator::new(&store, &thumbnailer)
        .run(&IndexOptions {
            public_base_url,
            out_dir: args.out_dir,
            upload: !args.no_upload,
        })
        .await
}
