//! Stream an ALAC .m4a file to an AirTunes receiver.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use airtunes::net::open_channel_count;
use airtunes::{parse_file, ParseStatus, RaopSession, SampleCursor};

#[derive(Debug, Parser)]
#[command(
    name = "airtunes-play",
    about = "Stream an ALAC .m4a file to an AirTunes receiver"
)]
struct Args {
    /// Receiver host name or IP address
    host: String,

    /// Path to the ALAC .m4a file
    file: PathBuf,

    /// Receiver control port
    #[arg(short, long, default_value_t = 5000)]
    port: u16,

    /// Password, for receivers that require authentication
    #[arg(short = 'c', long)]
    password: Option<String>,

    /// Offset in seconds from the beginning of the file
    #[arg(short, long, default_value_t = 0)]
    offset: u64,

    /// Playback volume, 0 (mute) to 30
    #[arg(short, long)]
    volume: Option<f32>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if let Err(err) = run(args).await {
        tracing::error!("{err}");
        return ExitCode::FAILURE;
    }

    // Everything is closed by now; a channel still counted as open
    // means a resource leak somewhere above.
    let open = open_channel_count();
    if open != 0 {
        tracing::error!("{open} network channel(s) were not released properly");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn run(args: Args) -> airtunes::Result<()> {
    let descriptor = parse_file(&args.file)?;
    if descriptor.status == ParseStatus::ParsedWithWarnings {
        tracing::warn!("the file parsed with warnings; playback may be degraded");
    }
    tracing::info!(
        "going to play {} ({}s) on {}:{}",
        args.file.display(),
        descriptor.length().as_secs(),
        args.host,
        args.port
    );

    let cursor = SampleCursor::open(&args.file, &descriptor).await?;
    let mut session = RaopSession::connect(&args.host, args.port, args.password.as_deref()).await?;
    if let Some(volume) = args.volume {
        session.set_volume(volume).await?;
    }
    session
        .play(&descriptor, cursor, Duration::from_secs(args.offset))
        .await?;

    let finished = session.finished();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(
                "stopping before end of file on user request (progress: {}s)",
                session.progress().as_secs()
            );
            session.stop().await?;
        }
        () = finished => {
            session.wait().await?;
            session.stop().await?;
        }
    }

    session.close().await;
    Ok(())
}
