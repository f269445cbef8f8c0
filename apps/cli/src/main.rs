//! segfetch CLI - segmented download tool
//!
//! Plays the engine's external collaborators: resolves the task from a URL,
//! renders the progress stream, and merges the completed segment files.

mod merge;
mod progress;

use anyhow::{bail, Context, Result};
use clap::Parser;
use console::style;
use segfetch_core::{DownloadEngine, StartOptions};
use segfetch_types::DownloadTask;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// segfetch - segmented HTTP downloader
#[derive(Parser)]
#[command(name = "segfetch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// URL to download
    url: String,

    /// Destination directory (defaults to the downloads folder)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of parallel segments
    #[arg(short, long, default_value_t = 4)]
    segments: u32,

    /// Keep the segment files after merging
    #[arg(long)]
    keep_parts: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("segfetch_core=debug,segfetch=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let url = url::Url::parse(&cli.url).context("invalid URL")?;
    let destination = cli
        .output
        .or_else(dirs::download_dir)
        .unwrap_or_else(|| PathBuf::from("."));

    let engine = DownloadEngine::new()?;

    let info = engine.probe(&url).await.context("failed to probe URL")?;
    let Some(total_size) = info.size else {
        bail!("server did not report a content length; segmented download needs a known size");
    };
    if !info.resumable && cli.segments > 1 {
        eprintln!(
            "{} server does not advertise range support, segments may fail",
            style("warning:").yellow().bold()
        );
    }

    let task = DownloadTask::new(
        info.final_url.unwrap_or_else(|| url.to_string()),
        info.file_name,
        destination,
        total_size,
    );
    println!(
        "Downloading {} ({} bytes, {} segments)",
        style(&task.file_name).cyan(),
        total_size,
        cli.segments
    );

    let (_, handle) = engine
        .start(
            task.clone(),
            StartOptions {
                segment_count: cli.segments,
                ..Default::default()
            },
        )
        .await?;

    let renderer = progress::spawn_renderer(handle.subscribe(), total_size);
    let parts = handle.wait().await?;
    let _ = renderer.await;

    let output_path = task.destination.join(&task.file_name);
    merge::merge_parts(&parts, &output_path, !cli.keep_parts).await?;

    println!(
        "{} saved to {}",
        style("done:").green().bold(),
        output_path.display()
    );
    Ok(())
}
