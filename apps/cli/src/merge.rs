//! Merge collaborator: concatenates completed segment files
//!
//! The engine's obligation ends at delivering the completion payloads in
//! worker-id order; turning them into the final file happens here.

use anyhow::{Context, Result};
use segfetch_types::WorkerComplete;
use std::path::Path;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Concatenate the segment files into `output`, in the order given.
/// The parts arrive ordered by worker id, which is byte-offset order.
pub async fn merge_parts(
    parts: &[WorkerComplete],
    output: &Path,
    remove_parts: bool,
) -> Result<()> {
    info!(parts = parts.len(), output = %output.display(), "merging segments");

    let mut out = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(output)
        .await
        .with_context(|| format!("failed to create {}", output.display()))?;

    for part in parts {
        let mut input = File::open(&part.file_path)
            .await
            .with_context(|| format!("missing segment file {}", part.file_path.display()))?;
        tokio::io::copy(&mut input, &mut out)
            .await
            .with_context(|| format!("failed to append {}", part.file_name))?;
    }

    out.flush().await?;
    out.sync_all().await?;

    if remove_parts {
        for part in parts {
            if let Err(e) = tokio::fs::remove_file(&part.file_path).await {
                warn!(file = %part.file_path.display(), error = %e, "failed to remove segment file");
            }
        }
    }

    Ok(())
}
