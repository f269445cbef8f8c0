//! Progress bar rendering for CLI downloads

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use segfetch_types::{TaskEvent, TaskStatus};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Drive a progress bar from the task event stream until the task reaches a
/// terminal status.
pub fn spawn_renderer(
    mut events: broadcast::Receiver<TaskEvent>,
    total_size: u64,
) -> JoinHandle<()> {
    let bar = ProgressBar::new(total_size);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
            .unwrap()
            .progress_chars("█▓▒░  "),
    );

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(TaskEvent::Progress(progress)) => {
                    bar.set_position(progress.bytes_received);
                }
                Ok(TaskEvent::StatusChanged { status, error }) => match status {
                    TaskStatus::Completed => {
                        bar.finish_with_message(format!(
                            "{} download complete",
                            style("✓").green().bold()
                        ));
                    }
                    TaskStatus::Error => {
                        bar.abandon_with_message(format!(
                            "{} failed: {}",
                            style("✗").red().bold(),
                            error.as_deref().unwrap_or("unknown error")
                        ));
                        break;
                    }
                    TaskStatus::Stopped => {
                        bar.abandon_with_message("cancelled".to_string());
                        break;
                    }
                    _ => {}
                },
                Ok(TaskEvent::Completed { .. }) => break,
                Ok(TaskEvent::WorkerStatusChanged { .. }) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
