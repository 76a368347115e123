//! Terminal rendering of supervisor events.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use relaydrive_engine::TransferEvent;
use relaydrive_protocol::TransferProgress;
use relaydrive_transfer::{format_eta, format_speed};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {bytes}/{total_bytes} {msg}";

/// Bar shared by the renderer and anything that must prompt around it.
pub fn bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::with_template(TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// One-line summary shown next to the bar.
pub fn describe(progress: &TransferProgress) -> String {
    let eta = progress.eta_seconds.map(Duration::from_secs_f64);
    format!(
        "{} | {} | ETA {}",
        progress.status_label,
        format_speed(progress.bytes_per_second),
        format_eta(eta)
    )
}

/// Draws events on `pb` until `done` fires, then drains what is left.
pub async fn render(
    mut events: mpsc::Receiver<TransferEvent>,
    pb: ProgressBar,
    done: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Some(event) => show(&pb, event),
                None => break,
            },
            _ = done.cancelled() => {
                while let Ok(event) = events.try_recv() {
                    show(&pb, event);
                }
                break;
            }
        }
    }
    pb.finish_and_clear();
}

fn show(pb: &ProgressBar, event: TransferEvent) {
    match event {
        TransferEvent::Progress { progress, .. } => {
            pb.set_length(progress.total_bytes);
            pb.set_position(progress.transferred_bytes);
            pb.set_message(describe(&progress));
        }
        TransferEvent::Completed {
            file_name, file_id, ..
        } => pb.println(format!("done      {file_name} ({file_id})")),
        TransferEvent::Failed {
            file_name, error, ..
        } => pb.println(format!("failed    {file_name}: {error}")),
        TransferEvent::Cancelled { file_name, .. } => {
            pb.println(format!("cancelled {file_name}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaydrive_protocol::TransferStatus;

    #[test]
    fn describe_includes_speed_and_eta() {
        let progress = TransferProgress {
            bytes_per_second: 2.5 * 1024.0 * 1024.0,
            eta_seconds: Some(3723.0),
            ..TransferProgress::with_status(TransferStatus::InProgress, "Downloaded part 1/3")
        };
        assert_eq!(
            describe(&progress),
            "Downloaded part 1/3 | 2.50 MB/s | ETA 1h 2m 3s"
        );
    }

    #[test]
    fn describe_unknown_rate() {
        let progress = TransferProgress::with_status(
            TransferStatus::InProgress,
            "Uploading part 1/1 (attempt 1)",
        );
        assert_eq!(
            describe(&progress),
            "Uploading part 1/1 (attempt 1) | ... | ETA ..."
        );
    }
}
