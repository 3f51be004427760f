//! Progress bar and summary reporting for CLI batches.

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::download::BatchOutcome;
use crate::event::BatchEvent;
use crate::fetch::FetchResult;
use crate::format::{format_bytes, format_count, format_duration};
use crate::pipeline::PipelineReport;
use crate::resolve::SearchDescriptor;
use crate::stats::{BatchStats, BatchStatsBuilder};

const SEPARATOR: &str = "────────────────────────────────────────────────────────────";

/// Creates the batch progress bar, counted in tracks.
fn make_batch_bar(total: usize) -> ProgressBar {
    let bar = ProgressBar::new(total as u64);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} [{bar:40.green/white}] {pos}/{len} tracks ({elapsed}) {wide_msg}",
        )
        .expect("progress template is valid")
        .progress_chars("━━╌"),
    );
    bar.enable_steady_tick(std::time::Duration::from_millis(250));
    bar
}

/// One line per finished track.
fn item_line(descriptor: &SearchDescriptor, result: &FetchResult) -> String {
    match result {
        FetchResult::Success(_) => format!("  {} {descriptor}", style("✓").green()),
        FetchResult::Failed(reason) => format!(
            "  {} {descriptor}: {}",
            style("✗").red(),
            style(reason).dim()
        ),
    }
}

/// Consumes batch events until the batch finishes, drawing a progress bar.
///
/// Returns the statistics of the batch. Also ends when every sender is gone,
/// which happens when the run fails before dispatch.
pub async fn drive(mut events: UnboundedReceiver<BatchEvent>) -> BatchStats {
    let mut bar: Option<ProgressBar> = None;
    let mut stats = BatchStatsBuilder::new();

    while let Some(event) = events.recv().await {
        match event {
            BatchEvent::Started { total } => {
                println!("Downloading {}", format_count(total, "track"));
                bar = Some(make_batch_bar(total));
                stats = BatchStatsBuilder::new();
            }
            BatchEvent::ItemStarted { descriptor } => {
                if let Some(bar) = &bar {
                    bar.set_message(descriptor.to_string());
                }
            }
            BatchEvent::ItemCompleted { descriptor, result } => {
                stats.record(&descriptor, &result);
                let line = item_line(&descriptor, &result);
                match &bar {
                    Some(bar) => bar.println(line),
                    None => println!("{line}"),
                }
            }
            BatchEvent::Progress { completed, .. } => {
                if let Some(bar) = &bar {
                    bar.set_position(completed as u64);
                }
            }
            BatchEvent::Cancelled { completed, total } => {
                if let Some(bar) = bar.take() {
                    bar.abandon_with_message(format!("cancelled at {completed}/{total}"));
                }
            }
            BatchEvent::Finished { .. } => break,
        }
    }

    if let Some(bar) = bar {
        bar.finish_and_clear();
    }
    stats.build()
}

/// Renders the end-of-run summary.
pub fn render_summary(report: &PipelineReport, stats: &BatchStats) -> String {
    let mut lines = vec![
        String::new(),
        SEPARATOR.to_string(),
        "Batch Summary".to_string(),
        SEPARATOR.to_string(),
        format!("  Source:            {}", report.kind),
        format!(
            "  Fetched:           {} of {}",
            report.outcome.succeeded(),
            format_count(report.outcome.total(), "track")
        ),
    ];

    if stats.failed > 0 {
        lines.push(format!("  Failed:            {}", stats.failed));
    }
    lines.push(format!("  Total time:        {}", format_duration(stats.elapsed)));
    if let Some(avg) = stats.average_per_track() {
        lines.push(format!("  Avg per track:     {}", format_duration(avg)));
    }

    match (&report.outcome, &report.delivered) {
        (BatchOutcome::Cancelled { .. }, _) => {
            lines.push("  Cancelled; nothing was delivered".to_string());
        }
        (_, Some(path)) => {
            let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
            lines.push(format!(
                "  Output:            {} ({})",
                path.display(),
                format_bytes(size)
            ));
        }
        (_, None) => lines.push("  No tracks were fetched; nothing was delivered".to_string()),
    }

    if !stats.failures.is_empty() {
        lines.push(String::new());
        lines.push("  Failed tracks:".to_string());
        for (track, reason) in &stats.failures {
            lines.push(format!("    {track}: {reason}"));
        }
    }

    lines.push(SEPARATOR.to_string());
    lines.join("\n")
}

/// Prints the end-of-run summary.
pub fn print_summary(report: &PipelineReport, stats: &BatchStats) {
    println!("{}", render_summary(report, stats));
}
