//! Live progress rendering for a running task

use crate::display::{format_bytes, format_eta};
use console::style;
use copytask_engine::{TaskSnapshot, TaskState};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress bar fed from task snapshots
pub struct ProgressView {
    progress_bar: Option<ProgressBar>,
    errors_shown: usize,
}

impl ProgressView {
    /// Create a view; `quiet` suppresses all output
    pub fn new(quiet: bool) -> Self {
        let progress_bar = if quiet {
            None
        } else {
            let pb = ProgressBar::new(0);
            if let Ok(bar_style) = ProgressStyle::default_bar()
                .template("{spinner:.green} {msg} [{wide_bar:.cyan/blue}] {bytes}/{total_bytes}")
            {
                pb.set_style(bar_style.progress_chars("█▉▊▋▌▍▎▏  "));
            }
            pb.set_message("Measuring sources...");
            pb.enable_steady_tick(Duration::from_millis(100));
            Some(pb)
        };

        Self {
            progress_bar,
            errors_shown: 0,
        }
    }

    /// Render one snapshot
    pub fn update(&mut self, snapshot: &TaskSnapshot) {
        let Some(pb) = &self.progress_bar else {
            return;
        };

        pb.set_length(snapshot.total_bytes);
        pb.set_position(snapshot.copied_bytes);
        pb.set_message(status_line(snapshot));

        for error in snapshot.errors.iter().skip(self.errors_shown) {
            pb.suspend(|| {
                println!(
                    "{} {}: {}",
                    style("✗").red().bold(),
                    style(error.path.display()).cyan(),
                    style(&error.message).red()
                );
            });
        }
        self.errors_shown = snapshot.errors.len();
    }

    /// Print a line above the bar
    pub fn display_warning(&self, message: &str) {
        let print = || println!("{} {}", style("⚠").yellow().bold(), style(message).yellow());
        match &self.progress_bar {
            Some(pb) => pb.suspend(print),
            None => print(),
        }
    }

    /// Remove the bar
    pub fn finish_and_clear(&self) {
        if let Some(pb) = &self.progress_bar {
            pb.finish_and_clear();
        }
    }
}

fn status_line(snapshot: &TaskSnapshot) -> String {
    match snapshot.state {
        TaskState::Pending => "Waiting for a worker".to_string(),
        TaskState::Paused => "Paused".to_string(),
        TaskState::Retrying => snapshot.retry.as_ref().map_or_else(
            || "Retrying".to_string(),
            |retry| {
                format!(
                    "Retrying {} (attempt {}, {} ms)",
                    file_name(&retry.path),
                    retry.attempt,
                    retry.delay_ms
                )
            },
        ),
        _ => {
            let item = snapshot
                .current_item
                .as_deref()
                .map_or_else(String::new, file_name);
            format!(
                "{} {}/{} - {}/s - ETA {}",
                item,
                snapshot.completed_items,
                snapshot.total_items,
                format_bytes(snapshot.speed_bytes_per_sec as u64),
                format_eta(snapshot.eta_seconds)
            )
        }
    }
}

fn file_name(path: &std::path::Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}
