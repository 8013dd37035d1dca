//! Summary output for the copytask CLI

use console::style;
use copytask_device::BufferAdvisor;
use copytask_engine::{TaskSnapshot, TaskState};
use copytask_types::DeviceClass;

/// Print the outcome of a finished task
pub fn display_task_summary(snapshot: &TaskSnapshot) {
    println!();
    println!("{}", style("Copy Statistics:").bold().underlined());

    let state = match snapshot.state {
        TaskState::Completed => style(snapshot.state.to_string()).green().bold(),
        TaskState::CompletedWithErrors | TaskState::Cancelled => {
            style(snapshot.state.to_string()).yellow().bold()
        }
        _ => style(snapshot.state.to_string()).red().bold(),
    };
    println!("  Result: {}", state);
    println!(
        "  Items: {}/{}",
        style(snapshot.completed_items).green(),
        snapshot.total_items
    );
    println!("  Files copied: {}", style(snapshot.copied_files).green());
    println!("  Files skipped: {}", style(snapshot.skipped_files).yellow());
    println!(
        "  Bytes: {} of {}",
        style(format_bytes(snapshot.copied_bytes)).green(),
        format_bytes(snapshot.total_bytes)
    );
    println!(
        "  Errors: {}",
        if snapshot.errors.is_empty() {
            style(snapshot.errors.len()).green()
        } else {
            style(snapshot.errors.len()).red()
        }
    );

    if let (Some(started), Some(ended)) = (snapshot.started_at, snapshot.ended_at) {
        let elapsed = (ended - started).to_std().unwrap_or_default();
        println!("  Duration: {}", style(format_duration(elapsed)).blue());
        if elapsed.as_secs_f64() > 0.0 {
            let rate = snapshot.copied_bytes as f64 / elapsed.as_secs_f64();
            println!("  Transfer rate: {}/s", style(format_bytes(rate as u64)).blue());
        }
    }

    if let Some(message) = &snapshot.fatal_error {
        println!("  {} {}", style("Failure:").red().bold(), style(message).red());
    }
    for error in &snapshot.errors {
        println!(
            "    {} [{:?}] {}: {}",
            style("•").red(),
            error.kind,
            error.path.display(),
            style(&error.message).dim()
        );
    }
}

/// Print the buffer recommendation for a pair of device classes
pub fn display_advice(advisor: &BufferAdvisor, source: DeviceClass, destination: DeviceClass) {
    let size = advisor.recommend(source, destination);
    println!(
        "{} {} -> {}: {}",
        style("⚡").yellow().bold(),
        style(source).cyan(),
        style(destination).cyan(),
        style(format_bytes(size as u64)).green().bold()
    );
    for class in [source, destination] {
        println!(
            "  {}: {}",
            class,
            style(format_bytes(advisor.size_for(class) as u64)).dim()
        );
    }
}

/// Format bytes in human-readable format
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format duration in human-readable format
pub fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{:.2}s", duration.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

/// Format an ETA in seconds, `unknown` when there is none yet
pub fn format_eta(eta_seconds: Option<u64>) -> String {
    eta_seconds.map_or_else(
        || "unknown".to_string(),
        |secs| format_duration(std::time::Duration::from_secs(secs)),
    )
}
