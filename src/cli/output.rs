//! CLI output formatting

use crate::{
    core::{ExecutionStatus, RunSummary, StepStatus},
    execution::ExecutionEvent,
};

// Re-export style
pub use console::style;
use console::Emoji;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Format a step status for display
pub fn format_step_status(status: StepStatus) -> String {
    match status {
        StepStatus::Nascent => style("NASCENT").dim().to_string(),
        StepStatus::Running => style("RUNNING").yellow().to_string(),
        StepStatus::Blocked => style("BLOCKED").magenta().to_string(),
        StepStatus::Complete => style("COMPLETE").green().to_string(),
        StepStatus::Failed => style("FAILED").red().to_string(),
    }
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Completed => style("COMPLETED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
        ExecutionStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

/// Format a run summary for display
pub fn format_run_summary(summary: &RunSummary) -> String {
    let status_icon = match summary.status {
        ExecutionStatus::Completed => CHECK,
        ExecutionStatus::Failed => CROSS,
        ExecutionStatus::Running => SPINNER,
        ExecutionStatus::Cancelled => WARN,
    };

    let mut line = format!(
        "{} Document {} {}",
        status_icon,
        style(summary.doc_id.short()).dim(),
        format_status(summary.status)
    );
    if let Some(duration) = summary.duration() {
        line.push_str(&format!(" in {}ms", duration.num_milliseconds()));
    }
    if let Some(error) = &summary.error {
        line.push_str(&format!(": {}", style(error).red()));
    }
    line
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::DocumentStarted { doc_id } => {
            format!("{} Document {} started", ROCKET, style(doc_id.short()).dim())
        }
        ExecutionEvent::DocumentChanged { doc_id, key } => format!(
            "{} {} {} updated",
            INFO,
            style(doc_id.short()).dim(),
            style(key).cyan()
        ),
        ExecutionEvent::DocumentCompleted { summary } => format_run_summary(summary),
        ExecutionEvent::SectionStarted { section, .. } => {
            format!("{} Section {}", SPINNER, style(section).bold())
        }
        ExecutionEvent::SectionCompleted { section, .. } => {
            format!("{} Section {}", CHECK, style(section).green())
        }
        ExecutionEvent::SectionErrored { section, error, .. } => format!(
            "{} Section {}: {}",
            CROSS,
            style(section).red(),
            style(error).dim()
        ),
        ExecutionEvent::StepStatusChanged {
            step,
            status,
            attempt,
            ..
        } => {
            if *attempt > 1 {
                format!(
                    "  {} {} (attempt {})",
                    style(step).cyan(),
                    format_step_status(*status),
                    style(attempt).dim()
                )
            } else {
                format!("  {} {}", style(step).cyan(), format_step_status(*status))
            }
        }
    }
}
