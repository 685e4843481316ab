//! Results file and console summary rendering.
//!
//! The results file is a CSV table of outcomes followed by a summary
//! block separated by one blank line.

use crate::models::{Operation, Outcome, RunSummary};
use std::time::Duration;

/// Header row of the results table.
pub const HEADER: &str = "RequestID,Operand1,Operand2,Operation,Result,Status,Time";

/// Render one outcome as a CSV row (no trailing newline).
pub fn render_row(outcome: &Outcome) -> String {
    format!(
        "{},{},{},{},{},{},{}",
        outcome.request_id,
        outcome.operand1,
        outcome.operand2,
        outcome.operation.symbol(),
        outcome.result,
        outcome.status,
        seconds(outcome.elapsed)
    )
}

/// Render the trailing summary block, starting with a blank separator line.
pub fn render_summary(summary: &RunSummary) -> String {
    let mut block = String::new();

    block.push('\n');
    block.push_str("Summary\n");
    block.push_str("Operation,Count,Errors,TotalTime\n");

    for (operation, stats) in summary.per_operation.iter() {
        // Unknown is only listed when something actually arrived with it.
        if operation == Operation::Unknown && stats.count == 0 {
            continue;
        }
        block.push_str(&format!(
            "{},{},{},{}\n",
            operation,
            stats.count,
            stats.errors,
            seconds(stats.total_elapsed)
        ));
    }

    block.push_str(&format!(
        "Total,{},{},{}\n",
        summary.received,
        summary.error_count(),
        seconds(summary.total_elapsed)
    ));
    block.push_str(&format!("Expected,{}\n", summary.expected));
    block.push_str(&format!("AverageTime,{}\n", seconds(summary.average_elapsed)));
    block.push_str(&format!("Violations,{}\n", summary.violations.len()));
    block.push_str(&format!(
        "Generated,{}\n",
        summary.finished_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));

    block
}

/// Human-readable run summary for the terminal.
pub fn generate_console_summary(summary: &RunSummary) -> String {
    let mut lines = Vec::new();

    lines.push(format!("📊 Run {} complete", summary.run));
    lines.push(format!(
        "   Outcomes: {} received / {} expected ({} errors)",
        summary.received,
        summary.expected,
        summary.error_count()
    ));

    for (operation, stats) in summary.per_operation.iter() {
        if stats.count == 0 {
            continue;
        }
        lines.push(format!(
            "   - {} {}: {} ({} errors)",
            operation.symbol(),
            operation,
            stats.count,
            stats.errors
        ));
    }

    lines.push(format!(
        "   Average compute time: {}s",
        seconds(summary.average_elapsed)
    ));

    if !summary.violations.is_empty() {
        lines.push(format!(
            "   ⚠️  {} protocol violation(s):",
            summary.violations.len()
        ));
        for violation in &summary.violations {
            lines.push(format!("     {}", violation));
        }
    }

    lines.join("\n")
}

fn seconds(duration: Duration) -> String {
    format!("{:.6}", duration.as_secs_f64())
}
