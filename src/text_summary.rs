//! Text lines for CLI output.
//!
//! Formats status snapshots, historical status, summary counts and result
//! listings as human-readable lines for text mode.

use crate::model::{HistoricalStatus, MonitorResult, MonitorSummary, TaskStatus};
use crate::orchestrator::StatusView;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

/// Render a completion timestamp in local time, falling back to UTC.
pub(crate) fn format_timestamp(ts: OffsetDateTime) -> String {
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    ts.to_offset(offset)
        .format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        ))
        .unwrap_or_else(|_| ts.to_string())
}

/// `running (historical_backfill)` or `idle`.
pub(crate) fn task_label(status: &TaskStatus) -> String {
    if !status.is_running {
        return "idle".to_string();
    }
    match status.current_task_name.as_deref() {
        Some(task) => format!("running ({task})"),
        None => "running".to_string(),
    }
}

/// Message and completion time, when the backend reported them.
pub(crate) fn task_detail_lines(status: &TaskStatus) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(msg) = status.message.as_deref().filter(|m| !m.trim().is_empty()) {
        lines.push(format!("Message: {msg}"));
    }
    if let Some(done) = status.last_completion_time {
        lines.push(format!("Last completed: {}", format_timestamp(done)));
    }
    lines
}

pub(crate) fn state_label(view: &StatusView) -> String {
    let Some(status) = view.status.as_ref() else {
        return "checking...".to_string();
    };
    let mut label = task_label(status);
    if view.optimistic {
        label.push_str(" [starting]");
    }
    if view.stale {
        label.push_str(" [stale]");
    }
    label
}

/// One-shot status report for a raw backend snapshot.
pub(crate) fn status_lines(status: &TaskStatus) -> Vec<String> {
    let mut lines = vec![format!("Status: {}", task_label(status))];
    lines.extend(task_detail_lines(status));
    lines
}

pub(crate) fn historical_lines(hist: &HistoricalStatus) -> Vec<String> {
    let mut lines = vec![format!(
        "Historical backfill: {}",
        if hist.is_running { "running" } else { "not running" }
    )];
    if let Some(d) = hist.original_start_date.as_deref() {
        lines.push(format!("Start date: {d}"));
    }
    if let Some(d) = hist.last_processed_date.as_deref() {
        lines.push(format!("Last processed: {d}"));
    }
    if !hist.message.trim().is_empty() {
        lines.push(format!("Message: {}", hist.message));
    }
    lines
}

pub(crate) fn summary_lines(summary: &MonitorSummary) -> Vec<String> {
    let mut lines = vec![
        format!("Runs: {}", summary.total_runs),
        format!("Requests: {}", summary.total_requests),
        format!("Results saved: {}", summary.total_results_saved),
    ];
    if !summary.runs_by_type.is_empty() {
        lines.push("Runs by type:".to_string());
        for (ty, n) in &summary.runs_by_type {
            lines.push(format!("  {ty}: {n}"));
        }
    }
    if !summary.results_by_group.is_empty() {
        lines.push("Results by group:".to_string());
        for (group, n) in &summary.results_by_group {
            lines.push(format!("  {group}: {n}"));
        }
    }
    if !summary.latest_runs.is_empty() {
        lines.push("Latest runs:".to_string());
        for run in &summary.latest_runs {
            lines.push(format!(
                "  {} {} [{}] {} found",
                run.collected_at,
                run.search_type,
                run.search_group.as_deref().unwrap_or("-"),
                run.total_results_found
            ));
        }
    }
    lines.push("Latest requests:".to_string());
    if summary.latest_logs.is_empty() {
        lines.push("  No request logs.".to_string());
    }
    for log in &summary.latest_logs {
        lines.push(format!(
            "  {} {} [{}] page {}: {} results",
            log.timestamp,
            log.run_id,
            log.search_group.as_deref().unwrap_or("-"),
            log.page,
            log.results_count
        ));
    }
    lines
}

/// Date part of an ISO timestamp, or the input unchanged.
fn date_part(ts: &str) -> &str {
    ts.split(['T', ' ']).next().unwrap_or(ts)
}

/// Collapse whitespace and cap the length so a snippet fits on one line.
fn one_line(text: &str, max_chars: usize) -> String {
    let joined = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if joined.chars().count() <= max_chars {
        return joined;
    }
    let mut cut: String = joined.chars().take(max_chars.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}

const SNIPPET_WIDTH: usize = 100;

/// At most `limit` results, newest first as returned by the backend.
///
/// The date shown is the searched range start when the result came from a
/// historical run, otherwise the collection date.
pub(crate) fn result_lines(results: &[MonitorResult], limit: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for (i, r) in results.iter().take(limit).enumerate() {
        let when = r
            .range_start
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or(&r.collected_at);
        let site = r
            .display_link
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or(&r.link);
        lines.push(format!(
            "{:>3}. {} {:<10} {:<16} {}",
            i + 1,
            date_part(when),
            r.search_type.as_deref().unwrap_or("-"),
            r.status.as_deref().unwrap_or("-"),
            site
        ));
        if site != r.link {
            lines.push(format!("     {}", r.link));
        }
        if let Some(snippet) = r.snippet.as_deref().filter(|s| !s.trim().is_empty()) {
            lines.push(format!("     {}", one_line(snippet, SNIPPET_WIDTH)));
        }
    }
    if results.len() > limit {
        lines.push(format!("... {} more", results.len() - limit));
    }
    if results.is_empty() {
        lines.push("No results.".to_string());
    }
    lines
}
