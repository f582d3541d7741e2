use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

use crate::orchestrator::StatusView;

/// Resolved runtime configuration shared by every command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub base_url: String,
    #[serde(default, skip_serializing)]
    pub auth_token: Option<String>,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub stale_after_failures: u32,
    pub user_agent: String,
}

/// `GET /monitor/system-status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatusResponse {
    pub is_monitoring_running: bool,
    #[serde(default)]
    pub current_task: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_completion_time: Option<OffsetDateTime>,
}

#[cfg(test)]
impl SystemStatusResponse {
    pub fn idle() -> Self {
        Self {
            is_monitoring_running: false,
            current_task: None,
            message: None,
            last_completion_time: None,
        }
    }

    pub fn running(task: impl Into<String>) -> Self {
        Self {
            is_monitoring_running: true,
            current_task: Some(task.into()),
            message: None,
            last_completion_time: None,
        }
    }
}

/// `GET /monitor/historical-status`. Advisory only; never feeds the mutation gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalStatus {
    pub is_running: bool,
    #[serde(default)]
    pub last_processed_date: Option<String>,
    #[serde(default)]
    pub original_start_date: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// Informational body returned by the mutation endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct RunRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct UpdateStartDateRequest {
    pub new_start_date: String,
}

/// `GET /monitor/summary`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorSummary {
    #[serde(default)]
    pub total_runs: u64,
    #[serde(default)]
    pub total_requests: u64,
    #[serde(default)]
    pub total_results_saved: u64,
    #[serde(default)]
    pub runs_by_type: BTreeMap<String, u64>,
    #[serde(default)]
    pub results_by_group: BTreeMap<String, u64>,
    #[serde(default)]
    pub latest_runs: Vec<MonitorRun>,
    #[serde(default)]
    pub latest_logs: Vec<RequestLog>,
}

impl MonitorSummary {
    pub fn has_any_data(&self) -> bool {
        self.total_runs > 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorRun {
    pub collected_at: String,
    pub search_type: String,
    #[serde(default)]
    pub search_group: Option<String>,
    #[serde(default)]
    pub total_results_found: u64,
    #[serde(default)]
    pub search_terms_query: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestLog {
    pub run_id: String,
    pub timestamp: String,
    #[serde(default)]
    pub search_group: Option<String>,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub results_count: u32,
}

/// One collected result as returned by the listing endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorResult {
    pub link: String,
    #[serde(default, rename = "displayLink")]
    pub display_link: Option<String>,
    #[serde(default)]
    pub search_type: Option<String>,
    #[serde(default)]
    pub search_group: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    pub collected_at: String,
    #[serde(default)]
    pub range_start: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
}

/// Scraper processing status used to filter result listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Pending,
    Reprocess,
    ScraperFailed,
    ScraperSkipped,
    RelevanceFailed,
}

impl ResultStatus {
    pub fn as_path_segment(self) -> &'static str {
        match self {
            ResultStatus::Pending => "pending",
            ResultStatus::Reprocess => "reprocess",
            ResultStatus::ScraperFailed => "scraper_failed",
            ResultStatus::ScraperSkipped => "scraper_skipped",
            ResultStatus::RelevanceFailed => "relevance_failed",
        }
    }
}

/// Observed snapshot of the backend-owned collection task.
///
/// Snapshots are never edited in place: every poll produces a fresh value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskStatus {
    pub is_running: bool,
    /// Only ever `Some` while `is_running` is true.
    pub current_task_name: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_completion_time: Option<OffsetDateTime>,
    pub message: Option<String>,
}

impl TaskStatus {
    /// State assumed right after the backend accepted a start request.
    pub fn optimistic_running() -> Self {
        Self {
            is_running: true,
            current_task_name: None,
            last_completion_time: None,
            message: None,
        }
    }
}

impl From<SystemStatusResponse> for TaskStatus {
    fn from(resp: SystemStatusResponse) -> Self {
        let current_task_name = if resp.is_monitoring_running {
            resp.current_task.filter(|t| !t.trim().is_empty())
        } else {
            None
        };
        Self {
            is_running: resp.is_monitoring_running,
            current_task_name,
            last_completion_time: resp.last_completion_time,
            message: resp.message,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Start,
    Delete,
    UpdateDate,
}

impl MutationKind {
    /// Shown when the backend gives no detail for a failed mutation.
    pub fn generic_failure(self) -> &'static str {
        match self {
            MutationKind::Start => "An error occurred while starting the collection.",
            MutationKind::Delete => "Failed to clear the monitoring data.",
            MutationKind::UpdateDate => "Failed to update the historical start date.",
        }
    }

    pub fn generic_success(self) -> &'static str {
        match self {
            MutationKind::Start => "Collection started.",
            MutationKind::Delete => "All monitoring data was cleared.",
            MutationKind::UpdateDate => "Historical start date updated.",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MutationKind::Start => "start collection",
            MutationKind::Delete => "delete all data",
            MutationKind::UpdateDate => "update historical start date",
        };
        f.write_str(s)
    }
}

/// A user-initiated request that changes backend state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Start { start_date: Option<Date> },
    DeleteAll,
    UpdateHistoricalStartDate { new_start_date: Date },
}

impl Mutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::Start { .. } => MutationKind::Start,
            Mutation::DeleteAll => MutationKind::Delete,
            Mutation::UpdateHistoricalStartDate { .. } => MutationKind::UpdateDate,
        }
    }
}

/// Events emitted by the monitor controller and consumed by UI/CLI layers.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    StateChanged(StatusView),
    Notice(Notice),
    /// Dependent read views (summary counts, result listings) must refetch.
    ViewsInvalidated,
    Historical(HistoricalStatus),
}

/// Non-blocking notifications surfaced to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Notice {
    Conflict { kind: MutationKind, reason: String },
    MutationSucceeded { kind: MutationKind, message: String },
    MutationFailed { kind: MutationKind, message: String },
    StatusMayBeStale { failures: u32 },
    TaskFinished { task: Option<String> },
}

impl Notice {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            Notice::Conflict { kind, reason } => format!("Cannot {kind}: {reason}"),
            Notice::MutationSucceeded { message, .. } => message.clone(),
            Notice::MutationFailed { kind, message } => format!("{kind} failed: {message}"),
            Notice::StatusMayBeStale { failures } => format!(
                "Status may be stale ({failures} consecutive status checks failed)"
            ),
            Notice::TaskFinished { task: Some(task) } => format!("Task finished: {task}"),
            Notice::TaskFinished { task: None } => "Task finished".to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Notice::Conflict { .. } | Notice::MutationFailed { .. } | Notice::StatusMayBeStale { .. }
        )
    }
}

/// Parse a `YYYY-MM-DD` date as used by the backend.
pub fn parse_date(s: &str) -> Result<Date, time::error::Parse> {
    Date::parse(s.trim(), format_description!("[year]-[month]-[day]"))
}

pub fn format_date(date: Date) -> String {
    date.format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| date.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn task_name_is_dropped_when_not_running() {
        let resp = SystemStatusResponse {
            is_monitoring_running: false,
            current_task: Some("historical_backfill".into()),
            message: Some("idle".into()),
            last_completion_time: None,
        };
        let status = TaskStatus::from(resp);
        assert!(!status.is_running);
        assert_eq!(status.current_task_name, None);
        assert_eq!(status.message.as_deref(), Some("idle"));
    }

    #[test]
    fn system_status_accepts_minimal_body() {
        let resp: SystemStatusResponse =
            serde_json::from_str(r#"{"is_monitoring_running": true, "current_task": "continuous"}"#)
                .unwrap();
        assert_eq!(resp, SystemStatusResponse::running("continuous"));
    }

    #[test]
    fn system_status_parses_completion_time() {
        let resp: SystemStatusResponse = serde_json::from_str(
            r#"{"is_monitoring_running": false, "last_completion_time": "2024-05-01T10:00:00Z"}"#,
        )
        .unwrap();
        let done = resp.last_completion_time.unwrap();
        assert_eq!(done.date(), date!(2024 - 05 - 01));
    }

    #[test]
    fn summary_tolerates_missing_sections() {
        let summary: MonitorSummary =
            serde_json::from_str(r#"{"total_runs": 3, "runs_by_type": {"historico": 2}}"#).unwrap();
        assert!(summary.has_any_data());
        assert_eq!(summary.runs_by_type.get("historico"), Some(&2));
        assert!(summary.latest_logs.is_empty());
    }

    #[test]
    fn run_request_omits_missing_date() {
        let body = serde_json::to_string(&RunRequest { start_date: None }).unwrap();
        assert_eq!(body, "{}");
    }

    #[test]
    fn dates_use_iso_calendar_format() {
        let d = parse_date(" 2024-01-05 ").unwrap();
        assert_eq!(d, date!(2024 - 01 - 05));
        assert_eq!(format_date(d), "2024-01-05");
        assert!(parse_date("05/01/2024").is_err());
    }

    #[test]
    fn result_status_maps_to_backend_names() {
        assert_eq!(ResultStatus::ScraperFailed.as_path_segment(), "scraper_failed");
        let parsed: ResultStatus = serde_json::from_str("\"relevance_failed\"").unwrap();
        assert_eq!(parsed, ResultStatus::RelevanceFailed);
    }
}
