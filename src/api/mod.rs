//! Backend REST API client.
//!
//! `MonitorApi` is the seam between the controller and the network: the
//! reqwest-backed `HttpMonitorApi` talks to the real backend, tests swap in
//! a scripted fake.

mod backend;
#[cfg(test)]
pub(crate) mod fake;

use crate::model::{
    HistoricalStatus, MessageResponse, MonitorResult, MonitorSummary, ResultStatus,
    SystemStatusResponse,
};
use async_trait::async_trait;
use time::Date;

pub use backend::HttpMonitorApi;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid base URL {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("backend returned HTTP {status}: {}", .detail.as_deref().unwrap_or("no detail"))]
    Status { status: u16, detail: Option<String> },
    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl ApiError {
    /// Backend-provided error detail, if the response carried one.
    pub fn detail(&self) -> Option<&str> {
        match self {
            ApiError::Status { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }
}

/// Operations of the collection monitor backend.
///
/// Implementations must be `Send + Sync`: the controller shares one
/// instance across every in-flight request.
#[async_trait]
pub trait MonitorApi: Send + Sync {
    /// `GET /monitor/system-status`. Authoritative running flag.
    async fn system_status(&self) -> Result<SystemStatusResponse, ApiError>;

    /// `GET /monitor/historical-status`. Advisory display data.
    async fn historical_status(&self) -> Result<HistoricalStatus, ApiError>;

    /// `POST /monitor/run`. The response message is informational only.
    async fn run_collection(&self, start_date: Option<Date>) -> Result<MessageResponse, ApiError>;

    /// `DELETE /monitor/all-data`
    async fn delete_all_data(&self) -> Result<MessageResponse, ApiError>;

    /// `POST /monitor/update-historical-start-date`
    async fn update_historical_start_date(
        &self,
        new_start_date: Date,
    ) -> Result<MessageResponse, ApiError>;

    /// `GET /monitor/summary`
    async fn summary(&self) -> Result<MonitorSummary, ApiError>;

    /// `GET /monitor/all-results`
    async fn all_results(&self) -> Result<Vec<MonitorResult>, ApiError>;

    /// `GET /monitor/results-by-status/{status}`
    async fn results_by_status(&self, status: ResultStatus)
        -> Result<Vec<MonitorResult>, ApiError>;
}
