use super::{ApiError, MonitorApi};
use crate::model::{
    format_date, HistoricalStatus, MessageResponse, MonitorConfig, MonitorResult, MonitorSummary,
    ResultStatus, RunRequest, SystemStatusResponse, UpdateStartDateRequest,
};
use async_trait::async_trait;
use reqwest::{RequestBuilder, Url};
use serde::de::DeserializeOwned;
use time::Date;

/// Error body shape used by the backend (`{"detail": ...}`).
#[derive(Debug, serde::Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

impl ErrorBody {
    fn into_text(self) -> Option<String> {
        match self.detail {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) if s.trim().is_empty() => None,
            serde_json::Value::String(s) => Some(s),
            // Validation errors come back as a list of objects.
            other => Some(other.to_string()),
        }
    }
}

/// reqwest-backed client for the collection monitor backend.
#[derive(Clone)]
pub struct HttpMonitorApi {
    http: reqwest::Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl HttpMonitorApi {
    pub fn new(cfg: &MonitorConfig) -> Result<Self, ApiError> {
        let base_url = normalize_base_url(&cfg.base_url)?;
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(cfg.request_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url,
            auth_token: cfg.auth_token.clone().filter(|t| !t.trim().is_empty()),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::InvalidBaseUrl {
                url: self.base_url.to_string(),
                reason: e.to_string(),
            })
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ApiError> {
        let req = match self.auth_token.as_deref() {
            Some(token) => req.bearer_auth(token),
            None => req,
        };
        let resp = req.send().await?;
        let status = resp.status();
        log::debug!("{} {}", status.as_u16(), resp.url());

        if !status.is_success() {
            let detail = resp
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(ErrorBody::into_text);
            return Err(ApiError::Status {
                status: status.as_u16(),
                detail,
            });
        }

        let body = resp.bytes().await?;
        decode_body(&body)
    }
}

/// Ensure the base URL ends with `/` so relative endpoint joins keep any path prefix.
fn normalize_base_url(raw: &str) -> Result<Url, ApiError> {
    let trimmed = raw.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    Url::parse(&with_slash).map_err(|e| ApiError::InvalidBaseUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}

fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    // 204 / empty bodies from the mutation endpoints decode as an empty object.
    let body: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        body
    };
    serde_json::from_slice(body).map_err(|e| ApiError::Decode(e.to_string()))
}

#[async_trait]
impl MonitorApi for HttpMonitorApi {
    async fn system_status(&self) -> Result<SystemStatusResponse, ApiError> {
        let url = self.endpoint("monitor/system-status")?;
        self.send(self.http.get(url)).await
    }

    async fn historical_status(&self) -> Result<HistoricalStatus, ApiError> {
        let url = self.endpoint("monitor/historical-status")?;
        self.send(self.http.get(url)).await
    }

    async fn run_collection(&self, start_date: Option<Date>) -> Result<MessageResponse, ApiError> {
        let url = self.endpoint("monitor/run")?;
        let body = RunRequest {
            start_date: start_date.map(format_date),
        };
        self.send(self.http.post(url).json(&body)).await
    }

    async fn delete_all_data(&self) -> Result<MessageResponse, ApiError> {
        let url = self.endpoint("monitor/all-data")?;
        self.send(self.http.delete(url)).await
    }

    async fn update_historical_start_date(
        &self,
        new_start_date: Date,
    ) -> Result<MessageResponse, ApiError> {
        let url = self.endpoint("monitor/update-historical-start-date")?;
        let body = UpdateStartDateRequest {
            new_start_date: format_date(new_start_date),
        };
        self.send(self.http.post(url).json(&body)).await
    }

    async fn summary(&self) -> Result<MonitorSummary, ApiError> {
        let url = self.endpoint("monitor/summary")?;
        self.send(self.http.get(url)).await
    }

    async fn all_results(&self) -> Result<Vec<MonitorResult>, ApiError> {
        let url = self.endpoint("monitor/all-results")?;
        self.send(self.http.get(url)).await
    }

    async fn results_by_status(
        &self,
        status: ResultStatus,
    ) -> Result<Vec<MonitorResult>, ApiError> {
        let url = self.endpoint(&format!(
            "monitor/results-by-status/{}",
            status.as_path_segment()
        ))?;
        self.send(self.http.get(url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(base_url: &str) -> MonitorConfig {
        MonitorConfig {
            base_url: base_url.to_string(),
            auth_token: Some("  ".into()),
            poll_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            stale_after_failures: 3,
            user_agent: "social-monitor-test".into(),
        }
    }

    #[test]
    fn endpoints_keep_base_path_prefix() {
        let api = HttpMonitorApi::new(&config("https://example.org/api")).unwrap();
        let url = api.endpoint("monitor/system-status").unwrap();
        assert_eq!(url.as_str(), "https://example.org/api/monitor/system-status");
    }

    #[test]
    fn blank_token_is_not_forwarded() {
        let api = HttpMonitorApi::new(&config("http://localhost:8000")).unwrap();
        assert!(api.auth_token.is_none());
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let err = HttpMonitorApi::new(&config("not a url")).err().unwrap();
        assert!(matches!(err, ApiError::InvalidBaseUrl { .. }));
    }

    #[test]
    fn empty_body_decodes_as_empty_message() {
        let msg: MessageResponse = decode_body(b"").unwrap();
        assert_eq!(msg, MessageResponse::default());
        let msg: MessageResponse = decode_body(br#"{"message":"iniciado"}"#).unwrap();
        assert_eq!(msg.message.as_deref(), Some("iniciado"));
    }

    #[test]
    fn error_detail_handles_strings_and_lists() {
        let body: ErrorBody = serde_json::from_str(r#"{"detail":"Task already running"}"#).unwrap();
        assert_eq!(body.into_text().as_deref(), Some("Task already running"));

        let body: ErrorBody =
            serde_json::from_str(r#"{"detail":[{"loc":["body"],"msg":"bad date"}]}"#).unwrap();
        assert!(body.into_text().unwrap().contains("bad date"));

        let body: ErrorBody = serde_json::from_str(r#"{"detail":null}"#).unwrap();
        assert_eq!(body.into_text(), None);
    }
}
