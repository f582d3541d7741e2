//! Scripted in-memory backend used by controller and CLI tests.

use super::{ApiError, MonitorApi};
use crate::model::{
    HistoricalStatus, MessageResponse, MonitorResult, MonitorSummary, ResultStatus,
    SystemStatusResponse,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use time::Date;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    SystemStatus,
    HistoricalStatus,
    Run(Option<Date>),
    DeleteAll,
    UpdateStartDate(Date),
    Summary,
    AllResults,
    ResultsByStatus(ResultStatus),
}

#[derive(Debug, Clone)]
pub(crate) enum Scripted<T> {
    Ok(T),
    /// Simulated network/5xx failure.
    Fail,
    /// Backend rejection carrying a `detail` message.
    Reject(String),
}

impl<T> Scripted<T> {
    fn into_result(self) -> Result<T, ApiError> {
        match self {
            Scripted::Ok(v) => Ok(v),
            Scripted::Fail => Err(ApiError::Status {
                status: 503,
                detail: None,
            }),
            Scripted::Reject(detail) => Err(ApiError::Status {
                status: 400,
                detail: Some(detail),
            }),
        }
    }
}

struct FakeState {
    calls: Vec<Call>,
    statuses: VecDeque<Scripted<SystemStatusResponse>>,
    /// Returned once the scripted queue is exhausted.
    fallback_status: SystemStatusResponse,
    mutations: VecDeque<Scripted<MessageResponse>>,
    historical: HistoricalStatus,
    summary: MonitorSummary,
}

/// Fake backend. Status and mutation responses can be held back with
/// [`FakeApi::hold_statuses`] / [`FakeApi::hold_mutations`] to simulate slow requests.
pub(crate) struct FakeApi {
    state: Mutex<FakeState>,
    status_gate: Option<Arc<Semaphore>>,
    mutation_gate: Option<Arc<Semaphore>>,
}

impl FakeApi {
    pub fn new(fallback_status: SystemStatusResponse) -> Self {
        Self {
            state: Mutex::new(FakeState {
                calls: Vec::new(),
                statuses: VecDeque::new(),
                fallback_status,
                mutations: VecDeque::new(),
                historical: HistoricalStatus {
                    is_running: false,
                    last_processed_date: None,
                    original_start_date: None,
                    message: "idle".into(),
                },
                summary: MonitorSummary::default(),
            }),
            status_gate: None,
            mutation_gate: None,
        }
    }

    pub fn idle() -> Self {
        Self::new(SystemStatusResponse::idle())
    }

    pub fn hold_statuses(mut self) -> Self {
        self.status_gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    pub fn hold_mutations(mut self) -> Self {
        self.mutation_gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    pub fn with_summary(self, summary: MonitorSummary) -> Self {
        self.lock().summary = summary;
        self
    }

    /// Let `n` held status responses through.
    pub fn release_statuses(&self, n: usize) {
        if let Some(gate) = &self.status_gate {
            gate.add_permits(n);
        }
    }

    /// Let `n` held mutation responses through.
    pub fn release_mutations(&self, n: usize) {
        if let Some(gate) = &self.mutation_gate {
            gate.add_permits(n);
        }
    }

    pub fn push_status(&self, status: Scripted<SystemStatusResponse>) {
        self.lock().statuses.push_back(status);
    }

    pub fn set_fallback_status(&self, status: SystemStatusResponse) {
        self.lock().fallback_status = status;
    }

    pub fn push_mutation(&self, outcome: Scripted<MessageResponse>) {
        self.lock().mutations.push_back(outcome);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn status_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::SystemStatus))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn record(&self, call: Call) {
        self.lock().calls.push(call);
    }

    async fn wait(gate: &Option<Arc<Semaphore>>) {
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
    }

    async fn mutation(&self, call: Call) -> Result<MessageResponse, ApiError> {
        self.record(call);
        Self::wait(&self.mutation_gate).await;
        let scripted = self
            .lock()
            .mutations
            .pop_front()
            .unwrap_or(Scripted::Ok(MessageResponse::new("ok")));
        scripted.into_result()
    }
}

#[async_trait]
impl MonitorApi for FakeApi {
    async fn system_status(&self) -> Result<SystemStatusResponse, ApiError> {
        self.record(Call::SystemStatus);
        Self::wait(&self.status_gate).await;
        let mut state = self.lock();
        let next = match state.statuses.pop_front() {
            Some(scripted) => scripted,
            None => Scripted::Ok(state.fallback_status.clone()),
        };
        next.into_result()
    }

    async fn historical_status(&self) -> Result<HistoricalStatus, ApiError> {
        self.record(Call::HistoricalStatus);
        Ok(self.lock().historical.clone())
    }

    async fn run_collection(&self, start_date: Option<Date>) -> Result<MessageResponse, ApiError> {
        self.mutation(Call::Run(start_date)).await
    }

    async fn delete_all_data(&self) -> Result<MessageResponse, ApiError> {
        self.mutation(Call::DeleteAll).await
    }

    async fn update_historical_start_date(
        &self,
        new_start_date: Date,
    ) -> Result<MessageResponse, ApiError> {
        self.mutation(Call::UpdateStartDate(new_start_date)).await
    }

    async fn summary(&self) -> Result<MonitorSummary, ApiError> {
        self.record(Call::Summary);
        Ok(self.lock().summary.clone())
    }

    async fn all_results(&self) -> Result<Vec<MonitorResult>, ApiError> {
        self.record(Call::AllResults);
        Ok(Vec::new())
    }

    async fn results_by_status(
        &self,
        status: ResultStatus,
    ) -> Result<Vec<MonitorResult>, ApiError> {
        self.record(Call::ResultsByStatus(status));
        Ok(Vec::new())
    }
}
