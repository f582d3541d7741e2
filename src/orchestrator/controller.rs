//! Collection monitor controller.
//!
//! Owns the `StatusStore` and runs the poll timer, the mutation gate and all
//! in-flight requests on a single task, emitting events for presentation layers.

use super::poller::{sleep_until_due, PollSchedule};
use super::store::{ConflictError, PollOutcome, StatusStore, StatusView};
use crate::api::{ApiError, MonitorApi};
use crate::model::{
    HistoricalStatus, MessageResponse, MonitorConfig, MonitorEvent, Mutation, MutationKind,
    Notice, SystemStatusResponse,
};
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Acknowledgement of a mutation accepted by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationReceipt {
    pub kind: MutationKind,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Conflict(#[from] ConflictError),
    #[error("{kind} failed: {message}")]
    Failed { kind: MutationKind, message: String },
    #[error("monitor controller is no longer running")]
    ControllerGone,
}

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub stale_after_failures: u32,
}

impl From<&MonitorConfig> for PollSettings {
    fn from(cfg: &MonitorConfig) -> Self {
        Self {
            interval: cfg.poll_interval,
            stale_after_failures: cfg.stale_after_failures,
        }
    }
}

/// Commands emitted by UI layers.
enum MonitorCommand {
    Submit {
        mutation: Mutation,
        reply: oneshot::Sender<Result<MutationReceipt, SubmitError>>,
    },
    Refresh,
    Teardown,
}

/// Cloneable handle to a mounted controller.
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    cmd_tx: UnboundedSender<MonitorCommand>,
}

impl std::fmt::Debug for MonitorCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorCommand::Submit { mutation, .. } => write!(f, "Submit({mutation:?})"),
            MonitorCommand::Refresh => f.write_str("Refresh"),
            MonitorCommand::Teardown => f.write_str("Teardown"),
        }
    }
}

impl MonitorHandle {
    /// Submit a mutation through the gate and wait for it to settle.
    pub async fn submit(&self, mutation: Mutation) -> Result<MutationReceipt, SubmitError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(MonitorCommand::Submit { mutation, reply })
            .map_err(|_| SubmitError::ControllerGone)?;
        rx.await.map_err(|_| SubmitError::ControllerGone)?
    }

    /// (Re)start polling and refetch historical status. Polling is left
    /// alone while a session is already active.
    pub fn refresh(&self) {
        let _ = self.cmd_tx.send(MonitorCommand::Refresh);
    }

    /// Stop polling and discard every response that arrives afterwards.
    pub fn teardown(&self) {
        let _ = self.cmd_tx.send(MonitorCommand::Teardown);
    }
}

/// Spawn a controller for a freshly mounted view. Polling starts immediately.
pub fn mount(
    api: Arc<dyn MonitorApi>,
    settings: PollSettings,
    event_tx: UnboundedSender<MonitorEvent>,
) -> (MonitorHandle, JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(run_controller(api, settings, event_tx, cmd_rx));
    (MonitorHandle { cmd_tx }, handle)
}

enum Completion {
    Poll {
        ticket: u64,
        result: Result<SystemStatusResponse, ApiError>,
    },
    Historical(Result<HistoricalStatus, ApiError>),
    Mutation {
        kind: MutationKind,
        result: Result<MessageResponse, ApiError>,
        reply: oneshot::Sender<Result<MutationReceipt, SubmitError>>,
    },
}

struct Controller {
    api: Arc<dyn MonitorApi>,
    store: StatusStore,
    schedule: PollSchedule,
    event_tx: UnboundedSender<MonitorEvent>,
    in_flight: FuturesUnordered<BoxFuture<'static, Completion>>,
    historical_in_flight: bool,
    last_view: Option<StatusView>,
}

impl Controller {
    fn new(
        api: Arc<dyn MonitorApi>,
        settings: PollSettings,
        event_tx: UnboundedSender<MonitorEvent>,
    ) -> Self {
        Self {
            api,
            store: StatusStore::new(settings.interval, settings.stale_after_failures),
            schedule: PollSchedule::new(settings.interval),
            event_tx,
            in_flight: FuturesUnordered::new(),
            historical_in_flight: false,
            last_view: None,
        }
    }

    fn emit_view(&mut self) {
        let view = self.store.view();
        if self.last_view.as_ref() == Some(&view) {
            return;
        }
        self.last_view = Some(view.clone());
        let _ = self.event_tx.send(MonitorEvent::StateChanged(view));
    }

    fn notice(&self, notice: Notice) {
        let _ = self.event_tx.send(MonitorEvent::Notice(notice));
    }

    fn start_polling(&mut self) {
        if self.store.start_polling() {
            log::info!(
                "polling started (every {})",
                humantime::format_duration(self.schedule.interval())
            );
            self.schedule.schedule_now();
        }
    }

    fn dispatch_poll(&mut self) {
        self.schedule.begin();
        let api = self.api.clone();
        let ticket = self.store.poll_ticket();
        self.in_flight.push(
            async move {
                Completion::Poll {
                    ticket,
                    result: api.system_status().await,
                }
            }
            .boxed(),
        );
    }

    fn dispatch_historical(&mut self) {
        if self.historical_in_flight {
            return;
        }
        self.historical_in_flight = true;
        let api = self.api.clone();
        self.in_flight
            .push(async move { Completion::Historical(api.historical_status().await) }.boxed());
    }

    fn handle_command(&mut self, cmd: MonitorCommand) {
        log::debug!("command: {cmd:?}");
        match cmd {
            MonitorCommand::Submit { mutation, reply } => self.submit(mutation, reply),
            MonitorCommand::Refresh => {
                self.start_polling();
                self.dispatch_historical();
            }
            // Handled by the loop.
            MonitorCommand::Teardown => {}
        }
        self.emit_view();
    }

    fn submit(
        &mut self,
        mutation: Mutation,
        reply: oneshot::Sender<Result<MutationReceipt, SubmitError>>,
    ) {
        let kind = mutation.kind();
        if let Err(conflict) = self.store.begin_mutation(kind) {
            log::info!("{conflict}");
            self.notice(Notice::Conflict {
                kind,
                reason: conflict.reason.to_string(),
            });
            let _ = reply.send(Err(conflict.into()));
            return;
        }

        log::info!("submitting {kind}");
        let api = self.api.clone();
        self.in_flight.push(
            async move {
                let result = match mutation {
                    Mutation::Start { start_date } => api.run_collection(start_date).await,
                    Mutation::DeleteAll => api.delete_all_data().await,
                    Mutation::UpdateHistoricalStartDate { new_start_date } => {
                        api.update_historical_start_date(new_start_date).await
                    }
                };
                Completion::Mutation {
                    kind,
                    result,
                    reply,
                }
            }
            .boxed(),
        );
    }

    fn handle_completion(&mut self, done: Completion) {
        match done {
            Completion::Poll { ticket, result } => self.on_poll(ticket, result),
            Completion::Historical(result) => {
                self.historical_in_flight = false;
                match result {
                    Ok(status) => {
                        let _ = self.event_tx.send(MonitorEvent::Historical(status));
                    }
                    Err(e) => log::debug!("historical status unavailable: {e}"),
                }
            }
            Completion::Mutation {
                kind,
                result,
                reply,
            } => self.on_mutation(kind, result, reply),
        }
        self.emit_view();
    }

    fn on_poll(&mut self, ticket: u64, result: Result<SystemStatusResponse, ApiError>) {
        let rerun = self.schedule.finish();
        let previous_task = self.store.view().task_name().map(str::to_owned);
        let observed_at = OffsetDateTime::now_utc();

        let outcome = match result {
            Ok(resp) => self.store.apply_poll(ticket, Ok(resp.into()), observed_at),
            Err(e) => {
                log::warn!(
                    "status poll failed ({} in a row): {e}",
                    self.store.consecutive_failures() + 1
                );
                self.store.apply_poll(ticket, Err(&e), observed_at)
            }
        };

        match outcome {
            PollOutcome::Continue => {
                if self.store.just_became_stale() {
                    self.notice(Notice::StatusMayBeStale {
                        failures: self.store.consecutive_failures(),
                    });
                }
                if !self.store.session().is_active {
                    self.schedule.cancel();
                } else if rerun {
                    self.schedule.schedule_now();
                } else {
                    self.schedule.schedule_next();
                }
            }
            PollOutcome::Stopped { finished_task } => {
                self.schedule.cancel();
                log::info!("task not running, polling stopped");
                if finished_task {
                    self.notice(Notice::TaskFinished {
                        task: previous_task,
                    });
                    self.dispatch_historical();
                    let _ = self.event_tx.send(MonitorEvent::ViewsInvalidated);
                }
            }
            PollOutcome::Discarded => {}
        }
    }

    fn on_mutation(
        &mut self,
        kind: MutationKind,
        result: Result<MessageResponse, ApiError>,
        reply: oneshot::Sender<Result<MutationReceipt, SubmitError>>,
    ) {
        let settlement = self.store.settle_mutation(kind, &result);
        if settlement.discarded {
            return;
        }

        match result {
            Ok(resp) => {
                let message = resp
                    .message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| kind.generic_success().to_string());
                log::info!("{kind} accepted: {message}");
                if settlement.poll_now {
                    self.schedule.schedule_now();
                }
                if settlement.invalidate_views {
                    let _ = self.event_tx.send(MonitorEvent::ViewsInvalidated);
                }
                if kind == MutationKind::UpdateDate {
                    self.dispatch_historical();
                }
                self.notice(Notice::MutationSucceeded {
                    kind,
                    message: message.clone(),
                });
                let _ = reply.send(Ok(MutationReceipt { kind, message }));
            }
            Err(e) => {
                log::warn!("{kind} failed: {e}");
                let message = e
                    .detail()
                    .map(str::to_owned)
                    .unwrap_or_else(|| kind.generic_failure().to_string());
                self.notice(Notice::MutationFailed {
                    kind,
                    message: message.clone(),
                });
                let _ = reply.send(Err(SubmitError::Failed { kind, message }));
            }
        }
    }
}

/// Drive one mounted view until teardown or until every handle is dropped.
async fn run_controller(
    api: Arc<dyn MonitorApi>,
    settings: PollSettings,
    event_tx: UnboundedSender<MonitorEvent>,
    mut cmd_rx: UnboundedReceiver<MonitorCommand>,
) {
    let mut ctl = Controller::new(api, settings, event_tx);
    ctl.start_polling();
    ctl.dispatch_historical();
    ctl.emit_view();

    loop {
        let due = ctl.schedule.due_at();
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(MonitorCommand::Teardown) | None => {
                        ctl.store.teardown();
                        log::debug!("monitor view torn down");
                        break;
                    }
                    Some(cmd) => ctl.handle_command(cmd),
                }
            }
            _ = sleep_until_due(due) => ctl.dispatch_poll(),
            Some(done) = ctl.in_flight.next(), if !ctl.in_flight.is_empty() => {
                ctl.handle_completion(done);
            }
        }
    }
    // Dropping `ctl` drops the pending timer and any request still in flight.
}
