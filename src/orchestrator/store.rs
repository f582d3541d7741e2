//! Single owned state container for the collection monitor.
//!
//! Holds the observed task status (authoritative and optimistic), the polling
//! session and the in-flight mutation. Every method is synchronous; the
//! controller calls them from one task, so check-and-set on the gate needs no
//! lock.

use super::reconcile::{self, Source, Stamped};
use crate::api::ApiError;
use crate::model::{MessageResponse, MutationKind, TaskStatus};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingSession {
    pub interval: Duration,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationInFlight {
    pub kind: MutationKind,
    pub pending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    TaskRunning,
    MutationPending(MutationKind),
    ShuttingDown,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictReason::TaskRunning => f.write_str("a task is already running"),
            ConflictReason::MutationPending(kind) => {
                write!(f, "another request ({kind}) is still pending")
            }
            ConflictReason::ShuttingDown => f.write_str("the monitor is shutting down"),
        }
    }
}

/// The gate denied a mutation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot {kind}: {reason}")]
pub struct ConflictError {
    pub kind: MutationKind,
    pub reason: ConflictReason,
}

/// Immutable snapshot handed to views.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusView {
    /// `None` until the first status response (or accepted start) arrives.
    pub status: Option<TaskStatus>,
    /// The shown status comes from a mutation, not from a poll.
    pub optimistic: bool,
    pub polling: bool,
    pub pending: Option<MutationKind>,
    pub stale: bool,
    /// Bumped whenever dependent read views must refetch.
    pub views_epoch: u64,
}

impl StatusView {
    pub fn is_running(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.is_running)
    }

    pub fn task_name(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.current_task_name.as_deref())
    }

    /// Mirrors the gate: no active polling session and nothing pending.
    pub fn can_submit(&self) -> bool {
        !self.polling && self.pending.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollOutcome {
    /// Keep polling at the regular interval.
    Continue,
    /// Task observed as not running; polling session ended.
    Stopped { finished_task: bool },
    /// Store was torn down; the response was ignored.
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Settlement {
    /// Polling was (re)started and a poll should be issued right away.
    pub poll_now: bool,
    pub invalidate_views: bool,
    pub discarded: bool,
}

#[derive(Debug)]
pub struct StatusStore {
    authoritative: Option<Stamped<TaskStatus>>,
    optimistic: Option<Stamped<TaskStatus>>,
    session: PollingSession,
    in_flight: Option<MutationInFlight>,
    arrivals: u64,
    consecutive_failures: u32,
    stale_after: u32,
    views_epoch: u64,
    torn_down: bool,
}

impl StatusStore {
    pub fn new(interval: Duration, stale_after: u32) -> Self {
        Self {
            authoritative: None,
            optimistic: None,
            session: PollingSession {
                interval,
                is_active: false,
            },
            in_flight: None,
            arrivals: 0,
            consecutive_failures: 0,
            stale_after: stale_after.max(1),
            views_epoch: 0,
            torn_down: false,
        }
    }

    pub fn session(&self) -> &PollingSession {
        &self.session
    }

    #[cfg(test)]
    pub fn in_flight(&self) -> Option<MutationInFlight> {
        self.in_flight
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Activate the polling session. Returns false when it was already active.
    pub fn start_polling(&mut self) -> bool {
        if self.torn_down || self.session.is_active {
            return false;
        }
        self.session.is_active = true;
        true
    }

    #[cfg(test)]
    pub fn can_submit(&self, kind: MutationKind) -> bool {
        self.check_gate(kind).is_ok()
    }

    fn check_gate(&self, kind: MutationKind) -> Result<(), ConflictError> {
        let reason = if self.torn_down {
            Some(ConflictReason::ShuttingDown)
        } else if self.session.is_active {
            Some(ConflictReason::TaskRunning)
        } else {
            self.in_flight
                .filter(|m| m.pending)
                .map(|m| ConflictReason::MutationPending(m.kind))
        };
        match reason {
            Some(reason) => Err(ConflictError { kind, reason }),
            None => Ok(()),
        }
    }

    /// Check the gate and mark the mutation pending in one step.
    pub fn begin_mutation(&mut self, kind: MutationKind) -> Result<(), ConflictError> {
        self.check_gate(kind)?;
        self.in_flight = Some(MutationInFlight {
            kind,
            pending: true,
        });
        Ok(())
    }

    /// Record the outcome of a submitted mutation. Pending is cleared whatever the outcome.
    pub(crate) fn settle_mutation(
        &mut self,
        kind: MutationKind,
        outcome: &Result<MessageResponse, ApiError>,
    ) -> Settlement {
        if self.torn_down {
            return Settlement {
                discarded: true,
                ..Default::default()
            };
        }
        if self.in_flight.is_some_and(|m| m.kind == kind) {
            self.in_flight = None;
        }
        if outcome.is_err() {
            return Settlement::default();
        }

        let mut settlement = Settlement::default();
        match kind {
            MutationKind::Start => {
                self.arrivals += 1;
                self.optimistic = Some(Stamped {
                    value: TaskStatus::optimistic_running(),
                    arrival: self.arrivals,
                });
                self.start_polling();
                settlement.poll_now = true;
                settlement.invalidate_views = true;
            }
            MutationKind::Delete => {
                settlement.invalidate_views = true;
            }
            MutationKind::UpdateDate => {}
        }
        if settlement.invalidate_views {
            self.views_epoch += 1;
        }
        settlement
    }

    /// Tag for a poll about to be dispatched; hand it back to `apply_poll`.
    pub(crate) fn poll_ticket(&self) -> u64 {
        self.arrivals
    }

    /// Apply one status poll response, observed at `observed_at`.
    ///
    /// `ticket` is what `poll_ticket` returned when the request went out.
    pub(crate) fn apply_poll(
        &mut self,
        ticket: u64,
        result: Result<TaskStatus, &ApiError>,
        observed_at: OffsetDateTime,
    ) -> PollOutcome {
        if self.torn_down {
            return PollOutcome::Discarded;
        }
        let mut status = match result {
            Ok(status) => status,
            Err(_) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                return PollOutcome::Continue;
            }
        };
        self.consecutive_failures = 0;

        // A poll sent before the start was accepted cannot have watched that task finish.
        let was_running = match self.optimistic.as_ref() {
            Some(o) if o.arrival <= ticket => true,
            _ => self
                .authoritative
                .as_ref()
                .is_some_and(|a| a.value.is_running),
        };
        if !status.is_running && status.last_completion_time.is_none() {
            status.last_completion_time = if was_running {
                Some(observed_at)
            } else {
                self.authoritative
                    .as_ref()
                    .and_then(|a| a.value.last_completion_time)
            };
        }

        self.arrivals += 1;
        let running = status.is_running;
        self.authoritative = Some(Stamped {
            value: status,
            arrival: self.arrivals,
        });
        // Anything optimistic arrived earlier than this poll.
        self.optimistic = None;

        if running {
            self.session.is_active = true;
            PollOutcome::Continue
        } else {
            self.session.is_active = false;
            PollOutcome::Stopped {
                finished_task: was_running,
            }
        }
    }

    /// View teardown. Every later response is discarded.
    pub fn teardown(&mut self) {
        self.torn_down = true;
        self.session.is_active = false;
    }

    pub fn is_stale(&self) -> bool {
        self.consecutive_failures >= self.stale_after
    }

    /// True exactly when the last failure pushed the count over the stale threshold.
    pub fn just_became_stale(&self) -> bool {
        self.consecutive_failures == self.stale_after
    }

    pub fn view(&self) -> StatusView {
        let merged = reconcile::merge(self.optimistic.as_ref(), self.authoritative.as_ref());
        StatusView {
            status: merged.map(|(s, _)| s.clone()),
            optimistic: matches!(merged, Some((_, Source::Optimistic))),
            polling: self.session.is_active,
            pending: self.in_flight.filter(|m| m.pending).map(|m| m.kind),
            stale: self.is_stale(),
            views_epoch: self.views_epoch,
        }
    }
}
