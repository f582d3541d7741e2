//! Poll timer bookkeeping.
//!
//! Keeps at most one status request in flight and decides when the next one
//! is due. Whether polling should continue at all is the store's call.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub(crate) struct PollSchedule {
    interval: Duration,
    next_due: Option<Instant>,
    in_flight: bool,
    /// A poll was requested while one was already in flight.
    rerun_when_done: bool,
}

impl PollSchedule {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_due: None,
            in_flight: false,
            rerun_when_done: false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Deadline for the next tick, or `None` while idle or a request is in flight.
    pub fn due_at(&self) -> Option<Instant> {
        if self.in_flight {
            None
        } else {
            self.next_due
        }
    }

    #[cfg(test)]
    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Poll as soon as possible without waiting a full interval.
    pub fn schedule_now(&mut self) {
        if self.in_flight {
            self.rerun_when_done = true;
        } else {
            self.next_due = Some(Instant::now());
        }
    }

    /// Schedule the regular tick one interval from now, unless something sooner is pending.
    pub fn schedule_next(&mut self) {
        let at = Instant::now() + self.interval;
        self.next_due = Some(match self.next_due {
            Some(existing) if existing < at => existing,
            _ => at,
        });
    }

    /// Called when the timer fires and a status request is dispatched.
    pub fn begin(&mut self) {
        self.next_due = None;
        self.in_flight = true;
    }

    /// Called when the in-flight status request settles. Returns true when an
    /// immediate rerun was requested meanwhile.
    pub fn finish(&mut self) -> bool {
        self.in_flight = false;
        std::mem::take(&mut self.rerun_when_done)
    }

    /// Drop any pending tick. An in-flight request is left to settle.
    pub fn cancel(&mut self) {
        self.next_due = None;
        self.rerun_when_done = false;
    }
}

/// Sleep until `due`, or forever when nothing is scheduled.
pub(crate) async fn sleep_until_due(due: Option<Instant>) {
    match due {
        Some(at) => tokio::time::sleep_until(at).await,
        None => futures::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn immediate_schedule_is_due_now() {
        let mut s = PollSchedule::new(Duration::from_secs(5));
        assert_eq!(s.due_at(), None);
        s.schedule_now();
        assert!(s.due_at().unwrap() <= Instant::now());
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_request_blocks_next_tick() {
        let mut s = PollSchedule::new(Duration::from_secs(5));
        s.schedule_now();
        s.begin();
        assert!(s.in_flight());
        assert_eq!(s.due_at(), None);

        s.schedule_now();
        assert_eq!(s.due_at(), None);
        assert!(s.finish(), "rerun requested while in flight");
        assert!(!s.finish());
    }

    #[tokio::test(start_paused = true)]
    async fn regular_tick_keeps_sooner_deadline() {
        let mut s = PollSchedule::new(Duration::from_secs(5));
        s.schedule_now();
        let now = s.due_at().unwrap();
        s.schedule_next();
        assert_eq!(s.due_at(), Some(now));

        s.cancel();
        s.schedule_next();
        assert_eq!(s.due_at(), Some(Instant::now() + Duration::from_secs(5)));
    }
}
