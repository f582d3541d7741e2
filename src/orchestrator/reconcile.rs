//! Optimistic vs. authoritative status merging.
//!
//! A successful start only proves the backend accepted the request; a poll
//! reflects actual task state. Both are tagged with the order in which they
//! arrived and the latest one is shown. On equal arrival order the poll wins.

use crate::model::TaskStatus;

/// A value tagged with its arrival sequence number.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Stamped<T> {
    pub value: T,
    pub arrival: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Source {
    Optimistic,
    Authoritative,
}

pub(crate) fn merge<'a>(
    optimistic: Option<&'a Stamped<TaskStatus>>,
    authoritative: Option<&'a Stamped<TaskStatus>>,
) -> Option<(&'a TaskStatus, Source)> {
    match (optimistic, authoritative) {
        (Some(o), Some(a)) if o.arrival > a.arrival => Some((&o.value, Source::Optimistic)),
        (_, Some(a)) => Some((&a.value, Source::Authoritative)),
        (Some(o), None) => Some((&o.value, Source::Optimistic)),
        (None, None) => None,
    }
}
