//! Task status reconciliation.
//!
//! This module owns the collection monitor's client-side state: the status
//! poller, the mutation gate and the optimistic/authoritative reconciler.
//! UI/CLI layers mount a controller, receive `MonitorEvent`s and submit
//! mutations through the returned `MonitorHandle`.

mod controller;
mod poller;
mod reconcile;
mod store;

pub use controller::{mount, MonitorHandle, PollSettings};
pub use store::StatusView;
