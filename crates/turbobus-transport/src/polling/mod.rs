//! Polling receivers.
//!
//! A started receiver in polling mode is driven by one or more pollers on the
//! connector's [`Scheduler`]. Each poller owns a [`PollingWorker`] whose
//! running guard keeps its ticks from overlapping. Transacted endpoints may
//! run several pollers and fan the polled messages out to receiver workers.

mod scheduler;
mod transacted;
mod worker;

pub use scheduler::{ScheduledTask, Scheduler};
pub(crate) use transacted::fan_out;
pub(crate) use worker::PollingWorker;

use std::time::Duration;

use crate::core::{Endpoint, PollingConfig, ThreadingProfile, TransactedReceiverConfig};

/// Number of pollers for an endpoint.
///
/// Several pollers run only for transacted endpoints with multi-receiver mode
/// enabled and threading enabled for receivers.
pub fn poller_count(
    endpoint: &Endpoint,
    transacted: &TransactedReceiverConfig,
    profile: &ThreadingProfile,
) -> usize {
    if endpoint.is_transacted() && transacted.multiple_receivers && profile.do_threading {
        transacted.concurrency.max(1)
    } else {
        1
    }
}

/// Delay between polls of an endpoint.
pub fn polling_frequency(endpoint: &Endpoint, polling: &PollingConfig) -> Duration {
    endpoint.polling_frequency().unwrap_or(polling.frequency)
}
