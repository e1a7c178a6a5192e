//! One poller's tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tracing::trace;

use crate::receiver::MessageReceiver;

/// Runs the poll of one receiver on each scheduler tick.
#[derive(Debug)]
pub(crate) struct PollingWorker {
    receiver: Weak<MessageReceiver>,
    running: AtomicBool,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl PollingWorker {
    pub(crate) fn new(receiver: &Arc<MessageReceiver>) -> Self {
        Self {
            receiver: Arc::downgrade(receiver),
            running: AtomicBool::new(false),
        }
    }

    /// Polls once unless the receiver is not started or a poll is running.
    pub(crate) async fn run(&self) {
        let Some(receiver) = self.receiver.upgrade() else {
            return;
        };
        if !receiver.is_started() {
            trace!(receiver = %receiver.key(), "receiver not started, skipping poll");
            return;
        }
        if self.running.swap(true, Ordering::AcqRel) {
            trace!(receiver = %receiver.key(), "previous poll still running, skipping");
            return;
        }
        let _running = RunningGuard(&self.running);

        if let Err(e) = receiver.poll().await {
            receiver.poll_failed(e).await;
        }
    }
}
