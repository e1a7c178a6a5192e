//! Fan-out of a polled batch to receiver workers.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::debug;

use crate::core::{TransportMessage, TransportResult};
use crate::receiver::MessageReceiver;
use crate::work::WorkManager;

/// Counts a finished message; runs even when the work is rejected or panics.
struct Countdown(Arc<Semaphore>);

impl Drop for Countdown {
    fn drop(&mut self) {
        self.0.add_permits(1);
    }
}

/// Routes each message on its own worker, each in its own transaction, and
/// waits until the whole batch has been handled.
///
/// Failures of individual messages go to the receiver's failure handling;
/// the first rejected submission is returned after the batch completes.
pub(crate) async fn fan_out(
    receiver: &Arc<MessageReceiver>,
    workers: &WorkManager,
    messages: Vec<TransportMessage>,
) -> TransportResult<()> {
    let batch = messages.len();
    if batch == 0 {
        return Ok(());
    }

    let latch = Arc::new(Semaphore::new(0));
    let mut rejected = None;
    for message in messages {
        let done = Countdown(Arc::clone(&latch));
        let description = format!("receiving {} on {}", message.id, receiver.key());
        let receiver = Arc::clone(receiver);
        let work = async move {
            let _done = done;
            if let Err(e) = receiver.route_in_transaction(message).await {
                receiver.poll_failed(e).await;
            }
        };
        if let Err(e) = workers.schedule_work(&description, work).await {
            rejected.get_or_insert(e);
        }
    }

    let permits = u32::try_from(batch).unwrap_or(u32::MAX);
    let _ = latch.acquire_many(permits).await;
    debug!(receiver = %receiver.key(), batch, "batch handled");

    match rejected {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
