use std::time::Duration;

use tracing::info;

use crate::codec::EnvelopeCodec;
use crate::error::Result;
use crate::message::Envelope;
use crate::transport::{dead_letter_queue_for, QueueStore};

/// Move every message in `queue`'s dead-letter queue back to `queue`.
///
/// Dead-lettered messages are never redelivered automatically; this is the
/// operator's tool for replaying them once the cause has been fixed. Replayed
/// envelopes lose their dead-letter headers and start over with a delivery
/// count of 0; bytes that never decoded are moved unchanged. Returns the
/// number of messages moved.
pub fn requeue_dead_letters(store: &dyn QueueStore, queue: &str) -> Result<usize> {
    let dlq = dead_letter_queue_for(queue);
    if !store.queue_exists(&dlq)? {
        return Ok(0);
    }

    let mut moved = 0;
    while let Some(delivery) = store.dequeue(&dlq, Duration::ZERO)? {
        let body = EnvelopeCodec::rewrite(&delivery.body, Envelope::reset_for_replay)
            .unwrap_or_else(|_| delivery.body.clone());
        if let Err(err) = store.enqueue(queue, body) {
            store.nack(&delivery.handle)?;
            return Err(err.into());
        }
        store.ack(&delivery.handle)?;
        moved += 1;
    }

    info!(queue, moved, "requeued dead-lettered messages");
    Ok(moved)
}
