//! Event channel with two delivery guarantees.
//!
//! Both the download and the extraction pipelines publish their progress on a
//! bounded channel read by a UI consumer. Intermediate progress is cosmetic and
//! must never stall a transfer, so it is *reported*: if the channel is full the
//! event is dropped. Terminal events (a chunk finished, a chunk failed, a shard
//! completed) are *delivered*: the sender blocks until the consumer accepts them.
//!
//! There is no cancellation. A consumer that stops reading before the stream
//! ends leaves terminal senders blocked until the receiver is dropped.

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

/// Classifies an event for the channel.
pub trait Delivery {
    /// Terminal events take the guaranteed path.
    fn is_terminal(&self) -> bool;
}

/// Sending half of an event stream.
#[derive(Debug)]
pub struct ProgressSender<E> {
    tx: SyncSender<E>,
}

impl<E> Clone for ProgressSender<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

/// Create a bounded event channel.
pub fn channel<E: Delivery>(capacity: usize) -> (ProgressSender<E>, Receiver<E>) {
    let (tx, rx) = mpsc::sync_channel(capacity.max(1));
    (ProgressSender { tx }, rx)
}

impl<E: Delivery> ProgressSender<E> {
    /// Send an event using the guarantee its class requires.
    ///
    /// Returns `true` if the consumer received the event.
    pub fn send(&self, event: E) -> bool {
        if event.is_terminal() {
            self.deliver(event)
        } else {
            self.report(event)
        }
    }

    /// Best-effort: enqueue if there is room, otherwise drop the event.
    pub fn report(&self, event: E) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Guaranteed: block until the consumer has room for the event.
    ///
    /// Only fails when the consumer has gone away.
    pub fn deliver(&self, event: E) -> bool {
        if self.tx.send(event).is_err() {
            tracing::debug!("event consumer disconnected, terminal event discarded");
            return false;
        }
        true
    }
}
