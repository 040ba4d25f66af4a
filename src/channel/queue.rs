use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify};

use crate::message::Message;

/// The single typed FIFO behind a `ReceivePort::Single`. Shared (via `Arc`) between the receive
/// end and whatever routes incoming messages into it — the owning process's channel table for a
/// remote sender, or a direct push for a local one.
#[derive(Default)]
pub(crate) struct ChannelQueue {
    queue: Mutex<VecDeque<Message>>,
    notify: Notify,
}

impl ChannelQueue {
    pub fn new() -> Self {
        ChannelQueue {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    pub async fn push(&self, message: Message) {
        self.queue.lock().await.push_back(message);
        self.notify.notify_waiters();
    }

    /// Non-blocking pop, used by the merge tree's "try everything" pass.
    pub async fn try_pop(&self) -> Option<Message> {
        self.queue.lock().await.pop_front()
    }

    /// Returns (without awaiting) a future that resolves once a message has been pushed since it
    /// was enabled. Handed back unawaited, rather than as an `async fn`, so callers can register
    /// as a waiter (via `Notified::enable`) before re-checking the queue — `push` calls
    /// `notify_waiters()`, which does not retain a permit for a `Notified` created afterward, so
    /// registering only after finding nothing can miss a concurrent push forever. A wakeup is a
    /// hint, not a guarantee that this exact queue still holds a message: another consumer, or the
    /// bias order of the merge tree, may have already taken it.
    pub fn notified(&self) -> tokio::sync::Notified<'_> {
        self.notify.notified()
    }
}
