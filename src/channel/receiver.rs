use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use super::queue::ChannelQueue;

/// The receiving end of a channel. Not `Serialize`/`Deserialize`: it stays on the process that
/// created it (spec §4.2).
pub enum ReceivePort<T> {
    Single(Arc<ChannelQueue>, PhantomData<fn() -> T>),
    LeftBiased(Vec<ReceivePort<T>>),
    RoundRobin { children: Vec<ReceivePort<T>>, cursor: usize },
}

impl<T> ReceivePort<T>
where
    T: DeserializeOwned + 'static,
{
    pub(crate) fn single(queue: Arc<ChannelQueue>) -> Self {
        ReceivePort::Single(queue, PhantomData)
    }

    pub(crate) fn left_biased(children: Vec<ReceivePort<T>>) -> Self {
        ReceivePort::LeftBiased(children)
    }

    pub(crate) fn round_robin(children: Vec<ReceivePort<T>>) -> Self {
        ReceivePort::RoundRobin { children, cursor: 0 }
    }

    /// Atomically receives the next value across the whole merge tree rooted at `self`,
    /// blocking until one is available (spec §4.2: "the atomic step is mandatory so that
    /// composing merged ports does not lose messages or wake spuriously").
    pub async fn receive_chan(&mut self) -> T {
        loop {
            let mut leaves = Vec::new();
            self.leaves(&mut leaves);

            // Every leaf is registered as a waiter before the try_pop scan below runs, not after:
            // a `send_chan` racing with "we found nothing" would otherwise be missed, since
            // `ChannelQueue::push` wakes only already-registered waiters.
            let mut waiters: Vec<_> = leaves.iter().map(|queue| Box::pin(queue.notified())).collect();
            for waiter in waiters.iter_mut() {
                waiter.as_mut().enable();
            }

            if let Some(message) = self.try_pop().await {
                return message
                    .decode::<T>()
                    .expect("ReceivePort<T> received a message that does not decode as T");
            }

            futures::future::select_all(waiters).await;
        }
    }

    /// One non-blocking pass over the tree in bias order. Rotates a `RoundRobin` node's cursor on
    /// success, recursively.
    fn try_pop<'a>(
        &'a mut self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Option<crate::message::Message>> + Send + 'a>>
    {
        Box::pin(async move {
            match self {
                ReceivePort::Single(queue, _) => queue.try_pop().await,
                ReceivePort::LeftBiased(children) => {
                    for child in children.iter_mut() {
                        if let Some(m) = child.try_pop().await {
                            return Some(m);
                        }
                    }
                    None
                }
                ReceivePort::RoundRobin { children, cursor } => {
                    let len = children.len();
                    if len == 0 {
                        return None;
                    }
                    for step in 0..len {
                        let idx = (*cursor + step) % len;
                        if let Some(m) = children[idx].try_pop().await {
                            *cursor = (idx + 1) % len;
                            return Some(m);
                        }
                    }
                    None
                }
            }
        })
    }

    /// Collects every leaf `ChannelQueue` in the tree.
    fn leaves(&self, out: &mut Vec<Arc<ChannelQueue>>) {
        match self {
            ReceivePort::Single(queue, _) => out.push(queue.clone()),
            ReceivePort::LeftBiased(children) | ReceivePort::RoundRobin { children, .. } => {
                for child in children {
                    child.leaves(out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::new_channel;
    use crate::id::{ChannelId, NodeId, ProcessId};

    fn fresh_channel<T: DeserializeOwned + 'static>(
        index: u64,
    ) -> (Arc<ChannelQueue>, ReceivePort<T>) {
        let node = NodeId::new("127.0.0.1:9100".parse().unwrap());
        let pid = ProcessId::new(node, 1);
        let id = ChannelId::new(pid, index);
        let (_tx, rx, queue) = new_channel::<T>(id);
        (queue, rx)
    }

    async fn push<T: serde::Serialize + 'static>(queue: &ChannelQueue, value: T) {
        queue.push(crate::message::Message::encode(&value).unwrap()).await;
    }

    #[tokio::test]
    async fn round_robin_cycles_starting_from_first() {
        let (q1, rx1) = fresh_channel::<i32>(0);
        let (q2, rx2) = fresh_channel::<i32>(1);
        push(&q1, 1).await;
        push(&q2, 2).await;
        push(&q1, 3).await;
        push(&q2, 4).await;

        let mut merged = super::super::merge_ports_rr(vec![rx1, rx2]);
        let mut got = Vec::new();
        for _ in 0..4 {
            got.push(merged.receive_chan().await);
        }
        assert_eq!(got, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn left_biased_prefers_first_non_empty() {
        let (q1, rx1) = fresh_channel::<i32>(0);
        let (q2, rx2) = fresh_channel::<i32>(1);
        push(&q2, 100).await;

        let mut merged = super::super::merge_ports_biased(vec![rx1, rx2]);
        assert_eq!(merged.receive_chan().await, 100);

        push(&q1, 1).await;
        push(&q2, 2).await;
        assert_eq!(merged.receive_chan().await, 1);
    }
}
