//! `CQueue`: the unbounded, per-process FIFO with selective receive (spec §4.1).
//!
//! A receive walks the queue head to tail, tries each [`Matcher`] in order against each message,
//! and removes the first message any matcher accepts — earlier, skipped messages stay exactly
//! where they were. Matchers are required to be pure: a message that fails every matcher in a call
//! will keep failing them for the lifetime of that call, so a `receive` only ever re-scans the
//! messages that arrived since its last look, never the whole queue again.

use std::collections::VecDeque;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::error::CoreError;
use crate::message::Message;

/// How long a receive is willing to wait for a match.
#[derive(Debug, Clone, Copy)]
pub enum BlockMode {
    Blocking,
    NonBlocking,
    Timeout(Duration),
}

/// Outcome of trying a single [`Matcher`] against one message.
enum MatchAttempt<R> {
    NoMatch,
    Matched(R),
    DecodeFailed(CoreError),
}

/// A predicate-and-handler pair tried against each mailbox message in turn.
///
/// Constructed with [`match_message`], [`match_if`] or [`match_unknown`] — not implemented
/// directly by callers.
pub trait Matcher<R> {
    fn try_match(&mut self, message: &Message) -> MatchAttempt<R>;
}

struct TypedMatch<T, F> {
    handler: Option<F>,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T, F, R> Matcher<R> for TypedMatch<T, F>
where
    T: DeserializeOwned + 'static,
    F: FnOnce(T) -> R,
{
    fn try_match(&mut self, message: &Message) -> MatchAttempt<R> {
        if !message.is::<T>() {
            return MatchAttempt::NoMatch;
        }
        match message.decode::<T>() {
            Ok(value) => {
                let handler = self.handler.take().expect("matcher reused after a match");
                MatchAttempt::Matched(handler(value))
            }
            Err(err) => MatchAttempt::DecodeFailed(err),
        }
    }
}

struct TypedMatchIf<T, P, F> {
    predicate: P,
    handler: Option<F>,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T, P, F, R> Matcher<R> for TypedMatchIf<T, P, F>
where
    T: DeserializeOwned + 'static,
    P: Fn(&T) -> bool,
    F: FnOnce(T) -> R,
{
    fn try_match(&mut self, message: &Message) -> MatchAttempt<R> {
        if !message.is::<T>() {
            return MatchAttempt::NoMatch;
        }
        match message.decode::<T>() {
            Ok(value) => {
                if (self.predicate)(&value) {
                    let handler = self.handler.take().expect("matcher reused after a match");
                    MatchAttempt::Matched(handler(value))
                } else {
                    MatchAttempt::NoMatch
                }
            }
            Err(err) => MatchAttempt::DecodeFailed(err),
        }
    }
}

struct Unknown<F> {
    handler: Option<F>,
}

impl<F, R> Matcher<R> for Unknown<F>
where
    F: FnOnce(Message) -> R,
{
    fn try_match(&mut self, message: &Message) -> MatchAttempt<R> {
        let handler = self.handler.take().expect("matcher reused after a match");
        MatchAttempt::Matched(handler(message.clone()))
    }
}

/// Matches a message of static type `T`, decoding it and passing it to `handler`.
pub fn match_message<T, F, R>(handler: F) -> Box<dyn Matcher<R> + Send>
where
    T: DeserializeOwned + 'static,
    F: FnOnce(T) -> R + Send + 'static,
{
    Box::new(TypedMatch {
        handler: Some(handler),
        _marker: std::marker::PhantomData,
    })
}

/// Matches a message of static type `T` whose decoded value satisfies `predicate`.
pub fn match_if<T, P, F, R>(predicate: P, handler: F) -> Box<dyn Matcher<R> + Send>
where
    T: DeserializeOwned + 'static,
    P: Fn(&T) -> bool + Send + 'static,
    F: FnOnce(T) -> R + Send + 'static,
{
    Box::new(TypedMatchIf {
        predicate,
        handler: Some(handler),
        _marker: std::marker::PhantomData,
    })
}

/// Matches any message at all. The only way to drop a message of unknown type from the queue
/// (spec §4.1); always put last in a matcher list.
pub fn match_unknown<F, R>(handler: F) -> Box<dyn Matcher<R> + Send>
where
    F: FnOnce(Message) -> R + Send + 'static,
{
    Box::new(Unknown {
        handler: Some(handler),
    })
}

fn try_matchers<R>(matchers: &mut [Box<dyn Matcher<R> + Send>], message: &Message) -> Option<MatchAttempt<R>> {
    for matcher in matchers.iter_mut() {
        match matcher.try_match(message) {
            MatchAttempt::NoMatch => continue,
            other => return Some(other),
        }
    }
    None
}

/// The unbounded per-process mailbox.
#[derive(Default)]
pub struct CQueue {
    queue: Mutex<VecDeque<Message>>,
    notify: Notify,
}

impl CQueue {
    pub fn new() -> Self {
        CQueue {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    /// Appends a message to the tail and wakes any parked receiver.
    pub async fn push(&self, message: Message) {
        self.queue.lock().await.push_back(message);
        self.notify.notify_waiters();
    }

    /// Runs the selective-receive algorithm of spec §4.1 against `matchers`, in `mode`.
    ///
    /// Returns `Ok(None)` for a non-blocking call that found nothing, or a timeout that expired.
    /// Returns `Err` if a message matched on fingerprint but failed to decode (spec's "must not
    /// corrupt the queue" failure mode: the offending message is still consumed before the error
    /// is returned, matching "first match wins").
    pub async fn receive<R>(
        &self,
        matchers: &mut [Box<dyn Matcher<R> + Send>],
        mode: BlockMode,
    ) -> Result<Option<R>, CoreError> {
        let deadline = match mode {
            BlockMode::Timeout(d) => Some(Instant::now() + d),
            _ => None,
        };
        let mut scanned = 0usize;
        loop {
            // Registered before the scan below, not after: `push` calls `notify_waiters()`, which
            // only wakes futures already registered and does not retain a permit for one created
            // later. Enabling first closes the gap between "we found nothing" and "we start
            // waiting" where a concurrent push would otherwise be missed forever.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut guard = self.queue.lock().await;
                let len = guard.len();
                let mut found = None;
                for idx in scanned..len {
                    if let Some(attempt) = try_matchers(matchers, &guard[idx]) {
                        found = Some((idx, attempt));
                        break;
                    }
                }
                if let Some((idx, attempt)) = found {
                    guard.remove(idx);
                    return match attempt {
                        MatchAttempt::Matched(value) => Ok(Some(value)),
                        MatchAttempt::DecodeFailed(err) => Err(err),
                        MatchAttempt::NoMatch => unreachable!(),
                    };
                }
                scanned = len;
            }

            match mode {
                BlockMode::NonBlocking => return Ok(None),
                BlockMode::Blocking => {
                    notified.await;
                }
                BlockMode::Timeout(_) => {
                    let deadline = deadline.expect("timeout mode always sets a deadline");
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(None);
                    }
                }
            }
        }
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn selective_receive_preserves_order_of_skipped_messages() {
        let mailbox = CQueue::new();
        mailbox.push(Message::encode(&"a".to_string()).unwrap()).await;
        mailbox.push(Message::encode(&7i32).unwrap()).await;
        mailbox.push(Message::encode(&"b".to_string()).unwrap()).await;

        let mut matchers: Vec<Box<dyn Matcher<i32> + Send>> = vec![match_message(|v: i32| v)];
        let got = mailbox
            .receive(&mut matchers, BlockMode::NonBlocking)
            .await
            .unwrap();
        assert_eq!(got, Some(7));

        assert_eq!(mailbox.len().await, 2);
        let mut matchers: Vec<Box<dyn Matcher<String> + Send>> =
            vec![match_message(|v: String| v)];
        let first = mailbox
            .receive(&mut matchers, BlockMode::NonBlocking)
            .await
            .unwrap();
        assert_eq!(first, Some("a".to_string()));
    }

    #[tokio::test]
    async fn non_blocking_returns_none_when_nothing_matches() {
        let mailbox = CQueue::new();
        let mut matchers: Vec<Box<dyn Matcher<i32> + Send>> = vec![match_message(|v: i32| v)];
        let got = mailbox
            .receive(&mut matchers, BlockMode::NonBlocking)
            .await
            .unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn timeout_zero_never_blocks() {
        let mailbox = CQueue::new();
        let mut matchers: Vec<Box<dyn Matcher<i32> + Send>> = vec![match_message(|v: i32| v)];
        let got = mailbox
            .receive(&mut matchers, BlockMode::Timeout(Duration::from_millis(0)))
            .await
            .unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn match_unknown_drops_unrecognized_head_message() {
        let mailbox = CQueue::new();
        mailbox.push(Message::encode(&"unrecognized".to_string()).unwrap()).await;
        mailbox.push(Message::encode(&9i32).unwrap()).await;

        let mut matchers: Vec<Box<dyn Matcher<Option<i32>> + Send>> = vec![
            match_message(|v: i32| Some(v)),
            match_unknown(|_msg| None),
        ];
        let first = mailbox
            .receive(&mut matchers, BlockMode::NonBlocking)
            .await
            .unwrap();
        assert_eq!(first, Some(None));
        assert_eq!(mailbox.len().await, 1);
    }

    #[tokio::test]
    async fn blocking_receive_wakes_on_new_arrival() {
        use std::sync::Arc;

        let mailbox = Arc::new(CQueue::new());
        let reader = {
            let mailbox = mailbox.clone();
            tokio::spawn(async move {
                let mut matchers: Vec<Box<dyn Matcher<i32> + Send>> =
                    vec![match_message(|v: i32| v)];
                mailbox
                    .receive(&mut matchers, BlockMode::Blocking)
                    .await
                    .unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        mailbox.push(Message::encode(&5i32).unwrap()).await;
        let got = reader.await.unwrap();
        assert_eq!(got, Some(5));
    }
}
