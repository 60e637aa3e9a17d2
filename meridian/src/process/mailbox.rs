//! Per-process mailbox and selective receive.
//!
//! Each process owns exactly one mailbox: an unbounded, single-consumer,
//! multi-producer FIFO of opaque, typed envelopes. `receive()` returns a
//! builder that registers one handler per accepted type; the first envelope
//! in arrival order whose tag matches any registered handler is removed and
//! decoded into that handler. Non-matching envelopes stay in place, in
//! order, for a later receive.

use std::any::Any;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::timeout as tokio_timeout;

use crate::codec::Encodable;
use crate::error::MeridianError;

/// The boxed payload of an envelope: either a concrete Rust value (local
/// delivery, never touches the codec) or encoded bytes (arrived over the
/// wire, decoded lazily once a matching handler claims it).
enum Payload {
    Local(Box<dyn Any + Send>),
    Remote(Vec<u8>),
}

struct Envelope {
    type_tag: String,
    payload: Payload,
}

/// The FIFO mailbox owned by exactly one process.
pub struct Mailbox {
    queue: Mutex<VecDeque<Envelope>>,
    notify: Notify,
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Mailbox {
    pub fn new() -> Self {
        Self { queue: Mutex::new(VecDeque::new()), notify: Notify::new() }
    }

    /// Append a locally produced value. Never touches the codec.
    pub fn push_local<T: Encodable>(&self, value: T) {
        self.queue.lock().unwrap().push_back(Envelope {
            type_tag: T::type_tag().to_string(),
            payload: Payload::Local(Box::new(value)),
        });
        self.notify.notify_one();
    }

    /// Append bytes that arrived over the wire, tagged with their sender's
    /// type tag. Decoding is deferred until a matching handler claims it.
    pub fn push_remote(&self, type_tag: String, bytes: Vec<u8>) {
        self.queue.lock().unwrap().push_back(Envelope { type_tag, payload: Payload::Remote(bytes) });
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start building a selective receive over this mailbox.
    pub fn receive(&self) -> ReceiveBuilder<'_> {
        ReceiveBuilder { mailbox: self, handlers: Vec::new(), timeout: None }
    }

    /// Scan head-to-tail for the first envelope whose tag is in `tags`,
    /// removing and returning it along with its index in `tags`. Retains
    /// every non-matching envelope in place, in order.
    ///
    /// TODO: cache a per-handler-set scan cursor so repeated rescans after a
    /// wakeup don't re-examine envelopes already known not to match (see the
    /// selective-receive design note); a full rescan is correct but O(n*h).
    fn take_matching(&self, tags: &[&str]) -> Option<(usize, String, Payload)> {
        let mut queue = self.queue.lock().unwrap();
        let position = queue.iter().position(|env| tags.iter().any(|t| *t == env.type_tag))?;
        let envelope = queue.remove(position).unwrap();
        let handler_index = tags.iter().position(|t| *t == envelope.type_tag).unwrap();
        Some((handler_index, envelope.type_tag, envelope.payload))
    }
}

type HandlerFn = Box<dyn FnOnce(DecodeInput) -> crate::closure::BoxFuture<'static, ()> + Send>;

enum DecodeInput {
    Local(Box<dyn Any + Send>),
    Remote(Vec<u8>),
}

/// Builder returned by [`Mailbox::receive`]. Register one handler per
/// accepted type with [`with`](ReceiveBuilder::with), optionally bound a
/// [`timeout`](ReceiveBuilder::timeout), then `.run().await`.
pub struct ReceiveBuilder<'a> {
    mailbox: &'a Mailbox,
    handlers: Vec<(&'static str, HandlerFn)>,
    timeout: Option<Duration>,
}

impl<'a> ReceiveBuilder<'a> {
    pub fn with<T, F, Fut>(mut self, handler: F) -> Self
    where
        T: Encodable,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let tag = T::type_tag();
        let wrapped: HandlerFn = Box::new(move |input: DecodeInput| {
            Box::pin(async move {
                let value = match input {
                    DecodeInput::Local(boxed) => match boxed.downcast::<T>() {
                        Ok(v) => *v,
                        Err(_) => return,
                    },
                    DecodeInput::Remote(bytes) => match T::decode_self(&bytes) {
                        Ok(v) => v,
                        Err(_) => return,
                    },
                };
                handler(value).await;
            })
        });
        self.handlers.push((tag, wrapped));
        self
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Run the selective receive: suspend until a matching envelope arrives
    /// (or the timeout, if any, expires), then invoke its handler.
    ///
    /// The deadline only bounds the wait for a match: once `take_matching`
    /// has removed an envelope from the mailbox, the handler always runs to
    /// completion. Wrapping the handler invocation itself in the timeout
    /// would let a slow handler be cancelled after its message was already
    /// claimed, discarding a message `run` had committed to delivering --
    /// contradicting "on expiry the receive returns without consuming any
    /// message."
    pub async fn run(self) -> Result<(), MeridianError> {
        let ReceiveBuilder { mailbox, mut handlers, timeout: deadline } = self;
        let tags: Vec<&str> = handlers.iter().map(|(tag, _)| *tag).collect();

        let wait_for_match = async {
            loop {
                if let Some(matched) = mailbox.take_matching(&tags) {
                    return matched;
                }
                mailbox.notify.notified().await;
            }
        };

        let (index, _tag, payload) = match deadline {
            Some(d) => tokio_timeout(d, wait_for_match).await.map_err(|_| MeridianError::ReceiveTimeout)?,
            None => wait_for_match.await,
        };

        let (_, handler) = handlers.swap_remove(index);
        let input = match payload {
            Payload::Local(v) => DecodeInput::Local(v),
            Payload::Remote(b) => DecodeInput::Remote(b),
        };
        handler(input).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex as AsyncMutex;

    #[tokio::test]
    async fn receives_a_locally_pushed_message() {
        let mailbox = Mailbox::new();
        mailbox.push_local(7i32);
        let seen = Arc::new(AsyncMutex::new(None));
        let seen2 = seen.clone();
        mailbox.receive().with::<i32, _, _>(move |v| {
            let seen = seen2.clone();
            async move { *seen.lock().await = Some(v) }
        }).run().await.unwrap();
        assert_eq!(*seen.lock().await, Some(7));
    }

    #[tokio::test]
    async fn selective_receive_preserves_order_of_non_matching_messages() {
        let mailbox = Mailbox::new();
        mailbox.push_local(1i32);
        mailbox.push_local("a".to_string());
        mailbox.push_local(2i32);
        mailbox.push_local("b".to_string());

        let first = Arc::new(AsyncMutex::new(None));
        let f1 = first.clone();
        mailbox
            .receive()
            .with::<String, _, _>(move |v| {
                let f = f1.clone();
                async move { *f.lock().await = Some(v) }
            })
            .run()
            .await
            .unwrap();
        assert_eq!(*first.lock().await, Some("a".to_string()));

        let second = Arc::new(AsyncMutex::new(None));
        let f2 = second.clone();
        mailbox
            .receive()
            .with::<String, _, _>(move |v| {
                let f = f2.clone();
                async move { *f.lock().await = Some(v) }
            })
            .run()
            .await
            .unwrap();
        assert_eq!(*second.lock().await, Some("b".to_string()));

        let third = Arc::new(AsyncMutex::new(None));
        let f3 = third.clone();
        mailbox
            .receive()
            .with::<i32, _, _>(move |v| {
                let f = f3.clone();
                async move { *f.lock().await = Some(v) }
            })
            .run()
            .await
            .unwrap();
        assert_eq!(*third.lock().await, Some(1));

        let fourth = Arc::new(AsyncMutex::new(None));
        let f4 = fourth.clone();
        mailbox
            .receive()
            .with::<i32, _, _>(move |v| {
                let f = f4.clone();
                async move { *f.lock().await = Some(v) }
            })
            .run()
            .await
            .unwrap();
        assert_eq!(*fourth.lock().await, Some(2));
    }

    #[tokio::test]
    async fn receive_times_out_on_an_empty_mailbox() {
        let mailbox = Mailbox::new();
        let result = mailbox
            .receive()
            .with::<i32, _, _>(|_| async {})
            .timeout(Duration::from_millis(20))
            .run()
            .await;
        assert!(matches!(result, Err(MeridianError::ReceiveTimeout)));
    }

    #[tokio::test]
    async fn receive_suspends_until_a_message_arrives() {
        let mailbox = Arc::new(Mailbox::new());
        let m2 = mailbox.clone();
        let handle = tokio::spawn(async move {
            m2.receive().with::<i32, _, _>(|v| async move { v }).run().await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        mailbox.push_local(99i32);
        handle.await.unwrap();
    }
}
