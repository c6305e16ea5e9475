//! Asynchronous publish/subscribe channels.
//!
//! A publisher hands a [`Message`] to a channel with [`MessageChannel::send`], which never waits
//! for the message to be processed.  Each subscriber of an [`ExecutorChannel`] has its own FIFO
//! queue, drained by a task that hands messages to a bounded pool of workers shared by all the
//! subscribers of that channel.
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, trace, warn};

use crate::error::panic_err_to_string;
use crate::message::Message;

/// Receives messages from a channel it is subscribed to.
#[async_trait]
pub trait MessageHandler<T>: Send + Sync + 'static
where
    T: Send + Sync + 'static,
{
    /// Handle one message.  Errors are logged by the channel, and never affect delivery to other
    /// subscribers or of later messages.
    async fn handle_message(&self, message: Arc<Message<T>>) -> anyhow::Result<()>;
}

/// Adapts an async closure into a [`MessageHandler`].
pub struct FnMessageHandler<F>(F);

impl<F> FnMessageHandler<F> {
    pub fn new<T, Fut>(f: F) -> Self
    where
        F: Fn(Arc<Message<T>>) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        Self(f)
    }
}

#[async_trait]
impl<T, F, Fut> MessageHandler<T> for FnMessageHandler<F>
where
    T: Send + Sync + 'static,
    F: Fn(Arc<Message<T>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle_message(&self, message: Arc<Message<T>>) -> anyhow::Result<()> {
        (self.0)(message).await
    }
}

/// Something messages can be sent to.
pub trait MessageChannel<T>: Send + Sync {
    /// Enqueue a message for delivery.  Returns `false`, dropping the message, if nobody will ever
    /// receive it.
    fn send(&self, message: Message<T>) -> bool;
}

/// Identifies one subscription to a [`SubscribableChannel`], for later unsubscribing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub trait SubscribableChannel<T>: MessageChannel<T>
where
    T: Send + Sync + 'static,
{
    fn subscribe(&self, handler: Arc<dyn MessageHandler<T>>) -> SubscriberId;

    /// Remove a subscriber.  Messages already queued for it are still delivered.
    fn unsubscribe(&self, id: SubscriberId) -> bool;
}

/// Configuration of a single [`ExecutorChannel`].
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Name used in log events.
    pub name: String,

    /// Max number of messages this channel delivers at the same time, across all subscribers.
    /// Zero is treated as one.
    pub max_concurrency: usize,

    /// How long [`ExecutorChannel::shutdown`] waits for queued and in-flight deliveries before
    /// giving up on them.  `None` waits forever.
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Option<Duration>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: "channel".to_string(),
            max_concurrency: 16,
            shutdown_timeout: Some(Duration::from_secs(5)),
        }
    }
}

impl ChannelConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

struct Subscriber<T> {
    id: SubscriberId,
    queue: mpsc::UnboundedSender<Arc<Message<T>>>,
}

struct ChannelInner<T> {
    config: ChannelConfig,
    permits: Arc<Semaphore>,
    subscribers: RwLock<Vec<Subscriber<T>>>,
    next_subscriber_id: AtomicU64,
    closed: AtomicBool,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

/// A [`SubscribableChannel`] that delivers messages on tokio tasks.
///
/// Delivery to a subscriber starts in the order messages were sent, but up to `max_concurrency`
/// deliveries run concurrently, so a slow message doesn't hold up the ones behind it.
///
/// Subscribing spawns a task, so it must happen within a tokio runtime.
pub struct ExecutorChannel<T> {
    inner: Arc<ChannelInner<T>>,
}

impl<T> Clone for ExecutorChannel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> ExecutorChannel<T> {
    pub fn new(config: ChannelConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrency.max(1)));

        Self {
            inner: Arc::new(ChannelInner {
                config,
                permits,
                subscribers: RwLock::new(Vec::new()),
                next_subscriber_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                tasks: TaskTracker::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Stop accepting messages, then wait for everything already queued to be delivered.
    ///
    /// If that takes longer than the configured shutdown timeout, messages still queued are
    /// abandoned.  Deliveries already running are never interrupted.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            debug!(channel = %self.name(), "Channel already shut down");
            return;
        }

        // Dropping the queue senders lets each drain task finish once its queue is empty
        let subscribers = std::mem::take(
            &mut *self
                .inner
                .subscribers
                .write()
                .unwrap_or_else(PoisonError::into_inner),
        );
        debug!(channel = %self.name(), subscribers = subscribers.len(), "Shutting down channel");
        drop(subscribers);

        self.inner.tasks.close();
        match self.inner.config.shutdown_timeout {
            Some(timeout) => {
                if tokio::time::timeout(timeout, self.inner.tasks.wait()).await.is_err() {
                    warn!(
                        channel = %self.name(),
                        timeout = ?timeout,
                        "Channel did not drain within the shutdown timeout; abandoning queued messages"
                    );
                    self.inner.cancel.cancel();
                }
            }
            None => self.inner.tasks.wait().await,
        }
    }

    /// Take the next queued message for one subscriber, wait for a worker, and deliver it on its
    /// own task.
    async fn drain(
        channel: String,
        id: SubscriberId,
        handler: Arc<dyn MessageHandler<T>>,
        mut queue: mpsc::UnboundedReceiver<Arc<Message<T>>>,
        permits: Arc<Semaphore>,
        cancel: CancellationToken,
        tasks: TaskTracker,
    ) {
        loop {
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                message = queue.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let handler = handler.clone();
            let channel = channel.clone();
            tasks.spawn(async move {
                let _permit = permit;
                Self::deliver(&channel, id, handler.as_ref(), message).await;
            });
        }

        trace!(%channel, subscriber_id = %id, "Subscriber queue closed");
    }

    async fn deliver(channel: &str, id: SubscriberId, handler: &dyn MessageHandler<T>, message: Arc<Message<T>>) {
        let message_id = message.headers().message_id().map(str::to_owned);
        match AssertUnwindSafe(handler.handle_message(message)).catch_unwind().await {
            Ok(Ok(())) => {
                trace!(%channel, subscriber_id = %id, ?message_id, "Message delivered");
            }
            Ok(Err(err)) => {
                error!(%channel, subscriber_id = %id, ?message_id, err = ?err, "Subscriber failed to handle message");
            }
            Err(panic) => {
                error!(
                    %channel,
                    subscriber_id = %id,
                    ?message_id,
                    panic = panic_err_to_string(panic),
                    "Subscriber panicked while handling message"
                );
            }
        }
    }
}

impl<T: Send + Sync + 'static> MessageChannel<T> for ExecutorChannel<T> {
    fn send(&self, message: Message<T>) -> bool {
        if self.is_shutdown() {
            warn!(channel = %self.name(), "Dropping message sent to a channel that has been shut down");
            return false;
        }

        let subscribers = self
            .inner
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if subscribers.is_empty() {
            debug!(channel = %self.name(), "Dropping message sent to a channel with no subscribers");
            return false;
        }

        let message = Arc::new(message);
        let mut delivered = false;
        for subscriber in subscribers.iter() {
            if subscriber.queue.send(message.clone()).is_ok() {
                delivered = true;
            } else {
                debug!(channel = %self.name(), subscriber_id = %subscriber.id, "Subscriber queue is closed");
            }
        }

        delivered
    }
}

impl<T: Send + Sync + 'static> SubscribableChannel<T> for ExecutorChannel<T> {
    fn subscribe(&self, handler: Arc<dyn MessageHandler<T>>) -> SubscriberId {
        let id = SubscriberId(self.inner.next_subscriber_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = mpsc::unbounded_channel();

        self.inner.tasks.spawn(Self::drain(
            self.name().to_string(),
            id,
            handler,
            receiver,
            self.inner.permits.clone(),
            self.inner.cancel.clone(),
            self.inner.tasks.clone(),
        ));

        let mut subscribers = self
            .inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if self.is_shutdown() {
            // Lost a race with shutdown; the drain task exits as soon as the sender is dropped
            warn!(channel = %self.name(), "Subscribing to a channel that has been shut down");
        } else {
            subscribers.push(Subscriber { id, queue: sender });
        }

        debug!(channel = %self.name(), subscriber_id = %id, "Subscribed");
        id
    }

    fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self
            .inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|subscriber| subscriber.id != id);
        let removed = subscribers.len() != before;

        debug!(channel = %self.name(), subscriber_id = %id, removed, "Unsubscribed");
        removed
    }
}
